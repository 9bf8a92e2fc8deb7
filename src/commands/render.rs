//! Incremental terminal rendering of session snapshots
//!
//! [`Transcript`] remembers what it already printed for each message and
//! turns every new snapshot into the text that still has to be written, so
//! a streaming reply appears as it grows.

use std::collections::{HashMap, HashSet};

use colored::Colorize;

use crate::message::{Message, Role};
use crate::session::{ActivityState, SessionSnapshot};

/// Printed state of one conversation.
#[derive(Debug, Default)]
pub struct Transcript {
    printed: HashMap<String, String>,
    closed: HashSet<String>,
    open: Option<String>,
    shown_error: bool,
}

impl Transcript {
    /// Creates an empty transcript.
    pub fn new() -> Self {
        Self::default()
    }

    /// Forgets everything printed, e.g. after `/new`.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Marks every message in `snapshot` as printed without rendering it.
    pub fn skip(&mut self, snapshot: &SessionSnapshot) {
        for message in &snapshot.messages {
            self.printed
                .insert(message.id.clone(), message.content.clone());
            if message.finalized {
                self.closed.insert(message.id.clone());
            }
        }
    }

    /// Whether a message line is still open (no trailing newline yet).
    pub fn is_mid_line(&self) -> bool {
        self.open.is_some()
    }

    /// Text to write for `snapshot`.
    ///
    /// User messages are only rendered when `include_user` is set; the
    /// interactive prompt already echoes what the user typed.
    pub fn render(&mut self, snapshot: &SessionSnapshot, include_user: bool) -> String {
        let mut out = String::new();

        for message in &snapshot.messages {
            if message.role == Role::User && !include_user {
                self.printed
                    .entry(message.id.clone())
                    .or_insert_with(|| message.content.clone());
                self.closed.insert(message.id.clone());
                continue;
            }
            if self.closed.contains(&message.id) {
                continue;
            }
            self.render_message(message, &mut out);
        }

        match snapshot.activity {
            ActivityState::Errored => {
                if !self.shown_error {
                    self.close_open_line(&mut out);
                    let text = snapshot.error_text.as_deref().unwrap_or("error");
                    out.push_str(&format!("{}\n", format!("! {}", text).red().bold()));
                    self.shown_error = true;
                }
            }
            _ => self.shown_error = false,
        }

        out
    }

    fn render_message(&mut self, message: &Message, out: &mut String) {
        let already = self.printed.get(&message.id).cloned();

        match already {
            None => {
                if message.content.is_empty() && !message.finalized {
                    return;
                }
                self.close_open_line(out);
                out.push_str(&label(message.role));
                out.push_str(&message.content);
                self.open = Some(message.id.clone());
            }
            Some(printed) => {
                let is_open = self.open.as_deref() == Some(message.id.as_str());
                match message.content.strip_prefix(printed.as_str()) {
                    Some(rest) if is_open => out.push_str(rest),
                    Some("") => {}
                    // Resumed after another line, or content was replaced
                    // rather than extended.
                    _ => {
                        self.close_open_line(out);
                        out.push_str(&label(message.role));
                        out.push_str(&message.content);
                        self.open = Some(message.id.clone());
                    }
                }
            }
        }
        self.printed
            .insert(message.id.clone(), message.content.clone());

        if message.finalized {
            if self.open.as_deref() == Some(message.id.as_str()) {
                if message.has_errors {
                    out.push_str(&format!(" {}", "[incomplete]".yellow()));
                }
                out.push('\n');
                self.open = None;
            }
            self.closed.insert(message.id.clone());
        }
    }

    fn close_open_line(&mut self, out: &mut String) {
        if self.open.take().is_some() {
            out.push('\n');
        }
    }
}

fn label(role: Role) -> String {
    match role {
        Role::User => format!("{} ", "you>".blue().bold()),
        Role::Assistant => format!("{} ", "agent>".green().bold()),
    }
}
