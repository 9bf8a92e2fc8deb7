//! Interactive chat mode handler.
//!
//! Opens a session, prints the conversation history, then runs a readline
//! loop. While a reply is outstanding the loop follows the session's
//! snapshots and prints the reply as it streams in.

use super::render::Transcript;
use super::special_commands::{parse_special_command, print_help, SpecialCommand};
use super::Connection;
use crate::config::Config;
use crate::error::Result;
use crate::session::{ActivityState, SessionHandle, SessionSnapshot};
use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::io::Write;

/// Start interactive chat mode
///
/// # Errors
///
/// Returns an error if the backend client or terminal editor cannot be
/// created. Session failures are shown inline and do not end the chat.
pub async fn run_chat(config: Config) -> Result<()> {
    let connection = Connection::new(&config)?;
    let session = connection.start_session(&config)?;
    let mut rl = DefaultEditor::new()?;
    let mut transcript = Transcript::new();

    print_welcome_banner(&config);

    session.initialize();
    if let Some(snapshot) = session.wait_for(|s| !s.is_busy() && is_opened(s)).await {
        print_opening(&snapshot, &mut transcript);
    }

    loop {
        let prompt = format!("{} ", "you>".blue().bold());
        match rl.readline(&prompt) {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }

                match parse_special_command(trimmed) {
                    Ok(SpecialCommand::NewConversation) => {
                        let previous = session.snapshot().conversation_id;
                        session.reset_conversation();
                        session.initialize();
                        transcript.clear();

                        // Snapshots coalesce, so the reset itself may never be observed.
                        let mut reopening = false;
                        let reopened = session
                            .wait_for(|s| {
                                reopening |= matches!(
                                    s.activity,
                                    ActivityState::Uninitialized | ActivityState::Initializing
                                );
                                (reopening || s.conversation_id != previous) && is_opened(s)
                            })
                            .await;
                        if let Some(snapshot) = reopened {
                            println!("{}", "Started a new conversation.".cyan());
                            print_opening(&snapshot, &mut transcript);
                        }
                        continue;
                    }
                    Ok(SpecialCommand::Dismiss) => {
                        session.clear_error();
                        println!("{}", "Error dismissed.".cyan());
                        continue;
                    }
                    Ok(SpecialCommand::ShowStatus) => {
                        print_status(&session.snapshot());
                        continue;
                    }
                    Ok(SpecialCommand::Help) => {
                        print_help();
                        continue;
                    }
                    Ok(SpecialCommand::Exit) => break,
                    Ok(SpecialCommand::None) => {}
                    Err(e) => {
                        eprintln!("{}", e.to_string().yellow());
                        continue;
                    }
                }

                rl.add_history_entry(trimmed)?;

                let before = session.snapshot();
                session.send_message(trimmed);
                follow_reply(&session, &mut transcript, before).await;
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => break,
            Err(e) => {
                tracing::error!("Readline error: {}", e);
                break;
            }
        }
    }

    session.dispose();
    connection.close();
    println!("Goodbye!");
    Ok(())
}

/// Prints snapshots until the reply settles.
async fn follow_reply(
    session: &SessionHandle,
    transcript: &mut Transcript,
    before: SessionSnapshot,
) {
    let mut rx = session.subscribe();
    let mut started = false;
    let was_errored = before.activity == ActivityState::Errored;

    loop {
        let snapshot = rx.borrow_and_update().clone();
        print_flush(&transcript.render(&snapshot, false));

        // The first snapshot can predate the send being processed.
        started |= snapshot.is_busy() || snapshot.messages.len() > before.messages.len();
        let settled = if snapshot.activity == ActivityState::Errored {
            started || !was_errored
        } else {
            started && !snapshot.is_busy()
        };
        if settled {
            break;
        }

        if rx.changed().await.is_err() {
            break;
        }
    }

    if transcript.is_mid_line() {
        println!();
    }
}

fn is_opened(snapshot: &SessionSnapshot) -> bool {
    matches!(
        snapshot.activity,
        ActivityState::Idle | ActivityState::Errored
    )
}

fn print_opening(snapshot: &SessionSnapshot, transcript: &mut Transcript) {
    print_flush(&transcript.render(snapshot, true));
    if transcript.is_mid_line() {
        println!();
    }
    if let Some(disclaimer) = &snapshot.privacy_disclaimer {
        println!("{}", disclaimer.dimmed());
    }
    if !snapshot.prompts.is_empty() {
        println!("{}", "Try asking:".dimmed());
        for prompt in &snapshot.prompts {
            println!("  {}", prompt.dimmed());
        }
    }
    println!("{}", snapshot.input_placeholder.dimmed());
}

fn print_flush(text: &str) {
    if text.is_empty() {
        return;
    }
    print!("{}", text);
    let _ = std::io::stdout().flush();
}

fn print_welcome_banner(config: &Config) {
    println!(
        "{} {}/{} ({})",
        "Hermine chat".bold(),
        config.backend.account_id,
        config.backend.agent_slug,
        config.backend.endpoint
    );
    println!("Type {} for commands.\n", "/help".cyan());
}

fn print_status(snapshot: &SessionSnapshot) {
    println!(
        "conversation: {}",
        snapshot.conversation_id.as_deref().unwrap_or("-")
    );
    println!("state:        {}", snapshot.activity);
    println!("channel:      {:?}", snapshot.channel);
    println!("messages:     {}", snapshot.messages.len());
    if let Some(kind) = snapshot.error {
        println!("error:        {}", kind);
    }
}
