//! Assembly of streamed assistant replies.
//!
//! Fragments for one message identifier are appended in arrival order into a
//! growing buffer until a terminal fragment closes it. Closing is idempotent:
//! a second terminal fragment, or any later fragment for a closed identifier,
//! is ignored and never reopens the message.

use std::collections::{HashMap, HashSet};

use crate::message::StreamFragment;

/// What applying a fragment did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentOutcome {
    /// First fragment for this identifier; the message is now streaming.
    Started,
    /// Delta appended to an existing accumulation.
    Appended,
    /// The fragment closed the message. Reported once per identifier.
    Completed,
    /// Fragment for an already closed identifier; nothing changed.
    Ignored,
}

/// Result of [`StreamAssembler::apply`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedFragment {
    /// Target message identifier.
    pub message_id: String,
    /// Full accumulated content after applying the fragment.
    pub content: String,
    /// Classification of the update.
    pub outcome: FragmentOutcome,
}

/// Accumulates stream fragments per in-flight message.
#[derive(Debug, Default, Clone)]
pub struct StreamAssembler {
    in_flight: HashMap<String, String>,
    closed: HashSet<String>,
}

impl StreamAssembler {
    /// Creates an empty assembler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one fragment.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use hermine_session::assembler::{FragmentOutcome, StreamAssembler};
    /// use hermine_session::message::StreamFragment;
    ///
    /// let mut assembler = StreamAssembler::new();
    /// let first = assembler.apply(&StreamFragment::new("m1", "Hi", false));
    /// assert_eq!(first.outcome, FragmentOutcome::Started);
    ///
    /// let last = assembler.apply(&StreamFragment::new("m1", " there", true));
    /// assert_eq!(last.outcome, FragmentOutcome::Completed);
    /// assert_eq!(last.content, "Hi there");
    /// ```
    pub fn apply(&mut self, fragment: &StreamFragment) -> AppliedFragment {
        let id = fragment.message_id.clone();

        if self.closed.contains(&id) {
            tracing::debug!(message_id = %id, "Ignoring fragment for closed message");
            return AppliedFragment {
                message_id: id,
                content: String::new(),
                outcome: FragmentOutcome::Ignored,
            };
        }

        let started = !self.in_flight.contains_key(&id);
        let buffer = self.in_flight.entry(id.clone()).or_default();
        buffer.push_str(&fragment.content);
        let content = buffer.clone();

        if fragment.finished {
            self.finish(&id);
            return AppliedFragment {
                message_id: id,
                content,
                outcome: FragmentOutcome::Completed,
            };
        }

        AppliedFragment {
            message_id: id,
            content,
            outcome: if started {
                FragmentOutcome::Started
            } else {
                FragmentOutcome::Appended
            },
        }
    }

    /// Starts accumulating `message_id` from content that is already shown,
    /// so later deltas extend it instead of replacing it.
    ///
    /// No-op when the identifier is closed or already in flight. Returns
    /// true if the buffer was seeded.
    pub fn seed(&mut self, message_id: &str, content: &str) -> bool {
        if self.closed.contains(message_id) || self.in_flight.contains_key(message_id) {
            return false;
        }
        self.in_flight
            .insert(message_id.to_string(), content.to_string());
        true
    }

    /// Marks `message_id` closed without a terminal fragment.
    ///
    /// Used when another source (a full message or a poll result) finalized
    /// the message. Returns true if the identifier was still in flight.
    pub fn close(&mut self, message_id: &str) -> bool {
        let was_in_flight = self.in_flight.contains_key(message_id);
        self.finish(message_id);
        was_in_flight
    }

    /// Whether fragments for `message_id` are still being accumulated.
    pub fn is_in_flight(&self, message_id: &str) -> bool {
        self.in_flight.contains_key(message_id)
    }

    /// Whether `message_id` has been closed.
    pub fn is_closed(&self, message_id: &str) -> bool {
        self.closed.contains(message_id)
    }

    /// Drops all state, for a new conversation.
    pub fn reset(&mut self) {
        self.in_flight.clear();
        self.closed.clear();
    }

    fn finish(&mut self, message_id: &str) {
        self.in_flight.remove(message_id);
        self.closed.insert(message_id.to_string());
    }
}
