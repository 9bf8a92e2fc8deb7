//! Real-time channel abstraction and implementations
//!
//! This module defines the [`ChannelTransport`] trait through which a
//! conversation session receives live updates. Concrete implementations live
//! in submodules:
//!
//! - [`cable::CableConsumer`]: ActionCable protocol over a WebSocket,
//!   one shared connection per backend origin.
//! - `fake::FakeChannel`: in-process fake used in tests (cfg(test)
//!   only).
//!
//! # Design
//!
//! Callers `subscribe` to a conversation identifier and receive a
//! [`Subscription`]: a stream of [`ChannelEvent`]s plus a release handle.
//! Events form a small closed set: lifecycle (`Connected`, `Disconnected`,
//! `Rejected`) and the two inbound payload shapes (full message, stream
//! fragment). The channel holds no conversation state and never
//! re-subscribes on its own; reconnection policy belongs to the session.
//!
//! At most one subscription per conversation identifier is active. A second
//! `subscribe` for the same identifier replaces the first: the old
//! subscription's event stream ends and releasing it later does nothing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde_json::Value as JsonValue;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::message::{ApiMessage, StreamFragment};

pub mod cable;

#[cfg(test)]
pub mod fake;

/// Discriminant value marking a payload as a stream fragment.
pub const STREAM_TYPE_TAG: &str = "stream";

/// Events delivered on a conversation subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// The server confirmed the subscription.
    Connected,
    /// The underlying connection dropped or could not be established.
    Disconnected,
    /// The server refused the subscription.
    Rejected,
    /// A complete message record.
    Message(ApiMessage),
    /// A partial reply fragment.
    Stream(StreamFragment),
}

/// Abstraction over real-time channel implementations.
///
/// Implementations must not block: `subscribe` registers the subscription
/// and returns immediately, and connection failures surface later as
/// [`ChannelEvent::Disconnected`] or [`ChannelEvent::Rejected`].
pub trait ChannelTransport: Send + Sync + std::fmt::Debug {
    /// Open a subscription scoped to `conversation_id`.
    ///
    /// # Errors
    ///
    /// Returns an error only when the subscription cannot even be
    /// registered (for example when called outside a Tokio runtime).
    fn subscribe(&self, conversation_id: &str) -> Result<Subscription>;
}

type ReleaseFn = Box<dyn FnOnce() + Send>;

/// Handle to one live conversation subscription.
///
/// Dropping the handle releases the subscription, same as
/// [`Subscription::unsubscribe`].
pub struct Subscription {
    conversation_id: String,
    events: mpsc::UnboundedReceiver<ChannelEvent>,
    release: Option<ReleaseFn>,
}

impl Subscription {
    /// Builds a subscription from its event receiver and release action.
    pub fn new(
        conversation_id: impl Into<String>,
        events: mpsc::UnboundedReceiver<ChannelEvent>,
        release: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            events,
            release: Some(Box::new(release)),
        }
    }

    /// Conversation this subscription is scoped to.
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// Waits for the next event. `None` once the subscription was replaced
    /// or the channel went away.
    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        self.events.recv().await
    }

    /// Releases the subscription.
    pub fn unsubscribe(mut self) {
        self.release_now();
    }

    fn release_now(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release_now();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("conversation_id", &self.conversation_id)
            .field("released", &self.release.is_none())
            .finish()
    }
}

/// Routes a decoded channel payload to exactly one event.
///
/// Payloads tagged `"type": "stream"` become [`ChannelEvent::Stream`];
/// everything else is treated as a full message. Payloads that fit neither
/// shape are logged and dropped.
pub fn route_payload(payload: JsonValue) -> Option<ChannelEvent> {
    let is_stream = payload.get("type").and_then(JsonValue::as_str) == Some(STREAM_TYPE_TAG);

    if is_stream {
        match serde_json::from_value::<StreamFragment>(payload) {
            Ok(fragment) => Some(ChannelEvent::Stream(fragment)),
            Err(e) => {
                tracing::warn!(error = %e, "Dropping malformed stream fragment");
                None
            }
        }
    } else {
        match serde_json::from_value::<ApiMessage>(payload) {
            Ok(message) => Some(ChannelEvent::Message(message)),
            Err(e) => {
                tracing::warn!(error = %e, "Dropping malformed channel message");
                None
            }
        }
    }
}

#[derive(Debug)]
struct RegistryEntry {
    token: u64,
    tx: mpsc::UnboundedSender<ChannelEvent>,
}

/// Per-connection table of live subscriptions, keyed by conversation id.
#[derive(Debug, Default)]
pub(crate) struct SubscriptionRegistry {
    entries: Mutex<HashMap<String, RegistryEntry>>,
    next_token: AtomicU64,
}

impl SubscriptionRegistry {
    /// Registers a subscription, replacing any prior one for the same id.
    ///
    /// Returns the entry token, the event receiver, and whether an existing
    /// entry was replaced.
    pub(crate) fn register(
        &self,
        conversation_id: &str,
    ) -> (u64, mpsc::UnboundedReceiver<ChannelEvent>, bool) {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        let replaced = self
            .lock()
            .insert(conversation_id.to_string(), RegistryEntry { token, tx })
            .is_some();
        if replaced {
            tracing::debug!(conversation_id = %conversation_id, "Replaced existing subscription");
        }
        (token, rx, replaced)
    }

    /// Removes the entry if it still belongs to `token`.
    pub(crate) fn release(&self, conversation_id: &str, token: u64) -> bool {
        let mut entries = self.lock();
        match entries.get(conversation_id) {
            Some(entry) if entry.token == token => {
                entries.remove(conversation_id);
                true
            }
            _ => false,
        }
    }

    /// Delivers an event to one conversation's subscriber.
    pub(crate) fn dispatch(&self, conversation_id: &str, event: ChannelEvent) -> bool {
        match self.lock().get(conversation_id) {
            Some(entry) => entry.tx.send(event).is_ok(),
            None => {
                tracing::debug!(conversation_id = %conversation_id, "No subscriber for event");
                false
            }
        }
    }

    /// Delivers an event to every subscriber.
    pub(crate) fn broadcast(&self, event: ChannelEvent) {
        for entry in self.lock().values() {
            let _ = entry.tx.send(event.clone());
        }
    }

    /// Conversation ids with a live subscription.
    pub(crate) fn conversation_ids(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    pub(crate) fn contains(&self, conversation_id: &str) -> bool {
        self.lock().contains_key(conversation_id)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, RegistryEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
