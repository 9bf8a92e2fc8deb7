//! In-process fake channel for session unit tests
//!
//! [`FakeChannel`] implements [`ChannelTransport`] on top of the same
//! [`SubscriptionRegistry`] the cable consumer uses, without any network I/O.
//! Tests push events to a conversation with [`FakeChannel::emit`] and inspect
//! the subscribe/release traffic the session produced.
//!
//! ```text
//! session subscribe("c1") --> registry entry --> Subscription (session reads)
//! test emit("c1", event)  --> registry.dispatch -----^
//! ```

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::{ChannelEvent, ChannelTransport, Subscription, SubscriptionRegistry};
use crate::error::{HermineError, Result};
use crate::message::StreamFragment;

#[derive(Debug, Default)]
struct FakeState {
    registry: SubscriptionRegistry,
    subscribes: Mutex<Vec<String>>,
    releases: AtomicUsize,
    fail_subscribe: AtomicBool,
}

/// Fake real-time channel. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct FakeChannel {
    state: Arc<FakeState>,
}

impl FakeChannel {
    /// Creates a fake with no subscriptions.
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivers `event` to the live subscription for `conversation_id`.
    ///
    /// Returns false when nobody is subscribed.
    pub fn emit(&self, conversation_id: &str, event: ChannelEvent) -> bool {
        self.state.registry.dispatch(conversation_id, event)
    }

    /// Shorthand for emitting a stream fragment.
    pub fn emit_fragment(
        &self,
        conversation_id: &str,
        message_id: &str,
        content: &str,
        finished: bool,
    ) -> bool {
        self.emit(
            conversation_id,
            ChannelEvent::Stream(StreamFragment::new(message_id, content, finished)),
        )
    }

    /// Emits `Disconnected` to every live subscription.
    pub fn drop_connection(&self) {
        self.state.registry.broadcast(ChannelEvent::Disconnected);
    }

    /// Makes subsequent `subscribe` calls fail.
    pub fn fail_subscribe(&self, fail: bool) {
        self.state.fail_subscribe.store(fail, Ordering::SeqCst);
    }

    /// Conversation ids passed to `subscribe`, in call order.
    pub fn subscribe_calls(&self) -> Vec<String> {
        self.state
            .subscribes
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    /// Number of subscriptions released while still current.
    pub fn release_count(&self) -> usize {
        self.state.releases.load(Ordering::SeqCst)
    }

    /// Whether `conversation_id` currently has a live subscription.
    pub fn is_subscribed(&self, conversation_id: &str) -> bool {
        self.state.registry.contains(conversation_id)
    }
}

impl ChannelTransport for FakeChannel {
    fn subscribe(&self, conversation_id: &str) -> Result<Subscription> {
        if self.state.fail_subscribe.load(Ordering::SeqCst) {
            return Err(HermineError::Channel("fake subscribe failure".to_string()).into());
        }

        if let Ok(mut calls) = self.state.subscribes.lock() {
            calls.push(conversation_id.to_string());
        }

        let (token, events, _) = self.state.registry.register(conversation_id);
        let state = Arc::clone(&self.state);
        let id = conversation_id.to_string();
        Ok(Subscription::new(conversation_id, events, move || {
            if state.registry.release(&id, token) {
                state.releases.fetch_add(1, Ordering::SeqCst);
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_reaches_subscriber() {
        let channel = FakeChannel::new();
        let mut subscription = channel.subscribe("c1").unwrap();
        assert!(channel.emit("c1", ChannelEvent::Connected));
        assert_eq!(subscription.recv().await, Some(ChannelEvent::Connected));
        assert!(!channel.emit("other", ChannelEvent::Connected));
    }

    #[test]
    fn test_release_is_counted_once() {
        let channel = FakeChannel::new();
        let subscription = channel.subscribe("c1").unwrap();
        assert!(channel.is_subscribed("c1"));
        subscription.unsubscribe();
        assert!(!channel.is_subscribed("c1"));
        assert_eq!(channel.release_count(), 1);
    }

    #[test]
    fn test_replaced_subscription_release_is_noop() {
        let channel = FakeChannel::new();
        let first = channel.subscribe("c1").unwrap();
        let _second = channel.subscribe("c1").unwrap();
        drop(first);
        assert!(channel.is_subscribed("c1"));
        assert_eq!(channel.release_count(), 0);
        assert_eq!(channel.subscribe_calls(), vec!["c1", "c1"]);
    }

    #[test]
    fn test_subscribe_failure() {
        let channel = FakeChannel::new();
        channel.fail_subscribe(true);
        assert!(channel.subscribe("c1").is_err());
        assert!(channel.subscribe_calls().is_empty());
    }
}
