//! Bounded polling fallback.
//!
//! The poller fetches the conversation at a fixed interval and forwards each
//! result to the session loop. It stops when cancelled or after
//! `max_attempts` fetches, reporting [`SessionEvent::PollExhausted`] in the
//! latter case. Whether a result completes the reply is the reducer's call.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::state::SessionEvent;
use crate::api::ConversationApi;

/// Default delay between poll attempts.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// Default attempt cap.
pub const DEFAULT_POLL_MAX_ATTEMPTS: u32 = 30;

/// Interval and attempt cap of the polling fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollingPolicy {
    /// Delay before each attempt.
    pub interval: Duration,
    /// Attempts before giving up.
    pub max_attempts: u32,
}

impl Default for PollingPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_attempts: DEFAULT_POLL_MAX_ATTEMPTS,
        }
    }
}

impl PollingPolicy {
    /// Upper bound on how long a reply may take once polling started.
    pub fn deadline(&self) -> Duration {
        self.interval * self.max_attempts
    }
}

/// One polling run for one conversation.
pub(crate) struct Poller {
    pub(crate) api: Arc<dyn ConversationApi>,
    pub(crate) conversation_id: String,
    pub(crate) policy: PollingPolicy,
    pub(crate) run: u64,
    pub(crate) events: mpsc::UnboundedSender<SessionEvent>,
    pub(crate) cancel: CancellationToken,
}

impl Poller {
    pub(crate) async fn run(self) {
        debug!(
            run = self.run,
            conversation_id = %self.conversation_id,
            attempts = self.policy.max_attempts,
            deadline_ms = self.policy.deadline().as_millis() as u64,
            "Polling conversation"
        );
        for attempt in 1..=self.policy.max_attempts {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = tokio::time::sleep(self.policy.interval) => {}
            }

            let result = tokio::select! {
                _ = self.cancel.cancelled() => return,
                result = self.api.fetch_conversation(&self.conversation_id) => result,
            };

            let event = match result {
                Ok(response) => SessionEvent::PollSucceeded {
                    run: self.run,
                    attempt,
                    response,
                },
                Err(e) => SessionEvent::PollFailed {
                    run: self.run,
                    attempt,
                    error: format!("{:#}", e),
                },
            };
            if self.events.send(event).is_err() {
                return;
            }
        }

        if !self.cancel.is_cancelled() {
            debug!(run = self.run, "Polling attempts exhausted");
            let _ = self.events.send(SessionEvent::PollExhausted { run: self.run });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::fake::FakeConversationApi;

    fn poller(
        api: &FakeConversationApi,
        max_attempts: u32,
    ) -> (Poller, mpsc::UnboundedReceiver<SessionEvent>, CancellationToken) {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let poller = Poller {
            api: Arc::new(api.clone()),
            conversation_id: "c1".to_string(),
            policy: PollingPolicy {
                interval: Duration::from_millis(5),
                max_attempts,
            },
            run: 4,
            events: tx,
            cancel: cancel.clone(),
        };
        (poller, rx, cancel)
    }

    #[test]
    fn test_default_policy() {
        let policy = PollingPolicy::default();
        assert_eq!(policy.interval, Duration::from_millis(1000));
        assert_eq!(policy.max_attempts, 30);
        assert_eq!(policy.deadline(), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_runs_to_cap_then_reports_exhaustion() {
        let api = FakeConversationApi::default();
        api.push_fetch_error(503);
        let (poller, mut rx, _cancel) = poller(&api, 3);
        poller.run().await;

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert_eq!(events.len(), 4);
        assert!(matches!(
            events[0],
            SessionEvent::PollFailed { run: 4, attempt: 1, .. }
        ));
        assert!(matches!(
            events[2],
            SessionEvent::PollSucceeded { run: 4, attempt: 3, .. }
        ));
        assert!(matches!(events[3], SessionEvent::PollExhausted { run: 4 }));
        assert_eq!(api.fetch_calls(), 3);
    }

    #[tokio::test]
    async fn test_cancel_stops_without_exhaustion() {
        let api = FakeConversationApi::default();
        let (poller, mut rx, cancel) = poller(&api, 1000);
        let handle = tokio::spawn(poller.run());

        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.cancel();
        handle.await.unwrap();

        let mut exhausted = false;
        while let Ok(event) = rx.try_recv() {
            exhausted |= matches!(event, SessionEvent::PollExhausted { .. });
        }
        assert!(!exhausted);
        assert!(api.fetch_calls() < 1000);
    }
}
