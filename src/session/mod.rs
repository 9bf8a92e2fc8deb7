//! Conversation session: the only component the widget shell talks to.
//!
//! [`ConversationSession::spawn`] starts one Tokio task that owns a
//! [`SessionCore`] and feeds it, one at a time, with shell intents, channel
//! events, HTTP completions and poll results. After each event the task
//! publishes a fresh [`SessionSnapshot`] on a `watch` channel.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use hermine_session::api::http::HttpBackend;
//! use hermine_session::channel::cable::CableHub;
//! use hermine_session::config::BackendConfig;
//! use hermine_session::session::{ConversationSession, SessionSettings};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let backend = BackendConfig::default();
//!     let api = Arc::new(HttpBackend::new(&backend)?);
//!     let channel = CableHub::global().connect(&backend.endpoint)?;
//!
//!     let session = ConversationSession::spawn(SessionSettings::default(), api, channel);
//!     session.send_message("Hallo!");
//!
//!     let done = session
//!         .wait_for(|snapshot| !snapshot.is_busy() && !snapshot.messages.is_empty())
//!         .await;
//!     println!("{:?}", done.and_then(|s| s.last_assistant().cloned()));
//!     session.dispose();
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::ConversationApi;
use crate::channel::{ChannelEvent, ChannelTransport, Subscription};
use crate::i18n::Language;

pub mod poller;
pub mod state;

pub use poller::PollingPolicy;
pub use state::{
    ActivityState, ChannelStatus, Effect, SessionCore, SessionEvent, SessionSnapshot,
};

use poller::Poller;

/// Per-session settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionSettings {
    /// Display language for placeholders and error text.
    pub language: Language,
    /// Polling fallback policy.
    pub polling: PollingPolicy,
}

#[derive(Debug)]
enum Command {
    Initialize,
    Send(String),
    ClearError,
    Reset,
    Dispose,
}

/// Cloneable handle to a running session.
///
/// All intents are fire-and-forget; observe their outcome through
/// [`SessionHandle::snapshot`] or [`SessionHandle::subscribe`].
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
    snapshots: watch::Receiver<SessionSnapshot>,
    cancel: CancellationToken,
}

impl SessionHandle {
    /// Opens the conversation: create, fetch history, subscribe.
    pub fn initialize(&self) {
        self.command(Command::Initialize);
    }

    /// Submits user text. Opens the conversation first if needed.
    pub fn send_message(&self, text: impl Into<String>) {
        self.command(Command::Send(text.into()));
    }

    /// Dismisses the current error.
    pub fn clear_error(&self) {
        self.command(Command::ClearError);
    }

    /// Discards the conversation and returns to uninitialized.
    pub fn reset_conversation(&self) {
        self.command(Command::Reset);
    }

    /// Tears the session down. No snapshot is published afterwards.
    pub fn dispose(&self) {
        self.command(Command::Dispose);
        self.cancel.cancel();
    }

    /// Whether the session task has been told to stop.
    pub fn is_disposed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Receiver notified on every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.clone()
    }

    /// Waits until a snapshot satisfies `predicate`.
    ///
    /// Returns `None` once the session is gone.
    pub async fn wait_for<F>(&self, mut predicate: F) -> Option<SessionSnapshot>
    where
        F: FnMut(&SessionSnapshot) -> bool,
    {
        let mut rx = self.snapshots.clone();
        loop {
            {
                let snapshot = rx.borrow_and_update();
                if predicate(&snapshot) {
                    return Some(snapshot.clone());
                }
            }
            if rx.changed().await.is_err() {
                return None;
            }
        }
    }

    fn command(&self, command: Command) {
        if self.commands.send(command).is_err() {
            debug!("Session already stopped, dropping intent");
        }
    }
}

/// Entry point for starting sessions.
#[derive(Debug)]
pub struct ConversationSession;

impl ConversationSession {
    /// Spawns the session task on the current Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn spawn(
        settings: SessionSettings,
        api: Arc<dyn ConversationApi>,
        channel: Arc<dyn ChannelTransport>,
    ) -> SessionHandle {
        let core = SessionCore::new(settings.language);
        let (snapshot_tx, snapshot_rx) = watch::channel(core.snapshot());
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (result_tx, result_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let driver = Driver {
            core,
            policy: settings.polling,
            api,
            channel,
            subscription: None,
            requests: JoinSet::new(),
            poller: None,
            results: result_tx,
            snapshots: snapshot_tx,
            cancel: cancel.clone(),
        };
        tokio::spawn(driver.run(command_rx, result_rx));

        SessionHandle {
            commands: command_tx,
            snapshots: snapshot_rx,
            cancel,
        }
    }
}

struct Driver {
    core: SessionCore,
    policy: PollingPolicy,
    api: Arc<dyn ConversationApi>,
    channel: Arc<dyn ChannelTransport>,
    subscription: Option<Subscription>,
    requests: JoinSet<()>,
    poller: Option<CancellationToken>,
    results: mpsc::UnboundedSender<SessionEvent>,
    snapshots: watch::Sender<SessionSnapshot>,
    cancel: CancellationToken,
}

impl Driver {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut results: mpsc::UnboundedReceiver<SessionEvent>,
    ) {
        loop {
            let event = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                event = next_channel_event(&mut self.subscription) => SessionEvent::Channel(event),
                Some(event) = results.recv() => event,
                command = commands.recv() => match command {
                    Some(Command::Initialize) => SessionEvent::InitializeRequested,
                    Some(Command::Send(text)) => SessionEvent::SendRequested(text),
                    Some(Command::ClearError) => SessionEvent::ClearErrorRequested,
                    Some(Command::Reset) => SessionEvent::ResetRequested,
                    Some(Command::Dispose) | None => break,
                },
                Some(joined) = self.requests.join_next(), if !self.requests.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            warn!(error = %e, "Session request task panicked");
                        }
                    }
                    continue;
                }
            };

            for effect in self.core.handle(event) {
                self.apply(effect);
            }
            self.publish();
        }

        self.shutdown();
    }

    fn apply(&mut self, effect: Effect) {
        match effect {
            Effect::Bootstrap {
                generation,
                conversation_id,
            } => {
                let api = Arc::clone(&self.api);
                let results = self.results.clone();
                self.requests.spawn(async move {
                    let event = bootstrap(api.as_ref(), generation, conversation_id).await;
                    let _ = results.send(event);
                });
            }
            Effect::Subscribe { conversation_id } => {
                match self.channel.subscribe(&conversation_id) {
                    Ok(subscription) => {
                        debug!(conversation_id = %conversation_id, "Subscribed");
                        self.subscription = Some(subscription);
                    }
                    Err(e) => {
                        warn!(conversation_id = %conversation_id, error = %e, "Subscribe failed");
                        self.release_subscription();
                        let _ = self
                            .results
                            .send(SessionEvent::Channel(ChannelEvent::Disconnected));
                    }
                }
            }
            Effect::Unsubscribe => self.release_subscription(),
            Effect::SendMessage {
                generation,
                seq,
                conversation_id,
                text,
            } => {
                let api = Arc::clone(&self.api);
                let results = self.results.clone();
                self.requests.spawn(async move {
                    let event = match api.send_message(&conversation_id, &text).await {
                        Ok(response) => SessionEvent::SendCompleted {
                            generation,
                            seq,
                            response,
                        },
                        Err(e) => SessionEvent::SendFailed {
                            generation,
                            seq,
                            error: format!("{:#}", e),
                        },
                    };
                    let _ = results.send(event);
                });
            }
            Effect::StartPolling {
                run,
                conversation_id,
            } => {
                self.stop_poller();
                let token = self.cancel.child_token();
                let poller = Poller {
                    api: Arc::clone(&self.api),
                    conversation_id,
                    policy: self.policy,
                    run,
                    events: self.results.clone(),
                    cancel: token.clone(),
                };
                self.poller = Some(token);
                self.requests.spawn(poller.run());
            }
            Effect::StopPolling => self.stop_poller(),
        }
    }

    fn publish(&self) {
        let next = self.core.snapshot();
        self.snapshots.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    fn release_subscription(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
    }

    fn stop_poller(&mut self) {
        if let Some(token) = self.poller.take() {
            token.cancel();
        }
    }

    fn shutdown(&mut self) {
        self.release_subscription();
        self.stop_poller();
        self.requests.abort_all();
        info!(
            conversation_id = ?self.core.conversation_id(),
            state = %self.core.activity(),
            "Session disposed"
        );
    }
}

/// Next event of the current subscription; never resolves without one.
async fn next_channel_event(subscription: &mut Option<Subscription>) -> ChannelEvent {
    let Some(active) = subscription.as_mut() else {
        return std::future::pending().await;
    };
    match active.recv().await {
        Some(event) => event,
        None => {
            *subscription = None;
            ChannelEvent::Disconnected
        }
    }
}

async fn bootstrap(
    api: &dyn ConversationApi,
    generation: u64,
    known_id: Option<String>,
) -> SessionEvent {
    let conversation_id = match known_id {
        Some(id) => id,
        None => match api.create_conversation().await {
            Ok(id) => id,
            Err(e) => {
                return SessionEvent::BootstrapFailed {
                    generation,
                    conversation_id: None,
                    error: format!("{:#}", e),
                }
            }
        },
    };

    match api.fetch_conversation(&conversation_id).await {
        Ok(response) => SessionEvent::Bootstrapped {
            generation,
            conversation_id,
            response,
        },
        Err(e) => SessionEvent::BootstrapFailed {
            generation,
            conversation_id: Some(conversation_id),
            error: format!("{:#}", e),
        },
    }
}
