//! Conversation session state machine.
//!
//! [`SessionCore`] is a pure reducer: it consumes [`SessionEvent`]s one at a
//! time, mutates the conversation state synchronously and returns the
//! [`Effect`]s the driver must perform (network calls, subscription changes,
//! polling). Nothing in this module does I/O, so every transition is
//! unit-testable.
//!
//! Results of asynchronous work carry the conversation `generation` (or the
//! polling `run`) they were started for. Results from a discarded
//! conversation or a cancelled poller are dropped.

use std::collections::VecDeque;
use std::fmt;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::api::{ConversationResponse, SendMessageResponse};
use crate::assembler::{FragmentOutcome, StreamAssembler};
use crate::channel::ChannelEvent;
use crate::error::SessionErrorKind;
use crate::i18n::Language;
use crate::message::{normalize, normalize_all, Message, Role, StreamFragment};

/// What the session is currently doing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ActivityState {
    /// No conversation yet.
    Uninitialized,
    /// Creating the conversation and fetching its history.
    Initializing,
    /// Ready for input.
    Idle,
    /// A message was sent; no reply content has arrived yet.
    AwaitingReply,
    /// Reply fragments are arriving for `message_id`.
    StreamingReply {
        /// Assistant message being streamed.
        message_id: String,
    },
    /// A user-visible failure; see the snapshot's `error`.
    Errored,
}

impl ActivityState {
    /// Whether a reply to the last user message is outstanding.
    pub fn is_reply_outstanding(&self) -> bool {
        matches!(self, Self::AwaitingReply | Self::StreamingReply { .. })
    }

    /// Short lowercase name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Initializing => "initializing",
            Self::Idle => "idle",
            Self::AwaitingReply => "awaiting_reply",
            Self::StreamingReply { .. } => "streaming_reply",
            Self::Errored => "errored",
        }
    }
}

impl fmt::Display for ActivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Health of the real-time subscription as seen by the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelStatus {
    /// No subscription requested.
    Unsubscribed,
    /// Subscription requested, not yet confirmed.
    Pending,
    /// The server confirmed the subscription.
    Live,
    /// The subscription was rejected or the connection dropped.
    Lost,
}

/// Render contract: everything the widget shell needs to draw the chat.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    /// Conversation log in display order.
    pub messages: Vec<Message>,
    /// Backend conversation identifier, once assigned.
    pub conversation_id: Option<String>,
    /// Current activity.
    pub activity: ActivityState,
    /// Real-time subscription health.
    pub channel: ChannelStatus,
    /// Suggested starter prompts.
    pub prompts: Vec<String>,
    /// Agent avatar reference.
    pub avatar_url: Option<String>,
    /// Disclaimer shown under the input.
    pub privacy_disclaimer: Option<String>,
    /// Placeholder for the input box, in the configured language.
    pub input_placeholder: String,
    /// Failure class while errored.
    pub error: Option<SessionErrorKind>,
    /// Localized banner text for user-visible failures.
    pub error_text: Option<String>,
}

impl SessionSnapshot {
    /// The most recent assistant message, if any.
    pub fn last_assistant(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.is_assistant())
    }

    /// Whether the shell should block input.
    pub fn is_busy(&self) -> bool {
        matches!(self.activity, ActivityState::Initializing) || self.activity.is_reply_outstanding()
    }
}

/// Inputs of the reducer.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Shell asked to open the conversation.
    InitializeRequested,
    /// Shell submitted user text.
    SendRequested(String),
    /// Shell dismissed the error banner.
    ClearErrorRequested,
    /// Shell asked for a fresh conversation.
    ResetRequested,
    /// Create (if needed) and fetch succeeded.
    Bootstrapped {
        /// Conversation generation the bootstrap ran for.
        generation: u64,
        /// Assigned conversation identifier.
        conversation_id: String,
        /// Fetched conversation state.
        response: ConversationResponse,
    },
    /// Create or fetch failed.
    BootstrapFailed {
        /// Conversation generation the bootstrap ran for.
        generation: u64,
        /// Identifier, if create succeeded before the failure.
        conversation_id: Option<String>,
        /// Diagnostic text.
        error: String,
    },
    /// Send request returned a response.
    SendCompleted {
        /// Conversation generation of the send.
        generation: u64,
        /// Send sequence number.
        seq: u64,
        /// Backend response.
        response: SendMessageResponse,
    },
    /// Send request failed at transport or status level.
    SendFailed {
        /// Conversation generation of the send.
        generation: u64,
        /// Send sequence number.
        seq: u64,
        /// Diagnostic text.
        error: String,
    },
    /// Event from the real-time subscription.
    Channel(ChannelEvent),
    /// A poll returned conversation state.
    PollSucceeded {
        /// Poller run.
        run: u64,
        /// 1-based attempt number.
        attempt: u32,
        /// Fetched conversation state.
        response: ConversationResponse,
    },
    /// A poll request failed; the poller keeps going.
    PollFailed {
        /// Poller run.
        run: u64,
        /// 1-based attempt number.
        attempt: u32,
        /// Diagnostic text.
        error: String,
    },
    /// The poller used up its attempts.
    PollExhausted {
        /// Poller run.
        run: u64,
    },
}

/// Work the driver performs on behalf of the reducer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Create the conversation unless `conversation_id` is known, then
    /// fetch it.
    Bootstrap {
        /// Generation to tag the result with.
        generation: u64,
        /// Known identifier, if any.
        conversation_id: Option<String>,
    },
    /// Open (or replace) the subscription for the conversation.
    Subscribe {
        /// Conversation to subscribe to.
        conversation_id: String,
    },
    /// Release the current subscription.
    Unsubscribe,
    /// Submit user text.
    SendMessage {
        /// Generation to tag the result with.
        generation: u64,
        /// Sequence number to tag the result with.
        seq: u64,
        /// Target conversation.
        conversation_id: String,
        /// User text.
        text: String,
    },
    /// Start the polling fallback.
    StartPolling {
        /// Run to tag poll results with.
        run: u64,
        /// Conversation to poll.
        conversation_id: String,
    },
    /// Cancel the running poller.
    StopPolling,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    Channel,
    Poll,
}

/// State of one conversation session.
#[derive(Debug)]
pub struct SessionCore {
    language: Language,
    generation: u64,
    activity: ActivityState,
    error: Option<SessionErrorKind>,
    conversation_id: Option<String>,
    messages: Vec<Message>,
    prompts: Vec<String>,
    avatar_url: Option<String>,
    privacy_disclaimer: Option<String>,
    input_placeholder: Option<String>,
    assembler: StreamAssembler,
    channel: ChannelStatus,
    queued_send: Option<String>,
    unconfirmed: VecDeque<String>,
    next_seq: u64,
    pending_send: Option<u64>,
    next_poll_run: u64,
    polling: Option<u64>,
}

impl SessionCore {
    /// Creates an uninitialized session.
    pub fn new(language: Language) -> Self {
        Self {
            language,
            generation: 0,
            activity: ActivityState::Uninitialized,
            error: None,
            conversation_id: None,
            messages: Vec::new(),
            prompts: Vec::new(),
            avatar_url: None,
            privacy_disclaimer: None,
            input_placeholder: None,
            assembler: StreamAssembler::new(),
            channel: ChannelStatus::Unsubscribed,
            queued_send: None,
            unconfirmed: VecDeque::new(),
            next_seq: 0,
            pending_send: None,
            next_poll_run: 0,
            polling: None,
        }
    }

    /// Current conversation generation.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Current activity.
    pub fn activity(&self) -> &ActivityState {
        &self.activity
    }

    /// Conversation log.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Conversation identifier, once assigned.
    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    /// Active poller run, if polling.
    pub fn polling_run(&self) -> Option<u64> {
        self.polling
    }

    /// Builds the render snapshot.
    pub fn snapshot(&self) -> SessionSnapshot {
        let error_text = self
            .error
            .filter(|kind| kind.is_user_visible())
            .map(|_| self.language.generic_error().to_string());

        SessionSnapshot {
            messages: self.messages.clone(),
            conversation_id: self.conversation_id.clone(),
            activity: self.activity.clone(),
            channel: self.channel,
            prompts: self.prompts.clone(),
            avatar_url: self.avatar_url.clone(),
            privacy_disclaimer: self.privacy_disclaimer.clone(),
            input_placeholder: self
                .input_placeholder
                .clone()
                .unwrap_or_else(|| self.language.default_placeholder().to_string()),
            error: self.error,
            error_text,
        }
    }

    /// Applies one event and returns the effects to perform, in order.
    pub fn handle(&mut self, event: SessionEvent) -> Vec<Effect> {
        let mut effects = Vec::new();
        let before = self.activity.clone();

        match event {
            SessionEvent::InitializeRequested => self.on_initialize(&mut effects),
            SessionEvent::SendRequested(text) => self.on_send(&mut effects, &text),
            SessionEvent::ClearErrorRequested => self.on_clear_error(&mut effects),
            SessionEvent::ResetRequested => self.on_reset(&mut effects),
            SessionEvent::Bootstrapped {
                generation,
                conversation_id,
                response,
            } => self.on_bootstrapped(&mut effects, generation, conversation_id, response),
            SessionEvent::BootstrapFailed {
                generation,
                conversation_id,
                error,
            } => self.on_bootstrap_failed(&mut effects, generation, conversation_id, &error),
            SessionEvent::SendCompleted {
                generation,
                seq,
                response,
            } => {
                if self.is_current_send(generation, seq) {
                    self.pending_send = None;
                    if response.is_ok() {
                        debug!(seq, "Send acknowledged");
                    } else {
                        let reason = response.message.unwrap_or_default();
                        self.on_send_error(&mut effects, &reason);
                    }
                }
            }
            SessionEvent::SendFailed {
                generation,
                seq,
                error,
            } => {
                if self.is_current_send(generation, seq) {
                    self.pending_send = None;
                    self.on_send_error(&mut effects, &error);
                }
            }
            SessionEvent::Channel(event) => self.on_channel(&mut effects, event),
            SessionEvent::PollSucceeded {
                run,
                attempt,
                response,
            } => {
                if self.polling == Some(run) {
                    debug!(attempt, messages = response.messages.len(), "Poll result");
                    for message in normalize_all(&response.messages) {
                        self.apply_message(message, Source::Poll);
                    }
                    self.settle_reply(&mut effects);
                }
            }
            SessionEvent::PollFailed {
                run,
                attempt,
                error,
            } => {
                if self.polling == Some(run) {
                    warn!(attempt, error = %error, "Poll request failed");
                }
            }
            SessionEvent::PollExhausted { run } => {
                if self.polling == Some(run) {
                    self.polling = None;
                    if self.activity.is_reply_outstanding() {
                        warn!(run, "Polling exhausted before the reply completed");
                        self.fail(&mut effects, SessionErrorKind::PollTimeout);
                    }
                }
            }
        }

        if self.activity != before {
            debug!(from = %before, to = %self.activity, "Session state changed");
        }
        effects
    }

    fn on_initialize(&mut self, effects: &mut Vec<Effect>) {
        match self.activity {
            ActivityState::Uninitialized => self.start_bootstrap(effects),
            ActivityState::Errored if self.error == Some(SessionErrorKind::InitializationFailure) => {
                self.error = None;
                self.start_bootstrap(effects);
            }
            _ => debug!(state = %self.activity, "Ignoring initialize"),
        }
    }

    fn on_send(&mut self, effects: &mut Vec<Effect>, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            warn!("Rejecting empty message");
            return;
        }

        match self.activity {
            ActivityState::AwaitingReply | ActivityState::StreamingReply { .. } => {
                warn!(state = %self.activity, "Rejecting send while a reply is outstanding");
            }
            ActivityState::Uninitialized | ActivityState::Initializing => {
                if self.queued_send.is_some() {
                    warn!("Rejecting send, another message is waiting for the conversation");
                    return;
                }
                self.push_user_message(text);
                self.queued_send = Some(text.to_string());
                if self.activity == ActivityState::Uninitialized {
                    self.start_bootstrap(effects);
                }
            }
            ActivityState::Errored => {
                let needs_bootstrap = self.conversation_id.is_none()
                    || self.error == Some(SessionErrorKind::InitializationFailure);
                self.error = None;

                if needs_bootstrap {
                    if self.queued_send.is_none() {
                        self.push_user_message(text);
                        self.queued_send = Some(text.to_string());
                    } else {
                        warn!("Retrying queued message, new text discarded");
                    }
                    self.start_bootstrap(effects);
                } else {
                    self.activity = ActivityState::Idle;
                    self.push_user_message(text);
                    self.issue_send(effects, text.to_string());
                }
            }
            ActivityState::Idle => {
                self.push_user_message(text);
                self.issue_send(effects, text.to_string());
            }
        }
    }

    fn on_clear_error(&mut self, effects: &mut Vec<Effect>) {
        if self.activity != ActivityState::Errored {
            return;
        }
        self.error = None;

        if self.conversation_id.is_some() {
            self.activity = ActivityState::Idle;
            if let Some(text) = self.queued_send.take() {
                self.issue_send(effects, text);
            }
        } else {
            self.activity = ActivityState::Uninitialized;
        }
    }

    fn on_reset(&mut self, effects: &mut Vec<Effect>) {
        if self.channel != ChannelStatus::Unsubscribed {
            effects.push(Effect::Unsubscribe);
        }
        self.stop_polling(effects);

        info!(
            conversation_id = ?self.conversation_id,
            "Discarding conversation"
        );

        let language = self.language;
        let generation = self.generation + 1;
        let next_poll_run = self.next_poll_run;
        *self = Self::new(language);
        self.generation = generation;
        self.next_poll_run = next_poll_run;
    }

    fn on_bootstrapped(
        &mut self,
        effects: &mut Vec<Effect>,
        generation: u64,
        conversation_id: String,
        response: ConversationResponse,
    ) {
        if generation != self.generation || self.activity != ActivityState::Initializing {
            debug!(generation, "Dropping stale bootstrap result");
            return;
        }
        if let Some(existing) = &self.conversation_id {
            if existing != &conversation_id {
                warn!(
                    existing = %existing,
                    received = %conversation_id,
                    "Ignoring bootstrap for a different conversation"
                );
                return;
            }
        }
        self.conversation_id = Some(conversation_id.clone());

        // History precedes anything typed while the conversation was opening.
        let local = std::mem::take(&mut self.messages);
        for message in normalize_all(&response.messages) {
            if self.position(&message.id).is_none() {
                self.messages.push(message);
            }
        }
        for mut message in local {
            if self.position(&message.id).is_some() {
                continue;
            }
            if message.conversation_id.is_none() {
                message.conversation_id = Some(conversation_id.clone());
            }
            self.messages.push(message);
        }

        self.prompts = response.prompts.unwrap_or_default();
        self.avatar_url = response.image_url;
        self.privacy_disclaimer = response.privacy_disclaimer;
        self.input_placeholder = self
            .language
            .pick(
                response.input_placeholder_de.as_deref(),
                response.input_placeholder_en.as_deref(),
            )
            .map(str::to_string);
        self.activity = ActivityState::Idle;

        info!(
            conversation_id = %conversation_id,
            messages = self.messages.len(),
            "Conversation ready"
        );

        if matches!(self.channel, ChannelStatus::Unsubscribed | ChannelStatus::Lost) {
            self.channel = ChannelStatus::Pending;
            effects.push(Effect::Subscribe {
                conversation_id: conversation_id.clone(),
            });
        }

        if let Some(text) = self.queued_send.take() {
            self.issue_send(effects, text);
        }
    }

    fn on_bootstrap_failed(
        &mut self,
        effects: &mut Vec<Effect>,
        generation: u64,
        conversation_id: Option<String>,
        error: &str,
    ) {
        if generation != self.generation || self.activity != ActivityState::Initializing {
            debug!(generation, "Dropping stale bootstrap failure");
            return;
        }
        if self.conversation_id.is_none() {
            self.conversation_id = conversation_id;
        }
        warn!(error = %error, "Conversation bootstrap failed");
        self.fail(effects, SessionErrorKind::InitializationFailure);
    }

    fn on_send_error(&mut self, effects: &mut Vec<Effect>, reason: &str) {
        warn!(reason = %reason, "Message was not delivered");
        if self.activity.is_reply_outstanding() {
            self.fail(effects, SessionErrorKind::SendFailure);
        }
    }

    fn on_channel(&mut self, effects: &mut Vec<Effect>, event: ChannelEvent) {
        if self.channel == ChannelStatus::Unsubscribed {
            debug!(?event, "Dropping channel event without a subscription");
            return;
        }

        let rejected = matches!(event, ChannelEvent::Rejected);
        match event {
            ChannelEvent::Connected => {
                debug!(conversation_id = ?self.conversation_id, "Subscription live");
                self.channel = ChannelStatus::Live;
            }
            ChannelEvent::Disconnected | ChannelEvent::Rejected => {
                warn!(
                    kind = %SessionErrorKind::StreamDisconnected,
                    rejected,
                    "Real-time channel unavailable"
                );
                self.channel = ChannelStatus::Lost;
                if rejected {
                    effects.push(Effect::Unsubscribe);
                }
                if self.activity.is_reply_outstanding() {
                    self.start_polling(effects);
                }
            }
            ChannelEvent::Message(record) => {
                self.apply_message(normalize(record), Source::Channel);
                self.settle_reply(effects);
            }
            ChannelEvent::Stream(fragment) => {
                self.apply_fragment(&fragment);
                self.settle_reply(effects);
            }
        }
    }

    fn start_bootstrap(&mut self, effects: &mut Vec<Effect>) {
        self.activity = ActivityState::Initializing;
        effects.push(Effect::Bootstrap {
            generation: self.generation,
            conversation_id: self.conversation_id.clone(),
        });
    }

    fn push_user_message(&mut self, text: &str) {
        let message = Message::user(text, self.conversation_id.clone());
        self.unconfirmed.push_back(message.id.clone());
        self.messages.push(message);
    }

    fn issue_send(&mut self, effects: &mut Vec<Effect>, text: String) {
        let Some(conversation_id) = self.conversation_id.clone() else {
            warn!("Cannot send without a conversation");
            return;
        };

        self.next_seq += 1;
        let seq = self.next_seq;
        self.pending_send = Some(seq);
        self.activity = ActivityState::AwaitingReply;

        match self.channel {
            ChannelStatus::Live => {}
            ChannelStatus::Pending => self.start_polling(effects),
            ChannelStatus::Unsubscribed | ChannelStatus::Lost => {
                self.channel = ChannelStatus::Pending;
                effects.push(Effect::Subscribe {
                    conversation_id: conversation_id.clone(),
                });
                self.start_polling(effects);
            }
        }

        info!(conversation_id = %conversation_id, seq, "Sending message");
        effects.push(Effect::SendMessage {
            generation: self.generation,
            seq,
            conversation_id,
            text,
        });
    }

    fn is_current_send(&self, generation: u64, seq: u64) -> bool {
        generation == self.generation && self.pending_send == Some(seq)
    }

    fn start_polling(&mut self, effects: &mut Vec<Effect>) {
        if self.polling.is_some() {
            return;
        }
        let Some(conversation_id) = self.conversation_id.clone() else {
            return;
        };
        self.next_poll_run += 1;
        self.polling = Some(self.next_poll_run);
        info!(conversation_id = %conversation_id, run = self.next_poll_run, "Starting polling fallback");
        effects.push(Effect::StartPolling {
            run: self.next_poll_run,
            conversation_id,
        });
    }

    fn stop_polling(&mut self, effects: &mut Vec<Effect>) {
        if self.polling.take().is_some() {
            effects.push(Effect::StopPolling);
        }
    }

    fn fail(&mut self, effects: &mut Vec<Effect>, kind: SessionErrorKind) {
        self.freeze_open_reply();
        self.stop_polling(effects);
        self.pending_send = None;
        self.activity = ActivityState::Errored;
        self.error = Some(kind);
        warn!(kind = %kind, "Session errored");
    }

    /// Flags and finalizes any assistant message still open after the last
    /// user message.
    fn freeze_open_reply(&mut self) {
        let start = self.reply_start();
        for message in &mut self.messages[start..] {
            if message.is_assistant() && !message.finalized {
                message.has_errors = true;
                message.finalized = true;
                self.assembler.close(&message.id);
            }
        }
    }

    fn apply_fragment(&mut self, fragment: &StreamFragment) {
        if let Some(index) = self.position(&fragment.message_id) {
            if self.messages[index].finalized {
                self.assembler.close(&fragment.message_id);
                debug!(message_id = %fragment.message_id, "Ignoring fragment for finalized message");
                return;
            }
            // Shown text is the prefix the stream continues from.
            let shown = &self.messages[index].content;
            if self.assembler.seed(&fragment.message_id, shown) {
                debug!(message_id = %fragment.message_id, "Continuing stream from shown content");
            }
        }

        let applied = self.assembler.apply(fragment);
        let finished = match applied.outcome {
            FragmentOutcome::Ignored => return,
            FragmentOutcome::Completed => true,
            FragmentOutcome::Started | FragmentOutcome::Appended => false,
        };

        match self.position(&applied.message_id) {
            Some(index) => {
                let message = &mut self.messages[index];
                message.content = applied.content;
                message.finalized = finished;
            }
            None => {
                let mut message = Message::streaming_assistant(
                    applied.message_id,
                    applied.content,
                    self.conversation_id.clone(),
                );
                message.finalized = finished;
                self.messages.push(message);
            }
        }
    }

    fn apply_message(&mut self, message: Message, source: Source) {
        if let Some(index) = self.position(&message.id) {
            if self.messages[index].finalized {
                debug!(message_id = %message.id, "Ignoring update for finalized message");
                return;
            }
            if source == Source::Poll
                && !message.finalized
                && self.assembler.is_in_flight(&message.id)
            {
                debug!(message_id = %message.id, "Channel is ahead of poll data");
                return;
            }
            if message.finalized {
                self.assembler.close(&message.id);
            }
            let slot = &mut self.messages[index];
            let created_at = message.created_at.or(slot.created_at);
            let conversation_id = message
                .conversation_id
                .clone()
                .or_else(|| slot.conversation_id.clone());
            *slot = Message {
                created_at,
                conversation_id,
                ..message
            };
            return;
        }

        if message.role == Role::User && self.adopt_echo(&message) {
            return;
        }

        if message.is_assistant() && message.finalized {
            self.assembler.close(&message.id);
        }
        self.messages.push(message);
    }

    /// Gives the oldest unconfirmed local user message with the same text the
    /// server's identifier.
    fn adopt_echo(&mut self, echo: &Message) -> bool {
        let messages = &self.messages;
        let Some(slot) = self.unconfirmed.iter().position(|local_id| {
            messages
                .iter()
                .any(|m| &m.id == local_id && m.content.trim() == echo.content.trim())
        }) else {
            return false;
        };
        let Some(local_id) = self.unconfirmed.remove(slot) else {
            return false;
        };

        if let Some(message) = self.messages.iter_mut().find(|m| m.id == local_id) {
            debug!(local_id = %local_id, server_id = %echo.id, "Confirmed user message");
            message.id = echo.id.clone();
            if echo.created_at.is_some() {
                message.created_at = echo.created_at;
            }
            if echo.conversation_id.is_some() {
                message.conversation_id = echo.conversation_id.clone();
            }
        }
        true
    }

    /// Moves between awaiting, streaming, idle and errored based on the
    /// assistant messages after the last user message.
    fn settle_reply(&mut self, effects: &mut Vec<Effect>) {
        if !self.activity.is_reply_outstanding() {
            return;
        }

        let start = self.reply_start();
        let replies: Vec<&Message> = self.messages[start..]
            .iter()
            .filter(|m| m.is_assistant() && !m.is_welcome)
            .collect();

        if replies.iter().any(|m| m.has_errors) {
            self.fail(effects, SessionErrorKind::SendFailure);
            return;
        }

        if let Some(done) = replies.iter().find(|m| m.finalized) {
            info!(message_id = %done.id, "Reply complete");
            self.activity = ActivityState::Idle;
            self.stop_polling(effects);
            return;
        }

        if let Some(open) = replies.first() {
            let streaming = ActivityState::StreamingReply {
                message_id: open.id.clone(),
            };
            if self.activity != streaming {
                self.activity = streaming;
            }
        }
    }

    fn reply_start(&self) -> usize {
        self.messages
            .iter()
            .rposition(|m| m.role == Role::User)
            .map(|index| index + 1)
            .unwrap_or(0)
    }

    fn position(&self, message_id: &str) -> Option<usize> {
        self.messages.iter().position(|m| m.id == message_id)
    }
}
