//! Scripted in-process backend for session tests.
//!
//! Replies are queued per endpoint; once a queue is empty the fake falls
//! back to a default (the configured history for fetches, `ok` for sends).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value as JsonValue;

use super::{ConversationApi, ConversationResponse, SendMessageResponse, SendStatus, ThemeResponse};
use crate::error::{HermineError, Result};

type Scripted<T> = std::result::Result<T, u16>;

#[derive(Debug)]
struct FakeApiState {
    conversation_id: Mutex<String>,
    fail_create: AtomicBool,
    history: Mutex<ConversationResponse>,
    fetch_replies: Mutex<VecDeque<Scripted<ConversationResponse>>>,
    send_replies: Mutex<VecDeque<Scripted<SendMessageResponse>>>,
    sent: Mutex<Vec<(String, String)>>,
    creates: AtomicUsize,
    fetches: AtomicUsize,
    latency: Mutex<Option<Duration>>,
}

/// Fake [`ConversationApi`]. Clones share state.
#[derive(Debug, Clone)]
pub struct FakeConversationApi {
    state: Arc<FakeApiState>,
}

impl Default for FakeConversationApi {
    fn default() -> Self {
        Self::new("c1")
    }
}

impl FakeConversationApi {
    /// Creates a fake that hands out `conversation_id` with empty history.
    pub fn new(conversation_id: &str) -> Self {
        Self {
            state: Arc::new(FakeApiState {
                conversation_id: Mutex::new(conversation_id.to_string()),
                fail_create: AtomicBool::new(false),
                history: Mutex::new(ConversationResponse {
                    id: Some(conversation_id.to_string()),
                    ..ConversationResponse::default()
                }),
                fetch_replies: Mutex::new(VecDeque::new()),
                send_replies: Mutex::new(VecDeque::new()),
                sent: Mutex::new(Vec::new()),
                creates: AtomicUsize::new(0),
                fetches: AtomicUsize::new(0),
                latency: Mutex::new(None),
            }),
        }
    }

    /// Sets the default fetch response.
    pub fn set_history(&self, response: ConversationResponse) {
        *self.state.history.lock().unwrap() = response;
    }

    /// Sets the default fetch response from raw message records.
    pub fn set_messages(&self, messages: Vec<JsonValue>) {
        self.state.history.lock().unwrap().messages = messages;
    }

    /// Changes the id handed out by the next create.
    pub fn set_conversation_id(&self, conversation_id: &str) {
        *self.state.conversation_id.lock().unwrap() = conversation_id.to_string();
    }

    /// Queues one fetch response.
    pub fn push_fetch(&self, response: ConversationResponse) {
        self.state.fetch_replies.lock().unwrap().push_back(Ok(response));
    }

    /// Queues one failing fetch with the given HTTP status.
    pub fn push_fetch_error(&self, status: u16) {
        self.state.fetch_replies.lock().unwrap().push_back(Err(status));
    }

    /// Queues one send response.
    pub fn push_send(&self, response: SendMessageResponse) {
        self.state.send_replies.lock().unwrap().push_back(Ok(response));
    }

    /// Queues one failing send with the given HTTP status.
    pub fn push_send_error(&self, status: u16) {
        self.state.send_replies.lock().unwrap().push_back(Err(status));
    }

    /// Queues one refused send (`{"status": "error"}`).
    pub fn push_send_refused(&self) {
        self.push_send(SendMessageResponse {
            status: SendStatus::Error,
            message: Some("refused".to_string()),
        });
    }

    /// Makes create calls fail while set.
    pub fn fail_create(&self, fail: bool) {
        self.state.fail_create.store(fail, Ordering::SeqCst);
    }

    /// Delays every reply by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *self.state.latency.lock().unwrap() = Some(latency);
    }

    /// `(conversation_id, text)` of every send, in call order.
    pub fn sent_messages(&self) -> Vec<(String, String)> {
        self.state.sent.lock().unwrap().clone()
    }

    /// Number of create calls.
    pub fn create_calls(&self) -> usize {
        self.state.creates.load(Ordering::SeqCst)
    }

    /// Number of fetch calls.
    pub fn fetch_calls(&self) -> usize {
        self.state.fetches.load(Ordering::SeqCst)
    }

    async fn delay(&self) {
        let latency = *self.state.latency.lock().unwrap();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn api_error(status: u16) -> anyhow::Error {
        HermineError::Api {
            status,
            message: "scripted failure".to_string(),
        }
        .into()
    }
}

#[async_trait::async_trait]
impl ConversationApi for FakeConversationApi {
    async fn create_conversation(&self) -> Result<String> {
        self.state.creates.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        if self.state.fail_create.load(Ordering::SeqCst) {
            return Err(Self::api_error(500));
        }
        Ok(self.state.conversation_id.lock().unwrap().clone())
    }

    async fn fetch_conversation(&self, _conversation_id: &str) -> Result<ConversationResponse> {
        self.state.fetches.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        let scripted = self.state.fetch_replies.lock().unwrap().pop_front();
        match scripted {
            Some(Ok(response)) => Ok(response),
            Some(Err(status)) => Err(Self::api_error(status)),
            None => Ok(self.state.history.lock().unwrap().clone()),
        }
    }

    async fn send_message(&self, conversation_id: &str, text: &str) -> Result<SendMessageResponse> {
        self.state
            .sent
            .lock()
            .unwrap()
            .push((conversation_id.to_string(), text.to_string()));
        self.delay().await;
        let scripted = self.state.send_replies.lock().unwrap().pop_front();
        match scripted {
            Some(Ok(response)) => Ok(response),
            Some(Err(status)) => Err(Self::api_error(status)),
            None => Ok(SendMessageResponse::ok()),
        }
    }

    async fn fetch_theme(&self) -> Result<ThemeResponse> {
        self.delay().await;
        Ok(ThemeResponse {
            name: Some("Fake Agent".to_string()),
            ..ThemeResponse::default()
        })
    }
}
