//! ActionCable channel transport over WebSocket
//!
//! This module implements [`CableConsumer`], which speaks the ActionCable
//! JSON protocol (`actioncable-v1-json`) over a single WebSocket connection
//! and multiplexes one logical subscription per conversation onto it.
//!
//! # Protocol
//!
//! Client commands carry a JSON-encoded identifier string:
//!
//! ```text
//! {"command":"subscribe","identifier":"{\"channel\":\"ChatbotChannel\",\"conversation_id\":\"c1\"}"}
//! ```
//!
//! Server frames are either control frames (`welcome`, `ping`,
//! `confirm_subscription`, `reject_subscription`, `disconnect`) or data
//! frames `{"identifier": "...", "message": {...}}`. Data payloads are routed
//! with [`super::route_payload`].
//!
//! # Connection sharing
//!
//! A [`CableHub`] keeps one consumer per WebSocket URL. The process-wide
//! hub is [`CableHub::global`]; tests build their own with
//! [`CableHub::new`]. The socket is dialled lazily on the first
//! `subscribe`. When it drops, every live subscription receives
//! [`ChannelEvent::Disconnected`]; the next `subscribe` dials a fresh socket
//! and re-sends subscribe commands for all registered conversations.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use url::Url;

use super::{route_payload, ChannelEvent, ChannelTransport, Subscription, SubscriptionRegistry};
use crate::error::{HermineError, Result};

/// WebSocket subprotocol negotiated with the ActionCable server.
pub const ACTIONCABLE_PROTOCOL: &str = "actioncable-v1-json";

/// Default mount path of the cable endpoint.
pub const DEFAULT_MOUNT_PATH: &str = "/cable";

/// Default server-side channel class.
pub const DEFAULT_CHANNEL: &str = "ChatbotChannel";

/// Settings shared by every consumer a hub creates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CableOptions {
    /// Path appended to the origin, e.g. `/cable`.
    pub mount_path: String,
    /// Channel class named in every subscription identifier.
    pub channel: String,
    /// Connection is considered dead after this long without any frame.
    /// ActionCable servers ping every three seconds.
    pub stale_after: Duration,
}

impl Default for CableOptions {
    fn default() -> Self {
        Self {
            mount_path: DEFAULT_MOUNT_PATH.to_string(),
            channel: DEFAULT_CHANNEL.to_string(),
            stale_after: Duration::from_secs(10),
        }
    }
}

/// Derives the cable WebSocket URL from an HTTP-style backend origin.
///
/// # Examples
///
/// ```rust
/// use hermine_session::channel::cable::cable_url;
///
/// let url = cable_url("https://app.hermine.ai", "/cable").unwrap();
/// assert_eq!(url.as_str(), "wss://app.hermine.ai/cable");
///
/// let url = cable_url("http://localhost:3000/", "cable").unwrap();
/// assert_eq!(url.as_str(), "ws://localhost:3000/cable");
/// ```
///
/// # Errors
///
/// Returns [`HermineError::Url`] for unparseable input and
/// [`HermineError::Config`] for schemes other than http(s)/ws(s).
pub fn cable_url(origin: &str, mount_path: &str) -> Result<Url> {
    let mut url = Url::parse(origin)?;

    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(HermineError::Config(format!(
                "unsupported origin scheme for cable connection: {}",
                other
            ))
            .into())
        }
    };
    url.set_scheme(scheme).map_err(|_| {
        HermineError::Config(format!("cannot switch {} to scheme {}", origin, scheme))
    })?;

    let base = url.path().trim_end_matches('/').to_string();
    url.set_path(&format!("{}/{}", base, mount_path.trim_start_matches('/')));
    url.set_query(None);
    url.set_fragment(None);

    Ok(url)
}

/// Subscription identifier, JSON-encoded into every command.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChannelIdentifier {
    channel: String,
    #[serde(deserialize_with = "crate::message::deserialize_id")]
    conversation_id: String,
}

impl ChannelIdentifier {
    fn encode(channel: &str, conversation_id: &str) -> String {
        // Serializing a struct of two strings cannot fail.
        serde_json::to_string(&ChannelIdentifier {
            channel: channel.to_string(),
            conversation_id: conversation_id.to_string(),
        })
        .unwrap_or_default()
    }

    fn conversation_of(identifier: &str) -> Option<String> {
        serde_json::from_str::<ChannelIdentifier>(identifier)
            .map(|id| id.conversation_id)
            .ok()
    }
}

#[derive(Debug, Serialize)]
struct CableCommand<'a> {
    command: &'a str,
    identifier: String,
}

/// Raw server frame before classification.
#[derive(Debug, Default, Deserialize)]
struct RawFrame {
    #[serde(rename = "type", default)]
    frame_type: Option<String>,
    #[serde(default)]
    identifier: Option<String>,
    #[serde(default)]
    message: Option<JsonValue>,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    reconnect: Option<bool>,
}

/// Classified server frame.
#[derive(Debug, PartialEq)]
enum CableFrame {
    Welcome,
    Ping,
    Confirm { conversation_id: String },
    Reject { conversation_id: String },
    Disconnect { reason: Option<String>, reconnect: bool },
    Data { conversation_id: String, payload: JsonValue },
    Unknown,
}

fn parse_frame(text: &str) -> Result<CableFrame> {
    let raw: RawFrame = serde_json::from_str(text)?;
    let conversation = || raw.identifier.as_deref().and_then(ChannelIdentifier::conversation_of);

    let frame = match raw.frame_type.as_deref() {
        Some("welcome") => CableFrame::Welcome,
        Some("ping") => CableFrame::Ping,
        Some("confirm_subscription") => match conversation() {
            Some(conversation_id) => CableFrame::Confirm { conversation_id },
            None => CableFrame::Unknown,
        },
        Some("reject_subscription") => match conversation() {
            Some(conversation_id) => CableFrame::Reject { conversation_id },
            None => CableFrame::Unknown,
        },
        Some("disconnect") => CableFrame::Disconnect {
            reason: raw.reason.clone(),
            reconnect: raw.reconnect.unwrap_or(false),
        },
        Some(_) => CableFrame::Unknown,
        None => match (conversation(), raw.message.clone()) {
            (Some(conversation_id), Some(payload)) => CableFrame::Data {
                conversation_id,
                payload,
            },
            _ => CableFrame::Unknown,
        },
    };

    Ok(frame)
}

#[derive(Debug)]
enum LinkCommand {
    Subscribe(String),
    Unsubscribe(String),
    Close,
}

/// One ActionCable connection and its conversation subscriptions.
///
/// Obtain consumers through [`CableHub::connect`].
#[derive(Debug)]
pub struct CableConsumer {
    url: Url,
    origin: String,
    options: CableOptions,
    registry: Arc<SubscriptionRegistry>,
    link: Mutex<Option<mpsc::UnboundedSender<LinkCommand>>>,
    self_ref: Weak<CableConsumer>,
}

impl CableConsumer {
    fn new(url: Url, origin: String, options: CableOptions) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            url,
            origin,
            options,
            registry: Arc::new(SubscriptionRegistry::default()),
            link: Mutex::new(None),
            self_ref: self_ref.clone(),
        })
    }

    /// WebSocket URL of this consumer.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Whether a connection task is currently alive.
    pub fn is_connected(&self) -> bool {
        self.lock_link()
            .as_ref()
            .map(|tx| !tx.is_closed())
            .unwrap_or(false)
    }

    /// Closes the socket. Live subscriptions receive `Disconnected`.
    pub fn disconnect(&self) {
        if let Some(tx) = self.lock_link().take() {
            let _ = tx.send(LinkCommand::Close);
        }
    }

    fn lock_link(&self) -> std::sync::MutexGuard<'_, Option<mpsc::UnboundedSender<LinkCommand>>> {
        self.link
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Returns the live connection's command sender, dialling if needed.
    fn ensure_link(&self) -> Result<(mpsc::UnboundedSender<LinkCommand>, bool)> {
        let mut link = self.lock_link();
        if let Some(tx) = link.as_ref() {
            if !tx.is_closed() {
                return Ok((tx.clone(), false));
            }
        }

        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            HermineError::Channel(format!("cable subscribe requires a Tokio runtime: {}", e))
        })?;

        let (tx, rx) = mpsc::unbounded_channel();
        let connection = Connection {
            url: self.url.clone(),
            origin: self.origin.clone(),
            options: self.options.clone(),
            registry: Arc::clone(&self.registry),
        };
        runtime.spawn(connection.run(rx));
        *link = Some(tx.clone());

        tracing::info!(url = %self.url, "Opening cable connection");
        Ok((tx, true))
    }

    fn release(&self, conversation_id: &str, token: u64) {
        if !self.registry.release(conversation_id, token) {
            return;
        }
        tracing::debug!(conversation_id = %conversation_id, "Releasing cable subscription");
        if let Some(tx) = self.lock_link().as_ref() {
            let _ = tx.send(LinkCommand::Unsubscribe(conversation_id.to_string()));
        }
    }
}

impl ChannelTransport for CableConsumer {
    fn subscribe(&self, conversation_id: &str) -> Result<Subscription> {
        let (token, events, _replaced) = self.registry.register(conversation_id);

        match self.ensure_link() {
            // A fresh connection subscribes every registered conversation
            // once the server welcomes it.
            Ok((_, true)) => {}
            Ok((tx, false)) => {
                let _ = tx.send(LinkCommand::Subscribe(conversation_id.to_string()));
            }
            Err(e) => {
                self.registry.release(conversation_id, token);
                return Err(e);
            }
        }

        let consumer = self.self_ref.clone();
        let id = conversation_id.to_string();
        Ok(Subscription::new(conversation_id, events, move || {
            if let Some(consumer) = consumer.upgrade() {
                consumer.release(&id, token);
            }
        }))
    }
}

impl Drop for CableConsumer {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// State owned by one running connection task.
struct Connection {
    url: Url,
    origin: String,
    options: CableOptions,
    registry: Arc<SubscriptionRegistry>,
}

enum FrameAction {
    Continue,
    Close,
}

impl Connection {
    async fn run(self, mut commands: mpsc::UnboundedReceiver<LinkCommand>) {
        match self.drive(&mut commands).await {
            Ok(()) => tracing::info!(url = %self.url, "Cable connection closed"),
            Err(e) => tracing::warn!(url = %self.url, error = %e, "Cable connection lost"),
        }

        // Refuse further commands before announcing the drop, so a racing
        // subscribe dials a new connection instead of queueing here.
        commands.close();
        self.registry.broadcast(ChannelEvent::Disconnected);
    }

    async fn drive(&self, commands: &mut mpsc::UnboundedReceiver<LinkCommand>) -> Result<()> {
        let mut request = self.url.as_str().into_client_request()?;
        request.headers_mut().insert(
            "Sec-WebSocket-Protocol",
            HeaderValue::from_static(ACTIONCABLE_PROTOCOL),
        );
        if let Ok(origin) = HeaderValue::from_str(&self.origin) {
            request.headers_mut().insert("Origin", origin);
        }

        let (socket, _response) = tokio_tungstenite::connect_async(request).await?;
        let (mut sink, mut stream) = socket.split();

        let mut welcomed = false;
        let mut subscribed: HashSet<String> = HashSet::new();
        let stale = tokio::time::sleep(self.options.stale_after);
        tokio::pin!(stale);

        loop {
            tokio::select! {
                command = commands.recv() => {
                    let frames = match command {
                        Some(LinkCommand::Subscribe(id)) if welcomed => {
                            let mut frames = Vec::new();
                            if subscribed.contains(&id) {
                                frames.push(self.command("unsubscribe", &id));
                            }
                            frames.push(self.command("subscribe", &id));
                            subscribed.insert(id);
                            frames
                        }
                        // Subscribed in bulk once the welcome frame arrives.
                        Some(LinkCommand::Subscribe(_)) => Vec::new(),
                        Some(LinkCommand::Unsubscribe(id)) => {
                            if subscribed.remove(&id) {
                                vec![self.command("unsubscribe", &id)]
                            } else {
                                Vec::new()
                            }
                        }
                        Some(LinkCommand::Close) | None => {
                            let _ = sink.close().await;
                            return Ok(());
                        }
                    };
                    for frame in frames {
                        sink.send(WsMessage::Text(frame)).await?;
                    }
                }
                incoming = stream.next() => {
                    stale.as_mut().reset(tokio::time::Instant::now() + self.options.stale_after);
                    match incoming {
                        Some(Ok(WsMessage::Text(text))) => {
                            let (action, frames) = self.handle_text(&text, &mut welcomed, &mut subscribed);
                            for frame in frames {
                                sink.send(WsMessage::Text(frame)).await?;
                            }
                            if let FrameAction::Close = action {
                                let _ = sink.close().await;
                                return Ok(());
                            }
                        }
                        Some(Ok(WsMessage::Close(frame))) => {
                            tracing::debug!(?frame, "Server closed cable connection");
                            return Ok(());
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(e.into()),
                        None => return Ok(()),
                    }
                }
                _ = &mut stale => {
                    return Err(HermineError::Channel(format!(
                        "no frames for {:?}, connection considered stale",
                        self.options.stale_after
                    ))
                    .into());
                }
            }
        }
    }

    /// Applies one text frame; returns follow-up frames to send.
    fn handle_text(
        &self,
        text: &str,
        welcomed: &mut bool,
        subscribed: &mut HashSet<String>,
    ) -> (FrameAction, Vec<String>) {
        let frame = match parse_frame(text) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping undecodable cable frame");
                return (FrameAction::Continue, Vec::new());
            }
        };

        match frame {
            CableFrame::Welcome => {
                *welcomed = true;
                let frames = self
                    .registry
                    .conversation_ids()
                    .into_iter()
                    .filter(|id| subscribed.insert(id.clone()))
                    .map(|id| self.command("subscribe", &id))
                    .collect();
                (FrameAction::Continue, frames)
            }
            CableFrame::Ping => (FrameAction::Continue, Vec::new()),
            CableFrame::Confirm { conversation_id } => {
                tracing::debug!(conversation_id = %conversation_id, "Subscription confirmed");
                self.registry
                    .dispatch(&conversation_id, ChannelEvent::Connected);
                (FrameAction::Continue, Vec::new())
            }
            CableFrame::Reject { conversation_id } => {
                tracing::warn!(conversation_id = %conversation_id, "Subscription rejected");
                subscribed.remove(&conversation_id);
                self.registry
                    .dispatch(&conversation_id, ChannelEvent::Rejected);
                (FrameAction::Continue, Vec::new())
            }
            CableFrame::Disconnect { reason, reconnect } => {
                tracing::info!(?reason, reconnect, "Server requested disconnect");
                (FrameAction::Close, Vec::new())
            }
            CableFrame::Data {
                conversation_id,
                payload,
            } => {
                if let Some(event) = route_payload(payload) {
                    self.registry.dispatch(&conversation_id, event);
                }
                (FrameAction::Continue, Vec::new())
            }
            CableFrame::Unknown => {
                tracing::debug!(frame = %text, "Ignoring unrecognised cable frame");
                (FrameAction::Continue, Vec::new())
            }
        }
    }

    fn command(&self, command: &str, conversation_id: &str) -> String {
        let identifier = ChannelIdentifier::encode(&self.options.channel, conversation_id);
        serde_json::to_string(&CableCommand {
            command,
            identifier,
        })
        .unwrap_or_default()
    }
}

/// Registry of shared cable consumers, one per WebSocket URL.
#[derive(Debug)]
pub struct CableHub {
    options: CableOptions,
    consumers: Mutex<HashMap<String, Arc<CableConsumer>>>,
}

static GLOBAL_HUB: OnceLock<CableHub> = OnceLock::new();

impl CableHub {
    /// Creates an empty hub.
    pub fn new(options: CableOptions) -> Self {
        Self {
            options,
            consumers: Mutex::new(HashMap::new()),
        }
    }

    /// Process-wide hub with default options, created on first use.
    pub fn global() -> &'static CableHub {
        GLOBAL_HUB.get_or_init(|| CableHub::new(CableOptions::default()))
    }

    /// Options applied to consumers created by this hub.
    pub fn options(&self) -> &CableOptions {
        &self.options
    }

    /// Returns the consumer for `origin`, creating it if needed.
    ///
    /// No network I/O happens here; the socket is dialled on the first
    /// subscription.
    ///
    /// # Errors
    ///
    /// Returns an error only for an unusable origin URL.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # tokio_test::block_on(async {
    /// use hermine_session::channel::cable::{CableHub, CableOptions};
    /// use hermine_session::channel::{ChannelEvent, ChannelTransport};
    ///
    /// let hub = CableHub::new(CableOptions::default());
    /// let consumer = hub.connect("https://app.hermine.ai")?;
    /// assert_eq!(consumer.url().as_str(), "wss://app.hermine.ai/cable");
    ///
    /// let mut subscription = consumer.subscribe("42")?;
    /// while let Some(event) = subscription.recv().await {
    ///     if let ChannelEvent::Stream(fragment) = event {
    ///         print!("{}", fragment.content);
    ///     }
    /// }
    /// # Ok::<(), anyhow::Error>(())
    /// # }).unwrap();
    /// ```
    pub fn connect(&self, origin: &str) -> Result<Arc<CableConsumer>> {
        let url = cable_url(origin, &self.options.mount_path)?;
        let http_origin = Url::parse(origin)?.origin().ascii_serialization();

        let mut consumers = self.lock();
        let consumer = consumers
            .entry(url.as_str().to_string())
            .or_insert_with(|| CableConsumer::new(url, http_origin, self.options.clone()));
        Ok(Arc::clone(consumer))
    }

    /// Closes and forgets every consumer.
    pub fn disconnect_all(&self) {
        let drained: Vec<_> = self.lock().drain().map(|(_, consumer)| consumer).collect();
        for consumer in drained {
            consumer.disconnect();
        }
    }

    /// Number of consumers currently held.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the hub holds no consumers.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<CableConsumer>>> {
        self.consumers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cable_url_upgrades_schemes() {
        assert_eq!(
            cable_url("http://localhost:3000", "/cable").unwrap().as_str(),
            "ws://localhost:3000/cable"
        );
        assert_eq!(
            cable_url("https://hermine.ai/", "/cable").unwrap().as_str(),
            "wss://hermine.ai/cable"
        );
        assert_eq!(
            cable_url("wss://hermine.ai", "/cable").unwrap().as_str(),
            "wss://hermine.ai/cable"
        );
    }

    #[test]
    fn test_cable_url_keeps_base_path() {
        assert_eq!(
            cable_url("https://example.com/widget/", "/cable")
                .unwrap()
                .as_str(),
            "wss://example.com/widget/cable"
        );
    }

    #[test]
    fn test_cable_url_rejects_other_schemes() {
        assert!(cable_url("ftp://example.com", "/cable").is_err());
        assert!(cable_url("not a url", "/cable").is_err());
    }

    #[test]
    fn test_identifier_round_trip() {
        let encoded = ChannelIdentifier::encode("ChatbotChannel", "c1");
        assert_eq!(
            encoded,
            r#"{"channel":"ChatbotChannel","conversation_id":"c1"}"#
        );
        assert_eq!(
            ChannelIdentifier::conversation_of(&encoded).as_deref(),
            Some("c1")
        );
    }

    #[test]
    fn test_identifier_with_numeric_conversation_id() {
        let identifier = r#"{"channel":"ChatbotChannel","conversation_id":99}"#;
        assert_eq!(
            ChannelIdentifier::conversation_of(identifier).as_deref(),
            Some("99")
        );
    }

    #[test]
    fn test_parse_control_frames() {
        assert_eq!(parse_frame(r#"{"type":"welcome"}"#).unwrap(), CableFrame::Welcome);
        assert_eq!(
            parse_frame(r#"{"type":"ping","message":1700000000}"#).unwrap(),
            CableFrame::Ping
        );
        assert_eq!(
            parse_frame(
                r#"{"type":"disconnect","reason":"server_restart","reconnect":true}"#
            )
            .unwrap(),
            CableFrame::Disconnect {
                reason: Some("server_restart".to_string()),
                reconnect: true
            }
        );
    }

    #[test]
    fn test_parse_subscription_frames() {
        let identifier = ChannelIdentifier::encode("ChatbotChannel", "c7");
        let confirm = serde_json::json!({"type": "confirm_subscription", "identifier": identifier});
        assert_eq!(
            parse_frame(&confirm.to_string()).unwrap(),
            CableFrame::Confirm {
                conversation_id: "c7".to_string()
            }
        );
        let reject = serde_json::json!({"type": "reject_subscription", "identifier": identifier});
        assert_eq!(
            parse_frame(&reject.to_string()).unwrap(),
            CableFrame::Reject {
                conversation_id: "c7".to_string()
            }
        );
    }

    #[test]
    fn test_parse_data_frame() {
        let identifier = ChannelIdentifier::encode("ChatbotChannel", "c1");
        let data = serde_json::json!({
            "identifier": identifier,
            "message": {"type": "stream", "message_id": "m1", "content": "Hi", "finished": false}
        });
        match parse_frame(&data.to_string()).unwrap() {
            CableFrame::Data {
                conversation_id,
                payload,
            } => {
                assert_eq!(conversation_id, "c1");
                assert_eq!(payload["content"], "Hi");
            }
            other => panic!("expected data frame, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_rejects_non_json() {
        assert!(parse_frame("not json").is_err());
    }

    #[test]
    fn test_hub_connect_is_idempotent_per_origin() {
        let hub = CableHub::new(CableOptions::default());
        let a = hub.connect("https://app.hermine.ai").unwrap();
        let b = hub.connect("https://app.hermine.ai/").unwrap();
        let c = hub.connect("http://localhost:3000").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(hub.len(), 2);
        assert_eq!(a.url().as_str(), "wss://app.hermine.ai/cable");
        assert!(!a.is_connected());

        hub.disconnect_all();
        assert!(hub.is_empty());
    }

    #[test]
    fn test_subscribe_outside_runtime_fails_cleanly() {
        let hub = CableHub::new(CableOptions::default());
        let consumer = hub.connect("http://127.0.0.1:9").unwrap();
        assert!(consumer.subscribe("c1").is_err());
        assert!(!consumer.registry.contains("c1"));
    }

    #[tokio::test]
    async fn test_unreachable_origin_reports_disconnected() {
        let hub = CableHub::new(CableOptions::default());
        // Port 9 (discard) is closed on test machines; dialling fails fast.
        let consumer = hub.connect("http://127.0.0.1:9").unwrap();
        let mut subscription = consumer.subscribe("c1").unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), subscription.recv())
            .await
            .expect("timed out waiting for disconnect");
        assert_eq!(event, Some(ChannelEvent::Disconnected));
    }
}
