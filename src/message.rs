//! Conversation message model and wire-record normalization.
//!
//! The backend speaks its own vocabulary (`message_type: "ai"`, `result`,
//! `is_welcome_message`); the rest of the crate only sees [`Message`].
//! [`normalize`] and [`normalize_value`] are the single translation boundary
//! between the two.
//!
//! # Example
//!
//! ```rust
//! use hermine_session::message::{normalize_value, Role};
//!
//! let record = serde_json::json!({
//!     "id": 17,
//!     "message_type": "ai",
//!     "result": "Hallo!",
//!     "conversation_id": "c1",
//!     "is_welcome_message": true,
//!     "created_at": "2025-03-01T10:00:00Z"
//! });
//!
//! let message = normalize_value(&record).unwrap();
//! assert_eq!(message.id, "17");
//! assert_eq!(message.role, Role::Assistant);
//! assert!(message.is_welcome);
//! assert!(message.created_at.is_some());
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{HermineError, Result};

/// Author of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The person typing into the widget.
    User,
    /// The remote AI agent.
    Assistant,
}

/// An entry in the conversation log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Identifier, unique within a conversation.
    pub id: String,

    /// Author of the message.
    pub role: Role,

    /// Message text. Grows while the message is streaming.
    pub content: String,

    /// Creation instant, when the backend supplied a parseable one.
    pub created_at: Option<DateTime<Utc>>,

    /// Conversation the message belongs to.
    pub conversation_id: Option<String>,

    /// Set when the backend flagged the reply or the reply failed mid-way.
    pub has_errors: bool,

    /// System-seeded greeting.
    pub is_welcome: bool,

    /// Whether the message reached its terminal state.
    pub finalized: bool,
}

impl Message {
    /// Creates a terminal user message with a locally generated identifier.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use hermine_session::message::{Message, Role};
    ///
    /// let message = Message::user("hello", Some("c1".to_string()));
    /// assert_eq!(message.role, Role::User);
    /// assert!(message.finalized);
    /// ```
    pub fn user(content: impl Into<String>, conversation_id: Option<String>) -> Self {
        Self {
            id: format!("local-{}", uuid::Uuid::new_v4()),
            role: Role::User,
            content: content.into(),
            created_at: Some(Utc::now()),
            conversation_id,
            has_errors: false,
            is_welcome: false,
            finalized: true,
        }
    }

    /// Creates an open assistant message announced by a first stream fragment.
    pub fn streaming_assistant(
        id: impl Into<String>,
        content: impl Into<String>,
        conversation_id: Option<String>,
    ) -> Self {
        Self {
            id: id.into(),
            role: Role::Assistant,
            content: content.into(),
            created_at: Some(Utc::now()),
            conversation_id,
            has_errors: false,
            is_welcome: false,
            finalized: false,
        }
    }

    /// Returns true for assistant messages.
    pub fn is_assistant(&self) -> bool {
        self.role == Role::Assistant
    }

    /// Whether the widget may offer a feedback/rating affordance.
    ///
    /// Only finalized assistant replies that are neither greetings nor
    /// error-flagged, and that belong to a known conversation, qualify.
    pub fn feedback_eligible(&self) -> bool {
        self.is_assistant()
            && self.finalized
            && !self.has_errors
            && !self.is_welcome
            && self.conversation_id.is_some()
    }
}

/// Full message record as delivered by the backend.
///
/// Used both by the real-time channel and by the conversation fetch endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiMessage {
    /// Message identifier. Accepts JSON strings and integers.
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,

    /// `"ai"` for agent replies, `"user"` otherwise.
    pub message_type: String,

    /// Message body.
    pub result: String,

    /// Owning conversation.
    #[serde(default, deserialize_with = "deserialize_optional_id")]
    pub conversation_id: Option<String>,

    /// Greeting flag.
    #[serde(default)]
    pub is_welcome_message: Option<bool>,

    /// Error flag.
    #[serde(default)]
    pub has_errors: Option<bool>,

    /// Creation timestamp (RFC 3339).
    #[serde(default)]
    pub created_at: Option<String>,

    /// Last update timestamp (RFC 3339).
    #[serde(default)]
    pub updated_at: Option<String>,

    /// `false` while the backend is still producing the reply.
    #[serde(default)]
    pub is_finished: Option<bool>,
}

/// Incremental piece of an assistant reply.
///
/// On the wire this arrives as `{"type": "stream", "message_id", "content",
/// "finished"}`; the `type` discriminant is consumed by the channel router.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamFragment {
    /// Target assistant message.
    #[serde(deserialize_with = "deserialize_id")]
    pub message_id: String,

    /// Text delta to append.
    #[serde(default)]
    pub content: String,

    /// Terminal marker.
    #[serde(default)]
    pub finished: bool,
}

impl StreamFragment {
    /// Convenience constructor used by tests and fakes.
    pub fn new(message_id: impl Into<String>, content: impl Into<String>, finished: bool) -> Self {
        Self {
            message_id: message_id.into(),
            content: content.into(),
            finished,
        }
    }
}

/// Maps a decoded wire record into a [`Message`].
///
/// Never fails: unknown role tags map to [`Role::User`] and unparseable
/// timestamps are left absent.
pub fn normalize(record: ApiMessage) -> Message {
    let role = if record.message_type == "ai" {
        Role::Assistant
    } else {
        Role::User
    };

    let created_at = record.created_at.as_deref().and_then(parse_timestamp);

    Message {
        id: record.id,
        role,
        content: record.result,
        created_at,
        conversation_id: record.conversation_id,
        has_errors: record.has_errors.unwrap_or(false),
        is_welcome: record.is_welcome_message.unwrap_or(false),
        finalized: record.is_finished.unwrap_or(true),
    }
}

/// Decodes and normalizes a raw JSON record.
///
/// # Errors
///
/// Returns [`HermineError::MalformedMessage`] if the value is not an object
/// carrying at least an identifier, a role tag and a body.
pub fn normalize_value(value: &JsonValue) -> Result<Message> {
    if !value.is_object() {
        return Err(HermineError::MalformedMessage(format!(
            "expected an object, got {}",
            json_kind(value)
        ))
        .into());
    }

    let record: ApiMessage = serde_json::from_value(value.clone())
        .map_err(|e| HermineError::MalformedMessage(e.to_string()))?;

    Ok(normalize(record))
}

/// Normalizes a batch of raw records, dropping the malformed ones.
pub fn normalize_all(values: &[JsonValue]) -> Vec<Message> {
    values
        .iter()
        .filter_map(|value| match normalize_value(value) {
            Ok(message) => Some(message),
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed message record");
                None
            }
        })
        .collect()
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    match DateTime::parse_from_rfc3339(raw) {
        Ok(ts) => Some(ts.with_timezone(&Utc)),
        Err(e) => {
            tracing::debug!(raw = %raw, error = %e, "Ignoring unparseable timestamp");
            None
        }
    }
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "bool",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

/// Accepts identifiers encoded as strings or integers.
pub(crate) fn deserialize_id<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match JsonValue::deserialize(deserializer)? {
        JsonValue::String(s) => Ok(s),
        JsonValue::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "identifier must be a string or number, got {}",
            json_kind(&other)
        ))),
    }
}

fn deserialize_optional_id<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<JsonValue>::deserialize(deserializer)? {
        None | Some(JsonValue::Null) => Ok(None),
        Some(JsonValue::String(s)) => Ok(Some(s)),
        Some(JsonValue::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "identifier must be a string or number, got {}",
            json_kind(&other)
        ))),
    }
}
