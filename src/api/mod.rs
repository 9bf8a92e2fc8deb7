//! Widget backend API abstraction
//!
//! The session talks to the backend through the [`ConversationApi`] trait:
//! create a conversation, fetch its state (bootstrap and polling), send a
//! user message, and fetch the agent theme.
//!
//! - [`http::HttpBackend`]: `reqwest` client for the real backend.
//! - `fake::FakeConversationApi`: scripted in-process fake (cfg(test)
//!   only).
//!
//! All endpoints live under
//! `{endpoint}/api/widget/{account_id}/{agent_slug}`.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::Result;

pub mod http;

#[cfg(test)]
pub mod fake;

/// Response of the create-conversation endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateConversationResponse {
    /// Backend-assigned conversation identifier.
    #[serde(deserialize_with = "crate::message::deserialize_id")]
    pub conversation_id: String,
}

/// Conversation state returned by the fetch endpoint.
///
/// Messages are kept as raw JSON so that one malformed record does not fail
/// the whole response; callers normalize them with
/// [`crate::message::normalize_all`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationResponse {
    /// Conversation identifier.
    #[serde(default, deserialize_with = "deserialize_optional_string_id")]
    pub id: Option<String>,

    /// Message records, oldest first.
    #[serde(default)]
    pub messages: Vec<JsonValue>,

    /// Suggested starter prompts.
    #[serde(default)]
    pub prompts: Option<Vec<String>>,

    /// Avatar / agent image reference.
    #[serde(default)]
    pub image_url: Option<String>,

    /// German input placeholder.
    #[serde(default)]
    pub input_placeholder_de: Option<String>,

    /// English input placeholder.
    #[serde(default)]
    pub input_placeholder_en: Option<String>,

    /// Privacy / disclaimer text shown under the input.
    #[serde(default)]
    pub privacy_disclaimer: Option<String>,
}

/// Body of the send-message endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendMessageRequest {
    /// Target conversation.
    pub conversation_id: String,
    /// Tenant account.
    pub account_id: String,
    /// Agent slug.
    pub agent_slug: String,
    /// User text.
    pub message: String,
}

/// Outcome reported by the send-message endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SendStatus {
    /// Message accepted; the reply will follow on the channel.
    Ok,
    /// Backend refused the message.
    Error,
}

/// Response of the send-message endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendMessageResponse {
    /// Acceptance status.
    pub status: SendStatus,
    /// Optional backend explanation.
    #[serde(default)]
    pub message: Option<String>,
}

impl SendMessageResponse {
    /// An accepted send.
    pub fn ok() -> Self {
        Self {
            status: SendStatus::Ok,
            message: None,
        }
    }

    /// Whether the backend accepted the message.
    pub fn is_ok(&self) -> bool {
        self.status == SendStatus::Ok
    }
}

/// Agent branding.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThemeResponse {
    /// Assistant avatar.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_icon: Option<String>,
    /// Header logo.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logo: Option<String>,
    /// Compact logo for the floating button.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logo_small: Option<String>,
    /// Primary colour, light shade.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_500: Option<String>,
    /// Primary colour, dark shade.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_900: Option<String>,
    /// Agent display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Abstraction over the widget backend.
///
/// Used polymorphically through `Arc<dyn ConversationApi>`; every call is
/// scoped to the account and agent the implementation was built for.
#[async_trait::async_trait]
pub trait ConversationApi: Send + Sync + std::fmt::Debug {
    /// Creates a conversation and returns its identifier.
    async fn create_conversation(&self) -> Result<String>;

    /// Fetches a conversation's history and presentation metadata.
    async fn fetch_conversation(&self, conversation_id: &str) -> Result<ConversationResponse>;

    /// Submits a user message.
    ///
    /// # Errors
    ///
    /// Transport and status failures are errors. A backend refusal with a
    /// 2xx status comes back as `Ok` with [`SendStatus::Error`].
    async fn send_message(&self, conversation_id: &str, text: &str) -> Result<SendMessageResponse>;

    /// Fetches the agent theme.
    async fn fetch_theme(&self) -> Result<ThemeResponse>;
}

fn deserialize_optional_string_id<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match Option::<JsonValue>::deserialize(deserializer)? {
        None | Some(JsonValue::Null) => Ok(None),
        Some(JsonValue::String(s)) => Ok(Some(s)),
        Some(JsonValue::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "unexpected conversation id: {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_conversation_response_camel_case_fields() {
        let response: ConversationResponse = serde_json::from_value(json!({
            "id": 12,
            "messages": [],
            "prompts": ["Was kostet das?"],
            "imageUrl": "https://cdn.example/avatar.png",
            "inputPlaceholderDe": "Frage stellen",
            "inputPlaceholderEn": "Ask a question",
            "privacyDisclaimer": "Antworten können fehlerhaft sein."
        }))
        .unwrap();

        assert_eq!(response.id.as_deref(), Some("12"));
        assert_eq!(response.prompts.unwrap(), vec!["Was kostet das?"]);
        assert_eq!(
            response.image_url.as_deref(),
            Some("https://cdn.example/avatar.png")
        );
        assert_eq!(response.input_placeholder_en.as_deref(), Some("Ask a question"));
        assert!(response.privacy_disclaimer.is_some());
    }

    #[test]
    fn test_conversation_response_tolerates_missing_fields() {
        let response: ConversationResponse = serde_json::from_value(json!({})).unwrap();
        assert!(response.id.is_none());
        assert!(response.messages.is_empty());
        assert!(response.prompts.is_none());
    }

    #[test]
    fn test_send_request_serialization() {
        let request = SendMessageRequest {
            conversation_id: "c1".to_string(),
            account_id: "acme".to_string(),
            agent_slug: "support".to_string(),
            message: "hello".to_string(),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            json!({
                "conversation_id": "c1",
                "account_id": "acme",
                "agent_slug": "support",
                "message": "hello"
            })
        );
    }

    #[test]
    fn test_send_response_status() {
        let ok: SendMessageResponse = serde_json::from_str(r#"{"status":"ok"}"#).unwrap();
        assert!(ok.is_ok());
        let refused: SendMessageResponse =
            serde_json::from_str(r#"{"status":"error","message":"quota"}"#).unwrap();
        assert!(!refused.is_ok());
        assert_eq!(refused.message.as_deref(), Some("quota"));
    }

    #[test]
    fn test_create_response_accepts_numeric_id() {
        let created: CreateConversationResponse =
            serde_json::from_str(r#"{"conversation_id": 501}"#).unwrap();
        assert_eq!(created.conversation_id, "501");
    }
}
