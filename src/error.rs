//! Error types for the Hermine session manager
//!
//! This module defines the crate-wide error enum, using `thiserror` for
//! ergonomic error handling, and the session failure taxonomy that the
//! widget shell renders as an error banner.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for Hermine operations
///
/// This enum covers configuration loading, backend request failures,
/// real-time channel failures, wire decoding, and session-level failures.
#[derive(Error, Debug)]
pub enum HermineError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Backend API returned a non-success status
    #[error("API error ({status}): {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Response body or backend-provided message
        message: String,
    },

    /// Real-time channel errors (dial, framing, closed connection)
    #[error("Channel error: {0}")]
    Channel(String),

    /// Inbound record could not be mapped to a message
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// A session-level failure surfaced to the user
    #[error("Session error ({kind}): {message}")]
    Session {
        /// Failure class
        kind: SessionErrorKind,
        /// Diagnostic detail (not shown to the user)
        message: String,
    },

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// URL parsing errors
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// WebSocket protocol errors
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Failure classes of a conversation session.
///
/// Only [`SessionErrorKind::InitializationFailure`],
/// [`SessionErrorKind::SendFailure`] and [`SessionErrorKind::PollTimeout`]
/// ever put the session into the errored state. The other two are handled
/// internally: disconnects fall back to polling and malformed frames are
/// logged and dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionErrorKind {
    /// Creating or fetching the conversation failed
    InitializationFailure,
    /// Submitting a message failed or the backend flagged the reply
    SendFailure,
    /// The real-time channel dropped while a reply was outstanding
    StreamDisconnected,
    /// Polling exhausted its attempt cap without seeing the reply complete
    PollTimeout,
    /// An inbound record could not be mapped
    MalformedMessage,
}

impl SessionErrorKind {
    /// Whether this failure class is shown to the user.
    pub fn is_user_visible(self) -> bool {
        matches!(
            self,
            Self::InitializationFailure | Self::SendFailure | Self::PollTimeout
        )
    }
}

impl std::fmt::Display for SessionErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::InitializationFailure => "initialization failure",
            Self::SendFailure => "send failure",
            Self::StreamDisconnected => "stream disconnected",
            Self::PollTimeout => "poll timeout",
            Self::MalformedMessage => "malformed message",
        };
        f.write_str(name)
    }
}

/// Result type alias for Hermine operations
///
/// Uses `anyhow::Error` so callers can attach context while still being able
/// to downcast to [`HermineError`].
pub type Result<T> = anyhow::Result<T>;
