//! HTTP client for the widget backend.
//!
//! # Example
//!
//! ```rust,no_run
//! use hermine_session::api::http::HttpBackend;
//! use hermine_session::api::ConversationApi;
//! use hermine_session::config::BackendConfig;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let backend = HttpBackend::new(&BackendConfig {
//!         account_id: "acme".to_string(),
//!         agent_slug: "support".to_string(),
//!         ..BackendConfig::default()
//!     })?;
//!
//!     let conversation_id = backend.create_conversation().await?;
//!     backend.send_message(&conversation_id, "Hallo").await?;
//!     Ok(())
//! }
//! ```

use reqwest::{Client, Method, StatusCode};
use tracing::{debug, error, info};
use url::Url;

use super::{
    ConversationApi, ConversationResponse, CreateConversationResponse, SendMessageRequest,
    SendMessageResponse, ThemeResponse,
};
use crate::config::BackendConfig;
use crate::error::{HermineError, Result};

/// `reqwest`-based [`ConversationApi`] implementation.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    base: Url,
    account_id: String,
    agent_slug: String,
}

impl HttpBackend {
    /// Creates a client for one account and agent.
    ///
    /// # Errors
    ///
    /// Returns [`HermineError::Url`] for an unparseable endpoint,
    /// [`HermineError::Config`] for an endpoint that cannot carry a path, and
    /// [`HermineError::Http`] if the HTTP client cannot be built.
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(HermineError::from)?;

        let base = Url::parse(&config.endpoint)?;
        if base.cannot_be_a_base() {
            return Err(HermineError::Config(format!(
                "backend endpoint cannot be used as a base URL: {}",
                config.endpoint
            ))
            .into());
        }

        Ok(Self {
            client,
            base,
            account_id: config.account_id.clone(),
            agent_slug: config.agent_slug.clone(),
        })
    }

    /// Backend origin this client talks to.
    pub fn endpoint(&self) -> &Url {
        &self.base
    }

    /// Builds `{endpoint}/api/widget/{account}/{agent}/{segments..}`.
    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        {
            let mut path = url.path_segments_mut().map_err(|_| {
                HermineError::Config(format!("invalid backend endpoint: {}", self.base))
            })?;
            path.pop_if_empty()
                .extend([
                    "api",
                    "widget",
                    self.account_id.as_str(),
                    self.agent_slug.as_str(),
                ])
                .extend(segments);
        }
        Ok(url)
    }

    fn build_request(&self, method: Method, segments: &[&str]) -> Result<reqwest::RequestBuilder> {
        let url = self.url(segments)?;
        Ok(self
            .client
            .request(method, url)
            .header("Accept", "application/json"))
    }

    async fn api_error(response: reqwest::Response, action: &str) -> anyhow::Error {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        error!(status = status.as_u16(), body = %body, "Failed to {}", action);
        HermineError::Api {
            status: status.as_u16(),
            message: body,
        }
        .into()
    }
}

#[async_trait::async_trait]
impl ConversationApi for HttpBackend {
    async fn create_conversation(&self) -> Result<String> {
        let response = self
            .build_request(Method::POST, &["conversations"])?
            .json(&serde_json::json!({}))
            .send()
            .await
            .map_err(HermineError::from)?;

        if !response.status().is_success() {
            return Err(Self::api_error(response, "create conversation").await);
        }

        let created: CreateConversationResponse =
            response.json().await.map_err(HermineError::from)?;
        info!(
            conversation_id = %created.conversation_id,
            agent = %self.agent_slug,
            "Created conversation"
        );
        Ok(created.conversation_id)
    }

    async fn fetch_conversation(&self, conversation_id: &str) -> Result<ConversationResponse> {
        let response = self
            .build_request(Method::GET, &["conversations", conversation_id])?
            .send()
            .await
            .map_err(HermineError::from)?;

        let status = response.status();
        match status {
            StatusCode::OK => {
                let conversation: ConversationResponse =
                    response.json().await.map_err(HermineError::from)?;
                debug!(
                    conversation_id = %conversation_id,
                    messages = conversation.messages.len(),
                    "Fetched conversation"
                );
                Ok(conversation)
            }
            _ => Err(Self::api_error(response, "fetch conversation").await),
        }
    }

    async fn send_message(&self, conversation_id: &str, text: &str) -> Result<SendMessageResponse> {
        let request = SendMessageRequest {
            conversation_id: conversation_id.to_string(),
            account_id: self.account_id.clone(),
            agent_slug: self.agent_slug.clone(),
            message: text.to_string(),
        };

        let response = self
            .build_request(Method::POST, &["conversations", conversation_id, "messages"])?
            .json(&request)
            .send()
            .await
            .map_err(HermineError::from)?;

        if !response.status().is_success() {
            return Err(Self::api_error(response, "send message").await);
        }

        let result: SendMessageResponse = response.json().await.map_err(HermineError::from)?;
        debug!(
            conversation_id = %conversation_id,
            accepted = result.is_ok(),
            "Sent message"
        );
        Ok(result)
    }

    async fn fetch_theme(&self) -> Result<ThemeResponse> {
        let response = self
            .build_request(Method::GET, &["theme"])?
            .send()
            .await
            .map_err(HermineError::from)?;

        if !response.status().is_success() {
            return Err(Self::api_error(response, "fetch theme").await);
        }

        Ok(response.json().await.map_err(HermineError::from)?)
    }
}
