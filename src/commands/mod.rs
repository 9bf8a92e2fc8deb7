/*!
Command handlers for the CLI

- `chat`: Interactive chat with the agent
- `ask`: One-shot question, prints the reply
- `theme`: Agent theme as JSON

Each handler builds its backend client and cable connection from the
loaded [`Config`] and drives a [`ConversationSession`] the way the widget
would.
*/

use crate::api::http::HttpBackend;
use crate::api::ConversationApi;
use crate::channel::cable::CableHub;
use crate::config::Config;
use crate::error::Result;
use crate::session::{ConversationSession, SessionHandle};
use std::sync::Arc;

pub mod render;
pub mod special_commands;

pub mod ask;
pub mod chat;
pub mod theme;

/// Backend client and channel hub shared by the commands.
#[derive(Debug)]
pub struct Connection {
    /// HTTP backend
    pub api: Arc<HttpBackend>,
    /// Cable connections, one per origin
    pub hub: CableHub,
}

impl Connection {
    /// Builds the HTTP client and cable hub for `config`.
    pub fn new(config: &Config) -> Result<Self> {
        let api = Arc::new(HttpBackend::new(&config.backend)?);
        let hub = CableHub::new(config.cable_options());
        Ok(Self { api, hub })
    }

    /// Starts a session against the configured backend.
    pub fn start_session(&self, config: &Config) -> Result<SessionHandle> {
        let channel = self.hub.connect(&config.backend.endpoint)?;
        let api: Arc<dyn ConversationApi> = self.api.clone();
        Ok(ConversationSession::spawn(
            config.session_settings(),
            api,
            channel,
        ))
    }

    /// Closes every cable connection.
    pub fn close(&self) {
        self.hub.disconnect_all();
    }
}
