//! Hermine session - streaming conversation session manager
//!
//! This library is the conversation core of the Hermine chat widget. It
//! opens a conversation with the widget backend, sends user messages, and
//! assembles the assistant's reply from fragments pushed over an ActionCable
//! channel, falling back to bounded polling when the channel is silent or
//! drops.
//!
//! # Architecture
//!
//! - `channel`: ActionCable transport, subscriptions and channel events
//! - `message`: normalization of backend records into [`Message`]s
//! - `assembler`: reassembly of streamed reply fragments
//! - `session`: the session state machine, its driver task and the poller
//! - `api`: widget backend HTTP client
//! - `config`, `logging`, `cli`, `commands`: the `hermine` terminal client
//! - `error`: error types and result alias
//!
//! # Example
//!
//! ```no_run
//! use hermine_session::commands::Connection;
//! use hermine_session::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let cli = <hermine_session::cli::Cli as clap::Parser>::parse();
//!     let config = Config::load("config/config.yaml", &cli)?;
//!     config.validate()?;
//!
//!     let connection = Connection::new(&config)?;
//!     let session = connection.start_session(&config)?;
//!     session.send_message("Hallo!");
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod assembler;
pub mod channel;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod i18n;
pub mod logging;
pub mod message;
pub mod session;

// Re-export commonly used types
pub use assembler::StreamAssembler;
pub use channel::{ChannelEvent, ChannelTransport, Subscription};
pub use config::Config;
pub use error::{HermineError, Result, SessionErrorKind};
pub use i18n::Language;
pub use message::{Message, Role, StreamFragment};
pub use session::{
    ActivityState, ConversationSession, SessionHandle, SessionSettings, SessionSnapshot,
};
