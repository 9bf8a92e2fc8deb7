//! Command-line interface definition for the Hermine terminal client
//!
//! The terminal client stands in for the embeddable widget: it drives a
//! conversation session and renders its snapshots.

use clap::{Parser, Subcommand};

/// Hermine - chat with a Hermine agent from the terminal
#[derive(Parser, Debug, Clone)]
#[command(name = "hermine")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/config.yaml")]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Override the backend endpoint
    #[arg(long, global = true)]
    pub endpoint: Option<String>,

    /// Override the account id
    #[arg(long, global = true)]
    pub account_id: Option<String>,

    /// Override the agent slug
    #[arg(long, global = true)]
    pub agent_slug: Option<String>,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Start an interactive chat with the agent
    Chat,

    /// Send one message and print the reply
    Ask {
        /// Message to send
        message: String,
    },

    /// Print the agent theme as JSON
    Theme,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
