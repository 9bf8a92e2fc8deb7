//! Hermine - terminal client for Hermine chat agents
//!
#![doc = "Main entry point for the hermine CLI."]

use anyhow::Result;

use hermine_session::cli::{Cli, Commands};
use hermine_session::commands;
use hermine_session::config::Config;
use hermine_session::logging::init_logging;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse_args();

    // Load configuration
    let config_path = cli.config.as_deref().unwrap_or("config/config.yaml");
    let config = Config::load(config_path, &cli)?;

    init_logging(&config.logging)?;

    // Validate configuration
    config.validate()?;

    // Execute command
    match cli.command {
        Commands::Chat => {
            tracing::info!("Starting interactive chat mode");
            commands::chat::run_chat(config).await?;
            Ok(())
        }
        Commands::Ask { message } => {
            tracing::info!("Asking a single question");
            commands::ask::run_ask(config, message).await?;
            Ok(())
        }
        Commands::Theme => {
            tracing::debug!("Fetching agent theme");
            commands::theme::run_theme(config).await?;
            Ok(())
        }
    }
}
