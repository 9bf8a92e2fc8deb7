//! Slash commands understood by the interactive chat
//!
//! Commands are prefixed with `/` and are case-insensitive. Anything else is
//! sent to the agent as a message.

use thiserror::Error;

/// Errors that can occur when parsing special commands
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// Unknown command was entered
    #[error("Unknown command: {0}\n\nType '/help' to see available commands")]
    UnknownCommand(String),
}

/// Special commands handled by the terminal instead of the agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpecialCommand {
    /// Discard the conversation and start a fresh one
    NewConversation,

    /// Dismiss the current error banner
    Dismiss,

    /// Show conversation id, activity and channel health
    ShowStatus,

    /// Display help information
    Help,

    /// Leave the chat
    Exit,

    /// Not a command; send the input as a message
    None,
}

/// Parse a line of input into a special command
///
/// # Errors
///
/// Returns [`CommandError::UnknownCommand`] for an unrecognised `/` command.
///
/// # Examples
///
/// ```
/// use hermine_session::commands::special_commands::{parse_special_command, SpecialCommand};
///
/// assert_eq!(parse_special_command("/NEW").unwrap(), SpecialCommand::NewConversation);
/// assert_eq!(parse_special_command("Hallo").unwrap(), SpecialCommand::None);
/// ```
pub fn parse_special_command(input: &str) -> Result<SpecialCommand, CommandError> {
    let trimmed = input.trim();
    let lower = trimmed.to_lowercase();

    if !trimmed.starts_with('/') && lower != "exit" && lower != "quit" {
        return Ok(SpecialCommand::None);
    }

    match lower.as_str() {
        "/new" | "/reset" => Ok(SpecialCommand::NewConversation),
        "/dismiss" | "/clear" => Ok(SpecialCommand::Dismiss),
        "/status" => Ok(SpecialCommand::ShowStatus),
        "/help" | "/?" => Ok(SpecialCommand::Help),
        "/quit" | "/exit" | "exit" | "quit" => Ok(SpecialCommand::Exit),
        _ => Err(CommandError::UnknownCommand(trimmed.to_string())),
    }
}

/// Print the command reference
pub fn print_help() {
    println!(
        r#"
Chat Commands
=============

  /new            - Start a new conversation (alias: /reset)
  /dismiss        - Dismiss the current error (alias: /clear)
  /status         - Show conversation and connection status
  /help           - Show this help
  /quit           - Leave the chat (also: exit, quit)

Anything else is sent to the agent.
"#
    );
}
