//! One-shot question handler.
//!
//! Sends a single message on a fresh session, waits for the reply to
//! settle and prints it. A session failure becomes the command's error so
//! the process exits non-zero.

use super::Connection;
use crate::config::Config;
use crate::error::{HermineError, Result, SessionErrorKind};
use crate::message::Message;
use crate::session::{ActivityState, SessionHandle};

/// Run the `ask` command
///
/// # Errors
///
/// Returns [`HermineError::Session`] when the conversation cannot be
/// opened, the message is refused, or the reply never completes.
pub async fn run_ask(config: Config, message: String) -> Result<()> {
    let connection = Connection::new(&config)?;
    let session = connection.start_session(&config)?;

    let result = ask(&session, &message).await;
    session.dispose();
    connection.close();

    let reply = result?;
    println!("{}", reply.content);
    Ok(())
}

/// Sends `message` on a session that has not been opened yet and returns
/// the settled reply.
///
/// Blank text is refused up front; the session drops it without a state
/// change, so there would be nothing to wait for.
pub async fn ask(session: &SessionHandle, message: &str) -> Result<Message> {
    if message.trim().is_empty() {
        return Err(HermineError::Session {
            kind: SessionErrorKind::SendFailure,
            message: "message is empty".to_string(),
        }
        .into());
    }
    session.send_message(message);

    let snapshot = session
        .wait_for(|s| matches!(s.activity, ActivityState::Idle | ActivityState::Errored))
        .await
        .ok_or_else(|| HermineError::Channel("session stopped before the reply".to_string()))?;

    if let Some(kind) = snapshot.error {
        tracing::error!(
            conversation_id = ?snapshot.conversation_id,
            "Question failed: {}",
            kind
        );
        return Err(HermineError::Session {
            kind,
            message: snapshot.error_text.unwrap_or_else(|| kind.to_string()),
        }
        .into());
    }

    snapshot.last_assistant().cloned().ok_or_else(|| {
        HermineError::Session {
            kind: SessionErrorKind::SendFailure,
            message: "conversation settled without a reply".to_string(),
        }
        .into()
    })
}
