//! Theme command handler.

use crate::api::http::HttpBackend;
use crate::api::{ConversationApi, ThemeResponse};
use crate::config::Config;
use crate::error::Result;

/// Fetch the agent theme and print it as pretty JSON
pub async fn run_theme(config: Config) -> Result<()> {
    let backend = HttpBackend::new(&config.backend)?;
    let theme = backend.fetch_theme().await?;
    println!("{}", theme_json(&theme)?);
    Ok(())
}

/// Pretty JSON rendering of a theme; unset fields are omitted.
pub fn theme_json(theme: &ThemeResponse) -> Result<String> {
    Ok(serde_json::to_string_pretty(theme)?)
}
