//! Configuration management for the Hermine session CLI
//!
//! Configuration is resolved in layers: the YAML file (or defaults when the
//! file is missing), then `HERMINE_*` environment variables, then command
//! line overrides. Call [`Config::validate`] before using the result.

use crate::channel::cable::{CableOptions, DEFAULT_CHANNEL, DEFAULT_MOUNT_PATH};
use crate::error::{HermineError, Result};
use crate::i18n::Language;
use crate::session::poller::{PollingPolicy, DEFAULT_POLL_INTERVAL, DEFAULT_POLL_MAX_ATTEMPTS};
use crate::session::SessionSettings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Widget backend location and tenant
    #[serde(default)]
    pub backend: BackendConfig,

    /// ActionCable channel settings
    #[serde(default)]
    pub cable: CableConfig,

    /// Polling fallback settings
    #[serde(default)]
    pub polling: PollingConfig,

    /// Display language (`de` or `en`)
    #[serde(default)]
    pub language: Language,

    /// Logging output settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Backend connection configuration
///
/// Fixed for the lifetime of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Backend origin, e.g. `https://app.hermine.ai`
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Tenant account identifier
    #[serde(default)]
    pub account_id: String,

    /// Slug of the agent to talk to
    #[serde(default)]
    pub agent_slug: String,

    /// Per-request HTTP timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_endpoint() -> String {
    "https://app.hermine.ai".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            account_id: String::new(),
            agent_slug: String::new(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// ActionCable configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CableConfig {
    /// Mount path of the cable endpoint on the backend origin
    #[serde(default = "default_mount_path")]
    pub mount_path: String,

    /// Channel class named in subscription identifiers
    #[serde(default = "default_channel")]
    pub channel: String,

    /// Seconds without any frame before the connection counts as lost
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
}

fn default_mount_path() -> String {
    DEFAULT_MOUNT_PATH.to_string()
}

fn default_channel() -> String {
    DEFAULT_CHANNEL.to_string()
}

fn default_stale_after_secs() -> u64 {
    10
}

impl Default for CableConfig {
    fn default() -> Self {
        Self {
            mount_path: default_mount_path(),
            channel: default_channel(),
            stale_after_secs: default_stale_after_secs(),
        }
    }
}

/// Polling fallback configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Delay between fetches in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub interval_ms: u64,

    /// Fetches before the reply is given up on
    #[serde(default = "default_poll_max_attempts")]
    pub max_attempts: u32,
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL.as_millis() as u64
}

fn default_poll_max_attempts() -> u32 {
    DEFAULT_POLL_MAX_ATTEMPTS
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_poll_interval_ms(),
            max_attempts: default_poll_max_attempts(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is not set
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json_format: bool,

    /// Also append log output to this file
    #[serde(default)]
    pub file_path: Option<PathBuf>,
}

fn default_log_level() -> String {
    "hermine_session=info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
            file_path: None,
        }
    }
}

impl Config {
    /// Load configuration from file, environment and CLI
    ///
    /// A missing file is not an error; defaults are used instead.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the YAML configuration file
    /// * `cli` - Parsed command line arguments
    ///
    /// # Errors
    ///
    /// Returns [`HermineError::Config`] if the file exists but cannot be
    /// read or parsed.
    pub fn load(path: &str, cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);

        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| HermineError::Config(format!("Failed to read config file: {}", e)))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| HermineError::Config(format!("Failed to parse config: {}", e)).into())
    }

    fn apply_env_vars(&mut self) {
        if let Ok(endpoint) = std::env::var("HERMINE_ENDPOINT") {
            self.backend.endpoint = endpoint;
        }

        if let Ok(account_id) = std::env::var("HERMINE_ACCOUNT_ID") {
            self.backend.account_id = account_id;
        }

        if let Ok(agent_slug) = std::env::var("HERMINE_AGENT_SLUG") {
            self.backend.agent_slug = agent_slug;
        }

        if let Ok(language) = std::env::var("HERMINE_LANGUAGE") {
            if let Ok(value) = language.parse() {
                self.language = value;
            } else {
                tracing::warn!("Invalid HERMINE_LANGUAGE: {}", language);
            }
        }

        if let Ok(timeout) = std::env::var("HERMINE_REQUEST_TIMEOUT_SECS") {
            if let Ok(value) = timeout.parse() {
                self.backend.request_timeout_secs = value;
            } else {
                tracing::warn!("Invalid HERMINE_REQUEST_TIMEOUT_SECS: {}", timeout);
            }
        }

        if let Ok(interval) = std::env::var("HERMINE_POLL_INTERVAL_MS") {
            if let Ok(value) = interval.parse() {
                self.polling.interval_ms = value;
            } else {
                tracing::warn!("Invalid HERMINE_POLL_INTERVAL_MS: {}", interval);
            }
        }

        if let Ok(attempts) = std::env::var("HERMINE_POLL_MAX_ATTEMPTS") {
            if let Ok(value) = attempts.parse() {
                self.polling.max_attempts = value;
            } else {
                tracing::warn!("Invalid HERMINE_POLL_MAX_ATTEMPTS: {}", attempts);
            }
        }

        if let Ok(level) = std::env::var("HERMINE_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Ok(json) = std::env::var("HERMINE_LOG_JSON") {
            match json.to_lowercase().as_str() {
                "1" | "true" | "yes" => self.logging.json_format = true,
                "0" | "false" | "no" => self.logging.json_format = false,
                _ => tracing::warn!("Invalid HERMINE_LOG_JSON: {}", json),
            }
        }
    }

    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) {
        if let Some(endpoint) = &cli.endpoint {
            self.backend.endpoint = endpoint.clone();
        }
        if let Some(account_id) = &cli.account_id {
            self.backend.account_id = account_id.clone();
        }
        if let Some(agent_slug) = &cli.agent_slug {
            self.backend.agent_slug = agent_slug.clone();
        }
        if cli.verbose {
            self.logging.level = "hermine_session=debug".to_string();
        }
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns [`HermineError::Config`] describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        let endpoint = Url::parse(&self.backend.endpoint).map_err(|e| {
            HermineError::Config(format!(
                "Invalid backend endpoint '{}': {}",
                self.backend.endpoint, e
            ))
        })?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(HermineError::Config(format!(
                "Backend endpoint must use http or https, got '{}'",
                endpoint.scheme()
            ))
            .into());
        }

        if self.backend.account_id.trim().is_empty() {
            return Err(HermineError::Config("account_id cannot be empty".to_string()).into());
        }

        if self.backend.agent_slug.trim().is_empty() {
            return Err(HermineError::Config("agent_slug cannot be empty".to_string()).into());
        }

        if self.backend.request_timeout_secs == 0 {
            return Err(HermineError::Config(
                "request_timeout_secs must be greater than 0".to_string(),
            )
            .into());
        }

        if !self.cable.mount_path.starts_with('/') {
            return Err(HermineError::Config(format!(
                "cable mount_path must start with '/', got '{}'",
                self.cable.mount_path
            ))
            .into());
        }

        if self.cable.channel.trim().is_empty() {
            return Err(HermineError::Config("cable channel cannot be empty".to_string()).into());
        }

        if self.cable.stale_after_secs == 0 {
            return Err(HermineError::Config(
                "cable stale_after_secs must be greater than 0".to_string(),
            )
            .into());
        }

        if self.polling.interval_ms == 0 {
            return Err(
                HermineError::Config("polling interval_ms must be greater than 0".to_string())
                    .into(),
            );
        }

        if self.polling.max_attempts == 0 {
            return Err(HermineError::Config(
                "polling max_attempts must be greater than 0".to_string(),
            )
            .into());
        }

        Ok(())
    }

    /// Settings for sessions started with this configuration.
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            language: self.language,
            polling: PollingPolicy {
                interval: Duration::from_millis(self.polling.interval_ms),
                max_attempts: self.polling.max_attempts,
            },
        }
    }

    /// Options for the cable hub.
    pub fn cable_options(&self) -> CableOptions {
        CableOptions {
            mount_path: self.cable.mount_path.clone(),
            channel: self.cable.channel.clone(),
            stale_after: Duration::from_secs(self.cable.stale_after_secs),
        }
    }
}
