//! Widget languages and the few user-facing strings the session renders.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::HermineError;

/// Display language of the widget.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    /// German
    #[default]
    De,
    /// English
    En,
}

impl Language {
    /// Generic banner text shown for any user-visible session failure.
    pub fn generic_error(self) -> &'static str {
        match self {
            Self::De => "Bei dieser Anfrage ist ein Fehler aufgetreten.",
            Self::En => "An error occurred with this request.",
        }
    }

    /// Input placeholder used when the backend supplies none.
    pub fn default_placeholder(self) -> &'static str {
        match self {
            Self::De => "Nachricht eingeben...",
            Self::En => "Type your message...",
        }
    }

    /// Picks the variant for this language out of a localized pair.
    pub fn pick<'a>(self, de: Option<&'a str>, en: Option<&'a str>) -> Option<&'a str> {
        match self {
            Self::De => de,
            Self::En => en,
        }
        .filter(|text| !text.trim().is_empty())
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::De => f.write_str("de"),
            Self::En => f.write_str("en"),
        }
    }
}

impl FromStr for Language {
    type Err = HermineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "de" | "de-de" | "german" => Ok(Self::De),
            "en" | "en-us" | "en-gb" | "english" => Ok(Self::En),
            other => Err(HermineError::Config(format!(
                "unsupported language '{}', expected 'de' or 'en'",
                other
            ))),
        }
    }
}
