//! Rule configuration errors.
//!
//! Every variant is a load-time condition. A rule set that fails to load
//! must stop the process before the first notification is classified.

use std::path::PathBuf;

use thiserror::Error;

/// Result type for rule loading.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Error raised while building or validating a [`crate::RuleConfig`].
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid regex pattern '{pattern}': {reason}")]
    InvalidRegex { pattern: String, reason: String },

    #[error("Invalid destination URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Duplicate destination URL: {0}")]
    DuplicateDestination(String),

    #[error("Destination '{url}' has an empty name")]
    EmptyName { url: String },

    #[error("Failed to read rules file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse rules: {0}")]
    Parse(String),
}

impl ConfigError {
    pub fn invalid_regex(pattern: impl Into<String>, reason: impl ToString) -> Self {
        Self::InvalidRegex {
            pattern: pattern.into(),
            reason: reason.to_string(),
        }
    }

    pub fn invalid_url(url: impl Into<String>, reason: impl ToString) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}
