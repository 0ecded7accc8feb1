//! Application configuration from the environment.
//!
//! | Variable               | Default                            |
//! |------------------------|------------------------------------|
//! | `DATABASE_URL`         | `sqlite:notify-relay.db?mode=rwc`  |
//! | `RULES_PATH`           | built-in rules                     |
//! | `LOG_DIR`              | `logs`                             |
//! | `WEBHOOK_TIMEOUT_SECS` | `30`                               |

use std::path::PathBuf;
use std::time::Duration;

use notification_rules::{RuleConfig, defaults::default_rule_config};
use tracing::info;

use crate::{Error, Result};

pub const DEFAULT_DATABASE_URL: &str = "sqlite:notify-relay.db?mode=rwc";
pub const DEFAULT_LOG_DIR: &str = "logs";
pub const DEFAULT_WEBHOOK_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub database_url: String,
    /// Rules file; `None` selects the built-in rules.
    pub rules_path: Option<PathBuf>,
    pub log_dir: PathBuf,
    pub webhook_timeout: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            rules_path: None,
            log_dir: PathBuf::from(DEFAULT_LOG_DIR),
            webhook_timeout: Duration::from_secs(DEFAULT_WEBHOOK_TIMEOUT_SECS),
        }
    }
}

impl AppConfig {
    /// Read the process environment. Call `dotenvy::dotenv()` first to
    /// pick up a `.env` file.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let mut config = Self::default();

        if let Some(url) = get("DATABASE_URL") {
            config.database_url = url;
        }
        config.rules_path = get("RULES_PATH").map(PathBuf::from);
        if let Some(dir) = get("LOG_DIR") {
            config.log_dir = PathBuf::from(dir);
        }
        if let Some(raw) = get("WEBHOOK_TIMEOUT_SECS") {
            config.webhook_timeout = parse_timeout_secs(&raw)?;
        }

        Ok(config)
    }

    /// Load and validate the rule set.
    pub fn load_rules(&self) -> Result<RuleConfig> {
        let config = match &self.rules_path {
            Some(path) => {
                let config = RuleConfig::load(path)?;
                info!(path = %path.display(), "Loaded rules file");
                config
            }
            None => {
                info!("No rules file configured, using built-in rules");
                default_rule_config()?
            }
        };
        Ok(config)
    }
}

fn parse_timeout_secs(raw: &str) -> Result<Duration> {
    let secs: u64 = raw
        .parse()
        .map_err(|e| Error::config(format!("WEBHOOK_TIMEOUT_SECS must be a whole number of seconds, got '{raw}': {e}")))?;
    if secs == 0 {
        return Err(Error::config("WEBHOOK_TIMEOUT_SECS must be greater than 0"));
    }
    Ok(Duration::from_secs(secs))
}
