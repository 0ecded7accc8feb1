//! Built-in rule set used when no rules file is configured.

use crate::config::RulesFile;
use crate::error::Result;
use crate::RuleConfig;

/// Default rules, in the same format a rules file uses.
pub const DEFAULT_RULES_TOML: &str = r#"
ignore = [
    "com.android.systemui",
    "com.google.android.gms",
    "com.android.providers.downloads",
]

[[destinations]]
url = "https://n8n.cloud/webhook/slack-notifications"
name = "Slack Notifications"
rules = ["com.slack", "com.microsoft.teams"]

[[destinations]]
url = "https://n8n.cloud/webhook/social-media"
name = "Social Media"
rules = [
    "com.instagram.android",
    "com.twitter.android",
    { package = "com.facebook.katana", title = { regex = ".*mentioned you.*" } },
]

[[destinations]]
url = "https://n8n.cloud/webhook/urgent-alerts"
name = "Urgent Alerts"
rules = [
    { package = "com.android.phone", title = { regex = ".*Emergency.*" } },
    { package = "com.banking.app", text = { regex = ".*fraud.*|.*suspicious.*" } },
]
"#;

/// Parsed, uncompiled default rules.
pub fn default_rules_file() -> Result<RulesFile> {
    Ok(toml::from_str(DEFAULT_RULES_TOML)?)
}

/// Compiled default rules.
pub fn default_rule_config() -> Result<RuleConfig> {
    RuleConfig::from_toml_str(DEFAULT_RULES_TOML)
}
