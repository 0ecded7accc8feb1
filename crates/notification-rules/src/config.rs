//! Rule configuration: destinations, match rules and the ignore list.
//!
//! Rules are written declaratively ([`RulesFile`] and the `*Spec` types)
//! and compiled once at startup into a [`RuleConfig`]. Compilation is
//! where every configuration error surfaces; a compiled config is
//! immutable and safe to share between tasks without locking.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::error::{ConfigError, Result};
use crate::event::NotificationEvent;
use crate::pattern::{Pattern, PatternSpec};

/// Rules file as written on disk.
///
/// ```toml
/// ignore = ["com.android.systemui"]
///
/// [[destinations]]
/// url = "https://hooks.example.com/social"
/// name = "Social Media"
/// rules = [
///     "com.instagram.android",
///     { package = "com.facebook.katana", title = { regex = ".*mentioned you.*" } },
/// ]
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RulesFile {
    #[serde(default)]
    pub ignore: Vec<PatternSpec>,
    #[serde(default)]
    pub destinations: Vec<DestinationSpec>,
}

/// Declarative form of a [`Destination`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DestinationSpec {
    pub url: String,
    pub name: String,
    #[serde(default)]
    pub rules: Vec<MatchRuleSpec>,
}

/// Declarative form of a [`MatchRule`].
///
/// A bare string is shorthand for a package-only literal rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawMatchRule")]
pub struct MatchRuleSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package: Option<PatternSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<PatternSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<PatternSpec>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawMatchRule {
    Package(String),
    Fields(MatchRuleFields),
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct MatchRuleFields {
    #[serde(default)]
    package: Option<PatternSpec>,
    #[serde(default)]
    title: Option<PatternSpec>,
    #[serde(default)]
    text: Option<PatternSpec>,
}

impl From<RawMatchRule> for MatchRuleSpec {
    fn from(raw: RawMatchRule) -> Self {
        match raw {
            RawMatchRule::Package(package) => Self {
                package: Some(PatternSpec::Literal(package)),
                ..Default::default()
            },
            RawMatchRule::Fields(f) => Self {
                package: f.package,
                title: f.title,
                text: f.text,
            },
        }
    }
}

/// Predicate over package name, title and text.
///
/// Every present pattern must match (logical AND); absent patterns are not
/// checked. A rule with no patterns matches every event.
#[derive(Debug, Clone, Default)]
pub struct MatchRule {
    pub package: Option<Pattern>,
    pub title: Option<Pattern>,
    pub text: Option<Pattern>,
}

impl MatchRule {
    /// Rule with no patterns; matches every event.
    pub fn any() -> Self {
        Self::default()
    }

    pub fn package(pattern: Pattern) -> Self {
        Self {
            package: Some(pattern),
            ..Default::default()
        }
    }

    pub fn with_title(mut self, pattern: Pattern) -> Self {
        self.title = Some(pattern);
        self
    }

    pub fn with_text(mut self, pattern: Pattern) -> Self {
        self.text = Some(pattern);
        self
    }

    pub fn compile(spec: &MatchRuleSpec) -> Result<Self> {
        Ok(Self {
            package: spec.package.as_ref().map(Pattern::compile).transpose()?,
            title: spec.title.as_ref().map(Pattern::compile).transpose()?,
            text: spec.text.as_ref().map(Pattern::compile).transpose()?,
        })
    }

    pub fn to_spec(&self) -> MatchRuleSpec {
        MatchRuleSpec {
            package: self.package.as_ref().map(Pattern::to_spec),
            title: self.title.as_ref().map(Pattern::to_spec),
            text: self.text.as_ref().map(Pattern::to_spec),
        }
    }

    pub fn is_catch_all(&self) -> bool {
        self.package.is_none() && self.title.is_none() && self.text.is_none()
    }

    /// Missing title or text is matched as the empty string.
    pub fn matches(&self, event: &NotificationEvent) -> bool {
        field_matches(self.package.as_ref(), &event.package_name)
            && field_matches(self.title.as_ref(), event.title_or_empty())
            && field_matches(self.text.as_ref(), event.text_or_empty())
    }
}

#[inline]
fn field_matches(pattern: Option<&Pattern>, value: &str) -> bool {
    pattern.is_none_or(|p| p.matches(value))
}

/// A webhook endpoint and the rules routing events to it.
///
/// Identity is the URL; a config never holds two destinations with the
/// same URL.
#[derive(Debug, Clone)]
pub struct Destination {
    pub url: String,
    pub name: String,
    pub rules: Vec<MatchRule>,
}

impl Destination {
    pub fn new(url: impl Into<String>, name: impl Into<String>, rules: Vec<MatchRule>) -> Self {
        Self {
            url: url.into(),
            name: name.into(),
            rules,
        }
    }

    /// True when at least one rule matches. A destination without rules
    /// never matches.
    pub fn matches(&self, event: &NotificationEvent) -> bool {
        self.rules.iter().any(|rule| rule.matches(event))
    }

    pub fn to_spec(&self) -> DestinationSpec {
        DestinationSpec {
            url: self.url.clone(),
            name: self.name.clone(),
            rules: self.rules.iter().map(MatchRule::to_spec).collect(),
        }
    }
}

/// Package name patterns whose notifications are dropped unseen.
#[derive(Debug, Clone, Default)]
pub struct IgnoreList {
    patterns: Vec<Pattern>,
}

impl IgnoreList {
    pub fn new(patterns: Vec<Pattern>) -> Self {
        Self { patterns }
    }

    pub fn is_ignored(&self, package_name: &str) -> bool {
        self.patterns.iter().any(|p| p.matches(package_name))
    }

    pub fn patterns(&self) -> &[Pattern] {
        &self.patterns
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

/// Validated, compiled rule set.
#[derive(Debug, Clone, Default)]
pub struct RuleConfig {
    destinations: Vec<Destination>,
    ignore: IgnoreList,
}

impl RuleConfig {
    /// Build a rule set, validating destinations.
    pub fn new(destinations: Vec<Destination>, ignore: IgnoreList) -> Result<Self> {
        validate_destinations(&destinations)?;
        Ok(Self {
            destinations,
            ignore,
        })
    }

    pub fn from_spec(spec: &RulesFile) -> Result<Self> {
        let ignore = spec
            .ignore
            .iter()
            .map(Pattern::compile)
            .collect::<Result<Vec<_>>>()?;

        let destinations = spec
            .destinations
            .iter()
            .map(|d| {
                let rules = d
                    .rules
                    .iter()
                    .map(MatchRule::compile)
                    .collect::<Result<Vec<_>>>()?;
                Ok(Destination::new(d.url.clone(), d.name.clone(), rules))
            })
            .collect::<Result<Vec<_>>>()?;

        Self::new(destinations, IgnoreList::new(ignore))
    }

    pub fn from_toml_str(input: &str) -> Result<Self> {
        let spec: RulesFile = toml::from_str(input)?;
        Self::from_spec(&spec)
    }

    pub fn from_json_str(input: &str) -> Result<Self> {
        let spec: RulesFile = serde_json::from_str(input)?;
        Self::from_spec(&spec)
    }

    /// Load a rules file. Files ending in `.json` are parsed as JSON,
    /// everything else as TOML.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        let config = if is_json {
            Self::from_json_str(&content)?
        } else {
            Self::from_toml_str(&content)?
        };

        debug!(
            path = %path.display(),
            destinations = config.destinations.len(),
            ignored = config.ignore.len(),
            "Loaded rules file"
        );
        Ok(config)
    }

    pub fn to_spec(&self) -> RulesFile {
        RulesFile {
            ignore: self.ignore.patterns().iter().map(Pattern::to_spec).collect(),
            destinations: self.destinations.iter().map(Destination::to_spec).collect(),
        }
    }

    pub fn destinations(&self) -> &[Destination] {
        &self.destinations
    }

    pub fn ignore_list(&self) -> &IgnoreList {
        &self.ignore
    }
}

fn validate_destinations(destinations: &[Destination]) -> Result<()> {
    let mut seen = HashSet::new();

    for destination in destinations {
        let url = Url::parse(&destination.url)
            .map_err(|e| ConfigError::invalid_url(&destination.url, e))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::invalid_url(
                &destination.url,
                format!("unsupported scheme '{}'", url.scheme()),
            ));
        }
        if url.host_str().is_none() {
            return Err(ConfigError::invalid_url(&destination.url, "missing host"));
        }

        if destination.name.trim().is_empty() {
            return Err(ConfigError::EmptyName {
                url: destination.url.clone(),
            });
        }

        if !seen.insert(destination.url.as_str()) {
            return Err(ConfigError::DuplicateDestination(destination.url.clone()));
        }

        if destination.rules.is_empty() {
            warn!(
                destination = %destination.name,
                "Destination has no rules and will never match"
            );
        }
    }

    Ok(())
}
