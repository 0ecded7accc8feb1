//! String patterns used by match rules and the ignore list.

use std::fmt;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// Compiled regexes larger than this are rejected at load time.
const REGEX_SIZE_LIMIT: usize = 1 << 20;

/// Declarative form of a [`Pattern`] as written in a rules file.
///
/// Accepted shapes:
/// - `"com.slack"`: a bare string is a literal
/// - `{ literal = "com.slack" }`
/// - `{ regex = ".*mentioned you.*" }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", from = "RawPattern")]
pub enum PatternSpec {
    Literal(String),
    Regex(String),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawPattern {
    Bare(String),
    Tagged(TaggedPattern),
}

#[derive(Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
enum TaggedPattern {
    Literal(String),
    Regex(String),
}

impl From<RawPattern> for PatternSpec {
    fn from(raw: RawPattern) -> Self {
        match raw {
            RawPattern::Bare(value) | RawPattern::Tagged(TaggedPattern::Literal(value)) => {
                Self::Literal(value)
            }
            RawPattern::Tagged(TaggedPattern::Regex(source)) => Self::Regex(source),
        }
    }
}

/// A compiled pattern matched against one notification field.
#[derive(Debug, Clone)]
pub enum Pattern {
    /// Exact string equality.
    Literal(String),
    /// Regular expression that must match the whole field.
    Regex(RegexPattern),
}

/// A regex together with the source text it was compiled from.
#[derive(Debug, Clone)]
pub struct RegexPattern {
    source: String,
    regex: Regex,
}

impl RegexPattern {
    pub fn source(&self) -> &str {
        &self.source
    }
}

impl Pattern {
    pub fn literal(value: impl Into<String>) -> Self {
        Self::Literal(value.into())
    }

    /// Compile a regex pattern. The expression is anchored on both ends,
    /// so `".*mentioned you.*"` matches a title containing the phrase
    /// while `"mentioned"` only matches a title equal to it.
    ///
    /// The source must parse on its own, so it cannot close the anchoring
    /// group early (`"a)|(.*"`).
    pub fn regex(source: impl Into<String>) -> Result<Self> {
        let source = source.into();
        RegexBuilder::new(&source)
            .size_limit(REGEX_SIZE_LIMIT)
            .build()
            .map_err(|e| ConfigError::invalid_regex(&source, e))?;
        let regex = RegexBuilder::new(&format!("^(?:{})$", source))
            .size_limit(REGEX_SIZE_LIMIT)
            .build()
            .map_err(|e| ConfigError::invalid_regex(&source, e))?;
        Ok(Self::Regex(RegexPattern { source, regex }))
    }

    pub fn compile(spec: &PatternSpec) -> Result<Self> {
        match spec {
            PatternSpec::Literal(value) => Ok(Self::literal(value.clone())),
            PatternSpec::Regex(source) => Self::regex(source.clone()),
        }
    }

    pub fn to_spec(&self) -> PatternSpec {
        match self {
            Self::Literal(value) => PatternSpec::Literal(value.clone()),
            Self::Regex(r) => PatternSpec::Regex(r.source.clone()),
        }
    }

    #[inline]
    pub fn matches(&self, value: &str) -> bool {
        match self {
            Self::Literal(expected) => expected == value,
            Self::Regex(r) => r.regex.is_match(value),
        }
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(value) => write!(f, "\"{}\"", value),
            Self::Regex(r) => write!(f, "/{}/", r.source),
        }
    }
}
