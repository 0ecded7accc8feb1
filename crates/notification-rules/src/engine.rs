//! Filter engine: classifies one notification against a [`RuleConfig`].
//!
//! All operations are pure and total. The engine holds no mutable state,
//! so a single instance can be shared across tasks behind an `Arc`.

use tracing::trace;

use crate::config::{Destination, RuleConfig};
use crate::event::NotificationEvent;

/// Outcome of classifying one event.
#[derive(Debug)]
pub enum Classification<'a> {
    /// Package is on the ignore list; the event is dropped.
    Ignored,
    /// No destination matched.
    Unmatched,
    /// Matching destinations, in configuration order. Never empty.
    Matched(Vec<&'a Destination>),
}

impl Classification<'_> {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Ignored => "ignored",
            Self::Unmatched => "unmatched",
            Self::Matched(_) => "matched",
        }
    }
}

/// Classifies notifications against an immutable rule set.
#[derive(Debug, Clone)]
pub struct FilterEngine {
    config: RuleConfig,
}

impl FilterEngine {
    pub fn new(config: RuleConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RuleConfig {
        &self.config
    }

    /// True iff any ignore pattern matches the package name.
    pub fn is_ignored(&self, package_name: &str) -> bool {
        self.config.ignore_list().is_ignored(package_name)
    }

    /// Every destination with at least one matching rule, in configuration
    /// order. A destination matching does not exclude later ones.
    pub fn find_matching_destinations(&self, event: &NotificationEvent) -> Vec<&Destination> {
        self.config
            .destinations()
            .iter()
            .filter(|d| d.matches(event))
            .collect()
    }

    /// Ignore check followed by destination matching.
    pub fn classify(&self, event: &NotificationEvent) -> Classification<'_> {
        if self.is_ignored(&event.package_name) {
            trace!(package = %event.package_name, "Notification ignored");
            return Classification::Ignored;
        }

        let destinations = self.find_matching_destinations(event);
        if destinations.is_empty() {
            Classification::Unmatched
        } else {
            Classification::Matched(destinations)
        }
    }

    pub fn destination_by_url(&self, url: &str) -> Option<&Destination> {
        self.config.destinations().iter().find(|d| d.url == url)
    }
}
