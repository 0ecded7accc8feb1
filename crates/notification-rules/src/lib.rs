//! Rule configuration and filter engine for forwarded notifications.
//!
//! This crate is pure: it performs no network or storage I/O beyond
//! reading a rules file at startup. It provides:
//!
//! - [`NotificationEvent`], the event shape and its JSON wire payload
//! - [`Pattern`], [`MatchRule`], [`Destination`] and [`IgnoreList`]
//! - [`RuleConfig`] loading and load-time validation
//! - [`FilterEngine`], which classifies one event against the rules
//!
//! # Example
//!
//! ```
//! use notification_rules::{Classification, FilterEngine, NotificationEvent, RuleConfig};
//!
//! let config = RuleConfig::from_toml_str(r#"
//!     ignore = ["com.android.systemui"]
//!
//!     [[destinations]]
//!     url = "https://hooks.example.com/bank"
//!     name = "Bank apps"
//!     rules = ["com.VCB"]
//! "#).unwrap();
//!
//! let engine = FilterEngine::new(config);
//! let event = NotificationEvent::new("com.VCB", 1_700_000_000_000, 7)
//!     .with_title("Security Alert")
//!     .with_text("FRAUD detected");
//!
//! match engine.classify(&event) {
//!     Classification::Matched(destinations) => assert_eq!(destinations[0].name, "Bank apps"),
//!     other => panic!("unexpected classification: {other:?}"),
//! }
//! ```

pub mod config;
pub mod defaults;
pub mod engine;
pub mod error;
pub mod event;
pub mod pattern;

pub use config::{
    Destination, DestinationSpec, IgnoreList, MatchRule, MatchRuleSpec, RuleConfig, RulesFile,
};
pub use engine::{Classification, FilterEngine};
pub use error::{ConfigError, Result};
pub use event::NotificationEvent;
pub use pattern::{Pattern, PatternSpec};
