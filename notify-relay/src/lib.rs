//! notify-relay library crate.
//!
//! Classifies device notifications against a rule set, forwards matches
//! to webhooks and keeps durable records of failed and undecided
//! notifications for retry and triage.

pub mod config;
pub mod database;
pub mod delivery;
pub mod error;
pub mod ingest;
pub mod logging;
pub mod panic_hook;
pub mod pipeline;
pub mod services;
pub mod store;

pub use error::{Error, Result};
