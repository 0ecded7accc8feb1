//! Database models.
//!
//! These map directly onto the SQLite schema in `migrations/`.

pub mod notification;

pub use notification::*;
