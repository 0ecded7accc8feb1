//! Repository layer for database access.
//!
//! Traits describe the storage contract per record kind; the `Sqlx*`
//! types implement it on SQLite. Reads use the read pool, writes the
//! serialized write pool.

pub mod notification;

pub use notification::*;
