//! Notification store: durable failed/undecided records plus change
//! notification for live views.

mod events;
mod service;

pub use events::{RecordKind, StoreChange, StoreEvent, StoreEventBroadcaster};
pub use service::{LiveStream, NotificationStore};
