//! Store change events.
//!
//! Every successful mutation of the notification store is published on a
//! broadcast channel so live views (counts, lists) can refresh.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// The two durable record sets.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Failed,
    Undecided,
}

/// What happened to a record set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreChange {
    Inserted(i64),
    /// Ids passed to the delete call; at least one row was removed.
    Deleted(Vec<i64>),
    Cleared,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEvent {
    pub kind: RecordKind,
    pub change: StoreChange,
}

impl StoreEvent {
    pub fn inserted(kind: RecordKind, id: i64) -> Self {
        Self {
            kind,
            change: StoreChange::Inserted(id),
        }
    }

    pub fn deleted(kind: RecordKind, ids: Vec<i64>) -> Self {
        Self {
            kind,
            change: StoreChange::Deleted(ids),
        }
    }

    pub fn cleared(kind: RecordKind) -> Self {
        Self {
            kind,
            change: StoreChange::Cleared,
        }
    }

    pub fn description(&self) -> String {
        match &self.change {
            StoreChange::Inserted(id) => format!("{} record {} inserted", self.kind, id),
            StoreChange::Deleted(ids) => format!("{} {} record(s) deleted", ids.len(), self.kind),
            StoreChange::Cleared => format!("{} records cleared", self.kind),
        }
    }
}

const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Fan-out of [`StoreEvent`]s to any number of subscribers.
#[derive(Clone)]
pub struct StoreEventBroadcaster {
    sender: broadcast::Sender<StoreEvent>,
}

impl StoreEventBroadcaster {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.sender.subscribe()
    }

    /// Publish an event, returning how many subscribers received it.
    pub fn publish(&self, event: StoreEvent) -> usize {
        tracing::trace!("Publishing store event: {}", event.description());
        // No subscribers is not an error.
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for StoreEventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}
