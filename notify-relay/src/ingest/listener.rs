//! Notification listener.
//!
//! One tokio task per posted notification. Posting never blocks and never
//! fails from the caller's point of view.

use std::sync::Arc;

use notification_rules::NotificationEvent;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use super::extractor::{RawNotification, extract_notification};
use crate::pipeline::NotificationPipeline;
use crate::{Error, Result};

pub struct NotificationListener {
    pipeline: Arc<NotificationPipeline>,
    tracker: TaskTracker,
    cancellation_token: CancellationToken,
    handle: Handle,
}

impl NotificationListener {
    /// Create a listener spawning onto the current tokio runtime.
    pub fn new(pipeline: Arc<NotificationPipeline>) -> Result<Self> {
        let handle = Handle::try_current()
            .map_err(|e| Error::config(format!("notification listener needs a tokio runtime: {e}")))?;
        Ok(Self::with_handle(pipeline, handle))
    }

    pub fn with_handle(pipeline: Arc<NotificationPipeline>, handle: Handle) -> Self {
        Self {
            pipeline,
            tracker: TaskTracker::new(),
            cancellation_token: CancellationToken::new(),
            handle,
        }
    }

    /// Hand a raw notification to the pipeline.
    ///
    /// Returns whether a task was spawned. Malformed notifications are
    /// logged and dropped.
    pub fn on_notification_posted(&self, raw: &RawNotification) -> bool {
        match extract_notification(raw) {
            Ok(event) => self.submit(event),
            Err(e) => {
                warn!(package = %raw.package_name, error = %e, "Dropping malformed notification");
                false
            }
        }
    }

    /// Spawn processing for an already extracted event.
    pub fn submit(&self, event: NotificationEvent) -> bool {
        if self.cancellation_token.is_cancelled() {
            debug!(package = %event.package_name, "Listener stopped, dropping notification");
            return false;
        }

        let pipeline = self.pipeline.clone();
        let cancellation_token = self.cancellation_token.clone();
        self.tracker.spawn_on(
            async move {
                tokio::select! {
                    _ = cancellation_token.cancelled() => {
                        debug!(package = %event.package_name, "Notification processing cancelled");
                    }
                    result = pipeline.process(&event) => {
                        debug!(package = %event.package_name, %result, "Notification processed");
                    }
                }
            },
            &self.handle,
        );
        true
    }

    /// Number of tasks still running.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Wait for every task spawned so far. The listener stays usable.
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// Cancel in-flight tasks and wait for them to stop.
    ///
    /// A send interrupted here is simply dropped; nothing is recorded.
    pub async fn shutdown(&self) {
        info!(in_flight = self.tracker.len(), "Stopping notification listener");
        self.cancellation_token.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        info!("Notification listener stopped");
    }

    pub fn is_running(&self) -> bool {
        !self.cancellation_token.is_cancelled()
    }
}
