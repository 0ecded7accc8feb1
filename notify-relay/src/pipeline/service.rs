//! Notification pipeline service.

use std::sync::Arc;

use notification_rules::{Classification, Destination, FilterEngine, NotificationEvent};
use tracing::{debug, error, info, warn};

use crate::Result;
use crate::database::models::{
    FailedNotificationDbModel, UndecidedNotificationDbModel, UndecidedReason,
};
use crate::delivery::{DeliveryClient, DeliveryOutcome};
use crate::store::{NotificationStore, RecordKind};

/// Terminal state of one processed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ProcessingResult {
    /// Package is on the ignore list. Nothing was sent or stored.
    Ignored,
    /// No destination matched; an undecided record was stored.
    NoMatchingRules,
    /// Every matching destination accepted the payload.
    Sent,
    /// At least one destination failed, or the event could not be
    /// processed at all.
    FailedToSend,
}

/// Tally of a bulk retry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetrySummary {
    pub attempted: usize,
    pub succeeded: usize,
}

impl RetrySummary {
    pub fn failed(&self) -> usize {
        self.attempted - self.succeeded
    }

    pub fn all_succeeded(&self) -> bool {
        self.succeeded == self.attempted
    }
}

/// Takes an event through classification, delivery and persistence.
///
/// Delivery failures and storage failures are logged and folded into the
/// returned result; nothing here raises to the ingestion path.
#[derive(Clone)]
pub struct NotificationPipeline {
    engine: Arc<FilterEngine>,
    client: Arc<dyn DeliveryClient>,
    store: NotificationStore,
}

impl NotificationPipeline {
    pub fn new(
        engine: Arc<FilterEngine>,
        client: Arc<dyn DeliveryClient>,
        store: NotificationStore,
    ) -> Self {
        Self {
            engine,
            client,
            store,
        }
    }

    pub fn engine(&self) -> &FilterEngine {
        &self.engine
    }

    pub fn store(&self) -> &NotificationStore {
        &self.store
    }

    pub async fn process(&self, event: &NotificationEvent) -> ProcessingResult {
        let destinations = match self.engine.classify(event) {
            Classification::Ignored => {
                debug!(package = %event.package_name, "Ignoring notification");
                return ProcessingResult::Ignored;
            }
            Classification::Unmatched => Vec::new(),
            Classification::Matched(destinations) => destinations,
        };

        let payload = match event.to_payload() {
            Ok(payload) => payload,
            Err(e) => {
                error!(package = %event.package_name, error = %e, "Failed to serialize notification");
                return ProcessingResult::FailedToSend;
            }
        };

        if destinations.is_empty() {
            return self.store_undecided(event, payload).await;
        }

        let mut all_sent = true;
        for destination in destinations {
            if !self.deliver(event, &payload, destination).await {
                all_sent = false;
            }
        }

        if all_sent {
            ProcessingResult::Sent
        } else {
            ProcessingResult::FailedToSend
        }
    }

    async fn store_undecided(&self, event: &NotificationEvent, payload: String) -> ProcessingResult {
        let record = UndecidedNotificationDbModel::new(event, payload, UndecidedReason::NoMatch);
        match self.store.insert_undecided(&record).await {
            Ok(id) => {
                info!(
                    package = %event.package_name,
                    record_id = id,
                    "No destination matched, stored as undecided"
                );
                ProcessingResult::NoMatchingRules
            }
            Err(e) => {
                error!(
                    package = %event.package_name,
                    error = %e,
                    "Failed to store undecided notification"
                );
                ProcessingResult::FailedToSend
            }
        }
    }

    /// Send to one destination, recording a failed record on failure.
    async fn deliver(
        &self,
        event: &NotificationEvent,
        payload: &str,
        destination: &Destination,
    ) -> bool {
        let outcome = self.client.send(payload, &destination.url).await;
        if outcome.is_success() {
            info!(
                package = %event.package_name,
                destination = %destination.name,
                "Notification delivered"
            );
            return true;
        }

        let detail = outcome.error_detail();
        warn!(
            package = %event.package_name,
            destination = %destination.name,
            error = detail.as_deref().unwrap_or_default(),
            "Delivery failed"
        );

        let record = FailedNotificationDbModel::new(event, payload, destination, detail);
        if let Err(e) = self.store.insert_failed(&record).await {
            error!(
                package = %event.package_name,
                destination = %destination.name,
                error = %e,
                "Failed to record failed notification"
            );
        }
        false
    }

    /// Re-send a failed record's payload to its destination.
    ///
    /// On success the record is deleted. On failure it is left untouched.
    pub async fn retry_failed(&self, record: &FailedNotificationDbModel) -> bool {
        let outcome = self.client.send(&record.payload, &record.destination_url).await;
        self.settle(RecordKind::Failed, record.id, &record.destination_url, outcome)
            .await
    }

    pub async fn retry_failed_by_id(&self, id: i64) -> Result<bool> {
        let record = self.store.get_failed(id).await?;
        Ok(self.retry_failed(&record).await)
    }

    /// Retry every failed record, oldest first, one at a time.
    pub async fn retry_all_failed_summary(&self) -> Result<RetrySummary> {
        let records = self.store.list_failed().await?;
        let mut summary = RetrySummary::default();
        for record in &records {
            summary.attempted += 1;
            if self.retry_failed(record).await {
                summary.succeeded += 1;
            }
        }

        info!(
            attempted = summary.attempted,
            succeeded = summary.succeeded,
            "Retried failed notifications"
        );
        Ok(summary)
    }

    /// True iff every failed record was delivered.
    pub async fn retry_all_failed(&self) -> bool {
        match self.retry_all_failed_summary().await {
            Ok(summary) => summary.all_succeeded(),
            Err(e) => {
                error!(error = %e, "Failed to load failed notifications for retry");
                false
            }
        }
    }

    /// Send an undecided record's payload to a chosen URL.
    ///
    /// On success the record is deleted. On failure it is left untouched.
    pub async fn upload_undecided(&self, record: &UndecidedNotificationDbModel, url: &str) -> bool {
        let outcome = self.client.send(&record.payload, url).await;
        self.settle(RecordKind::Undecided, record.id, url, outcome).await
    }

    pub async fn upload_undecided_by_id(&self, id: i64, url: &str) -> Result<bool> {
        let record = self.store.get_undecided(id).await?;
        Ok(self.upload_undecided(&record, url).await)
    }

    /// Delete the record after a successful resend.
    ///
    /// A failed delete reports false so the caller may try again; the
    /// destination may then see the payload twice.
    async fn settle(&self, kind: RecordKind, id: i64, url: &str, outcome: DeliveryOutcome) -> bool {
        if !outcome.is_success() {
            debug!(
                %kind,
                record_id = id,
                destination = %url,
                error = outcome.error_detail().as_deref().unwrap_or_default(),
                "Resend failed, keeping record"
            );
            return false;
        }

        match self.store.delete(kind, id).await {
            Ok(_) => {
                info!(%kind, record_id = id, destination = %url, "Resend succeeded");
                true
            }
            Err(e) => {
                error!(
                    %kind,
                    record_id = id,
                    error = %e,
                    "Resend succeeded but the record could not be deleted"
                );
                false
            }
        }
    }

    pub async fn delete(&self, kind: RecordKind, id: i64) -> Result<bool> {
        self.store.delete(kind, id).await
    }

    pub async fn delete_many(&self, kind: RecordKind, ids: &[i64]) -> Result<u64> {
        self.store.delete_many(kind, ids).await
    }

    pub async fn delete_all(&self, kind: RecordKind) -> Result<u64> {
        self.store.delete_all(kind).await
    }

    pub async fn count(&self, kind: RecordKind) -> Result<i64> {
        self.store.count(kind).await
    }

    pub async fn list_failed(&self) -> Result<Vec<FailedNotificationDbModel>> {
        self.store.list_failed().await
    }

    pub async fn list_undecided(&self) -> Result<Vec<UndecidedNotificationDbModel>> {
        self.store.list_undecided().await
    }
}
