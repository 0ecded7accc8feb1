//! Notification store service.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use futures::stream;
use sqlx::ConnectOptions;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, warn};

use crate::Result;
use crate::database::Database;
use crate::database::models::{
    FailedNotificationDbModel, UndecidedNotificationDbModel, UndecidedReason,
};
use crate::database::repositories::{
    FailedNotificationRepository, SqlxFailedNotificationRepository,
    SqlxUndecidedNotificationRepository, UndecidedNotificationRepository,
};

use super::events::{RecordKind, StoreEvent, StoreEventBroadcaster};

/// Live query results: one item immediately, then one per relevant change.
pub type LiveStream<T> = Pin<Box<dyn Stream<Item = Result<T>> + Send>>;

/// How often live views check the file for commits from other processes.
pub const DEFAULT_EXTERNAL_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Durable failed and undecided record sets with change notification.
///
/// Cloning is cheap; clones share repositories and the broadcaster.
#[derive(Clone)]
pub struct NotificationStore {
    failed: Arc<dyn FailedNotificationRepository>,
    undecided: Arc<dyn UndecidedNotificationRepository>,
    events: StoreEventBroadcaster,
    external: Option<ExternalWatch>,
}

#[derive(Clone)]
struct ExternalWatch {
    options: SqliteConnectOptions,
    interval: Duration,
}

impl NotificationStore {
    pub fn new(
        failed: Arc<dyn FailedNotificationRepository>,
        undecided: Arc<dyn UndecidedNotificationRepository>,
    ) -> Self {
        Self {
            failed,
            undecided,
            events: StoreEventBroadcaster::new(),
            external: None,
        }
    }

    /// Store backed by the SQLx repositories on `db`.
    ///
    /// For file databases, live views also pick up writes made by other
    /// processes sharing the file.
    pub fn from_database(db: &Database) -> Self {
        let mut store = Self::new(
            Arc::new(SqlxFailedNotificationRepository::new(
                db.pool.clone(),
                db.write_pool.clone(),
            )),
            Arc::new(SqlxUndecidedNotificationRepository::new(
                db.pool.clone(),
                db.write_pool.clone(),
            )),
        );
        store.external = db.watch_options().map(|options| ExternalWatch {
            options: options.clone(),
            interval: DEFAULT_EXTERNAL_POLL_INTERVAL,
        });
        store
    }

    /// Change how often live views poll for external commits. No effect
    /// without a file database.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        if let Some(external) = &mut self.external {
            external.interval = interval;
        }
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    pub async fn insert_failed(&self, record: &FailedNotificationDbModel) -> Result<i64> {
        let id = self.failed.insert(record).await?;
        debug!(
            record_id = id,
            destination = %record.destination_url,
            "Recorded failed notification"
        );
        self.events
            .publish(StoreEvent::inserted(RecordKind::Failed, id));
        Ok(id)
    }

    pub async fn insert_undecided(&self, record: &UndecidedNotificationDbModel) -> Result<i64> {
        let id = self.undecided.insert(record).await?;
        debug!(
            record_id = id,
            package = %record.package_name,
            "Recorded undecided notification"
        );
        self.events
            .publish(StoreEvent::inserted(RecordKind::Undecided, id));
        Ok(id)
    }

    pub async fn get_failed(&self, id: i64) -> Result<FailedNotificationDbModel> {
        self.failed.get(id).await
    }

    pub async fn get_undecided(&self, id: i64) -> Result<UndecidedNotificationDbModel> {
        self.undecided.get(id).await
    }

    /// Oldest first.
    pub async fn list_failed(&self) -> Result<Vec<FailedNotificationDbModel>> {
        self.failed.list_all().await
    }

    /// Newest first.
    pub async fn list_undecided(&self) -> Result<Vec<UndecidedNotificationDbModel>> {
        self.undecided.list_all().await
    }

    pub async fn list_undecided_by_reason(
        &self,
        reason: UndecidedReason,
    ) -> Result<Vec<UndecidedNotificationDbModel>> {
        self.undecided.list_by_reason(reason.as_ref()).await
    }

    pub async fn count(&self, kind: RecordKind) -> Result<i64> {
        match kind {
            RecordKind::Failed => self.failed.count().await,
            RecordKind::Undecided => self.undecided.count().await,
        }
    }

    /// Delete one record. Returns false when it did not exist.
    pub async fn delete(&self, kind: RecordKind, id: i64) -> Result<bool> {
        let removed = match kind {
            RecordKind::Failed => self.failed.delete(id).await?,
            RecordKind::Undecided => self.undecided.delete(id).await?,
        };
        if removed {
            self.events.publish(StoreEvent::deleted(kind, vec![id]));
        }
        Ok(removed)
    }

    pub async fn delete_many(&self, kind: RecordKind, ids: &[i64]) -> Result<u64> {
        let removed = match kind {
            RecordKind::Failed => self.failed.delete_many(ids).await?,
            RecordKind::Undecided => self.undecided.delete_many(ids).await?,
        };
        if removed > 0 {
            self.events.publish(StoreEvent::deleted(kind, ids.to_vec()));
        }
        Ok(removed)
    }

    pub async fn delete_all(&self, kind: RecordKind) -> Result<u64> {
        let removed = match kind {
            RecordKind::Failed => self.failed.delete_all().await?,
            RecordKind::Undecided => self.undecided.delete_all().await?,
        };
        if removed > 0 {
            self.events.publish(StoreEvent::cleared(kind));
        }
        Ok(removed)
    }

    /// Live record count for `kind`.
    pub fn count_stream(&self, kind: RecordKind) -> LiveStream<i64> {
        match kind {
            RecordKind::Failed => {
                let repo = self.failed.clone();
                self.live(kind, move || {
                    let repo = repo.clone();
                    async move { repo.count().await }
                })
            }
            RecordKind::Undecided => {
                let repo = self.undecided.clone();
                self.live(kind, move || {
                    let repo = repo.clone();
                    async move { repo.count().await }
                })
            }
        }
    }

    /// Live list of failed records, oldest first.
    pub fn failed_stream(&self) -> LiveStream<Vec<FailedNotificationDbModel>> {
        let repo = self.failed.clone();
        self.live(RecordKind::Failed, move || {
            let repo = repo.clone();
            async move { repo.list_all().await }
        })
    }

    /// Live list of undecided records, newest first.
    pub fn undecided_stream(&self) -> LiveStream<Vec<UndecidedNotificationDbModel>> {
        let repo = self.undecided.clone();
        self.live(RecordKind::Undecided, move || {
            let repo = repo.clone();
            async move { repo.list_all().await }
        })
    }

    /// Re-run `query` after every change to `kind`.
    ///
    /// In-process changes arrive on the broadcaster. The subscription is
    /// taken before the first query so no change can slip in between. With
    /// a file database a side connection also polls `PRAGMA data_version`.
    /// A result equal to the last emitted one is not emitted again.
    ///
    /// The stream holds no sender, so it ends once every clone of the
    /// store is gone.
    fn live<T, Q, Fut>(&self, kind: RecordKind, query: Q) -> LiveStream<T>
    where
        T: Clone + PartialEq + Send + 'static,
        Q: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let state = LiveState {
            receiver: self.events.subscribe(),
            query,
            external: self.external.clone(),
            poller: None,
            last: None,
            started: false,
        };

        Box::pin(stream::unfold(state, move |mut state| async move {
            if !state.started {
                state.started = true;
                state.poller = match &state.external {
                    Some(watch) => match ExternalPoller::open(watch).await {
                        Ok(poller) => Some(poller),
                        Err(e) => {
                            warn!(%kind, error = %e, "External change polling unavailable");
                            None
                        }
                    },
                    None => None,
                };
                let value = (state.query)().await;
                state.last = value.as_ref().ok().cloned();
                return Some((value, state));
            }

            loop {
                tokio::select! {
                    event = state.receiver.recv() => match event {
                        Ok(event) if event.kind == kind => {}
                        Ok(_) => continue,
                        Err(RecvError::Lagged(skipped)) => {
                            debug!(%kind, skipped, "Live view lagged, re-querying");
                        }
                        Err(RecvError::Closed) => return None,
                    },
                    _ = ExternalPoller::tick(&mut state.poller) => {
                        let Some(poller) = state.poller.as_mut() else {
                            continue;
                        };
                        match poller.changed().await {
                            Ok(true) => {}
                            Ok(false) => continue,
                            Err(e) => {
                                warn!(%kind, error = %e, "External change polling failed, disabling");
                                state.poller = None;
                                continue;
                            }
                        }
                    }
                }

                let value = (state.query)().await;
                if value.is_ok() && value.as_ref().ok() == state.last.as_ref() {
                    continue;
                }
                state.last = value.as_ref().ok().cloned();
                return Some((value, state));
            }
        }))
    }
}

struct LiveState<T, Q> {
    receiver: broadcast::Receiver<StoreEvent>,
    query: Q,
    external: Option<ExternalWatch>,
    poller: Option<ExternalPoller>,
    last: Option<T>,
    started: bool,
}

/// Read-only side connection watching `PRAGMA data_version`, which moves
/// whenever any other connection commits to the file.
struct ExternalPoller {
    conn: SqliteConnection,
    version: i64,
    ticker: Interval,
}

impl ExternalPoller {
    async fn open(watch: &ExternalWatch) -> Result<Self> {
        let mut conn = watch.options.connect().await?;
        let version = data_version(&mut conn).await?;
        let start = tokio::time::Instant::now() + watch.interval;
        let mut ticker = tokio::time::interval_at(start, watch.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Ok(Self {
            conn,
            version,
            ticker,
        })
    }

    /// Next poll tick; pending forever without a poller.
    async fn tick(poller: &mut Option<Self>) {
        match poller {
            Some(poller) => {
                poller.ticker.tick().await;
            }
            None => std::future::pending().await,
        }
    }

    async fn changed(&mut self) -> Result<bool> {
        let version = data_version(&mut self.conn).await?;
        let changed = version != self.version;
        self.version = version;
        Ok(changed)
    }
}

async fn data_version(conn: &mut SqliteConnection) -> Result<i64> {
    Ok(sqlx::query_scalar::<_, i64>("PRAGMA data_version")
        .fetch_one(&mut *conn)
        .await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreChange;
    use futures::StreamExt;
    use notification_rules::{Destination, NotificationEvent};
    use std::time::Duration;

    async fn store() -> (tempfile::TempDir, NotificationStore) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("store.db").display());
        let db = Database::connect(&url).await.unwrap();
        (dir, NotificationStore::from_database(&db))
    }

    fn failed_record() -> FailedNotificationDbModel {
        let event = NotificationEvent::new("com.slack", 1, 1);
        FailedNotificationDbModel::new(
            &event,
            event.to_payload().unwrap(),
            &Destination::new("https://hooks.example.com/slack", "Slack", vec![]),
            Some("HTTP 503".to_string()),
        )
    }

    fn undecided_record() -> UndecidedNotificationDbModel {
        let event = NotificationEvent::new("com.unknown.app", 1, 1);
        UndecidedNotificationDbModel::new(
            &event,
            event.to_payload().unwrap(),
            UndecidedReason::NoMatch,
        )
    }

    #[tokio::test]
    async fn test_mutations_publish_events() {
        let (_dir, store) = store().await;
        let mut events = store.subscribe();

        let id = store.insert_failed(&failed_record()).await.unwrap();
        assert_eq!(
            events.recv().await.unwrap(),
            StoreEvent::inserted(RecordKind::Failed, id)
        );

        assert!(store.delete(RecordKind::Failed, id).await.unwrap());
        assert_eq!(
            events.recv().await.unwrap().change,
            StoreChange::Deleted(vec![id])
        );

        // Nothing removed, nothing published.
        assert!(!store.delete(RecordKind::Failed, id).await.unwrap());
        assert_eq!(store.delete_all(RecordKind::Failed).await.unwrap(), 0);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_kinds_are_independent() {
        let (_dir, store) = store().await;
        store.insert_failed(&failed_record()).await.unwrap();
        let undecided = store.insert_undecided(&undecided_record()).await.unwrap();

        assert_eq!(store.count(RecordKind::Failed).await.unwrap(), 1);
        assert_eq!(store.count(RecordKind::Undecided).await.unwrap(), 1);

        assert_eq!(store.delete_all(RecordKind::Failed).await.unwrap(), 1);
        assert_eq!(store.count(RecordKind::Failed).await.unwrap(), 0);
        assert_eq!(store.get_undecided(undecided).await.unwrap().id, undecided);
        assert_eq!(
            store
                .list_undecided_by_reason(UndecidedReason::NoMatch)
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_count_stream_follows_changes() {
        let (_dir, store) = store().await;
        let mut counts = store.count_stream(RecordKind::Failed);

        assert_eq!(counts.next().await.unwrap().unwrap(), 0);

        let first = store.insert_failed(&failed_record()).await.unwrap();
        assert_eq!(counts.next().await.unwrap().unwrap(), 1);

        // Undecided changes do not wake the failed view.
        store.insert_undecided(&undecided_record()).await.unwrap();
        store.insert_failed(&failed_record()).await.unwrap();
        assert_eq!(counts.next().await.unwrap().unwrap(), 2);

        store.delete(RecordKind::Failed, first).await.unwrap();
        assert_eq!(counts.next().await.unwrap().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_list_stream_emits_ordered_records() {
        let (_dir, store) = store().await;
        let mut lists = store.undecided_stream();
        assert!(lists.next().await.unwrap().unwrap().is_empty());

        let older = store.insert_undecided(&undecided_record()).await.unwrap();
        assert_eq!(lists.next().await.unwrap().unwrap().len(), 1);

        let mut newer_record = undecided_record();
        newer_record.created_at += 1_000;
        let newer = store.insert_undecided(&newer_record).await.unwrap();
        let ids: Vec<i64> = lists
            .next()
            .await
            .unwrap()
            .unwrap()
            .iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec![newer, older]);
    }

    #[tokio::test]
    async fn test_stream_ends_when_store_dropped() {
        let (_dir, store) = store().await;
        let mut counts = store.count_stream(RecordKind::Undecided);
        assert_eq!(counts.next().await.unwrap().unwrap(), 0);

        drop(store);
        let next = tokio::time::timeout(Duration::from_secs(5), counts.next())
            .await
            .unwrap();
        assert!(next.is_none());
    }

    #[tokio::test]
    async fn test_count_stream_sees_writes_from_other_handles() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("store.db").display());
        let watcher = NotificationStore::from_database(&Database::connect(&url).await.unwrap())
            .with_poll_interval(Duration::from_millis(50));
        let writer = NotificationStore::from_database(&Database::connect(&url).await.unwrap());

        let mut counts = watcher.count_stream(RecordKind::Undecided);
        assert_eq!(counts.next().await.unwrap().unwrap(), 0);

        writer.insert_undecided(&undecided_record()).await.unwrap();
        let next = tokio::time::timeout(Duration::from_secs(5), counts.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(next, 1);

        writer.delete_all(RecordKind::Undecided).await.unwrap();
        let next = tokio::time::timeout(Duration::from_secs(5), counts.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(next, 0);
    }

    #[tokio::test]
    async fn test_unchanged_results_are_not_repeated() {
        let (_dir, store) = store().await;
        let store = store.with_poll_interval(Duration::from_millis(20));
        let mut counts = store.count_stream(RecordKind::Failed);
        assert_eq!(counts.next().await.unwrap().unwrap(), 0);

        // Only undecided rows change; the failed count stays put even
        // though the file's data version moves.
        store.insert_undecided(&undecided_record()).await.unwrap();
        let quiet = tokio::time::timeout(Duration::from_millis(300), counts.next()).await;
        assert!(quiet.is_err());

        store.insert_failed(&failed_record()).await.unwrap();
        assert_eq!(counts.next().await.unwrap().unwrap(), 1);
    }
}
