//! Failed and undecided notification repositories.

use async_trait::async_trait;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use tracing::warn;

use crate::database::begin_immediate;
use crate::database::models::{FailedNotificationDbModel, UndecidedNotificationDbModel};
use crate::database::retry::retry_on_sqlite_busy;
use crate::{Error, Result};

/// Bound parameters per `DELETE ... IN (...)` statement.
const DELETE_CHUNK_SIZE: usize = 500;

/// Failed notification repository.
///
/// Listing is oldest first so bulk retries drain in FIFO order.
#[async_trait]
pub trait FailedNotificationRepository: Send + Sync {
    /// Insert a record, returning its generated id. `record.id` is ignored.
    async fn insert(&self, record: &FailedNotificationDbModel) -> Result<i64>;
    async fn get(&self, id: i64) -> Result<FailedNotificationDbModel>;
    async fn list_all(&self) -> Result<Vec<FailedNotificationDbModel>>;
    async fn count(&self) -> Result<i64>;
    /// Returns true when a row was removed.
    async fn delete(&self, id: i64) -> Result<bool>;
    async fn delete_many(&self, ids: &[i64]) -> Result<u64>;
    async fn delete_all(&self) -> Result<u64>;
}

/// Undecided notification repository.
///
/// Listing is newest first.
#[async_trait]
pub trait UndecidedNotificationRepository: Send + Sync {
    async fn insert(&self, record: &UndecidedNotificationDbModel) -> Result<i64>;
    async fn get(&self, id: i64) -> Result<UndecidedNotificationDbModel>;
    async fn list_all(&self) -> Result<Vec<UndecidedNotificationDbModel>>;
    async fn list_by_reason(&self, reason: &str) -> Result<Vec<UndecidedNotificationDbModel>>;
    async fn count(&self) -> Result<i64>;
    async fn delete(&self, id: i64) -> Result<bool>;
    async fn delete_many(&self, ids: &[i64]) -> Result<u64>;
    async fn delete_all(&self) -> Result<u64>;
}

async fn delete_by_ids(write_pool: &SqlitePool, table: &'static str, ids: &[i64]) -> Result<u64> {
    if ids.is_empty() {
        return Ok(0);
    }

    let mut tx = begin_immediate(write_pool).await?;
    match delete_chunks(&mut tx, table, ids).await {
        Ok(removed) => {
            tx.commit().await?;
            Ok(removed)
        }
        Err(e) => {
            // Dropping the transaction unfinished would close the connection,
            // and with it an in-memory database.
            if let Err(rollback_err) = tx.rollback().await {
                warn!(table, error = %rollback_err, "Failed to roll back delete");
            }
            Err(e.into())
        }
    }
}

async fn delete_chunks(
    conn: &mut SqliteConnection,
    table: &'static str,
    ids: &[i64],
) -> std::result::Result<u64, sqlx::Error> {
    let mut removed = 0u64;
    for chunk in ids.chunks(DELETE_CHUNK_SIZE) {
        let mut qb = QueryBuilder::<Sqlite>::new(format!("DELETE FROM {table} WHERE id IN ("));
        let mut separated = qb.separated(", ");
        for id in chunk {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");
        removed += qb.build().execute(&mut *conn).await?.rows_affected();
    }
    Ok(removed)
}

/// SQLx implementation of [`FailedNotificationRepository`].
pub struct SqlxFailedNotificationRepository {
    pool: SqlitePool,
    write_pool: SqlitePool,
}

impl SqlxFailedNotificationRepository {
    pub fn new(pool: SqlitePool, write_pool: SqlitePool) -> Self {
        Self { pool, write_pool }
    }
}

#[async_trait]
impl FailedNotificationRepository for SqlxFailedNotificationRepository {
    async fn insert(&self, record: &FailedNotificationDbModel) -> Result<i64> {
        retry_on_sqlite_busy("insert_failed_notification", || async {
            let result = sqlx::query(
                r#"
                INSERT INTO failed_notifications (
                    payload, destination_url, destination_name, package_name,
                    title, text, created_at, last_error
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&record.payload)
            .bind(&record.destination_url)
            .bind(&record.destination_name)
            .bind(&record.package_name)
            .bind(&record.title)
            .bind(&record.text)
            .bind(record.created_at)
            .bind(&record.last_error)
            .execute(&self.write_pool)
            .await?;
            Ok(result.last_insert_rowid())
        })
        .await
    }

    async fn get(&self, id: i64) -> Result<FailedNotificationDbModel> {
        sqlx::query_as::<_, FailedNotificationDbModel>(
            "SELECT * FROM failed_notifications WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::not_found("FailedNotification", id))
    }

    async fn list_all(&self) -> Result<Vec<FailedNotificationDbModel>> {
        let records = sqlx::query_as::<_, FailedNotificationDbModel>(
            "SELECT * FROM failed_notifications ORDER BY created_at ASC, id ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    async fn count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM failed_notifications")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        retry_on_sqlite_busy("delete_failed_notification", || async {
            let result = sqlx::query("DELETE FROM failed_notifications WHERE id = ?")
                .bind(id)
                .execute(&self.write_pool)
                .await?;
            Ok(result.rows_affected() > 0)
        })
        .await
    }

    async fn delete_many(&self, ids: &[i64]) -> Result<u64> {
        retry_on_sqlite_busy("delete_failed_notifications", || {
            delete_by_ids(&self.write_pool, "failed_notifications", ids)
        })
        .await
    }

    async fn delete_all(&self) -> Result<u64> {
        retry_on_sqlite_busy("clear_failed_notifications", || async {
            let result = sqlx::query("DELETE FROM failed_notifications")
                .execute(&self.write_pool)
                .await?;
            Ok(result.rows_affected())
        })
        .await
    }
}

/// SQLx implementation of [`UndecidedNotificationRepository`].
pub struct SqlxUndecidedNotificationRepository {
    pool: SqlitePool,
    write_pool: SqlitePool,
}

impl SqlxUndecidedNotificationRepository {
    pub fn new(pool: SqlitePool, write_pool: SqlitePool) -> Self {
        Self { pool, write_pool }
    }
}

#[async_trait]
impl UndecidedNotificationRepository for SqlxUndecidedNotificationRepository {
    async fn insert(&self, record: &UndecidedNotificationDbModel) -> Result<i64> {
        retry_on_sqlite_busy("insert_undecided_notification", || async {
            let result = sqlx::query(
                r#"
                INSERT INTO undecided_notifications (
                    payload, package_name, title, text, created_at, reason
                ) VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&record.payload)
            .bind(&record.package_name)
            .bind(&record.title)
            .bind(&record.text)
            .bind(record.created_at)
            .bind(&record.reason)
            .execute(&self.write_pool)
            .await?;
            Ok(result.last_insert_rowid())
        })
        .await
    }

    async fn get(&self, id: i64) -> Result<UndecidedNotificationDbModel> {
        sqlx::query_as::<_, UndecidedNotificationDbModel>(
            "SELECT * FROM undecided_notifications WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::not_found("UndecidedNotification", id))
    }

    async fn list_all(&self) -> Result<Vec<UndecidedNotificationDbModel>> {
        let records = sqlx::query_as::<_, UndecidedNotificationDbModel>(
            "SELECT * FROM undecided_notifications ORDER BY created_at DESC, id DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    async fn list_by_reason(&self, reason: &str) -> Result<Vec<UndecidedNotificationDbModel>> {
        let records = sqlx::query_as::<_, UndecidedNotificationDbModel>(
            r#"
            SELECT * FROM undecided_notifications
            WHERE reason = ?
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(reason)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    async fn count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM undecided_notifications")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        retry_on_sqlite_busy("delete_undecided_notification", || async {
            let result = sqlx::query("DELETE FROM undecided_notifications WHERE id = ?")
                .bind(id)
                .execute(&self.write_pool)
                .await?;
            Ok(result.rows_affected() > 0)
        })
        .await
    }

    async fn delete_many(&self, ids: &[i64]) -> Result<u64> {
        retry_on_sqlite_busy("delete_undecided_notifications", || {
            delete_by_ids(&self.write_pool, "undecided_notifications", ids)
        })
        .await
    }

    async fn delete_all(&self) -> Result<u64> {
        retry_on_sqlite_busy("clear_undecided_notifications", || async {
            let result = sqlx::query("DELETE FROM undecided_notifications")
                .execute(&self.write_pool)
                .await?;
            Ok(result.rows_affected())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use crate::database::models::UndecidedReason;
    use notification_rules::{Destination, NotificationEvent};

    async fn database() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("repo.db").display());
        let db = Database::connect(&url).await.unwrap();
        (dir, db)
    }

    fn failed(package: &str, created_at: i64) -> FailedNotificationDbModel {
        let event = NotificationEvent::new(package, created_at, 1).with_title("t");
        let destination = Destination::new("https://hooks.example.com/a", "A", vec![]);
        let mut record = FailedNotificationDbModel::new(
            &event,
            event.to_payload().unwrap(),
            &destination,
            Some("HTTP 500".to_string()),
        );
        record.created_at = created_at;
        record
    }

    fn undecided(package: &str, created_at: i64) -> UndecidedNotificationDbModel {
        let event = NotificationEvent::new(package, created_at, 1);
        let mut record = UndecidedNotificationDbModel::new(
            &event,
            event.to_payload().unwrap(),
            UndecidedReason::NoMatch,
        );
        record.created_at = created_at;
        record
    }

    #[tokio::test]
    async fn test_failed_insert_get_and_fifo_order() {
        let (_dir, db) = database().await;
        let repo = SqlxFailedNotificationRepository::new(db.pool.clone(), db.write_pool.clone());

        let newer = repo.insert(&failed("b", 2_000)).await.unwrap();
        let older = repo.insert(&failed("a", 1_000)).await.unwrap();
        assert_ne!(newer, older);

        let fetched = repo.get(older).await.unwrap();
        assert_eq!(fetched.id, older);
        assert_eq!(fetched.package_name, "a");
        assert_eq!(fetched.last_error.as_deref(), Some("HTTP 500"));

        let ids: Vec<i64> = repo.list_all().await.unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![older, newer]);
        assert_eq!(repo.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_undecided_newest_first_and_by_reason() {
        let (_dir, db) = database().await;
        let repo =
            SqlxUndecidedNotificationRepository::new(db.pool.clone(), db.write_pool.clone());

        let older = repo.insert(&undecided("a", 1_000)).await.unwrap();
        let newer = repo.insert(&undecided("b", 2_000)).await.unwrap();

        let ids: Vec<i64> = repo.list_all().await.unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![newer, older]);

        assert_eq!(repo.list_by_reason("NO_MATCH").await.unwrap().len(), 2);
        assert!(repo.list_by_reason("OTHER").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let (_dir, db) = database().await;
        let repo = SqlxFailedNotificationRepository::new(db.pool.clone(), db.write_pool.clone());
        assert!(repo.get(42).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_deletes() {
        let (_dir, db) = database().await;
        let repo = SqlxFailedNotificationRepository::new(db.pool.clone(), db.write_pool.clone());

        let mut ids = Vec::new();
        for i in 0..5 {
            ids.push(repo.insert(&failed("pkg", i)).await.unwrap());
        }

        assert!(repo.delete(ids[0]).await.unwrap());
        assert!(!repo.delete(ids[0]).await.unwrap());

        assert_eq!(repo.delete_many(&[ids[1], ids[2], 9_999]).await.unwrap(), 2);
        assert_eq!(repo.delete_many(&[]).await.unwrap(), 0);
        assert_eq!(repo.count().await.unwrap(), 2);

        assert_eq!(repo.delete_all().await.unwrap(), 2);
        assert_eq!(repo.delete_all().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete_many_spans_chunks() {
        let (_dir, db) = database().await;
        let repo =
            SqlxUndecidedNotificationRepository::new(db.pool.clone(), db.write_pool.clone());

        let mut ids = Vec::new();
        for i in 0..(DELETE_CHUNK_SIZE as i64 + 10) {
            ids.push(repo.insert(&undecided("pkg", i)).await.unwrap());
        }

        assert_eq!(repo.delete_many(&ids).await.unwrap(), ids.len() as u64);
        assert_eq!(repo.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failed_delete_many_keeps_in_memory_data() {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        let repo = SqlxFailedNotificationRepository::new(db.pool.clone(), db.write_pool.clone());

        let first = repo.insert(&failed("a", 1_000)).await.unwrap();
        let second = repo.insert(&failed("b", 2_000)).await.unwrap();
        let third = repo.insert(&failed("c", 3_000)).await.unwrap();
        sqlx::query(&format!(
            "CREATE TRIGGER keep_second BEFORE DELETE ON failed_notifications \
             WHEN OLD.id = {second} BEGIN SELECT RAISE(ABORT, 'kept'); END"
        ))
        .execute(&db.write_pool)
        .await
        .unwrap();

        assert!(repo.delete_many(&[first, second]).await.is_err());

        // Rolled back as a whole, and the database is still there.
        let ids: Vec<i64> = repo.list_all().await.unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![first, second, third]);
        assert_eq!(repo.delete_many(&[third]).await.unwrap(), 1);
        assert_eq!(repo.count().await.unwrap(), 2);
    }
}
