//! Service container.
//!
//! Builds the database, store, filter engine, delivery client, pipeline
//! and listener from an [`AppConfig`] and owns their shutdown.

use std::sync::Arc;
use std::time::Duration;

use notification_rules::FilterEngine;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::Result;
use crate::config::AppConfig;
use crate::database::Database;
use crate::delivery::{DeliveryClient, WebhookClient, WebhookClientConfig};
use crate::ingest::NotificationListener;
use crate::pipeline::NotificationPipeline;
use crate::store::{NotificationStore, RecordKind};

/// Default shutdown timeout.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Record counts for status output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ServiceStats {
    pub failed: i64,
    pub undecided: i64,
}

/// Service container holding all application services.
pub struct ServiceContainer {
    /// Database pools.
    pub database: Database,
    /// Failed/undecided record store.
    pub store: NotificationStore,
    /// Compiled rule set.
    pub engine: Arc<FilterEngine>,
    /// Processing pipeline.
    pub pipeline: Arc<NotificationPipeline>,
    /// Listener feeding the pipeline.
    pub listener: Arc<NotificationListener>,
    /// Cancellation token for graceful shutdown.
    cancellation_token: CancellationToken,
}

impl ServiceContainer {
    /// Build every service with the webhook client described by `config`.
    pub async fn initialize(config: &AppConfig) -> Result<Self> {
        let client = WebhookClient::new(&WebhookClientConfig::with_timeout(config.webhook_timeout))?;
        Self::with_client(config, Arc::new(client)).await
    }

    /// Build every service around a caller-provided delivery client.
    pub async fn with_client(config: &AppConfig, client: Arc<dyn DeliveryClient>) -> Result<Self> {
        info!("Initializing service container");

        let rules = config.load_rules()?;
        let engine = Arc::new(FilterEngine::new(rules));
        info!(
            destinations = engine.config().destinations().len(),
            ignored = engine.config().ignore_list().len(),
            "Rules loaded"
        );

        let database = Database::connect(&config.database_url).await?;
        let store = NotificationStore::from_database(&database);

        let pipeline = Arc::new(NotificationPipeline::new(
            engine.clone(),
            client,
            store.clone(),
        ));
        let listener = Arc::new(NotificationListener::new(pipeline.clone())?);

        info!("Service container initialized");

        Ok(Self {
            database,
            store,
            engine,
            pipeline,
            listener,
            cancellation_token: CancellationToken::new(),
        })
    }

    /// Shutdown all services gracefully.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_with_timeout(DEFAULT_SHUTDOWN_TIMEOUT).await
    }

    /// Shutdown all services gracefully with a custom timeout.
    ///
    /// In-flight notifications are cancelled; a send cut short here is
    /// not recorded anywhere.
    pub async fn shutdown_with_timeout(&self, timeout: Duration) -> Result<()> {
        info!("Shutting down services (timeout: {:?})", timeout);

        self.cancellation_token.cancel();

        if tokio::time::timeout(timeout, self.listener.shutdown())
            .await
            .is_err()
        {
            warn!("Shutdown timeout reached, forcing shutdown");
        }

        info!("Closing database pools...");
        self.database.close().await;

        info!("Services shut down");
        Ok(())
    }

    /// Get the cancellation token for external use.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Check if shutdown has been requested.
    pub fn is_shutting_down(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    pub async fn stats(&self) -> Result<ServiceStats> {
        Ok(ServiceStats {
            failed: self.store.count(RecordKind::Failed).await?,
            undecided: self.store.count(RecordKind::Undecided).await?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::DeliveryOutcome;
    use crate::ingest::{EXTRA_TITLE, RawNotification};
    use async_trait::async_trait;

    struct RejectingClient;

    #[async_trait]
    impl DeliveryClient for RejectingClient {
        async fn send(&self, _payload: &str, _url: &str) -> DeliveryOutcome {
            DeliveryOutcome::HttpFailure { status: 503 }
        }
    }

    fn config(dir: &tempfile::TempDir) -> AppConfig {
        AppConfig {
            database_url: format!("sqlite://{}?mode=rwc", dir.path().join("relay.db").display()),
            log_dir: dir.path().join("logs"),
            ..AppConfig::default()
        }
    }

    #[tokio::test]
    async fn test_initialize_with_builtin_rules() {
        let dir = tempfile::tempdir().unwrap();
        let container = ServiceContainer::initialize(&config(&dir)).await.unwrap();

        assert_eq!(container.engine.config().destinations().len(), 3);
        assert_eq!(
            container.stats().await.unwrap(),
            ServiceStats { failed: 0, undecided: 0 }
        );

        container.shutdown().await.unwrap();
        assert!(container.is_shutting_down());
        assert!(!container.listener.is_running());
    }

    #[tokio::test]
    async fn test_listener_records_outcomes() {
        let dir = tempfile::tempdir().unwrap();
        let container = ServiceContainer::with_client(&config(&dir), Arc::new(RejectingClient))
            .await
            .unwrap();

        // Matches the built-in Slack destination; the client rejects it.
        let slack = RawNotification::new("com.slack", 1_700_000_000_000, 1)
            .with_extra(EXTRA_TITLE, "general");
        // Nothing matches.
        let unknown = RawNotification::new("org.example.unknown", 1_700_000_000_000, 2);
        // Ignored outright.
        let systemui = RawNotification::new("com.android.systemui", 1_700_000_000_000, 3);

        for raw in [&slack, &unknown, &systemui] {
            assert!(container.listener.on_notification_posted(raw));
        }
        container.listener.drain().await;

        assert_eq!(
            container.stats().await.unwrap(),
            ServiceStats { failed: 1, undecided: 1 }
        );

        container.shutdown().await.unwrap();
    }
}
