//! Service container holding the engine's long-lived services.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::Result;
use crate::channel::PushChannel;
use crate::config::EngineConfig;
use crate::database::{self, DbPool};
use crate::dispatch::{PollingWorkerPool, PushDispatcher};
use crate::render::ContentProducer;
use crate::service::NotifyService;
use crate::store::{NotificationStore, PreferencesStore, SqliteStore};

/// Default timeout for graceful shutdown.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Owns the dispatcher, the service facade and the worker pool.
pub struct ServiceContainer {
    config: EngineConfig,
    dispatcher: Arc<PushDispatcher>,
    service: Arc<NotifyService>,
    worker_pool: Arc<PollingWorkerPool>,
    pool: Option<DbPool>,
    cancellation_token: CancellationToken,
}

impl ServiceContainer {
    /// Wire the services over the given stores. Enqueues wake the worker pool.
    pub fn new(
        config: EngineConfig,
        notifications: Arc<dyn NotificationStore>,
        preferences: Arc<dyn PreferencesStore>,
        producer: Arc<dyn ContentProducer>,
        channels: Vec<Arc<dyn PushChannel>>,
    ) -> Result<Self> {
        config.validate()?;
        Self::wire(config, notifications, preferences, producer, channels)
    }

    fn wire(
        config: EngineConfig,
        notifications: Arc<dyn NotificationStore>,
        preferences: Arc<dyn PreferencesStore>,
        producer: Arc<dyn ContentProducer>,
        channels: Vec<Arc<dyn PushChannel>>,
    ) -> Result<Self> {
        let mut builder = PushDispatcher::builder()
            .config(config.dispatch_config()?)
            .notification_store(notifications)
            .preferences_store(preferences)
            .content_producer(producer);
        for channel in channels {
            builder = builder.push_channel(channel);
        }
        let dispatcher = Arc::new(builder.build()?);

        let cancellation_token = CancellationToken::new();
        let worker_pool = Arc::new(PollingWorkerPool::with_cancellation_token(
            dispatcher.clone(),
            config.worker_pool_config(),
            cancellation_token.child_token(),
        ));
        let service = Arc::new(NotifyService::new(dispatcher.clone()));
        service.add_enqueue_listener(worker_pool.enqueue_listener());

        Ok(Self {
            config,
            dispatcher,
            service,
            worker_pool,
            pool: None,
            cancellation_token,
        })
    }

    /// Open the configured SQLite database, migrate it and wire the services
    /// over it.
    pub async fn with_sqlite(
        config: EngineConfig,
        producer: Arc<dyn ContentProducer>,
        channels: Vec<Arc<dyn PushChannel>>,
    ) -> Result<Self> {
        config.validate()?;

        let pool = database::init_pool(&config.database_url).await?;
        database::run_migrations(&pool).await?;
        info!("Database ready at {}", config.database_url);

        let store = Arc::new(SqliteStore::new(pool.clone()));
        let mut container = Self::wire(config, store.clone(), store, producer, channels)?;
        container.pool = Some(pool);
        Ok(container)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Arc<PushDispatcher> {
        &self.dispatcher
    }

    pub fn service(&self) -> &Arc<NotifyService> {
        &self.service
    }

    pub fn worker_pool(&self) -> &Arc<PollingWorkerPool> {
        &self.worker_pool
    }

    /// Start the worker pool.
    pub fn start(&self) {
        info!(
            channels = self.dispatcher.push_channels().len(),
            workers = self.worker_pool.worker_count(),
            "Starting notification services"
        );
        self.worker_pool.start();
    }

    /// Gracefully shutdown all services.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_with_timeout(DEFAULT_SHUTDOWN_TIMEOUT).await
    }

    /// Shutdown with a custom timeout for the workers to finish their
    /// current attempt.
    pub async fn shutdown_with_timeout(&self, timeout: Duration) -> Result<()> {
        info!("Shutting down services (timeout: {:?})", timeout);
        self.cancellation_token.cancel();

        if tokio::time::timeout(timeout, self.worker_pool.shutdown())
            .await
            .is_err()
        {
            warn!("Shutdown timeout reached, forcing shutdown");
        }

        if let Some(pool) = &self.pool {
            info!("Closing database pool...");
            pool.close().await;
        }

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
}
