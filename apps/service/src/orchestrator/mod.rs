/// Orchestrator module - coordinates all components
///
/// The orchestrator is the core coordinator that:
/// - Manages the lifecycle of all components
/// - Wires the stores, the monitoring cycle, retention and notifications
/// - Exposes target administration to the CLI
///
/// One shared cycle feeds the notification engine through the live feed;
/// retention runs as its own background task.
pub mod retention;
pub mod targets;

pub use retention::{RetentionCleanup, RetentionPolicy, RetentionReport};
pub use targets::{NewTarget, TargetAdmin};

use anyhow::Result;
use std::sync::Arc;
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::Config;
use crate::database::{DatabaseImpl, initialize_database};
use crate::monitoring::{CycleScheduler, ProbeExecutor};
use crate::notification::{HttpWebhookSender, NotificationEngine, WebhookSender};
use crate::pool::{LibsqlPool, open_pool};

/// Main orchestrator for the upwatch service
pub struct Orchestrator {
    config: Arc<Config>,
    database: Arc<DatabaseImpl>,
    scheduler: CycleScheduler,
    retention: Arc<RetentionCleanup>,
    notifications: Arc<NotificationEngine>,
    admin: TargetAdmin,
}

impl Orchestrator {
    /// Open the configured database and build every component
    pub async fn open(config: Config) -> Result<Self> {
        info!("Opening database at {}", config.database.path.display());
        let pool = open_pool(&config.database.path, config.database.max_connections).await?;
        Self::new(config, pool).await
    }

    /// Create a new orchestrator instance. Nothing is scheduled yet.
    pub async fn new(config: Config, pool: LibsqlPool) -> Result<Self> {
        let sender = Arc::new(HttpWebhookSender::new(config.probe_timeout())?);
        Self::with_sender(config, pool, sender).await
    }

    /// Same as [`new`](Self::new) with a custom webhook transport
    pub async fn with_sender(
        config: Config,
        pool: LibsqlPool,
        sender: Arc<dyn WebhookSender>,
    ) -> Result<Self> {
        let config = Arc::new(config);

        // Get database connection for initialization
        let conn = pool.get().await.map_err(|e| anyhow::anyhow!("Failed to get database connection: {e}"))?;

        // Initialize database schema
        info!("Initializing database schema...");
        initialize_database(&conn).await?;
        drop(conn);

        // Create database instance with pool
        let database = Arc::new(DatabaseImpl::new_from_pool(pool));

        let executor = Arc::new(ProbeExecutor::new(config.probe_timeout())?);
        let scheduler = CycleScheduler::new(
            executor,
            database.clone(),
            database.clone(),
            config.scheduler_settings(),
        );

        let retention = Arc::new(RetentionCleanup::new(database.clone(), config.retention_policy()));

        let notifications = Arc::new(NotificationEngine::new(
            database.clone(),
            database.clone(),
            database.clone(),
            sender,
            config.notification_settings(),
        ));

        let admin =
            TargetAdmin::new(database.clone(), database.clone(), scheduler.clone(), retention.clone());

        Ok(Self { config, database, scheduler, retention, notifications, admin })
    }

    pub fn admin(&self) -> &TargetAdmin {
        &self.admin
    }

    pub fn database(&self) -> &Arc<DatabaseImpl> {
        &self.database
    }

    pub fn scheduler(&self) -> &CycleScheduler {
        &self.scheduler
    }

    /// Run the orchestrator until Ctrl+C
    ///
    /// Shutdown stops the cycle driver, abandoning in-flight probes.
    pub async fn run(&self) -> Result<()> {
        info!("Starting upwatch orchestrator...");
        let tasks = self.launch();

        let result = signal::ctrl_c().await;
        info!("Ctrl+C received, shutting down");
        self.shutdown(tasks);

        if let Err(e) = result {
            error!("Failed to listen for shutdown signal: {}", e);
            return Err(e.into());
        }
        Ok(())
    }

    /// Start retention, the monitoring cycle and the notification engine
    pub fn launch(&self) -> BackgroundTasks {
        info!(
            max_history = self.config.retention.max_history,
            interval_secs = self.config.retention.cleanup_interval_secs,
            "Starting retention cleanup background task..."
        );
        let retention_handle = self.retention.start_periodic_cleanup();

        // The engine's subscription starts the shared cycle driver
        let feed = self.scheduler.subscribe();
        let notification_handle = self.notifications.clone().start(Some(feed));
        info!(
            interval_ms = self.config.monitoring.interval_ms,
            reminder_ms = self.config.notifications.reminder_interval_ms,
            "Monitoring and notifications running"
        );

        BackgroundTasks { retention: retention_handle, notifications: notification_handle }
    }

    /// Stop everything [`launch`](Self::launch) started
    pub fn shutdown(&self, tasks: BackgroundTasks) {
        self.scheduler.stop();
        tasks.notifications.abort();
        tasks.retention.abort();
        info!("Orchestrator stopped");
    }
}

/// Handles of the long-running tasks owned by the orchestrator
pub struct BackgroundTasks {
    retention: JoinHandle<()>,
    notifications: JoinHandle<()>,
}
