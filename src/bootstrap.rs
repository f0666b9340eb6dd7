//! # Marketplace Runtime Bootstrap
//!
//! Wires a running marketplace from a [`ConfigManager`]:
//!
//! - the store selected by `database.backend` (PostgreSQL also serves group membership)
//! - broadcast fan-out, plus the logging push channel when `notifications.push_enabled`
//! - the tokio scheduler with its job worker pool
//! - the periodic inactivity and overdue-offer sweeper
//!
//! The returned [`MarketplaceRuntime`] owns the background tasks and stops them on
//! [`MarketplaceRuntime::shutdown`].

use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::{ConfigManager, MarketplaceConfig, StoreBackend};
use crate::error::{MarketplaceError, MarketplaceResult};
use crate::membership::{MembershipDirectory, StaticMembership};
use crate::notifications::{
    BroadcastNotifier, LoggingPushNotifier, NotificationFanout, PushNotifier,
};
use crate::scheduler::{InactivitySweeper, JobWorker, TokioScheduler, WorkerStats};
use crate::services::{Marketplace, SystemContext};
use crate::store::{InMemoryStore, MarketplaceStore, PgStore};

/// Handle over a running marketplace and its background tasks
pub struct MarketplaceRuntime {
    marketplace: Marketplace,
    notifier: BroadcastNotifier,
    scheduler: TokioScheduler,
    worker_stats: Arc<WorkerStats>,
    config_manager: Arc<ConfigManager>,
    backend: StoreBackend,
    shutdown_sender: Option<watch::Sender<bool>>,
    tasks: Vec<JoinHandle<()>>,
}

/// Runtime status snapshot
#[derive(Debug, Clone)]
pub struct RuntimeStatus {
    pub running: bool,
    pub environment: String,
    pub backend: StoreBackend,
    pub pending_jobs: usize,
    pub notification_subscribers: usize,
    pub jobs_succeeded: u64,
    pub jobs_failed: u64,
}

impl MarketplaceRuntime {
    /// Connect the configured store and start the background tasks
    pub async fn start(config_manager: Arc<ConfigManager>) -> MarketplaceResult<Self> {
        let config = config_manager.config();
        info!(
            environment = %config_manager.environment(),
            backend = ?config.database.backend,
            "Bootstrapping marketplace runtime"
        );

        let (store, membership): (Arc<dyn MarketplaceStore>, Arc<dyn MembershipDirectory>) =
            match config.database.backend {
                StoreBackend::Memory => {
                    warn!("Using in-memory store; state is lost on shutdown");
                    (
                        Arc::new(InMemoryStore::new()),
                        Arc::new(StaticMembership::new()),
                    )
                }
                StoreBackend::Postgres => {
                    let pg = PgStore::connect(&config.database).await?;
                    if config.database.run_migrations {
                        pg.migrate().await?;
                        info!("Database migrations applied");
                    }
                    (Arc::new(pg.clone()), Arc::new(pg))
                }
            };

        Self::start_with(config_manager, store, membership)
    }

    /// Start over an existing store and membership directory
    ///
    /// Must be called inside a tokio runtime.
    pub fn start_with(
        config_manager: Arc<ConfigManager>,
        store: Arc<dyn MarketplaceStore>,
        membership: Arc<dyn MembershipDirectory>,
    ) -> MarketplaceResult<Self> {
        tokio::runtime::Handle::try_current().map_err(|_| {
            MarketplaceError::Internal("marketplace runtime needs a tokio runtime".to_string())
        })?;

        let config: Arc<MarketplaceConfig> = Arc::new(config_manager.config().clone());
        config.validate()?;

        let notifier = BroadcastNotifier::new(config.notifications.broadcast_capacity);
        let push: Option<Arc<dyn PushNotifier>> = if config.notifications.push_enabled {
            Some(Arc::new(LoggingPushNotifier))
        } else {
            None
        };
        let fanout = NotificationFanout::new(
            Arc::new(notifier.clone()),
            push,
            config.notifications.timeout(),
        );

        let (scheduler, queue) = TokioScheduler::new(config.scheduler.queue_capacity);
        let ctx = SystemContext::new(
            store,
            membership,
            fanout,
            Arc::new(scheduler.clone()),
            Arc::clone(&config),
        );
        let marketplace = Marketplace::new(ctx);
        let handler = Arc::new(marketplace.clone());

        let (shutdown_sender, shutdown_receiver) = watch::channel(false);

        let worker = JobWorker::new(handler.clone(), config.scheduler.clone());
        let worker_stats = worker.stats();
        let sweeper = InactivitySweeper::new(handler, config.lifecycle.sweep_interval());

        let tasks = vec![
            tokio::spawn(worker.run(queue, shutdown_receiver.clone())),
            tokio::spawn(sweeper.run(shutdown_receiver)),
        ];

        info!(
            workers = config.scheduler.workers,
            sweep_interval_seconds = config.lifecycle.sweep_interval_seconds,
            "Marketplace runtime started"
        );

        Ok(Self {
            marketplace,
            notifier,
            scheduler,
            worker_stats,
            backend: config.database.backend,
            config_manager,
            shutdown_sender: Some(shutdown_sender),
            tasks,
        })
    }

    /// In-memory runtime for tests and local development
    pub fn in_memory(config_manager: Arc<ConfigManager>) -> MarketplaceResult<Self> {
        Self::start_with(
            config_manager,
            Arc::new(InMemoryStore::new()),
            Arc::new(StaticMembership::new()),
        )
    }

    pub fn marketplace(&self) -> &Marketplace {
        &self.marketplace
    }

    /// Broadcast side of the fan-out, for subscribing to published notifications
    pub fn notifier(&self) -> &BroadcastNotifier {
        &self.notifier
    }

    pub fn is_running(&self) -> bool {
        self.shutdown_sender.is_some()
    }

    pub fn status(&self) -> RuntimeStatus {
        RuntimeStatus {
            running: self.is_running(),
            environment: self.config_manager.environment().to_string(),
            backend: self.backend,
            pending_jobs: self.scheduler.pending(),
            notification_subscribers: self.notifier.subscriber_count(),
            jobs_succeeded: self.worker_stats.succeeded(),
            jobs_failed: self.worker_stats.failed(),
        }
    }

    /// Stop the scheduler, signal the background tasks and wait for them to exit
    pub async fn shutdown(mut self) {
        let Some(sender) = self.shutdown_sender.take() else {
            warn!("Marketplace runtime already stopped");
            return;
        };

        self.scheduler.shutdown();
        if sender.send(true).is_err() {
            warn!("Background tasks exited before shutdown signal");
        }

        for task in self.tasks.drain(..) {
            if let Err(err) = task.await {
                warn!(error = %err, "Background task ended abnormally");
            }
        }
        info!("Marketplace runtime stopped");
    }
}
