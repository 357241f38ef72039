//! Worker scheduler for background tasks.

use session::{SessionConfig, SessionRegistry};
use shared_store::SharedStoreRef;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::info;

use crate::cleanup::CleanupWorker;
use crate::probe::StoreProbeWorker;
use crate::retention::RetentionWorker;

/// Worker scheduler configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Local cache reconciliation interval
    pub cleanup_interval: Duration,
    /// Event retention prune interval
    pub retention_interval: Duration,
    /// Store health probe interval
    pub health_probe_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            cleanup_interval: Duration::from_secs(300),     // 5 minutes
            retention_interval: Duration::from_secs(3600),  // 1 hour
            health_probe_interval: Duration::from_secs(30), // 30 seconds
        }
    }
}

impl WorkerConfig {
    /// Defaults with the cleanup interval taken from the session settings.
    pub fn from_session_config(session: &SessionConfig) -> Self {
        Self {
            cleanup_interval: session.cleanup_interval(),
            ..Self::default()
        }
    }
}

/// Background worker scheduler.
pub struct WorkerScheduler {
    config: WorkerConfig,
    registry: SessionRegistry,
    store: SharedStoreRef,
}

impl WorkerScheduler {
    pub fn new(config: WorkerConfig, registry: SessionRegistry, store: SharedStoreRef) -> Self {
        Self {
            config,
            registry,
            store,
        }
    }

    /// Starts all background workers. Abort the returned handles to stop them.
    pub fn start(self: Arc<Self>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        let scheduler = self.clone();
        handles.push(tokio::spawn(async move {
            scheduler.run_cleanup_worker().await;
        }));

        let scheduler = self.clone();
        handles.push(tokio::spawn(async move {
            scheduler.run_retention_worker().await;
        }));

        let scheduler = self.clone();
        handles.push(tokio::spawn(async move {
            scheduler.run_store_probe().await;
        }));

        info!(
            cleanup_secs = self.config.cleanup_interval.as_secs(),
            retention_secs = self.config.retention_interval.as_secs(),
            probe_secs = self.config.health_probe_interval.as_secs(),
            "Background workers started"
        );
        handles
    }

    async fn run_cleanup_worker(&self) {
        let worker = CleanupWorker::new(self.registry.clone());
        let mut ticker = interval(self.config.cleanup_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; nothing can have expired yet
        ticker.tick().await;

        loop {
            ticker.tick().await;
            worker.run().await;
        }
    }

    async fn run_retention_worker(&self) {
        let worker = RetentionWorker::new(self.registry.clone());
        let mut ticker = interval(self.config.retention_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            worker.run().await;
        }
    }

    async fn run_store_probe(&self) {
        let worker = StoreProbeWorker::new(self.store.clone());
        let mut ticker = interval(self.config.health_probe_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            worker.run().await;
        }
    }
}
