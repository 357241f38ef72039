//! Reconciles the local transport cache with the shared store.

use session::SessionRegistry;
use tracing::{debug, info};

/// Drops local handles for sessions the store no longer knows about.
pub struct CleanupWorker {
    registry: SessionRegistry,
}

impl CleanupWorker {
    pub fn new(registry: SessionRegistry) -> Self {
        Self { registry }
    }

    /// One sweep. Returns how many local handles were dropped.
    pub async fn run(&self) -> usize {
        let held = self.registry.local_session_count();
        let dropped = self.registry.cleanup_expired().await;

        if dropped > 0 {
            info!(dropped = dropped, held = held, "Dropped expired local sessions");
        } else {
            debug!(held = held, "Cleanup sweep found nothing to drop");
        }
        dropped
    }
}
