//! Shared store health probe.

use shared_store::{health::check_connection, SharedStoreRef};
use telemetry::health;
use tracing::{info, warn};

/// Pings the shared store and records the outcome in the health registry.
pub struct StoreProbeWorker {
    store: SharedStoreRef,
}

impl StoreProbeWorker {
    pub fn new(store: SharedStoreRef) -> Self {
        Self { store }
    }

    /// One probe. Returns whether the store answered.
    pub async fn run(&self) -> bool {
        let was_healthy = health().store.is_healthy();
        let healthy = check_connection(self.store.as_ref()).await;

        if healthy {
            health().store.set_healthy();
            if !was_healthy {
                info!("Shared store reachable again");
            }
        } else {
            health().store.set_unhealthy("ping failed");
            if was_healthy {
                warn!("Shared store became unreachable");
            }
        }
        healthy
    }
}
