//! Shared store health checks.

use tracing::{debug, error};

use crate::store::SharedStore;

/// Check shared store connectivity with a round-trip.
pub async fn check_connection(store: &dyn SharedStore) -> bool {
    match store.ping().await {
        Ok(()) => {
            debug!("Shared store connection healthy");
            true
        }
        Err(e) => {
            error!("Shared store ping failed: {}", e);
            false
        }
    }
}
