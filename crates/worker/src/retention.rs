//! Retention worker for the Event Log.
//!
//! Stream keys already carry a retention TTL, so an idle stream disappears on
//! its own. Busy streams keep refreshing that TTL and would grow without
//! bound, so their old entries are pruned here. Only streams this node holds
//! a handle for are visited; there is no cluster-wide stream listing.

use chrono::Utc;
use session::SessionRegistry;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Totals for one retention pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionReport {
    pub streams: usize,
    pub pruned: u64,
    pub failed: usize,
}

/// Worker that prunes events older than the retention window.
pub struct RetentionWorker {
    registry: SessionRegistry,
}

impl RetentionWorker {
    pub fn new(registry: SessionRegistry) -> Self {
        Self { registry }
    }

    /// Run retention enforcement across every locally held stream.
    pub async fn run(&self) -> RetentionReport {
        self.run_at(Utc::now().timestamp_millis()).await
    }

    /// Same as [`run`](Self::run) with an explicit clock reading.
    pub async fn run_at(&self, now_ms: i64) -> RetentionReport {
        let event_log = self.registry.event_log();
        let cutoff = calculate_cutoff_ms(now_ms, event_log.retention());

        let mut report = RetentionReport::default();
        for stream_id in self.registry.local_stream_ids() {
            report.streams += 1;
            match event_log.prune(&stream_id, cutoff).await {
                Ok(removed) => report.pruned += removed,
                Err(e) => {
                    report.failed += 1;
                    warn!(stream_id = %stream_id, error = %e, "Failed to enforce retention");
                }
            }
        }

        if report.pruned > 0 {
            info!(
                streams = report.streams,
                pruned = report.pruned,
                failed = report.failed,
                cutoff_ms = cutoff,
                "Retention pass complete"
            );
        } else {
            debug!(streams = report.streams, cutoff_ms = cutoff, "Nothing to prune");
        }
        report
    }
}

/// Events with a timestamp strictly below the returned value are dropped.
fn calculate_cutoff_ms(now_ms: i64, retention: Duration) -> i64 {
    let retention_ms = i64::try_from(retention.as_millis()).unwrap_or(i64::MAX);
    now_ms.saturating_sub(retention_ms)
}
