//! Internal metrics collection.
//!
//! Lock-free counters updated on the hot path and snapshotted by the
//! metrics logger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// A counter metric.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_by(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// A gauge metric (can go up or down).
#[derive(Debug, Default)]
pub struct Gauge(AtomicU64);

impl Gauge {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn set(&self, val: u64) {
        self.0.store(val, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Histogram for latency tracking.
#[derive(Debug)]
pub struct Histogram {
    /// Buckets: 1ms, 5ms, 10ms, 25ms, 50ms, 100ms, 250ms, 500ms, 1s, 5s, 10s
    buckets: [AtomicU64; 11],
    sum: AtomicU64,
    count: AtomicU64,
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

impl Histogram {
    const BUCKET_BOUNDS: [u64; 11] = [1, 5, 10, 25, 50, 100, 250, 500, 1000, 5000, 10000];

    pub fn new() -> Self {
        Self {
            buckets: Default::default(),
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    /// Records a value in milliseconds.
    pub fn observe(&self, ms: u64) {
        self.sum.fetch_add(ms, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);

        let idx = Self::BUCKET_BOUNDS
            .iter()
            .position(|&bound| ms <= bound)
            .unwrap_or(Self::BUCKET_BOUNDS.len() - 1);
        self.buckets[idx].fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn mean(&self) -> f64 {
        let count = self.count();
        if count == 0 {
            0.0
        } else {
            self.sum.load(Ordering::Relaxed) as f64 / count as f64
        }
    }

    /// Returns (upper bound, count) per bucket.
    pub fn buckets(&self) -> Vec<(u64, u64)> {
        Self::BUCKET_BOUNDS
            .iter()
            .zip(self.buckets.iter())
            .map(|(&bound, count)| (bound, count.load(Ordering::Relaxed)))
            .collect()
    }
}

/// Collected metrics for the session mesh.
#[derive(Debug, Default)]
pub struct Metrics {
    // Session lifecycle
    pub sessions_created: Counter,
    pub sessions_restored: Counter,
    pub sessions_removed: Counter,
    pub sessions_expired_locally: Counter,

    // Routing
    pub requests_served_locally: Counter,
    pub requests_forwarded: Counter,
    pub forward_errors: Counter,

    // Event log
    pub events_appended: Counter,
    pub events_replayed: Counter,
    pub events_pruned: Counter,

    // Shared store
    pub store_errors: Counter,

    // Latency histograms
    pub forward_latency_ms: Histogram,
    pub store_latency_ms: Histogram,

    // Gauges
    pub local_sessions: Gauge,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes a snapshot of current metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            timestamp: Utc::now(),
            sessions_created: self.sessions_created.get(),
            sessions_restored: self.sessions_restored.get(),
            sessions_removed: self.sessions_removed.get(),
            sessions_expired_locally: self.sessions_expired_locally.get(),
            requests_served_locally: self.requests_served_locally.get(),
            requests_forwarded: self.requests_forwarded.get(),
            forward_errors: self.forward_errors.get(),
            events_appended: self.events_appended.get(),
            events_replayed: self.events_replayed.get(),
            events_pruned: self.events_pruned.get(),
            store_errors: self.store_errors.get(),
            forward_latency_mean_ms: self.forward_latency_ms.mean(),
            store_latency_mean_ms: self.store_latency_ms.mean(),
            local_sessions: self.local_sessions.get(),
        }
    }
}

/// A snapshot of metrics at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub sessions_created: u64,
    pub sessions_restored: u64,
    pub sessions_removed: u64,
    pub sessions_expired_locally: u64,
    pub requests_served_locally: u64,
    pub requests_forwarded: u64,
    pub forward_errors: u64,
    pub events_appended: u64,
    pub events_replayed: u64,
    pub events_pruned: u64,
    pub store_errors: u64,
    pub forward_latency_mean_ms: f64,
    pub store_latency_mean_ms: f64,
    pub local_sessions: u64,
}

/// Global metrics registry.
pub static METRICS: std::sync::LazyLock<Metrics> = std::sync::LazyLock::new(Metrics::new);

/// Get the global metrics instance.
pub fn metrics() -> &'static Metrics {
    &METRICS
}
