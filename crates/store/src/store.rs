//! The store capability consumed by the registry and the event log.

use async_trait::async_trait;
use mesh_core::Result;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::StoreConfig;
use crate::memory::MemoryStore;
use crate::redis_store::RedisStore;

/// One end of a sorted-set score range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreBound {
    /// `-inf` as a minimum, `+inf` as a maximum.
    Unbounded,
    Inclusive(i64),
    Exclusive(i64),
}

impl ScoreBound {
    /// Renders the bound in Redis range syntax.
    pub fn to_redis_arg(&self, is_min: bool) -> String {
        match self {
            Self::Unbounded if is_min => "-inf".to_string(),
            Self::Unbounded => "+inf".to_string(),
            Self::Inclusive(v) => v.to_string(),
            Self::Exclusive(v) => format!("({}", v),
        }
    }

    /// Whether `score` satisfies this bound used as a minimum.
    pub fn admits_from_below(&self, score: i64) -> bool {
        match self {
            Self::Unbounded => true,
            Self::Inclusive(v) => score >= *v,
            Self::Exclusive(v) => score > *v,
        }
    }

    /// Whether `score` satisfies this bound used as a maximum.
    pub fn admits_from_above(&self, score: i64) -> bool {
        match self {
            Self::Unbounded => true,
            Self::Inclusive(v) => score <= *v,
            Self::Exclusive(v) => score < *v,
        }
    }
}

/// Networked key-value / sorted-set store shared by every node.
///
/// Each operation is individually atomic; callers compose them without
/// transactions and accept last-writer-wins.
#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Sets several hash fields at once.
    async fn hset_all(&self, key: &str, fields: &[(String, String)]) -> Result<()>;

    /// Sets one hash field.
    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()>;

    /// Reads a whole hash; empty when the key is absent.
    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>>;

    /// Adds (or re-scores) a sorted-set member.
    async fn zadd(&self, key: &str, member: &str, score: i64) -> Result<()>;

    /// Members with `min <= score <= max` (per bound kind), ascending.
    async fn zrange_by_score(
        &self,
        key: &str,
        min: ScoreBound,
        max: ScoreBound,
    ) -> Result<Vec<String>>;

    /// Removes members in the score range; returns how many were removed.
    async fn zrem_range_by_score(&self, key: &str, min: ScoreBound, max: ScoreBound)
        -> Result<u64>;

    async fn exists(&self, key: &str) -> Result<bool>;

    /// Deletes keys; returns how many existed.
    async fn del(&self, keys: &[String]) -> Result<u64>;

    /// Sets a TTL; returns false if the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Round-trip liveness check.
    async fn ping(&self) -> Result<()>;
}

/// Shared store handle.
pub type SharedStoreRef = Arc<dyn SharedStore>;

/// Connects to the store selected by `config.url`.
pub async fn connect(config: &StoreConfig) -> Result<SharedStoreRef> {
    if config.is_memory() {
        info!("Using in-process memory store (single node only)");
        return Ok(Arc::new(MemoryStore::new()));
    }

    let store = RedisStore::connect(config).await?;
    info!("Connected to shared store");
    Ok(Arc::new(store))
}
