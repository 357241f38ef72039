//! Redis-backed shared store.

use async_trait::async_trait;
use mesh_core::{Error, Result};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::future::Future;
use std::time::{Duration, Instant};
use telemetry::metrics;
use tracing::{debug, warn};

use crate::config::StoreConfig;
use crate::store::{ScoreBound, SharedStore};

/// Shared store over a Redis connection manager.
///
/// The manager multiplexes one connection and reconnects on failure;
/// cloning it per call is cheap.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    timeout: Duration,
}

impl RedisStore {
    /// Opens a managed connection to `config.url`.
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let client = redis::Client::open(config.url.as_str())
            .map_err(|e| Error::store(format!("Invalid store URL: {}", e)))?;

        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| Error::store(format!("Failed to connect to store: {}", e)))?;

        Ok(Self {
            conn,
            timeout: Duration::from_millis(config.timeout_ms),
        })
    }

    /// Runs one command with the configured timeout and latency tracking.
    async fn run<T, F>(&self, op: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        let start = Instant::now();
        let result = tokio::time::timeout(self.timeout, fut).await;
        metrics()
            .store_latency_ms
            .observe(start.elapsed().as_millis() as u64);

        match result {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                metrics().store_errors.inc();
                warn!(op = op, error = %e, "Store command failed");
                Err(Error::store(format!("{} failed: {}", op, e)))
            }
            Err(_) => {
                metrics().store_errors.inc();
                warn!(op = op, timeout_ms = self.timeout.as_millis() as u64, "Store command timed out");
                Err(Error::store(format!("{} timed out", op)))
            }
        }
    }
}

#[async_trait]
impl SharedStore for RedisStore {
    async fn hset_all(&self, key: &str, fields: &[(String, String)]) -> Result<()> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        self.run("HSET", async move {
            let _: () = conn.hset_multiple(key, fields).await?;
            Ok(())
        })
        .await
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        self.run("HSET", async move {
            let _: () = conn.hset(key, field, value).await?;
            Ok(())
        })
        .await
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        let mut conn = self.conn.clone();
        self.run("HGETALL", async move { conn.hgetall(key).await })
            .await
    }

    async fn zadd(&self, key: &str, member: &str, score: i64) -> Result<()> {
        let mut conn = self.conn.clone();
        self.run("ZADD", async move {
            let _: () = conn.zadd(key, member, score).await?;
            Ok(())
        })
        .await
    }

    async fn zrange_by_score(
        &self,
        key: &str,
        min: ScoreBound,
        max: ScoreBound,
    ) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let (min, max) = (min.to_redis_arg(true), max.to_redis_arg(false));
        debug!(key = key, min = %min, max = %max, "ZRANGEBYSCORE");
        self.run("ZRANGEBYSCORE", async move {
            conn.zrangebyscore(key, min, max).await
        })
        .await
    }

    async fn zrem_range_by_score(
        &self,
        key: &str,
        min: ScoreBound,
        max: ScoreBound,
    ) -> Result<u64> {
        let mut conn = self.conn.clone();
        let (min, max) = (min.to_redis_arg(true), max.to_redis_arg(false));
        self.run("ZREMRANGEBYSCORE", async move {
            conn.zrembyscore(key, min, max).await
        })
        .await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        self.run("EXISTS", async move { conn.exists(key).await })
            .await
    }

    async fn del(&self, keys: &[String]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        self.run("DEL", async move { conn.del(keys).await }).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        let secs = ttl.as_secs().max(1);
        self.run("EXPIRE", async move {
            redis::cmd("EXPIRE")
                .arg(key)
                .arg(secs)
                .query_async(&mut conn)
                .await
        })
        .await
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        self.run("PING", async move {
            let _: String = redis::cmd("PING").query_async(&mut conn).await?;
            Ok(())
        })
        .await
    }
}
