//! In-process shared store.
//!
//! Mirrors the Redis semantics the mesh relies on (hash fields, sorted sets,
//! lazy TTL expiry) for tests and single-node development. Nodes sharing one
//! `Arc<MemoryStore>` behave like a fleet sharing one Redis.

use async_trait::async_trait;
use mesh_core::{Error, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::Instant;

use crate::store::{ScoreBound, SharedStore};

#[derive(Debug)]
enum Value {
    Hash(HashMap<String, String>),
    /// Members ordered by (score, insertion sequence).
    SortedSet(Vec<SortedMember>),
}

#[derive(Debug, Clone)]
struct SortedMember {
    member: String,
    score: i64,
    seq: u64,
}

#[derive(Debug)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    next_seq: u64,
}

impl Inner {
    /// Returns the live entry for `key`, dropping it first if it expired.
    fn live(&mut self, key: &str) -> Option<&mut Entry> {
        let now = Instant::now();
        if self.entries.get(key).map(|e| e.is_expired(now)).unwrap_or(false) {
            self.entries.remove(key);
        }
        self.entries.get_mut(key)
    }

    fn hash_mut(&mut self, key: &str) -> Result<&mut HashMap<String, String>> {
        if self.live(key).is_none() {
            self.entries.insert(
                key.to_string(),
                Entry {
                    value: Value::Hash(HashMap::new()),
                    expires_at: None,
                },
            );
        }
        match self.entries.get_mut(key).map(|e| &mut e.value) {
            Some(Value::Hash(map)) => Ok(map),
            _ => Err(wrong_type(key)),
        }
    }

    fn zset_mut(&mut self, key: &str) -> Result<&mut Vec<SortedMember>> {
        if self.live(key).is_none() {
            self.entries.insert(
                key.to_string(),
                Entry {
                    value: Value::SortedSet(Vec::new()),
                    expires_at: None,
                },
            );
        }
        match self.entries.get_mut(key).map(|e| &mut e.value) {
            Some(Value::SortedSet(members)) => Ok(members),
            _ => Err(wrong_type(key)),
        }
    }
}

fn wrong_type(key: &str) -> Error {
    Error::store(format!(
        "WRONGTYPE operation against key {} holding the wrong kind of value",
        key
    ))
}

/// Shared store kept in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    /// Simulate an unreachable store if set.
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent operation fail (for error-path testing).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Relaxed);
    }

    /// Number of live keys.
    pub fn key_count(&self) -> usize {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        inner.entries.retain(|_, e| !e.is_expired(now));
        inner.entries.len()
    }

    /// Remaining TTL of a key, if it has one.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        inner
            .live(key)
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(now))
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::Relaxed) {
            return Err(Error::store("memory store marked unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl SharedStore for MemoryStore {
    async fn hset_all(&self, key: &str, fields: &[(String, String)]) -> Result<()> {
        self.check_available()?;
        let mut inner = self.inner.lock();
        let map = inner.hash_mut(key)?;
        for (field, value) in fields {
            map.insert(field.clone(), value.clone());
        }
        Ok(())
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()> {
        self.check_available()?;
        let mut inner = self.inner.lock();
        inner
            .hash_mut(key)?
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        self.check_available()?;
        let mut inner = self.inner.lock();
        match inner.live(key).map(|e| &e.value) {
            None => Ok(HashMap::new()),
            Some(Value::Hash(map)) => Ok(map.clone()),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn zadd(&self, key: &str, member: &str, score: i64) -> Result<()> {
        self.check_available()?;
        let mut inner = self.inner.lock();
        let seq = inner.next_seq;
        inner.next_seq += 1;

        let members = inner.zset_mut(key)?;
        members.retain(|m| m.member != member);
        let entry = SortedMember {
            member: member.to_string(),
            score,
            seq,
        };
        let pos = members
            .iter()
            .position(|m| (m.score, m.seq) > (entry.score, entry.seq))
            .unwrap_or(members.len());
        members.insert(pos, entry);
        Ok(())
    }

    async fn zrange_by_score(
        &self,
        key: &str,
        min: ScoreBound,
        max: ScoreBound,
    ) -> Result<Vec<String>> {
        self.check_available()?;
        let mut inner = self.inner.lock();
        match inner.live(key).map(|e| &e.value) {
            None => Ok(Vec::new()),
            Some(Value::SortedSet(members)) => Ok(members
                .iter()
                .filter(|m| min.admits_from_below(m.score) && max.admits_from_above(m.score))
                .map(|m| m.member.clone())
                .collect()),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn zrem_range_by_score(
        &self,
        key: &str,
        min: ScoreBound,
        max: ScoreBound,
    ) -> Result<u64> {
        self.check_available()?;
        let mut inner = self.inner.lock();
        let (removed, now_empty) = match inner.live(key).map(|e| &mut e.value) {
            None => return Ok(0),
            Some(Value::SortedSet(members)) => {
                let before = members.len();
                members.retain(|m| {
                    !(min.admits_from_below(m.score) && max.admits_from_above(m.score))
                });
                ((before - members.len()) as u64, members.is_empty())
            }
            Some(_) => return Err(wrong_type(key)),
        };
        // Redis drops a sorted set once its last member is gone
        if now_empty {
            inner.entries.remove(key);
        }
        Ok(removed)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.check_available()?;
        let mut inner = self.inner.lock();
        Ok(inner.live(key).is_some())
    }

    async fn del(&self, keys: &[String]) -> Result<u64> {
        self.check_available()?;
        let mut inner = self.inner.lock();
        let mut removed = 0;
        for key in keys {
            if inner.live(key).is_some() {
                inner.entries.remove(key);
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        self.check_available()?;
        let mut inner = self.inner.lock();
        match inner.live(key) {
            Some(entry) => {
                entry.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn ping(&self) -> Result<()> {
        self.check_available()
    }
}
