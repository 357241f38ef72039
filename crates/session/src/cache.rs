//! Node-local map of live transport handles.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use telemetry::metrics;

use crate::transport::TransportHandle;

struct CachedHandle {
    handle: Arc<dyn TransportHandle>,
    /// Distinguishes a re-registered session from the entry it replaced.
    generation: u64,
}

/// Live handles held by this node, keyed by session id.
///
/// Never shared across nodes. Handles are never closed while the map lock
/// is held; callers close what `insert`, `remove` and `drain` hand back.
#[derive(Default)]
pub struct LocalTransportCache {
    handles: RwLock<HashMap<String, CachedHandle>>,
    next_generation: AtomicU64,
}

impl LocalTransportCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `handle`, returning its generation and the handle it displaced.
    pub fn insert(
        &self,
        session_id: &str,
        handle: Arc<dyn TransportHandle>,
    ) -> (u64, Option<Arc<dyn TransportHandle>>) {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let mut handles = self.handles.write();
        let previous = handles
            .insert(
                session_id.to_string(),
                CachedHandle { handle, generation },
            )
            .map(|c| c.handle);
        metrics().local_sessions.set(handles.len() as u64);
        (generation, previous)
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<dyn TransportHandle>> {
        self.handles
            .read()
            .get(session_id)
            .map(|c| c.handle.clone())
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.handles.read().contains_key(session_id)
    }

    pub fn remove(&self, session_id: &str) -> Option<Arc<dyn TransportHandle>> {
        let mut handles = self.handles.write();
        let removed = handles.remove(session_id).map(|c| c.handle);
        metrics().local_sessions.set(handles.len() as u64);
        removed
    }

    /// Removes the entry only if it is still the given generation.
    ///
    /// A close hook from a replaced handle must not evict its successor.
    pub fn remove_generation(&self, session_id: &str, generation: u64) -> bool {
        let mut handles = self.handles.write();
        let matches = handles
            .get(session_id)
            .map(|c| c.generation == generation)
            .unwrap_or(false);
        if matches {
            handles.remove(session_id);
            metrics().local_sessions.set(handles.len() as u64);
        }
        matches
    }

    /// Empties the cache, returning every handle it held.
    pub fn drain(&self) -> Vec<(String, Arc<dyn TransportHandle>)> {
        let mut handles = self.handles.write();
        let drained = handles.drain().map(|(id, c)| (id, c.handle)).collect();
        metrics().local_sessions.set(0);
        drained
    }

    pub fn session_ids(&self) -> Vec<String> {
        self.handles.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.handles.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.read().is_empty()
    }
}
