//! Cross-node session records plus this node's live handles.

use chrono::Utc;
use mesh_core::keys::session_key;
use mesh_core::session::fields;
use mesh_core::{
    Error, Result, SessionMetadata, StreamState, TransportKind, TransportState,
};
use shared_store::SharedStoreRef;
use std::sync::{Arc, Weak};
use std::time::Duration;
use telemetry::metrics;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::LocalTransportCache;
use crate::config::SessionConfig;
use crate::event_log::EventLog;
use crate::node::NodeIdentity;
use crate::transport::{ChannelTransport, OutboundEvent, TransportHandle};

struct RegistryInner {
    store: SharedStoreRef,
    event_log: EventLog,
    cache: LocalTransportCache,
    node: NodeIdentity,
    session_ttl: Duration,
    channel_capacity: usize,
}

/// Session registry for one node.
///
/// The shared store holds the authoritative record of every session; the
/// local cache holds only the handles this node is serving. Cheap to clone.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

impl SessionRegistry {
    pub fn new(store: SharedStoreRef, node: NodeIdentity, config: &SessionConfig) -> Self {
        let event_log = EventLog::new(store.clone(), config.event_retention());
        Self {
            inner: Arc::new(RegistryInner {
                store,
                event_log,
                cache: LocalTransportCache::new(),
                node,
                session_ttl: config.session_ttl(),
                channel_capacity: config.channel_capacity.max(1),
            }),
        }
    }

    pub fn node(&self) -> &NodeIdentity {
        &self.inner.node
    }

    pub fn event_log(&self) -> &EventLog {
        &self.inner.event_log
    }

    pub fn session_ttl(&self) -> Duration {
        self.inner.session_ttl
    }

    /// Buffer size for a handle's outbound stream.
    pub fn channel_capacity(&self) -> usize {
        self.inner.channel_capacity
    }

    /// Builds an unregistered handle for `session_id`.
    pub fn create_handle(&self, session_id: &str, kind: TransportKind) -> Arc<dyn TransportHandle> {
        Arc::new(ChannelTransport::new(
            session_id,
            kind,
            self.inner.event_log.clone(),
        ))
    }

    /// Mints a fresh session id, then registers a new handle under it.
    pub async fn open_session(
        &self,
        state: TransportState,
    ) -> Result<Arc<dyn TransportHandle>> {
        let session_id = Uuid::new_v4().to_string();
        let handle = self.create_handle(&session_id, state.kind());
        self.register(&session_id, handle.clone(), state).await?;
        Ok(handle)
    }

    /// Writes the session record, caches `handle`, and arranges the close
    /// transition for when the handle goes away.
    pub async fn register(
        &self,
        session_id: &str,
        handle: Arc<dyn TransportHandle>,
        state: TransportState,
    ) -> Result<()> {
        if handle.kind() != state.kind() {
            return Err(Error::transport_mismatch(format!(
                "handle is {} but session state is {}",
                handle.kind(),
                state.kind()
            )));
        }

        let kind = state.kind();
        let meta = SessionMetadata::new(session_id, state, self.inner.node.owner_label());
        let key = session_key(session_id);
        self.inner.store.hset_all(&key, &meta.to_fields()?).await?;
        self.inner.store.expire(&key, self.inner.session_ttl).await?;

        let (generation, previous) = self.inner.cache.insert(session_id, handle.clone());
        if let Some(previous) = previous {
            if !Arc::ptr_eq(&previous, &handle) && !previous.is_closed() {
                if let Err(e) = previous.close() {
                    warn!(session_id = session_id, error = %e, "Failed to close replaced transport");
                }
            }
        }
        self.install_close_hook(session_id, &handle, generation);

        metrics().sessions_created.inc();
        info!(
            session_id = session_id,
            kind = %kind,
            node_id = %self.inner.node.id,
            "Session registered"
        );
        Ok(())
    }

    /// On close, the handle leaves the cache and its record transitions in
    /// the background: event streams are marked disconnected, request /
    /// response sessions are forgotten.
    fn install_close_hook(
        &self,
        session_id: &str,
        handle: &Arc<dyn TransportHandle>,
        generation: u64,
    ) {
        let registry: Weak<RegistryInner> = Arc::downgrade(&self.inner);
        let weak_handle: Weak<dyn TransportHandle> = Arc::downgrade(handle);
        let session_id = session_id.to_string();
        let kind = handle.kind();

        handle.on_close(Box::new(move || {
            let Some(inner) = registry.upgrade() else {
                return;
            };
            // Replaced or already evicted; the newer entry owns the record
            if !inner.cache.remove_generation(&session_id, generation) {
                return;
            }

            let cursor = weak_handle.upgrade().and_then(|h| h.last_event_id());
            let Ok(runtime) = tokio::runtime::Handle::try_current() else {
                warn!(session_id = %session_id, "No runtime for close transition");
                return;
            };

            let registry = SessionRegistry { inner };
            runtime.spawn(async move {
                let result = match kind {
                    TransportKind::EventStream => {
                        registry
                            .mark_disconnected_with_cursor(&session_id, cursor)
                            .await
                    }
                    TransportKind::Streamable => registry.delete_record(&session_id).await,
                };
                if let Err(e) = result {
                    warn!(session_id = %session_id, error = %e, "Close transition failed");
                }
            });
        }));
    }

    /// Reads the session record. `None` covers both unknown and expired.
    pub async fn lookup(&self, session_id: &str) -> Result<Option<SessionMetadata>> {
        let map = self.inner.store.hgetall(&session_key(session_id)).await?;
        if map.is_empty() {
            return Ok(None);
        }
        let meta = SessionMetadata::from_fields(&map);
        if meta.is_none() {
            warn!(session_id = session_id, "Discarding unreadable session record");
        }
        Ok(meta)
    }

    /// Store-only existence check.
    pub async fn exists(&self, session_id: &str) -> Result<bool> {
        self.inner.store.exists(&session_key(session_id)).await
    }

    /// Renews TTL and `lastActiveAt`. Returns false, writing nothing, when
    /// the record no longer exists.
    pub async fn touch(&self, session_id: &str) -> Result<bool> {
        let key = session_key(session_id);
        if !self.inner.store.expire(&key, self.inner.session_ttl).await? {
            return Ok(false);
        }
        self.inner
            .store
            .hset(&key, fields::LAST_ACTIVE_AT, &now_millis())
            .await?;
        Ok(true)
    }

    /// Cache-only read.
    pub fn get_local_handle(&self, session_id: &str) -> Option<Arc<dyn TransportHandle>> {
        self.inner.cache.get(session_id)
    }

    /// Returns a live event-stream handle for `session_id` bound to `sink`.
    ///
    /// Reuses the local handle if there is one; otherwise rebuilds a handle
    /// under the existing id from the stored record, seeded with its last
    /// event cursor. `None` when the record is absent or not an event stream.
    ///
    /// The sink is bound with `attach_for_replay`: live sends are held until
    /// the caller has replayed from the cursor and called `end_replay`.
    pub async fn restore_stream_handle(
        &self,
        session_id: &str,
        sink: mpsc::Sender<OutboundEvent>,
    ) -> Result<Option<Arc<dyn TransportHandle>>> {
        if let Some(handle) = self.inner.cache.get(session_id) {
            if handle.kind() != TransportKind::EventStream {
                return Err(Error::transport_mismatch(format!(
                    "session {} is not an event stream",
                    session_id
                )));
            }
            handle.attach_for_replay(sink);
            return Ok(Some(handle));
        }

        let Some(meta) = self.lookup(session_id).await? else {
            return Ok(None);
        };
        if meta.kind() != TransportKind::EventStream {
            debug!(session_id = session_id, kind = %meta.kind(), "Not restorable");
            return Ok(None);
        }

        let cursor = meta.last_event_id().map(str::to_string);
        let state = StreamState {
            connected: true,
            last_event_id: cursor.clone(),
        };
        let key = session_key(session_id);
        let mut update = vec![
            (fields::STREAM_STATE.to_string(), serde_json::to_string(&state)?),
            (fields::LAST_ACTIVE_AT.to_string(), now_millis()),
        ];
        if let Some(owner) = self.inner.node.owner_label() {
            update.push((fields::OWNER_NODE.to_string(), owner));
        }
        self.inner.store.hset_all(&key, &update).await?;
        self.inner.store.expire(&key, self.inner.session_ttl).await?;

        let handle: Arc<dyn TransportHandle> = Arc::new(
            ChannelTransport::new(
                session_id,
                TransportKind::EventStream,
                self.inner.event_log.clone(),
            )
            .with_cursor(cursor),
        );
        handle.attach_for_replay(sink);

        let (generation, previous) = self.inner.cache.insert(session_id, handle.clone());
        if let Some(previous) = previous {
            if !previous.is_closed() {
                if let Err(e) = previous.close() {
                    warn!(session_id = session_id, error = %e, "Failed to close replaced transport");
                }
            }
        }
        self.install_close_hook(session_id, &handle, generation);

        metrics().sessions_restored.inc();
        info!(
            session_id = session_id,
            node_id = %self.inner.node.id,
            "Restored event stream"
        );
        Ok(Some(handle))
    }

    /// Marks an event-stream session disconnected, keeping it resumable
    /// until its TTL runs out.
    pub async fn mark_disconnected(&self, session_id: &str) -> Result<()> {
        self.mark_disconnected_with_cursor(session_id, None).await
    }

    /// Like [`mark_disconnected`](Self::mark_disconnected), also persisting
    /// the handle's last delivered event id when known.
    pub async fn mark_disconnected_with_cursor(
        &self,
        session_id: &str,
        last_event_id: Option<String>,
    ) -> Result<()> {
        let Some(meta) = self.lookup(session_id).await? else {
            debug!(session_id = session_id, "Disconnect for unknown session ignored");
            return Ok(());
        };
        if meta.kind() != TransportKind::EventStream {
            return Ok(());
        }

        let mut state = meta.transport.stream_state().cloned().unwrap_or_default();
        state.connected = false;
        if last_event_id.is_some() {
            state.last_event_id = last_event_id;
        }

        let key = session_key(session_id);
        self.inner
            .store
            .hset_all(
                &key,
                &[
                    (fields::STREAM_STATE.to_string(), serde_json::to_string(&state)?),
                    (fields::LAST_ACTIVE_AT.to_string(), now_millis()),
                ],
            )
            .await?;
        self.inner.store.expire(&key, self.inner.session_ttl).await?;

        debug!(session_id = session_id, "Marked disconnected");
        Ok(())
    }

    /// Drops the local handle and the session record. Idempotent.
    pub async fn remove(&self, session_id: &str) -> Result<()> {
        if let Some(handle) = self.inner.cache.remove(session_id) {
            if !handle.is_closed() {
                if let Err(e) = handle.close() {
                    warn!(session_id = session_id, error = %e, "Failed to close transport");
                }
            }
        }
        self.delete_record(session_id).await
    }

    async fn delete_record(&self, session_id: &str) -> Result<()> {
        let removed = self.inner.store.del(&[session_key(session_id)]).await?;
        if removed > 0 {
            metrics().sessions_removed.inc();
            info!(session_id = session_id, "Session removed");
        }
        Ok(())
    }

    /// Drops local handles whose record has expired from the store.
    /// Returns how many were dropped; store errors skip that session.
    pub async fn cleanup_expired(&self) -> usize {
        let mut dropped = 0;
        for session_id in self.inner.cache.session_ids() {
            match self.exists(&session_id).await {
                Ok(true) => {}
                Ok(false) => {
                    if let Some(handle) = self.inner.cache.remove(&session_id) {
                        if !handle.is_closed() {
                            if let Err(e) = handle.close() {
                                warn!(session_id = %session_id, error = %e, "Failed to close transport");
                            }
                        }
                        dropped += 1;
                        metrics().sessions_expired_locally.inc();
                        debug!(session_id = %session_id, "Dropped expired local handle");
                    }
                }
                Err(e) => {
                    warn!(session_id = %session_id, error = %e, "Expiry check failed");
                }
            }
        }
        dropped
    }

    /// Releases every local handle: event streams are marked disconnected
    /// first, then each handle is closed. Individual failures are logged and
    /// skipped. Returns how many handles were released.
    pub async fn shutdown(&self) -> usize {
        let handles = self.inner.cache.drain();
        let count = handles.len();

        for (session_id, handle) in handles {
            if handle.kind() == TransportKind::EventStream {
                if let Err(e) = self
                    .mark_disconnected_with_cursor(&session_id, handle.last_event_id())
                    .await
                {
                    warn!(session_id = %session_id, error = %e, "Failed to mark disconnected");
                }
            }
            if !handle.is_closed() {
                if let Err(e) = handle.close() {
                    warn!(session_id = %session_id, error = %e, "Failed to close transport");
                }
            }
        }

        info!(released = count, "Session registry shut down");
        count
    }

    /// Sessions with a live handle on this node.
    pub fn local_session_count(&self) -> usize {
        self.inner.cache.len()
    }

    /// Event Log stream ids of every handle held here. Each handle logs
    /// under its own session id, whichever transport kind it is.
    pub fn local_stream_ids(&self) -> Vec<String> {
        self.inner.cache.session_ids()
    }
}

fn now_millis() -> String {
    Utc::now().timestamp_millis().to_string()
}
