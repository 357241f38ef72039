//! Replayable per-stream event log.
//!
//! Each event lives under its own hash key; a per-stream sorted set scored by
//! timestamp turns "everything after X" into one range query.

use async_trait::async_trait;
use chrono::Utc;
use mesh_core::keys::{event_key, stream_key};
use mesh_core::{EventId, Result, StoredEvent};
use shared_store::{ScoreBound, SharedStoreRef};
use std::time::Duration;
use telemetry::metrics;
use tracing::{debug, warn};

/// Receives replayed events in order.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Delivers one event. An error skips this event only.
    async fn deliver(&self, event_id: &EventId, payload: &str) -> Result<()>;
}

/// Append / replay / prune over the shared store.
#[derive(Clone)]
pub struct EventLog {
    store: SharedStoreRef,
    retention: Duration,
}

impl EventLog {
    pub fn new(store: SharedStoreRef, retention: Duration) -> Self {
        Self { store, retention }
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Appends `payload` to `stream_id` at the current time.
    pub async fn append(&self, stream_id: &str, payload: &str) -> Result<EventId> {
        self.append_at(stream_id, payload, Utc::now().timestamp_millis())
            .await
    }

    /// Appends `payload` with an explicit timestamp (milliseconds).
    ///
    /// Extends retention of the stream index as a side effect. An id
    /// collision overwrites the earlier event.
    pub async fn append_at(
        &self,
        stream_id: &str,
        payload: &str,
        timestamp_ms: i64,
    ) -> Result<EventId> {
        let event_id = EventId::generate(stream_id, timestamp_ms);
        let event = StoredEvent {
            stream_id: stream_id.to_string(),
            payload: payload.to_string(),
            timestamp: timestamp_ms,
        };

        let ekey = event_key(event_id.as_str());
        let skey = stream_key(stream_id);

        self.store.hset_all(&ekey, &event.to_fields()).await?;
        self.store
            .zadd(&skey, event_id.as_str(), timestamp_ms)
            .await?;
        self.store.expire(&ekey, self.retention).await?;
        self.store.expire(&skey, self.retention).await?;

        metrics().events_appended.inc();
        debug!(stream_id = stream_id, event_id = %event_id, "Appended event");

        Ok(event_id)
    }

    /// Delivers every event of the cursor's stream recorded after the
    /// cursor, oldest first, awaiting each delivery. Ties on timestamp follow
    /// the stream index order.
    ///
    /// Returns the stream id, or `None` when the cursor is empty, cannot be
    /// parsed, or no longer resolves to a stored event.
    pub async fn replay_after(
        &self,
        last_event_id: &str,
        sink: &dyn EventSink,
    ) -> Result<Option<String>> {
        if last_event_id.is_empty() {
            return Ok(None);
        }

        let cursor = EventId::from_raw(last_event_id);
        let Some(stream_id) = cursor.stream_id() else {
            debug!(last_event_id = last_event_id, "Unparseable replay cursor");
            return Ok(None);
        };

        let stored = self.store.hgetall(&event_key(cursor.as_str())).await?;
        let Some(anchor) = StoredEvent::from_fields(&stored) else {
            debug!(last_event_id = last_event_id, "Replay cursor not found");
            return Ok(None);
        };
        if anchor.stream_id != stream_id {
            warn!(
                last_event_id = last_event_id,
                stored_stream = %anchor.stream_id,
                "Replay cursor belongs to another stream"
            );
            return Ok(None);
        }

        let ids = self
            .store
            .zrange_by_score(
                &stream_key(stream_id),
                ScoreBound::Inclusive(anchor.timestamp),
                ScoreBound::Unbounded,
            )
            .await?;

        // Events sharing the cursor's millisecond sort around it by index
        // order; only those after it are new
        let skip = ids
            .iter()
            .position(|id| id == cursor.as_str())
            .map_or(0, |at| at + 1);

        let mut delivered = 0u64;
        for id in ids.into_iter().skip(skip) {
            let fields = self.store.hgetall(&event_key(&id)).await?;
            let Some(event) = StoredEvent::from_fields(&fields) else {
                // Indexed but the event key already expired
                continue;
            };

            let event_id = EventId::from_raw(id);
            match sink.deliver(&event_id, &event.payload).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(
                        stream_id = stream_id,
                        event_id = %event_id,
                        error = %e,
                        "Replay delivery failed, skipping event"
                    );
                }
            }
        }

        metrics().events_replayed.inc_by(delivered);
        debug!(stream_id = stream_id, delivered = delivered, "Replay complete");

        Ok(Some(stream_id.to_string()))
    }

    /// Deletes every event of `stream_id` with timestamp strictly below
    /// `older_than_ms`. Returns how many index entries were removed.
    pub async fn prune(&self, stream_id: &str, older_than_ms: i64) -> Result<u64> {
        let skey = stream_key(stream_id);
        let cutoff = ScoreBound::Exclusive(older_than_ms);

        let ids = self
            .store
            .zrange_by_score(&skey, ScoreBound::Unbounded, cutoff)
            .await?;
        if ids.is_empty() {
            return Ok(0);
        }

        let keys: Vec<String> = ids.iter().map(|id| event_key(id)).collect();
        self.store.del(&keys).await?;
        let removed = self
            .store
            .zrem_range_by_score(&skey, ScoreBound::Unbounded, cutoff)
            .await?;

        metrics().events_pruned.inc_by(removed);
        debug!(stream_id = stream_id, removed = removed, "Pruned events");

        Ok(removed)
    }
}
