//! Event identifiers and the stored shape of replayable events.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU16, Ordering};
use uuid::Uuid;

/// Default event retention window (24 hours).
pub const DEFAULT_EVENT_RETENTION_SECS: u64 = 24 * 60 * 60;

/// Separator between the parts of an event id.
const ID_SEPARATOR: char = '_';

/// Length of the disambiguator.
const DISAMBIGUATOR_LEN: usize = 8;

static ID_SEQUENCE: AtomicU16 = AtomicU16::new(0);

/// Stored hash field names.
pub mod fields {
    pub const STREAM_ID: &str = "streamId";
    pub const PAYLOAD: &str = "payload";
    pub const TIMESTAMP: &str = "timestamp";
}

/// Identifier of one persisted event: `<streamId>_<timestampMs>_<random>`.
///
/// The owning stream is recoverable from the id alone.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(String);

impl EventId {
    /// Generates a fresh id for an event appended at `timestamp_ms`.
    ///
    /// The disambiguator starts with a process-wide sequence, so ids minted
    /// here within one millisecond also sort in creation order.
    pub fn generate(stream_id: &str, timestamp_ms: i64) -> Self {
        let seq = ID_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        let random = Uuid::new_v4().simple().to_string();
        Self(format!(
            "{}{sep}{}{sep}{:04x}{}",
            stream_id,
            timestamp_ms,
            seq,
            &random[..DISAMBIGUATOR_LEN - 4],
            sep = ID_SEPARATOR
        ))
    }

    /// Wraps an id received from a client without validating it.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Splits the id into `(stream_id, timestamp_ms)`.
    ///
    /// Parsing works from the right so stream ids may contain the separator.
    pub fn parse(&self) -> Option<(&str, i64)> {
        let mut parts = self.0.rsplitn(3, ID_SEPARATOR);
        let random = parts.next()?;
        let timestamp: i64 = parts.next()?.parse().ok()?;
        let stream_id = parts.next()?;

        if stream_id.is_empty() || random.is_empty() {
            return None;
        }
        Some((stream_id, timestamp))
    }

    pub fn stream_id(&self) -> Option<&str> {
        self.parse().map(|(stream, _)| stream)
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for EventId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// One persisted event as stored under `event:<eventId>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEvent {
    pub stream_id: String,
    pub payload: String,
    pub timestamp: i64,
}

impl StoredEvent {
    pub fn to_fields(&self) -> Vec<(String, String)> {
        vec![
            (fields::STREAM_ID.to_string(), self.stream_id.clone()),
            (fields::PAYLOAD.to_string(), self.payload.clone()),
            (fields::TIMESTAMP.to_string(), self.timestamp.to_string()),
        ]
    }

    pub fn from_fields(map: &HashMap<String, String>) -> Option<Self> {
        Some(Self {
            stream_id: map.get(fields::STREAM_ID)?.clone(),
            payload: map.get(fields::PAYLOAD)?.clone(),
            timestamp: map.get(fields::TIMESTAMP)?.parse().ok()?,
        })
    }
}
