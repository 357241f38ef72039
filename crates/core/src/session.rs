//! Session metadata shared by every node through the store.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Session TTL in the reference deployment (30 minutes).
pub const DEFAULT_SESSION_TTL_SECS: u64 = 30 * 60;

/// Stored hash field names.
pub mod fields {
    pub const SESSION_ID: &str = "sessionId";
    pub const TRANSPORT_TYPE: &str = "transportType";
    pub const OWNER_NODE: &str = "ownerNode";
    pub const CREATED_AT: &str = "createdAt";
    pub const LAST_ACTIVE_AT: &str = "lastActiveAt";
    pub const STREAM_STATE: &str = "streamState";
    pub const REQUEST_STATE: &str = "requestState";
}

/// Kind of connection a session was opened with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportKind {
    /// Request/response transport; replies travel in the HTTP response.
    #[serde(rename = "stream")]
    Streamable,
    /// Long-lived server-push stream.
    #[serde(rename = "event-stream")]
    EventStream,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Streamable => "stream",
            Self::EventStream => "event-stream",
        }
    }

    /// Whether a handle of this kind can be rebuilt on another node.
    pub fn is_restorable(&self) -> bool {
        matches!(self, Self::EventStream)
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stream" => Ok(Self::Streamable),
            "event-stream" => Ok(Self::EventStream),
            other => Err(Error::malformed(format!("unknown transport type: {}", other))),
        }
    }
}

/// Connection state of an event-stream session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamState {
    pub connected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_event_id: Option<String>,
}

impl Default for StreamState {
    fn default() -> Self {
        Self {
            connected: true,
            last_event_id: None,
        }
    }
}

/// Negotiated state of a request/response session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol_version: Option<String>,
}

/// Transport-specific sub-state. `None` means the stored blob was absent or
/// could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportState {
    Streamable(Option<RequestState>),
    EventStream(Option<StreamState>),
}

impl TransportState {
    /// Fresh state for a newly opened event stream.
    pub fn event_stream() -> Self {
        Self::EventStream(Some(StreamState::default()))
    }

    /// Fresh state for a newly opened request/response session.
    pub fn streamable(protocol_version: Option<String>) -> Self {
        Self::Streamable(Some(RequestState { protocol_version }))
    }

    pub fn kind(&self) -> TransportKind {
        match self {
            Self::Streamable(_) => TransportKind::Streamable,
            Self::EventStream(_) => TransportKind::EventStream,
        }
    }

    pub fn stream_state(&self) -> Option<&StreamState> {
        match self {
            Self::EventStream(state) => state.as_ref(),
            Self::Streamable(_) => None,
        }
    }

    pub fn request_state(&self) -> Option<&RequestState> {
        match self {
            Self::Streamable(state) => state.as_ref(),
            Self::EventStream(_) => None,
        }
    }
}

/// Cross-node record of one live session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionMetadata {
    pub session_id: String,
    /// Node that last registered the session; absent in the stateless variant.
    pub owner_node: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    pub transport: TransportState,
}

impl SessionMetadata {
    /// Creates metadata for a session opened now.
    pub fn new(
        session_id: impl Into<String>,
        transport: TransportState,
        owner_node: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            owner_node,
            created_at: now,
            last_active_at: now,
            transport,
        }
    }

    pub fn kind(&self) -> TransportKind {
        self.transport.kind()
    }

    /// Whether the event stream is currently attached to a node.
    /// Always `false` for request/response sessions.
    pub fn is_connected(&self) -> bool {
        self.transport
            .stream_state()
            .map(|s| s.connected)
            .unwrap_or(false)
    }

    /// Last event id persisted for an event-stream session.
    pub fn last_event_id(&self) -> Option<&str> {
        self.transport
            .stream_state()
            .and_then(|s| s.last_event_id.as_deref())
    }

    /// Flattens the record into string-valued hash fields.
    pub fn to_fields(&self) -> Result<Vec<(String, String)>, Error> {
        let mut out = vec![
            (fields::SESSION_ID.to_string(), self.session_id.clone()),
            (
                fields::TRANSPORT_TYPE.to_string(),
                self.kind().as_str().to_string(),
            ),
            (
                fields::CREATED_AT.to_string(),
                self.created_at.timestamp_millis().to_string(),
            ),
            (
                fields::LAST_ACTIVE_AT.to_string(),
                self.last_active_at.timestamp_millis().to_string(),
            ),
        ];

        if let Some(owner) = &self.owner_node {
            out.push((fields::OWNER_NODE.to_string(), owner.clone()));
        }

        match &self.transport {
            TransportState::EventStream(Some(state)) => {
                out.push((fields::STREAM_STATE.to_string(), serde_json::to_string(state)?));
            }
            TransportState::Streamable(Some(state)) => {
                out.push((
                    fields::REQUEST_STATE.to_string(),
                    serde_json::to_string(state)?,
                ));
            }
            _ => {}
        }

        Ok(out)
    }

    /// Rebuilds a record from stored hash fields.
    ///
    /// Returns `None` when the hash is empty or a required field is missing.
    /// A sub-state blob that fails to decode becomes absent sub-state.
    pub fn from_fields(map: &HashMap<String, String>) -> Option<Self> {
        let session_id = map.get(fields::SESSION_ID)?.clone();
        let kind: TransportKind = map.get(fields::TRANSPORT_TYPE)?.parse().ok()?;
        let created_at = parse_millis(map.get(fields::CREATED_AT)?)?;
        let last_active_at = parse_millis(map.get(fields::LAST_ACTIVE_AT)?)?;
        let owner_node = map
            .get(fields::OWNER_NODE)
            .filter(|v| !v.is_empty())
            .cloned();

        let transport = match kind {
            TransportKind::EventStream => TransportState::EventStream(
                map.get(fields::STREAM_STATE)
                    .and_then(|raw| serde_json::from_str(raw).ok()),
            ),
            TransportKind::Streamable => TransportState::Streamable(
                map.get(fields::REQUEST_STATE)
                    .and_then(|raw| serde_json::from_str(raw).ok()),
            ),
        };

        Some(Self {
            session_id,
            owner_node,
            created_at,
            last_active_at,
            transport,
        })
    }
}

fn parse_millis(raw: &str) -> Option<DateTime<Utc>> {
    let ms: i64 = raw.parse().ok()?;
    Utc.timestamp_millis_opt(ms).single()
}

/// Checks a client-supplied session identifier: non-empty visible ASCII.
pub fn is_valid_session_id(id: &str) -> bool {
    !id.is_empty() && id.len() <= 256 && id.bytes().all(|b| (0x21..=0x7e).contains(&b))
}
