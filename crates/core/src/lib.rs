//! Core types, identifiers, and error taxonomy for the session mesh.

pub mod error;
pub mod events;
pub mod keys;
pub mod protocol;
pub mod session;

pub use error::{Error, Result};
pub use events::{EventId, StoredEvent, DEFAULT_EVENT_RETENTION_SECS};
pub use session::{
    is_valid_session_id, RequestState, SessionMetadata, StreamState, TransportKind,
    TransportState, DEFAULT_SESSION_TTL_SECS,
};
