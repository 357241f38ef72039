//! Key shapes in the shared store.

/// `session:<sessionId>` - hash of session metadata.
pub fn session_key(session_id: &str) -> String {
    format!("session:{}", session_id)
}

/// `event:<eventId>` - hash of `{streamId, payload, timestamp}`.
pub fn event_key(event_id: &str) -> String {
    format!("event:{}", event_id)
}

/// `stream:<streamId>` - sorted set of event ids scored by timestamp.
pub fn stream_key(stream_id: &str) -> String {
    format!("stream:{}", stream_id)
}
