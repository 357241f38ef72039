//! Minimal inspection of inbound JSON-RPC messages.
//!
//! Messages are otherwise opaque to the mesh; only the session-opening
//! handshake is recognized here.

use serde_json::Value;

/// Method name of the session-opening request.
pub const OPEN_METHOD: &str = "initialize";

/// Returns true if `message` (or any element of a batch) opens a session.
pub fn is_open_request(message: &Value) -> bool {
    match message {
        Value::Array(items) => items.iter().any(is_single_open_request),
        other => is_single_open_request(other),
    }
}

fn is_single_open_request(message: &Value) -> bool {
    message.get("method").and_then(Value::as_str) == Some(OPEN_METHOD)
        && message.get("id").is_some()
}

/// Protocol version requested by an open request, if any.
pub fn requested_protocol_version(message: &Value) -> Option<String> {
    let open = match message {
        Value::Array(items) => items.iter().find(|m| is_single_open_request(m))?,
        other => other,
    };
    open.get("params")?
        .get("protocolVersion")?
        .as_str()
        .map(str::to_string)
}
