//! Application message handling behind the session layer.
//!
//! The mesh treats messages as opaque; a [`MessageHandler`] gives them
//! meaning. [`EchoHandler`] is the built-in handler used by the binary and
//! the integration tests.

use async_trait::async_trait;
use mesh_core::protocol::OPEN_METHOD;
use mesh_core::Result;
use serde_json::{json, Value};
use session::TransportHandle;
use std::sync::Arc;
use tracing::debug;

/// Default protocol version answered when the client does not request one.
pub const DEFAULT_PROTOCOL_VERSION: &str = "2025-03-26";

/// Handles one inbound JSON-RPC message for a session.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Returns the reply, or `None` for notifications and responses.
    async fn handle(
        &self,
        session: &Arc<dyn TransportHandle>,
        message: Value,
    ) -> Result<Option<Value>>;
}

/// Runs `body` through `handler`, expanding batches.
///
/// A batch yields an array of the replies it produced, or `None` when none
/// of its members expected one.
pub async fn dispatch(
    handler: &dyn MessageHandler,
    session: &Arc<dyn TransportHandle>,
    body: Value,
) -> Result<Option<Value>> {
    match body {
        Value::Array(messages) => {
            let mut replies = Vec::new();
            for message in messages {
                if let Some(reply) = handler.handle(session, message).await? {
                    replies.push(reply);
                }
            }
            Ok((!replies.is_empty()).then_some(Value::Array(replies)))
        }
        message => handler.handle(session, message).await,
    }
}

/// Echoes request params back; `notify` pushes a server-initiated message
/// through the session handle.
#[derive(Debug, Clone, Default)]
pub struct EchoHandler;

#[async_trait]
impl MessageHandler for EchoHandler {
    async fn handle(
        &self,
        session: &Arc<dyn TransportHandle>,
        message: Value,
    ) -> Result<Option<Value>> {
        let Some(method) = message.get("method").and_then(Value::as_str) else {
            return Ok(None);
        };
        let Some(id) = message.get("id").cloned() else {
            debug!(session_id = %session.session_id(), method = method, "Notification");
            return Ok(None);
        };
        let params = message.get("params").cloned().unwrap_or(Value::Null);

        let result = match method {
            OPEN_METHOD => {
                let version = params
                    .get("protocolVersion")
                    .and_then(Value::as_str)
                    .unwrap_or(DEFAULT_PROTOCOL_VERSION);
                json!({
                    "protocolVersion": version,
                    "serverInfo": {
                        "name": "session-mesh",
                        "version": env!("CARGO_PKG_VERSION"),
                    },
                    "capabilities": {},
                })
            }
            "ping" => json!({}),
            "notify" => {
                let notification = json!({
                    "jsonrpc": "2.0",
                    "method": "notifications/message",
                    "params": params,
                });
                let event_id = session.send(notification.to_string()).await?;
                json!({ "eventId": event_id.as_str() })
            }
            _ => json!({ "echo": params }),
        };

        Ok(Some(json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": result,
        })))
    }
}
