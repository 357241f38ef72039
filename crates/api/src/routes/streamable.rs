//! Streamable transport endpoint (`/mcp`).
//!
//! One endpoint for the whole session lifecycle: POST carries messages (and
//! opens sessions), GET opens a listener stream for server-initiated
//! messages, DELETE terminates.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, HeaderValue, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json,
};
use mesh_core::error::SessionErrorCode;
use mesh_core::protocol::{is_open_request, requested_protocol_version};
use mesh_core::{Error, TransportKind, TransportState};
use serde_json::Value;
use session::{Route, RouteRequest, StreamGuard};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::extractors::{LastEventId, SessionIdHeader, SESSION_ID_HEADER};
use crate::handler::dispatch;
use crate::response::ApiError;
use crate::routes::stream::{spawn_catch_up, sse_response};
use crate::state::AppState;

fn reply_response(reply: Option<Value>) -> Response {
    match reply {
        Some(reply) => (StatusCode::OK, Json(reply)).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    }
}

fn parse_body(body: &Bytes) -> Result<Value, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::from(Error::from(e)))
}

fn require_session_id(session_id: Option<String>) -> Result<String, ApiError> {
    session_id.ok_or_else(|| ApiError::bad_request("Missing mcp-session-id header"))
}

/// POST /mcp - Deliver a message, opening a session on `initialize`.
pub async fn post_handler(
    State(state): State<AppState>,
    SessionIdHeader(session_id): SessionIdHeader,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let parsed: Option<Value> = serde_json::from_slice(&body).ok();
    if session_id.is_none() && parsed.is_none() {
        return Err(ApiError::bad_request("Invalid JSON body"));
    }
    let opens_session = parsed.as_ref().map(is_open_request).unwrap_or(false);

    let route = state
        .router
        .route(RouteRequest {
            session_id: session_id.as_deref(),
            kind: TransportKind::Streamable,
            opens_session,
            can_restore: false,
        })
        .await?;

    match route {
        Route::Open => {
            let message = parsed.ok_or_else(|| ApiError::bad_request("Invalid JSON body"))?;
            let protocol_version = requested_protocol_version(&message);
            let handle = state
                .registry
                .open_session(TransportState::streamable(protocol_version))
                .await?;
            info!(session_id = %handle.session_id(), "Opened streamable session");

            let reply = dispatch(state.handler.as_ref(), &handle, message).await?;
            let mut response = reply_response(reply);
            let header_value = HeaderValue::from_str(handle.session_id())
                .map_err(|_| ApiError::internal("Session id is not a valid header value"))?;
            response
                .headers_mut()
                .insert(SESSION_ID_HEADER, header_value);
            Ok(response)
        }
        Route::Local(handle) => {
            let message = parse_body(&body)?;
            debug!(session_id = %handle.session_id(), "Serving message locally");
            let reply = dispatch(state.handler.as_ref(), &handle, message).await?;
            Ok(reply_response(reply))
        }
        Route::Forward(target) => Ok(state
            .forwarder
            .forward(&target, method, &uri, &headers, body)
            .await?),
        Route::Restore(meta) => Err(Error::reestablish(&meta.session_id).into()),
    }
}

/// GET /mcp - Listener stream for server-initiated messages.
pub async fn listen_handler(
    State(state): State<AppState>,
    SessionIdHeader(session_id): SessionIdHeader,
    LastEventId(last_event_id): LastEventId,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let session_id = require_session_id(session_id)?;

    let route = state
        .router
        .route(RouteRequest {
            session_id: Some(session_id.as_str()),
            kind: TransportKind::Streamable,
            opens_session: false,
            can_restore: false,
        })
        .await?;

    match route {
        Route::Local(handle) => {
            let (tx, rx) = mpsc::channel(state.registry.channel_capacity());
            handle.attach_for_replay(tx.clone());
            let guard = StreamGuard::detaching(handle.clone(), &tx);
            drop(tx);

            spawn_catch_up(state.registry.event_log().clone(), handle, last_event_id);
            debug!(session_id = %session_id, "Listener stream attached");
            Ok(sse_response(rx, guard))
        }
        Route::Forward(target) => Ok(state
            .forwarder
            .forward(&target, method, &uri, &headers, Bytes::new())
            .await?),
        Route::Open | Route::Restore(_) => Err(Error::reestablish(&session_id).into()),
    }
}

/// DELETE /mcp - Terminate a session.
pub async fn delete_handler(
    State(state): State<AppState>,
    SessionIdHeader(session_id): SessionIdHeader,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let session_id = require_session_id(session_id)?;

    let route = state
        .router
        .route(RouteRequest {
            session_id: Some(session_id.as_str()),
            kind: TransportKind::Streamable,
            opens_session: false,
            can_restore: false,
        })
        .await;

    match route {
        Ok(Route::Forward(target)) => Ok(state
            .forwarder
            .forward(&target, method, &uri, &headers, Bytes::new())
            .await?),
        Ok(_) => {
            state.registry.remove(&session_id).await?;
            Ok(StatusCode::NO_CONTENT.into_response())
        }
        // Nobody holds it; the record can still be dropped from here
        Err(e) if e.error_code() == Some(SessionErrorCode::ReestablishRequired.code()) => {
            state.registry.remove(&session_id).await?;
            Ok(StatusCode::NO_CONTENT.into_response())
        }
        Err(e) => Err(e.into()),
    }
}
