//! Event-stream transport endpoints (`/sse`, `/messages`).
//!
//! `GET /sse` holds the long-lived stream; the client posts messages to
//! `/messages?sessionId=..` and receives replies over the stream. A client
//! that loses its stream reconnects with `?sessionId=` (and optionally
//! `Last-Event-ID`) on any node.

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
};
use mesh_core::{is_valid_session_id, Error, TransportKind, TransportState};
use serde::Deserialize;
use serde_json::Value;
use session::{OutboundEvent, Route, RouteRequest, StreamGuard};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::extractors::LastEventId;
use crate::handler::dispatch;
use crate::response::ApiError;
use crate::routes::stream::{spawn_catch_up, sse_response};
use crate::state::AppState;

/// Path clients post messages to; announced in the `endpoint` event.
pub const MESSAGES_PATH: &str = "/messages";

#[derive(Debug, Default, Deserialize)]
pub struct SessionQuery {
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
}

impl SessionQuery {
    fn session_id(self) -> Result<Option<String>, ApiError> {
        match self.session_id.filter(|s| !s.is_empty()) {
            None => Ok(None),
            Some(id) if is_valid_session_id(&id) => Ok(Some(id)),
            Some(_) => Err(ApiError::bad_request("Invalid sessionId")),
        }
    }
}

/// GET /sse - Open a new event stream or reconnect to an existing one.
pub async fn sse_handler(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
    LastEventId(last_event_id): LastEventId,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let (tx, rx) = mpsc::channel(state.registry.channel_capacity());

    let Some(session_id) = query.session_id()? else {
        let handle = state
            .registry
            .open_session(TransportState::event_stream())
            .await?;
        handle.attach(tx.clone());
        let guard = StreamGuard::closing(handle.clone(), &tx);

        let endpoint = format!("{}?sessionId={}", MESSAGES_PATH, handle.session_id());
        tx.send(OutboundEvent::control("endpoint", endpoint))
            .await
            .map_err(|_| ApiError::internal("Stream closed before it opened"))?;

        info!(session_id = %handle.session_id(), "Opened event stream");
        return Ok(sse_response(rx, guard));
    };

    let route = state
        .router
        .route(RouteRequest {
            session_id: Some(session_id.as_str()),
            kind: TransportKind::EventStream,
            opens_session: false,
            can_restore: true,
        })
        .await?;

    let handle = match route {
        Route::Local(handle) => {
            handle.attach_for_replay(tx.clone());
            handle
        }
        Route::Restore(_) => state
            .registry
            .restore_stream_handle(&session_id, tx.clone())
            .await?
            .ok_or_else(|| Error::not_found(&session_id))?,
        Route::Forward(target) => {
            return Ok(state
                .forwarder
                .forward(&target, method, &uri, &headers, Bytes::new())
                .await?)
        }
        Route::Open => return Err(Error::malformed("missing sessionId").into()),
    };

    let guard = StreamGuard::closing(handle.clone(), &tx);
    drop(tx);

    // An explicit cursor wins over the one the session last recorded
    let cursor = last_event_id.or_else(|| handle.last_event_id());
    spawn_catch_up(state.registry.event_log().clone(), handle, cursor);

    info!(session_id = %session_id, "Event stream reconnected");
    Ok(sse_response(rx, guard))
}

/// POST /messages?sessionId= - Message for an event-stream session; the
/// reply travels over the stream.
pub async fn message_handler(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let session_id = query
        .session_id()?
        .ok_or_else(|| ApiError::bad_request("Missing sessionId query parameter"))?;

    let route = state
        .router
        .route(RouteRequest {
            session_id: Some(session_id.as_str()),
            kind: TransportKind::EventStream,
            opens_session: false,
            can_restore: false,
        })
        .await?;

    match route {
        Route::Local(handle) => {
            let message: Value = serde_json::from_slice(&body).map_err(Error::from)?;
            if let Some(reply) = dispatch(state.handler.as_ref(), &handle, message).await? {
                handle.send(reply.to_string()).await?;
            }
            debug!(session_id = %session_id, "Message accepted");
            Ok(StatusCode::ACCEPTED.into_response())
        }
        Route::Forward(target) => Ok(state
            .forwarder
            .forward(&target, method, &uri, &headers, body)
            .await?),
        Route::Open | Route::Restore(_) => Err(Error::reestablish(&session_id).into()),
    }
}
