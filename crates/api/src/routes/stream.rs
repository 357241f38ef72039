//! SSE plumbing shared by the stream endpoints.

use axum::response::{
    sse::{Event, KeepAlive, Sse},
    IntoResponse, Response,
};
use futures::stream;
use mesh_core::EventId;
use session::{EventLog, OutboundEvent, StreamGuard, TransportHandle};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

fn to_sse_event(event: OutboundEvent) -> Event {
    let mut sse = Event::default().data(event.data);
    if let Some(id) = event.id {
        sse = sse.id(id);
    }
    if let Some(name) = event.event {
        sse = sse.event(name);
    }
    sse
}

/// Turns a handle's outbound channel into an SSE response. `guard` lives
/// exactly as long as the response body.
pub(crate) fn sse_response(rx: mpsc::Receiver<OutboundEvent>, guard: StreamGuard) -> Response {
    let events = stream::unfold((rx, guard), |(mut rx, guard)| async move {
        let event = rx.recv().await?;
        Some((Ok::<_, Infallible>(to_sse_event(event)), (rx, guard)))
    });

    Sse::new(events)
        .keep_alive(KeepAlive::default())
        .into_response()
}

/// Replays everything after `cursor` into a handle attached with
/// `attach_for_replay`, then releases the live sends held meanwhile.
/// Cursors from another session's stream are ignored.
pub(crate) fn spawn_catch_up(
    event_log: EventLog,
    handle: Arc<dyn TransportHandle>,
    cursor: Option<String>,
) {
    tokio::spawn(async move {
        match cursor {
            Some(cursor)
                if EventId::from_raw(cursor.as_str()).stream_id() == Some(handle.session_id()) =>
            {
                replay(&event_log, &handle, &cursor).await;
            }
            Some(cursor) => {
                debug!(session_id = %handle.session_id(), cursor = %cursor, "Ignoring foreign cursor");
            }
            None => {}
        }
        handle.end_replay().await;
    });
}

async fn replay(event_log: &EventLog, handle: &Arc<dyn TransportHandle>, cursor: &str) {
    match event_log.replay_after(cursor, handle).await {
        Ok(Some(stream_id)) => {
            debug!(session_id = %handle.session_id(), stream_id = %stream_id, "Replay finished");
        }
        Ok(None) => {
            debug!(session_id = %handle.session_id(), cursor = %cursor, "Nothing to replay");
        }
        Err(e) => {
            warn!(session_id = %handle.session_id(), error = %e, "Replay failed");
        }
    }
}
