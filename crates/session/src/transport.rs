//! Live connection handles held by a node.
//!
//! A handle is the node-local projection of one session: it owns the
//! outbound channel feeding the client's open HTTP stream, persists every
//! server-initiated message to the event log, and runs close hooks exactly
//! once when the connection goes away.

use async_trait::async_trait;
use mesh_core::{Error, EventId, Result, TransportKind};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::event_log::{EventLog, EventSink};

/// Callback run once when a handle closes. Must not block.
pub type CloseHook = Box<dyn FnOnce() + Send + 'static>;

/// One message bound for the client's stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundEvent {
    /// Event id the client resumes from; `None` for control events.
    pub id: Option<String>,
    /// SSE event name; `None` means the default `message`.
    pub event: Option<String>,
    pub data: String,
}

impl OutboundEvent {
    pub fn message(id: &EventId, data: impl Into<String>) -> Self {
        Self {
            id: Some(id.to_string()),
            event: None,
            data: data.into(),
        }
    }

    /// Unpersisted control event (e.g. the `endpoint` announcement).
    pub fn control(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            id: None,
            event: Some(event.into()),
            data: data.into(),
        }
    }
}

/// Connection handle for one session on this node.
#[async_trait]
pub trait TransportHandle: Send + Sync {
    fn session_id(&self) -> &str;

    fn kind(&self) -> TransportKind;

    /// Persists a server-initiated message, then pushes it to the attached
    /// stream if there is one.
    async fn send(&self, payload: String) -> Result<EventId>;

    /// Binds the outbound stream, replacing any previous one.
    fn attach(&self, sink: mpsc::Sender<OutboundEvent>);

    /// Binds the outbound stream and holds live sends back until
    /// [`end_replay`](Self::end_replay), so replayed history reaches the
    /// stream first.
    fn attach_for_replay(&self, sink: mpsc::Sender<OutboundEvent>);

    /// Releases sends held since `attach_for_replay`, skipping any the
    /// replay already delivered.
    async fn end_replay(&self);

    /// Unbinds `sink` if it is still the bound stream.
    fn detach(&self, sink: &mpsc::Sender<OutboundEvent>);

    /// Currently bound outbound stream.
    fn sink(&self) -> Option<mpsc::Sender<OutboundEvent>>;

    /// Registers a hook run when the handle closes. Runs immediately if the
    /// handle is already closed.
    fn on_close(&self, hook: CloseHook);

    /// Closes the handle and runs its close hooks.
    fn close(&self) -> Result<()>;

    fn is_closed(&self) -> bool;

    /// Id of the last event pushed to (or replayed into) the stream.
    fn last_event_id(&self) -> Option<String>;

    /// Advances the cursor past a replayed event.
    fn mark_delivered(&self, event_id: &EventId);
}

/// Handle backed by a bounded channel into an HTTP stream response.
///
/// Event-stream sessions close the handle when the stream drops; request /
/// response sessions only detach their optional listener stream.
pub struct ChannelTransport {
    session_id: String,
    kind: TransportKind,
    event_log: EventLog,
    outbound: Mutex<Outbound>,
    last_event_id: Mutex<Option<String>>,
    hooks: Mutex<Vec<CloseHook>>,
    closed: AtomicBool,
}

/// Bound stream plus the sends held back while a replay runs.
#[derive(Default)]
struct Outbound {
    sink: Option<mpsc::Sender<OutboundEvent>>,
    replaying: bool,
    held: Vec<(EventId, String)>,
    replayed: HashSet<EventId>,
}

impl ChannelTransport {
    pub fn new(session_id: impl Into<String>, kind: TransportKind, event_log: EventLog) -> Self {
        Self {
            session_id: session_id.into(),
            kind,
            event_log,
            outbound: Mutex::new(Outbound::default()),
            last_event_id: Mutex::new(None),
            hooks: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Seeds the resume cursor (restored handles start from the stored one).
    pub fn with_cursor(self, last_event_id: Option<String>) -> Self {
        *self.last_event_id.lock() = last_event_id;
        self
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::transport_closed(&self.session_id));
        }
        Ok(())
    }

    /// Pushes a persisted event to the bound stream.
    ///
    /// The cursor only moves past events that reached a stream.
    async fn push_live(&self, event_id: &EventId, payload: String) {
        let sink = self.outbound.lock().sink.clone();
        match sink {
            Some(tx) => {
                if tx.send(OutboundEvent::message(event_id, payload)).await.is_ok() {
                    self.mark_delivered(event_id);
                } else {
                    // Persisted; the client picks it up on replay
                    debug!(
                        session_id = %self.session_id,
                        event_id = %event_id,
                        "Stream receiver gone, event kept for replay"
                    );
                }
            }
            None => {
                debug!(
                    session_id = %self.session_id,
                    event_id = %event_id,
                    "No stream attached, event kept for replay"
                );
            }
        }
    }
}

#[async_trait]
impl TransportHandle for ChannelTransport {
    fn session_id(&self) -> &str {
        &self.session_id
    }

    fn kind(&self) -> TransportKind {
        self.kind
    }

    async fn send(&self, payload: String) -> Result<EventId> {
        self.ensure_open()?;

        let event_id = self.event_log.append(&self.session_id, &payload).await?;

        {
            let mut outbound = self.outbound.lock();
            if outbound.replaying {
                outbound.held.push((event_id.clone(), payload));
                return Ok(event_id);
            }
        }

        self.push_live(&event_id, payload).await;
        Ok(event_id)
    }

    fn attach(&self, sink: mpsc::Sender<OutboundEvent>) {
        self.outbound.lock().sink = Some(sink);
    }

    fn attach_for_replay(&self, sink: mpsc::Sender<OutboundEvent>) {
        let mut outbound = self.outbound.lock();
        outbound.sink = Some(sink);
        outbound.replaying = true;
    }

    async fn end_replay(&self) {
        loop {
            let batch: Vec<(EventId, String)> = {
                let mut outbound = self.outbound.lock();
                if outbound.held.is_empty() {
                    outbound.replaying = false;
                    outbound.replayed.clear();
                    return;
                }
                let held = std::mem::take(&mut outbound.held);
                held.into_iter()
                    .filter(|(id, _)| !outbound.replayed.contains(id))
                    .collect()
            };
            // Sends arriving meanwhile are held for the next round
            for (event_id, payload) in batch {
                self.push_live(&event_id, payload).await;
            }
        }
    }

    fn detach(&self, sink: &mpsc::Sender<OutboundEvent>) {
        let mut outbound = self.outbound.lock();
        if outbound.sink.as_ref().map(|c| c.same_channel(sink)).unwrap_or(false) {
            outbound.sink = None;
        }
    }

    fn sink(&self) -> Option<mpsc::Sender<OutboundEvent>> {
        self.outbound.lock().sink.clone()
    }

    fn on_close(&self, hook: CloseHook) {
        if self.is_closed() {
            hook();
            return;
        }
        self.hooks.lock().push(hook);
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(Error::transport_closed(&self.session_id));
        }

        // Dropping the sender ends the client's stream once drained
        self.outbound.lock().sink.take();

        let hooks: Vec<CloseHook> = std::mem::take(&mut *self.hooks.lock());
        for hook in hooks {
            hook();
        }

        debug!(session_id = %self.session_id, kind = %self.kind, "Transport closed");
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn last_event_id(&self) -> Option<String> {
        self.last_event_id.lock().clone()
    }

    fn mark_delivered(&self, event_id: &EventId) {
        {
            let mut outbound = self.outbound.lock();
            if outbound.replaying {
                outbound.replayed.insert(event_id.clone());
            }
        }
        *self.last_event_id.lock() = Some(event_id.to_string());
    }
}

/// Replay into a handle: pushes to its bound stream and advances its cursor.
#[async_trait]
impl EventSink for Arc<dyn TransportHandle> {
    async fn deliver(&self, event_id: &EventId, payload: &str) -> Result<()> {
        if self.is_closed() {
            return Err(Error::transport_closed(self.session_id()));
        }
        let Some(tx) = self.sink() else {
            return Err(Error::transport_closed(self.session_id()));
        };
        tx.send(OutboundEvent::message(event_id, payload))
            .await
            .map_err(|_| Error::transport_closed(self.session_id()))?;

        self.mark_delivered(event_id);
        Ok(())
    }
}

/// Ties a handle to one outbound stream; travels inside the HTTP response
/// body and fires when the client goes away.
///
/// Does nothing if another stream has since been attached to the handle.
pub struct StreamGuard {
    handle: Arc<dyn TransportHandle>,
    sink: mpsc::WeakSender<OutboundEvent>,
    close_on_drop: bool,
}

impl StreamGuard {
    /// Closes the handle when the stream ends (event-stream sessions).
    pub fn closing(handle: Arc<dyn TransportHandle>, sink: &mpsc::Sender<OutboundEvent>) -> Self {
        Self {
            handle,
            sink: sink.downgrade(),
            close_on_drop: true,
        }
    }

    /// Only unbinds the stream, leaving the session open (listener streams).
    pub fn detaching(handle: Arc<dyn TransportHandle>, sink: &mpsc::Sender<OutboundEvent>) -> Self {
        Self {
            handle,
            sink: sink.downgrade(),
            close_on_drop: false,
        }
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        if self.handle.is_closed() {
            return;
        }
        let Some(mine) = self.sink.upgrade() else {
            return;
        };
        let bound = self
            .handle
            .sink()
            .map(|current| current.same_channel(&mine))
            .unwrap_or(false);
        if !bound {
            return;
        }

        if !self.close_on_drop {
            self.handle.detach(&mine);
            return;
        }
        drop(mine);
        if let Err(e) = self.handle.close() {
            warn!(session_id = %self.handle.session_id(), error = %e, "Failed to close transport");
        }
    }
}
