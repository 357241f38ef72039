//! Per-request serving decision: open, serve locally, restore, or forward.

use mesh_core::{
    error::ForwardErrorCode, is_valid_session_id, Error, Result, SessionMetadata, TransportKind,
};
use std::fmt;
use std::sync::Arc;
use telemetry::metrics;
use tracing::debug;

use crate::discovery::OwnerResolver;
use crate::registry::SessionRegistry;
use crate::transport::TransportHandle;

/// What the router needs to know about an inbound request.
#[derive(Debug, Clone, Copy)]
pub struct RouteRequest<'a> {
    /// Client-supplied session id, if any.
    pub session_id: Option<&'a str>,
    /// Transport kind the endpoint serves.
    pub kind: TransportKind,
    /// Whether the request is a valid session-opening handshake.
    pub opens_session: bool,
    /// Whether the endpoint can host a restored stream (GET stream endpoints).
    pub can_restore: bool,
}

/// Owner node a request must be proxied to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardTarget {
    pub owner_node: String,
    /// Base URL of the owner, without trailing slash.
    pub address: String,
}

/// Serving path for one request.
pub enum Route {
    /// No session yet; create one here.
    Open,
    /// This node holds the live handle.
    Local(Arc<dyn TransportHandle>),
    /// Rebuild the event stream here from the stored record.
    Restore(SessionMetadata),
    /// Another node holds the session.
    Forward(ForwardTarget),
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => f.write_str("Open"),
            Self::Local(handle) => f.debug_tuple("Local").field(&handle.session_id()).finish(),
            Self::Restore(meta) => f.debug_tuple("Restore").field(&meta.session_id).finish(),
            Self::Forward(target) => f.debug_tuple("Forward").field(target).finish(),
        }
    }
}

/// Decides where each request is served.
#[derive(Clone)]
pub struct SessionRouter {
    registry: SessionRegistry,
    resolver: Arc<dyn OwnerResolver>,
}

impl SessionRouter {
    pub fn new(registry: SessionRegistry, resolver: Arc<dyn OwnerResolver>) -> Self {
        Self { registry, resolver }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub async fn route(&self, request: RouteRequest<'_>) -> Result<Route> {
        let session_id = match request.session_id.filter(|s| !s.is_empty()) {
            Some(id) => id,
            None if request.opens_session => return Ok(Route::Open),
            None => {
                return Err(Error::malformed(
                    "missing session id on a request that does not open a session",
                ))
            }
        };
        if !is_valid_session_id(session_id) {
            return Err(Error::malformed("invalid session id"));
        }

        if let Some(handle) = self.registry.get_local_handle(session_id) {
            if handle.kind() != request.kind {
                return Err(kind_mismatch(session_id, handle.kind(), request.kind));
            }
            // Local handle outlived its record; the store wins
            if !self.registry.touch(session_id).await? {
                self.registry.remove(session_id).await?;
                return Err(Error::not_found(session_id));
            }
            metrics().requests_served_locally.inc();
            return Ok(Route::Local(handle));
        }

        let Some(meta) = self.registry.lookup(session_id).await? else {
            return Err(Error::not_found(session_id));
        };

        if meta.kind() != request.kind {
            return Err(kind_mismatch(session_id, meta.kind(), request.kind));
        }

        if meta.kind().is_restorable() && request.can_restore {
            debug!(session_id = session_id, "Restoring stream locally");
            return Ok(Route::Restore(meta));
        }

        let node = self.registry.node();
        if let Some(owner) = meta.owner_node.as_deref() {
            if node.track_ownership && !node.is(owner) {
                let Some(address) = self.resolver.resolve_owner_address(owner).await? else {
                    return Err(Error::forward(
                        ForwardErrorCode::UnknownOwner,
                        format!("no address known for owner node {}", owner),
                    ));
                };
                debug!(session_id = session_id, owner = owner, "Forwarding to owner");
                return Ok(Route::Forward(ForwardTarget {
                    owner_node: owner.to_string(),
                    address,
                }));
            }
        }

        Err(Error::reestablish(session_id))
    }
}

fn kind_mismatch(session_id: &str, actual: TransportKind, requested: TransportKind) -> Error {
    Error::transport_mismatch(format!(
        "session {} uses the {} transport, not {}",
        session_id, actual, requested
    ))
}
