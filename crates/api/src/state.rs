//! Application state shared across handlers.

use mesh_core::Result;
use session::{OwnerResolver, SessionRegistry, SessionRouter};
use std::sync::Arc;
use std::time::Duration;

use crate::forward::Forwarder;
use crate::handler::{EchoHandler, MessageHandler};

/// Default connect timeout when proxying to an owner node.
pub const DEFAULT_FORWARD_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Session records and this node's live handles
    pub registry: SessionRegistry,
    /// Serving decision per request
    pub router: SessionRouter,
    /// Proxy to owner nodes
    pub forwarder: Forwarder,
    /// Application protocol
    pub handler: Arc<dyn MessageHandler>,
}

impl AppState {
    pub fn new(
        registry: SessionRegistry,
        resolver: Arc<dyn OwnerResolver>,
        handler: Arc<dyn MessageHandler>,
        forward_timeout: Duration,
    ) -> Result<Self> {
        let forwarder = Forwarder::new(registry.node().id.clone(), forward_timeout)?;
        Ok(Self {
            router: SessionRouter::new(registry.clone(), resolver),
            registry,
            forwarder,
            handler,
        })
    }

    /// State with the built-in [`EchoHandler`].
    pub fn with_echo_handler(
        registry: SessionRegistry,
        resolver: Arc<dyn OwnerResolver>,
    ) -> Result<Self> {
        Self::new(
            registry,
            resolver,
            Arc::new(EchoHandler),
            DEFAULT_FORWARD_TIMEOUT,
        )
    }
}
