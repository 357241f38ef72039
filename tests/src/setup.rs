//! Common test setup functions.

use api::{router, AppState, EchoHandler, MessageHandler};
use axum::Router;
use session::{NodeIdentity, OwnerResolver, SessionConfig, SessionRegistry, StaticOwnerResolver};
use shared_store::{MemoryStore, SharedStoreRef};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

/// A fleet sharing one in-memory store.
///
/// Every node built from the same context sees the same session records
/// and event streams, exactly like nodes pointed at one Redis.
pub struct TestContext {
    pub store: Arc<MemoryStore>,
    pub session_config: SessionConfig,
}

/// One node: its state (for direct registry access) and its router.
pub struct TestNode {
    pub state: AppState,
    pub router: Router,
}

impl TestNode {
    pub fn registry(&self) -> &SessionRegistry {
        &self.state.registry
    }

    pub fn id(&self) -> &str {
        &self.state.registry.node().id
    }
}

impl TestContext {
    pub fn new() -> Self {
        telemetry::init_test_tracing();
        Self {
            store: Arc::new(MemoryStore::new()),
            session_config: SessionConfig::default(),
        }
    }

    fn shared_store(&self) -> SharedStoreRef {
        self.store.clone()
    }

    /// Node that tracks ownership and knows no peers.
    pub fn node(&self, node_id: &str) -> TestNode {
        self.node_with(
            NodeIdentity::new(node_id, true),
            Arc::new(StaticOwnerResolver::default()),
            Arc::new(EchoHandler),
        )
    }

    /// Node that tracks ownership and forwards to the given peers.
    pub fn node_with_peers(&self, node_id: &str, peers: &[(&str, &str)]) -> TestNode {
        let resolver = peers
            .iter()
            .fold(StaticOwnerResolver::default(), |r, (id, addr)| {
                r.with_node(*id, *addr)
            });
        self.node_with(
            NodeIdentity::new(node_id, true),
            Arc::new(resolver),
            Arc::new(EchoHandler),
        )
    }

    /// Node of a fully stateless fleet: no owner is ever recorded.
    pub fn stateless_node(&self, node_id: &str) -> TestNode {
        self.node_with(
            NodeIdentity::new(node_id, false),
            Arc::new(StaticOwnerResolver::default()),
            Arc::new(EchoHandler),
        )
    }

    pub fn node_with(
        &self,
        node: NodeIdentity,
        resolver: Arc<dyn OwnerResolver>,
        handler: Arc<dyn MessageHandler>,
    ) -> TestNode {
        let registry = SessionRegistry::new(self.shared_store(), node, &self.session_config);
        let state = AppState::new(registry, resolver, handler, Duration::from_secs(5))
            .expect("Failed to create app state");
        let router = router(state.clone());
        TestNode { state, router }
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Serves `router` on an ephemeral local port; returns its base URL.
///
/// Forwarding needs a real socket on the owner side.
pub async fn serve(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind test listener");
    let addr = listener.local_addr().expect("No local address");

    tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });

    format!("http://{}", addr)
}
