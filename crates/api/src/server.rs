//! Serving a node with graceful shutdown.

use std::future::Future;

use tokio::net::TcpListener;
use tracing::info;

use crate::routes::router;
use crate::state::AppState;

/// Serves `state` on `listener` until `signal` resolves.
///
/// Local sessions are released as soon as the signal fires: closing their
/// handles ends every open stream body, which lets in-flight connections
/// drain. Event streams stay resumable on other nodes.
pub async fn serve_with_shutdown<F>(
    listener: TcpListener,
    state: AppState,
    signal: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let registry = state.registry.clone();
    let app = router(state);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            signal.await;
            let released = registry.shutdown().await;
            info!(released = released, "Released local sessions");
        })
        .await
}
