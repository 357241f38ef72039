//! API routes.

pub mod event_stream;
pub mod health;
mod stream;
pub mod streamable;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::state::AppState;

/// Creates the API router.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers(Any);

    Router::new()
        .route(
            "/mcp",
            post(streamable::post_handler)
                .get(streamable::listen_handler)
                .delete(streamable::delete_handler),
        )
        .route("/sse", get(event_stream::sse_handler))
        .route(event_stream::MESSAGES_PATH, post(event_stream::message_handler))
        .route("/health", get(health::health_handler))
        .route("/health/ready", get(health::ready_handler))
        .route("/health/live", get(health::live_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
