//! HTTP surface for the session mesh.

pub mod extractors;
pub mod forward;
pub mod handler;
pub mod response;
pub mod routes;
pub mod server;
pub mod state;

pub use forward::{Forwarder, FORWARDED_BY_HEADER};
pub use handler::{EchoHandler, MessageHandler};
pub use routes::router;
pub use server::serve_with_shutdown;
pub use state::AppState;
