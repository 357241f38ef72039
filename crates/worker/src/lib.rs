//! Background workers for the session mesh.
//!
//! Periodic maintenance that never sits on the request path:
//! - Cleanup (drop local handles whose session record expired)
//! - Retention (prune old events from locally held streams)
//! - Store probe (keep the health registry current)

pub mod cleanup;
pub mod probe;
pub mod retention;
pub mod scheduler;

pub use cleanup::CleanupWorker;
pub use probe::StoreProbeWorker;
pub use retention::RetentionWorker;
pub use scheduler::*;
