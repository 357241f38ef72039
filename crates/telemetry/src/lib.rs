//! Internal telemetry for the session mesh.
//!
//! Process-wide counters and a health registry, read by the health
//! endpoints and logged by the background workers.

pub mod health;
pub mod metrics;
pub mod tracing_setup;

pub use health::*;
pub use metrics::*;
pub use tracing_setup::*;
