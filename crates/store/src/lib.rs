//! Shared store adapter for the session mesh.
//!
//! Every node talks to the same store; the session registry and event log
//! only rely on the capability described by [`SharedStore`].

pub mod config;
pub mod health;
pub mod memory;
pub mod redis_store;
pub mod store;

pub use config::*;
pub use memory::MemoryStore;
pub use redis_store::RedisStore;
pub use store::*;
