//! Shared harness for the session mesh integration tests.

pub mod containers;
pub mod setup;
