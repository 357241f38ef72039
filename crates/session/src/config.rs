//! Session layer configuration.

use mesh_core::{DEFAULT_EVENT_RETENTION_SECS, DEFAULT_SESSION_TTL_SECS};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Session registry and event log configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Session metadata TTL in seconds
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
    /// Event retention window in seconds
    #[serde(default = "default_event_retention_secs")]
    pub event_retention_secs: u64,
    /// Local cache reconciliation interval in seconds
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
    /// Bounded outbound channel size per streaming handle
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_session_ttl_secs() -> u64 {
    DEFAULT_SESSION_TTL_SECS
}

fn default_event_retention_secs() -> u64 {
    DEFAULT_EVENT_RETENTION_SECS
}

fn default_cleanup_interval_secs() -> u64 {
    300
}

fn default_channel_capacity() -> usize {
    64
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_ttl_secs: default_session_ttl_secs(),
            event_retention_secs: default_event_retention_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl SessionConfig {
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn event_retention(&self) -> Duration {
        Duration::from_secs(self.event_retention_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}
