//! Shared store configuration.

use serde::{Deserialize, Serialize};

/// URL value that selects the in-process store.
pub const MEMORY_STORE_URL: &str = "memory";

/// Shared store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Store endpoint (e.g., "redis://redis:6379/0"), or "memory"
    #[serde(default = "default_url")]
    pub url: String,
    /// Per-operation timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_timeout_ms() -> u64 {
    5000
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl StoreConfig {
    /// Config for the in-process store.
    pub fn memory() -> Self {
        Self {
            url: MEMORY_STORE_URL.to_string(),
            ..Self::default()
        }
    }

    pub fn is_memory(&self) -> bool {
        self.url.is_empty() || self.url == MEMORY_STORE_URL
    }
}
