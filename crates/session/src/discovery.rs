//! Owner node address resolution.

use async_trait::async_trait;
use mesh_core::Result;
use std::collections::HashMap;

/// Resolves a node identity to the base URL requests are forwarded to.
#[async_trait]
pub trait OwnerResolver: Send + Sync {
    /// `Ok(None)` when the node is unknown to discovery.
    async fn resolve_owner_address(&self, node_id: &str) -> Result<Option<String>>;
}

/// Resolver over a fixed node table from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticOwnerResolver {
    nodes: HashMap<String, String>,
}

impl StaticOwnerResolver {
    pub fn new(nodes: HashMap<String, String>) -> Self {
        let nodes = nodes
            .into_iter()
            .map(|(id, addr)| (id, addr.trim_end_matches('/').to_string()))
            .collect();
        Self { nodes }
    }

    pub fn with_node(mut self, node_id: impl Into<String>, address: impl Into<String>) -> Self {
        let address = address.into().trim_end_matches('/').to_string();
        self.nodes.insert(node_id.into(), address);
        self
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[async_trait]
impl OwnerResolver for StaticOwnerResolver {
    async fn resolve_owner_address(&self, node_id: &str) -> Result<Option<String>> {
        Ok(self.nodes.get(node_id).cloned())
    }
}
