//! Identity of this node.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Process-wide label of this node, fixed for the process lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeIdentity {
    pub id: String,
    /// Write `ownerNode` on session records and forward to owners.
    /// When false the fleet runs fully stateless.
    pub track_ownership: bool,
}

impl NodeIdentity {
    pub fn new(id: impl Into<String>, track_ownership: bool) -> Self {
        Self {
            id: id.into(),
            track_ownership,
        }
    }

    /// Random identity for a node with no configured label.
    pub fn generate(track_ownership: bool) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self::new(format!("node-{}", &suffix[..8]), track_ownership)
    }

    /// Value written to `ownerNode`, if ownership is tracked.
    pub fn owner_label(&self) -> Option<String> {
        self.track_ownership.then(|| self.id.clone())
    }

    pub fn is(&self, node_id: &str) -> bool {
        self.id == node_id
    }
}
