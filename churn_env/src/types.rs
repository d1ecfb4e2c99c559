//! Common types for the churn environment abstraction.

use serde::{Deserialize, Serialize};

/// Index of a participant slot in the group.
///
/// Slot 0 is the anchor and is never failed by the churn process.
/// Trials only target slots `1..N`; bootstrap also starts the anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeIndex(pub usize);

impl NodeIndex {
    /// The anchor slot.
    pub const ANCHOR: NodeIndex = NodeIndex(0);

    /// Returns the raw slot index.
    pub fn get(&self) -> usize {
        self.0
    }

    /// Returns true for the anchor slot.
    pub fn is_anchor(&self) -> bool {
        self.0 == 0
    }
}

impl From<usize> for NodeIndex {
    fn from(index: usize) -> Self {
        Self(index)
    }
}

impl std::fmt::Display for NodeIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "node-{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_index_display() {
        assert_eq!(NodeIndex(7).to_string(), "node-7");
        assert!(NodeIndex::ANCHOR.is_anchor());
        assert!(!NodeIndex::from(1).is_anchor());
    }

    #[test]
    fn test_node_index_ordering() {
        let mut nodes = vec![NodeIndex(3), NodeIndex(1), NodeIndex(2)];
        nodes.sort();
        assert_eq!(nodes, vec![NodeIndex(1), NodeIndex(2), NodeIndex(3)]);
    }
}
