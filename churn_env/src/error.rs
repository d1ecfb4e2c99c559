//! Error types returned by lifecycle hooks.

use thiserror::Error;

use crate::types::NodeIndex;

/// Errors a [`NodeLifecycle`](crate::NodeLifecycle) hook can report.
///
/// The churn engine never retries on these. A failed hook leaves the
/// node in its previous state and bumps an error counter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HookError {
    /// The start/stop action itself failed (container refused, process exited, ...)
    #[error("Action on {node} failed: {message}")]
    Action { node: NodeIndex, message: String },

    /// The participant could not be reached by the orchestrator
    #[error("Node unreachable: {0}")]
    Unreachable(NodeIndex),

    /// The action did not complete in time
    #[error("Action on {node} timed out after {millis}ms")]
    Timeout { node: NodeIndex, millis: u64 },
}

impl HookError {
    /// Creates an action error.
    pub fn action(node: NodeIndex, message: impl Into<String>) -> Self {
        Self::Action {
            node,
            message: message.into(),
        }
    }

    /// Creates an unreachable error.
    pub fn unreachable(node: NodeIndex) -> Self {
        Self::Unreachable(node)
    }

    /// Returns the node the error concerns.
    pub fn node(&self) -> NodeIndex {
        match self {
            Self::Action { node, .. } | Self::Timeout { node, .. } => *node,
            Self::Unreachable(node) => *node,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hook_error_display() {
        let err = HookError::action(NodeIndex(3), "container exited");
        assert_eq!(err.to_string(), "Action on node-3 failed: container exited");

        let err = HookError::Timeout { node: NodeIndex(2), millis: 500 };
        assert_eq!(err.to_string(), "Action on node-2 timed out after 500ms");
    }

    #[test]
    fn test_hook_error_node() {
        assert_eq!(HookError::unreachable(NodeIndex(5)).node(), NodeIndex(5));
        assert_eq!(HookError::action(NodeIndex(1), "x").node(), NodeIndex(1));
    }
}
