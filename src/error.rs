//! Error types for the sharded counter.
//!
//! Library operations return [`ShardError`]; the binary and configuration glue use
//! `anyhow` on top of it.

use crate::storage::types::NodeId;
use thiserror::Error;

/// Errors raised by the ring, the store manager and the counting service.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShardError {
    /// The ring has no positions, so no node can own a key.
    #[error("No nodes available")]
    NoNodesAvailable,

    /// Refused to remove the only remaining node.
    #[error("Cannot remove the last node: {0}")]
    LastNodeRemoval(NodeId),

    /// The node is not part of the current membership.
    #[error("Unknown node: {0}")]
    UnknownNode(NodeId),

    /// No client implementation exists for the node identifier.
    #[error("Unsupported node address: {0}")]
    UnsupportedNode(NodeId),

    /// Transport failure talking to a single node.
    #[error("Node {node} unreachable: {reason}")]
    NodeUnreachable { node: NodeId, reason: String },

    /// One half of a key move (copy or delete) failed.
    #[error("Migration of key '{key}' from {from} to {to} incomplete: {reason}")]
    MigrationPartialFailure {
        key: String,
        from: NodeId,
        to: NodeId,
        reason: String,
    },

    /// The page id / key was rejected before reaching the store.
    #[error("Invalid key: '{0}'")]
    InvalidKey(String),

    /// A stored value could not be read as a counter.
    #[error("Value under key '{key}' is not an integer: {reason}")]
    InvalidValue { key: String, reason: String },
}

impl ShardError {
    pub fn unreachable(node: &NodeId, reason: impl ToString) -> Self {
        Self::NodeUnreachable {
            node: node.clone(),
            reason: reason.to_string(),
        }
    }

    /// True when the failure means the service cannot currently answer at all.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            ShardError::NoNodesAvailable | ShardError::NodeUnreachable { .. }
        )
    }
}

pub type ShardResult<T> = std::result::Result<T, ShardError>;
