//! Node Client Abstraction
//!
//! Every backing store is reached through [`NodeClient`], a small key-value contract
//! (get / set / delete / incr_by / scan). The store manager never knows whether a node
//! lives in-process or behind HTTP; it asks a [`NodeConnector`] for a client when a
//! node joins.

use super::memory::{MemoryNode, MemoryRegistry};
use super::remote::RemoteNode;
use super::types::NodeId;
use crate::error::{ShardError, ShardResult};

use async_trait::async_trait;
use regex::Regex;
use std::sync::Arc;

/// Operations a single backing node must support.
#[async_trait]
pub trait NodeClient: Send + Sync {
    /// Reads a counter. `None` when the key is absent.
    async fn get(&self, key: &str) -> ShardResult<Option<i64>>;

    async fn set(&self, key: &str, value: i64) -> ShardResult<()>;

    /// Deletes a key, returning whether it existed.
    async fn delete(&self, key: &str) -> ShardResult<bool>;

    /// Atomically adds `amount` (absent counts as 0) and returns the new value.
    async fn incr_by(&self, key: &str, amount: i64) -> ShardResult<i64>;

    /// Keys matching a glob pattern (`*` and `?` wildcards).
    async fn scan_keys(&self, pattern: &str) -> ShardResult<Vec<String>>;
}

/// Opens a client for a node identifier.
#[async_trait]
pub trait NodeConnector: Send + Sync {
    async fn connect(&self, node: &NodeId) -> ShardResult<Arc<dyn NodeClient>>;
}

/// Chooses the client by URL scheme.
///
/// `memory://name` resolves to an in-process store from the shared registry, so the same
/// name always reaches the same data; `http://` and `https://` get a [`RemoteNode`].
pub struct SchemeConnector {
    memory: Arc<MemoryRegistry>,
    http_client: reqwest::Client,
}

impl SchemeConnector {
    pub fn new(memory: Arc<MemoryRegistry>) -> Self {
        Self {
            memory,
            http_client: reqwest::Client::new(),
        }
    }
}

impl Default for SchemeConnector {
    fn default() -> Self {
        Self::new(Arc::new(MemoryRegistry::default()))
    }
}

#[async_trait]
impl NodeConnector for SchemeConnector {
    async fn connect(&self, node: &NodeId) -> ShardResult<Arc<dyn NodeClient>> {
        match node.scheme().as_deref() {
            Some("memory") => {
                let store: Arc<MemoryNode> = self.memory.open(node);
                Ok(store)
            }
            Some("http") | Some("https") => {
                let remote = RemoteNode::new(node.clone(), self.http_client.clone());
                remote.ping().await?;
                Ok(Arc::new(remote))
            }
            _ => Err(ShardError::UnsupportedNode(node.clone())),
        }
    }
}

/// Compiles a scan glob into an anchored regex.
pub fn glob_to_regex(pattern: &str) -> ShardResult<Regex> {
    let mut expr = String::with_capacity(pattern.len() + 8);
    expr.push_str("(?s)^");
    for ch in pattern.chars() {
        match ch {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            other => expr.push_str(&regex::escape(&other.to_string())),
        }
    }
    expr.push('$');
    Regex::new(&expr).map_err(|_| ShardError::InvalidKey(pattern.to_string()))
}
