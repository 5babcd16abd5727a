use super::client::{NodeClient, glob_to_regex};
use super::types::NodeId;
use crate::error::{ShardError, ShardResult};

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// In-process key-value store backing one node.
///
/// Used for `memory://` node ids and as the data behind the storage-node HTTP server.
/// A node can be switched offline, after which every call fails with `NodeUnreachable`
/// exactly like a dead remote would.
pub struct MemoryNode {
    id: NodeId,
    data: DashMap<String, i64>,
    offline: AtomicBool,
}

impl MemoryNode {
    pub fn new(id: NodeId) -> Self {
        Self {
            id,
            data: DashMap::new(),
            offline: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
        tracing::info!("Node {} is now {}", self.id, if offline { "offline" } else { "online" });
    }

    fn check_online(&self) -> ShardResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(ShardError::unreachable(&self.id, "node is offline"));
        }
        Ok(())
    }

    pub fn get_local(&self, key: &str) -> Option<i64> {
        self.data.get(key).map(|value| *value)
    }

    pub fn store_local(&self, key: &str, value: i64) {
        self.data.insert(key.to_string(), value);
    }

    pub fn local_entry_count(&self) -> usize {
        self.data.len()
    }
}

#[async_trait]
impl NodeClient for MemoryNode {
    async fn get(&self, key: &str) -> ShardResult<Option<i64>> {
        self.check_online()?;
        Ok(self.get_local(key))
    }

    async fn set(&self, key: &str, value: i64) -> ShardResult<()> {
        self.check_online()?;
        self.store_local(key, value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> ShardResult<bool> {
        self.check_online()?;
        Ok(self.data.remove(key).is_some())
    }

    async fn incr_by(&self, key: &str, amount: i64) -> ShardResult<i64> {
        self.check_online()?;
        let mut entry = self.data.entry(key.to_string()).or_insert(0);
        *entry += amount;
        Ok(*entry)
    }

    async fn scan_keys(&self, pattern: &str) -> ShardResult<Vec<String>> {
        self.check_online()?;
        let matcher = glob_to_regex(pattern)?;
        Ok(self
            .data
            .iter()
            .filter(|entry| matcher.is_match(entry.key()))
            .map(|entry| entry.key().clone())
            .collect())
    }
}

/// Named in-process stores, shared by every connector that points at them.
///
/// Opening `memory://a` twice yields the same store, so data outlives a remove/add cycle
/// of the node exactly as a real server would.
#[derive(Default)]
pub struct MemoryRegistry {
    nodes: DashMap<NodeId, Arc<MemoryNode>>,
}

impl MemoryRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn open(&self, id: &NodeId) -> Arc<MemoryNode> {
        self.nodes
            .entry(id.clone())
            .or_insert_with(|| Arc::new(MemoryNode::new(id.clone())))
            .clone()
    }

    pub fn get(&self, id: &NodeId) -> Option<Arc<MemoryNode>> {
        self.nodes.get(id).map(|node| node.value().clone())
    }
}
