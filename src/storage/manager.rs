//! Sharded Store Manager
//!
//! Owns one [`NodeClient`] per backing node and routes every key through the
//! [`HashRing`]. Membership changes (add / remove) update the ring and then move the
//! affected keys between nodes.
//!
//! ## Consistency
//! Membership changes are serialized among themselves but not against `get` /
//! `increment`. While a key is in flight it may read as absent on both nodes, and an
//! increment routed with the old ring may land on the old owner. Moves copy before they
//! delete, so a failed half leaves a duplicate rather than losing the value.

use super::client::{NodeClient, NodeConnector};
use super::ring::HashRing;
use super::types::{MigrationReport, NodeId};
use crate::error::{ShardError, ShardResult};

use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

const SCAN_ALL: &str = "*";

pub struct ShardManager {
    ring: RwLock<HashRing>,
    clients: DashMap<NodeId, Arc<dyn NodeClient>>,
    connector: Arc<dyn NodeConnector>,
    membership_lock: tokio::sync::Mutex<()>,
}

impl ShardManager {
    /// Creates a manager with no nodes. Every keyed call fails until a node is added.
    pub fn new(virtual_nodes: usize, connector: Arc<dyn NodeConnector>) -> Self {
        Self {
            ring: RwLock::new(HashRing::new(virtual_nodes)),
            clients: DashMap::new(),
            connector,
            membership_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Connects to every configured node in order.
    ///
    /// Each node joins through [`add_node`](Self::add_node), so data left on the nodes
    /// by an earlier run is moved to where the current ring wants it.
    pub async fn connect(
        nodes: Vec<NodeId>,
        virtual_nodes: usize,
        connector: Arc<dyn NodeConnector>,
    ) -> ShardResult<Arc<Self>> {
        if nodes.is_empty() {
            return Err(ShardError::NoNodesAvailable);
        }

        let manager = Self::new(virtual_nodes, connector);
        for node in nodes {
            let report = manager.add_node(node).await?;
            if !report.is_clean() {
                tracing::warn!(
                    "Startup migration onto {} left {} keys unmoved",
                    report.node,
                    report.failures.len()
                );
            }
        }
        Ok(Arc::new(manager))
    }

    fn route(&self, key: &str) -> ShardResult<(NodeId, Arc<dyn NodeClient>)> {
        let node = self
            .ring
            .read()
            .locate(key)
            .cloned()
            .ok_or(ShardError::NoNodesAvailable)?;
        let client = self
            .clients
            .get(&node)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ShardError::UnknownNode(node.clone()))?;
        Ok((node, client))
    }

    /// Reads the authoritative value. `None` means the owning node has no such key.
    pub async fn get(&self, key: &str) -> ShardResult<Option<i64>> {
        let (node, client) = self.route(key)?;
        tracing::debug!("GET {} -> {}", key, node);
        client.get(key).await
    }

    /// Atomically adds `amount` on the owning node and returns the new value.
    pub async fn increment(&self, key: &str, amount: i64) -> ShardResult<i64> {
        let (node, client) = self.route(key)?;
        tracing::debug!("INCRBY {} {} -> {}", key, amount, node);
        client.incr_by(key, amount).await
    }

    /// Node currently owning `key`.
    pub fn locate_node(&self, key: &str) -> ShardResult<NodeId> {
        self.ring
            .read()
            .locate(key)
            .cloned()
            .ok_or(ShardError::NoNodesAvailable)
    }

    /// Current members, sorted.
    pub fn node_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.clients.iter().map(|entry| entry.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn node_count(&self) -> usize {
        self.clients.len()
    }

    pub fn client(&self, node: &NodeId) -> Option<Arc<dyn NodeClient>> {
        self.clients.get(node).map(|entry| entry.value().clone())
    }

    pub fn ring_snapshot(&self) -> HashRing {
        self.ring.read().clone()
    }

    fn members(&self) -> Vec<(NodeId, Arc<dyn NodeClient>)> {
        self.clients
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Adds a node and pulls over the keys it now owns.
    ///
    /// Only keys that the new ring assigns to `node`, that the old ring assigned
    /// elsewhere, and that are not already present on `node` are moved. Adding a node
    /// that is already a member does nothing.
    pub async fn add_node(&self, node: NodeId) -> ShardResult<MigrationReport> {
        let _membership = self.membership_lock.lock().await;

        if self.clients.contains_key(&node) {
            tracing::debug!("Node {} already a member", node);
            return Ok(MigrationReport::empty(node));
        }

        tracing::info!("Adding node {}", node);
        let client = self.connector.connect(&node).await?;

        // Everything that can fail is read before the ring changes.
        let already_placed: HashSet<String> =
            client.scan_keys(SCAN_ALL).await?.into_iter().collect();
        let mut candidates = BTreeSet::new();
        for (member, member_client) in self.members() {
            let keys = member_client.scan_keys(SCAN_ALL).await?;
            tracing::debug!("Node {} holds {} keys", member, keys.len());
            candidates.extend(keys.into_iter().filter(|key| !already_placed.contains(key)));
        }

        let old_ring = self.ring.read().clone();
        self.clients.insert(node.clone(), client.clone());
        let new_ring = {
            let mut ring = self.ring.write();
            let placed = ring.add(&node);
            tracing::debug!("Node {} took {} ring positions", node, placed);
            ring.clone()
        };

        let mut report = MigrationReport::empty(node.clone());
        for key in candidates {
            if new_ring.locate(&key) != Some(&node) {
                continue;
            }
            let Some(old_owner) = old_ring.locate(&key).cloned() else {
                continue;
            };
            if old_owner == node {
                continue;
            }
            let Some(source) = self.client(&old_owner) else {
                continue;
            };

            match move_key(&key, &old_owner, source.as_ref(), &node, client.as_ref()).await {
                Ok(true) => report.moved += 1,
                Ok(false) => {}
                Err(failure) => {
                    tracing::warn!("{}", failure.error);
                    report.failures.push(failure.error);
                }
            }
        }

        tracing::info!(
            "Node {} added: {} keys moved, {} failures",
            node,
            report.moved,
            report.failures.len()
        );
        Ok(report)
    }

    /// Removes a node, handing each of its keys to the new owner.
    ///
    /// Fails with `LastNodeRemoval` when `node` is the only member and with
    /// `UnknownNode` when it is not a member; neither changes any state.
    pub async fn remove_node(&self, node: &NodeId) -> ShardResult<MigrationReport> {
        let _membership = self.membership_lock.lock().await;

        let Some(client) = self.client(node) else {
            return Err(ShardError::UnknownNode(node.clone()));
        };
        if self.clients.len() <= 1 {
            tracing::warn!("Refusing to remove the last node {}", node);
            return Err(ShardError::LastNodeRemoval(node.clone()));
        }

        let mut remaining = self.ring.read().clone();
        remaining.remove(node);
        if remaining.is_empty() {
            return Err(ShardError::LastNodeRemoval(node.clone()));
        }

        tracing::info!("Removing node {}", node);
        let new_ring = {
            let mut ring = self.ring.write();
            ring.remove(node);
            ring.clone()
        };

        // Scanning after the ring switch also catches writes routed here just before it.
        let keys = match client.scan_keys(SCAN_ALL).await {
            Ok(keys) => keys,
            Err(e) => {
                // Positions freed above cannot have been taken meanwhile, so this is exact.
                self.ring.write().add(node);
                return Err(e);
            }
        };

        let mut report = MigrationReport::empty(node.clone());
        for key in keys {
            let Some(target_id) = new_ring.locate(&key).cloned() else {
                continue;
            };
            let Some(target) = self.client(&target_id) else {
                continue;
            };

            match move_key(&key, node, client.as_ref(), &target_id, target.as_ref()).await {
                Ok(true) => report.moved += 1,
                Ok(false) => {}
                Err(failure) => {
                    tracing::warn!("{}", failure.error);
                    if !failure.copied {
                        report.stranded.push(key.clone());
                    }
                    report.failures.push(failure.error);
                }
            }
        }

        self.clients.remove(node);
        if report.stranded.is_empty() {
            tracing::info!(
                "Node {} removed: {} keys moved, {} failures",
                node,
                report.moved,
                report.failures.len()
            );
        } else {
            tracing::warn!(
                "Node {} removed: {} keys moved, {} failures, {} keys left only on the removed node",
                node,
                report.moved,
                report.failures.len(),
                report.stranded.len()
            );
        }
        Ok(report)
    }
}

/// A key move that did not fully complete. `copied` is false when the destination
/// never received the value, so the source still holds the only copy.
struct MoveFailure {
    error: ShardError,
    copied: bool,
}

/// Moves one key. `Ok(false)` when the source no longer has it.
///
/// An absent destination is incremented rather than overwritten so that increments
/// which reached the new owner while the key was in flight are kept. A destination
/// that already holds the key is a leftover duplicate from an earlier partial move:
/// it keeps the larger of the two values and the source copy is dropped.
async fn move_key(
    key: &str,
    from_id: &NodeId,
    from: &dyn NodeClient,
    to_id: &NodeId,
    to: &dyn NodeClient,
) -> Result<bool, MoveFailure> {
    let partial = |reason: String, copied: bool| MoveFailure {
        error: ShardError::MigrationPartialFailure {
            key: key.to_string(),
            from: from_id.clone(),
            to: to_id.clone(),
            reason,
        },
        copied,
    };

    let value = match from.get(key).await {
        Ok(Some(value)) => value,
        Ok(None) => return Ok(false),
        Err(e) => return Err(partial(format!("read failed: {}", e), false)),
    };
    let existing = to.get(key).await.map_err(|e| {
        partial(format!("destination read failed, value left on source: {}", e), false)
    })?;

    let Some(current) = existing else {
        tracing::info!("Migrating key {} from {} to {}", key, from_id, to_id);
        to.incr_by(key, value)
            .await
            .map_err(|e| partial(format!("copy failed, value left on source: {}", e), false))?;
        from.delete(key).await.map_err(|e| {
            partial(format!("copied but delete failed, key duplicated: {}", e), true)
        })?;
        return Ok(true);
    };

    let kept = current.max(value);
    if value > current {
        to.set(key, value).await.map_err(|e| {
            partial(format!("duplicate merge failed, larger value left on source: {}", e), true)
        })?;
    }
    from.delete(key)
        .await
        .map_err(|e| partial(format!("duplicate merged but delete failed: {}", e), true))?;
    Err(partial(
        format!("destination already held {} against {}, kept {}", current, value, kept),
        true,
    ))
}
