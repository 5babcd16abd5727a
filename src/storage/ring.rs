use super::types::NodeId;

use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound::{Excluded, Unbounded};

pub const DEFAULT_VIRTUAL_NODES: usize = 100;

/// Consistent hash ring with virtual nodes.
///
/// Every physical node is placed at `virtual_nodes` positions, `hash("{node}#{i}")`.
/// A key belongs to the first position strictly after `hash(key)`, wrapping around to
/// the lowest position. Positions are never overwritten: when two virtual nodes land on
/// the same hash, the one inserted first keeps it.
#[derive(Debug, Clone)]
pub struct HashRing {
    virtual_nodes: usize,
    positions: BTreeMap<u32, NodeId>,
}

impl HashRing {
    pub fn new(virtual_nodes: usize) -> Self {
        Self {
            virtual_nodes,
            positions: BTreeMap::new(),
        }
    }

    pub fn with_nodes<I>(nodes: I, virtual_nodes: usize) -> Self
    where
        I: IntoIterator<Item = NodeId>,
    {
        let mut ring = Self::new(virtual_nodes);
        for node in nodes {
            ring.add(&node);
        }
        ring
    }

    /// Position of `key` on the ring: SHA-256 reduced modulo 2^32.
    pub fn hash(key: &str) -> u32 {
        let digest = Sha256::digest(key.as_bytes());
        let tail: [u8; 4] = [digest[28], digest[29], digest[30], digest[31]];
        u32::from_be_bytes(tail)
    }

    fn virtual_key(node: &NodeId, replica: usize) -> String {
        format!("{}#{}", node.as_str(), replica)
    }

    /// Places the node's virtual nodes. Returns how many positions were actually taken.
    pub fn add(&mut self, node: &NodeId) -> usize {
        let mut inserted = 0;
        for replica in 0..self.virtual_nodes {
            let position = Self::hash(&Self::virtual_key(node, replica));
            if self.positions.contains_key(&position) {
                continue;
            }
            self.positions.insert(position, node.clone());
            inserted += 1;
        }
        inserted
    }

    /// Drops every position owned by `node`. Returns how many were removed.
    pub fn remove(&mut self, node: &NodeId) -> usize {
        let before = self.positions.len();
        self.positions.retain(|_, owner| owner != node);
        before - self.positions.len()
    }

    pub fn locate(&self, key: &str) -> Option<&NodeId> {
        let hash = Self::hash(key);
        self.positions
            .range((Excluded(hash), Unbounded))
            .next()
            .or_else(|| self.positions.iter().next())
            .map(|(_, node)| node)
    }

    pub fn contains(&self, node: &NodeId) -> bool {
        self.positions.values().any(|owner| owner == node)
    }

    /// Distinct nodes holding at least one position, sorted.
    pub fn nodes(&self) -> Vec<NodeId> {
        self.positions
            .values()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn positions_of(&self, node: &NodeId) -> usize {
        self.positions.values().filter(|owner| *owner == node).count()
    }

    pub fn virtual_nodes(&self) -> usize {
        self.virtual_nodes
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

impl Default for HashRing {
    fn default() -> Self {
        Self::new(DEFAULT_VIRTUAL_NODES)
    }
}
