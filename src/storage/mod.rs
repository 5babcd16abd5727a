//! Sharded Storage Module
//!
//! Spreads counter keys over several backing key-value nodes.
//!
//! ## Core Concepts
//! - **Placement**: `HashRing` maps each key to one node using virtual-node consistent hashing.
//! - **Routing**: `ShardManager` owns one client per node and sends every get / increment to the owner.
//! - **Membership**: adding or removing a node updates the ring and moves only the keys whose owner changed.
//! - **Nodes**: `NodeClient` is the per-node contract; `MemoryNode` runs in-process and `RemoteNode`
//!   talks HTTP to a storage node serving `handlers::node_router`.

pub mod client;
pub mod handlers;
pub mod manager;
pub mod memory;
pub mod protocol;
pub mod remote;
pub mod ring;
pub mod types;

#[cfg(test)]
mod tests;
