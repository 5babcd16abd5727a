use crate::storage::types::NodeId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5);
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(30);

/// `served_via` tag for answers taken from the local cache.
pub const SERVED_IN_MEMORY: &str = "in-memory";

/// Timing knobs of the counting service.
#[derive(Debug, Clone)]
pub struct CounterSettings {
    /// How long a store snapshot may be served from memory.
    pub cache_ttl: Duration,
    /// Period of the background flush loop.
    pub flush_interval: Duration,
    /// Flush the whole buffer once more when the service shuts down.
    pub flush_on_shutdown: bool,
}

impl Default for CounterSettings {
    fn default() -> Self {
        Self {
            cache_ttl: DEFAULT_CACHE_TTL,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            flush_on_shutdown: true,
        }
    }
}

/// Where a visit count came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServedVia {
    InMemory,
    Node(NodeId),
}

impl fmt::Display for ServedVia {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServedVia::InMemory => f.write_str(SERVED_IN_MEMORY),
            ServedVia::Node(node) => write!(f, "{}", node),
        }
    }
}

/// Answer to a visit-count query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VisitCount {
    pub page_id: String,
    pub visits: i64,
    pub served_via: String,
}

impl VisitCount {
    pub fn new(page_id: &str, visits: i64, served_via: &ServedVia) -> Self {
        Self {
            page_id: page_id.to_string(),
            visits,
            served_via: served_via.to_string(),
        }
    }

    pub fn served_from_memory(&self) -> bool {
        self.served_via == SERVED_IN_MEMORY
    }
}

/// Result of one pass over the write buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FlushStats {
    /// Keys whose pending visits reached the store.
    pub flushed_keys: usize,
    /// Total visits applied to the store.
    pub flushed_visits: i64,
    /// Keys whose store call failed; their visits stay buffered.
    pub failed_keys: usize,
}

// --- HTTP DTOs ---

#[derive(Debug, Serialize, Deserialize)]
pub struct RecordResponse {
    pub status: String,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NodeRequest {
    pub node: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NodesResponse {
    pub nodes: Vec<NodeId>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
