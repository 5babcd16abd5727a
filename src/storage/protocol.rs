//! Storage Node Network Protocol
//!
//! Defines the endpoints and Data Transfer Objects (DTOs) spoken between the counter
//! service ([`RemoteNode`](super::remote::RemoteNode)) and a storage node process.
//!
//! All bodies are JSON. Counter values are plain signed 64-bit integers.

use serde::{Deserialize, Serialize};

// --- API Endpoints ---

/// Read a single key: `GET /kv/get/:key`.
pub const ENDPOINT_GET: &str = "/kv/get";
/// Overwrite a key.
pub const ENDPOINT_SET: &str = "/kv/set";
/// Remove a key.
pub const ENDPOINT_DELETE: &str = "/kv/delete";
/// Atomic add-and-return.
pub const ENDPOINT_INCR: &str = "/kv/incr";
/// Enumerate keys matching a glob, used by migration.
pub const ENDPOINT_SCAN: &str = "/kv/scan";
/// Liveness probe used when a node joins.
pub const ENDPOINT_HEALTH: &str = "/health";

// --- Data Transfer Objects ---

/// Response for a single-key read.
#[derive(Debug, Serialize, Deserialize)]
pub struct GetResponse {
    /// `None` indicates the key does not exist on this node.
    pub value: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SetRequest {
    pub key: String,
    pub value: i64,
}

/// Standard acknowledgment for write operations.
#[derive(Debug, Serialize, Deserialize)]
pub struct SetResponse {
    pub success: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteRequest {
    pub key: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteResponse {
    /// Whether the key existed before the call.
    pub deleted: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IncrRequest {
    pub key: String,
    pub amount: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IncrResponse {
    /// Value after the increment was applied.
    pub value: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ScanParams {
    pub pattern: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ScanResponse {
    pub keys: Vec<String>,
}
