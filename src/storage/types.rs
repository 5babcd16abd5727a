use serde::{Deserialize, Serialize, Serializer, ser::SerializeSeq};
use std::fmt;

use crate::error::ShardError;

/// Identifier of a backing store node.
///
/// This is the node's connection URL (`http://10.0.0.5:7001`, `memory://a`). It is hashed
/// onto the ring, so two spellings of the same address are two different nodes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The URL scheme, lowercased (`"http"`, `"memory"`), if the id has one.
    pub fn scheme(&self) -> Option<String> {
        self.0
            .split_once("://")
            .map(|(scheme, _)| scheme.to_ascii_lowercase())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Outcome of a membership change.
///
/// `failures` holds one `MigrationPartialFailure` per key whose move did not fully
/// complete; those keys may be duplicated or transiently missing. `stranded` lists the
/// keys of a removed node that were never copied anywhere: their only value is left on
/// a node the service no longer talks to.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    pub node: NodeId,
    pub moved: usize,
    #[serde(serialize_with = "serialize_failures")]
    pub failures: Vec<ShardError>,
    pub stranded: Vec<String>,
}

impl MigrationReport {
    pub fn empty(node: NodeId) -> Self {
        Self {
            node,
            moved: 0,
            failures: Vec::new(),
            stranded: Vec::new(),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

// Failures go over the admin API as their display strings.
fn serialize_failures<S: Serializer>(failures: &[ShardError], s: S) -> Result<S::Ok, S::Error> {
    let mut seq = s.serialize_seq(Some(failures.len()))?;
    for failure in failures {
        seq.serialize_element(&failure.to_string())?;
    }
    seq.end()
}
