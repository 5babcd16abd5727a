//! Visit Counter Module
//!
//! The only part of the system with business meaning: "how many times was this page
//! viewed". It sits in front of the sharded store and trades a little freshness for far
//! fewer store round trips.
//!
//! ## Submodules
//! - **`service`**: write-behind buffer, TTL read cache and the periodic flush loop.
//! - **`handlers`**: HTTP endpoints for recording and querying visits, plus node admin.
//! - **`types`**: settings and Data Transfer Objects (DTOs).

pub mod handlers;
pub mod service;
pub mod types;
