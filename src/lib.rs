//! Sharded Visit Counter Library
//!
//! This library crate defines the core modules of the counter service.
//! It serves as the foundation for the binary executable (`main.rs`).
//!
//! ## Architecture Modules
//! - **`storage`**: The sharded persistence layer. A consistent hash ring places every key
//!   on one backing key-value node; `ShardManager` routes reads and increments to that node
//!   and moves keys around when nodes join or leave.
//! - **`counter`**: The visit counting service. Buffers increments in memory, flushes them
//!   periodically, and answers reads from a short-lived cache merged with the buffer.
//! - **`config`**: Defaults, environment variables and command-line flags.
//! - **`error`**: The `ShardError` type shared by all of the above.

pub mod config;
pub mod counter;
pub mod error;
pub mod storage;
