//! Ring-Partitioned Key/Value Store Library
//!
//! This library crate holds everything the two binaries are built from:
//! `kv-server` (a storage node) and `ecs` (the coordinator).
//!
//! ## Architecture Modules
//! - **`metadata`**: MD5 fingerprints and the ring, which maps every key to
//!   exactly one node.
//! - **`storage`**: the per-node persistent hash table over memory-mapped,
//!   fixed-size block files.
//! - **`cache`**: the optional bounded read cache in front of storage.
//! - **`coordination`**: the watched tree the coordinator and the nodes
//!   communicate through, served over TCP by the coordinator.
//! - **`server`**: a storage node: request server plus the controller that
//!   reacts to ring changes and moves data between nodes.
//! - **`ecs`**: the coordinator: launching nodes, ring transitions, CLI.
//! - **`client`**: a library client that follows redirects.
//! - **`config`** / **`logging`**: shared defaults and the `tracing` setup.

pub mod cache;
pub mod client;
pub mod config;
pub mod coordination;
pub mod ecs;
pub mod logging;
pub mod metadata;
pub mod server;
pub mod storage;
