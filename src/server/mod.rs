//! Storage Node Module
//!
//! Everything a single storage node runs: the client-facing request server
//! and the controller that follows the coordinator.
//!
//! ## Core Concepts
//! - **Serving state**: `STOPPED` refuses everything, `STARTED` serves the
//!   node's own range, `WRITE_LOCKED` serves reads while the node hands a
//!   part of its range to a newcomer.
//! - **Ownership**: each request is checked against the node's ring
//!   snapshot. Keys owned elsewhere are answered with
//!   `SERVER_NOT_RESPONSIBLE` and the whole ring, so the client can retry
//!   at the right node.
//! - **Controller**: watches `/ecs`, `/ecs/<name>` and `/ecs/<name>/data`.
//!   Ring messages on the own-node path trigger handoffs, which move data
//!   one pair at a time through the receiver's inbox.
//!
//! ## Submodules
//! - **`protocol`**: the `STATUS␟KEY␟VALUE␃` text frames.
//! - **`node`**: shared node state and request handling.
//! - **`service`**: TCP accept loop, one task per connection.
//! - **`watcher`**: the `NodeController`.
//! - **`runtime`**: wiring for the `kv-server` binary and in-process nodes.

pub mod node;
pub mod protocol;
pub mod runtime;
pub mod service;
pub mod types;
pub mod watcher;

pub use node::KvNode;
pub use protocol::{KvMessage, ProtocolError, StatusType};
pub use runtime::{NodeConfig, NodeHandle, launch};
pub use service::KvService;
pub use types::{ServerState, TransferEntry};
pub use watcher::NodeController;
