//! Coordination Service Module
//!
//! The shared control plane between the coordinator and the storage nodes.
//!
//! ## Core Concepts
//! - **Tree**: a hierarchy of persistent nodes, each holding a text body
//!   (`MemoryTree`). The coordinator process hosts it.
//! - **Single-fire watches**: a reader may arm a watcher on a path; the next
//!   change delivers exactly one `WatchedEvent`, after which it must re-arm.
//! - **Sessions**: `LocalSession` talks to a tree in the same process,
//!   `RemoteSession` talks to a `CoordinationServer` over TCP. Both implement
//!   the `Coordination` trait. Losing a session notifies every watcher with a
//!   `Disconnected` event.
//! - **Adapter**: `CoordinationAdapter` offers the text-level primitives the
//!   control protocol is written in (`create_persistent`, `read`, `write`,
//!   `delete`, `watch_children`) and the `/ecs` path layout.

pub mod adapter;
pub mod protocol;
pub mod remote;
pub mod server;
pub mod session;
pub mod tree;
pub mod types;

pub use adapter::{CoordinationAdapter, ROOT_PATH, inbox_path, node_path};
pub use remote::RemoteSession;
pub use server::CoordinationServer;
pub use session::{Coordination, LocalSession};
pub use tree::MemoryTree;
pub use types::{CoordError, CoordResult, EventKind, SessionState, Stat, WatchedEvent, Watcher};

#[cfg(test)]
mod tests;
