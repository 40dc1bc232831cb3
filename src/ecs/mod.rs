//! External Configuration Service Module
//!
//! The coordinator of the store. It hosts the coordination tree, launches
//! storage nodes and changes the ring one transition at a time.
//!
//! ## Core Concepts
//! - **Candidates**: the static pool of launchable nodes from `ecs.config`.
//!   A candidate is taken while it is in the ring and returns to the pool
//!   once removed.
//! - **Transitions**: adding or removing nodes writes the next ring to the
//!   affected `/ecs/<name>` paths, waits until each of them is emptied again
//!   (the node's acknowledgement), and only then publishes the ring on `/ecs`.
//! - **Start/stop**: `/ecs` holds the ring while serving and an empty body
//!   while stopped.
//!
//! ## Submodules
//! - **`config`**: `ecs.config` parsing.
//! - **`launcher`**: ssh, local process and in-process node launchers.
//! - **`service`**: the `Ecs` state machine.
//! - **`cli`**: the interactive command loop.

pub mod cli;
pub mod config;
pub mod launcher;
pub mod service;

pub use config::{Candidate, ConfigError, load_config, parse_config};
pub use launcher::{InProcessLauncher, NodeLauncher, ProcessLauncher, SshLauncher};
pub use service::Ecs;

#[cfg(test)]
mod tests;
