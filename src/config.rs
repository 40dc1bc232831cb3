//! Shared timeouts and defaults for the node and coordinator binaries.

use std::time::Duration;

/// Address the coordinator hosts its coordination service on.
pub const DEFAULT_COORDINATION_ADDR: &str = "127.0.0.1:2181";

pub const DEFAULT_ECS_CONFIG: &str = "ecs.config";

/// Connecting to the coordination service fails after this long.
pub const SESSION_TIMEOUT: Duration = Duration::from_secs(5);

/// How long a sender waits for one transferred pair to be acknowledged.
pub const TRANSFER_TIMEOUT: Duration = Duration::from_secs(10);

/// How long the coordinator waits for launched nodes to register, and for
/// ring acknowledgements.
pub const AWAIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Client connect and per-request budget.
pub const CLIENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Redirect and retry budget of a single client operation.
pub const CLIENT_MAX_ATTEMPTS: usize = 10;

pub const CLIENT_RETRY_BASE: Duration = Duration::from_millis(50);

pub const DEFAULT_SERVER_BIN: &str = "kv-server";
