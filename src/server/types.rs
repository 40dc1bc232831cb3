use serde::{Deserialize, Serialize};
use std::fmt;

/// Serving state of a storage node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServerState {
    /// Refuses every client request with `SERVER_STOPPED`.
    #[default]
    Stopped,
    Started,
    /// Serves reads, refuses writes with `SERVER_WRITE_LOCK`.
    WriteLocked,
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServerState::Stopped => "STOPPED",
            ServerState::Started => "STARTED",
            ServerState::WriteLocked => "WRITE_LOCKED",
        };
        f.write_str(s)
    }
}

/// Body of a node's transfer inbox while a pair is in flight.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransferEntry {
    pub key: String,
    pub value: String,
}
