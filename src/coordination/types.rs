use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

/// What happened to a watched path.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EventKind {
    /// Session-level event, no path involved.
    None,
    NodeCreated,
    NodeDeleted,
    NodeDataChanged,
    NodeChildrenChanged,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SessionState {
    SyncConnected,
    Disconnected,
}

/// A single watch notification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WatchedEvent {
    pub kind: EventKind,
    pub state: SessionState,
    pub path: String,
}

impl WatchedEvent {
    pub fn node(kind: EventKind, path: impl Into<String>) -> Self {
        Self {
            kind,
            state: SessionState::SyncConnected,
            path: path.into(),
        }
    }

    pub fn disconnected() -> Self {
        Self {
            kind: EventKind::None,
            state: SessionState::Disconnected,
            path: String::new(),
        }
    }

    pub fn is_disconnect(&self) -> bool {
        self.state == SessionState::Disconnected
    }
}

static NEXT_WATCHER_ID: AtomicU64 = AtomicU64::new(1);

/// Receiving end of a watch registration.
///
/// A watcher may be armed on many paths. Each arming fires at most once;
/// arming the same watcher twice on one path before it fires is a no-op.
#[derive(Debug, Clone)]
pub struct Watcher {
    id: u64,
    sink: mpsc::UnboundedSender<WatchedEvent>,
}

impl Watcher {
    pub fn new(sink: mpsc::UnboundedSender<WatchedEvent>) -> Self {
        Self {
            id: NEXT_WATCHER_ID.fetch_add(1, Ordering::Relaxed),
            sink,
        }
    }

    /// A fresh watcher together with the stream of its events.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<WatchedEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Delivers `event`. Returns `false` once the receiver is gone.
    pub fn notify(&self, event: WatchedEvent) -> bool {
        self.sink.send(event).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.sink.is_closed()
    }
}

/// Metadata of a tree node.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Stat {
    /// Incremented on every data change.
    pub version: u32,
    pub num_children: usize,
}

#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum CoordError {
    #[error("no node at {0}")]
    NoNode(String),

    #[error("node already exists at {0}")]
    NodeExists(String),

    #[error("node at {0} has children")]
    NotEmpty(String),

    #[error("parent of {0} does not exist")]
    NoParent(String),

    #[error("invalid path: {0}")]
    BadPath(String),

    #[error("connection lost: {0}")]
    ConnectionLoss(String),

    #[error("request timed out: {0}")]
    Timeout(String),
}

pub type CoordResult<T> = Result<T, CoordError>;
