use super::tree::MemoryTree;
use super::types::{CoordError, CoordResult, Stat, WatchedEvent, Watcher};

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// A session against the coordination tree.
///
/// Watchers passed to the read operations are remembered by the session so
/// that losing the session can be reported to each of them as a
/// `Disconnected` event.
#[async_trait]
pub trait Coordination: Send + Sync {
    async fn exists(&self, path: &str, watcher: Option<&Watcher>) -> CoordResult<Option<Stat>>;

    async fn create(&self, path: &str, data: &[u8]) -> CoordResult<()>;

    async fn get_data(&self, path: &str, watcher: Option<&Watcher>)
    -> CoordResult<(Vec<u8>, Stat)>;

    async fn set_data(&self, path: &str, data: &[u8]) -> CoordResult<Stat>;

    async fn delete(&self, path: &str) -> CoordResult<()>;

    async fn get_children(&self, path: &str, watcher: Option<&Watcher>)
    -> CoordResult<Vec<String>>;

    fn is_connected(&self) -> bool;

    /// Ends the session. Every watcher seen by it receives `Disconnected`.
    async fn close(&self);
}

/// Session bound directly to a tree in the same process.
pub struct LocalSession {
    tree: Arc<MemoryTree>,
    watchers: DashMap<u64, Watcher>,
    open: AtomicBool,
}

impl LocalSession {
    pub fn new(tree: Arc<MemoryTree>) -> Arc<Self> {
        Arc::new(Self {
            tree,
            watchers: DashMap::new(),
            open: AtomicBool::new(true),
        })
    }

    fn check(&self) -> CoordResult<()> {
        if self.open.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CoordError::ConnectionLoss("session closed".to_string()))
        }
    }

    fn remember(&self, watcher: Option<&Watcher>) {
        if let Some(watcher) = watcher {
            self.watchers.insert(watcher.id(), watcher.clone());
        }
    }
}

#[async_trait]
impl Coordination for LocalSession {
    async fn exists(&self, path: &str, watcher: Option<&Watcher>) -> CoordResult<Option<Stat>> {
        self.check()?;
        self.remember(watcher);
        self.tree.exists(path, watcher)
    }

    async fn create(&self, path: &str, data: &[u8]) -> CoordResult<()> {
        self.check()?;
        self.tree.create(path, data)
    }

    async fn get_data(
        &self,
        path: &str,
        watcher: Option<&Watcher>,
    ) -> CoordResult<(Vec<u8>, Stat)> {
        self.check()?;
        self.remember(watcher);
        self.tree.get_data(path, watcher)
    }

    async fn set_data(&self, path: &str, data: &[u8]) -> CoordResult<Stat> {
        self.check()?;
        self.tree.set_data(path, data)
    }

    async fn delete(&self, path: &str) -> CoordResult<()> {
        self.check()?;
        self.tree.delete(path)
    }

    async fn get_children(
        &self,
        path: &str,
        watcher: Option<&Watcher>,
    ) -> CoordResult<Vec<String>> {
        self.check()?;
        self.remember(watcher);
        self.tree.get_children(path, watcher)
    }

    fn is_connected(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        if !self.open.swap(false, Ordering::SeqCst) {
            return;
        }
        let ids: Vec<u64> = self.watchers.iter().map(|entry| *entry.key()).collect();
        self.tree.remove_watchers(&ids);
        for entry in self.watchers.iter() {
            entry.value().notify(WatchedEvent::disconnected());
        }
        self.watchers.clear();
    }
}
