use super::remote::RemoteSession;
use super::session::Coordination;
use super::types::{CoordError, CoordResult, Watcher};

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Root of the store's control plane. Its body is the published ring, or
/// empty when the whole cluster is stopped.
pub const ROOT_PATH: &str = "/ecs";

/// Per-node command channel: a ring to act on, or empty once acknowledged.
pub fn node_path(name: &str) -> String {
    format!("{}/{}", ROOT_PATH, name)
}

/// Per-node single-slot transfer inbox.
pub fn inbox_path(name: &str) -> String {
    format!("{}/{}/data", ROOT_PATH, name)
}

/// Text-oriented helpers over a [`Coordination`] session.
#[derive(Clone)]
pub struct CoordinationAdapter {
    session: Arc<dyn Coordination>,
}

impl CoordinationAdapter {
    pub fn new(session: Arc<dyn Coordination>) -> Self {
        Self { session }
    }

    /// Connects to a remote coordination service, failing after `timeout`.
    pub async fn ensure_session(address: &str, timeout: Duration) -> CoordResult<Self> {
        let session = RemoteSession::connect(address, timeout).await?;
        Ok(Self::new(session))
    }

    pub fn session(&self) -> &Arc<dyn Coordination> {
        &self.session
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    /// Creates `path` with `data`, replacing any existing node (and its
    /// subtree). When `watcher` is given it is armed on the new node.
    pub async fn create_persistent(
        &self,
        path: &str,
        data: &str,
        watcher: Option<&Watcher>,
    ) -> CoordResult<()> {
        if self.session.exists(path, None).await?.is_some() {
            debug!("Replacing existing node {}", path);
            self.delete_recursive(path).await?;
        }
        self.session.create(path, data.as_bytes()).await?;
        info!("Created {}", path);

        if let Some(watcher) = watcher {
            self.session.exists(path, Some(watcher)).await?;
        }
        Ok(())
    }

    /// Creates `path` only if it is missing.
    pub async fn ensure_path(&self, path: &str, data: &str) -> CoordResult<()> {
        match self.session.create(path, data.as_bytes()).await {
            Ok(()) | Err(CoordError::NodeExists(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Current body of `path`, arming `watcher` for the next change in the
    /// same step.
    pub async fn read(&self, path: &str, watcher: Option<&Watcher>) -> CoordResult<String> {
        let (data, _) = self.session.get_data(path, watcher).await?;
        Ok(String::from_utf8_lossy(&data).into_owned())
    }

    pub async fn write(&self, path: &str, data: &str) -> CoordResult<()> {
        self.session.set_data(path, data.as_bytes()).await?;
        debug!("Wrote {} bytes to {}", data.len(), path);
        Ok(())
    }

    pub async fn exists(&self, path: &str, watcher: Option<&Watcher>) -> CoordResult<bool> {
        Ok(self.session.exists(path, watcher).await?.is_some())
    }

    /// Deletes a leaf node. A missing node is not an error.
    pub async fn delete(&self, path: &str) -> CoordResult<()> {
        match self.session.delete(path).await {
            Ok(()) | Err(CoordError::NoNode(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Deletes `path` and everything below it, children first.
    pub async fn delete_recursive(&self, path: &str) -> CoordResult<()> {
        let mut stack = vec![path.to_string()];
        let mut order = Vec::new();
        while let Some(current) = stack.pop() {
            match self.session.get_children(&current, None).await {
                Ok(children) => {
                    stack.extend(children.iter().map(|child| format!("{}/{}", current, child)));
                    order.push(current);
                }
                Err(CoordError::NoNode(_)) => {}
                Err(e) => return Err(e),
            }
        }
        for node in order.iter().rev() {
            self.delete(node).await?;
        }
        Ok(())
    }

    /// One-shot watch on the child list of `path`; returns the current list.
    pub async fn watch_children(&self, path: &str, watcher: &Watcher) -> CoordResult<Vec<String>> {
        self.session.get_children(path, Some(watcher)).await
    }

    pub async fn close(&self) {
        self.session.close().await;
    }
}
