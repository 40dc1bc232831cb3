//! Ways of bringing a storage node up.
//!
//! The coordinator only needs a node to appear under `/ecs` eventually;
//! how its process gets there is up to the launcher.

use crate::coordination::{CoordinationAdapter, LocalSession, MemoryTree};
use crate::metadata::RingNode;
use crate::server::{KvNode, NodeConfig, launch};
use crate::storage::StorageConfig;

use anyhow::{Context, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{info, warn};

#[async_trait]
pub trait NodeLauncher: Send + Sync {
    /// Starts `node`. Returns once the launch was issued, not once the node
    /// has registered.
    async fn launch(&self, node: &RingNode) -> Result<()>;
}

/// Positional arguments of `kv-server`.
fn server_args(node: &RingNode, coord_host: &str, coord_port: u16) -> Vec<String> {
    vec![
        node.name.clone(),
        coord_host.to_string(),
        coord_port.to_string(),
        node.port.to_string(),
        node.cache_strategy.to_string(),
        node.cache_size.to_string(),
    ]
}

/// Processes a launcher spawned. Exited ones are reaped before each new
/// one is added.
#[derive(Default)]
struct Children(Mutex<Vec<Child>>);

impl Children {
    fn track(&self, child: Child) {
        self.reap();
        self.0.lock().push(child);
    }

    /// Reaps exited processes and returns how many are still running.
    fn reap(&self) -> usize {
        let mut children = self.0.lock();
        children.retain_mut(|c| matches!(c.try_wait(), Ok(None)));
        children.len()
    }
}

/// Starts nodes on their configured host with
/// `ssh -n <host> nohup <server-bin> <args> &`.
pub struct SshLauncher {
    server_bin: String,
    coord_host: String,
    coord_port: u16,
    sessions: Children,
}

impl SshLauncher {
    pub fn new(server_bin: impl Into<String>, coord_host: impl Into<String>, coord_port: u16) -> Self {
        Self {
            server_bin: server_bin.into(),
            coord_host: coord_host.into(),
            coord_port,
            sessions: Children::default(),
        }
    }
}

#[async_trait]
impl NodeLauncher for SshLauncher {
    async fn launch(&self, node: &RingNode) -> Result<()> {
        let mut command = Command::new("ssh");
        command
            .arg("-n")
            .arg(&node.host)
            .arg("nohup")
            .arg(&self.server_bin)
            .args(server_args(node, &self.coord_host, self.coord_port))
            .arg("&")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        info!(node = %node.name, host = %node.host, "Launching over ssh");
        let child = command
            .spawn()
            .with_context(|| format!("running ssh for {}", node.name))?;
        self.sessions.track(child);
        Ok(())
    }
}

/// Starts nodes as child processes of the coordinator.
pub struct ProcessLauncher {
    server_bin: String,
    coord_host: String,
    coord_port: u16,
    children: Children,
}

impl ProcessLauncher {
    pub fn new(server_bin: impl Into<String>, coord_host: impl Into<String>, coord_port: u16) -> Self {
        Self {
            server_bin: server_bin.into(),
            coord_host: coord_host.into(),
            coord_port,
            children: Children::default(),
        }
    }
}

#[async_trait]
impl NodeLauncher for ProcessLauncher {
    async fn launch(&self, node: &RingNode) -> Result<()> {
        let child = Command::new(&self.server_bin)
            .args(server_args(node, &self.coord_host, self.coord_port))
            .stdin(Stdio::null())
            .spawn()
            .with_context(|| format!("spawning {} for {}", self.server_bin, node.name))?;

        info!(node = %node.name, pid = ?child.id(), "Launched local process");
        self.children.track(child);
        Ok(())
    }
}

/// Runs nodes as tasks of the current runtime, each with its own session on
/// a shared in-memory tree.
pub struct InProcessLauncher {
    tree: Arc<MemoryTree>,
    storage: StorageConfig,
    transfer_timeout: Duration,
    nodes: Arc<DashMap<String, Arc<KvNode>>>,
}

impl InProcessLauncher {
    pub fn new(tree: Arc<MemoryTree>, storage: StorageConfig, transfer_timeout: Duration) -> Self {
        Self {
            tree,
            storage,
            transfer_timeout,
            nodes: Arc::new(DashMap::new()),
        }
    }

    /// A node that is still running.
    pub fn node(&self, name: &str) -> Option<Arc<KvNode>> {
        self.nodes.get(name).map(|n| n.value().clone())
    }

    pub fn running(&self) -> Vec<String> {
        let mut names: Vec<String> = self.nodes.iter().map(|n| n.key().clone()).collect();
        names.sort();
        names
    }
}

#[async_trait]
impl NodeLauncher for InProcessLauncher {
    async fn launch(&self, node: &RingNode) -> Result<()> {
        let config = NodeConfig {
            name: node.name.clone(),
            host: node.host.clone(),
            port: node.port,
            cache_strategy: node.cache_strategy,
            cache_size: node.cache_size,
            storage: self.storage.clone(),
            transfer_timeout: self.transfer_timeout,
        };
        let coord = CoordinationAdapter::new(LocalSession::new(self.tree.clone()));
        let handle = launch(config, coord).await?;

        let name = node.name.clone();
        self.nodes.insert(name.clone(), handle.node().clone());
        let nodes = self.nodes.clone();
        tokio::spawn(async move {
            handle.wait().await;
            if nodes.remove(&name).is_none() {
                warn!(node = %name, "Stopped node was not tracked");
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::Children;
    use std::time::Duration;
    use tokio::process::Command;

    #[tokio::test]
    async fn test_exited_children_are_reaped() {
        let children = Children::default();
        for _ in 0..3 {
            children.track(Command::new("true").spawn().unwrap());
        }

        let mut running = children.reap();
        for _ in 0..250 {
            if running == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
            running = children.reap();
        }
        assert_eq!(running, 0);

        children.track(Command::new("sleep").arg("5").kill_on_drop(true).spawn().unwrap());
        assert_eq!(children.reap(), 1);
    }
}
