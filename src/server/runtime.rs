use super::node::KvNode;
use super::service::KvService;
use super::watcher::NodeController;
use crate::cache::ReadCache;
use crate::config::{SESSION_TIMEOUT, TRANSFER_TIMEOUT};
use crate::coordination::CoordinationAdapter;
use crate::metadata::CacheStrategy;
use crate::storage::{KvDb, StorageConfig};

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub name: String,
    /// Host the client listener binds to.
    pub host: String,
    /// Client port; 0 picks a free one.
    pub port: u16,
    pub cache_strategy: CacheStrategy,
    pub cache_size: usize,
    pub storage: StorageConfig,
    pub transfer_timeout: Duration,
}

impl NodeConfig {
    pub fn new(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port,
            cache_strategy: CacheStrategy::None,
            cache_size: 0,
            storage: StorageConfig::default(),
            transfer_timeout: TRANSFER_TIMEOUT,
        }
    }
}

/// A running node: client listener plus controller.
pub struct NodeHandle {
    node: Arc<KvNode>,
    controller: Arc<NodeController>,
    addr: SocketAddr,
}

impl NodeHandle {
    pub fn node(&self) -> &Arc<KvNode> {
        &self.node
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Resolves once the node has closed and its session is released.
    pub async fn wait(self) {
        self.node.wait_closed().await;
        self.controller.shutdown().await;
        info!(node = %self.node.name(), "Node stopped");
    }
}

/// Opens storage, binds the client port and registers with the
/// coordinator. The node serves in `STOPPED` until a ring is published.
pub async fn launch(config: NodeConfig, coord: CoordinationAdapter) -> Result<NodeHandle> {
    let storage = KvDb::open(&config.name, config.storage.clone())
        .with_context(|| format!("opening storage for {}", config.name))?;
    let cache = ReadCache::new(config.cache_strategy, config.cache_size);
    let node = KvNode::new(config.name.clone(), storage, cache);

    let service = KvService::bind(node.clone(), &format!("{}:{}", config.host, config.port)).await?;
    let addr = service.local_addr()?;

    let controller = NodeController::start(node.clone(), coord, config.transfer_timeout)
        .await
        .context("registering with the coordinator")?;

    tokio::spawn(service.run());
    info!(node = %config.name, "Node up on {}", addr);

    Ok(NodeHandle {
        node,
        controller,
        addr,
    })
}

/// Process entry point of `kv-server`: connects to the coordination
/// service and runs until the node is retired or the session is lost.
pub async fn run(config: NodeConfig, coordinator: &str) -> Result<()> {
    let coord = CoordinationAdapter::ensure_session(coordinator, SESSION_TIMEOUT)
        .await
        .with_context(|| format!("connecting to coordination service at {}", coordinator))?;

    let handle = launch(config, coord).await?;
    let node = handle.node().clone();
    tokio::spawn(async move {
        if node.wait_started().await {
            info!(node = %node.name(), "Serving requests");
        }
    });

    handle.wait().await;
    Ok(())
}
