//! Node Controller
//!
//! Reacts to the coordinator through three watched paths:
//!
//! - **Root** (`/ecs`): the published ring. An empty body stops the node,
//!   a ring starts it (if stopped) and becomes the local snapshot.
//! - **Own node** (`/ecs/<name>`): a ring to reconcile against. The node
//!   hands data off as needed and then writes an empty body as its
//!   acknowledgement.
//! - **Inbox** (`/ecs/<name>/data`): one `{key, value}` pair in flight from
//!   another node. It is stored and the inbox is emptied, which is the
//!   signal the sender waits for.
//!
//! Each path has its own dispatcher task. A dispatcher re-reads its path
//! and re-arms the watch in one step before acting, so no change can slip
//! between two events. Handler errors are logged; only a lost session
//! or the deletion of the node's paths ends the node.
//!
//! A targeted ring is diffed against the ring currently published at the
//! root, read at that moment, never against the local snapshot: the root
//! dispatcher runs independently and may not have installed it yet.
//! A retiring node write-locks itself before it scans its data and hands
//! every local pair to that pair's owner in the targeted ring.

use super::node::KvNode;
use super::types::{ServerState, TransferEntry};
use crate::coordination::{
    CoordinationAdapter, EventKind, ROOT_PATH, WatchedEvent, Watcher, inbox_path, node_path,
};
use crate::metadata::{HashRange, Ring};

use anyhow::{Result, anyhow};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Channel {
    Root,
    OwnNode,
    Inbox,
}

pub struct NodeController {
    node: Arc<KvNode>,
    coord: CoordinationAdapter,
    transfer_timeout: Duration,
    node_path: String,
    inbox_path: String,
}

impl NodeController {
    /// Registers the node's paths and starts the three dispatchers.
    ///
    /// Any stale `/ecs/<name>` subtree is replaced. Each dispatcher begins
    /// with a synthetic change event so that bodies written before the
    /// watches were armed are still processed.
    pub async fn start(
        node: Arc<KvNode>,
        coord: CoordinationAdapter,
        transfer_timeout: Duration,
    ) -> Result<Arc<Self>> {
        let name = node.name().to_string();
        let controller = Arc::new(Self {
            node_path: node_path(&name),
            inbox_path: inbox_path(&name),
            node,
            coord,
            transfer_timeout,
        });

        controller
            .coord
            .create_persistent(&controller.node_path, "", None)
            .await?;
        controller
            .coord
            .create_persistent(&controller.inbox_path, "", None)
            .await?;

        for (channel, path) in [
            (Channel::Root, ROOT_PATH.to_string()),
            (Channel::OwnNode, controller.node_path.clone()),
            (Channel::Inbox, controller.inbox_path.clone()),
        ] {
            let (watcher, events) = Watcher::channel();
            watcher.notify(WatchedEvent::node(EventKind::NodeDataChanged, path));
            controller.clone().spawn_dispatcher(channel, watcher, events);
        }

        info!(node = %name, "Controller started");
        Ok(controller)
    }

    pub fn node(&self) -> &Arc<KvNode> {
        &self.node
    }

    /// Closes the coordination session.
    pub async fn shutdown(&self) {
        self.coord.close().await;
    }

    fn spawn_dispatcher(
        self: Arc<Self>,
        channel: Channel,
        watcher: Watcher,
        mut events: UnboundedReceiver<WatchedEvent>,
    ) {
        tokio::spawn(async move {
            let mut closed = self.node.subscribe_closed();
            loop {
                if *closed.borrow() {
                    break;
                }
                let event = tokio::select! {
                    event = events.recv() => event,
                    _ = closed.wait_for(|c| *c) => break,
                };
                let Some(event) = event else {
                    break;
                };

                if event.is_disconnect() {
                    error!(node = %self.node.name(), "Lost coordination session, shutting down");
                    self.node.close();
                    break;
                }

                debug!(node = %self.node.name(), ?channel, ?event.kind, "Watch event");
                let result = match channel {
                    Channel::Root => self.on_root(&event, &watcher).await,
                    Channel::OwnNode => self.on_own_node(&event, &watcher).await,
                    Channel::Inbox => self.on_inbox(&event, &watcher).await,
                };
                if let Err(e) = result {
                    error!(node = %self.node.name(), ?channel, "Watch handler failed: {:#}", e);
                }
            }
            debug!(node = %self.node.name(), ?channel, "Dispatcher stopped");
        });
    }

    // ============================================================
    // ROOT
    // ============================================================

    async fn on_root(&self, event: &WatchedEvent, watcher: &Watcher) -> Result<()> {
        match event.kind {
            EventKind::NodeDeleted => {
                info!(node = %self.node.name(), "Root removed, shutting down");
                self.node.close();
                Ok(())
            }
            EventKind::NodeCreated | EventKind::NodeDataChanged => {
                let body = self.coord.read(ROOT_PATH, Some(watcher)).await?;
                self.apply_root(&body)
            }
            _ => {
                self.coord.exists(ROOT_PATH, Some(watcher)).await?;
                Ok(())
            }
        }
    }

    fn apply_root(&self, body: &str) -> Result<()> {
        if body.is_empty() {
            self.node.set_state(ServerState::Stopped);
            return Ok(());
        }
        let ring = Ring::deserialize(body)?;
        if self.node.state() == ServerState::Stopped {
            self.node.set_state(ServerState::Started);
        }
        self.node.install_ring(ring);
        Ok(())
    }

    // ============================================================
    // OWN NODE
    // ============================================================

    async fn on_own_node(&self, event: &WatchedEvent, watcher: &Watcher) -> Result<()> {
        match event.kind {
            EventKind::NodeDeleted => {
                info!(node = %self.node.name(), "Node path removed, shutting down");
                self.node.close();
                Ok(())
            }
            EventKind::NodeCreated | EventKind::NodeDataChanged => {
                let body = self.coord.read(&self.node_path, Some(watcher)).await?;
                if body.is_empty() {
                    return Ok(());
                }
                let ring = Ring::deserialize(&body)?;
                self.reconcile(ring).await
            }
            _ => {
                self.coord.exists(&self.node_path, Some(watcher)).await?;
                Ok(())
            }
        }
    }

    /// Acts on a targeted ring: retire, hand off to new neighbors, or
    /// join. Always ends with the acknowledgement.
    async fn reconcile(&self, new: Ring) -> Result<()> {
        let name = self.node.name().to_string();

        if !new.contains(&name) {
            if self.node.state() == ServerState::Started {
                self.node.set_state(ServerState::WriteLocked);
            }
            self.retire(&new).await;
            self.acknowledge().await?;
            self.node.close();
            return Ok(());
        }

        let old = self.published_ring().await?;

        if !old.contains(&name) {
            // Joining: whatever this node already holds in its new range is
            // offered to the node it takes the range from.
            if let (Some(range), Some(coordinator)) = (new.hash_range(&name), new.coordinator_of(&name)) {
                let range = range.clone();
                let target = coordinator.name.clone();
                self.move_data(&range, &target).await;
            }
            info!(node = %name, "Joined ring of {} nodes", new.len());
            return self.acknowledge().await;
        }

        let arrivals: Vec<(String, HashRange)> = new
            .new_arrivals_before(&old, &name)
            .into_iter()
            .map(|n| (n.name.clone(), n.hash_range.clone()))
            .collect();

        if !arrivals.is_empty() {
            let previous = self.node.state();
            if previous == ServerState::Started {
                self.node.set_state(ServerState::WriteLocked);
            }

            for (target, range) in &arrivals {
                info!(node = %name, to = %target, range = %range, "Handing off range");
                self.move_data(range, target).await;
            }

            self.node.install_ring(new);
            if self.node.state() == ServerState::WriteLocked {
                self.node.set_state(previous);
            }
        }

        self.acknowledge().await
    }

    /// The ring published at the root, or the local snapshot while the
    /// root is empty (cluster stopped).
    async fn published_ring(&self) -> Result<Arc<Ring>> {
        let body = self.coord.read(ROOT_PATH, None).await?;
        if body.is_empty() {
            return Ok(self.node.ring());
        }
        Ok(Arc::new(Ring::deserialize(&body)?))
    }

    /// Hands every local pair to its owner in `new`. The node stays
    /// write-locked from here until it closes.
    async fn retire(&self, new: &Ring) {
        let name = self.node.name();
        if new.is_empty() {
            warn!(node = %name, "Retiring with no remaining node, data stays local");
            return;
        }
        let pairs = match self.local_pairs(None).await {
            Ok(pairs) => pairs,
            Err(e) => {
                error!(node = %name, "Cannot scan local data: {:#}", e);
                return;
            }
        };

        let mut by_owner: BTreeMap<String, Vec<(String, String)>> = BTreeMap::new();
        for (key, value) in pairs {
            if let Some(owner) = new.owner_of(&key) {
                by_owner.entry(owner.name.clone()).or_default().push((key, value));
            }
        }
        for (target, pairs) in by_owner {
            info!(node = %name, to = %target, count = pairs.len(), "Retiring, moving pairs");
            self.send_pairs(pairs, &target).await;
        }
    }

    async fn acknowledge(&self) -> Result<()> {
        self.coord.write(&self.node_path, "").await?;
        debug!(node = %self.node.name(), "Acknowledged ring");
        Ok(())
    }

    // ============================================================
    // INBOX
    // ============================================================

    async fn on_inbox(&self, event: &WatchedEvent, watcher: &Watcher) -> Result<()> {
        match event.kind {
            EventKind::NodeCreated | EventKind::NodeDataChanged => {
                let body = self.coord.read(&self.inbox_path, Some(watcher)).await?;
                if body.is_empty() {
                    return Ok(());
                }
                let TransferEntry { key, value } = serde_json::from_str(&body)?;
                let stored = key.clone();
                self.node
                    .run_blocking(move |node| node.put_local(&key, &value))
                    .await??;
                debug!(node = %self.node.name(), key = %stored, "Received transferred pair");
                self.coord.write(&self.inbox_path, "").await?;
                Ok(())
            }
            EventKind::NodeDeleted => Ok(()),
            _ => {
                self.coord.exists(&self.inbox_path, Some(watcher)).await?;
                Ok(())
            }
        }
    }

    // ============================================================
    // TRANSFER
    // ============================================================

    /// Sends every local pair in `range` to `target`, one at a time, and
    /// tombstones each pair once the target has emptied its inbox.
    ///
    /// A pair that is not acknowledged within the transfer timeout is
    /// logged as `TRANSFER_FAILED` and kept locally. Returns the number of
    /// pairs moved.
    pub async fn move_data(&self, range: &HashRange, target: &str) -> usize {
        let name = self.node.name();
        let pairs = match self.local_pairs(Some(range.clone())).await {
            Ok(pairs) => pairs,
            Err(e) => {
                error!(node = %name, "Cannot scan range {}: {:#}", range, e);
                return 0;
            }
        };
        if pairs.is_empty() {
            debug!(node = %name, to = %target, "No pairs to move in {}", range);
            return 0;
        }
        self.send_pairs(pairs, target).await
    }

    async fn local_pairs(&self, range: Option<HashRange>) -> Result<Vec<(String, String)>> {
        let pairs = self
            .node
            .run_blocking(move |node| match &range {
                Some(range) => node.pairs_in(range),
                None => node.all_pairs(),
            })
            .await??;
        Ok(pairs)
    }

    async fn send_pairs(&self, pairs: Vec<(String, String)>, target: &str) -> usize {
        let name = self.node.name();
        info!(node = %name, to = %target, count = pairs.len(), "Moving data");
        let inbox = inbox_path(target);
        let (ack, mut acks) = Watcher::channel();
        let mut moved = 0;

        for (key, value) in pairs {
            match self.transfer_one(&inbox, &key, &value, &ack, &mut acks).await {
                Ok(()) => {
                    if let Err(e) = self.forget(key.clone()).await {
                        error!(node = %name, key = %key, "Cannot remove moved key: {:#}", e);
                    }
                    moved += 1;
                }
                Err(e) => {
                    warn!(node = %name, to = %target, key = %key, "TRANSFER_FAILED: {:#}", e);
                }
            }
        }

        info!(node = %name, to = %target, moved, "Transfer finished");
        moved
    }

    async fn forget(&self, key: String) -> Result<()> {
        self.node.run_blocking(move |node| node.forget(&key)).await??;
        Ok(())
    }

    async fn transfer_one(
        &self,
        inbox: &str,
        key: &str,
        value: &str,
        ack: &Watcher,
        acks: &mut UnboundedReceiver<WatchedEvent>,
    ) -> Result<()> {
        let body = serde_json::to_string(&TransferEntry {
            key: key.to_string(),
            value: value.to_string(),
        })?;
        self.coord.write(inbox, &body).await?;

        let deadline = Instant::now() + self.transfer_timeout;
        loop {
            if self.coord.read(inbox, Some(ack)).await?.is_empty() {
                return Ok(());
            }
            match tokio::time::timeout_at(deadline, acks.recv()).await {
                Ok(Some(event)) if event.is_disconnect() => {
                    return Err(anyhow!("coordination session lost"));
                }
                Ok(Some(_)) => continue,
                Ok(None) => return Err(anyhow!("acknowledgement channel closed")),
                Err(_) => {
                    return Err(anyhow!(
                        "no acknowledgement within {:?}",
                        self.transfer_timeout
                    ));
                }
            }
        }
    }
}
