use super::config::Candidate;
use super::launcher::NodeLauncher;
use crate::coordination::{
    CoordError, CoordinationAdapter, ROOT_PATH, WatchedEvent, Watcher, inbox_path, node_path,
};
use crate::metadata::{CacheStrategy, MessageTag, Ring, RingNode};

use anyhow::{Result, anyhow, bail};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::Instant;
use tracing::{debug, info, warn};

struct EcsState {
    ring: Ring,
    taken: HashSet<String>,
    running: bool,
}

/// The external configuration service: owns the ring and drives every
/// membership change through the coordination tree.
///
/// All ring transitions hold the state lock for their whole duration, so
/// two transitions never overlap.
pub struct Ecs {
    coord: CoordinationAdapter,
    launcher: Arc<dyn NodeLauncher>,
    candidates: Vec<Candidate>,
    state: Mutex<EcsState>,
    await_timeout: Duration,
}

impl Ecs {
    /// Prepares `/ecs` with an empty body (all stopped).
    pub async fn new(
        coord: CoordinationAdapter,
        launcher: Arc<dyn NodeLauncher>,
        candidates: Vec<Candidate>,
        await_timeout: Duration,
    ) -> Result<Self> {
        coord.ensure_path(ROOT_PATH, "").await?;
        coord.write(ROOT_PATH, "").await?;
        info!("Coordinator ready with {} candidate nodes", candidates.len());

        Ok(Self {
            coord,
            launcher,
            candidates,
            state: Mutex::new(EcsState {
                ring: Ring::empty(),
                taken: HashSet::new(),
                running: false,
            }),
            await_timeout,
        })
    }

    pub async fn ring(&self) -> Ring {
        self.state.lock().await.ring.clone()
    }

    pub async fn is_running(&self) -> bool {
        self.state.lock().await.running
    }

    /// Candidates not currently part of the ring, in config order.
    pub async fn available(&self) -> Vec<Candidate> {
        let state = self.state.lock().await;
        self.free_candidates(&state).cloned().collect()
    }

    fn free_candidates<'a>(&'a self, state: &'a EcsState) -> impl Iterator<Item = &'a Candidate> {
        self.candidates
            .iter()
            .filter(|c| !state.taken.contains(&c.name))
    }

    /// Picks `count` free candidates and stamps their cache parameters.
    /// Nothing is reserved until the nodes are added.
    pub async fn setup_nodes(
        &self,
        count: usize,
        strategy: CacheStrategy,
        cache_size: usize,
    ) -> Result<Vec<RingNode>> {
        let state = self.state.lock().await;
        self.select(&state, count, strategy, cache_size)
    }

    fn select(
        &self,
        state: &EcsState,
        count: usize,
        strategy: CacheStrategy,
        cache_size: usize,
    ) -> Result<Vec<RingNode>> {
        let free: Vec<&Candidate> = self.free_candidates(state).collect();
        if count == 0 {
            bail!("node count must be positive");
        }
        if free.len() < count {
            bail!(
                "requested {} nodes but only {} candidates are free",
                count,
                free.len()
            );
        }
        Ok(free
            .into_iter()
            .take(count)
            .map(|c| c.to_ring_node(strategy, cache_size))
            .collect())
    }

    // ============================================================
    // MEMBERSHIP CHANGES
    // ============================================================

    /// Launches `count` new nodes, hands them their ranges and publishes
    /// the grown ring on `/ecs`.
    pub async fn add_nodes(
        &self,
        count: usize,
        strategy: CacheStrategy,
        cache_size: usize,
    ) -> Result<Vec<RingNode>> {
        let mut state = self.state.lock().await;
        let nodes = self.select(&state, count, strategy, cache_size)?;

        let mut ring = state.ring.clone();
        for node in &nodes {
            ring = ring.with_node(node.clone())?;
        }

        for node in &nodes {
            self.launcher.launch(node).await?;
            state.taken.insert(node.name.clone());
        }

        let names: Vec<String> = nodes.iter().map(|n| n.name.clone()).collect();
        if !self.await_nodes(&names, self.await_timeout).await? {
            for name in &names {
                state.taken.remove(name);
                self.coord.delete_recursive(&node_path(name)).await?;
            }
            bail!("nodes {:?} did not register within {:?}", names, self.await_timeout);
        }

        let blob = ring.serialize(MessageTag::Metadata)?;
        let members = ring.names();
        for member in &members {
            self.coord.write(&node_path(member), &blob).await?;
        }
        if !self.await_acks(&members, self.await_timeout).await? {
            warn!("Not every node acknowledged the new ring in time");
        }

        self.coord.write(ROOT_PATH, &blob).await?;
        state.ring = ring;
        state.running = true;
        info!(added = ?names, members = state.ring.len(), "Nodes added");
        Ok(nodes)
    }

    /// Retires nodes one at a time. Each leaving node moves its range to
    /// its successor before the shrunk ring is published.
    pub async fn remove_nodes(&self, names: &[String]) -> Result<()> {
        let mut state = self.state.lock().await;
        for name in names {
            if !state.ring.contains(name) {
                bail!("{} is not part of the ring", name);
            }
        }

        for name in names {
            let ring = state.ring.without_node(name)?;
            let path = node_path(name);

            self.coord
                .write(&path, &ring.serialize(MessageTag::Metadata)?)
                .await?;
            if !self.await_acks(std::slice::from_ref(name), self.await_timeout).await? {
                warn!(node = %name, "Node did not confirm its retirement in time");
            }
            self.coord.delete_recursive(&path).await?;

            state.ring = ring;
            state.taken.remove(name);
            self.publish_root(&state).await?;
            info!(node = %name, members = state.ring.len(), "Node removed");
        }
        Ok(())
    }

    async fn publish_root(&self, state: &EcsState) -> Result<()> {
        if state.running && !state.ring.is_empty() {
            let blob = state.ring.serialize(MessageTag::Metadata)?;
            self.coord.write(ROOT_PATH, &blob).await?;
        } else {
            self.coord.write(ROOT_PATH, "").await?;
        }
        Ok(())
    }

    // ============================================================
    // CLUSTER LIFECYCLE
    // ============================================================

    pub async fn start(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.ring.is_empty() {
            bail!("no nodes to start");
        }
        state.running = true;
        self.publish_root(&state).await?;
        info!("Started {} nodes", state.ring.len());
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.running = false;
        self.publish_root(&state).await?;
        info!("Stopped all nodes");
        Ok(())
    }

    /// Deletes every node's subtree, then the root. Nodes close when their
    /// paths disappear.
    pub async fn shutdown(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        for name in state.ring.names() {
            self.coord.delete_recursive(&node_path(&name)).await?;
        }
        self.coord.delete_recursive(ROOT_PATH).await?;

        state.ring = Ring::empty();
        state.taken.clear();
        state.running = false;
        info!("Cluster shut down");
        Ok(())
    }

    // ============================================================
    // WAITING
    // ============================================================

    /// Waits until every node in `names` has registered both its node path
    /// and its inbox. Returns `false` on timeout.
    pub async fn await_nodes(&self, names: &[String], timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        let (watcher, mut events) = Watcher::channel();

        loop {
            let children: HashSet<String> = self
                .coord
                .watch_children(ROOT_PATH, &watcher)
                .await?
                .into_iter()
                .collect();

            let mut missing = 0;
            for name in names {
                if !children.contains(name)
                    || !self.coord.exists(&inbox_path(name), Some(&watcher)).await?
                {
                    missing += 1;
                }
            }
            if missing == 0 {
                debug!(?names, "All nodes registered");
                return Ok(true);
            }

            debug!(missing, "Waiting for nodes to register");
            if !wait_event(&mut events, deadline).await? {
                return Ok(false);
            }
        }
    }

    /// Waits until the own-node body of every node in `names` is empty.
    /// A node whose path is gone counts as done.
    pub async fn await_acks(&self, names: &[String], timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        let (watcher, mut events) = Watcher::channel();

        for name in names {
            let path = node_path(name);
            loop {
                match self.coord.read(&path, Some(&watcher)).await {
                    Ok(body) if body.is_empty() => break,
                    Ok(_) => {}
                    Err(CoordError::NoNode(_)) => break,
                    Err(e) => return Err(e.into()),
                }
                if !wait_event(&mut events, deadline).await? {
                    return Ok(false);
                }
            }
            debug!(node = %name, "Ring acknowledged");
        }
        Ok(true)
    }
}

/// Waits for the next watch event. `Ok(false)` when the deadline passes.
async fn wait_event(
    events: &mut UnboundedReceiver<WatchedEvent>,
    deadline: Instant,
) -> Result<bool> {
    match tokio::time::timeout_at(deadline, events.recv()).await {
        Ok(Some(event)) if event.is_disconnect() => Err(anyhow!("coordination session lost")),
        Ok(Some(_)) => Ok(true),
        Ok(None) | Err(_) => Ok(false),
    }
}
