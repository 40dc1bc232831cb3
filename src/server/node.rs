//! Storage Node State
//!
//! `KvNode` is the state shared by a node's connection workers and its
//! controller: the storage engine, the read cache, the local ring snapshot
//! and the serving state.
//!
//! Workers take a snapshot of the ring (`Arc<Ring>`) at the start of each
//! request; the controller replaces the snapshot wholesale. The serving
//! state lives in a `watch` channel so startup can wait for the first
//! transition out of `STOPPED`.

use super::protocol::{KvMessage, StatusType};
use super::types::ServerState;
use crate::cache::ReadCache;
use crate::metadata::{HashRange, MessageTag, Ring, fingerprint};
use crate::storage::{KvDb, MAX_KEY_LEN, MAX_VALUE_LEN, PutOutcome, StorageResult};

use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinError;
use tracing::{debug, info, warn};

pub struct KvNode {
    name: String,
    storage: KvDb,
    cache: ReadCache,
    // storage write and cache refresh happen as one step
    writes: Mutex<()>,
    ring: RwLock<Arc<Ring>>,
    state: watch::Sender<ServerState>,
    closed: watch::Sender<bool>,
}

impl KvNode {
    pub fn new(name: impl Into<String>, storage: KvDb, cache: ReadCache) -> Arc<Self> {
        let (state, _) = watch::channel(ServerState::Stopped);
        let (closed, _) = watch::channel(false);
        Arc::new(Self {
            name: name.into(),
            storage,
            cache,
            writes: Mutex::new(()),
            ring: RwLock::new(Arc::new(Ring::empty())),
            state,
            closed,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn storage(&self) -> &KvDb {
        &self.storage
    }

    // ============================================================
    // RING AND STATE
    // ============================================================

    pub fn ring(&self) -> Arc<Ring> {
        self.ring.read().clone()
    }

    pub fn install_ring(&self, ring: Ring) {
        info!(
            node = %self.name,
            members = ring.len(),
            range = ?ring.hash_range(&self.name).map(|r| r.to_string()),
            "Installed ring"
        );
        *self.ring.write() = Arc::new(ring);
    }

    pub fn state(&self) -> ServerState {
        *self.state.borrow()
    }

    pub fn set_state(&self, state: ServerState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            info!(node = %self.name, from = %previous, to = %state, "State changed");
        }
    }

    /// Waits until the node leaves `STOPPED` for the first time, or closes.
    /// Returns `false` when the node closed first.
    pub async fn wait_started(&self) -> bool {
        let mut state = self.state.subscribe();
        let mut closed = self.closed.subscribe();
        if *closed.borrow() {
            return false;
        }
        tokio::select! {
            result = state.wait_for(|s| *s != ServerState::Stopped) => result.is_ok(),
            _ = closed.wait_for(|c| *c) => false,
        }
    }

    /// Whether this node owns `key` under the current snapshot.
    pub fn is_responsible(&self, ring: &Ring, key: &str) -> bool {
        ring.owner_of(key).is_some_and(|owner| owner.name == self.name)
    }

    // ============================================================
    // LIFECYCLE
    // ============================================================

    pub fn close(&self) {
        if !self.closed.send_replace(true) {
            info!(node = %self.name, "Closing node");
            self.set_state(ServerState::Stopped);
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    pub async fn wait_closed(&self) {
        let mut closed = self.closed.subscribe();
        let _ = closed.wait_for(|c| *c).await;
    }

    pub fn subscribe_closed(&self) -> watch::Receiver<bool> {
        self.closed.subscribe()
    }

    // ============================================================
    // LOCAL DATA ACCESS
    // ============================================================

    /// Durable put through the cache. An empty value deletes.
    pub fn put_local(&self, key: &str, value: &str) -> StorageResult<PutOutcome> {
        let _writes = self.writes.lock();
        let outcome = self.storage.put(key, value)?;
        match outcome {
            PutOutcome::Inserted | PutOutcome::Updated => self.cache.put(key, value),
            PutOutcome::Deleted | PutOutcome::Absent => self.cache.invalidate(key),
        }
        Ok(outcome)
    }

    pub fn get_local(&self, key: &str) -> StorageResult<Option<String>> {
        if let Some(value) = self.cache.get(key) {
            return Ok(Some(value));
        }
        let ticket = self.cache.ticket();
        let value = self.storage.get(key)?;
        if let Some(value) = &value {
            self.cache.fill(key, value, ticket);
        }
        Ok(value)
    }

    /// Tombstones a key that has been handed to another node.
    pub fn forget(&self, key: &str) -> StorageResult<bool> {
        let _writes = self.writes.lock();
        let existed = self.storage.delete(key)?;
        self.cache.invalidate(key);
        Ok(existed)
    }

    pub fn pairs_in(&self, range: &HashRange) -> StorageResult<Vec<(String, String)>> {
        self.storage.get_range(range)
    }

    pub fn all_pairs(&self) -> StorageResult<Vec<(String, String)>> {
        self.storage.entries()
    }

    pub fn remove_range(&self, range: &HashRange) -> StorageResult<usize> {
        let _writes = self.writes.lock();
        let removed = self.storage.remove_range(range)?;
        self.cache
            .invalidate_where(|key| range.contains(&fingerprint(key)));
        Ok(removed)
    }

    /// Runs storage-bound `work` on the blocking pool.
    pub async fn run_blocking<T, F>(self: &Arc<Self>, work: F) -> Result<T, JoinError>
    where
        T: Send + 'static,
        F: FnOnce(&KvNode) -> T + Send + 'static,
    {
        let node = self.clone();
        tokio::task::spawn_blocking(move || work(&node)).await
    }

    // ============================================================
    // REQUEST HANDLING
    // ============================================================

    /// Answers one client or peer request.
    pub fn handle(&self, request: KvMessage) -> KvMessage {
        debug!(node = %self.name, request = %request, "Handling request");
        match request.status {
            StatusType::MoveData => self.handle_move(request),
            StatusType::Put | StatusType::Get => self.handle_client(request),
            other => {
                warn!(node = %self.name, status = %other, "Unsupported request status");
                KvMessage::new(StatusType::PutError, request.key, "unsupported request")
            }
        }
    }

    fn handle_client(&self, request: KvMessage) -> KvMessage {
        let KvMessage { status, key, value } = request;
        let is_put = status == StatusType::Put;
        let state = self.state();

        if state == ServerState::Stopped {
            return KvMessage::new(StatusType::ServerStopped, key, "");
        }

        if key.is_empty() || key.len() > MAX_KEY_LEN {
            let refusal = if is_put {
                StatusType::PutError
            } else {
                StatusType::GetError
            };
            return KvMessage::new(refusal, key, "key must be 1 to 20 bytes");
        }
        if is_put && value.len() > MAX_VALUE_LEN {
            return KvMessage::new(StatusType::PutError, key, "value exceeds 120000 bytes");
        }

        let ring = self.ring();
        if !self.is_responsible(&ring, &key) {
            return match ring.serialize(MessageTag::Redirect) {
                Ok(blob) => KvMessage::new(StatusType::ServerNotResponsible, key, blob),
                Err(e) => {
                    warn!(node = %self.name, "Cannot serialize ring for redirect: {}", e);
                    KvMessage::new(StatusType::ServerNotResponsible, key, "")
                }
            };
        }

        if is_put {
            if state == ServerState::WriteLocked {
                return KvMessage::new(StatusType::ServerWriteLock, key, "");
            }
            self.apply_put(key, value)
        } else {
            match self.get_local(&key) {
                Ok(Some(found)) => KvMessage::new(StatusType::GetSuccess, key, found),
                Ok(None) => KvMessage::new(StatusType::GetError, key, ""),
                Err(e) => {
                    warn!(node = %self.name, key = %key, "Get failed: {}", e);
                    KvMessage::new(StatusType::GetError, key, e.to_string())
                }
            }
        }
    }

    fn apply_put(&self, key: String, value: String) -> KvMessage {
        match self.put_local(&key, &value) {
            Ok(PutOutcome::Inserted) => KvMessage::new(StatusType::PutSuccess, key, value),
            Ok(PutOutcome::Updated) => KvMessage::new(StatusType::PutUpdate, key, value),
            Ok(PutOutcome::Deleted) => KvMessage::new(StatusType::DeleteSuccess, key, ""),
            Ok(PutOutcome::Absent) => KvMessage::new(StatusType::DeleteError, key, ""),
            Err(e) => {
                warn!(node = %self.name, key = %key, "Put failed: {}", e);
                KvMessage::new(StatusType::PutError, key, e.to_string())
            }
        }
    }

    fn handle_move(&self, request: KvMessage) -> KvMessage {
        let KvMessage { key, value, .. } = request;
        match self.put_local(&key, &value) {
            Ok(PutOutcome::Updated) => KvMessage::new(StatusType::PutUpdate, key, ""),
            Ok(_) => KvMessage::new(StatusType::PutSuccess, key, ""),
            Err(e) => KvMessage::new(StatusType::PutError, key, e.to_string()),
        }
    }
}
