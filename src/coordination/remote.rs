//! Remote Coordination Session
//!
//! TCP client for the `CoordinationServer`. One task owns the write half and
//! drains an outbound queue; another owns the read half and routes frames:
//! responses complete the pending request with the same id, events go to
//! the local watcher registered under the echoed watch id.
//!
//! Watchers whose receiving end is gone are dropped from the routing table
//! the next time a watch is armed or an event for them arrives.
//!
//! When the read half ends, every pending request fails with
//! `ConnectionLoss` and every watcher the session has seen receives a
//! `Disconnected` event.

use super::protocol::{Reply, Request, RequestFrame, ServerFrame, read_frame, write_frame};
use super::session::Coordination;
use super::types::{CoordError, CoordResult, Stat, WatchedEvent, Watcher};

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

type Pending = DashMap<u64, oneshot::Sender<CoordResult<Reply>>>;

struct Shared {
    pending: Pending,
    watchers: DashMap<u64, Watcher>,
    connected: AtomicBool,
}

impl Shared {
    fn disconnect(&self) {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return;
        }
        // Dropping the senders fails every in-flight request.
        self.pending.clear();
        for entry in self.watchers.iter() {
            entry.value().notify(WatchedEvent::disconnected());
        }
        self.watchers.clear();
    }
}

pub struct RemoteSession {
    id: String,
    next_request: AtomicU64,
    outbound: mpsc::UnboundedSender<Option<RequestFrame>>,
    shared: Arc<Shared>,
    request_timeout: Duration,
}

impl RemoteSession {
    /// Connects and completes a ping round-trip, failing after `timeout`.
    pub async fn connect(address: &str, timeout: Duration) -> CoordResult<Arc<Self>> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(address))
            .await
            .map_err(|_| CoordError::Timeout(format!("connect to {}", address)))?
            .map_err(|e| CoordError::ConnectionLoss(format!("{}: {}", address, e)))?;
        stream.set_nodelay(true).ok();

        let (reader, writer) = stream.into_split();
        let (outbound, queue) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            pending: DashMap::new(),
            watchers: DashMap::new(),
            connected: AtomicBool::new(true),
        });

        tokio::spawn(write_loop(writer, queue, shared.clone()));
        tokio::spawn(read_loop(reader, shared.clone()));

        let mut session = Self {
            id: String::new(),
            next_request: AtomicU64::new(1),
            outbound,
            shared,
            request_timeout: timeout,
        };

        match session.call(Request::Ping).await? {
            Reply::Pong { session: id } => session.id = id,
            other => {
                return Err(CoordError::ConnectionLoss(format!(
                    "unexpected handshake reply {:?}",
                    other
                )));
            }
        }

        info!("Connected to coordination service at {} (session {})", address, session.id);
        Ok(Arc::new(session))
    }

    pub fn session_id(&self) -> &str {
        &self.id
    }

    /// Number of watchers events can currently be routed to.
    pub fn watcher_count(&self) -> usize {
        self.shared.watchers.len()
    }

    fn remember(&self, watcher: Option<&Watcher>) -> Option<u64> {
        let watcher = watcher?;
        self.shared.watchers.retain(|_, w| !w.is_closed());
        self.shared.watchers.insert(watcher.id(), watcher.clone());
        Some(watcher.id())
    }

    async fn call(&self, request: Request) -> CoordResult<Reply> {
        if !self.shared.connected.load(Ordering::SeqCst) {
            return Err(CoordError::ConnectionLoss("session closed".to_string()));
        }

        let id = self.next_request.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.shared.pending.insert(id, tx);

        if self.outbound.send(Some(RequestFrame { id, request })).is_err() {
            self.shared.pending.remove(&id);
            return Err(CoordError::ConnectionLoss("writer stopped".to_string()));
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(CoordError::ConnectionLoss("session closed".to_string())),
            Err(_) => {
                self.shared.pending.remove(&id);
                Err(CoordError::Timeout(format!("request {}", id)))
            }
        }
    }
}

fn unexpected(reply: Reply) -> CoordError {
    CoordError::ConnectionLoss(format!("unexpected reply {:?}", reply))
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut queue: mpsc::UnboundedReceiver<Option<RequestFrame>>,
    shared: Arc<Shared>,
) {
    while let Some(Some(frame)) = queue.recv().await {
        if let Err(e) = write_frame(&mut writer, &frame).await {
            warn!("Coordination write failed: {}", e);
            shared.disconnect();
            return;
        }
    }
    let _ = writer.shutdown().await;
}

async fn read_loop(mut reader: OwnedReadHalf, shared: Arc<Shared>) {
    loop {
        match read_frame::<_, ServerFrame>(&mut reader).await {
            Ok(Some(ServerFrame::Response { id, result })) => {
                if let Some((_, tx)) = shared.pending.remove(&id) {
                    let _ = tx.send(result);
                }
            }
            Ok(Some(ServerFrame::Event { watch, event })) => {
                let delivered = shared
                    .watchers
                    .get(&watch)
                    .is_some_and(|watcher| watcher.notify(event));
                if !delivered {
                    shared.watchers.remove(&watch);
                }
            }
            Ok(None) => {
                debug!("Coordination service closed the session");
                break;
            }
            Err(e) => {
                warn!("Coordination read failed: {}", e);
                break;
            }
        }
    }
    shared.disconnect();
}

#[async_trait]
impl Coordination for RemoteSession {
    async fn exists(&self, path: &str, watcher: Option<&Watcher>) -> CoordResult<Option<Stat>> {
        let watch = self.remember(watcher);
        match self
            .call(Request::Exists {
                path: path.to_string(),
                watch,
            })
            .await?
        {
            Reply::Stat(stat) => Ok(stat),
            other => Err(unexpected(other)),
        }
    }

    async fn create(&self, path: &str, data: &[u8]) -> CoordResult<()> {
        match self
            .call(Request::Create {
                path: path.to_string(),
                data: data.to_vec(),
            })
            .await?
        {
            Reply::Done => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    async fn get_data(
        &self,
        path: &str,
        watcher: Option<&Watcher>,
    ) -> CoordResult<(Vec<u8>, Stat)> {
        let watch = self.remember(watcher);
        match self
            .call(Request::GetData {
                path: path.to_string(),
                watch,
            })
            .await?
        {
            Reply::Data(data, stat) => Ok((data, stat)),
            other => Err(unexpected(other)),
        }
    }

    async fn set_data(&self, path: &str, data: &[u8]) -> CoordResult<Stat> {
        match self
            .call(Request::SetData {
                path: path.to_string(),
                data: data.to_vec(),
            })
            .await?
        {
            Reply::Stat(Some(stat)) => Ok(stat),
            other => Err(unexpected(other)),
        }
    }

    async fn delete(&self, path: &str) -> CoordResult<()> {
        match self
            .call(Request::Delete {
                path: path.to_string(),
            })
            .await?
        {
            Reply::Done => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    async fn get_children(
        &self,
        path: &str,
        watcher: Option<&Watcher>,
    ) -> CoordResult<Vec<String>> {
        let watch = self.remember(watcher);
        match self
            .call(Request::GetChildren {
                path: path.to_string(),
                watch,
            })
            .await?
        {
            Reply::Children(children) => Ok(children),
            other => Err(unexpected(other)),
        }
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        // `None` tells the writer to shut the socket down; the server then
        // closes its side and the reader reports the disconnect.
        let _ = self.outbound.send(None);
    }
}
