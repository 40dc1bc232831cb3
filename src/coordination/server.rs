use super::protocol::{Reply, Request, RequestFrame, ServerFrame, read_frame, write_frame};
use super::tree::MemoryTree;
use super::types::Watcher;

use anyhow::Result;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Serves a [`MemoryTree`] to remote sessions over TCP.
pub struct CoordinationServer {
    tree: Arc<MemoryTree>,
    listener: TcpListener,
}

impl CoordinationServer {
    pub async fn bind(addr: &str, tree: Arc<MemoryTree>) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!("Coordination service listening on {}", listener.local_addr()?);
        Ok(Self { tree, listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn tree(&self) -> Arc<MemoryTree> {
        self.tree.clone()
    }

    /// Accept loop. Runs until the task is aborted.
    pub async fn run(self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    let tree = self.tree.clone();
                    tokio::spawn(async move {
                        if let Err(e) = serve_session(tree, stream, peer).await {
                            warn!("Coordination session {} ended with error: {}", peer, e);
                        }
                    });
                }
                Err(e) => {
                    warn!("Coordination accept failed: {}", e);
                }
            }
        }
    }
}

async fn serve_session(tree: Arc<MemoryTree>, stream: TcpStream, peer: SocketAddr) -> Result<()> {
    let session = uuid::Uuid::new_v4().to_string();
    debug!("Coordination session {} opened by {}", session, peer);

    let (mut reader, mut writer) = stream.into_split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ServerFrame>();

    let writer_task = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            if let Err(e) = write_frame(&mut writer, &frame).await {
                debug!("Coordination writer stopped: {}", e);
                break;
            }
        }
    });

    // client watcher id -> server-side watcher forwarding into `out_tx`
    let mut watchers: HashMap<u64, Watcher> = HashMap::new();

    let outcome = loop {
        let frame: RequestFrame = match read_frame(&mut reader).await {
            Ok(Some(frame)) => frame,
            Ok(None) => break Ok(()),
            Err(e) => break Err(e),
        };

        let mut watcher_for = |id: Option<u64>| -> Option<Watcher> {
            let id = id?;
            let watcher = watchers
                .entry(id)
                .or_insert_with(|| forwarding_watcher(id, out_tx.clone()));
            Some(watcher.clone())
        };

        let result = match frame.request {
            Request::Ping => Ok(Reply::Pong {
                session: session.clone(),
            }),
            Request::Exists { path, watch } => tree
                .exists(&path, watcher_for(watch).as_ref())
                .map(Reply::Stat),
            Request::Create { path, data } => tree.create(&path, &data).map(|_| Reply::Done),
            Request::GetData { path, watch } => tree
                .get_data(&path, watcher_for(watch).as_ref())
                .map(|(data, stat)| Reply::Data(data, stat)),
            Request::SetData { path, data } => tree
                .set_data(&path, &data)
                .map(|stat| Reply::Stat(Some(stat))),
            Request::Delete { path } => tree.delete(&path).map(|_| Reply::Done),
            Request::GetChildren { path, watch } => tree
                .get_children(&path, watcher_for(watch).as_ref())
                .map(Reply::Children),
        };

        if out_tx
            .send(ServerFrame::Response {
                id: frame.id,
                result,
            })
            .is_err()
        {
            break Ok(());
        }
    };

    let ids: Vec<u64> = watchers.values().map(Watcher::id).collect();
    tree.remove_watchers(&ids);
    drop(watchers);
    drop(out_tx);
    let _ = writer_task.await;

    debug!("Coordination session {} closed", session);
    outcome
}

/// A watcher whose events are relayed to the remote client as
/// `ServerFrame::Event` tagged with the client's watcher id.
fn forwarding_watcher(client_id: u64, out: mpsc::UnboundedSender<ServerFrame>) -> Watcher {
    let (watcher, mut events) = Watcher::channel();
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let frame = ServerFrame::Event {
                watch: client_id,
                event,
            };
            if out.send(frame).is_err() {
                break;
            }
        }
    });
    watcher
}
