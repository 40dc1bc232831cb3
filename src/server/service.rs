use super::node::KvNode;
use super::protocol::{KvMessage, ProtocolError, StatusType, read_message, write_message};

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

/// Client-facing accept loop of a storage node.
pub struct KvService {
    node: Arc<KvNode>,
    listener: TcpListener,
}

impl KvService {
    pub async fn bind(node: Arc<KvNode>, addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!(node = %node.name(), "Listening for clients on {}", listener.local_addr()?);
        Ok(Self { node, listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts connections until the node closes.
    pub async fn run(self) {
        let mut closed = self.node.subscribe_closed();
        if *closed.borrow() {
            return;
        }
        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let node = self.node.clone();
                        tokio::spawn(async move {
                            if let Err(e) = serve_connection(node, stream, peer).await {
                                debug!("Connection {} ended: {}", peer, e);
                            }
                        });
                    }
                    Err(e) => warn!("Accept failed: {}", e),
                },
                _ = closed.wait_for(|c| *c) => break,
            }
        }
        info!(node = %self.node.name(), "Client listener stopped");
    }
}

async fn serve_connection(
    node: Arc<KvNode>,
    stream: TcpStream,
    peer: SocketAddr,
) -> Result<(), ProtocolError> {
    debug!(node = %node.name(), "Client {} connected", peer);
    stream.set_nodelay(true).ok();
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut closed = node.subscribe_closed();

    loop {
        let request = tokio::select! {
            request = read_message(&mut reader) => request,
            _ = closed.wait_for(|c| *c) => return Ok(()),
        };
        let reply = match request {
            Ok(Some(request)) => {
                let key = request.key.clone();
                match node.run_blocking(move |node| node.handle(request)).await {
                    Ok(reply) => reply,
                    Err(e) => {
                        warn!(node = %node.name(), key = %key, "Request worker failed: {}", e);
                        KvMessage::new(StatusType::PutError, key, "internal error")
                    }
                }
            }
            Ok(None) => {
                debug!(node = %node.name(), "Client {} disconnected", peer);
                return Ok(());
            }
            Err(e @ (ProtocolError::UnknownStatus(_) | ProtocolError::Empty)) => {
                warn!(node = %node.name(), "Malformed request from {}: {}", peer, e);
                KvMessage::new(StatusType::PutError, "", e.to_string())
            }
            Err(e) => return Err(e),
        };
        write_message(&mut writer, &reply).await?;
    }
}
