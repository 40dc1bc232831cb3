//! Store Client Module
//!
//! A small library client for the node wire protocol.
//!
//! ## Core Concepts
//! - **One connection at a time**: the client talks to a single node and
//!   reconnects when it learns that another node owns the key.
//! - **Redirects**: a `SERVER_NOT_RESPONSIBLE` reply carries the whole ring.
//!   The client keeps it and routes later requests to the owner directly.
//! - **Retries**: `SERVER_STOPPED` and `SERVER_WRITE_LOCK` are transient and
//!   retried with exponential backoff and jitter, within a bounded number of
//!   attempts.

use crate::config::{CLIENT_MAX_ATTEMPTS, CLIENT_RETRY_BASE, CLIENT_TIMEOUT};
use crate::metadata::Ring;
use crate::server::protocol::{
    KvMessage, ProtocolError, StatusType, read_message, write_message,
};

use std::time::Duration;
use tokio::io::BufReader;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("CONNECTION_FAILED: {addr}: {source}")]
    ConnectionFailed {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("request to {0} timed out")]
    Timeout(String),

    #[error("server closed the connection")]
    Closed,

    #[error("protocol: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("gave up after {attempts} attempts, last status {last}")]
    RetriesExhausted { attempts: usize, last: StatusType },
}

pub type ClientResult<T> = Result<T, ClientError>;

struct Connection {
    addr: String,
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

pub struct KvClient {
    connection: Connection,
    ring: Option<Ring>,
    timeout: Duration,
    max_attempts: usize,
}

impl KvClient {
    pub async fn connect(addr: &str) -> ClientResult<Self> {
        let connection = open(addr, CLIENT_TIMEOUT).await?;
        Ok(Self {
            connection,
            ring: None,
            timeout: CLIENT_TIMEOUT,
            max_attempts: CLIENT_MAX_ATTEMPTS,
        })
    }

    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Address of the node currently connected to.
    pub fn server(&self) -> &str {
        &self.connection.addr
    }

    /// Last ring learned from a redirect.
    pub fn ring(&self) -> Option<&Ring> {
        self.ring.as_ref()
    }

    /// Stores `value` under `key`. An empty value deletes the key.
    pub async fn put(&mut self, key: &str, value: &str) -> ClientResult<KvMessage> {
        self.send(KvMessage::put(key, value)).await
    }

    pub async fn get(&mut self, key: &str) -> ClientResult<KvMessage> {
        self.send(KvMessage::get(key)).await
    }

    /// Sends one frame to the connected node and returns its reply as is.
    pub async fn request(&mut self, message: &KvMessage) -> ClientResult<KvMessage> {
        let timeout = self.timeout;
        let connection = &mut self.connection;
        let addr = connection.addr.clone();
        let exchange = async {
            write_message(&mut connection.writer, message).await?;
            let reply = read_message(&mut connection.reader).await?;
            Ok::<_, ClientError>(reply)
        };
        tokio::time::timeout(timeout, exchange)
            .await
            .map_err(|_| ClientError::Timeout(addr))??
            .ok_or(ClientError::Closed)
    }

    /// Follows redirects and retries transient refusals until a final
    /// answer arrives.
    async fn send(&mut self, message: KvMessage) -> ClientResult<KvMessage> {
        let mut delay_ms = CLIENT_RETRY_BASE.as_millis() as u64;
        let mut last = StatusType::ServerStopped;

        for attempt in 0..self.max_attempts {
            self.route(&message.key).await?;
            let reply = self.request(&message).await?;
            last = reply.status;

            match reply.status {
                StatusType::ServerNotResponsible => match Ring::deserialize(&reply.value) {
                    Ok(ring) => {
                        debug!(key = %message.key, from = %self.connection.addr, "Redirected");
                        self.ring = Some(ring);
                    }
                    Err(e) => {
                        debug!("Unusable ring in redirect: {}", e);
                        return Ok(reply);
                    }
                },
                status if status.is_retryable() => {
                    if attempt + 1 == self.max_attempts {
                        break;
                    }
                    let jitter = rand::random::<u64>() % 50;
                    tokio::time::sleep(Duration::from_millis(delay_ms + jitter)).await;
                    delay_ms = (delay_ms * 2).min(1000);
                }
                _ => return Ok(reply),
            }
        }

        Err(ClientError::RetriesExhausted {
            attempts: self.max_attempts,
            last,
        })
    }

    /// Switches to the owner of `key` when the known ring names another node.
    async fn route(&mut self, key: &str) -> ClientResult<()> {
        let Some(owner) = self.ring.as_ref().and_then(|ring| ring.owner_of(key)) else {
            return Ok(());
        };
        let target = owner.address();
        if target != self.connection.addr {
            debug!("Reconnecting from {} to {}", self.connection.addr, target);
            self.connection = open(&target, self.timeout).await?;
        }
        Ok(())
    }
}

async fn open(addr: &str, timeout: Duration) -> ClientResult<Connection> {
    let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| ClientError::Timeout(addr.to_string()))?
        .map_err(|source| ClientError::ConnectionFailed {
            addr: addr.to_string(),
            source,
        })?;
    stream.set_nodelay(true).ok();
    let (reader, writer) = stream.into_split();
    Ok(Connection {
        addr: addr.to_string(),
        reader: BufReader::new(reader),
        writer,
    })
}

#[cfg(test)]
mod tests {
    use super::{ClientError, KvClient};
    use crate::cache::ReadCache;
    use crate::metadata::{Ring, RingNode};
    use crate::server::{KvNode, KvService, ServerState, StatusType};
    use crate::storage::{KvDb, StorageConfig};
    use std::sync::Arc;

    async fn serve(dir: &tempfile::TempDir, name: &str) -> (Arc<KvNode>, u16) {
        let config = StorageConfig {
            root: dir.path().to_path_buf(),
            blocks_per_file: 32,
            initial_files: 2,
            sync_writes: false,
        };
        let node = KvNode::new(name, KvDb::open(name, config).unwrap(), ReadCache::disabled());
        let service = KvService::bind(node.clone(), "127.0.0.1:0").await.unwrap();
        let port = service.local_addr().unwrap().port();
        tokio::spawn(service.run());
        (node, port)
    }

    #[tokio::test]
    async fn test_follows_redirect_to_owner() {
        let dir = tempfile::tempdir().unwrap();
        let (server1, port1) = serve(&dir, "server1").await;
        let (server5, port5) = serve(&dir, "server5").await;

        let ring = Ring::from_nodes([
            RingNode::new("server1", "127.0.0.1", port1),
            RingNode::new("server5", "127.0.0.1", port5),
        ])
        .unwrap();
        for node in [&server1, &server5] {
            node.install_ring(ring.clone());
            node.set_state(ServerState::Started);
        }

        let mut client = KvClient::connect(&format!("127.0.0.1:{}", port1)).await.unwrap();
        // bar is owned by server5
        let reply = client.put("bar", "baz").await.unwrap();
        assert_eq!(reply.status, StatusType::PutSuccess);
        assert_eq!(client.server(), format!("127.0.0.1:{}", port5));
        assert!(client.ring().is_some());

        let reply = client.get("bar").await.unwrap();
        assert_eq!(reply.value, "baz");
        assert_eq!(server5.get_local("bar").unwrap().as_deref(), Some("baz"));
    }

    #[tokio::test]
    async fn test_gives_up_on_stopped_server() {
        let dir = tempfile::tempdir().unwrap();
        let (_node, port) = serve(&dir, "server1").await;

        let mut client = KvClient::connect(&format!("127.0.0.1:{}", port))
            .await
            .unwrap()
            .with_max_attempts(2);
        let err = client.get("k").await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::RetriesExhausted { last: StatusType::ServerStopped, .. }
        ));
    }

    #[tokio::test]
    async fn test_connect_failure() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        assert!(matches!(
            KvClient::connect(&addr.to_string()).await,
            Err(ClientError::ConnectionFailed { .. })
        ));
    }
}
