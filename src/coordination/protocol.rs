//! Coordination Wire Protocol
//!
//! Frames exchanged between a `RemoteSession` and the `CoordinationServer`.
//! Every frame is a big-endian `u32` length followed by a bincode body.
//!
//! Requests carry a client-chosen id echoed in the response. Watch
//! registrations carry a client-side watcher id; the server echoes it in
//! `ServerFrame::Event` so the client can route the notification.

use super::types::{CoordError, Stat, WatchedEvent};

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a single frame body.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Request {
    Ping,
    Exists { path: String, watch: Option<u64> },
    Create { path: String, data: Vec<u8> },
    GetData { path: String, watch: Option<u64> },
    SetData { path: String, data: Vec<u8> },
    Delete { path: String },
    GetChildren { path: String, watch: Option<u64> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Reply {
    Pong { session: String },
    Stat(Option<Stat>),
    Data(Vec<u8>, Stat),
    Children(Vec<String>),
    Done,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestFrame {
    pub id: u64,
    pub request: Request,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ServerFrame {
    Response {
        id: u64,
        result: Result<Reply, CoordError>,
    },
    Event {
        watch: u64,
        event: WatchedEvent,
    },
}

pub async fn write_frame<W, T>(writer: &mut W, frame: &T) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let body = bincode::serialize(frame)?;
    if body.len() > MAX_FRAME_LEN {
        anyhow::bail!("frame of {} bytes exceeds limit", body.len());
    }
    writer.write_u32(body.len() as u32).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one frame. `Ok(None)` means the peer closed the stream cleanly.
pub async fn read_frame<R, T>(reader: &mut R) -> anyhow::Result<Option<T>>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let len = match reader.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if len > MAX_FRAME_LEN {
        anyhow::bail!("peer announced a {} byte frame", len);
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(bincode::deserialize(&body)?))
}
