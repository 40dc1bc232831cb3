//! Client Wire Protocol
//!
//! Text frames of the form `STATUS␟KEY␟VALUE␃\n` where `␟` is U+001F and
//! `␃` is U+0003. Values may contain newlines, so a reader accumulates
//! lines until one ends with `␃\n`.

use std::fmt;
use std::str::FromStr;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

pub const FIELD_DELIMITER: char = '\u{1F}';
pub const END_OF_MESSAGE: char = '\u{03}';
const FRAME_TERMINATOR: &str = "\u{03}\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusType {
    Put,
    PutSuccess,
    PutUpdate,
    PutError,
    Get,
    GetSuccess,
    GetError,
    DeleteSuccess,
    DeleteError,
    ServerNotResponsible,
    ServerStopped,
    ServerWriteLock,
    /// Peer-to-peer bulk put, stored regardless of ownership.
    MoveData,
}

impl StatusType {
    pub fn as_str(self) -> &'static str {
        match self {
            StatusType::Put => "PUT",
            StatusType::PutSuccess => "PUT_SUCCESS",
            StatusType::PutUpdate => "PUT_UPDATE",
            StatusType::PutError => "PUT_ERROR",
            StatusType::Get => "GET",
            StatusType::GetSuccess => "GET_SUCCESS",
            StatusType::GetError => "GET_ERROR",
            StatusType::DeleteSuccess => "DELETE_SUCCESS",
            StatusType::DeleteError => "DELETE_ERROR",
            StatusType::ServerNotResponsible => "SERVER_NOT_RESPONSIBLE",
            StatusType::ServerStopped => "SERVER_STOPPED",
            StatusType::ServerWriteLock => "SERVER_WRITE_LOCK",
            StatusType::MoveData => "MOVE_DATA",
        }
    }

    /// Transient refusals a client should simply retry.
    pub fn is_retryable(self) -> bool {
        matches!(self, StatusType::ServerStopped | StatusType::ServerWriteLock)
    }
}

impl fmt::Display for StatusType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StatusType {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "PUT" => StatusType::Put,
            "PUT_SUCCESS" => StatusType::PutSuccess,
            "PUT_UPDATE" => StatusType::PutUpdate,
            "PUT_ERROR" => StatusType::PutError,
            "GET" => StatusType::Get,
            "GET_SUCCESS" => StatusType::GetSuccess,
            "GET_ERROR" => StatusType::GetError,
            "DELETE_SUCCESS" => StatusType::DeleteSuccess,
            "DELETE_ERROR" => StatusType::DeleteError,
            "SERVER_NOT_RESPONSIBLE" => StatusType::ServerNotResponsible,
            "SERVER_STOPPED" => StatusType::ServerStopped,
            "SERVER_WRITE_LOCK" => StatusType::ServerWriteLock,
            "MOVE_DATA" => StatusType::MoveData,
            other => return Err(ProtocolError::UnknownStatus(other.to_string())),
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("empty frame")]
    Empty,

    #[error("unknown status: {0}")]
    UnknownStatus(String),

    #[error("connection closed inside a frame")]
    Truncated,

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvMessage {
    pub status: StatusType,
    pub key: String,
    pub value: String,
}

impl KvMessage {
    pub fn new(status: StatusType, key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            status,
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn put(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(StatusType::Put, key, value)
    }

    pub fn get(key: impl Into<String>) -> Self {
        Self::new(StatusType::Get, key, "")
    }

    pub fn move_data(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(StatusType::MoveData, key, value)
    }

    /// Full frame including the terminator.
    pub fn encode(&self) -> String {
        let mut out = String::with_capacity(self.key.len() + self.value.len() + 32);
        out.push_str(self.status.as_str());
        out.push(FIELD_DELIMITER);
        out.push_str(&self.key);
        out.push(FIELD_DELIMITER);
        out.push_str(&self.value);
        out.push_str(FRAME_TERMINATOR);
        out
    }

    /// Parses one frame, with or without its terminator. Missing key or
    /// value fields decode as empty strings.
    pub fn decode(frame: &str) -> Result<Self, ProtocolError> {
        let body = frame
            .strip_suffix('\n')
            .map(|s| s.strip_suffix('\r').unwrap_or(s))
            .unwrap_or(frame);
        let body = body.strip_suffix(END_OF_MESSAGE).unwrap_or(body);
        if body.is_empty() {
            return Err(ProtocolError::Empty);
        }

        let mut fields = body.splitn(3, FIELD_DELIMITER);
        let status = fields.next().unwrap_or_default().trim().parse()?;
        let key = fields.next().unwrap_or_default().to_string();
        let value = fields.next().unwrap_or_default().to_string();
        Ok(Self { status, key, value })
    }
}

impl fmt::Display for KvMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <{}> ({} bytes)", self.status, self.key, self.value.len())
    }
}

/// Reads the next frame. `Ok(None)` on a clean end of stream.
pub async fn read_message<R>(reader: &mut R) -> Result<Option<KvMessage>, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    let mut frame = String::new();
    loop {
        let read = reader.read_line(&mut frame).await?;
        if read == 0 {
            return if frame.trim().is_empty() {
                Ok(None)
            } else {
                Err(ProtocolError::Truncated)
            };
        }
        if frame.ends_with(FRAME_TERMINATOR) {
            return KvMessage::decode(&frame).map(Some);
        }
    }
}

pub async fn write_message<W>(writer: &mut W, message: &KvMessage) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(message.encode().as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}
