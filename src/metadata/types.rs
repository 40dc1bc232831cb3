use super::hash::{fingerprint, in_range};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Eviction policy of a node's read cache.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum CacheStrategy {
    #[default]
    None,
    #[serde(rename = "FIFO")]
    Fifo,
    #[serde(rename = "LRU")]
    Lru,
    #[serde(rename = "LFU")]
    Lfu,
}

impl fmt::Display for CacheStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CacheStrategy::None => "None",
            CacheStrategy::Fifo => "FIFO",
            CacheStrategy::Lru => "LRU",
            CacheStrategy::Lfu => "LFU",
        };
        f.write_str(s)
    }
}

impl FromStr for CacheStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "NONE" => Ok(CacheStrategy::None),
            "FIFO" => Ok(CacheStrategy::Fifo),
            "LRU" => Ok(CacheStrategy::Lru),
            "LFU" => Ok(CacheStrategy::Lfu),
            other => Err(format!("unknown cache strategy: {}", other)),
        }
    }
}

/// Half-open ring interval `(start, end]`.
///
/// Serialized as a two-element array `[start, end]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "[String; 2]", into = "[String; 2]")]
pub struct HashRange {
    pub start: String,
    pub end: String,
}

impl HashRange {
    pub fn new(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
        }
    }

    /// Whether `hash` (a fingerprint) falls in `(start, end]`.
    pub fn contains(&self, hash: &str) -> bool {
        in_range(hash, &self.start, &self.end)
    }

    /// Whether the range crosses the `FFFF…F → 0000…0` point.
    pub fn wraps(&self) -> bool {
        self.start > self.end
    }
}

impl From<[String; 2]> for HashRange {
    fn from([start, end]: [String; 2]) -> Self {
        Self { start, end }
    }
}

impl From<HashRange> for [String; 2] {
    fn from(range: HashRange) -> Self {
        [range.start, range.end]
    }
}

impl fmt::Display for HashRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}]", self.start, self.end)
    }
}

/// A storage node as it appears in the ring metadata.
///
/// `hash_range.end` is always the fingerprint of `name`; `hash_range.start`
/// is assigned by the ring from the predecessor and is only meaningful
/// inside a [`Ring`](super::ring::Ring).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RingNode {
    pub name: String,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub cache_strategy: CacheStrategy,
    #[serde(default)]
    pub cache_size: usize,
    pub hash_range: HashRange,
    #[serde(default)]
    pub location: Option<[i32; 2]>,
}

impl RingNode {
    pub fn new(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        let name = name.into();
        let position = fingerprint(&name);
        Self {
            name,
            host: host.into(),
            port,
            cache_strategy: CacheStrategy::None,
            cache_size: 0,
            hash_range: HashRange::new(position.clone(), position),
            location: None,
        }
    }

    pub fn with_location(mut self, x: i32, y: i32) -> Self {
        self.location = Some([x, y]);
        self
    }

    /// Ring position of the node (the inclusive end of its range).
    pub fn position(&self) -> &str {
        &self.hash_range.end
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
