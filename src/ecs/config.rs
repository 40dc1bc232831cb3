use crate::metadata::{CacheStrategy, RingNode};

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::Path;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("line {line}: {reason}")]
    Malformed { line: usize, reason: String },

    #[error("line {line}: duplicate node name {name}")]
    DuplicateName { line: usize, name: String },
}

/// One launchable node from `ecs.config`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub location: Option<[i32; 2]>,
}

impl Candidate {
    pub fn new(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port,
            location: None,
        }
    }

    /// Ring record for this candidate with the given cache parameters.
    pub fn to_ring_node(&self, strategy: CacheStrategy, size: usize) -> RingNode {
        let mut node = RingNode::new(self.name.clone(), self.host.clone(), self.port);
        node.cache_strategy = strategy;
        node.cache_size = size;
        node.location = self.location;
        node
    }
}

/// Parses `<name> <host> <port> [<x> <y>]` lines. Blank lines and text
/// after `#` are ignored.
pub fn parse_config(text: &str) -> Result<Vec<Candidate>, ConfigError> {
    let mut candidates = Vec::new();
    let mut names = HashSet::new();

    for (index, raw) in text.lines().enumerate() {
        let line = index + 1;
        let content = raw.split('#').next().unwrap_or_default().trim();
        if content.is_empty() {
            continue;
        }

        let fields: Vec<&str> = content.split_whitespace().collect();
        let malformed = |reason: &str| ConfigError::Malformed {
            line,
            reason: reason.to_string(),
        };

        let (name, host, port) = match fields.as_slice() {
            [name, host, port] | [name, host, port, _, _] => (*name, *host, *port),
            _ => return Err(malformed("expected <name> <host> <port> [<x> <y>]")),
        };
        let port: u16 = port.parse().map_err(|_| malformed("port is not a number"))?;

        let location = match fields.as_slice() {
            [_, _, _, x, y] => {
                let x = x.parse().map_err(|_| malformed("x is not a number"))?;
                let y = y.parse().map_err(|_| malformed("y is not a number"))?;
                Some([x, y])
            }
            _ => None,
        };

        if !names.insert(name.to_string()) {
            return Err(ConfigError::DuplicateName {
                line,
                name: name.to_string(),
            });
        }

        candidates.push(Candidate {
            name: name.to_string(),
            host: host.to_string(),
            port,
            location,
        });
    }

    Ok(candidates)
}

pub fn load_config(path: &Path) -> Result<Vec<Candidate>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let candidates =
        parse_config(&text).with_context(|| format!("parsing {}", path.display()))?;
    Ok(candidates)
}
