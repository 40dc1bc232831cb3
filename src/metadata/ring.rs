//! Ring Snapshot
//!
//! An immutable, position-ordered view of the storage nodes. Neighbor
//! queries are index arithmetic on the sorted vector: the successor of the
//! node at `i` is `(i + 1) mod n`. Mutations (`with_node`, `without_node`)
//! build a new snapshot and re-derive every range start from the new
//! predecessor, so a published ring always covers the circle exactly once.

use super::hash::{fingerprint, in_range};
use super::types::{HashRange, RingNode};

use std::collections::HashSet;

#[derive(Debug, thiserror::Error)]
pub enum RingError {
    #[error("duplicate node name: {0}")]
    DuplicateName(String),

    #[error("node {name} collides with another node at ring position {position}")]
    DuplicatePosition { name: String, position: String },

    #[error("unknown node: {0}")]
    UnknownNode(String),

    #[error("malformed ring message: {0}")]
    Malformed(String),

    #[error("ring json: {0}")]
    Json(#[from] serde_json::Error),
}

/// One-character prefix identifying what a serialized ring is carried for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageTag {
    /// Published by the coordinator on `/ecs` and `/ecs/<name>`.
    Metadata,
    /// Returned to clients alongside `SERVER_NOT_RESPONSIBLE`.
    Redirect,
}

impl MessageTag {
    pub fn as_char(self) -> char {
        match self {
            MessageTag::Metadata => 'M',
            MessageTag::Redirect => 'R',
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ring {
    nodes: Vec<RingNode>,
}

impl Ring {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds a ring from an arbitrary collection of nodes.
    ///
    /// Positions are recomputed from the names, nodes are ordered by
    /// position and every `start` is taken from the predecessor.
    pub fn from_nodes(nodes: impl IntoIterator<Item = RingNode>) -> Result<Self, RingError> {
        let mut nodes: Vec<RingNode> = nodes
            .into_iter()
            .map(|mut node| {
                node.hash_range.end = fingerprint(&node.name);
                node
            })
            .collect();

        let mut names = HashSet::new();
        for node in &nodes {
            if !names.insert(node.name.clone()) {
                return Err(RingError::DuplicateName(node.name.clone()));
            }
        }

        nodes.sort_by(|a, b| a.position().cmp(b.position()));

        for pair in nodes.windows(2) {
            if pair[0].position() == pair[1].position() {
                return Err(RingError::DuplicatePosition {
                    name: pair[1].name.clone(),
                    position: pair[1].position().to_string(),
                });
            }
        }

        let mut ring = Self { nodes };
        ring.assign_ranges();
        Ok(ring)
    }

    fn assign_ranges(&mut self) {
        let n = self.nodes.len();
        if n == 0 {
            return;
        }
        let ends: Vec<String> = self.nodes.iter().map(|n| n.position().to_string()).collect();
        for (i, node) in self.nodes.iter_mut().enumerate() {
            node.hash_range.start = ends[(i + n - 1) % n].clone();
        }
    }

    /// Returns a new snapshot with `node` added.
    pub fn with_node(&self, node: RingNode) -> Result<Self, RingError> {
        if self.contains(&node.name) {
            return Err(RingError::DuplicateName(node.name));
        }
        Self::from_nodes(self.nodes.iter().cloned().chain(std::iter::once(node)))
    }

    /// Returns a new snapshot without the node called `name`.
    pub fn without_node(&self, name: &str) -> Result<Self, RingError> {
        if !self.contains(name) {
            return Err(RingError::UnknownNode(name.to_string()));
        }
        Self::from_nodes(self.nodes.iter().filter(|n| n.name != name).cloned())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[RingNode] {
        &self.nodes
    }

    pub fn names(&self) -> Vec<String> {
        self.nodes.iter().map(|n| n.name.clone()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index_of(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<&RingNode> {
        self.index_of(name).map(|i| &self.nodes[i])
    }

    pub fn hash_range(&self, name: &str) -> Option<&HashRange> {
        self.get(name).map(|n| &n.hash_range)
    }

    fn index_of(&self, name: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.name == name)
    }

    /// The node responsible for `key`.
    pub fn owner_of(&self, key: &str) -> Option<&RingNode> {
        self.owner_of_hash(&fingerprint(key))
    }

    /// The node whose range contains the fingerprint `hash`.
    ///
    /// A single-node ring owns the whole circle even though its range
    /// `(p, p]` is degenerate.
    pub fn owner_of_hash(&self, hash: &str) -> Option<&RingNode> {
        match self.nodes.len() {
            0 => None,
            1 => self.nodes.first(),
            _ => self.nodes.iter().find(|n| n.hash_range.contains(hash)),
        }
    }

    pub fn predecessor(&self, name: &str) -> Option<&RingNode> {
        let n = self.nodes.len();
        self.index_of(name).map(|i| &self.nodes[(i + n - 1) % n])
    }

    pub fn successor(&self, name: &str) -> Option<&RingNode> {
        let n = self.nodes.len();
        self.index_of(name).map(|i| &self.nodes[(i + 1) % n])
    }

    /// The node that hands data to `name` when `name` joins: its successor.
    pub fn coordinator_of(&self, name: &str) -> Option<&RingNode> {
        if self.nodes.len() < 2 {
            return None;
        }
        self.successor(name)
    }

    /// Node with the smallest squared distance to `(x, y)`; ties go to the
    /// earlier node in ring order. Nodes without a location are ignored
    /// unless none has one, in which case the first node is returned.
    pub fn nearest_by_location(&self, x: i32, y: i32) -> Option<&RingNode> {
        let mut best: Option<(&RingNode, i64)> = None;
        for node in &self.nodes {
            let Some([nx, ny]) = node.location else {
                continue;
            };
            let dx = i64::from(nx) - i64::from(x);
            let dy = i64::from(ny) - i64::from(y);
            let distance = dx * dx + dy * dy;
            if best.is_none_or(|(_, d)| distance < d) {
                best = Some((node, distance));
            }
        }
        best.map(|(node, _)| node).or_else(|| self.nodes.first())
    }

    /// Nodes strictly between `predecessor` and `successor`, walking forward.
    pub fn range_between(
        &self,
        predecessor: &str,
        successor: &str,
    ) -> Result<Vec<&RingNode>, RingError> {
        let from = self
            .get(predecessor)
            .ok_or_else(|| RingError::UnknownNode(predecessor.to_string()))?;
        let to = self
            .get(successor)
            .ok_or_else(|| RingError::UnknownNode(successor.to_string()))?;
        Ok(self.between_positions(from.position(), to.position()))
    }

    /// Nodes whose position lies strictly inside `(from, to)` on the circle,
    /// in walking order starting just after `from`.
    pub fn between_positions(&self, from: &str, to: &str) -> Vec<&RingNode> {
        if from == to {
            return Vec::new();
        }
        let start = self
            .nodes
            .iter()
            .position(|n| n.position() > from)
            .unwrap_or(0);
        let n = self.nodes.len();
        (0..n)
            .map(|offset| &self.nodes[(start + offset) % n])
            .filter(|node| in_range(node.position(), from, to) && node.position() != to)
            .collect()
    }

    /// Nodes that joined between `name`'s previous predecessor (in `old`)
    /// and `name`. These are the nodes `name` must hand part of its range to.
    pub fn new_arrivals_before(&self, old: &Ring, name: &str) -> Vec<&RingNode> {
        let Some(old_self) = old.get(name) else {
            return Vec::new();
        };
        let Some(old_pred) = old.predecessor(name) else {
            return Vec::new();
        };
        let candidates = if old_pred.name == name {
            // Alone in the old ring: everybody else is new.
            self.nodes.iter().filter(|n| n.name != name).collect()
        } else {
            self.between_positions(old_pred.position(), old_self.position())
        };
        candidates
            .into_iter()
            .filter(|n| !old.contains(&n.name))
            .collect()
    }

    /// The two forward neighbors of `name`, never including `name` itself.
    pub fn replicas(&self, name: &str) -> Vec<&RingNode> {
        let mut replicas = Vec::new();
        if !self.contains(name) {
            return replicas;
        }
        let mut current = name;
        for _ in 0..2 {
            match self.successor(current) {
                Some(next) if next.name != name => {
                    replicas.push(next);
                    current = &next.name;
                }
                _ => break,
            }
        }
        replicas
    }

    /// JSON array of the nodes in ring order, without a tag.
    pub fn to_json(&self) -> Result<String, RingError> {
        Ok(serde_json::to_string(&self.nodes)?)
    }

    /// Wire form: one tag character followed by the JSON array.
    pub fn serialize(&self, tag: MessageTag) -> Result<String, RingError> {
        let mut out = String::new();
        out.push(tag.as_char());
        out.push_str(&self.to_json()?);
        Ok(out)
    }

    /// Parses the wire form, skipping the tag character.
    pub fn deserialize(blob: &str) -> Result<Self, RingError> {
        let mut chars = blob.chars();
        if chars.next().is_none() {
            return Err(RingError::Malformed("empty message".to_string()));
        }
        let body = chars.as_str();
        if body.is_empty() {
            return Err(RingError::Malformed("missing ring body".to_string()));
        }
        let nodes: Vec<RingNode> = serde_json::from_str(body)?;
        Self::from_nodes(nodes)
    }
}
