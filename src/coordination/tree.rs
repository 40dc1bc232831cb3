//! Hierarchical Coordination Tree
//!
//! An in-memory tree of persistent nodes addressed by `/`-separated paths,
//! each carrying an opaque byte body and a version counter.
//!
//! ## Watches
//! - **Data watches** are armed by `exists` and `get_data` and fire once on
//!   `NodeCreated`, `NodeDataChanged` or `NodeDeleted` of that path.
//! - **Child watches** are armed by `get_children` and fire once on
//!   `NodeChildrenChanged` (or `NodeDeleted` of the parent itself).
//!
//! Reads and watch registration happen under the same lock as writes, so a
//! reader can never miss a change that lands between its read and its arm.
//! Events are pushed into unbounded channels while the lock is held, which
//! keeps per-watcher delivery in write order.

use super::types::{CoordError, CoordResult, EventKind, Stat, WatchedEvent, Watcher};

use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};

#[derive(Debug, Default)]
struct TreeNode {
    data: Vec<u8>,
    version: u32,
    children: BTreeSet<String>,
}

impl TreeNode {
    fn stat(&self) -> Stat {
        Stat {
            version: self.version,
            num_children: self.children.len(),
        }
    }
}

#[derive(Debug, Default)]
struct TreeState {
    nodes: BTreeMap<String, TreeNode>,
    data_watches: HashMap<String, Vec<Watcher>>,
    child_watches: HashMap<String, Vec<Watcher>>,
}

fn arm(table: &mut HashMap<String, Vec<Watcher>>, path: &str, watcher: &Watcher) {
    let armed = table.entry(path.to_string()).or_default();
    if !armed.iter().any(|w| w.id() == watcher.id()) {
        armed.push(watcher.clone());
    }
}

fn fire(table: &mut HashMap<String, Vec<Watcher>>, path: &str, kind: EventKind) {
    if let Some(watchers) = table.remove(path) {
        for watcher in watchers {
            watcher.notify(WatchedEvent::node(kind, path));
        }
    }
}

/// Splits `path` into `(parent, child name)`. The root has no parent.
pub fn split_path(path: &str) -> CoordResult<Option<(&str, &str)>> {
    validate_path(path)?;
    if path == "/" {
        return Ok(None);
    }
    let cut = path.rfind('/').unwrap_or(0);
    let parent = if cut == 0 { "/" } else { &path[..cut] };
    Ok(Some((parent, &path[cut + 1..])))
}

pub fn validate_path(path: &str) -> CoordResult<()> {
    let bad = || CoordError::BadPath(path.to_string());
    if !path.starts_with('/') {
        return Err(bad());
    }
    if path == "/" {
        return Ok(());
    }
    if path.ends_with('/') || path[1..].split('/').any(|segment| segment.is_empty()) {
        return Err(bad());
    }
    Ok(())
}

pub struct MemoryTree {
    state: Mutex<TreeState>,
}

impl Default for MemoryTree {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTree {
    pub fn new() -> Self {
        let mut state = TreeState::default();
        state.nodes.insert("/".to_string(), TreeNode::default());
        Self {
            state: Mutex::new(state),
        }
    }

    pub fn exists(&self, path: &str, watcher: Option<&Watcher>) -> CoordResult<Option<Stat>> {
        validate_path(path)?;
        let mut state = self.state.lock();
        if let Some(watcher) = watcher {
            arm(&mut state.data_watches, path, watcher);
        }
        Ok(state.nodes.get(path).map(TreeNode::stat))
    }

    pub fn create(&self, path: &str, data: &[u8]) -> CoordResult<()> {
        let Some((parent, child)) = split_path(path)? else {
            return Err(CoordError::NodeExists(path.to_string()));
        };

        let mut state = self.state.lock();
        if state.nodes.contains_key(path) {
            return Err(CoordError::NodeExists(path.to_string()));
        }
        let Some(parent_node) = state.nodes.get_mut(parent) else {
            return Err(CoordError::NoParent(path.to_string()));
        };
        parent_node.children.insert(child.to_string());

        state.nodes.insert(
            path.to_string(),
            TreeNode {
                data: data.to_vec(),
                ..TreeNode::default()
            },
        );

        fire(&mut state.data_watches, path, EventKind::NodeCreated);
        fire(&mut state.child_watches, parent, EventKind::NodeChildrenChanged);
        Ok(())
    }

    /// Current body of `path`. The watch is only armed when the node exists.
    pub fn get_data(&self, path: &str, watcher: Option<&Watcher>) -> CoordResult<(Vec<u8>, Stat)> {
        validate_path(path)?;
        let mut state = self.state.lock();
        let Some(node) = state.nodes.get(path) else {
            return Err(CoordError::NoNode(path.to_string()));
        };
        let result = (node.data.clone(), node.stat());
        if let Some(watcher) = watcher {
            arm(&mut state.data_watches, path, watcher);
        }
        Ok(result)
    }

    /// Unconditional overwrite.
    pub fn set_data(&self, path: &str, data: &[u8]) -> CoordResult<Stat> {
        validate_path(path)?;
        let mut state = self.state.lock();
        let Some(node) = state.nodes.get_mut(path) else {
            return Err(CoordError::NoNode(path.to_string()));
        };
        node.data = data.to_vec();
        node.version = node.version.wrapping_add(1);
        let stat = node.stat();

        fire(&mut state.data_watches, path, EventKind::NodeDataChanged);
        Ok(stat)
    }

    pub fn delete(&self, path: &str) -> CoordResult<()> {
        let Some((parent, child)) = split_path(path)? else {
            return Err(CoordError::BadPath(path.to_string()));
        };

        let mut state = self.state.lock();
        match state.nodes.get(path) {
            None => return Err(CoordError::NoNode(path.to_string())),
            Some(node) if !node.children.is_empty() => {
                return Err(CoordError::NotEmpty(path.to_string()));
            }
            Some(_) => {}
        }
        state.nodes.remove(path);
        if let Some(parent_node) = state.nodes.get_mut(parent) {
            parent_node.children.remove(child);
        }

        fire(&mut state.data_watches, path, EventKind::NodeDeleted);
        fire(&mut state.child_watches, path, EventKind::NodeDeleted);
        fire(&mut state.child_watches, parent, EventKind::NodeChildrenChanged);
        Ok(())
    }

    /// Sorted child names of `path`.
    pub fn get_children(&self, path: &str, watcher: Option<&Watcher>) -> CoordResult<Vec<String>> {
        validate_path(path)?;
        let mut state = self.state.lock();
        let Some(node) = state.nodes.get(path) else {
            return Err(CoordError::NoNode(path.to_string()));
        };
        let children = node.children.iter().cloned().collect();
        if let Some(watcher) = watcher {
            arm(&mut state.child_watches, path, watcher);
        }
        Ok(children)
    }

    /// Drops every pending arming of the given watchers.
    pub fn remove_watchers(&self, ids: &[u64]) {
        let mut state = self.state.lock();
        let state = &mut *state;
        for table in [&mut state.data_watches, &mut state.child_watches] {
            table.retain(|_, watchers| {
                watchers.retain(|w| !ids.contains(&w.id()));
                !watchers.is_empty()
            });
        }
    }

    /// Number of (path, watcher) armings still pending. Diagnostics only.
    pub fn pending_watches(&self) -> usize {
        let state = self.state.lock();
        state.data_watches.values().map(Vec::len).sum::<usize>()
            + state.child_watches.values().map(Vec::len).sum::<usize>()
    }
}
