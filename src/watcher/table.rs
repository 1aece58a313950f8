//! Bounded table of live watches and the node records it owns.

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;

use super::backend::WatchHandle;

/// One watched directory (or file): its position in the watch tree and
/// every path it is known by.
///
/// Parent and children are stored as handles into the [`WatchTable`], never
/// as references, so the tree can mutate freely while events are in flight.
#[derive(Debug)]
pub(crate) struct WatchNode {
    /// Enclosing directory's node, if any.
    pub parent: Option<WatchHandle>,
    /// Child watches. `None` is a logically-deleted slot kept in place so
    /// sibling indices stay stable during iteration; skip it on traversal.
    pub children: Vec<Option<WatchHandle>>,
    /// Paths sharing this handle. Exactly one, except when hard links
    /// coalesce several directory entries onto a single inode.
    pub paths: Vec<PathBuf>,
}

impl WatchNode {
    pub fn new(parent: Option<WatchHandle>, path: PathBuf) -> Self {
        Self {
            parent,
            children: Vec::new(),
            paths: vec![path],
        }
    }

    /// First path this node was registered under.
    pub fn primary_path(&self) -> &PathBuf {
        &self.paths[0]
    }
}

/// Handle-keyed store of watch nodes, bounded by the kernel watch limit.
///
/// Absence of a handle is a normal outcome, not an error: records routinely
/// arrive for watches that were just removed. Map storage grows on demand;
/// `capacity` only bounds the number of live entries.
#[derive(Debug)]
pub(crate) struct WatchTable {
    nodes: HashMap<WatchHandle, WatchNode>,
    capacity: usize,
}

impl WatchTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            nodes: HashMap::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    pub fn contains(&self, handle: WatchHandle) -> bool {
        self.nodes.contains_key(&handle)
    }

    pub fn get(&self, handle: WatchHandle) -> Option<&WatchNode> {
        self.nodes.get(&handle)
    }

    pub fn get_mut(&mut self, handle: WatchHandle) -> Option<&mut WatchNode> {
        self.nodes.get_mut(&handle)
    }

    /// Insert a node, enforcing the live-entry bound.
    pub fn insert(&mut self, handle: WatchHandle, node: WatchNode) -> io::Result<()> {
        if self.nodes.len() >= self.capacity {
            return Err(io::Error::other(format!(
                "watch table full ({} entries)",
                self.capacity
            )));
        }
        self.nodes.insert(handle, node);
        Ok(())
    }

    /// Remove and return a node; `None` when it was never there or already
    /// removed.
    pub fn take(&mut self, handle: WatchHandle) -> Option<WatchNode> {
        self.nodes.remove(&handle)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
