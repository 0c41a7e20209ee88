//! Hot-swappable whisker tree handle.
//!
//! Readers take a lock-free snapshot through `arc_swap`; writers build a new
//! tree and publish it atomically. Writers are serialised by a mutex so two
//! concurrent inserts cannot lose each other's update.

use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;

use super::{NodeId, Whisker, WhiskerError, WhiskerTree};

#[derive(Debug)]
pub struct SharedWhiskerTree {
    current: ArcSwap<WhiskerTree>,
    writer: Mutex<()>,
}

impl SharedWhiskerTree {
    pub fn new(tree: WhiskerTree) -> Self {
        Self {
            current: ArcSwap::from_pointee(tree),
            writer: Mutex::new(()),
        }
    }

    /// Snapshot of the tree as of now. Later reloads do not affect it.
    pub fn snapshot(&self) -> Arc<WhiskerTree> {
        self.current.load_full()
    }

    /// Root rule of the current tree.
    pub fn root(&self) -> Whisker {
        *self.current.load().root()
    }

    /// Replaces the whole tree, returning the previous one.
    pub fn reload(&self, tree: WhiskerTree) -> Arc<WhiskerTree> {
        let _guard = self.writer.lock();
        let previous = self.current.swap(Arc::new(tree));
        tracing::info!(nodes = self.current.load().len(), "whisker tree reloaded");
        previous
    }

    /// Copy-on-write insert into the current tree.
    pub fn insert(&self, whisker: Whisker) -> Result<NodeId, WhiskerError> {
        let _guard = self.writer.lock();
        let mut next = WhiskerTree::clone(&self.current.load());
        let id = next.insert(whisker)?;
        self.current.store(Arc::new(next));
        Ok(id)
    }
}

impl Default for SharedWhiskerTree {
    fn default() -> Self {
        Self::new(WhiskerTree::new())
    }
}

impl From<WhiskerTree> for SharedWhiskerTree {
    fn from(tree: WhiskerTree) -> Self {
        Self::new(tree)
    }
}
