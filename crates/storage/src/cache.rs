//! Cache of finalized nodes
//!
//! Direct-mapped: node `seq` can only live in slot `seq % CACHE_SLOTS`, so a
//! lookup is one lock and one comparison. Finalized nodes are immutable, so
//! the cache hands out `Arc` clones and readers never hold a slot lock while
//! they walk a node.

use crate::node::{HtNode, SeqNum};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Number of cache slots.
pub const CACHE_SLOTS: usize = 256;

/// Fixed-size cache of finalized nodes.
#[derive(Debug)]
pub struct NodeCache {
    slots: Vec<Mutex<Option<Arc<HtNode>>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl NodeCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self {
            slots: (0..CACHE_SLOTS).map(|_| Mutex::new(None)).collect(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn slot(&self, seq: SeqNum) -> &Mutex<Option<Arc<HtNode>>> {
        &self.slots[seq as usize % CACHE_SLOTS]
    }

    /// Look up a node.
    pub fn get(&self, seq: SeqNum) -> Option<Arc<HtNode>> {
        let slot = self.slot(seq).lock();
        match slot.as_ref() {
            Some(node) if node.seq() == seq => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(Arc::clone(node))
            }
            _ => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert a node, evicting whatever shared its slot.
    pub fn put(&self, node: Arc<HtNode>) {
        let seq = node.seq();
        *self.slot(seq).lock() = Some(node);
    }

    /// Drop every cached node.
    pub fn clear(&self) {
        for slot in &self.slots {
            *slot.lock() = None;
        }
    }

    /// `(hits, misses)` since creation.
    pub fn stats(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }
}

impl Default for NodeCache {
    fn default() -> Self {
        Self::new()
    }
}
