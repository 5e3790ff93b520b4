//! History tree
//!
//! An append-only tree of fixed-size node blocks indexed by time.
//!
//! # Lifecycle
//!
//! - **Building**: created with [`HistoryTree::create`]. The root-to-leaf
//!   "latest branch" lives in memory and takes every insert. When the node
//!   chosen for an interval is full, that node and everything below it is
//!   closed at the current tree end, written out, and replaced by fresh
//!   siblings starting one instant later. When the root itself is full, a
//!   new root is placed above it and the tree grows by one level.
//! - **Finalized**: [`HistoryTree::close_tree`] closes and writes the whole
//!   branch, then the header. No more inserts are accepted.
//!
//! [`HistoryTree::open`] reopens a finalized file for reading only.
//!
//! # Concurrency
//!
//! One writer, any number of readers. The latest branch sits behind a
//! `RwLock`. A node leaves the branch only after it has been written to
//! disk and published in the node cache, both under the write lock, so a
//! reader that fails to find a node in the branch always finds it on disk.
//! Finalized nodes are shared as `Arc<HtNode>` and read without locking
//! the branch.

use crate::config::HtConfig;
use crate::format::{TreeHeader, FILE_VERSION};
use crate::io::HtIo;
use crate::node::{HtNode, NodeKind, SeqNum};
use parking_lot::RwLock;
use statehist_core::{
    CancelToken, Error, Quark, QuarkSet, Result, StateInterval, StateValue, TimeCondition,
    Timestamp, FIXED_ENCODED_SIZE, MAX_STRING_LEN,
};
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

// ============================================================================
// Tree state
// ============================================================================

#[derive(Debug)]
struct TreeState {
    /// Root-to-leaf path still being written. Empty once finalized.
    branch: Vec<HtNode>,
    node_count: u32,
    root_seq: SeqNum,
    finished: bool,
    attribute_len: u64,
}

impl TreeState {
    fn next_seq(&mut self) -> SeqNum {
        let seq = self.node_count;
        self.node_count += 1;
        seq
    }
}

/// Size and shape of a tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeStats {
    /// Node blocks allocated so far
    pub node_count: u32,
    /// Levels from root to leaf
    pub depth: usize,
    /// Backing file length in bytes
    pub file_size: u64,
    /// Node cache hits
    pub cache_hits: u64,
    /// Node cache misses
    pub cache_misses: u64,
}

/// Disk-backed interval tree.
#[derive(Debug)]
pub struct HistoryTree {
    io: HtIo,
    tree_id: Uuid,
    state: RwLock<TreeState>,
    tree_end: AtomicI64,
}

impl HistoryTree {
    // ========================================================================
    // Construction
    // ========================================================================

    /// Create a new tree file, truncating any existing one.
    pub fn create(config: HtConfig) -> Result<Self> {
        config.validate()?;
        let io = HtIo::create(&config)?;
        let root = HtNode::new_leaf(&config, 0, None, config.tree_start);
        let tree_id = Uuid::new_v4();
        info!(
            path = %config.path.display(),
            block_size = config.block_size,
            max_children = config.max_children,
            start = config.tree_start,
            %tree_id,
            "created history tree"
        );
        Ok(Self {
            tree_end: AtomicI64::new(config.tree_start),
            io,
            tree_id,
            state: RwLock::new(TreeState {
                branch: vec![root],
                node_count: 1,
                root_seq: 0,
                finished: false,
                attribute_len: 0,
            }),
        })
    }

    /// Reopen a finalized tree for reading.
    ///
    /// Fails with [`Error::VersionMismatch`] when the file was written by a
    /// different provider version or file layout.
    pub fn open(path: impl AsRef<Path>, provider_version: u32) -> Result<Self> {
        let path = path.as_ref();
        let (io, header) = HtIo::open(path).map_err(|e| {
            warn!(path = %path.display(), error = %e, "rejected history file");
            e
        })?;
        if header.provider_version != provider_version {
            warn!(
                path = %path.display(),
                expected = provider_version,
                found = header.provider_version,
                "provider version mismatch"
            );
            return Err(Error::VersionMismatch {
                field: "provider version",
                expected: provider_version,
                found: header.provider_version,
            });
        }

        let root = io.read_node(header.root_seq)?;
        if root.start() != header.start_time || root.end() != Some(header.end_time) {
            return Err(Error::Corruption(format!(
                "root node covers [{}, {:?}], header says [{}, {}]",
                root.start(),
                root.end(),
                header.start_time,
                header.end_time
            )));
        }
        if root.parent().is_some() {
            return Err(Error::Corruption(format!(
                "root node {} has a parent",
                header.root_seq
            )));
        }

        info!(
            path = %path.display(),
            nodes = header.node_count,
            start = header.start_time,
            end = header.end_time,
            tree_id = %header.tree_id,
            "opened history tree"
        );
        Ok(Self {
            io,
            tree_id: header.tree_id,
            tree_end: AtomicI64::new(header.end_time),
            state: RwLock::new(TreeState {
                branch: Vec::new(),
                node_count: header.node_count,
                root_seq: header.root_seq,
                finished: true,
                attribute_len: header.attribute_len,
            }),
        })
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Tree configuration (from the header for reopened trees).
    pub fn config(&self) -> &HtConfig {
        self.io.config()
    }

    /// Identity written to the header.
    pub fn tree_id(&self) -> Uuid {
        self.tree_id
    }

    /// Earliest timestamp the tree covers.
    pub fn start_time(&self) -> Timestamp {
        self.io.config().tree_start
    }

    /// Latest interval end inserted, or the close time once finalized.
    pub fn end_time(&self) -> Timestamp {
        self.tree_end.load(Ordering::Acquire)
    }

    /// Node blocks allocated so far.
    pub fn node_count(&self) -> u32 {
        self.state.read().node_count
    }

    /// Sequence number of the current root.
    pub fn root_seq(&self) -> SeqNum {
        self.state.read().root_seq
    }

    /// Check if the tree was closed.
    pub fn is_finished(&self) -> bool {
        self.state.read().finished
    }

    /// Check if the tree was disposed.
    pub fn is_disposed(&self) -> bool {
        self.io.is_closed()
    }

    fn check_live(&self) -> Result<()> {
        if self.io.is_closed() {
            Err(Error::Disposed)
        } else {
            Ok(())
        }
    }

    // ========================================================================
    // Insertion
    // ========================================================================

    /// Insert a closed interval.
    ///
    /// The interval lands in the deepest latest-branch node that starts no
    /// later than it does and still has room, splitting as needed.
    pub fn insert(&self, interval: StateInterval) -> Result<()> {
        self.check_live()?;
        let config = self.io.config();
        if interval.start() < config.tree_start {
            return Err(Error::TimeRange(format!(
                "interval {} starts before tree start {}",
                interval, config.tree_start
            )));
        }
        let size = interval.encoded_size();
        if let StateValue::String(s) = interval.value() {
            if s.len() > MAX_STRING_LEN {
                return Err(Error::IntervalTooLarge {
                    size,
                    capacity: FIXED_ENCODED_SIZE + 2 + MAX_STRING_LEN,
                });
            }
        }
        let capacity = config.core_capacity();
        if size > capacity {
            return Err(Error::IntervalTooLarge { size, capacity });
        }

        let mut state = self.state.write();
        if state.finished {
            return Err(Error::Closed);
        }
        let end = interval.end();
        trace!(%interval, "insert");
        self.insert_into_branch(&mut state, interval)?;
        self.tree_end.fetch_max(end, Ordering::AcqRel);
        Ok(())
    }

    fn insert_into_branch(&self, state: &mut TreeState, interval: StateInterval) -> Result<()> {
        let mut index = state
            .branch
            .len()
            .checked_sub(1)
            .ok_or_else(|| Error::Internal("latest branch is empty".into()))?;
        loop {
            let node = &state.branch[index];
            if interval.start() < node.start() {
                index = index.checked_sub(1).ok_or_else(|| {
                    Error::Internal(format!("interval {} starts before the root", interval))
                })?;
                continue;
            }
            if !node.can_contain(&interval) {
                self.add_sibling_node(state, index)?;
                index = state.branch.len() - 1;
                continue;
            }
            return state.branch[index].add_interval(interval);
        }
    }

    fn split_start(&self) -> Result<(Timestamp, Timestamp)> {
        let split_time = self.tree_end.load(Ordering::Acquire);
        let next = split_time.checked_add(1).ok_or_else(|| {
            Error::TimeRange(format!("cannot split past timestamp {}", split_time))
        })?;
        Ok((split_time, next))
    }

    /// Close the branch from `index` down and replace it with fresh nodes
    /// starting right after the tree end.
    fn add_sibling_node(&self, state: &mut TreeState, index: usize) -> Result<()> {
        if index == 0 {
            return self.add_new_root(state);
        }
        if state.branch[index - 1].is_full() {
            return self.add_sibling_node(state, index - 1);
        }

        let (split_time, start) = self.split_start()?;
        let config = self.io.config();
        debug!(
            level = index,
            depth = state.branch.len(),
            split_time,
            "splitting latest branch"
        );
        for i in index..state.branch.len() {
            state.branch[i].close_node(split_time)?;
            self.io.write_node(&state.branch[i])?;

            let seq = state.next_seq();
            let parent = state.branch[i - 1].seq();
            let fresh = match state.branch[i].kind() {
                NodeKind::Core(_) => HtNode::new_core(config, seq, Some(parent), start),
                NodeKind::Leaf => HtNode::new_leaf(config, seq, Some(parent), start),
            };
            state.branch[i - 1].link_child(seq, start)?;
            state.branch[i] = fresh;
        }
        Ok(())
    }

    /// Put a new root above the current one and grow a fresh branch under it.
    fn add_new_root(&self, state: &mut TreeState) -> Result<()> {
        let (split_time, start) = self.split_start()?;
        let config = self.io.config();
        let depth = state.branch.len();
        let root_seq = state.next_seq();

        let mut new_root = HtNode::new_core(config, root_seq, None, config.tree_start);
        state.branch[0].set_parent(root_seq);
        for node in state.branch.iter_mut() {
            node.close_node(split_time)?;
        }
        for node in &state.branch {
            self.io.write_node(node)?;
        }
        new_root.link_child(state.branch[0].seq(), state.branch[0].start())?;

        let mut branch = Vec::with_capacity(depth + 1);
        branch.push(new_root);
        for level in 1..=depth {
            let seq = state.next_seq();
            let parent = branch[level - 1].seq();
            let node = if level == depth {
                HtNode::new_leaf(config, seq, Some(parent), start)
            } else {
                HtNode::new_core(config, seq, Some(parent), start)
            };
            branch[level - 1].link_child(seq, start)?;
            branch.push(node);
        }

        debug!(
            root = root_seq,
            depth = depth + 1,
            split_time,
            "added new root"
        );
        state.branch = branch;
        state.root_seq = root_seq;
        Ok(())
    }

    // ========================================================================
    // Closing
    // ========================================================================

    /// Close every branch node at `end`, write them, then write the header.
    pub fn close_tree(&self, end: Timestamp) -> Result<()> {
        self.check_live()?;
        let mut state = self.state.write();
        if state.finished {
            return Err(Error::Closed);
        }
        let tree_end = self.tree_end.load(Ordering::Acquire);
        if end < tree_end {
            return Err(Error::TimeRange(format!(
                "close time {} precedes tree end {}",
                end, tree_end
            )));
        }
        for node in state.branch.iter_mut() {
            node.close_node(end)?;
        }
        for node in &state.branch {
            self.io.write_node(node)?;
        }
        self.tree_end.store(end, Ordering::Release);
        state.root_seq = state
            .branch
            .first()
            .map(HtNode::seq)
            .ok_or_else(|| Error::Internal("latest branch is empty".into()))?;
        state.branch.clear();
        state.finished = true;
        self.io.write_header(&self.header(&state))?;
        info!(
            path = %self.config().path.display(),
            nodes = state.node_count,
            end,
            "closed history tree"
        );
        Ok(())
    }

    fn header(&self, state: &TreeState) -> TreeHeader {
        let config = self.io.config();
        TreeHeader {
            file_version: FILE_VERSION,
            provider_version: config.provider_version,
            block_size: config.block_size as u32,
            max_children: config.max_children as u32,
            node_count: state.node_count,
            root_seq: state.root_seq,
            start_time: config.tree_start,
            end_time: self.end_time(),
            tree_id: self.tree_id,
            attribute_len: state.attribute_len,
        }
    }

    /// Append an opaque section after the node blocks of a closed tree.
    pub fn write_attribute_section(&self, bytes: &[u8]) -> Result<()> {
        self.check_live()?;
        let mut state = self.state.write();
        if !state.finished {
            return Err(Error::Internal(
                "attribute section written before the tree was closed".into(),
            ));
        }
        let offset = self.io.nodes_end(state.node_count);
        self.io.write_at(offset, bytes)?;
        state.attribute_len = bytes.len() as u64;
        self.io.write_header(&self.header(&state))
    }

    /// Section written by [`HistoryTree::write_attribute_section`], if any.
    pub fn read_attribute_section(&self) -> Result<Option<Vec<u8>>> {
        self.check_live()?;
        let (node_count, len) = {
            let state = self.state.read();
            (state.node_count, state.attribute_len)
        };
        if len == 0 {
            return Ok(None);
        }
        let len = usize::try_from(len)
            .map_err(|_| Error::Corruption(format!("attribute section of {} bytes", len)))?;
        self.io
            .read_at(self.io.nodes_end(node_count), len)
            .map(Some)
            .map_err(|e| match e {
                Error::Io(io) if io.kind() == std::io::ErrorKind::UnexpectedEof => {
                    Error::Corruption("attribute section is truncated".into())
                }
                other => other,
            })
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Run `f` on node `seq`, from the latest branch or from disk.
    fn visit<T>(&self, seq: SeqNum, f: impl FnOnce(&HtNode) -> T) -> Result<T> {
        {
            let state = self.state.read();
            if let Some(node) = state.branch.iter().find(|n| n.seq() == seq) {
                return Ok(f(node));
            }
        }
        let node = self.io.read_node(seq)?;
        Ok(f(&node))
    }

    fn descend_to(&self, seq: SeqNum, t: Timestamp, next: &[SeqNum]) -> Result<Option<SeqNum>> {
        match next {
            [] => Ok(None),
            [child] => Ok(Some(*child)),
            many => Err(Error::Internal(format!(
                "{} children of node {} contain time {}",
                many.len(),
                seq,
                t
            ))),
        }
    }

    /// Interval of `quark` containing `t`, if one was inserted.
    pub fn query_single(
        &self,
        t: Timestamp,
        quark: Quark,
        cancel: &CancelToken,
    ) -> Result<Option<StateInterval>> {
        self.check_live()?;
        let mut seq = self.root_seq();
        loop {
            cancel.check()?;
            let (found, next) = self.visit(seq, |node| {
                (
                    node.relevant_interval(quark, t).cloned(),
                    node.select_next_children(t),
                )
            })?;
            if found.is_some() {
                return Ok(found);
            }
            match self.descend_to(seq, t, &next)? {
                Some(child) => seq = child,
                None => return Ok(None),
            }
        }
    }

    /// Fill `out[q]` with the interval of quark `q` containing `t`, for every
    /// quark below `out.len()`. One root-to-leaf descent serves all quarks.
    pub fn query_full(
        &self,
        t: Timestamp,
        out: &mut [Option<StateInterval>],
        cancel: &CancelToken,
    ) -> Result<()> {
        self.check_live()?;
        let mut seq = self.root_seq();
        loop {
            cancel.check()?;
            let next = self.visit(seq, |node| {
                node.collect_intervals_at(t, out);
                node.select_next_children(t)
            })?;
            match self.descend_to(seq, t, &next)? {
                Some(child) => seq = child,
                None => return Ok(()),
            }
        }
    }

    /// Every interval of a quark in `quarks` whose span meets `times`.
    ///
    /// Each node is visited at most once, and subtrees whose time range
    /// meets no requested instant are skipped. Results come in visit order.
    pub fn query_2d(
        &self,
        quarks: &QuarkSet,
        times: &TimeCondition,
        cancel: &CancelToken,
    ) -> Result<Vec<StateInterval>> {
        self.check_live()?;
        let mut out = Vec::new();
        if quarks.is_empty() {
            return Ok(out);
        }
        let mut pending = vec![self.root_seq()];
        while let Some(seq) = pending.pop() {
            cancel.check()?;
            let children = self.visit(seq, |node| {
                node.collect_matching(quarks, times, &mut out);
                node.children_matching(times)
            })?;
            pending.extend(children.into_iter().rev());
        }
        Ok(out)
    }

    /// Finalized node `seq`.
    pub fn read_node(&self, seq: SeqNum) -> Result<Arc<HtNode>> {
        self.check_live()?;
        self.io.read_node(seq)
    }

    // ========================================================================
    // Diagnostics
    // ========================================================================

    /// Levels from root to leaf.
    pub fn depth(&self) -> Result<usize> {
        let mut seq = {
            let state = self.state.read();
            if !state.branch.is_empty() {
                return Ok(state.branch.len());
            }
            state.root_seq
        };
        let mut depth = 1;
        while let Some(child) = self.read_node(seq)?.latest_child() {
            seq = child;
            depth += 1;
        }
        Ok(depth)
    }

    /// Node count, depth, file size and cache counters.
    pub fn stats(&self) -> Result<TreeStats> {
        let (cache_hits, cache_misses) = self.io.cache().stats();
        Ok(TreeStats {
            node_count: self.node_count(),
            depth: self.depth()?,
            file_size: self.io.file_size()?,
            cache_hits,
            cache_misses,
        })
    }

    /// Verify parent/child links and time containment of a finalized tree.
    pub fn check_integrity(&self) -> Result<()> {
        let (node_count, root_seq) = {
            let state = self.state.read();
            if !state.finished {
                return Err(Error::Internal(
                    "integrity check needs a closed tree".into(),
                ));
            }
            (state.node_count, state.root_seq)
        };

        for seq in 0..node_count {
            let node = self.read_node(seq)?;
            if (node.parent().is_none()) != (seq == root_seq) {
                return Err(Error::Corruption(format!(
                    "node {} parent {:?} disagrees with root {}",
                    seq,
                    node.parent(),
                    root_seq
                )));
            }
            let children = match node.kind() {
                NodeKind::Core(children) => children,
                NodeKind::Leaf => continue,
            };
            let node_end = node.end().unwrap_or(Timestamp::MAX);
            if children.is_empty() {
                return Err(Error::Corruption(format!("core node {} has no children", seq)));
            }
            let last = children.len() - 1;
            for (i, (child_seq, child_start)) in children.iter().enumerate() {
                let child = self.read_node(child_seq)?;
                let child_end = child.end().unwrap_or(Timestamp::MAX);
                let problem = if child.parent() != Some(seq) {
                    Some("parent link")
                } else if child.start() != child_start {
                    Some("child start table")
                } else if child.start() < node.start() || child_end > node_end {
                    Some("time containment")
                } else if i == 0 && child.start() != node.start() {
                    Some("first child start")
                } else if i == last && child_end != node_end {
                    Some("last child end")
                } else {
                    None
                };
                if let Some(what) = problem {
                    return Err(Error::Corruption(format!(
                        "{} broken between node {} and child {}",
                        what, seq, child_seq
                    )));
                }
            }
        }
        Ok(())
    }

    /// Release the file handle. In-flight and later queries fail with
    /// [`Error::Disposed`].
    pub fn dispose(&self) {
        if !self.io.is_closed() {
            info!(path = %self.config().path.display(), "disposed history tree");
        }
        self.io.close();
    }
}
