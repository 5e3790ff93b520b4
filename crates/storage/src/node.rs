//! History tree nodes
//!
//! A node is one fixed-size block of the tree file. Both kinds store state
//! intervals; a core node additionally keeps a table of its children.
//!
//! # Invariants
//!
//! - Every interval in a node satisfies `node.start <= interval.start` and,
//!   once the node is closed, `interval.end <= node.end`.
//! - Intervals are kept sorted by end time, so a point lookup can skip
//!   everything that ended before the queried instant.
//! - Children are appended with strictly increasing start times. Child `i`
//!   covers `[start_i, start_{i+1} - 1]`; the last child ends with its
//!   parent.
//!
//! # Block layout (little-endian)
//!
//! ```text
//! kind: u8 | start: i64 | end: i64 | seq: u32 | parent: u32 | count: u32
//! [core only] child count: u32 | max_children x seq: u32 | max_children x start: i64
//! intervals...
//! zero padding up to block_size
//! ```

use crate::config::{core_header_size, HtConfig, COMMON_HEADER_SIZE};
use crate::format::{read_interval, truncated, write_interval, FormatError};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use smallvec::SmallVec;
use statehist_core::{
    Error, Quark, QuarkSet, Result, StateInterval, TimeCondition, Timestamp, FIXED_ENCODED_SIZE,
};
use std::io::Cursor;

/// Position of a node block in the file.
pub type SeqNum = u32;

const KIND_CORE: u8 = 1;
const KIND_LEAF: u8 = 2;
const NO_PARENT: u32 = u32::MAX;

/// Child table of a core node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChildTable {
    seqs: Vec<SeqNum>,
    starts: Vec<Timestamp>,
}

impl ChildTable {
    /// Number of linked children.
    pub fn len(&self) -> usize {
        self.seqs.len()
    }

    /// Check if no child is linked yet.
    pub fn is_empty(&self) -> bool {
        self.seqs.is_empty()
    }

    /// `(seq, start)` pairs in link order.
    pub fn iter(&self) -> impl Iterator<Item = (SeqNum, Timestamp)> + '_ {
        self.seqs.iter().copied().zip(self.starts.iter().copied())
    }

    /// Most recently linked child.
    pub fn latest(&self) -> Option<SeqNum> {
        self.seqs.last().copied()
    }
}

/// Node variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    /// Inner node with children
    Core(ChildTable),
    /// Bottom of the tree
    Leaf,
}

/// One block of the history tree.
#[derive(Debug, Clone)]
pub struct HtNode {
    seq: SeqNum,
    parent: Option<SeqNum>,
    start: Timestamp,
    end: Option<Timestamp>,
    kind: NodeKind,
    intervals: Vec<StateInterval>,
    bytes_used: usize,
    block_size: usize,
    max_children: usize,
}

impl HtNode {
    /// New empty leaf.
    pub fn new_leaf(
        config: &HtConfig,
        seq: SeqNum,
        parent: Option<SeqNum>,
        start: Timestamp,
    ) -> Self {
        Self::new(config, seq, parent, start, NodeKind::Leaf)
    }

    /// New empty core node.
    pub fn new_core(
        config: &HtConfig,
        seq: SeqNum,
        parent: Option<SeqNum>,
        start: Timestamp,
    ) -> Self {
        Self::new(
            config,
            seq,
            parent,
            start,
            NodeKind::Core(ChildTable::default()),
        )
    }

    fn new(
        config: &HtConfig,
        seq: SeqNum,
        parent: Option<SeqNum>,
        start: Timestamp,
        kind: NodeKind,
    ) -> Self {
        Self {
            seq,
            parent,
            start,
            end: None,
            kind,
            intervals: Vec::new(),
            bytes_used: 0,
            block_size: config.block_size,
            max_children: config.max_children,
        }
    }

    /// Sequence number.
    pub fn seq(&self) -> SeqNum {
        self.seq
    }

    /// Parent sequence number, `None` for the root.
    pub fn parent(&self) -> Option<SeqNum> {
        self.parent
    }

    pub(crate) fn set_parent(&mut self, parent: SeqNum) {
        self.parent = Some(parent);
    }

    /// First instant covered.
    pub fn start(&self) -> Timestamp {
        self.start
    }

    /// Last instant covered, once closed.
    pub fn end(&self) -> Option<Timestamp> {
        self.end
    }

    /// Check if the node end is frozen.
    pub fn is_closed(&self) -> bool {
        self.end.is_some()
    }

    /// Node variant.
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// Check if this is a leaf.
    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, NodeKind::Leaf)
    }

    /// Stored intervals, sorted by end time.
    pub fn intervals(&self) -> &[StateInterval] {
        &self.intervals
    }

    /// Number of linked children (zero for leaves).
    pub fn child_count(&self) -> usize {
        match &self.kind {
            NodeKind::Core(children) => children.len(),
            NodeKind::Leaf => 0,
        }
    }

    /// Check if a core node cannot take another child.
    pub fn is_full(&self) -> bool {
        self.child_count() >= self.max_children
    }

    fn header_size(&self) -> usize {
        match self.kind {
            NodeKind::Core(_) => COMMON_HEADER_SIZE + core_header_size(self.max_children),
            NodeKind::Leaf => COMMON_HEADER_SIZE,
        }
    }

    /// Interval byte budget: block size minus headers.
    pub fn capacity(&self) -> usize {
        self.block_size.saturating_sub(self.header_size())
    }

    /// Unused interval bytes.
    pub fn free_space(&self) -> usize {
        self.capacity().saturating_sub(self.bytes_used)
    }

    /// Share of the interval budget in use, 0 to 100.
    pub fn usage_percent(&self) -> u32 {
        let capacity = self.capacity().max(1);
        ((self.bytes_used * 100) / capacity) as u32
    }

    /// Check if `interval` fits in the remaining budget.
    pub fn can_contain(&self, interval: &StateInterval) -> bool {
        !self.is_closed() && interval.encoded_size() <= self.free_space()
    }

    /// Store an interval, keeping end-time order. Equal ends keep
    /// insertion order.
    pub fn add_interval(&mut self, interval: StateInterval) -> Result<()> {
        if !self.can_contain(&interval) {
            return Err(Error::Internal(format!(
                "node {} cannot hold {}",
                self.seq, interval
            )));
        }
        if interval.start() < self.start {
            return Err(Error::Internal(format!(
                "interval {} starts before node {} at {}",
                interval, self.seq, self.start
            )));
        }
        let end = interval.end();
        let pos = self.intervals.partition_point(|iv| iv.end() <= end);
        self.bytes_used += interval.encoded_size();
        self.intervals.insert(pos, interval);
        Ok(())
    }

    /// Freeze the node end. Called once, at split or tree close.
    pub fn close_node(&mut self, end: Timestamp) -> Result<()> {
        if let Some(previous) = self.end {
            return Err(Error::Internal(format!(
                "node {} already closed at {}",
                self.seq, previous
            )));
        }
        if let Some(last) = self.intervals.last() {
            if last.end() > end {
                return Err(Error::Internal(format!(
                    "closing node {} at {} would cut interval {}",
                    self.seq, end, last
                )));
            }
        }
        self.end = Some(end);
        Ok(())
    }

    /// Append a child to a core node.
    pub fn link_child(&mut self, seq: SeqNum, start: Timestamp) -> Result<()> {
        let full = self.is_full();
        let node_start = self.start;
        let node_seq = self.seq;
        match &mut self.kind {
            NodeKind::Leaf => Err(Error::Internal(format!(
                "cannot link child {} under leaf {}",
                seq, node_seq
            ))),
            NodeKind::Core(_) if full => Err(Error::Internal(format!(
                "core node {} has no free child slot",
                node_seq
            ))),
            NodeKind::Core(children) => {
                let ordered = match children.starts.last() {
                    Some(last) => start > *last,
                    None => start >= node_start,
                };
                if !ordered {
                    return Err(Error::Internal(format!(
                        "child {} start {} out of order under node {}",
                        seq, start, node_seq
                    )));
                }
                children.seqs.push(seq);
                children.starts.push(start);
                Ok(())
            }
        }
    }

    /// Most recently linked child of a core node.
    pub fn latest_child(&self) -> Option<SeqNum> {
        match &self.kind {
            NodeKind::Core(children) => children.latest(),
            NodeKind::Leaf => None,
        }
    }

    /// Children whose range contains `t`.
    ///
    /// Child ranges are disjoint, so a point query gets at most one.
    pub fn select_next_children(&self, t: Timestamp) -> SmallVec<[SeqNum; 2]> {
        let mut selected = SmallVec::new();
        let children = match &self.kind {
            NodeKind::Core(children) => children,
            NodeKind::Leaf => return selected,
        };
        let after = children.starts.partition_point(|s| *s <= t);
        if after == 0 {
            return selected;
        }
        let idx = after - 1;
        let is_last = idx + 1 == children.len();
        if is_last && self.end.map_or(false, |end| t > end) {
            return selected;
        }
        selected.push(children.seqs[idx]);
        selected
    }

    /// Interval of `quark` containing `t`, if this node holds it.
    pub fn relevant_interval(&self, quark: Quark, t: Timestamp) -> Option<&StateInterval> {
        let first = self.intervals.partition_point(|iv| iv.end() < t);
        self.intervals[first..]
            .iter()
            .find(|iv| iv.quark() == quark && iv.start() <= t)
    }

    /// Fill `out[quark]` with every interval containing `t`.
    ///
    /// Slots already filled are left alone; quarks past `out.len()` are
    /// skipped.
    pub fn collect_intervals_at(&self, t: Timestamp, out: &mut [Option<StateInterval>]) {
        let first = self.intervals.partition_point(|iv| iv.end() < t);
        for iv in &self.intervals[first..] {
            if iv.start() > t {
                continue;
            }
            if let Some(slot) = out.get_mut(iv.quark().index()) {
                if slot.is_none() {
                    *slot = Some(iv.clone());
                }
            }
        }
    }

    /// Children whose range meets `times`, in link order.
    pub fn children_matching(&self, times: &TimeCondition) -> SmallVec<[SeqNum; 4]> {
        let mut selected = SmallVec::new();
        let children = match &self.kind {
            NodeKind::Core(children) => children,
            NodeKind::Leaf => return selected,
        };
        for (i, (seq, start)) in children.iter().enumerate() {
            let end = match children.starts.get(i + 1) {
                Some(next) => next - 1,
                None => self.end.unwrap_or(Timestamp::MAX),
            };
            if times.intersects(start, end) {
                selected.push(seq);
            }
        }
        selected
    }

    /// Append every interval of a quark in `quarks` whose span meets
    /// `times`.
    pub fn collect_matching(
        &self,
        quarks: &QuarkSet,
        times: &TimeCondition,
        out: &mut Vec<StateInterval>,
    ) {
        let first = self.intervals.partition_point(|iv| iv.end() < times.min());
        out.extend(
            self.intervals[first..]
                .iter()
                .filter(|iv| quarks.contains(iv.quark()) && times.intersects(iv.start(), iv.end()))
                .cloned(),
        );
    }

    /// Encode into exactly `block_size` bytes. The node must be closed.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let end = self.end.ok_or_else(|| {
            Error::Internal(format!("node {} serialized before close", self.seq))
        })?;
        let mut buf = Vec::with_capacity(self.block_size);
        self.write_block(end, &mut buf)?;
        if buf.len() > self.block_size {
            return Err(Error::Internal(format!(
                "node {} encodes to {} bytes, block is {}",
                self.seq,
                buf.len(),
                self.block_size
            )));
        }
        buf.resize(self.block_size, 0);
        Ok(buf)
    }

    fn write_block(&self, end: Timestamp, buf: &mut Vec<u8>) -> std::io::Result<()> {
        let kind = match self.kind {
            NodeKind::Core(_) => KIND_CORE,
            NodeKind::Leaf => KIND_LEAF,
        };
        buf.write_u8(kind)?;
        buf.write_i64::<LittleEndian>(self.start)?;
        buf.write_i64::<LittleEndian>(end)?;
        buf.write_u32::<LittleEndian>(self.seq)?;
        buf.write_u32::<LittleEndian>(self.parent.unwrap_or(NO_PARENT))?;
        buf.write_u32::<LittleEndian>(self.intervals.len() as u32)?;

        if let NodeKind::Core(children) = &self.kind {
            buf.write_u32::<LittleEndian>(children.len() as u32)?;
            for i in 0..self.max_children {
                buf.write_u32::<LittleEndian>(children.seqs.get(i).copied().unwrap_or(0))?;
            }
            for i in 0..self.max_children {
                buf.write_i64::<LittleEndian>(children.starts.get(i).copied().unwrap_or(0))?;
            }
        }

        for iv in &self.intervals {
            write_interval(buf, iv)?;
        }
        Ok(())
    }

    /// Decode a block written by [`HtNode::serialize`].
    pub fn deserialize(bytes: &[u8], config: &HtConfig) -> std::result::Result<Self, FormatError> {
        if bytes.len() != config.block_size {
            return Err(FormatError::Truncated("node block"));
        }
        let mut cur = Cursor::new(bytes);
        let eof = truncated("node header");

        let kind_byte = cur.read_u8().map_err(&eof)?;
        let start = cur.read_i64::<LittleEndian>().map_err(&eof)?;
        let end = cur.read_i64::<LittleEndian>().map_err(&eof)?;
        let seq = cur.read_u32::<LittleEndian>().map_err(&eof)?;
        let parent = match cur.read_u32::<LittleEndian>().map_err(&eof)? {
            NO_PARENT => None,
            p => Some(p),
        };
        let count = cur.read_u32::<LittleEndian>().map_err(&eof)? as usize;

        let kind = match kind_byte {
            KIND_LEAF => NodeKind::Leaf,
            KIND_CORE => {
                let n = cur.read_u32::<LittleEndian>().map_err(&eof)? as usize;
                if n > config.max_children {
                    return Err(FormatError::Invalid(format!(
                        "node {} lists {} children, fan-out is {}",
                        seq, n, config.max_children
                    )));
                }
                let mut seqs = Vec::with_capacity(n);
                for i in 0..config.max_children {
                    let child = cur.read_u32::<LittleEndian>().map_err(&eof)?;
                    if i < n {
                        seqs.push(child);
                    }
                }
                let mut starts = Vec::with_capacity(n);
                for i in 0..config.max_children {
                    let child_start = cur.read_i64::<LittleEndian>().map_err(&eof)?;
                    if i < n {
                        starts.push(child_start);
                    }
                }
                NodeKind::Core(ChildTable { seqs, starts })
            }
            other => return Err(FormatError::UnknownNodeKind(other)),
        };

        let mut node = Self::new(config, seq, parent, start, kind);
        let capacity = node.capacity();
        if count > capacity / FIXED_ENCODED_SIZE {
            return Err(FormatError::Invalid(format!(
                "node {} claims {} intervals, budget fits at most {}",
                seq,
                count,
                capacity / FIXED_ENCODED_SIZE
            )));
        }
        let mut intervals = Vec::with_capacity(count);
        for _ in 0..count {
            let iv = read_interval(&mut cur)?;
            if iv.start() < start || iv.end() > end {
                return Err(FormatError::Invalid(format!(
                    "interval {} outside node {} range [{}, {}]",
                    iv, seq, start, end
                )));
            }
            node.bytes_used += iv.encoded_size();
            intervals.push(iv);
        }
        if node.bytes_used > capacity {
            return Err(FormatError::Invalid(format!(
                "node {} holds {} interval bytes, budget is {}",
                seq, node.bytes_used, capacity
            )));
        }
        intervals.sort_by_key(|iv| iv.end());
        node.intervals = intervals;
        node.end = Some(end);
        Ok(node)
    }
}
