//! History tree configuration

use serde::{Deserialize, Serialize};
use statehist_core::{Error, Result, Timestamp, FIXED_ENCODED_SIZE};
use std::path::{Path, PathBuf};

/// Size of the file header. Node blocks start right after it.
pub const TREE_HEADER_SIZE: usize = 4096;

/// Default node block size (64 KiB).
pub const DEFAULT_BLOCK_SIZE: usize = 64 * 1024;

/// Default fan-out of a core node.
pub const DEFAULT_MAX_CHILDREN: usize = 50;

/// Bytes of the header shared by every node:
/// kind, start, end, seq, parent, interval count.
pub const COMMON_HEADER_SIZE: usize = 1 + 8 + 8 + 4 + 4 + 4;

/// Bytes of a core node's child table for a given fan-out:
/// child count, then `max_children` sequence numbers and start times.
pub const fn core_header_size(max_children: usize) -> usize {
    4 + max_children * (4 + 8)
}

/// Configuration of one history tree file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HtConfig {
    /// Backing file
    pub path: PathBuf,
    /// Size of every node block, at least [`TREE_HEADER_SIZE`]
    pub block_size: usize,
    /// Maximum children of a core node
    pub max_children: usize,
    /// Version of the analysis that produced the state; checked on reopen
    pub provider_version: u32,
    /// Earliest timestamp the tree accepts
    pub tree_start: Timestamp,
}

impl HtConfig {
    /// Configuration with default block size and fan-out.
    pub fn new(path: impl AsRef<Path>, provider_version: u32, tree_start: Timestamp) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            block_size: DEFAULT_BLOCK_SIZE,
            max_children: DEFAULT_MAX_CHILDREN,
            provider_version,
            tree_start,
        }
    }

    /// Set the block size.
    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    /// Set the core-node fan-out.
    pub fn with_max_children(mut self, max_children: usize) -> Self {
        self.max_children = max_children;
        self
    }

    /// Interval bytes available in an empty leaf.
    pub fn leaf_capacity(&self) -> usize {
        self.block_size.saturating_sub(COMMON_HEADER_SIZE)
    }

    /// Interval bytes available in an empty core node.
    pub fn core_capacity(&self) -> usize {
        self.block_size
            .saturating_sub(COMMON_HEADER_SIZE + core_header_size(self.max_children))
    }

    /// Reject configurations the file format cannot hold.
    pub fn validate(&self) -> Result<()> {
        if self.block_size < TREE_HEADER_SIZE {
            return Err(Error::InvalidConfig(format!(
                "block size {} is below the minimum of {}",
                self.block_size, TREE_HEADER_SIZE
            )));
        }
        if self.block_size > u32::MAX as usize {
            return Err(Error::InvalidConfig(format!(
                "block size {} does not fit the header",
                self.block_size
            )));
        }
        if self.max_children < 2 {
            return Err(Error::InvalidConfig(format!(
                "max children must be at least 2, got {}",
                self.max_children
            )));
        }
        if self.core_capacity() < FIXED_ENCODED_SIZE {
            return Err(Error::InvalidConfig(format!(
                "{} children leave no room for intervals in a {}-byte core node",
                self.max_children, self.block_size
            )));
        }
        Ok(())
    }
}
