//! Storage layer for statehist
//!
//! This crate implements the on-disk history tree:
//! - HtConfig: block size, fan-out and provider version of a tree file
//! - format: file header and interval encodings
//! - HtNode: fixed-size node block, leaf or core
//! - NodeCache: direct-mapped cache of finalized nodes
//! - HtIo: file handle shared by the writer and readers
//! - HistoryTree: insertion, branch splitting, point and full queries

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cache;
pub mod config;
pub mod format;
pub mod io;
pub mod node;
pub mod tree;

pub use cache::{NodeCache, CACHE_SLOTS};
pub use config::{HtConfig, DEFAULT_BLOCK_SIZE, DEFAULT_MAX_CHILDREN, TREE_HEADER_SIZE};
pub use format::{FormatError, TreeHeader};
pub use io::HtIo;
pub use node::{ChildTable, HtNode, NodeKind, SeqNum};
pub use tree::{HistoryTree, TreeStats};
