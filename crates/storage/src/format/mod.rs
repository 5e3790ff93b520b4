//! On-disk byte formats for history tree files.
//!
//! This module centralizes all serialization logic for persistent storage.
//! Node layout lives next to the node type in `node.rs`; everything shared
//! between nodes and the file header lives here.
//!
//! # Module Structure
//!
//! - `header`: file header written at offset 0
//! - `interval`: state interval encoding used inside node blocks
//!
//! # File Layout
//!
//! ```text
//! +----------------------+  0
//! | header (4096 bytes)  |
//! +----------------------+  TREE_HEADER_SIZE
//! | node 0 (block_size)  |
//! | node 1               |
//! | ...                  |
//! +----------------------+  TREE_HEADER_SIZE + node_count * block_size
//! | attribute section    |
//! +----------------------+
//! ```

pub mod header;
pub mod interval;

pub use header::{TreeHeader, FILE_VERSION, HEADER_MAGIC};
pub use interval::{read_interval, write_interval};

use statehist_core::Error;
use thiserror::Error;

/// Decoding failure in persisted bytes.
#[derive(Debug, Error)]
pub enum FormatError {
    /// Ran out of bytes
    #[error("truncated {0}")]
    Truncated(&'static str),

    /// Unknown state value tag
    #[error("unknown value tag {0}")]
    UnknownValueTag(u8),

    /// Unknown node kind byte
    #[error("unknown node kind {0}")]
    UnknownNodeKind(u8),

    /// String payload is not UTF-8
    #[error("string value is not valid UTF-8")]
    InvalidUtf8,

    /// Stored checksum does not match the bytes
    #[error("checksum mismatch in {what}: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch {
        /// Section being checked
        what: &'static str,
        /// Checksum read from disk
        stored: u32,
        /// Checksum of the bytes read
        computed: u32,
    },

    /// Structurally invalid field
    #[error("{0}")]
    Invalid(String),
}

impl From<FormatError> for Error {
    fn from(e: FormatError) -> Self {
        Error::Corruption(e.to_string())
    }
}

/// Map a short read onto [`FormatError::Truncated`].
pub(crate) fn truncated(what: &'static str) -> impl Fn(std::io::Error) -> FormatError {
    move |_| FormatError::Truncated(what)
}
