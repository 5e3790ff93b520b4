//! Error types for statehist
//!
//! Every fallible operation in the workspace returns [`Result`]. Call sites
//! match on the variant instead of unwinding through exception chains.

use thiserror::Error;

/// All statehist errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Quark or attribute path does not exist
    #[error("attribute not found: {0}")]
    AttributeNotFound(String),

    /// Timestamp outside the valid range, or a non-monotonic write
    #[error("time range error: {0}")]
    TimeRange(String),

    /// Value-kind mismatch on typed access
    #[error("state value type error: expected {expected}, got {actual}")]
    StateValueType {
        /// Kind the caller expected
        expected: String,
        /// Kind actually stored
        actual: String,
    },

    /// Operation attempted after the state system was disposed
    #[error("state system has been disposed")]
    Disposed,

    /// Write attempted after the history was finalized
    #[error("history is already closed")]
    Closed,

    /// Closing the history failed; the state system was disposed
    #[error("history build failed: {0}")]
    BuildFailed(String),

    /// Query aborted through its cancellation token
    #[error("query cancelled")]
    Cancelled,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Header field mismatch on reopen
    #[error("{field} mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Header field that did not match
        field: &'static str,
        /// Value this build expects
        expected: u32,
        /// Value read from the file
        found: u32,
    },

    /// Persisted data failed validation
    #[error("corruption: {0}")]
    Corruption(String),

    /// Rejected configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Interval cannot fit in an empty node
    #[error("interval needs {size} bytes but a node holds at most {capacity}")]
    IntervalTooLarge {
        /// Encoded interval size
        size: usize,
        /// Byte budget of an empty node
        capacity: usize,
    },

    /// Push onto a stack attribute that is already at the depth limit
    #[error("stack attribute {attribute} reached its depth limit of {limit}")]
    StackLimit {
        /// Stack attribute path
        attribute: String,
        /// Maximum depth
        limit: usize,
    },

    /// Internal error (bug or invariant violation)
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for statehist operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Build a value-kind mismatch error.
    pub fn value_type(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Error::StateValueType {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Check if this is an attribute-not-found error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::AttributeNotFound(_))
    }

    /// Check if this is a time range error.
    pub fn is_time_range(&self) -> bool {
        matches!(self, Error::TimeRange(_))
    }

    /// Check if the state system was disposed under this operation.
    pub fn is_disposed(&self) -> bool {
        matches!(self, Error::Disposed)
    }

    /// Check if the on-disk history should be rebuilt from the trace.
    ///
    /// True for header mismatches and corruption, which the caller can
    /// resolve by deleting the file and running the analysis again.
    pub fn requires_rebuild(&self) -> bool {
        matches!(self, Error::VersionMismatch { .. } | Error::Corruption(_))
    }

    /// Check if this is a serious/unrecoverable error.
    pub fn is_serious(&self) -> bool {
        matches!(self, Error::Internal(_) | Error::Corruption(_))
    }
}
