//! Core types for statehist
//!
//! This crate defines the vocabulary shared by the storage and engine layers:
//! - Quark: integer handle for an attribute path
//! - Timestamp: signed 64-bit trace time
//! - StateValue: tagged union of storable value kinds
//! - StateInterval: a closed value held by one attribute over `[start, end]`
//! - CancelToken: cooperative cancellation for long query chains
//! - TimeCondition, QuarkSet: filters for two-dimensional queries
//! - Error: the single error taxonomy used across the workspace

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod condition;
pub mod error;
pub mod interval;
pub mod types;
pub mod value;

pub use condition::{QuarkSet, TimeCondition};
pub use error::{Error, Result};
pub use interval::{StateInterval, FIXED_ENCODED_SIZE};
pub use types::{CancelToken, Quark, Timestamp};
pub use value::{StateValue, ValueKind, MAX_STRING_LEN};
