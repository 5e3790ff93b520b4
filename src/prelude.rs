//! Convenient imports for statehist.
//!
//! ```ignore
//! use statehist::prelude::*;
//!
//! let mut builder = HistoryOptions::new().in_memory();
//! let q = builder.get_quark_absolute_and_add(&["cpu"])?;
//! ```

// Entry point
pub use crate::options::{HistoryOptions, Opened};

// Error handling
pub use statehist_core::{Error, Result};

// Core types
pub use statehist_core::{
    CancelToken, Quark, QuarkSet, StateInterval, StateValue, TimeCondition, Timestamp,
};

// Read and write handles
pub use statehist_engine::{QuarkIterator, StateSystem, StateSystemBuilder};
