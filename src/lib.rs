//! # statehist
//!
//! Time-indexed state history for trace analysis.
//!
//! An analysis feeds per-attribute state changes ("cpu 0 runs pid 42 from
//! t=1200") to a [`StateSystemBuilder`]. Closed intervals are stored in a
//! history tree file, and any number of threads can ask what every
//! attribute held at an arbitrary time, both while the history is being
//! built and after it was reopened from disk.
//!
//! ## Quick Start
//!
//! ```ignore
//! use statehist::prelude::*;
//!
//! let mut builder = HistoryOptions::new().path("./trace.ht").create()?;
//! let q = builder.get_quark_absolute_and_add(&["threads", "42", "status"])?;
//! builder.modify_attribute(0, "A", q)?;
//! builder.modify_attribute(5, "B", q)?;
//! builder.close_history(10)?;
//!
//! let interval = builder.query_single_state(3, q)?;
//! assert_eq!((interval.start(), interval.end()), (0, 4));
//! ```
//!
//! ## Crates
//!
//! - `statehist-core`: values, intervals, quarks and the error type
//! - `statehist-storage`: the on-disk history tree
//! - `statehist-engine`: attribute tree, builder, queries and iterators

#![warn(missing_docs)]

mod options;

pub mod prelude;

pub use options::{HistoryOptions, Opened};

pub use statehist_core::{
    CancelToken, Error, Quark, QuarkSet, Result, StateInterval, StateValue, TimeCondition,
    Timestamp, ValueKind,
};
pub use statehist_engine::{
    AttributeTree, HistoryTreeBackend, InMemoryBackend, QuarkIterator, StateHistoryBackend,
    StateSystem, StateSystemBuilder, MAX_STACK_DEPTH, PARENT, WILDCARD,
};
pub use statehist_storage::{HistoryTree, HtConfig, TreeStats};
