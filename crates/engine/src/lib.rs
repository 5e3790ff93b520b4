//! State system engine for statehist
//!
//! This crate turns a stream of per-attribute state changes into a queryable
//! history:
//! - AttributeTree: path to quark interning, persisted with the history
//! - TransientState: the ongoing interval of every attribute
//! - StateHistoryBackend: where closed intervals go (history tree or memory)
//! - StateSystemBuilder: the single writer
//! - StateSystem: point, full and range queries, live or finished
//! - QuarkIterator: reversible, optionally sampled cursor over one attribute

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod attribute_tree;
pub mod backend;
pub mod builder;
pub mod iterator;
pub mod state_system;
pub mod transient;

pub use attribute_tree::{AttributeTree, PARENT, WILDCARD};
pub use backend::{HistoryTreeBackend, InMemoryBackend, StateHistoryBackend};
pub use builder::{StateSystemBuilder, MAX_STACK_DEPTH};
pub use iterator::QuarkIterator;
pub use state_system::StateSystem;
pub use transient::TransientState;
