//! State History Integration Tests
//!
//! End-to-end tests for statehist: builder and reader over both backends,
//! reopening files, concurrent readers during a build, and tree splits.
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test --test history
//!
//! # Only the concurrency tests
//! cargo test --test history concurrency::
//! ```

#[path = "../common/mod.rs"]
mod common;

mod concurrency;
mod iterator;
mod properties;
mod reopen;
mod scenario;
mod splits;
