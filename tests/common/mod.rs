//! Shared helpers for the integration suites

#![allow(dead_code)]

use statehist::{HistoryOptions, StateSystemBuilder};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Provider version used by every file-backed test
pub const PROVIDER_VERSION: u32 = 7;

/// Smallest legal blocks and a narrow fan-out, so a few thousand intervals
/// already produce a tree several levels deep.
pub fn small_tree_options(path: impl AsRef<Path>) -> HistoryOptions {
    HistoryOptions::new()
        .path(path)
        .block_size(4096)
        .max_children(3)
        .provider_version(PROVIDER_VERSION)
}

/// Temp directory plus the history file path inside it
pub fn temp_history() -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("state.ht");
    (dir, path)
}

/// Builder over a small-block history file
pub fn create_file_builder(path: &Path) -> StateSystemBuilder {
    small_tree_options(path)
        .create()
        .expect("Failed to create history file")
}

/// Builder over an in-memory history starting at 0
pub fn create_memory_builder() -> StateSystemBuilder {
    HistoryOptions::new().in_memory()
}

/// Route tracing output to the test harness
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}
