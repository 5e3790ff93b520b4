//! Entry point for building and reopening state histories.
//!
//! [`HistoryOptions`] collects the settings of a history file and hands
//! back either a [`StateSystemBuilder`] for a new history or a read-only
//! [`StateSystem`] over a finished one.

use serde::{Deserialize, Serialize};
use statehist_core::{Error, Result, Timestamp};
use statehist_engine::{
    HistoryTreeBackend, InMemoryBackend, StateSystem, StateSystemBuilder,
};
use statehist_storage::{HtConfig, DEFAULT_BLOCK_SIZE, DEFAULT_MAX_CHILDREN};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Settings for a state history.
///
/// # Example
///
/// ```ignore
/// use statehist::prelude::*;
///
/// // Build a new history file
/// let mut builder = HistoryOptions::new()
///     .path("./kernel.ht")
///     .provider_version(3)
///     .start_time(1_000)
///     .create()?;
/// let cpu = builder.get_quark_absolute_and_add(&["cpus", "0"])?;
/// builder.modify_attribute(1_200, "running", cpu)?;
/// builder.close_history(2_000)?;
///
/// // Later: query it without rebuilding
/// let ss = HistoryOptions::new()
///     .path("./kernel.ht")
///     .provider_version(3)
///     .open()?;
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryOptions {
    /// History file location. Not needed for in-memory histories.
    pub path: Option<PathBuf>,
    /// Node block size in bytes
    pub block_size: usize,
    /// Children per core node
    pub max_children: usize,
    /// Version of the analysis that produces the history
    pub provider_version: u32,
    /// Earliest timestamp of the history
    pub start_time: Timestamp,
}

impl HistoryOptions {
    /// Create options with default settings.
    pub fn new() -> Self {
        Self {
            path: None,
            block_size: DEFAULT_BLOCK_SIZE,
            max_children: DEFAULT_MAX_CHILDREN,
            provider_version: 0,
            start_time: 0,
        }
    }

    /// Set the history file path.
    pub fn path(mut self, path: impl AsRef<Path>) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Set the node block size.
    pub fn block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    /// Set the number of children per core node.
    pub fn max_children(mut self, max_children: usize) -> Self {
        self.max_children = max_children;
        self
    }

    /// Set the provider version. Reopening requires the same version.
    pub fn provider_version(mut self, version: u32) -> Self {
        self.provider_version = version;
        self
    }

    /// Set the history start time.
    pub fn start_time(mut self, start: Timestamp) -> Self {
        self.start_time = start;
        self
    }

    fn require_path(&self) -> Result<&Path> {
        self.path
            .as_deref()
            .ok_or_else(|| Error::InvalidConfig("history path not set".into()))
    }

    /// Tree configuration for these options.
    pub fn to_config(&self) -> Result<HtConfig> {
        let config = HtConfig::new(self.require_path()?, self.provider_version, self.start_time)
            .with_block_size(self.block_size)
            .with_max_children(self.max_children);
        config.validate()?;
        Ok(config)
    }

    /// Create a new history file, replacing any existing one.
    pub fn create(self) -> Result<StateSystemBuilder> {
        let config = self.to_config()?;
        let backend = HistoryTreeBackend::create(config)?;
        Ok(StateSystemBuilder::new(Box::new(backend)))
    }

    /// Open a finished history file for querying.
    pub fn open(self) -> Result<Arc<StateSystem>> {
        let path = self.require_path()?;
        let backend = HistoryTreeBackend::open(path, self.provider_version)?;
        StateSystem::open_existing(Box::new(backend))
    }

    /// Open the history file if it is usable, otherwise start building a new
    /// one in its place.
    ///
    /// A missing file, a header mismatch or a corrupt file all lead to a
    /// rebuild. Other I/O errors are returned.
    pub fn open_or_create(self) -> Result<Opened> {
        let path = self.require_path()?.to_path_buf();
        if path.exists() {
            match self.clone().open() {
                Ok(ss) => return Ok(Opened::Existing(ss)),
                Err(e) if e.requires_rebuild() => {
                    warn!(path = %path.display(), error = %e, "discarding unusable history");
                }
                Err(e) => return Err(e),
            }
        }
        info!(path = %path.display(), "building new history");
        self.create().map(Opened::Building)
    }

    /// Start a history that lives only in memory.
    pub fn in_memory(self) -> StateSystemBuilder {
        StateSystemBuilder::new(Box::new(InMemoryBackend::new(self.start_time)))
    }
}

impl Default for HistoryOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of [`HistoryOptions::open_or_create`].
#[derive(Debug)]
pub enum Opened {
    /// The file held a finished, compatible history
    Existing(Arc<StateSystem>),
    /// A new history must be built
    Building(StateSystemBuilder),
}

impl Opened {
    /// Read handle, whichever way the history was obtained.
    pub fn state_system(&self) -> Arc<StateSystem> {
        match self {
            Opened::Existing(ss) => Arc::clone(ss),
            Opened::Building(builder) => builder.state_system(),
        }
    }
}
