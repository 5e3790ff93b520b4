//! History tree backend

use super::StateHistoryBackend;
use statehist_core::{
    CancelToken, Error, Quark, QuarkSet, Result, StateInterval, TimeCondition, Timestamp,
};
use statehist_storage::{HistoryTree, HtConfig};
use std::path::Path;

/// Backend storing intervals in a [`HistoryTree`] file.
#[derive(Debug)]
pub struct HistoryTreeBackend {
    tree: HistoryTree,
}

impl HistoryTreeBackend {
    /// Create a new tree file for building.
    pub fn create(config: HtConfig) -> Result<Self> {
        Ok(Self {
            tree: HistoryTree::create(config)?,
        })
    }

    /// Reopen a finished tree file for querying.
    pub fn open(path: impl AsRef<Path>, provider_version: u32) -> Result<Self> {
        Ok(Self {
            tree: HistoryTree::open(path, provider_version)?,
        })
    }

    /// Underlying tree, for diagnostics.
    pub fn tree(&self) -> &HistoryTree {
        &self.tree
    }

    fn check_time(&self, t: Timestamp) -> Result<()> {
        let start = self.tree.start_time();
        if t < start {
            return Err(Error::TimeRange(format!(
                "time {} precedes history start {}",
                t, start
            )));
        }
        Ok(())
    }
}

impl StateHistoryBackend for HistoryTreeBackend {
    fn start_time(&self) -> Timestamp {
        self.tree.start_time()
    }

    fn end_time(&self) -> Timestamp {
        self.tree.end_time()
    }

    fn insert_past_state(&self, interval: StateInterval) -> Result<()> {
        self.tree.insert(interval)
    }

    fn finished_building(&self, end_time: Timestamp) -> Result<()> {
        self.tree.close_tree(end_time)
    }

    fn is_finished(&self) -> bool {
        self.tree.is_finished()
    }

    fn query_single(
        &self,
        t: Timestamp,
        quark: Quark,
        cancel: &CancelToken,
    ) -> Result<Option<StateInterval>> {
        self.check_time(t)?;
        self.tree.query_single(t, quark, cancel)
    }

    fn query_full(
        &self,
        t: Timestamp,
        out: &mut [Option<StateInterval>],
        cancel: &CancelToken,
    ) -> Result<()> {
        self.check_time(t)?;
        self.tree.query_full(t, out, cancel)
    }

    fn query_2d(
        &self,
        quarks: &QuarkSet,
        times: &TimeCondition,
        cancel: &CancelToken,
    ) -> Result<Vec<StateInterval>> {
        self.check_time(times.min())?;
        self.tree.query_2d(quarks, times, cancel)
    }

    fn store_attribute_tree(&self, bytes: &[u8]) -> Result<()> {
        self.tree.write_attribute_section(bytes)
    }

    fn load_attribute_tree(&self) -> Result<Option<Vec<u8>>> {
        // a finished file always carries one; its absence means the close
        // stopped after the header was written
        match self.tree.read_attribute_section()? {
            Some(bytes) => Ok(Some(bytes)),
            None if self.tree.is_finished() => Err(Error::Corruption(
                "history file has no attribute section".into(),
            )),
            None => Ok(None),
        }
    }

    fn dispose(&self) {
        self.tree.dispose();
    }
}
