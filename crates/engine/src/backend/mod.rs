//! Storage backends for the state system
//!
//! A backend stores closed intervals and answers point queries over them.
//! The state system keeps ongoing intervals itself and hands each one to
//! the backend once it is closed.
//!
//! - [`HistoryTreeBackend`]: disk-backed history tree
//! - [`InMemoryBackend`]: sorted vector, for tests and short traces

mod history_tree;
mod in_memory;

pub use history_tree::HistoryTreeBackend;
pub use in_memory::InMemoryBackend;

use statehist_core::{CancelToken, Quark, QuarkSet, Result, StateInterval, TimeCondition, Timestamp};

/// Closed-interval storage behind a state system.
///
/// Inserts come from the single builder thread; queries may come from any
/// number of threads at the same time.
pub trait StateHistoryBackend: Send + Sync + std::fmt::Debug {
    /// Earliest timestamp the backend accepts.
    fn start_time(&self) -> Timestamp;

    /// Latest interval end stored, or the close time once finished.
    fn end_time(&self) -> Timestamp;

    /// Store a closed interval.
    fn insert_past_state(&self, interval: StateInterval) -> Result<()>;

    /// Seal the backend at `end_time`. No inserts are accepted afterwards.
    fn finished_building(&self, end_time: Timestamp) -> Result<()>;

    /// Check if [`StateHistoryBackend::finished_building`] ran.
    fn is_finished(&self) -> bool;

    /// Interval of `quark` containing `t`, if stored.
    fn query_single(
        &self,
        t: Timestamp,
        quark: Quark,
        cancel: &CancelToken,
    ) -> Result<Option<StateInterval>>;

    /// Fill every empty `out[q]` with the stored interval of quark `q`
    /// containing `t`. Filled slots are left alone.
    fn query_full(
        &self,
        t: Timestamp,
        out: &mut [Option<StateInterval>],
        cancel: &CancelToken,
    ) -> Result<()>;

    /// Every stored interval of a quark in `quarks` meeting `times`, in
    /// no particular order.
    fn query_2d(
        &self,
        quarks: &QuarkSet,
        times: &TimeCondition,
        cancel: &CancelToken,
    ) -> Result<Vec<StateInterval>>;

    /// Persist the encoded attribute tree next to the history.
    fn store_attribute_tree(&self, _bytes: &[u8]) -> Result<()> {
        Ok(())
    }

    /// Attribute tree stored by an earlier run, if any.
    fn load_attribute_tree(&self) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }

    /// Release resources. Later calls fail with `Disposed`.
    fn dispose(&self);
}
