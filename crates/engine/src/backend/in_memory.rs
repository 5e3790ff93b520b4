//! In-memory backend
//!
//! Intervals live in one vector sorted by end time. A point query
//! binary-searches to the first interval ending at or after `t` and scans
//! forward, the same lookup a history tree node does.

use super::StateHistoryBackend;
use parking_lot::RwLock;
use statehist_core::{
    CancelToken, Error, Quark, QuarkSet, Result, StateInterval, TimeCondition, Timestamp,
};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

/// Backend keeping every interval in memory. Nothing survives a drop.
#[derive(Debug)]
pub struct InMemoryBackend {
    start: Timestamp,
    intervals: RwLock<Vec<StateInterval>>,
    end: AtomicI64,
    finished: AtomicBool,
    disposed: AtomicBool,
}

impl InMemoryBackend {
    /// Create an empty backend starting at `start`.
    pub fn new(start: Timestamp) -> Self {
        Self {
            start,
            intervals: RwLock::new(Vec::new()),
            end: AtomicI64::new(start),
            finished: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        }
    }

    /// Number of stored intervals.
    pub fn len(&self) -> usize {
        self.intervals.read().len()
    }

    /// Check if nothing was stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_query(&self, t: Timestamp, cancel: &CancelToken) -> Result<()> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(Error::Disposed);
        }
        cancel.check()?;
        if t < self.start {
            return Err(Error::TimeRange(format!(
                "time {} precedes history start {}",
                t, self.start
            )));
        }
        Ok(())
    }
}

impl StateHistoryBackend for InMemoryBackend {
    fn start_time(&self) -> Timestamp {
        self.start
    }

    fn end_time(&self) -> Timestamp {
        self.end.load(Ordering::Acquire)
    }

    fn insert_past_state(&self, interval: StateInterval) -> Result<()> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(Error::Disposed);
        }
        if self.finished.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        if interval.start() < self.start {
            return Err(Error::TimeRange(format!(
                "interval {} starts before history start {}",
                interval, self.start
            )));
        }
        let end = interval.end();
        let mut intervals = self.intervals.write();
        let pos = intervals.partition_point(|iv| iv.end() <= end);
        intervals.insert(pos, interval);
        self.end.fetch_max(end, Ordering::AcqRel);
        Ok(())
    }

    fn finished_building(&self, end_time: Timestamp) -> Result<()> {
        if self.finished.swap(true, Ordering::AcqRel) {
            return Err(Error::Closed);
        }
        self.end.fetch_max(end_time, Ordering::AcqRel);
        Ok(())
    }

    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    fn query_single(
        &self,
        t: Timestamp,
        quark: Quark,
        cancel: &CancelToken,
    ) -> Result<Option<StateInterval>> {
        let intervals = self.intervals.read();
        self.check_query(t, cancel)?;
        let first = intervals.partition_point(|iv| iv.end() < t);
        Ok(intervals[first..]
            .iter()
            .find(|iv| iv.quark() == quark && iv.start() <= t)
            .cloned())
    }

    fn query_full(
        &self,
        t: Timestamp,
        out: &mut [Option<StateInterval>],
        cancel: &CancelToken,
    ) -> Result<()> {
        let intervals = self.intervals.read();
        self.check_query(t, cancel)?;
        let first = intervals.partition_point(|iv| iv.end() < t);
        for iv in intervals[first..].iter().filter(|iv| iv.start() <= t) {
            if let Some(slot) = out.get_mut(iv.quark().index()) {
                if slot.is_none() {
                    *slot = Some(iv.clone());
                }
            }
        }
        Ok(())
    }

    fn query_2d(
        &self,
        quarks: &QuarkSet,
        times: &TimeCondition,
        cancel: &CancelToken,
    ) -> Result<Vec<StateInterval>> {
        let intervals = self.intervals.read();
        self.check_query(times.min(), cancel)?;
        let first = intervals.partition_point(|iv| iv.end() < times.min());
        Ok(intervals[first..]
            .iter()
            .filter(|iv| quarks.contains(iv.quark()))
            .filter(|iv| times.intersects(iv.start(), iv.end()))
            .cloned()
            .collect())
    }

    fn dispose(&self) {
        // flag first: a reader holding the lock either sees it or finishes
        // before the clear
        self.disposed.store(true, Ordering::Release);
        self.intervals.write().clear();
    }
}
