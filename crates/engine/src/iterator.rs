//! Reversible cursor over one attribute's intervals
//!
//! Forward steps query at the first sample point `init + k * resolution`
//! after the current interval; backward steps at the last sample point
//! before it. With a resolution of 1 every interval is visited. The end
//! bound is re-read on every step, so a cursor over a state system that is
//! still building picks up intervals added since it was created. An
//! ongoing interval is returned once: if it has only grown by the next
//! forward step, the cursor moves past it.

use crate::state_system::StateSystem;
use statehist_core::{CancelToken, Error, Quark, Result, StateInterval, Timestamp};
use std::sync::Arc;

/// Cursor over the intervals of one attribute.
#[derive(Debug)]
pub struct QuarkIterator {
    ss: Arc<StateSystem>,
    quark: Quark,
    init: Timestamp,
    end: Timestamp,
    resolution: i64,
    current: Option<StateInterval>,
    cancel: CancelToken,
    failed: bool,
}

impl QuarkIterator {
    /// Cursor starting at `init` with no end bound.
    pub fn new(ss: Arc<StateSystem>, quark: Quark, init: Timestamp) -> Self {
        Self {
            ss,
            quark,
            init,
            end: Timestamp::MAX,
            resolution: 1,
            current: None,
            cancel: CancelToken::new(),
            failed: false,
        }
    }

    /// Cursor over `[init, end]` visiting one interval per sample point.
    pub fn with_range(
        ss: Arc<StateSystem>,
        quark: Quark,
        init: Timestamp,
        end: Timestamp,
        resolution: i64,
    ) -> Result<Self> {
        if resolution < 1 {
            return Err(Error::InvalidConfig(format!(
                "resolution must be positive, got {}",
                resolution
            )));
        }
        if end < init {
            return Err(Error::TimeRange(format!(
                "iterator end {} precedes start {}",
                end, init
            )));
        }
        Ok(Self {
            end,
            resolution,
            ..Self::new(ss, quark, init)
        })
    }

    /// Use `cancel` for every query this cursor makes.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Interval returned by the last step.
    pub fn current(&self) -> Option<&StateInterval> {
        self.current.as_ref()
    }

    fn upper_bound(&self) -> Timestamp {
        self.end.min(self.ss.current_end_time())
    }

    fn next_point(&self) -> Timestamp {
        let first = self.init.max(self.ss.start_time());
        match &self.current {
            None => first,
            Some(current) if self.resolution == 1 => current.end().saturating_add(1),
            Some(current) => {
                let x = current.end();
                if x < self.init {
                    first
                } else {
                    self.sample(x, 1)
                }
            }
        }
    }

    fn previous_point(&self) -> Option<Timestamp> {
        let x = match &self.current {
            Some(current) => current.start().checked_sub(1)?,
            None => self.init.checked_sub(1)?.min(self.ss.current_end_time()),
        };
        if x < self.ss.start_time() {
            return None;
        }
        if self.resolution == 1 {
            return Some(x);
        }
        if x < self.init {
            return None;
        }
        Some(self.sample(x, 0))
    }

    /// Sample point `skip` steps after the last one at or before `x`.
    /// Requires `x >= init`.
    fn sample(&self, x: Timestamp, skip: i128) -> Timestamp {
        let init = self.init as i128;
        let res = self.resolution as i128;
        let point = init + ((x as i128 - init) / res + skip) * res;
        point.min(Timestamp::MAX as i128) as Timestamp
    }

    /// Check if a forward step would return an interval.
    ///
    /// While the history is building this can be true when the only thing
    /// left is the growth of the current ongoing interval.
    pub fn has_next(&self) -> bool {
        !self.failed && self.next_point() <= self.upper_bound()
    }

    /// Step forward.
    pub fn next_interval(&mut self) -> Result<Option<StateInterval>> {
        loop {
            if !self.has_next() {
                return Ok(None);
            }
            let t = self.next_point();
            let seen_start = self.current.as_ref().map(StateInterval::start);
            let interval = self.step(t)?;
            // same start: the ongoing interval already returned, extended
            if seen_start != Some(interval.start()) {
                return Ok(Some(interval));
            }
        }
    }

    /// Check if a backward step would return an interval.
    pub fn has_previous(&self) -> bool {
        !self.failed && self.previous_point().is_some()
    }

    /// Step backward.
    pub fn previous_interval(&mut self) -> Result<Option<StateInterval>> {
        if self.failed {
            return Ok(None);
        }
        match self.previous_point() {
            Some(t) => self.step(t).map(Some),
            None => Ok(None),
        }
    }

    fn step(&mut self, t: Timestamp) -> Result<StateInterval> {
        match self.ss.query_single_state_with(t, self.quark, &self.cancel) {
            Ok(interval) => {
                self.current = Some(interval.clone());
                Ok(interval)
            }
            Err(e) => {
                self.failed = true;
                Err(e)
            }
        }
    }
}

impl Iterator for QuarkIterator {
    type Item = Result<StateInterval>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_interval().transpose()
    }
}

impl StateSystem {
    /// Cursor over `quark` within `[init, end]`, sampled every `resolution`.
    pub fn iter_quark_range(
        self: &Arc<Self>,
        quark: Quark,
        init: Timestamp,
        end: Timestamp,
        resolution: i64,
    ) -> Result<QuarkIterator> {
        QuarkIterator::with_range(Arc::clone(self), quark, init, end, resolution)
    }
}
