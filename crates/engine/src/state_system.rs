//! State system: the query side
//!
//! A `StateSystem` answers "what was the value of this attribute at time
//! `t`" over a backend, while a [`StateSystemBuilder`] may still be writing
//! to it. Queries consult the ongoing state first, then the backend:
//! an ongoing interval moves to the backend before its successor becomes
//! visible, so a reader that does not find `t` in the ongoing state always
//! finds it in the backend.
//!
//! Every attribute has a value at every instant of `[start, end]`. When
//! nothing was recorded, queries return a synthetic `Null` interval.
//!
//! [`StateSystemBuilder`]: crate::StateSystemBuilder

use crate::attribute_tree::AttributeTree;
use crate::backend::StateHistoryBackend;
use crate::iterator::QuarkIterator;
use crate::transient::TransientState;
use parking_lot::{Condvar, Mutex, RwLock};
use statehist_core::{
    CancelToken, Error, Quark, QuarkSet, Result, StateInterval, StateValue, TimeCondition,
    Timestamp,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Queryable state history.
#[derive(Debug)]
pub struct StateSystem {
    pub(crate) attributes: RwLock<AttributeTree>,
    pub(crate) transient: RwLock<TransientState>,
    pub(crate) backend: Box<dyn StateHistoryBackend>,
    disposed: AtomicBool,
    built: Mutex<bool>,
    built_cond: Condvar,
    build_failure: Mutex<Option<String>>,
}

impl StateSystem {
    // ========================================================================
    // Construction
    // ========================================================================

    pub(crate) fn building(backend: Box<dyn StateHistoryBackend>) -> Self {
        let start = backend.start_time();
        Self {
            attributes: RwLock::new(AttributeTree::new()),
            transient: RwLock::new(TransientState::new(start)),
            backend,
            disposed: AtomicBool::new(false),
            built: Mutex::new(false),
            built_cond: Condvar::new(),
            build_failure: Mutex::new(None),
        }
    }

    /// Wrap a finished backend, restoring the attribute tree it stored.
    pub fn open_existing(backend: Box<dyn StateHistoryBackend>) -> Result<Arc<Self>> {
        if !backend.is_finished() {
            return Err(Error::Internal(
                "cannot open a backend that is still building".into(),
            ));
        }
        let attributes = match backend.load_attribute_tree()? {
            Some(bytes) => AttributeTree::deserialize(&bytes)?,
            None => AttributeTree::new(),
        };
        info!(
            attributes = attributes.len(),
            start = backend.start_time(),
            end = backend.end_time(),
            "opened state system"
        );
        let transient = TransientState::inactive(backend.start_time(), backend.end_time());
        Ok(Arc::new(Self {
            attributes: RwLock::new(attributes),
            transient: RwLock::new(transient),
            backend,
            disposed: AtomicBool::new(false),
            built: Mutex::new(true),
            built_cond: Condvar::new(),
            build_failure: Mutex::new(None),
        }))
    }

    pub(crate) fn check_live(&self) -> Result<()> {
        if self.disposed.load(Ordering::Acquire) {
            Err(Error::Disposed)
        } else {
            Ok(())
        }
    }

    pub(crate) fn check_quark(&self, quark: Quark) -> Result<()> {
        if quark.index() < self.attributes.read().len() {
            Ok(())
        } else {
            Err(Error::AttributeNotFound(format!("quark {}", quark)))
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Earliest queryable time.
    pub fn start_time(&self) -> Timestamp {
        self.backend.start_time()
    }

    /// Latest queryable time: the backend end, or the latest ongoing change
    /// while building.
    pub fn current_end_time(&self) -> Timestamp {
        let transient = self.transient.read();
        if transient.is_active() {
            self.backend.end_time().max(transient.latest_time())
        } else {
            self.backend.end_time()
        }
    }

    /// Number of attributes.
    pub fn nb_attributes(&self) -> usize {
        self.attributes.read().len()
    }

    /// Check if the history is complete.
    pub fn is_built(&self) -> bool {
        *self.built.lock()
    }

    /// Check if [`StateSystem::dispose`] ran.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Block until the builder closes the history.
    ///
    /// Returns `BuildFailed` if closing the history failed, and `Disposed`
    /// if the state system is disposed instead.
    pub fn wait_until_built(&self) -> Result<()> {
        let mut built = self.built.lock();
        while !*built {
            self.built_cond.wait(&mut built);
        }
        drop(built);
        if let Some(cause) = self.build_failure.lock().clone() {
            return Err(Error::BuildFailed(cause));
        }
        self.check_live()
    }

    /// Like [`StateSystem::wait_until_built`], giving up after `timeout`.
    /// Returns whether the history is complete.
    pub fn wait_until_built_timeout(&self, timeout: Duration) -> bool {
        let mut built = self.built.lock();
        if !*built {
            self.built_cond.wait_for(&mut built, timeout);
        }
        *built && !self.is_disposed()
    }

    pub(crate) fn mark_built(&self) {
        *self.built.lock() = true;
        self.built_cond.notify_all();
    }

    /// Record why closing the history failed, then dispose.
    pub(crate) fn fail_build(&self, cause: &Error) {
        warn!(error = %cause, "closing the history failed");
        *self.build_failure.lock() = Some(cause.to_string());
        self.dispose();
    }

    /// Release the backend. In-flight and later queries fail with
    /// `Disposed`; threads blocked in `wait_until_built` wake up.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let end = self.current_end_time();
        self.transient.write().deactivate(end);
        self.backend.dispose();
        self.mark_built();
        debug!("disposed state system");
    }

    // ========================================================================
    // Attribute lookup
    // ========================================================================

    /// Quark of a top-level path.
    pub fn get_quark_absolute(&self, path: &[&str]) -> Result<Quark> {
        self.opt_quark_absolute(path)
            .ok_or_else(|| Error::AttributeNotFound(path.join("/")))
    }

    /// Quark of `path` below `parent`.
    pub fn get_quark_relative(&self, parent: Quark, path: &[&str]) -> Result<Quark> {
        self.opt_quark_relative(parent, path).ok_or_else(|| {
            Error::AttributeNotFound(format!("{}/{}", parent, path.join("/")))
        })
    }

    /// Quark of a top-level path, `None` if it does not exist.
    pub fn opt_quark_absolute(&self, path: &[&str]) -> Option<Quark> {
        self.attributes.read().get_quark(None, path)
    }

    /// Quark of `path` below `parent`, `None` if it does not exist.
    pub fn opt_quark_relative(&self, parent: Quark, path: &[&str]) -> Option<Quark> {
        self.attributes.read().get_quark(Some(parent), path)
    }

    /// Quarks matching a path pattern; `*` segments match any child and
    /// `..` segments move to the parent.
    pub fn get_quarks(&self, pattern: &[&str]) -> Vec<Quark> {
        self.attributes.read().find_quarks(None, pattern)
    }

    /// Quarks matching a pattern below `parent`.
    pub fn get_quarks_relative(&self, parent: Quark, pattern: &[&str]) -> Vec<Quark> {
        self.attributes.read().find_quarks(Some(parent), pattern)
    }

    /// Children of `quark`, or every descendant with `recursive`.
    pub fn get_sub_attributes(&self, quark: Quark, recursive: bool) -> Result<Vec<Quark>> {
        self.attributes.read().sub_attributes(Some(quark), recursive)
    }

    /// Children (or descendants) of `quark` whose name `matches` accepts.
    pub fn get_sub_attributes_matching(
        &self,
        quark: Quark,
        recursive: bool,
        matches: impl Fn(&str) -> bool,
    ) -> Result<Vec<Quark>> {
        self.attributes
            .read()
            .sub_attributes_matching(Some(quark), recursive, matches)
    }

    /// Parent of `quark`, `None` for top-level attributes.
    pub fn get_parent_attribute_quark(&self, quark: Quark) -> Result<Option<Quark>> {
        self.attributes.read().parent(quark)
    }

    /// Last path segment of `quark`.
    pub fn get_attribute_name(&self, quark: Quark) -> Result<String> {
        self.attributes.read().name(quark).map(str::to_owned)
    }

    /// Path of `quark` joined with `/`.
    pub fn get_full_attribute_path(&self, quark: Quark) -> Result<String> {
        self.attributes.read().full_path(quark)
    }

    /// Path segments of `quark`.
    pub fn get_full_attribute_path_array(&self, quark: Quark) -> Result<Vec<String>> {
        self.attributes.read().path_of(quark)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    fn check_time(&self, t: Timestamp) -> Result<Timestamp> {
        let start = self.start_time();
        let end = self.current_end_time();
        if t < start || t > end {
            return Err(Error::TimeRange(format!(
                "time {} outside [{}, {}]",
                t, start, end
            )));
        }
        Ok(end)
    }

    fn null_interval(t: Timestamp, end: Timestamp, quark: Quark) -> Result<StateInterval> {
        StateInterval::new(t, end.max(t), quark, StateValue::Null)
    }

    /// Interval of `quark` containing `t`.
    pub fn query_single_state(&self, t: Timestamp, quark: Quark) -> Result<StateInterval> {
        self.query_single_state_with(t, quark, &CancelToken::new())
    }

    /// [`StateSystem::query_single_state`] with a cancellation token.
    pub fn query_single_state_with(
        &self,
        t: Timestamp,
        quark: Quark,
        cancel: &CancelToken,
    ) -> Result<StateInterval> {
        self.settle(self.single_state(t, quark, cancel))
    }

    fn single_state(
        &self,
        t: Timestamp,
        quark: Quark,
        cancel: &CancelToken,
    ) -> Result<StateInterval> {
        self.check_live()?;
        cancel.check()?;
        self.check_quark(quark)?;
        let end = self.check_time(t)?;
        if let Some(ongoing) = self.transient.read().interval_at(t, quark) {
            return Ok(ongoing);
        }
        match self.backend.query_single(t, quark, cancel)? {
            Some(interval) => Ok(interval),
            None => Self::null_interval(t, end, quark),
        }
    }

    /// Results computed while `dispose` ran are not trusted.
    fn settle<T>(&self, result: Result<T>) -> Result<T> {
        if self.is_disposed() {
            return Err(Error::Disposed);
        }
        result
    }

    /// Interval of every attribute at `t`, indexed by quark.
    pub fn query_full_state(&self, t: Timestamp) -> Result<Vec<StateInterval>> {
        self.query_full_state_with(t, &CancelToken::new())
    }

    /// [`StateSystem::query_full_state`] with a cancellation token.
    pub fn query_full_state_with(
        &self,
        t: Timestamp,
        cancel: &CancelToken,
    ) -> Result<Vec<StateInterval>> {
        self.settle(self.full_state(t, cancel))
    }

    fn full_state(&self, t: Timestamp, cancel: &CancelToken) -> Result<Vec<StateInterval>> {
        self.check_live()?;
        let end = self.check_time(t)?;
        let count = self.nb_attributes();
        let mut slots: Vec<Option<StateInterval>> = {
            let transient = self.transient.read();
            (0..count)
                .map(|i| transient.interval_at(t, Quark::new(i as u32)))
                .collect()
        };
        self.backend.query_full(t, &mut slots, cancel)?;
        slots
            .into_iter()
            .enumerate()
            .map(|(i, slot)| match slot {
                Some(interval) => Ok(interval),
                None => Self::null_interval(t, end, Quark::new(i as u32)),
            })
            .collect()
    }

    /// Consecutive intervals of `quark` covering `[t1, t2]`, clamped to the
    /// history's range.
    pub fn query_history_range(
        &self,
        quark: Quark,
        t1: Timestamp,
        t2: Timestamp,
    ) -> Result<Vec<StateInterval>> {
        self.query_history_range_sampled(quark, t1, t2, 1, &CancelToken::new())
    }

    /// Intervals of `quark` at sample points `t1 + k * resolution` within
    /// `[t1, t2]`, plus the interval containing `t2`. Each interval is
    /// returned once even if it spans several sample points.
    pub fn query_history_range_sampled(
        &self,
        quark: Quark,
        t1: Timestamp,
        t2: Timestamp,
        resolution: i64,
        cancel: &CancelToken,
    ) -> Result<Vec<StateInterval>> {
        if t2 < t1 {
            return Err(Error::TimeRange(format!(
                "range end {} precedes start {}",
                t2, t1
            )));
        }
        if resolution < 1 {
            return Err(Error::InvalidConfig(format!(
                "resolution must be positive, got {}",
                resolution
            )));
        }
        self.check_live()?;
        self.check_quark(quark)?;
        let first = t1.max(self.start_time());
        let last = t2.min(self.current_end_time());

        let mut out = Vec::new();
        let mut t = first;
        while t <= last {
            cancel.check()?;
            let interval = self.query_single_state_with(t, quark, cancel)?;
            let end = interval.end();
            out.push(interval);
            if end >= last {
                break;
            }
            let next_sample = first + ((end - first) / resolution + 1) * resolution;
            t = next_sample.min(last);
        }
        Ok(out)
    }

    /// Every interval of the given quarks meeting `[t1, t2]`, sorted by
    /// quark then start.
    pub fn query_2d(
        &self,
        quarks: &[Quark],
        t1: Timestamp,
        t2: Timestamp,
    ) -> Result<Vec<StateInterval>> {
        let times = TimeCondition::range(t1, t2)?;
        self.query_2d_with(&QuarkSet::new(quarks.iter().copied()), &times, &CancelToken::new())
    }

    /// Every interval of the given quarks containing one of `times`, sorted
    /// by quark then start.
    pub fn query_2d_at(
        &self,
        quarks: &[Quark],
        times: &[Timestamp],
    ) -> Result<Vec<StateInterval>> {
        match TimeCondition::points(times.iter().copied()) {
            Some(times) => self.query_2d_with(
                &QuarkSet::new(quarks.iter().copied()),
                &times,
                &CancelToken::new(),
            ),
            None => Ok(Vec::new()),
        }
    }

    /// Two-dimensional query with a cancellation token.
    ///
    /// The backend walks each tree node at most once for the whole query.
    /// While building, ongoing intervals are merged in; an interval moved
    /// to the backend meanwhile is returned once, in its closed form.
    pub fn query_2d_with(
        &self,
        quarks: &QuarkSet,
        times: &TimeCondition,
        cancel: &CancelToken,
    ) -> Result<Vec<StateInterval>> {
        self.settle(self.two_d(quarks, times, cancel))
    }

    fn two_d(
        &self,
        quarks: &QuarkSet,
        times: &TimeCondition,
        cancel: &CancelToken,
    ) -> Result<Vec<StateInterval>> {
        self.check_live()?;
        cancel.check()?;
        let Some(max) = quarks.max() else {
            return Ok(Vec::new());
        };
        self.check_quark(max)?;
        let start = self.start_time();
        if times.min() < start {
            return Err(Error::TimeRange(format!(
                "time {} precedes history start {}",
                times.min(),
                start
            )));
        }

        // ongoing first: an interval closed after this read is then found
        // in the backend
        let ongoing = self.transient.read().query_2d(quarks, times);
        let stored = self.backend.query_2d(quarks, times, cancel)?;
        let mut tagged: Vec<(StateInterval, bool)> = stored
            .into_iter()
            .map(|iv| (iv, false))
            .chain(ongoing.into_iter().map(|iv| (iv, true)))
            .collect();
        tagged.sort_by_key(|(iv, from_ongoing)| (iv.quark(), iv.start(), *from_ongoing));
        tagged.dedup_by(|b, a| a.0.quark() == b.0.quark() && a.0.start() == b.0.start());
        debug!(quarks = quarks.len(), found = tagged.len(), "2d query");
        Ok(tagged.into_iter().map(|(iv, _)| iv).collect())
    }

    /// Top element of the stack attribute `stack` at `t`, `None` if empty.
    pub fn query_single_stack_top(
        &self,
        t: Timestamp,
        stack: Quark,
    ) -> Result<Option<StateInterval>> {
        let depth = match self.query_single_state(t, stack)?.into_value() {
            StateValue::Null => return Ok(None),
            StateValue::Int(depth) if depth <= 0 => return Ok(None),
            StateValue::Int(depth) => depth,
            other => return Err(Error::value_type("Int", other.type_name())),
        };
        let top = self.get_quark_relative(stack, &[&depth.to_string()])?;
        self.query_single_state(t, top).map(Some)
    }

    /// Cursor over the intervals of `quark`, starting at `from`.
    pub fn iter_quark(self: &Arc<Self>, quark: Quark, from: Timestamp) -> QuarkIterator {
        QuarkIterator::new(Arc::clone(self), quark, from)
    }
}
