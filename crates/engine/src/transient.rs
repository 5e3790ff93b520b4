//! Ongoing state
//!
//! For every attribute, the value in effect since its last change and the
//! time of that change. A change closes the ongoing interval at `t - 1`,
//! hands it to the backend, and opens a new one at `t`.
//!
//! New attributes start as `Null` from the backend start time, so every
//! attribute's history covers the whole trace with no gaps.

use crate::backend::StateHistoryBackend;
use statehist_core::{
    Error, Quark, QuarkSet, Result, StateInterval, StateValue, TimeCondition, Timestamp,
    ValueKind,
};

#[derive(Debug, Clone)]
struct OngoingState {
    value: StateValue,
    start: Timestamp,
    /// First non-null kind written; later non-null writes must match
    kind: Option<ValueKind>,
}

/// Ongoing intervals of every attribute.
#[derive(Debug)]
pub struct TransientState {
    entries: Vec<OngoingState>,
    backend_start: Timestamp,
    latest_time: Timestamp,
    active: bool,
}

impl TransientState {
    /// Empty state for a backend starting at `backend_start`.
    pub fn new(backend_start: Timestamp) -> Self {
        Self {
            entries: Vec::new(),
            backend_start,
            latest_time: backend_start,
            active: true,
        }
    }

    /// State of a history that is already complete.
    pub fn inactive(backend_start: Timestamp, end: Timestamp) -> Self {
        Self {
            entries: Vec::new(),
            backend_start,
            latest_time: end,
            active: false,
        }
    }

    /// Check if changes are still accepted.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Latest time a change was recorded at.
    pub fn latest_time(&self) -> Timestamp {
        self.latest_time
    }

    /// Grow to `count` attributes; new ones start as `Null`.
    pub fn ensure_entries(&mut self, count: usize) {
        let start = self.backend_start;
        while self.entries.len() < count {
            self.entries.push(OngoingState {
                value: StateValue::Null,
                start,
                kind: None,
            });
        }
    }

    fn entry(&self, quark: Quark) -> Result<&OngoingState> {
        if !self.active {
            return Err(Error::Closed);
        }
        self.entries
            .get(quark.index())
            .ok_or_else(|| Error::AttributeNotFound(format!("quark {}", quark)))
    }

    /// Value in effect for `quark`.
    pub fn ongoing_value(&self, quark: Quark) -> Result<StateValue> {
        Ok(self.entry(quark)?.value.clone())
    }

    /// Time the ongoing value of `quark` took effect.
    pub fn ongoing_start(&self, quark: Quark) -> Result<Timestamp> {
        Ok(self.entry(quark)?.start)
    }

    /// Kind every non-null value of `quark` must have, once known.
    pub fn value_kind(&self, quark: Quark) -> Result<Option<ValueKind>> {
        Ok(self.entry(quark)?.kind)
    }

    fn check_kind(entry: &OngoingState, value: &StateValue) -> Result<()> {
        match entry.kind {
            Some(kind) if !value.is_null() && value.kind() != kind => {
                Err(Error::value_type(kind.name(), value.type_name()))
            }
            _ => Ok(()),
        }
    }

    fn record_kind(&mut self, quark: Quark, value: &StateValue) {
        let entry = &mut self.entries[quark.index()];
        if entry.kind.is_none() && !value.is_null() {
            entry.kind = Some(value.kind());
        }
    }

    /// Replace the ongoing value without closing the ongoing interval.
    pub fn change_ongoing_value(&mut self, quark: Quark, value: StateValue) -> Result<()> {
        Self::check_kind(self.entry(quark)?, &value)?;
        self.record_kind(quark, &value);
        self.entries[quark.index()].value = value;
        Ok(())
    }

    /// Ongoing interval of `quark` if it covers `t`, ending at the latest
    /// recorded time.
    pub fn interval_at(&self, t: Timestamp, quark: Quark) -> Option<StateInterval> {
        if !self.active {
            return None;
        }
        let entry = self.entries.get(quark.index())?;
        if t < entry.start {
            return None;
        }
        let end = self.latest_time.max(entry.start);
        StateInterval::new(entry.start, end, quark, entry.value.clone()).ok()
    }

    /// Ongoing intervals of the quarks in `quarks` in effect at some instant
    /// of `times`, in quark order.
    pub fn query_2d(&self, quarks: &QuarkSet, times: &TimeCondition) -> Vec<StateInterval> {
        if !self.active {
            return Vec::new();
        }
        quarks
            .iter()
            .filter_map(|quark| {
                let entry = self.entries.get(quark.index())?;
                if !times.intersects(entry.start, Timestamp::MAX) {
                    return None;
                }
                let end = self.latest_time.max(entry.start);
                StateInterval::new(entry.start, end, quark, entry.value.clone()).ok()
            })
            .collect()
    }

    /// Record `value` for `quark` from `t` on.
    ///
    /// Fails with `TimeRange` when `t` precedes the ongoing start. Writing
    /// the ongoing value again extends the ongoing interval. A change at
    /// exactly the ongoing start replaces the value without emitting an
    /// empty interval. State is untouched on failure.
    pub fn process_state_change(
        &mut self,
        t: Timestamp,
        value: StateValue,
        quark: Quark,
        backend: &dyn StateHistoryBackend,
    ) -> Result<()> {
        let entry = self.entry(quark)?;
        if t < entry.start {
            return Err(Error::TimeRange(format!(
                "change at {} precedes ongoing start {} of {}",
                t, entry.start, quark
            )));
        }
        Self::check_kind(entry, &value)?;

        if entry.value != value {
            if entry.start < t {
                let closed = StateInterval::new(entry.start, t - 1, quark, entry.value.clone())?;
                backend.insert_past_state(closed)?;
            }
            self.record_kind(quark, &value);
            let entry = &mut self.entries[quark.index()];
            entry.start = t;
            entry.value = value;
        }
        self.latest_time = self.latest_time.max(t);
        Ok(())
    }

    /// Close every ongoing interval at `end` and stop accepting changes.
    ///
    /// Intervals opened after `end` are dropped.
    pub fn close(&mut self, end: Timestamp, backend: &dyn StateHistoryBackend) -> Result<()> {
        if !self.active {
            return Err(Error::Closed);
        }
        for (index, entry) in self.entries.iter().enumerate() {
            if entry.start <= end {
                let quark = Quark::new(index as u32);
                let closed = StateInterval::new(entry.start, end, quark, entry.value.clone())?;
                backend.insert_past_state(closed)?;
            }
        }
        self.deactivate(end);
        Ok(())
    }

    /// Stop accepting changes and drop ongoing state.
    pub fn deactivate(&mut self, end: Timestamp) {
        self.active = false;
        self.entries.clear();
        self.latest_time = self.latest_time.max(end);
    }
}
