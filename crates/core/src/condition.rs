//! Conditions for two-dimensional queries
//!
//! A 2D query returns every interval whose quark is in a [`QuarkSet`] and
//! whose time span meets a [`TimeCondition`]. Both conditions can prune
//! whole subtrees: a node is skipped when its time span meets no instant
//! the query asks about.

use crate::error::{Error, Result};
use crate::types::{Quark, Timestamp};

/// Instants a 2D query asks about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeCondition {
    /// Every instant of `[start, end]`
    Range {
        /// First instant
        start: Timestamp,
        /// Last instant
        end: Timestamp,
    },
    /// Only these instants, sorted and deduplicated
    Points(Vec<Timestamp>),
}

impl TimeCondition {
    /// Every instant of `[start, end]`.
    pub fn range(start: Timestamp, end: Timestamp) -> Result<Self> {
        if end < start {
            return Err(Error::TimeRange(format!(
                "range end {} precedes start {}",
                end, start
            )));
        }
        Ok(TimeCondition::Range { start, end })
    }

    /// The given instants, `None` when there are none.
    pub fn points(times: impl IntoIterator<Item = Timestamp>) -> Option<Self> {
        let mut times: Vec<Timestamp> = times.into_iter().collect();
        if times.is_empty() {
            return None;
        }
        times.sort_unstable();
        times.dedup();
        Some(TimeCondition::Points(times))
    }

    /// Earliest instant.
    pub fn min(&self) -> Timestamp {
        match self {
            TimeCondition::Range { start, .. } => *start,
            // never empty: `points` refuses empty input
            TimeCondition::Points(times) => times.first().copied().unwrap_or(Timestamp::MAX),
        }
    }

    /// Latest instant.
    pub fn max(&self) -> Timestamp {
        match self {
            TimeCondition::Range { end, .. } => *end,
            TimeCondition::Points(times) => times.last().copied().unwrap_or(Timestamp::MIN),
        }
    }

    /// Check if any instant falls in `[lo, hi]`.
    pub fn intersects(&self, lo: Timestamp, hi: Timestamp) -> bool {
        match self {
            TimeCondition::Range { start, end } => *start <= hi && lo <= *end,
            TimeCondition::Points(times) => {
                let first = times.partition_point(|t| *t < lo);
                times.get(first).map_or(false, |t| *t <= hi)
            }
        }
    }
}

/// Sorted set of quarks a 2D query asks about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuarkSet {
    quarks: Vec<Quark>,
}

impl QuarkSet {
    /// Set of the given quarks.
    pub fn new(quarks: impl IntoIterator<Item = Quark>) -> Self {
        let mut quarks: Vec<Quark> = quarks.into_iter().collect();
        quarks.sort_unstable();
        quarks.dedup();
        Self { quarks }
    }

    /// Check if `quark` is in the set.
    pub fn contains(&self, quark: Quark) -> bool {
        self.quarks.binary_search(&quark).is_ok()
    }

    /// Number of quarks.
    pub fn len(&self) -> usize {
        self.quarks.len()
    }

    /// Check if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.quarks.is_empty()
    }

    /// Largest quark, if any.
    pub fn max(&self) -> Option<Quark> {
        self.quarks.last().copied()
    }

    /// Quarks in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = Quark> + '_ {
        self.quarks.iter().copied()
    }
}

impl FromIterator<Quark> for QuarkSet {
    fn from_iter<I: IntoIterator<Item = Quark>>(iter: I) -> Self {
        QuarkSet::new(iter)
    }
}
