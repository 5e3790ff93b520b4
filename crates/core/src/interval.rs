//! State intervals

use crate::error::{Error, Result};
use crate::types::{Quark, Timestamp};
use crate::value::StateValue;
use serde::{Deserialize, Serialize};

/// A value held by one attribute over the closed range `[start, end]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateInterval {
    start: Timestamp,
    end: Timestamp,
    quark: Quark,
    value: StateValue,
}

impl StateInterval {
    /// Create an interval, rejecting `end < start`.
    pub fn new(
        start: Timestamp,
        end: Timestamp,
        quark: Quark,
        value: StateValue,
    ) -> Result<Self> {
        if end < start {
            return Err(Error::TimeRange(format!(
                "interval end {} precedes start {} for quark {}",
                end, start, quark
            )));
        }
        Ok(Self {
            start,
            end,
            quark,
            value,
        })
    }

    /// First instant covered.
    pub fn start(&self) -> Timestamp {
        self.start
    }

    /// Last instant covered.
    pub fn end(&self) -> Timestamp {
        self.end
    }

    /// Attribute this interval belongs to.
    pub fn quark(&self) -> Quark {
        self.quark
    }

    /// Value held over the interval.
    pub fn value(&self) -> &StateValue {
        &self.value
    }

    /// Consume the interval, keeping its value.
    pub fn into_value(self) -> StateValue {
        self.value
    }

    /// Check whether `t` falls within `[start, end]`.
    pub fn intersects(&self, t: Timestamp) -> bool {
        self.start <= t && t <= self.end
    }

    /// Encoded size: start, end, quark, tag, payload.
    pub fn encoded_size(&self) -> usize {
        FIXED_ENCODED_SIZE + self.value.payload_size()
    }
}

/// Bytes every encoded interval spends before its payload.
pub const FIXED_ENCODED_SIZE: usize = 8 + 8 + 4 + 1;

impl std::fmt::Display for StateInterval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}, {}] {} = {}",
            self.start, self.end, self.quark, self.value
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_reversed_range() {
        let err = StateInterval::new(5, 4, Quark::new(0), StateValue::Null).unwrap_err();
        assert!(err.is_time_range());
    }

    #[test]
    fn test_intersects_is_closed_closed() {
        let iv = StateInterval::new(5, 10, Quark::new(1), StateValue::from("B")).unwrap();
        assert!(!iv.intersects(4));
        assert!(iv.intersects(5));
        assert!(iv.intersects(10));
        assert!(!iv.intersects(11));
        assert_eq!(iv.encoded_size(), 21 + 3);
        assert_eq!(iv.to_string(), "[5, 10] #1 = \"B\"");
    }
}
