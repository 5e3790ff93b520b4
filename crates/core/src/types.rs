//! Identifier and time types
//!
//! - Quark: stable integer handle for an attribute path
//! - Timestamp: trace time, any unit the producer chooses
//! - CancelToken: shared flag checked between node visits

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Trace time. Signed so traces may start before zero.
pub type Timestamp = i64;

/// Integer handle for an attribute path.
///
/// Quarks are assigned densely from zero in creation order and never reused,
/// so they double as indexes into per-attribute tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Quark(u32);

impl Quark {
    /// Wrap a raw quark number.
    pub const fn new(raw: u32) -> Self {
        Quark(raw)
    }

    /// Raw quark number as stored on disk.
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Quark as a table index.
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl From<u32> for Quark {
    fn from(raw: u32) -> Self {
        Quark(raw)
    }
}

impl std::fmt::Display for Quark {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Cooperative cancellation signal for queries.
///
/// Clones share the same flag. Queries check it between node visits and
/// return [`Error::Cancelled`] once it is raised.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag. Every clone observes it.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Check whether the flag was raised.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Return `Err(Cancelled)` if the flag was raised.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quark_ordering_and_index() {
        let a = Quark::new(3);
        let b = Quark::from(7);
        assert!(a < b);
        assert_eq!(b.index(), 7);
        assert_eq!(a.to_string(), "#3");
    }

    #[test]
    fn test_cancel_token_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(token.check().is_ok());
        clone.cancel();
        assert!(token.is_cancelled());
        assert!(matches!(token.check(), Err(Error::Cancelled)));
    }
}
