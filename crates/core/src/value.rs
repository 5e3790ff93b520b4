//! State values
//!
//! A state value is one of five kinds. `Null` means "no information" and is
//! a real, storable value: gaps in an attribute's history are written as
//! `Null` intervals rather than left out.
//!
//! ## Ordering
//!
//! Values are totally ordered so they can be compared and deduplicated:
//! first by kind (`Null < Int < Long < Double < String`), then by content.
//! Doubles compare with `f64::total_cmp`, so `NaN == NaN` and
//! `-0.0 != 0.0`. Writing a value equal to the ongoing one is a no-op, which
//! needs exactly this bitwise notion of equality.
//!
//! ## Encoded size
//!
//! Fixed-width kinds have a constant payload size and strings are
//! length-prefixed, so an interval's on-disk size is known before it is
//! written.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Largest string payload, bounded by its `u16` length prefix.
pub const MAX_STRING_LEN: usize = u16::MAX as usize;

/// Kind of a [`StateValue`], with its on-disk tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum ValueKind {
    /// No information
    Null = 0,
    /// 32-bit signed integer
    Int = 1,
    /// 64-bit signed integer
    Long = 2,
    /// 64-bit IEEE-754 float
    Double = 3,
    /// UTF-8 string
    String = 4,
}

impl ValueKind {
    /// On-disk tag byte.
    pub const fn tag(self) -> u8 {
        self as u8
    }

    /// Decode a tag byte.
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(ValueKind::Null),
            1 => Some(ValueKind::Int),
            2 => Some(ValueKind::Long),
            3 => Some(ValueKind::Double),
            4 => Some(ValueKind::String),
            _ => None,
        }
    }

    /// Kind name for error messages.
    pub const fn name(self) -> &'static str {
        match self {
            ValueKind::Null => "Null",
            ValueKind::Int => "Int",
            ValueKind::Long => "Long",
            ValueKind::Double => "Double",
            ValueKind::String => "String",
        }
    }
}

impl std::fmt::Display for ValueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Storable state value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub enum StateValue {
    /// No information
    #[default]
    Null,
    /// 32-bit signed integer
    Int(i32),
    /// 64-bit signed integer
    Long(i64),
    /// 64-bit IEEE-754 float
    Double(f64),
    /// UTF-8 string, at most [`MAX_STRING_LEN`] bytes once encoded
    String(String),
}

impl StateValue {
    /// Kind of this value.
    pub fn kind(&self) -> ValueKind {
        match self {
            StateValue::Null => ValueKind::Null,
            StateValue::Int(_) => ValueKind::Int,
            StateValue::Long(_) => ValueKind::Long,
            StateValue::Double(_) => ValueKind::Double,
            StateValue::String(_) => ValueKind::String,
        }
    }

    /// Kind name for error messages.
    pub fn type_name(&self) -> &'static str {
        self.kind().name()
    }

    /// Check if this value is `Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, StateValue::Null)
    }

    /// Payload size in bytes, excluding the tag.
    pub fn payload_size(&self) -> usize {
        match self {
            StateValue::Null => 0,
            StateValue::Int(_) => 4,
            StateValue::Long(_) | StateValue::Double(_) => 8,
            StateValue::String(s) => 2 + s.len(),
        }
    }

    /// Read an `Int`.
    pub fn unbox_int(&self) -> Result<i32> {
        match self {
            StateValue::Int(v) => Ok(*v),
            other => Err(Error::value_type("Int", other.type_name())),
        }
    }

    /// Read a `Long`.
    pub fn unbox_long(&self) -> Result<i64> {
        match self {
            StateValue::Long(v) => Ok(*v),
            other => Err(Error::value_type("Long", other.type_name())),
        }
    }

    /// Read a `Double`.
    pub fn unbox_double(&self) -> Result<f64> {
        match self {
            StateValue::Double(v) => Ok(*v),
            other => Err(Error::value_type("Double", other.type_name())),
        }
    }

    /// Read a `String`.
    pub fn unbox_str(&self) -> Result<&str> {
        match self {
            StateValue::String(s) => Ok(s),
            other => Err(Error::value_type("String", other.type_name())),
        }
    }
}

impl PartialEq for StateValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for StateValue {}

impl PartialOrd for StateValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for StateValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (StateValue::Null, StateValue::Null) => Ordering::Equal,
            (StateValue::Int(a), StateValue::Int(b)) => a.cmp(b),
            (StateValue::Long(a), StateValue::Long(b)) => a.cmp(b),
            (StateValue::Double(a), StateValue::Double(b)) => a.total_cmp(b),
            (StateValue::String(a), StateValue::String(b)) => a.cmp(b),
            (a, b) => a.kind().cmp(&b.kind()),
        }
    }
}

impl std::fmt::Display for StateValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StateValue::Null => f.write_str("null"),
            StateValue::Int(v) => write!(f, "{}", v),
            StateValue::Long(v) => write!(f, "{}", v),
            StateValue::Double(v) => write!(f, "{}", v),
            StateValue::String(s) => write!(f, "{:?}", s),
        }
    }
}

impl From<i32> for StateValue {
    fn from(v: i32) -> Self {
        StateValue::Int(v)
    }
}

impl From<i64> for StateValue {
    fn from(v: i64) -> Self {
        StateValue::Long(v)
    }
}

impl From<f64> for StateValue {
    fn from(v: f64) -> Self {
        StateValue::Double(v)
    }
}

impl From<&str> for StateValue {
    fn from(v: &str) -> Self {
        StateValue::String(v.to_owned())
    }
}

impl From<String> for StateValue {
    fn from(v: String) -> Self {
        StateValue::String(v)
    }
}

impl<T: Into<StateValue>> From<Option<T>> for StateValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(StateValue::Null, Into::into)
    }
}
