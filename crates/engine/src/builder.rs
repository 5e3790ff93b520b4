//! State system builder: the write path
//!
//! One builder owns the write side of a [`StateSystem`]; readers hold
//! clones of the `Arc` returned by [`StateSystemBuilder::state_system`] and
//! query while the builder keeps appending. Every mutating method takes
//! `&mut self`, so a history has exactly one writer.
//!
//! Lock order is attribute tree, then ongoing state.

use crate::backend::StateHistoryBackend;
use crate::state_system::StateSystem;
use statehist_core::{Error, Quark, Result, StateValue, Timestamp, ValueKind};
use std::ops::Deref;
use std::sync::Arc;
use tracing::{debug, info, trace};

/// Maximum depth of a stack attribute.
pub const MAX_STACK_DEPTH: usize = 100_000;

/// Write handle over a state system.
#[derive(Debug)]
pub struct StateSystemBuilder {
    ss: Arc<StateSystem>,
}

impl StateSystemBuilder {
    /// Start building a history into `backend`.
    pub fn new(backend: Box<dyn StateHistoryBackend>) -> Self {
        info!(start = backend.start_time(), "building state system");
        Self {
            ss: Arc::new(StateSystem::building(backend)),
        }
    }

    /// Shared read handle.
    pub fn state_system(&self) -> Arc<StateSystem> {
        Arc::clone(&self.ss)
    }

    fn check_writable(&self) -> Result<()> {
        self.ss.check_live()?;
        if self.ss.is_built() {
            return Err(Error::Closed);
        }
        Ok(())
    }

    // ========================================================================
    // Attributes
    // ========================================================================

    /// Quark of a top-level path, creating missing segments.
    pub fn get_quark_absolute_and_add(&mut self, path: &[&str]) -> Result<Quark> {
        self.add_quark(None, path)
    }

    /// Quark of `path` below `parent`, creating missing segments.
    pub fn get_quark_relative_and_add(&mut self, parent: Quark, path: &[&str]) -> Result<Quark> {
        self.add_quark(Some(parent), path)
    }

    fn add_quark(&mut self, parent: Option<Quark>, path: &[&str]) -> Result<Quark> {
        self.check_writable()?;
        let mut attributes = self.ss.attributes.write();
        let quark = attributes.get_or_create_quark(parent, path)?;
        self.ss.transient.write().ensure_entries(attributes.len());
        Ok(quark)
    }

    // ========================================================================
    // State changes
    // ========================================================================

    /// Set `quark` to `value` from `t` on.
    pub fn modify_attribute(
        &mut self,
        t: Timestamp,
        value: impl Into<StateValue>,
        quark: Quark,
    ) -> Result<()> {
        self.check_writable()?;
        let value = value.into();
        trace!(t, %quark, %value, "modify attribute");
        self.ss
            .transient
            .write()
            .process_state_change(t, value, quark, self.ss.backend.as_ref())
    }

    /// Value currently in effect for `quark`.
    pub fn query_ongoing_state(&self, quark: Quark) -> Result<StateValue> {
        self.ss.check_live()?;
        self.ss.transient.read().ongoing_value(quark)
    }

    /// Time the ongoing value of `quark` took effect.
    pub fn get_ongoing_start_time(&self, quark: Quark) -> Result<Timestamp> {
        self.ss.check_live()?;
        self.ss.transient.read().ongoing_start(quark)
    }

    /// Replace the ongoing value of `quark`, keeping its start time.
    pub fn update_ongoing_state(&mut self, value: impl Into<StateValue>, quark: Quark) -> Result<()> {
        self.check_writable()?;
        self.ss
            .transient
            .write()
            .change_ongoing_value(quark, value.into())
    }

    /// Add one to a counter attribute. `Null` counts as zero.
    pub fn increment_attribute(&mut self, t: Timestamp, quark: Quark) -> Result<()> {
        self.increment_attribute_by(t, quark, 1)
    }

    /// Add `delta` to a counter attribute.
    ///
    /// `Int` and `Long` counters wrap on overflow. A `Null` counter becomes
    /// `delta`, stored with the kind the attribute already had, or as an
    /// `Int` when it fits.
    pub fn increment_attribute_by(&mut self, t: Timestamp, quark: Quark, delta: i64) -> Result<()> {
        let (current, kind) = {
            let transient = self.ss.transient.read();
            (transient.ongoing_value(quark)?, transient.value_kind(quark)?)
        };
        let next = match current {
            StateValue::Int(v) => {
                let delta = i32::try_from(delta).map_err(|_| Error::value_type("Int", "Long"))?;
                StateValue::Int(v.wrapping_add(delta))
            }
            StateValue::Long(v) => StateValue::Long(v.wrapping_add(delta)),
            StateValue::Null => match (kind, i32::try_from(delta)) {
                (Some(ValueKind::Long), _) => StateValue::Long(delta),
                (Some(ValueKind::Int) | None, Ok(small)) => StateValue::Int(small),
                (None, Err(_)) => StateValue::Long(delta),
                (Some(ValueKind::Int), Err(_)) => return Err(Error::value_type("Int", "Long")),
                (Some(other), _) => return Err(Error::value_type("Int or Long", other.name())),
            },
            other => return Err(Error::value_type("Int or Long", other.type_name())),
        };
        self.modify_attribute(t, next, quark)
    }

    /// Set `quark` and all of its sub-attributes to `Null` from `t` on.
    pub fn remove_attribute(&mut self, t: Timestamp, quark: Quark) -> Result<()> {
        let subs = self.ss.get_sub_attributes(quark, true)?;
        for sub in subs {
            self.modify_attribute(t, StateValue::Null, sub)?;
        }
        self.modify_attribute(t, StateValue::Null, quark)
    }

    fn stack_depth(&self, stack: Quark) -> Result<usize> {
        match self.query_ongoing_state(stack)? {
            StateValue::Null => Ok(0),
            StateValue::Int(depth) => Ok(depth.max(0) as usize),
            other => Err(Error::value_type("Int", other.type_name())),
        }
    }

    /// Push `value` onto the stack attribute `stack`.
    ///
    /// The stack attribute holds the depth; element `n` lives in the
    /// sub-attribute named `n`, counting from 1.
    pub fn push_attribute(
        &mut self,
        t: Timestamp,
        value: impl Into<StateValue>,
        stack: Quark,
    ) -> Result<()> {
        let depth = self.stack_depth(stack)?;
        if depth >= MAX_STACK_DEPTH {
            return Err(Error::StackLimit {
                attribute: self.ss.get_full_attribute_path(stack)?,
                limit: MAX_STACK_DEPTH,
            });
        }
        let depth = depth + 1;
        self.modify_attribute(t, StateValue::Int(depth as i32), stack)?;
        let slot = self.get_quark_relative_and_add(stack, &[&depth.to_string()])?;
        self.modify_attribute(t, value, slot)
    }

    /// Pop the top of the stack attribute `stack`, `None` if it is empty.
    pub fn pop_attribute(&mut self, t: Timestamp, stack: Quark) -> Result<Option<StateValue>> {
        let depth = self.stack_depth(stack)?;
        if depth == 0 {
            return Ok(None);
        }
        let slot = self.ss.get_quark_relative(stack, &[&depth.to_string()])?;
        let popped = self.query_ongoing_state(slot)?;
        let remaining = match depth - 1 {
            0 => StateValue::Null,
            n => StateValue::Int(n as i32),
        };
        self.modify_attribute(t, remaining, stack)?;
        self.remove_attribute(t, slot)?;
        Ok(Some(popped))
    }

    // ========================================================================
    // Completion
    // ========================================================================

    /// Close every ongoing interval at `end` and finalize the backend.
    ///
    /// `end` is raised to the backend's end time if it is earlier. Waiters
    /// in [`StateSystem::wait_until_built`] are released. If any step fails
    /// the state system is disposed and waiters see `BuildFailed`.
    pub fn close_history(&mut self, end: Timestamp) -> Result<()> {
        self.check_writable()?;
        let end = end.max(self.ss.backend.end_time());
        if let Err(e) = self.finish(end) {
            self.ss.fail_build(&e);
            return Err(e);
        }
        self.ss.mark_built();
        info!(
            end,
            attributes = self.ss.nb_attributes(),
            "state history closed"
        );
        Ok(())
    }

    fn finish(&self, end: Timestamp) -> Result<()> {
        {
            let mut transient = self.ss.transient.write();
            transient.close(end, self.ss.backend.as_ref())?;
            self.ss.backend.finished_building(end)?;
        }
        let bytes = self.ss.attributes.read().serialize()?;
        self.ss.backend.store_attribute_tree(&bytes)?;
        debug!(bytes = bytes.len(), "stored attribute tree");
        Ok(())
    }
}

impl Deref for StateSystemBuilder {
    type Target = Arc<StateSystem>;

    fn deref(&self) -> &Self::Target {
        &self.ss
    }
}
