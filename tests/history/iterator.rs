//! QuarkIterator Tests
//!
//! Cursor behavior over file-backed histories deep enough to span many
//! nodes.

use crate::common::*;
use statehist::{Quark, QuarkIterator, StateInterval, StateSystem, StateValue, Timestamp};
use std::sync::Arc;

fn history(path: &std::path::Path) -> (Arc<StateSystem>, Quark) {
    let mut b = create_file_builder(path);
    let q = b.get_quark_absolute_and_add(&["cpu", "freq"]).unwrap();
    let other = b.get_quark_absolute_and_add(&["cpu", "load"]).unwrap();
    for t in (0..3_000).step_by(3) {
        b.modify_attribute(t, StateValue::Long(t % 17), q).unwrap();
        b.modify_attribute(t + 1, StateValue::Double(t as f64), other).unwrap();
    }
    b.close_history(3_100).unwrap();
    (b.state_system(), q)
}

fn drain_forward(it: &mut QuarkIterator) -> Vec<StateInterval> {
    let mut out = Vec::new();
    while let Some(iv) = it.next_interval().unwrap() {
        out.push(iv);
    }
    out
}

#[test]
fn test_forward_then_reverse() {
    let (_dir, path) = temp_history();
    let (ss, q) = history(&path);

    let mut it = ss.iter_quark(q, Timestamp::MIN);
    let forward = drain_forward(&mut it);
    assert!(forward.len() > 100);
    assert_eq!(forward[0].start(), ss.start_time());
    assert_eq!(forward.last().unwrap().end(), ss.current_end_time());

    // the cursor sits on the last interval; walk back to the first
    let mut backward = vec![it.current().cloned().unwrap()];
    while let Some(iv) = it.previous_interval().unwrap() {
        backward.push(iv);
    }
    backward.reverse();
    assert_eq!(backward, forward);
}

#[test]
fn test_direction_change_mid_stream() {
    let (_dir, path) = temp_history();
    let (ss, q) = history(&path);

    let mut it = ss.iter_quark(q, 1_500);
    let a = it.next_interval().unwrap().unwrap();
    let b = it.next_interval().unwrap().unwrap();
    let c = it.next_interval().unwrap().unwrap();
    assert!(a.intersects(1_500));
    assert_eq!(a.end() + 1, b.start());
    assert_eq!(b.end() + 1, c.start());

    assert_eq!(it.previous_interval().unwrap().unwrap(), b);
    assert_eq!(it.previous_interval().unwrap().unwrap(), a);
    assert_eq!(it.next_interval().unwrap().unwrap(), b);
}

#[test]
fn test_iterator_trait() {
    let (_dir, path) = temp_history();
    let (ss, q) = history(&path);

    let values: Vec<_> = ss
        .iter_quark_range(q, 0, 30, 1)
        .unwrap()
        .map(|iv| iv.unwrap().into_value())
        .collect();
    assert_eq!(values.len(), 11);
    assert_eq!(values[1], StateValue::Long(3));

    let sampled = ss.iter_quark_range(q, 0, 2_999, 300).unwrap().count();
    assert_eq!(sampled, 10);
}

#[test]
fn test_iterator_after_end() {
    let (_dir, path) = temp_history();
    let (ss, q) = history(&path);
    let mut it = ss.iter_quark(q, 10_000);
    assert!(!it.has_next());
    assert!(it.next_interval().unwrap().is_none());
    // with no current interval, the previous one is the last of the history
    let last = it.previous_interval().unwrap().unwrap();
    assert_eq!(last.end(), ss.current_end_time());
}
