//! Property Tests
//!
//! Random change streams checked against a simple model: the value of an
//! attribute at `t` is the last change at or before `t`, `Null` before any.

use crate::common::*;
use proptest::prelude::*;
use statehist::{Quark, StateSystemBuilder, StateValue, Timestamp};

const QUARKS: usize = 4;

#[derive(Debug, Clone)]
struct Change {
    t: Timestamp,
    quark: usize,
    value: StateValue,
}

fn changes() -> impl Strategy<Value = (Vec<Change>, Timestamp)> {
    let step = (0i64..4, 0..QUARKS, 0i32..6);
    (proptest::collection::vec(step, 1..250), 0i64..10).prop_map(|(steps, tail)| {
        let mut t = 0;
        let changes: Vec<Change> = steps
            .into_iter()
            .map(|(dt, quark, v)| {
                t += dt;
                let value = if v == 0 {
                    StateValue::Null
                } else {
                    StateValue::Int(v)
                };
                Change { t, quark, value }
            })
            .collect();
        (changes, t + tail)
    })
}

fn model_value(changes: &[Change], quark: usize, t: Timestamp) -> StateValue {
    changes
        .iter()
        .filter(|c| c.quark == quark && c.t <= t)
        .last()
        .map(|c| c.value.clone())
        .unwrap_or(StateValue::Null)
}

fn build(mut b: StateSystemBuilder, changes: &[Change], end: Timestamp) -> (StateSystemBuilder, Vec<Quark>) {
    let quarks: Vec<Quark> = (0..QUARKS)
        .map(|i| b.get_quark_absolute_and_add(&["attr", &i.to_string()]).unwrap())
        .collect();
    for c in changes {
        b.modify_attribute(c.t, c.value.clone(), quarks[c.quark]).unwrap();
    }
    b.close_history(end).unwrap();
    (b, quarks)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_values_match_model((changes, end) in changes()) {
        let (b, quarks) = build(create_memory_builder(), &changes, end);
        for (i, &q) in quarks.iter().enumerate() {
            for t in 0..=end {
                let iv = b.query_single_state(t, q).unwrap();
                prop_assert!(iv.intersects(t));
                prop_assert_eq!(iv.value(), &model_value(&changes, i, t), "quark {} t {}", i, t);
            }
        }
    }

    #[test]
    fn prop_intervals_are_contiguous((changes, end) in changes()) {
        let (b, quarks) = build(create_memory_builder(), &changes, end);
        for &q in &quarks {
            let all = b.query_history_range(q, 0, end).unwrap();
            prop_assert_eq!(all.first().unwrap().start(), 0);
            prop_assert_eq!(all.last().unwrap().end(), end);
            for pair in all.windows(2) {
                prop_assert_eq!(pair[0].end() + 1, pair[1].start());
            }
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn prop_file_round_trip_matches_memory((changes, end) in changes()) {
        let (_dir, path) = temp_history();
        let (memory, quarks) = build(create_memory_builder(), &changes, end);
        let (file, _) = build(create_file_builder(&path), &changes, end);
        file.dispose();

        let reopened = small_tree_options(&path).open().unwrap();
        prop_assert_eq!(reopened.nb_attributes(), memory.nb_attributes());
        for &q in &quarks {
            let expected = memory.query_history_range(q, 0, end).unwrap();
            let got = reopened.query_history_range(q, 0, end).unwrap();
            prop_assert_eq!(got, expected);
        }
    }
}
