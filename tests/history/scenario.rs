//! Builder and Reader Scenario Tests
//!
//! The same scenarios run against the in-memory backend and a history file.

use crate::common::*;
use statehist::{Error, Quark, StateSystemBuilder, StateValue, Timestamp};

fn both_backends(test: impl Fn(StateSystemBuilder)) {
    test(create_memory_builder());
    let (_dir, path) = temp_history();
    test(create_file_builder(&path));
}

fn bounds(builder: &StateSystemBuilder, t: Timestamp, q: Quark) -> (Timestamp, Timestamp) {
    let iv = builder.query_single_state(t, q).unwrap();
    (iv.start(), iv.end())
}

// =============================================================================
// CONCRETE SCENARIO
// =============================================================================

#[test]
fn test_two_changes_then_close() {
    both_backends(|mut b| {
        let q = b.get_quark_absolute_and_add(&["Q"]).unwrap();
        b.modify_attribute(0, "A", q).unwrap();
        b.modify_attribute(5, "B", q).unwrap();
        b.close_history(10).unwrap();

        let at3 = b.query_single_state(3, q).unwrap();
        assert_eq!(at3.value(), &StateValue::from("A"));
        assert_eq!((at3.start(), at3.end()), (0, 4));

        for t in [7, 10] {
            let iv = b.query_single_state(t, q).unwrap();
            assert_eq!(iv.value(), &StateValue::from("B"));
            assert_eq!((iv.start(), iv.end()), (5, 10));
        }
    });
}

// =============================================================================
// BOUNDARIES
// =============================================================================

#[test]
fn test_boundary_queries() {
    both_backends(|mut b| {
        let q = b.get_quark_absolute_and_add(&["cpu"]).unwrap();
        b.modify_attribute(100, 1, q).unwrap();
        b.modify_attribute(200, 2, q).unwrap();
        b.modify_attribute(300, 3, q).unwrap();
        b.close_history(400).unwrap();

        assert_eq!(bounds(&b, 200, q), (200, 299));
        assert_eq!(bounds(&b, 299, q), (200, 299));
        assert_eq!(bounds(&b, 199, q), (100, 199));
        // before the first change the attribute was null
        let first = b.query_single_state(99, q).unwrap();
        assert!(first.value().is_null());
        assert_eq!((first.start(), first.end()), (0, 99));
    });
}

#[test]
fn test_out_of_range_queries() {
    both_backends(|mut b| {
        let q = b.get_quark_absolute_and_add(&["q"]).unwrap();
        b.modify_attribute(5, 1, q).unwrap();
        b.close_history(10).unwrap();

        assert!(b.query_single_state(11, q).unwrap_err().is_time_range());
        assert!(b.query_single_state(-1, q).unwrap_err().is_time_range());
        assert!(b.query_full_state(11).unwrap_err().is_time_range());
        assert!(b
            .query_single_state(5, Quark::new(99))
            .unwrap_err()
            .is_not_found());
    });
}

#[test]
fn test_non_monotonic_write_leaves_state() {
    both_backends(|mut b| {
        let q = b.get_quark_absolute_and_add(&["q"]).unwrap();
        b.modify_attribute(10, "x", q).unwrap();
        let err = b.modify_attribute(4, "y", q).unwrap_err();
        assert!(err.is_time_range());
        b.close_history(20).unwrap();
        let iv = b.query_single_state(15, q).unwrap();
        assert_eq!(iv.value(), &StateValue::from("x"));
        assert_eq!((iv.start(), iv.end()), (10, 20));
    });
}

#[test]
fn test_attribute_without_changes_is_null_everywhere() {
    both_backends(|mut b| {
        let used = b.get_quark_absolute_and_add(&["used"]).unwrap();
        let idle = b.get_quark_absolute_and_add(&["idle"]).unwrap();
        b.modify_attribute(3, 1, used).unwrap();
        b.close_history(9).unwrap();
        let iv = b.query_single_state(5, idle).unwrap();
        assert!(iv.value().is_null());
        assert_eq!((iv.start(), iv.end()), (0, 9));
    });
}

// =============================================================================
// LIVE QUERIES
// =============================================================================

#[test]
fn test_queries_during_build() {
    both_backends(|mut b| {
        let q = b.get_quark_absolute_and_add(&["status"]).unwrap();
        b.modify_attribute(0, "idle", q).unwrap();
        b.modify_attribute(50, "busy", q).unwrap();
        assert!(!b.is_built());

        let closed = b.query_single_state(20, q).unwrap();
        assert_eq!(closed.value(), &StateValue::from("idle"));
        assert_eq!((closed.start(), closed.end()), (0, 49));

        let ongoing = b.query_single_state(50, q).unwrap();
        assert_eq!(ongoing.value(), &StateValue::from("busy"));
        assert!(b.query_single_state(51, q).unwrap_err().is_time_range());

        b.modify_attribute(80, "busy", q).unwrap();
        let extended = b.query_single_state(80, q).unwrap();
        assert_eq!((extended.start(), extended.end()), (50, 80));
    });
}

// =============================================================================
// FULL QUERIES AND ATTRIBUTES
// =============================================================================

#[test]
fn test_full_state_matches_single_queries() {
    both_backends(|mut b| {
        let cpus: Vec<Quark> = (0..4)
            .map(|i| b.get_quark_absolute_and_add(&["cpus", &i.to_string()]).unwrap())
            .collect();
        for t in 0..200 {
            let cpu = cpus[(t % 4) as usize];
            b.modify_attribute(t, StateValue::Long(t), cpu).unwrap();
        }
        b.close_history(250).unwrap();

        for t in [0, 17, 101, 199, 250] {
            let full = b.query_full_state(t).unwrap();
            assert_eq!(full.len(), b.nb_attributes());
            for (index, iv) in full.iter().enumerate() {
                let single = b.query_single_state(t, Quark::new(index as u32)).unwrap();
                assert_eq!(iv, &single, "t={} quark={}", t, index);
            }
        }
    });
}

#[test]
fn test_attribute_lookup() {
    let mut b = create_memory_builder();
    let threads = b.get_quark_absolute_and_add(&["threads"]).unwrap();
    for tid in ["1", "2", "3"] {
        b.get_quark_relative_and_add(threads, &[tid, "status"]).unwrap();
    }
    let matched = b.get_quarks(&["threads", "*", "status"]);
    assert_eq!(matched.len(), 3);
    for q in &matched {
        assert_eq!(b.get_attribute_name(*q).unwrap(), "status");
    }
    assert_eq!(
        b.get_full_attribute_path(matched[1]).unwrap(),
        "threads/2/status"
    );
    assert!(b.opt_quark_absolute(&["threads", "4"]).is_none());
    assert!(matches!(
        b.get_quark_absolute(&["threads", "4"]),
        Err(Error::AttributeNotFound(_))
    ));
    assert_eq!(b.get_sub_attributes(threads, false).unwrap().len(), 3);
    assert_eq!(b.get_sub_attributes(threads, true).unwrap().len(), 6);

    // `..` climbs back to the thread, so each is found once
    let back_up = b.get_quarks(&["threads", "*", "status", ".."]);
    assert_eq!(back_up, b.get_sub_attributes(threads, false).unwrap());
    let named_two = b
        .get_sub_attributes_matching(threads, false, |name| name == "2")
        .unwrap();
    assert_eq!(named_two, vec![b.get_quark_relative(threads, &["2"]).unwrap()]);
    let statuses = b
        .get_sub_attributes_matching(threads, true, |name| name == "status")
        .unwrap();
    assert_eq!(statuses, matched);
}

#[test]
fn test_2d_query_matches_history_ranges() {
    both_backends(|mut b| {
        let cpus: Vec<Quark> = (0..8)
            .map(|cpu| b.get_quark_absolute_and_add(&["cpus", &cpu.to_string()]).unwrap())
            .collect();
        for t in 0..2_000i64 {
            let cpu = cpus[(t % 8) as usize];
            b.modify_attribute(t, StateValue::Long(t / 3), cpu).unwrap();
        }
        let picked = [cpus[6], cpus[1], cpus[3]];
        let per_quark = |b: &StateSystemBuilder, t1, t2| {
            let mut sorted = picked;
            sorted.sort();
            sorted
                .iter()
                .flat_map(|q| b.query_history_range(*q, t1, t2).unwrap())
                .collect::<Vec<_>>()
        };

        // during the build the newest intervals are still ongoing
        let live = b.query_2d(&picked, 1_900, 1_999).unwrap();
        assert_eq!(live, per_quark(&b, 1_900, 1_999));

        b.close_history(2_100).unwrap();
        let closed = b.query_2d(&picked, 400, 1_300).unwrap();
        assert_eq!(closed, per_quark(&b, 400, 1_300));

        let at = b.query_2d_at(&picked, &[2_050, 17]).unwrap();
        assert!(at.iter().all(|iv| {
            (iv.start() <= 17 && 17 <= iv.end()) || (iv.start() <= 2_050 && 2_050 <= iv.end())
        }));
        assert_eq!(at.len(), 6);
    });
}

#[test]
fn test_history_range_over_file() {
    let (_dir, path) = temp_history();
    let mut b = create_file_builder(&path);
    let q = b.get_quark_absolute_and_add(&["freq"]).unwrap();
    for t in (0..1000).step_by(10) {
        b.modify_attribute(t, StateValue::Long(t), q).unwrap();
    }
    b.close_history(1005).unwrap();

    let range = b.query_history_range(q, 95, 131).unwrap();
    let starts: Vec<_> = range.iter().map(|iv| iv.start()).collect();
    assert_eq!(starts, vec![90, 100, 110, 120, 130]);

    let clamped = b.query_history_range(q, 990, 5000).unwrap();
    assert_eq!(clamped.last().unwrap().end(), 1005);
}
