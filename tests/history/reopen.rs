//! Reopen Tests
//!
//! Histories written to disk, closed and opened again by a fresh
//! `StateSystem`: values, attributes, header checks and corruption.

use crate::common::*;
use statehist::{Error, HistoryOptions, Opened, Quark, StateInterval, StateValue, Timestamp};
use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

/// Three threads changing status and priority, closed at 10_000.
fn build_history(path: &Path) -> Vec<StateInterval> {
    let mut b = create_file_builder(path);
    let mut quarks = Vec::new();
    for tid in 0..3 {
        let thread = b
            .get_quark_absolute_and_add(&["threads", &tid.to_string()])
            .unwrap();
        quarks.push(b.get_quark_relative_and_add(thread, &["status"]).unwrap());
        quarks.push(b.get_quark_relative_and_add(thread, &["prio"]).unwrap());
    }
    let statuses = ["running", "blocked", "waiting"];
    for t in (0..10_000).step_by(7) {
        let slot = (t / 7) as usize % quarks.len();
        let value = if slot % 2 == 0 {
            StateValue::from(statuses[(t as usize / 3) % 3])
        } else {
            StateValue::Int((t % 40) as i32)
        };
        b.modify_attribute(t, value, quarks[slot]).unwrap();
    }
    b.close_history(10_000).unwrap();

    let mut expected = Vec::new();
    for &q in &quarks {
        expected.extend(b.query_history_range(q, 0, 10_000).unwrap());
    }
    b.dispose();
    expected
}

fn open(path: &Path) -> std::sync::Arc<statehist::StateSystem> {
    small_tree_options(path).open().unwrap()
}

fn corrupt_byte(path: &Path, offset: u64) {
    overwrite(path, offset, &[0xA5]);
}

fn overwrite(path: &Path, offset: u64, bytes: &[u8]) {
    let mut file = OpenOptions::new().read(true).write(true).open(path).unwrap();
    file.seek(SeekFrom::Start(offset)).unwrap();
    file.write_all(bytes).unwrap();
}

/// Root sequence number from header offset 24.
fn root_seq(path: &Path) -> u64 {
    let bytes = std::fs::read(path).unwrap();
    u32::from_le_bytes([bytes[24], bytes[25], bytes[26], bytes[27]]) as u64
}

#[test]
fn test_reopen_round_trip() {
    init_tracing();
    let (_dir, path) = temp_history();
    let expected = build_history(&path);
    let ss = open(&path);

    assert!(ss.is_built());
    assert_eq!(ss.start_time(), 0);
    assert_eq!(ss.current_end_time(), 10_000);
    for iv in &expected {
        for t in [iv.start(), iv.end()] {
            let got = ss.query_single_state(t, iv.quark()).unwrap();
            assert_eq!(&got, iv, "t={}", t);
        }
    }
}

#[test]
fn test_reopen_restores_attributes() {
    let (_dir, path) = temp_history();
    build_history(&path);
    let ss = open(&path);

    assert_eq!(ss.nb_attributes(), 1 + 3 * 3);
    let prio = ss.get_quark_absolute(&["threads", "2", "prio"]).unwrap();
    assert_eq!(
        ss.get_full_attribute_path(prio).unwrap(),
        "threads/2/prio"
    );
    assert_eq!(ss.get_quarks(&["threads", "*", "status"]).len(), 3);
}

#[test]
fn test_reopen_full_query() {
    let (_dir, path) = temp_history();
    build_history(&path);
    let ss = open(&path);
    for t in [0, 1234, 9999, 10_000] {
        let full = ss.query_full_state(t).unwrap();
        assert_eq!(full.len(), ss.nb_attributes());
        for (index, iv) in full.iter().enumerate() {
            assert!(iv.intersects(t));
            assert_eq!(iv.quark(), Quark::new(index as u32));
        }
    }
}

#[test]
fn test_provider_version_mismatch() {
    let (_dir, path) = temp_history();
    build_history(&path);
    let err = small_tree_options(&path)
        .provider_version(PROVIDER_VERSION + 1)
        .open()
        .unwrap_err();
    assert!(matches!(
        err,
        Error::VersionMismatch {
            field: "provider version",
            ..
        }
    ));
    assert!(err.requires_rebuild());
}

#[test]
fn test_unfinished_file_is_refused() {
    let (_dir, path) = temp_history();
    let mut b = create_file_builder(&path);
    let q = b.get_quark_absolute_and_add(&["q"]).unwrap();
    for t in 0..2_000 {
        b.modify_attribute(t, StateValue::Long(t), q).unwrap();
    }
    b.dispose();
    let err = small_tree_options(&path).open().unwrap_err();
    assert!(err.requires_rebuild(), "{}", err);
}

#[test]
fn test_corrupt_header_is_refused() {
    let (_dir, path) = temp_history();
    build_history(&path);
    corrupt_byte(&path, 30);
    let err = small_tree_options(&path).open().unwrap_err();
    assert!(matches!(err, Error::Corruption(_)), "{}", err);
}

#[test]
fn test_corrupt_node_interval_count_is_refused() {
    let (_dir, path) = temp_history();
    build_history(&path);
    // interval count field of the root block
    let count_offset = 4096 + root_seq(&path) * 4096 + 25;
    overwrite(&path, count_offset, &u32::MAX.to_le_bytes());
    let err = small_tree_options(&path).open().unwrap_err();
    assert!(matches!(err, Error::Corruption(_)), "{}", err);
    assert!(err.requires_rebuild());

    let reopened = small_tree_options(&path).open_or_create().unwrap();
    assert!(matches!(reopened, Opened::Building(_)));
}

#[test]
fn test_corrupt_attribute_section_is_refused() {
    let (_dir, path) = temp_history();
    build_history(&path);
    let len = std::fs::metadata(&path).unwrap().len();
    corrupt_byte(&path, len - 6);
    let err = small_tree_options(&path).open().unwrap_err();
    assert!(err.requires_rebuild(), "{}", err);
}

#[test]
fn test_missing_file() {
    let (_dir, path) = temp_history();
    let err = HistoryOptions::new().path(&path).open().unwrap_err();
    assert!(matches!(err, Error::Io(_)));
}

#[test]
fn test_open_ignores_caller_geometry() {
    let (_dir, path) = temp_history();
    let expected = build_history(&path);
    // block size and fan-out come from the header
    let ss = HistoryOptions::new()
        .path(&path)
        .provider_version(PROVIDER_VERSION)
        .open()
        .unwrap();
    let last: Timestamp = expected.iter().map(|iv| iv.end()).max().unwrap();
    assert_eq!(ss.current_end_time(), last);
}
