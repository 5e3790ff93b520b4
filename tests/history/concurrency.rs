//! Concurrency Tests
//!
//! One builder thread appending while reader threads query:
//! - readers always see the value in effect at the queried time
//! - waiters are released by close and by dispose
//! - dispose racing queries yields `Disposed`, never a wrong answer

use crate::common::*;
use rand::Rng;
use statehist::{Error, StateSystemBuilder, StateValue};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

const NUM_READERS: usize = 4;
const LAST_CHANGE: i64 = 40_000;

/// Every 10 time units the counter takes the value `t / 10`.
fn run_live_readers(mut builder: StateSystemBuilder) {
    let q = builder.get_quark_absolute_and_add(&["counter"]).unwrap();
    builder.modify_attribute(0, StateValue::Long(0), q).unwrap();
    let ss = builder.state_system();

    let barrier = Arc::new(Barrier::new(NUM_READERS + 1));
    let queries = Arc::new(AtomicUsize::new(0));
    let readers: Vec<_> = (0..NUM_READERS)
        .map(|_| {
            let ss = Arc::clone(&ss);
            let barrier = Arc::clone(&barrier);
            let queries = Arc::clone(&queries);
            thread::spawn(move || {
                let mut rng = rand::thread_rng();
                barrier.wait();
                loop {
                    let built = ss.is_built();
                    let end = ss.current_end_time();
                    let t = rng.gen_range(0..=end);
                    let iv = ss.query_single_state(t, q).unwrap();
                    assert!(iv.intersects(t), "{} does not contain {}", iv, t);
                    assert_eq!(iv.value(), &StateValue::Long(t.min(LAST_CHANGE) / 10));
                    queries.fetch_add(1, Ordering::Relaxed);
                    if built {
                        break;
                    }
                }
            })
        })
        .collect();

    barrier.wait();
    for t in (10..=LAST_CHANGE).step_by(10) {
        builder.modify_attribute(t, StateValue::Long(t / 10), q).unwrap();
    }
    builder.close_history(LAST_CHANGE + 5).unwrap();

    for h in readers {
        h.join().unwrap();
    }
    assert!(queries.load(Ordering::Relaxed) >= NUM_READERS);
}

#[test]
fn test_live_readers_in_memory() {
    run_live_readers(create_memory_builder());
}

#[test]
fn test_live_readers_on_file() {
    init_tracing();
    let (_dir, path) = temp_history();
    let builder = create_file_builder(&path);
    run_live_readers(builder);
}

#[test]
fn test_wait_until_built() {
    let mut builder = create_memory_builder();
    let q = builder.get_quark_absolute_and_add(&["q"]).unwrap();
    let ss = builder.state_system();

    let waiters: Vec<_> = (0..3)
        .map(|_| {
            let ss = Arc::clone(&ss);
            thread::spawn(move || {
                ss.wait_until_built().unwrap();
                ss.query_single_state(50, q).unwrap()
            })
        })
        .collect();

    assert!(!ss.wait_until_built_timeout(Duration::from_millis(10)));
    builder.modify_attribute(20, 5, q).unwrap();
    builder.close_history(100).unwrap();

    for h in waiters {
        let iv = h.join().unwrap();
        assert_eq!(iv.value(), &StateValue::Int(5));
        assert_eq!((iv.start(), iv.end()), (20, 100));
    }
}

#[test]
fn test_dispose_releases_waiters() {
    let builder = create_memory_builder();
    let ss = builder.state_system();
    let waiter = {
        let ss = Arc::clone(&ss);
        thread::spawn(move || ss.wait_until_built())
    };
    thread::sleep(Duration::from_millis(10));
    ss.dispose();
    assert!(matches!(waiter.join().unwrap(), Err(Error::Disposed)));
}

#[test]
fn test_dispose_during_queries() {
    let (_dir, path) = temp_history();
    let mut builder = create_file_builder(&path);
    let q = builder.get_quark_absolute_and_add(&["q"]).unwrap();
    for t in 0..5_000 {
        builder.modify_attribute(t, StateValue::Long(t), q).unwrap();
    }
    builder.close_history(5_000).unwrap();
    let ss = builder.state_system();

    let barrier = Arc::new(Barrier::new(NUM_READERS + 1));
    let readers: Vec<_> = (0..NUM_READERS)
        .map(|_| {
            let ss = Arc::clone(&ss);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let mut rng = rand::thread_rng();
                let mut answered = 0usize;
                barrier.wait();
                loop {
                    let t = rng.gen_range(0..5_000);
                    match ss.query_single_state(t, q) {
                        Ok(iv) => {
                            assert_eq!(iv.value(), &StateValue::Long(t));
                            answered += 1;
                        }
                        Err(Error::Disposed) => return answered,
                        Err(e) => panic!("unexpected error: {}", e),
                    }
                }
            })
        })
        .collect();

    barrier.wait();
    thread::sleep(Duration::from_millis(20));
    ss.dispose();
    ss.dispose();

    for h in readers {
        h.join().unwrap();
    }
    assert!(ss.query_full_state(10).unwrap_err().is_disposed());
}
