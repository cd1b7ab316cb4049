//! Integration Tests for the Server Reactive Engine
//!
//! These tests verify that signals, derived values, effects and state
//! collections work together correctly.

mod common;

use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use runesync_core::reactive::{batch, untracked, Derived, Effect, Signal, TrackingContext};
use runesync_core::state::{Diff, StateCollection};
use serde_json::json;

/// A single write to the top of a diamond recomputes the sink exactly once,
/// and the sink sees both arms updated.
#[test]
fn diamond_recomputes_sink_once() {
    common::init_tracing();

    let a = Signal::new(1);
    let b = {
        let a = a.clone();
        Derived::new(move || a.get() + 1)
    };
    let c = {
        let a = a.clone();
        Derived::new(move || a.get() * 10)
    };
    let d = {
        let (b, c) = (b.clone(), c.clone());
        Derived::new(move || (b.get(), c.get()))
    };

    let observed = Arc::new(Mutex::new(Vec::new()));
    let _effect = {
        let (d, observed) = (d.clone(), observed.clone());
        Effect::new(move || observed.lock().unwrap().push(d.get()))
    };

    a.set(2);

    assert_eq!(d.compute_count(), 2);
    assert_eq!(*observed.lock().unwrap(), vec![(2, 10), (3, 20)]);
}

/// A signal only read in the untaken branch never triggers recomputation.
#[test]
fn untaken_branch_does_not_recompute() {
    let use_left = Signal::new(true);
    let left = Signal::new(1);
    let right = Signal::new(100);

    let chosen = {
        let (use_left, left, right) = (use_left.clone(), left.clone(), right.clone());
        Derived::new(move || if use_left.get() { left.get() } else { right.get() })
    };

    assert_eq!(chosen.get(), 1);
    right.set(200);
    assert_eq!(chosen.get(), 1);
    assert_eq!(chosen.compute_count(), 1);

    use_left.set(false);
    assert_eq!(chosen.get(), 200);
    left.set(2);
    assert_eq!(chosen.get(), 200);
    assert_eq!(chosen.compute_count(), 2);
}

/// Many writes inside one batch reach each subscriber once, with the final
/// value.
#[test]
fn batch_coalesces_notifications() {
    let signal = Signal::new(0);
    let calls = Arc::new(AtomicUsize::new(0));
    let last = Arc::new(AtomicI32::new(-1));

    let _subscription = {
        let (calls, last) = (calls.clone(), last.clone());
        signal.subscribe(move |value| {
            calls.fetch_add(1, Ordering::SeqCst);
            last.store(*value, Ordering::SeqCst);
        })
    };

    batch(|| {
        for n in 1..=10 {
            signal.set(n);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    });

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(last.load(Ordering::SeqCst), 10);
}

/// `count = 0; doubled = count * 2`; a subscriber registered before the
/// write fires with 10 exactly once.
#[test]
fn doubled_counter_scenario() {
    let count = Signal::new(0);
    let doubled = {
        let count = count.clone();
        Derived::new(move || count.get() * 2)
    };

    let seen = Arc::new(Mutex::new(Vec::new()));
    let _subscription = {
        let seen = seen.clone();
        doubled.subscribe(move |value| seen.lock().unwrap().push(*value))
    };

    count.set(5);

    assert_eq!(doubled.get(), 10);
    assert_eq!(*seen.lock().unwrap(), vec![10]);
}

/// `{a:1,b:2}` diffed against `{a:1,b:3,c:4}`.
#[test]
fn collection_diff_scenario() {
    let left = StateCollection::new("left");
    left.add_value("a", json!(1));
    left.add_value("b", json!(2));

    let right = StateCollection::new("right");
    right.add_value("a", json!(1));
    right.add_value("b", json!(3));
    right.add_value("c", json!(4));

    let diff = left.diff(&right);

    let expected: Diff = serde_json::from_value(json!({
        "added": {"c": 4},
        "removed": [],
        "changed": {"b": 3}
    }))
    .unwrap();
    assert_eq!(diff, expected);

    let mut patched = left.to_snapshot();
    diff.apply_to(&mut patched);
    assert_eq!(patched, right.to_snapshot());
}

/// A disposed effect no longer runs, and a disposed derived value keeps
/// answering with its last value.
#[test]
fn disposal_stops_propagation() {
    let signal = Signal::new(1);
    let runs = Arc::new(AtomicUsize::new(0));

    let effect = {
        let (signal, runs) = (signal.clone(), runs.clone());
        Effect::new(move || {
            signal.get();
            runs.fetch_add(1, Ordering::SeqCst);
        })
    };
    let frozen = {
        let signal = signal.clone();
        Derived::new(move || signal.get() * 3)
    };
    assert_eq!(frozen.get(), 3);

    effect.dispose();
    frozen.dispose();
    signal.set(2);

    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(frozen.get(), 3);
    assert_eq!(signal.subscriber_count(), 0);
}

/// Reads inside `untracked` never register, even inside an effect.
#[test]
fn untracked_reads_are_not_dependencies() {
    let tracked = Signal::new(0);
    let peeked = Signal::new(0);

    let effect = {
        let (tracked, peeked) = (tracked.clone(), peeked.clone());
        Effect::new(move || {
            tracked.get();
            untracked(|| peeked.get());
        })
    };

    peeked.set(1);
    assert_eq!(effect.run_count(), 1);
    tracked.set(1);
    assert_eq!(effect.run_count(), 2);
    assert_eq!(effect.dependency_count(), 1);
}

/// Concurrent computations on different threads keep separate tracking
/// stacks: each derived value only depends on what its own thread read.
#[test]
fn threads_track_independently() {
    let signals: Vec<_> = (0..4).map(Signal::new).collect();

    let handles: Vec<_> = signals
        .iter()
        .cloned()
        .map(|signal| {
            std::thread::spawn(move || {
                let derived = {
                    let signal = signal.clone();
                    Derived::new(move || {
                        std::thread::yield_now();
                        signal.get() + 1
                    })
                };
                let value = derived.get();
                assert_eq!(TrackingContext::depth(), 0);
                (value, derived.dependency_count())
            })
        })
        .collect();

    for (n, handle) in handles.into_iter().enumerate() {
        let (value, dependencies) = handle.join().unwrap();
        assert_eq!(value, n as i32 + 1);
        assert_eq!(dependencies, 1);
    }
}

/// Effects see collection writes made from another thread.
#[test]
fn collection_writes_cross_threads() {
    let collection = StateCollection::new("shared");
    let signal = collection.add_value("hits", json!(0));

    let seen = Arc::new(AtomicUsize::new(0));
    let _effect = {
        let (signal, seen) = (signal.clone(), seen.clone());
        Effect::new(move || {
            if let Some(hits) = signal.get().as_u64() {
                seen.store(hits as usize, Ordering::SeqCst);
            }
        })
    };

    let writer = {
        let collection = collection.clone();
        std::thread::spawn(move || collection.set("hits", json!(7)).unwrap())
    };
    writer.join().unwrap();

    assert_eq!(seen.load(Ordering::SeqCst), 7);
}
