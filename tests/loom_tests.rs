//! Loom-based concurrency tests
//!
//! These tests use the `loom` library to exhaustively check the thread
//! interleavings of the counting protocol and the lock-free link list.
//!
//! Run with: `cargo test --features loom --test loom_tests --release`

#![cfg(feature = "loom")]

use loom::sync::Arc;
use loom::sync::atomic::{AtomicUsize, Ordering};
use loom::thread;
use refc::{Ref, TrackingMemory};

fn counting_block(calls: &Arc<AtomicUsize>) -> Ref {
    let calls = calls.clone();
    Ref::allocate_with_destructor(8, move |_: &mut [u8]| {
        calls.fetch_add(1, Ordering::SeqCst);
    })
    .unwrap()
}

/// Test: Two owners releasing concurrently destroy the block exactly once
#[test]
fn loom_concurrent_release_destroys_once() {
    loom::model(|| {
        let calls = Arc::new(AtomicUsize::new(0));
        let block = counting_block(&calls);
        let other = block.retain();

        let handle = thread::spawn(move || {
            other.release();
        });

        block.release();
        handle.join().unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    });
}

/// Test: A retain racing with a release never lets the block die early
#[test]
fn loom_retain_races_release() {
    loom::model(|| {
        let calls = Arc::new(AtomicUsize::new(0));
        let block = counting_block(&calls);
        let shared = block.retain();

        let handle = thread::spawn(move || {
            let extra = shared.retain();
            drop(shared);
            assert!(extra.count() >= 1);
            extra
        });

        block.release();
        let extra = handle.join().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        extra.release();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    });
}

/// Test: Payload writes by one owner are visible to the destructor run by another
#[test]
fn loom_destructor_sees_payload_writes() {
    loom::model(|| {
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = seen.clone();
        let block = Ref::allocate_with_destructor(1, move |payload: &mut [u8]| {
            seen_clone.store(payload[0] as usize, Ordering::SeqCst);
        })
        .unwrap();
        let writer = block.retain();

        let handle = thread::spawn(move || {
            unsafe { writer.access().as_ptr().write(9) };
            writer.release();
        });

        block.release();
        handle.join().unwrap();

        assert_eq!(seen.load(Ordering::SeqCst), 9);
    });
}

/// Test: Concurrent pushes onto one link list are both kept
#[cfg(feature = "cycle-guard")]
#[test]
fn loom_concurrent_links_are_both_recorded() {
    loom::model(|| {
        let parent = Ref::allocate(8).unwrap();
        let first = Ref::allocate(8).unwrap();
        let second = Ref::allocate(8).unwrap();

        let parent_clone = parent.retain();
        let handle = thread::spawn(move || {
            parent_clone.link(&first).unwrap();
        });

        parent.link(&second).unwrap();
        handle.join().unwrap();

        assert_eq!(parent.link_count(), 2);
    });
}

/// Test: Racing unlinks of a single edge claim it exactly once
#[cfg(feature = "cycle-guard")]
#[test]
fn loom_racing_unlinks_claim_once() {
    loom::model(|| {
        let parent = Ref::allocate(8).unwrap();
        let child = Ref::allocate(8).unwrap();
        parent.link(&child).unwrap();

        let (p, c) = (parent.retain(), child.retain());
        let handle = thread::spawn(move || p.unlink(&c).is_ok());

        let here = parent.unlink(&child).is_ok();
        let there = handle.join().unwrap();

        assert!(here ^ there);
        assert_eq!(parent.link_count(), 0);
    });
}

/// Test: A cycle search walking through a block whose last owner is going away
#[cfg(feature = "cycle-guard")]
#[test]
fn loom_search_through_dying_block() {
    loom::model(|| {
        let memory = TrackingMemory::new();
        let a = Ref::allocate_in(8, memory.clone()).unwrap();
        let b = Ref::allocate_in(8, memory.clone()).unwrap();
        let c = Ref::allocate_in(8, memory.clone()).unwrap();
        c.link(&b).unwrap();
        b.link(&a).unwrap();

        let handle = thread::spawn(move || {
            b.release();
        });

        // Rejected only if the search saw b -> a before b died.
        let _ = a.link(&c);
        handle.join().unwrap();

        // Once b is gone its edge no longer counts.
        assert!(a.link(&c).is_ok());

        drop((a, c));
        assert_eq!(memory.live_allocations(), 0);
    });
}

/// Test: A search racing an unlink and destruction of the block it walks through
#[cfg(feature = "cycle-guard")]
#[test]
fn loom_search_races_unlink_and_destroy() {
    loom::model(|| {
        let memory = TrackingMemory::new();
        let a = Ref::allocate_in(8, memory.clone()).unwrap();
        let b = Ref::allocate_in(8, memory.clone()).unwrap();
        let c = Ref::allocate_in(8, memory.clone()).unwrap();
        a.link(&b).unwrap();

        let a_clone = a.retain();
        let handle = thread::spawn(move || {
            a_clone.unlink(&b).unwrap();
            drop(b);
        });

        assert!(c.link(&a).is_ok());
        handle.join().unwrap();

        drop((a, c));
        assert_eq!(memory.live_allocations(), 0);
    });
}
