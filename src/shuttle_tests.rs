//! Shuttle schedule-exploration tests for the chain handoff protocol.
//!
//! Shuttle randomizes thread schedules over many iterations. Where the
//! loom model covers the seqlock bracket exhaustively, this model covers
//! the part loom's state space cannot afford: a reader racing a head
//! replacement must either see the new head's value or observe the old
//! head demoted and retry, never a stale value presented as latest.
//!
//! Run with: `cargo test --features shuttle shuttle`

use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};

use shuttle::sync::Arc;
use shuttle::thread;

/// Reduced head node: a TID-stamped value plus a latest flag.
struct Node {
    tid: u64,
    value: u64,
    latest: AtomicBool,
    next: *const Node,
}

struct Slot {
    head: AtomicPtr<Node>,
}

// SAFETY: nodes are immutable after publication except `latest`, which is
// atomic; the test leaks them, so no reclamation races exist.
unsafe impl Send for Slot {}
unsafe impl Sync for Slot {}

impl Slot {
    /// Reader: walk from the index head, honoring the require-latest rule.
    fn read(&self, snapshot: u64) -> (u64, u64) {
        loop {
            let head = self.head.load(Ordering::Acquire);
            // SAFETY: leaked nodes, always valid.
            let node = unsafe { &*head };
            if node.tid <= snapshot {
                if !node.latest.load(Ordering::Acquire) {
                    // Demoted under us; the index must have a newer head.
                    thread::yield_now();
                    continue;
                }
                return (node.tid, node.value);
            }
            let mut cur = node.next;
            while !cur.is_null() {
                // SAFETY: as above.
                let older = unsafe { &*cur };
                if older.tid <= snapshot {
                    return (older.tid, older.value);
                }
                cur = older.next;
            }
            return (0, 0);
        }
    }

    /// Writer: replace the head, demoting the old one only after the swing.
    fn replace_head(&self, tid: u64, value: u64) {
        let old = self.head.load(Ordering::Acquire);
        let new = Box::into_raw(Box::new(Node {
            tid,
            value,
            latest: AtomicBool::new(true),
            next: old,
        }));
        self.head.store(new, Ordering::Release);
        // SAFETY: leaked nodes, always valid.
        unsafe { &*old }.latest.store(false, Ordering::Release);
    }
}

#[test]
fn shuttle_reader_races_head_replacement() {
    shuttle::check_random(
        || {
            let first = Box::into_raw(Box::new(Node {
                tid: 1,
                value: 10,
                latest: AtomicBool::new(true),
                next: std::ptr::null(),
            }));
            let slot = Arc::new(Slot {
                head: AtomicPtr::new(first),
            });

            let writer = {
                let slot = Arc::clone(&slot);
                thread::spawn(move || {
                    slot.replace_head(2, 20);
                })
            };
            let reader = {
                let slot = Arc::clone(&slot);
                thread::spawn(move || {
                    let (tid, value) = slot.read(u64::MAX);
                    assert!(tid == 1 || tid == 2);
                    assert_eq!(value, tid * 10);
                })
            };

            writer.join().unwrap();
            reader.join().unwrap();

            // After the writer finished, a fresh read must see the new head.
            let (tid, value) = slot.read(u64::MAX);
            assert_eq!((tid, value), (2, 20));
        },
        500,
    );
}

#[test]
fn shuttle_old_snapshot_survives_replacement() {
    shuttle::check_random(
        || {
            let first = Box::into_raw(Box::new(Node {
                tid: 5,
                value: 50,
                latest: AtomicBool::new(true),
                next: std::ptr::null(),
            }));
            let slot = Arc::new(Slot {
                head: AtomicPtr::new(first),
            });

            let writer = {
                let slot = Arc::clone(&slot);
                thread::spawn(move || slot.replace_head(9, 90))
            };
            let reader = {
                let slot = Arc::clone(&slot);
                thread::spawn(move || {
                    // Snapshot below the new TID: the answer may not change
                    // no matter how the race resolves.
                    assert_eq!(slot.read(5), (5, 50));
                })
            };

            writer.join().unwrap();
            reader.join().unwrap();
        },
        500,
    );
}
