//! The write path: in-place overwrite vs. spill-and-replace.
//!
//! Every write lands in the latest (newest) version slot. Whether the
//! previous version survives is decided by the transaction layer's
//! overwrite oracle; whether the new bytes fit is decided by the inline
//! capacity. The four combinations:
//!
//! | overwrite? | fits? | action | returns |
//! |---|---|---|---|
//! | yes | yes | mutate in place | `(false, None)` |
//! | yes | no  | fresh head, self demoted but kept linked | `(false, Some(head))` |
//! | no  | yes, and big | current version shuffled into a fresh older node | `(true, None)` |
//! | no  | otherwise | fresh head, self demoted and linked | `(true, Some(head))` |
//!
//! Row three is the spill-in-place optimization: when the chain pointer is
//! already there and the new bytes fit our buffer, pushing the *old* bytes
//! backward saves replacing the head. Row two keeps the stale version
//! linked even though the oracle would have allowed dropping it; wasteful
//! but correct, and it keeps reclamation uniform.
//!
//! When a replacement head is returned, the caller must swing the index
//! pointer to it *before* dropping the old head's guard, so no reader can
//! observe an orphaned locked node.

use std::ptr::{self, NonNull};
use std::slice;

use crate::counters::{
    AVG_RECORD_SPILL_LEN, INPLACE_BUF_INSUFFICIENT, INPLACE_BUF_INSUFFICIENT_ON_SPILL,
    LOGICAL_DELETES, SPILLS,
};
use crate::header::HeaderGuard;
use crate::oracle::OverwriteOracle;
use crate::ordering::RELAXED;
use crate::trace::debug_log;
use crate::tuple::{MAX_CAPACITY, MAX_TID, MIN_TID, Tid, Tuple};

// ============================================================================
//  WriteOutcome
// ============================================================================

/// What [`Tuple::write_record_at`] did to the chain.
#[derive(Debug)]
#[must_use = "a replacement head must be swung into the index"]
pub struct WriteOutcome {
    /// A new older-version node was created and linked: either a spilled
    /// copy behind the head, or the demoted previous head itself.
    pub spilled: bool,

    /// A brand-new head was allocated. The caller must point the index at
    /// it and only then release the old head's lock. `None` means the head
    /// is unchanged.
    pub replacement: Option<NonNull<Tuple>>,
}

impl Tuple {
    /// Write `bytes` as the version at `t`. An empty `bytes` writes a
    /// tombstone.
    ///
    /// `guard` must be the lock on *this* tuple, and this tuple must be the
    /// chain head. TID ordering along the chain is the caller's contract:
    /// `t` must not be older than the TID already here.
    pub fn write_record_at<O>(
        &self,
        guard: &mut HeaderGuard<'_>,
        oracle: &O,
        t: Tid,
        bytes: &[u8],
    ) -> WriteOutcome
    where
        O: OverwriteOracle + ?Sized,
    {
        debug_assert!(guard.guards(self.header()), "guard locks a different tuple");
        debug_assert!(guard.word().is_latest(), "writes go through the head");
        debug_assert!(t != MIN_TID && t != MAX_TID, "sentinel TIDs are reserved");
        debug_assert!(bytes.len() <= MAX_CAPACITY);

        let v = guard.word();
        let sz: usize = bytes.len();
        if sz == 0 {
            LOGICAL_DELETES.inc();
        }

        if oracle.can_overwrite_record(self.tid(), t) {
            if sz <= self.capacity() {
                // Direct update: the version here can never be read again.
                self.tid.store(t, RELAXED);
                self.size.store(sz as u16, RELAXED);
                // SAFETY: lock held, sz <= capacity.
                unsafe { ptr::copy_nonoverlapping(bytes.as_ptr(), self.record_ptr(v), sz) };
                return WriteOutcome {
                    spilled: false,
                    replacement: None,
                };
            }

            // Too big for our buffer. Keep self in the chain (wasteful, but
            // not incorrect) so that cleanup stays uniform.
            let rep = Tuple::alloc(t, bytes, Some(NonNull::from(self)), true);
            guard.set_latest(false);
            INPLACE_BUF_INSUFFICIENT.inc();
            debug_log!(tid = t, size = sz, "overwrite outgrew buffer, new head");
            return WriteOutcome {
                spilled: false,
                replacement: Some(rep),
            };
        }

        // The version here may still be read; it has to survive the write.
        SPILLS.inc();
        AVG_RECORD_SPILL_LEN.offer(self.size() as u64);

        if v.is_big() && sz <= self.capacity() {
            // Spill in place: shuffle the current version backward into a
            // fresh older node, then reuse our own buffer for the new bytes.
            let record: *mut u8 = self.record_ptr(v);
            // SAFETY: lock held, so the current bytes are stable; size is
            // always <= capacity.
            let current: &[u8] = unsafe { slice::from_raw_parts(record, self.size()) };
            let spill = Tuple::alloc(self.tid(), current, self.next_ptr(v), false);
            self.set_next(Some(spill));
            self.tid.store(t, RELAXED);
            self.size.store(sz as u16, RELAXED);
            // SAFETY: lock held, sz <= capacity.
            unsafe { ptr::copy_nonoverlapping(bytes.as_ptr(), record, sz) };
            debug_log!(tid = t, size = sz, "spilled in place");
            return WriteOutcome {
                spilled: true,
                replacement: None,
            };
        }

        // Small shape (no link to adopt) or bytes outgrew the buffer:
        // demote self behind a fresh head.
        let rep = Tuple::alloc(t, bytes, Some(NonNull::from(self)), true);
        guard.set_latest(false);
        INPLACE_BUF_INSUFFICIENT_ON_SPILL.inc();
        debug_log!(tid = t, size = sz, "spilled into replacement head");
        WriteOutcome {
            spilled: true,
            replacement: Some(rep),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::ptr::NonNull;

    use crate::counters;
    use crate::oracle::{AlwaysOverwrite, NeverOverwrite};
    use crate::tuple::Tuple;

    unsafe fn free_chain(head: NonNull<Tuple>) {
        let mut cur = Some(head);
        while let Some(p) = cur {
            cur = unsafe { p.as_ref().next() };
            unsafe { Tuple::release_no_rcu(p) };
        }
    }

    #[test]
    fn test_overwrite_in_place_keeps_address() {
        let node = Tuple::alloc_first(false, 8);
        let t = unsafe { node.as_ref() };

        let mut lock = t.header().lock();
        let outcome = t.write_record_at(&mut lock, &AlwaysOverwrite, 3, b"aaa");
        assert!(!outcome.spilled);
        assert!(outcome.replacement.is_none());
        let outcome = t.write_record_at(&mut lock, &AlwaysOverwrite, 4, b"bbbb");
        assert!(!outcome.spilled);
        assert!(outcome.replacement.is_none());
        drop(lock);

        // Same node, still latest, still chainless: nothing was allocated.
        assert_eq!(t.tid(), 4);
        assert_eq!(t.size(), 4);
        assert!(t.header().is_latest());
        assert!(t.next().is_none());

        unsafe { Tuple::release_no_rcu(node) };
    }

    #[test]
    fn test_overwrite_outgrowing_buffer_replaces_head() {
        let node = Tuple::alloc_first(false, 0);
        let t = unsafe { node.as_ref() };
        let big = vec![0x5a_u8; t.capacity() + 1];

        let mut lock = t.header().lock();
        let outcome = t.write_record_at(&mut lock, &AlwaysOverwrite, 5, &big);
        assert!(!outcome.spilled);
        let rep = outcome.replacement.expect("must allocate a wider head");
        drop(lock);

        let r = unsafe { rep.as_ref() };
        assert!(r.header().is_latest());
        assert!(!t.header().is_latest());
        assert_eq!(r.next(), Some(node));
        assert_eq!(r.tid(), 5);
        assert_eq!(r.size(), big.len());

        unsafe { free_chain(rep) };
    }

    #[test]
    fn test_spill_in_place_extends_chain_behind_head() {
        // Big head so the spill-in-place row applies.
        let node = Tuple::alloc_first(true, 16);
        let t = unsafe { node.as_ref() };

        {
            let mut lock = t.header().lock();
            let _ = t.write_record_at(&mut lock, &AlwaysOverwrite, 10, b"first");
        }
        let spills_before = counters::snapshot().spills;
        {
            let mut lock = t.header().lock();
            let outcome = t.write_record_at(&mut lock, &NeverOverwrite, 20, b"second");
            assert!(outcome.spilled);
            assert!(outcome.replacement.is_none(), "head must stay in place");
        }

        assert_eq!(t.tid(), 20);
        assert!(t.header().is_latest());
        let older = unsafe { t.next().expect("spill node linked").as_ref() };
        assert_eq!(older.tid(), 10);
        assert_eq!(older.size(), 5);
        assert!(!older.header().is_latest());
        assert!(older.next().is_none());
        assert!(counters::snapshot().spills > spills_before);

        unsafe { free_chain(node) };
    }

    #[test]
    fn test_spill_from_small_head_replaces_head() {
        let node = Tuple::alloc_first(false, 8);
        let t = unsafe { node.as_ref() };

        {
            let mut lock = t.header().lock();
            let _ = t.write_record_at(&mut lock, &AlwaysOverwrite, 10, b"v1");
        }
        let rep = {
            let mut lock = t.header().lock();
            let outcome = t.write_record_at(&mut lock, &NeverOverwrite, 20, b"v2");
            assert!(outcome.spilled);
            outcome.replacement.expect("small head cannot adopt a link")
        };

        let r = unsafe { rep.as_ref() };
        assert_eq!(r.next(), Some(node));
        assert_eq!(unsafe { node.as_ref() }.tid(), 10);
        assert!(!unsafe { node.as_ref() }.header().is_latest());

        unsafe { free_chain(rep) };
    }

    #[test]
    fn test_tombstone_write_counts_logical_delete() {
        let node = Tuple::alloc_first(false, 8);
        let t = unsafe { node.as_ref() };
        let deletes_before = counters::snapshot().logical_deletes;

        {
            let mut lock = t.header().lock();
            let _ = t.write_record_at(&mut lock, &AlwaysOverwrite, 2, b"x");
            let outcome = t.write_record_at(&mut lock, &AlwaysOverwrite, 3, b"");
            assert!(!outcome.spilled);
        }

        assert_eq!(t.size(), 0);
        assert_eq!(t.tid(), 3);
        assert!(counters::snapshot().logical_deletes > deletes_before);

        unsafe { Tuple::release_no_rcu(node) };
    }

    #[test]
    fn test_chain_tids_non_increasing_after_mixed_writes() {
        let mut head = Tuple::alloc_first(false, 4);
        for (i, overwrite) in [true, false, false, true, false].into_iter().enumerate() {
            let tid = (i as u64 + 1) * 10;
            let payload = vec![i as u8; 4 + i * 7];
            let t = unsafe { head.as_ref() };
            let mut lock = t.header().lock();
            let outcome = if overwrite {
                t.write_record_at(&mut lock, &AlwaysOverwrite, tid, &payload)
            } else {
                t.write_record_at(&mut lock, &NeverOverwrite, tid, &payload)
            };
            if let Some(rep) = outcome.replacement {
                head = rep;
            }
            drop(lock);
        }

        let mut latest_count = 0;
        let mut last_tid = u64::MAX;
        let mut cur = Some(head);
        while let Some(p) = cur {
            let node = unsafe { p.as_ref() };
            if node.header().is_latest() {
                latest_count += 1;
            }
            assert!(node.tid() <= last_tid, "chain must be newest-first");
            last_tid = node.tid();
            cur = node.next();
        }
        assert_eq!(latest_count, 1, "exactly one head per chain");

        unsafe { free_chain(head) };
    }
}
