//! Tuple retirement through the SMR runtime.
//!
//! Tuples are never freed synchronously while concurrent readers can
//! exist: [`Tuple::release`] marks the deleting bit and hands the pointer
//! to seize, which runs [`reclaim_tuple`] only after every thread that
//! could have observed the pointer has left its epoch. The synchronous
//! [`Tuple::release_no_rcu`] exists for shutdown and tests, where no
//! reader is possible.

use std::ptr::NonNull;

use seize::{Collector, Guard, LocalGuard};

use crate::trace::trace_log;
use crate::tuple::Tuple;

impl Tuple {
    /// Mark `this` deleting and defer its free to the collector behind
    /// `smr`.
    ///
    /// # Safety
    /// - `this` came from this crate's allocation paths and has not been
    ///   released before.
    /// - `this` is no longer the chain head, or the caller holds its lock:
    ///   the lock on the latest version is what guards non-latest versions.
    /// - `smr` belongs to the collector whose epochs protect every reader
    ///   of this chain.
    pub unsafe fn release(this: NonNull<Tuple>, smr: &LocalGuard<'_>) {
        // SAFETY: `this` is live per the caller contract.
        unsafe { this.as_ref() }.header().mark_deleting();
        trace_log!(tuple = ?this.as_ptr(), "deferred release");
        // SAFETY: reclaim_tuple runs after all epochs that could observe
        // `this` have passed; nothing dereferences it afterwards.
        unsafe { smr.defer_retire(this.as_ptr(), reclaim_tuple) };
    }

    /// Free `this` immediately, without the SMR detour.
    ///
    /// # Safety
    /// No other thread can hold or obtain a reference to `this`: shutdown,
    /// failed-allocation unwinding, or single-threaded tests.
    pub unsafe fn release_no_rcu(this: NonNull<Tuple>) {
        #[cfg(debug_assertions)]
        {
            // Walk the same state machine the deferred path does, so the
            // invariant checks in reclaim stay meaningful.
            let t: &Tuple = unsafe { this.as_ref() };
            let mut guard = t.header().lock();
            guard.mark_deleting();
            drop(guard);
        }
        // SAFETY: exclusive access per the caller contract.
        unsafe { Tuple::dealloc(this) };
    }

    /// Retire this tuple and every older version reachable from it.
    ///
    /// Takes the head's lock to mark it deleting; the rest of the chain is
    /// guarded by that lock and is marked without one. After this returns
    /// no structural invariant holds on the chain, but readers that
    /// entered their epoch before the call may still traverse it until
    /// they leave.
    ///
    /// # Safety
    /// - `self` points into a live chain this thread is entitled to retire
    ///   (the index no longer hands it out, or is about to stop).
    /// - The calling thread does not hold any lock in this chain.
    /// - `smr` belongs to the collector protecting this chain's readers.
    pub unsafe fn gc_chain(&self, smr: &LocalGuard<'_>) {
        {
            let mut guard = self.header().lock();
            guard.mark_deleting();
        }
        let mut next = self.next();
        trace_log!(head = ?std::ptr::from_ref(self), "gc_chain");
        // SAFETY: deferred per the caller contract, as in `release`.
        unsafe { smr.defer_retire(std::ptr::from_ref(self).cast_mut(), reclaim_tuple) };

        while let Some(node) = next {
            // SAFETY: chain nodes stay allocated at least until the epochs
            // protecting them pass; ours is still open.
            let t: &Tuple = unsafe { node.as_ref() };
            next = t.next();
            t.header().mark_deleting();
            // SAFETY: as above.
            unsafe { smr.defer_retire(node.as_ptr(), reclaim_tuple) };
        }
    }
}

/// Seize reclaim callback: the deferred destructor of one tuple.
///
/// # Safety
/// Called by the collector once no thread can observe `ptr`.
pub(crate) unsafe fn reclaim_tuple(ptr: *mut Tuple, _collector: &Collector) {
    // SAFETY: the collector guarantees exclusive access here.
    let t: &Tuple = unsafe { &*ptr };
    let v = t.header().load();
    debug_assert!(v.is_deleting(), "reclaiming a tuple never released");
    debug_assert!(!v.is_locked(), "reclaiming a locked tuple");
    // SAFETY: `ptr` came from the tuple allocation paths (release contract)
    // and nothing can reach it anymore.
    unsafe { Tuple::dealloc(NonNull::new_unchecked(ptr)) };
}
