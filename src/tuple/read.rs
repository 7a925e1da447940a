//! Optimistic snapshot reads over the version chain.
//!
//! # Protocol
//!
//! ```text
//! 1. v = hdr.stable()                 // spin past any writer
//! 2. next = next_ptr(v)               // shape comes from the sample
//! 3. visible = tid <= t               // plus the require-latest rule
//! 4. copy tid + record bytes out
//! 5. hdr.check(v) or retry this node
//! 6. hit: done; miss: follow next, or report the implicit tombstone
//! ```
//!
//! Readers never block, never allocate, and never take the lock. The
//! require-latest rule makes a reader that raced a head replacement fail
//! fast instead of trusting a demoted node; the caller re-fetches the head
//! from the index and retries.
//!
//! # Preconditions
//!
//! `stable_read` spins forever if the calling thread holds this tuple's
//! lock. It must also run inside an SMR epoch of the collector that
//! reclaims these tuples; the `&LocalGuard` parameter is that evidence.

use std::ptr;

use seize::LocalGuard;

use crate::counters::AVG_READ_RETRIES;
use crate::prefetch::prefetch_read;
use crate::tuple::{MIN_TID, Tid, Tuple};

/// Spin budget for the bounded probes.
const PROBE_SPINS: u32 = 16;

impl Tuple {
    /// Read the version visible at snapshot `t`, copying at most
    /// `out.len()` bytes of it into `out`.
    ///
    /// Returns the version's TID and the copied length. A result of
    /// `(MIN_TID, 0)` means the record did not exist at `t`: either the
    /// visible version is a tombstone, or the chain ended before a visible
    /// version was found. Reclamation only unlinks versions no consistent
    /// snapshot can still need, so running off the end of the chain proves
    /// absence.
    ///
    /// Returns `None` only when this tuple stopped being the chain head
    /// before the read could complete; the caller must re-fetch the head
    /// pointer from the index and retry there.
    pub fn stable_read(
        &self,
        t: Tid,
        out: &mut [u8],
        _guard: &LocalGuard<'_>,
    ) -> Option<(Tid, usize)> {
        debug_assert!(!out.is_empty(), "zero-length read buffer");

        let mut retries: u64 = 0;
        let mut require_latest: bool = true;
        let mut node: &Tuple = self;

        let result = loop {
            let v = node.header().stable();
            let next = node.next_ptr(v);
            let found: bool = node.is_not_behind(t);

            if found && require_latest && !v.is_latest() {
                break None;
            }

            let mut out_tid: Tid = MIN_TID;
            let mut len: usize = 0;
            if found {
                out_tid = node.tid();
                len = node.size().min(out.len());
                // SAFETY: the copy stays within this node's inline buffer
                // (every stored size is <= capacity) and within `out`. A
                // writer may race the copy; `check` below rejects the
                // bracket and the bytes are discarded unread.
                unsafe { ptr::copy_nonoverlapping(node.record_ptr(v), out.as_mut_ptr(), len) };
            }

            if let Some(p) = next {
                prefetch_read(p.as_ptr());
            }

            if !node.header().check(v) {
                retries += 1;
                continue;
            }

            if found {
                break Some((out_tid, len));
            }
            match next {
                // SAFETY: a link observed inside a validated bracket points
                // at a chain node that cannot be freed before every epoch
                // that could observe it (including ours) has passed.
                Some(p) => {
                    node = unsafe { p.as_ref() };
                    require_latest = false;
                }
                None => break Some((MIN_TID, 0)),
            }
        };

        AVG_READ_RETRIES.offer(retries);
        result
    }

    /// Unlocked probe: is this the latest version, and visible at `t`?
    ///
    /// No stability bracket; only meaningful where the caller already
    /// synchronizes (e.g. under the lock, or single-threaded).
    #[inline]
    #[must_use]
    pub fn is_latest_version(&self, t: Tid) -> bool {
        self.header().is_latest() && self.is_not_behind(t)
    }

    /// Bounded stable probe for read-set validation: is this still the
    /// latest version, visible at `t`?
    ///
    /// Returns `false` on spin exhaustion or a version change instead of
    /// retrying; the caller treats that as "unknown, assume not latest".
    #[must_use]
    pub fn stable_is_latest_version(&self, t: Tid) -> bool {
        let Some(v) = self.header().try_stable(PROBE_SPINS) else {
            return false;
        };
        let ret: bool = v.is_latest() && self.is_not_behind(t);
        // Only pay for the validation when the answer would be true; a
        // version change fails the probe either way.
        ret && self.header().check(v)
    }

    /// Unlocked probe: is the latest version a tombstone?
    #[inline]
    #[must_use]
    pub fn latest_value_is_nil(&self) -> bool {
        self.header().is_latest() && self.size() == 0
    }

    /// Bounded stable variant of [`Self::latest_value_is_nil`].
    #[must_use]
    pub fn stable_latest_value_is_nil(&self) -> bool {
        let Some(v) = self.header().try_stable(PROBE_SPINS) else {
            return false;
        };
        let ret: bool = v.is_latest() && self.size() == 0;
        ret && self.header().check(v)
    }
}
