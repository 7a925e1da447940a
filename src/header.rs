//! Packed tuple header word with a CAS spinlock and optimistic versioning.
//!
//! [`TupleHeader`] packs the lock bit, shape bit, lifecycle flags, and the
//! optimistic-read version counter into a single `AtomicU64`. Readers sample
//! the whole word atomically; writers modify it with a single CAS.
//!
//! # Concurrency Model
//! 1. Readers: call [`TupleHeader::stable`] to get a version, perform the
//!    read, call [`TupleHeader::check`]. A mismatch means a writer committed
//!    in between and the read must be retried.
//! 2. Writers: call [`TupleHeader::lock`] to get a [`HeaderGuard`], mutate
//!    the tuple, let the guard drop. The drop bumps the version counter and
//!    clears the lock in one release store.
//!
//! # Counter width
//! The word is native pointer width; the version counter occupies the 59
//! bits above the flags. A reader whose bracket spans exactly a multiple
//! of 2^59 writer commits would validate spuriously (ABA); at that width
//! the wrap is unreachable in practice, which is why the word is not the
//! narrower one a 32-bit header would give.

use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering, fence};

use crate::counters::{AVG_LOCK_ACQUIRE_SPINS, AVG_STABLE_VERSION_SPINS};
use crate::ordering::{CAS_FAILURE, CAS_SUCCESS, RELAXED, UNLOCK_ORD, VERSION_ORD, WRITE_ORD};

// ============================================================================
//  Bit layout
// ============================================================================
//
// [ version | latest | enqueued | deleting | big | locked ]
// [  5..64  |  4..5  |   3..4   |   2..3   | 1..2 | 0..1  ]

/// Lock bit: a writer owns the tuple.
pub(crate) const HDR_LOCKED: u64 = 1 << 0;

/// Shape bit: the tail carries a chain link before the record bytes.
/// Immutable for the lifetime of an instance.
pub(crate) const HDR_BIG: u64 = 1 << 1;

/// Deleting bit: the tuple has been handed to reclamation.
pub(crate) const HDR_DELETING: u64 = 1 << 2;

/// Reserved bit. Defined for layout compatibility, never set by any path.
pub(crate) const HDR_ENQUEUED: u64 = 1 << 3;

/// Latest bit: this tuple is the head of its version chain.
pub(crate) const HDR_LATEST: u64 = 1 << 4;

/// Low bit of the version counter.
pub(crate) const VERSION_LOWBIT: u64 = 1 << 5;

/// Mask covering the version counter (bits 5..64).
pub(crate) const VERSION_MASK: u64 = !(VERSION_LOWBIT - 1);

// ============================================================================
//  HeaderBits
// ============================================================================

/// One atomically sampled header word.
///
/// Flag accessors on the sample are consistent with each other and with the
/// record bytes read inside the same `stable`/`check` bracket, which the
/// read path relies on. The shape bit in particular must be tested on the
/// sample, not on a fresh load.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct HeaderBits(u64);

impl HeaderBits {
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn is_locked(self) -> bool {
        self.0 & HDR_LOCKED != 0
    }

    #[inline]
    #[must_use]
    pub const fn is_big(self) -> bool {
        self.0 & HDR_BIG != 0
    }

    #[inline]
    #[must_use]
    pub const fn is_deleting(self) -> bool {
        self.0 & HDR_DELETING != 0
    }

    #[inline]
    #[must_use]
    pub const fn is_enqueued(self) -> bool {
        self.0 & HDR_ENQUEUED != 0
    }

    #[inline]
    #[must_use]
    pub const fn is_latest(self) -> bool {
        self.0 & HDR_LATEST != 0
    }

    /// The optimistic-read sequence number (bits 5..64).
    #[inline]
    #[must_use]
    pub const fn version(self) -> u64 {
        (self.0 & VERSION_MASK) >> VERSION_LOWBIT.trailing_zeros()
    }
}

impl fmt::Debug for HeaderBits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut flags: Vec<&str> = Vec::new();
        if self.is_locked() {
            flags.push("locked");
        }
        if self.is_big() {
            flags.push("big");
        }
        if self.is_deleting() {
            flags.push("deleting");
        }
        if self.is_enqueued() {
            flags.push("enqueued");
        }
        if self.is_latest() {
            flags.push("latest");
        }
        write!(f, "HeaderBits[{} v={}]", flags.join("|"), self.version())
    }
}

// ============================================================================
//  TupleHeader
// ============================================================================

/// The packed header word of one tuple.
#[derive(Debug)]
pub struct TupleHeader {
    word: AtomicU64,
}

impl TupleHeader {
    /// Create a header for a freshly allocated tuple.
    #[must_use]
    pub(crate) const fn new(big: bool, latest: bool) -> Self {
        let mut initial: u64 = 0;
        if big {
            initial |= HDR_BIG;
        }
        if latest {
            initial |= HDR_LATEST;
        }
        Self {
            word: AtomicU64::new(initial),
        }
    }

    /// Create a header from a raw word.
    ///
    ///  WARN: ONLY FOR TESTING.
    #[must_use]
    pub const fn from_raw(word: u64) -> Self {
        Self {
            word: AtomicU64::new(word),
        }
    }

    /// Sample the word without any stability guarantee.
    ///
    /// The sample may have the lock bit set. Flag bits that only change
    /// under the lock (shape always, latest and deleting when the caller
    /// holds the lock) are still meaningful.
    #[inline]
    #[must_use]
    pub fn load(&self) -> HeaderBits {
        HeaderBits(self.word.load(RELAXED))
    }

    // ========================================================================
    //  Flag accessors
    // ========================================================================

    #[inline]
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.load().is_locked()
    }

    #[inline]
    #[must_use]
    pub fn is_big(&self) -> bool {
        self.load().is_big()
    }

    #[inline]
    #[must_use]
    pub fn is_deleting(&self) -> bool {
        self.load().is_deleting()
    }

    #[inline]
    #[must_use]
    pub fn is_latest(&self) -> bool {
        self.load().is_latest()
    }

    // ========================================================================
    //  Stable version (optimistic reads)
    // ========================================================================

    /// Spin until the lock bit is observed clear; return that sample.
    ///
    /// Unbounded: a reader calling this on a tuple whose lock it already
    /// holds spins forever. See the crate docs for the self-deadlock
    /// precondition.
    #[inline]
    #[must_use]
    pub fn stable(&self) -> HeaderBits {
        let mut spins: u64 = 0;
        let mut word: u64 = self.word.load(VERSION_ORD);
        while word & HDR_LOCKED != 0 {
            std::hint::spin_loop();
            spins += 1;
            word = self.word.load(VERSION_ORD);
        }
        AVG_STABLE_VERSION_SPINS.offer(spins);
        HeaderBits(word)
    }

    /// Bounded [`Self::stable`]: give up after `max_spins` attempts.
    ///
    /// Returns `None` when the budget is exhausted and the lock is still
    /// held. Callers treat that as "unknown" and fall back to conservative
    /// behavior.
    #[inline]
    #[must_use]
    pub fn try_stable(&self, max_spins: u32) -> Option<HeaderBits> {
        let mut budget: u32 = max_spins;
        let mut word: u64 = self.word.load(VERSION_ORD);
        while word & HDR_LOCKED != 0 {
            if budget == 0 {
                return None;
            }
            std::hint::spin_loop();
            budget -= 1;
            word = self.word.load(VERSION_ORD);
        }
        Some(HeaderBits(word))
    }

    /// Validate an optimistic bracket: true iff no writer committed since
    /// `sampled` was taken.
    ///
    /// The acquire fence keeps this load from being hoisted above the data
    /// reads that precede it in the bracket.
    #[inline]
    #[must_use]
    pub fn check(&self, sampled: HeaderBits) -> bool {
        fence(Ordering::Acquire);
        self.word.load(RELAXED) == sampled.0
    }

    // ========================================================================
    //  Lock
    // ========================================================================

    /// Spin-CAS the lock bit and return a guard proving ownership.
    ///
    /// The guard unlocks on drop (bumping the version counter), even during
    /// unwinding.
    #[must_use = "releasing a lock without using the guard is a logic error"]
    pub fn lock(&self) -> HeaderGuard<'_> {
        let mut spins: u64 = 0;
        let mut word: u64 = self.word.load(RELAXED);
        loop {
            if word & HDR_LOCKED == 0 {
                match self.word.compare_exchange_weak(
                    word,
                    word | HDR_LOCKED,
                    CAS_SUCCESS,
                    CAS_FAILURE,
                ) {
                    Ok(_) => break,
                    Err(current) => word = current,
                }
            } else {
                std::hint::spin_loop();
                word = self.word.load(RELAXED);
            }
            spins += 1;
        }
        AVG_LOCK_ACQUIRE_SPINS.offer(spins);
        debug_assert!(self.is_locked());
        HeaderGuard {
            header: self,
            word: HeaderBits(word | HDR_LOCKED),
            _marker: PhantomData,
        }
    }

    // ========================================================================
    //  Lifecycle flags (non-guard paths)
    // ========================================================================

    /// Mark a non-head tuple for reclamation.
    ///
    /// The lock on the latest version guards non-latest versions, so this
    /// needs no lock of its own. Marking a latest, unlocked tuple is a
    /// programming error; use [`HeaderGuard::mark_deleting`] for heads.
    pub(crate) fn mark_deleting(&self) {
        let word: u64 = self.word.load(RELAXED);
        debug_assert!(word & HDR_LATEST == 0 || word & HDR_LOCKED != 0);
        debug_assert!(word & HDR_ENQUEUED == 0);
        debug_assert!(word & HDR_DELETING == 0);
        self.word.fetch_or(HDR_DELETING, WRITE_ORD);
    }
}

// ============================================================================
//  HeaderGuard
// ============================================================================

/// Proof that the header lock is held.
///
/// Cannot be constructed except by [`TupleHeader::lock`]. Mutations that
/// require the lock take `&mut HeaderGuard` as evidence. Dropping the guard
/// increments the version counter and clears the lock bit in one release
/// store, publishing every write made under the lock.
///
/// Guards are `!Send + !Sync` via `PhantomData<*mut ()>`: the unlock must
/// happen on the locking thread.
#[derive(Debug)]
#[must_use = "releasing a lock without using the guard is a logic error"]
pub struct HeaderGuard<'a> {
    header: &'a TupleHeader,
    word: HeaderBits,
    _marker: PhantomData<*mut ()>,
}

impl Drop for HeaderGuard<'_> {
    fn drop(&mut self) {
        // Re-read rather than trusting the cached sample: flag mutations made
        // under this lock (set_latest, mark_deleting) must survive the
        // unlock. Counter wrap is plain u64 overflow; the flag bits sit
        // below the counter and are untouched by the add.
        let word: u64 = self.header.word.load(RELAXED);
        debug_assert!(word & HDR_LOCKED != 0);
        let unlocked: u64 = word.wrapping_add(VERSION_LOWBIT) & !HDR_LOCKED;
        self.header.word.store(unlocked, UNLOCK_ORD);
    }
}

impl HeaderGuard<'_> {
    /// The header word as it was at lock acquisition (lock bit set).
    ///
    /// Stays valid for the shape bit throughout; `set_latest` and
    /// `mark_deleting` refresh the cached flags they change.
    #[inline]
    #[must_use]
    pub fn word(&self) -> HeaderBits {
        self.word
    }

    /// Whether this guard locks `header`.
    #[inline]
    #[must_use]
    pub(crate) fn guards(&self, header: &TupleHeader) -> bool {
        std::ptr::eq(self.header, header)
    }

    /// Move the latest bit. Only the write path transfers headship.
    pub(crate) fn set_latest(&mut self, latest: bool) {
        let word: u64 = self.header.word.load(RELAXED);
        let updated: u64 = if latest {
            word | HDR_LATEST
        } else {
            word & !HDR_LATEST
        };
        self.header.word.store(updated, WRITE_ORD);
        self.word = HeaderBits(if latest {
            self.word.0 | HDR_LATEST
        } else {
            self.word.0 & !HDR_LATEST
        });
    }

    /// Mark the locked tuple for reclamation.
    pub(crate) fn mark_deleting(&mut self) {
        let word: u64 = self.header.word.load(RELAXED);
        debug_assert!(word & HDR_ENQUEUED == 0);
        debug_assert!(word & HDR_DELETING == 0);
        self.header.word.store(word | HDR_DELETING, WRITE_ORD);
        self.word = HeaderBits(self.word.0 | HDR_DELETING);
    }
}
