//! The versioned record cell: layout, allocation, and field access.
//!
//! A [`Tuple`] is the value an MVCC transaction layer sticks into an
//! underlying non-transactional index. It owns the record bytes of one
//! version, the concurrency metadata that lets readers snapshot without
//! blocking writers, and (in the big shape) the link to the next-older
//! version.
//!
//! # Layout
//!
//! Each tuple is one contiguous raw allocation:
//!
//! ```text
//! small:  [ TupleHeader | tid | size | capacity ] [ record bytes... ]
//! big:    [ TupleHeader | tid | size | capacity ] [ next ] [ record bytes... ]
//! ```
//!
//! The shape is chosen at allocation time and encoded in the header's big
//! bit; it never changes for a live instance. Fresh tuples created on first
//! index insertion are small (no chain yet, save the link word); every
//! tuple allocated by the write path is big. Capacity requests are rounded
//! up to a multiple of 16 so the bytes the allocator would round away
//! internally become usable record space, and are capped at
//! [`MAX_CAPACITY`].
//!
//! # Field protocol
//!
//! `tid`, `size`, the record bytes, and the chain link are mutated only by
//! the thread holding the header lock. Readers access them inside a
//! `stable`/`check` bracket; a failed check discards whatever was read.
//! `capacity` and the shape are immutable after allocation.

mod read;
mod reclaim;
mod write;

use std::alloc::{Layout, alloc, dealloc, handle_alloc_error};
use std::fmt;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, AtomicU16, AtomicU64};

use crate::counters::{BYTES_ALLOCATED, BYTES_FREED, PHYSICAL_DELETES, TUPLE_CREATES};
use crate::header::{HeaderBits, TupleHeader};
use crate::ordering::{READ_ORD, RELAXED, WRITE_ORD};

pub use write::WriteOutcome;

// ============================================================================
//  TID
// ============================================================================

/// Uninterpreted monotonic transaction timestamp. Comparison-only semantics
/// within this crate.
///
/// 64 bits wide, so counter wrap-around is unreachable in practice and
/// [`MIN_TID`] can serve as the pre-existence sentinel without ambiguity.
pub type Tid = u64;

/// Sentinel: no value ever existed at this TID (tombstone readthrough).
/// Never a valid write TID.
pub const MIN_TID: Tid = 0;

/// Reserved sentinel, handy as an "every version visible" snapshot bound.
/// Never a valid write TID.
pub const MAX_TID: Tid = Tid::MAX;

// ============================================================================
//  Sizing
// ============================================================================

/// Maximum inline record capacity of a single tuple.
///
/// Capacities are stored in a `u16` on purpose: version chains are built
/// from many small nodes and the header should stay one cache line.
pub const MAX_CAPACITY: usize = u16::MAX as usize;

/// Size of the chain-link slot in the big shape.
const LINK_SIZE: usize = size_of::<AtomicPtr<Tuple>>();

/// Round an allocation request up to the next multiple of 16 (lg-base-4
/// bucket). The allocator rounds internally anyway; claiming the slack as
/// capacity turns internal fragmentation into usable record space.
#[inline]
const fn bucketed(raw: usize) -> usize {
    (raw + 15) & !15
}

/// Fixed prefix size for a shape.
#[inline]
const fn base_size(big: bool) -> usize {
    size_of::<Tuple>() + if big { LINK_SIZE } else { 0 }
}

// ============================================================================
//  Tuple
// ============================================================================

/// One versioned record cell. See the module docs for the layout.
///
/// `Tuple` is always handled by reference or [`NonNull`] pointer into its
/// raw allocation; it is never constructed on the stack. The index layer
/// owns the head pointer of each chain, each tuple owns its tail, and
/// readers hold borrows protected by the SMR epoch they entered.
#[repr(C)]
pub struct Tuple {
    hdr: TupleHeader,
    tid: AtomicU64,
    size: AtomicU16,
    capacity: u16,
}

impl Tuple {
    // ========================================================================
    //  Allocation
    // ========================================================================

    /// Allocate a fresh, empty-tombstone head: `tid = MIN_TID`, `size = 0`,
    /// latest set.
    ///
    /// This is the shape of every logical record at birth; the first real
    /// write fills it in place or spills past it. `cap_hint` is rounded up
    /// to a bucket and clamped at [`MAX_CAPACITY`]. Pass `big = false`
    /// unless the caller already knows older versions must be retained.
    ///
    /// The returned tuple must eventually be handed back through
    /// [`Tuple::release`] or [`Tuple::release_no_rcu`].
    #[must_use]
    pub fn alloc_first(big: bool, cap_hint: usize) -> NonNull<Tuple> {
        let base: usize = base_size(big);
        let actual: usize = bucketed(base + cap_hint).min(base + MAX_CAPACITY);
        let capacity: u16 = (actual - base) as u16;

        let node: NonNull<Tuple> = Self::alloc_raw(actual);
        // SAFETY: `alloc_raw` returned `actual` fresh bytes aligned for
        // `Tuple`; the prefix and (for big) the link slot are initialized
        // before the pointer escapes.
        unsafe {
            node.as_ptr().write(Tuple {
                hdr: TupleHeader::new(big, true),
                tid: AtomicU64::new(MIN_TID),
                size: AtomicU16::new(0),
                capacity,
            });
            if big {
                node.as_ref()
                    .link_slot_ptr()
                    .write(AtomicPtr::new(ptr::null_mut()));
            }
        }
        TUPLE_CREATES.inc();
        BYTES_ALLOCATED.add(actual as u64);
        node
    }

    /// Allocate a big tuple carrying `bytes` at `tid`, linked to `next`.
    ///
    /// Used by the write path for replacement heads (`set_latest = true`)
    /// and spilled older versions (`set_latest = false`).
    #[must_use]
    pub(crate) fn alloc(
        tid: Tid,
        bytes: &[u8],
        next: Option<NonNull<Tuple>>,
        set_latest: bool,
    ) -> NonNull<Tuple> {
        debug_assert!(bytes.len() <= MAX_CAPACITY);

        let base: usize = base_size(true);
        let actual: usize = bucketed(base + bytes.len()).min(base + MAX_CAPACITY);
        let capacity: u16 = (actual - base) as u16;
        debug_assert!(bytes.len() <= capacity as usize);

        let node: NonNull<Tuple> = Self::alloc_raw(actual);
        // SAFETY: as in `alloc_first`; the record copy stays within
        // `capacity` bytes of the tail.
        unsafe {
            node.as_ptr().write(Tuple {
                hdr: TupleHeader::new(true, set_latest),
                tid: AtomicU64::new(tid),
                size: AtomicU16::new(bytes.len() as u16),
                capacity,
            });
            let t: &Tuple = node.as_ref();
            t.link_slot_ptr()
                .write(AtomicPtr::new(next.map_or(ptr::null_mut(), NonNull::as_ptr)));
            ptr::copy_nonoverlapping(bytes.as_ptr(), t.record_ptr(t.hdr.load()), bytes.len());
        }
        TUPLE_CREATES.inc();
        BYTES_ALLOCATED.add(actual as u64);
        node
    }

    fn alloc_raw(actual: usize) -> NonNull<Tuple> {
        let layout: Layout = Self::layout_for(actual);
        // SAFETY: `layout` has non-zero size (the prefix alone is 24 bytes).
        let raw: *mut u8 = unsafe { alloc(layout) };
        let Some(node) = NonNull::new(raw.cast::<Tuple>()) else {
            handle_alloc_error(layout)
        };
        node
    }

    /// Free a tuple. The memory is gone after this returns.
    ///
    /// # Safety
    /// `this` must have come from [`Tuple::alloc_first`] or [`Tuple::alloc`]
    /// and must be unreachable by every thread.
    pub(crate) unsafe fn dealloc(this: NonNull<Tuple>) {
        // SAFETY: caller guarantees exclusive access to a live allocation.
        let (big, capacity) = unsafe {
            let t: &Tuple = this.as_ref();
            (t.hdr.is_big(), t.capacity as usize)
        };
        // The allocation size is exactly recomputable: capacity was defined
        // as the rounded size minus the fixed prefix.
        let actual: usize = base_size(big) + capacity;
        PHYSICAL_DELETES.inc();
        BYTES_FREED.add(actual as u64);
        // SAFETY: same layout the allocation was made with; no field of
        // `Tuple` owns memory, so no drop glue is needed.
        unsafe { dealloc(this.as_ptr().cast::<u8>(), Self::layout_for(actual)) };
    }

    fn layout_for(actual: usize) -> Layout {
        // Infallible: `actual` is bounded by MAX_CAPACITY plus the prefix.
        Layout::from_size_align(actual, align_of::<Tuple>()).expect("tuple layout within bounds")
    }

    // ========================================================================
    //  Field access
    // ========================================================================

    /// The packed header word.
    #[inline]
    #[must_use]
    pub fn header(&self) -> &TupleHeader {
        &self.hdr
    }

    /// TID of the carried version. Stable only under the lock or inside a
    /// validated bracket.
    #[inline]
    #[must_use]
    pub fn tid(&self) -> Tid {
        self.tid.load(RELAXED)
    }

    /// Live record length in bytes. `0` means this version is a tombstone.
    #[inline]
    #[must_use]
    pub fn size(&self) -> usize {
        self.size.load(RELAXED) as usize
    }

    /// Bytes available in the inline tail. Immutable.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity as usize
    }

    /// Whether this version is visible at snapshot `t`.
    #[inline]
    pub(crate) fn is_not_behind(&self, t: Tid) -> bool {
        self.tid() <= t
    }

    // ========================================================================
    //  Tail access
    // ========================================================================

    /// First byte past the fixed prefix, inside this tuple's allocation.
    #[inline]
    fn tail_ptr(&self) -> *mut u8 {
        // SAFETY: the tail is part of the same allocation as `self`; the
        // offset is in bounds by construction.
        unsafe { ptr::from_ref(self).cast_mut().cast::<u8>().add(size_of::<Tuple>()) }
    }

    /// The chain-link slot. Big shape only; the slot does not exist on
    /// small tuples.
    #[inline]
    fn link_slot_ptr(&self) -> *mut AtomicPtr<Tuple> {
        debug_assert!(self.hdr.is_big());
        self.tail_ptr().cast::<AtomicPtr<Tuple>>()
    }

    #[inline]
    fn link_slot(&self) -> &AtomicPtr<Tuple> {
        // SAFETY: the slot was initialized at allocation for every big
        // tuple and is aligned (the prefix size is a multiple of 8).
        unsafe { &*self.link_slot_ptr() }
    }

    /// Start of the record bytes, for the shape encoded in `v`.
    ///
    /// `v` must be a sample of this tuple's header; the shape bit is
    /// immutable, so any sample works.
    #[inline]
    pub(crate) fn record_ptr(&self, v: HeaderBits) -> *mut u8 {
        debug_assert_eq!(v.is_big(), self.hdr.is_big());
        if v.is_big() {
            // SAFETY: in bounds; the record area begins after the link slot.
            unsafe { self.tail_ptr().add(LINK_SIZE) }
        } else {
            self.tail_ptr()
        }
    }

    // ========================================================================
    //  Chain link
    // ========================================================================

    /// Next-older version for the shape in `v`, or `None` at the chain
    /// terminus. Small tuples have no link and always return `None`.
    #[inline]
    #[must_use]
    pub fn next_ptr(&self, v: HeaderBits) -> Option<NonNull<Tuple>> {
        debug_assert_eq!(v.is_big(), self.hdr.is_big());
        if v.is_big() {
            NonNull::new(self.link_slot().load(READ_ORD))
        } else {
            None
        }
    }

    /// [`Self::next_ptr`] on a fresh header sample.
    #[inline]
    #[must_use]
    pub fn next(&self) -> Option<NonNull<Tuple>> {
        self.next_ptr(self.hdr.load())
    }

    /// Link a next-older version behind this tuple.
    ///
    /// Requires the header lock and the big shape; linking through a small
    /// tuple is a programming error.
    pub(crate) fn set_next(&self, next: Option<NonNull<Tuple>>) {
        debug_assert!(self.hdr.is_locked());
        debug_assert!(self.hdr.is_big());
        self.link_slot()
            .store(next.map_or(ptr::null_mut(), NonNull::as_ptr), WRITE_ORD);
    }
}

impl fmt::Debug for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tuple")
            .field("hdr", &self.hdr.load())
            .field("tid", &self.tid())
            .field("size", &self.size())
            .field("capacity", &self.capacity())
            .finish_non_exhaustive()
    }
}
