//! Standard memory orderings for tuple access.
//!
//! Every atomic access in the crate goes through one of these named
//! constants, so the synchronization role of each access point is visible
//! at the use site.

use std::sync::atomic::Ordering;

/// Ordering for reading chain links inside an optimistic bracket.
/// Pairs with the writer's Release store of the link.
pub const READ_ORD: Ordering = Ordering::Acquire;

/// Ordering for writing tuple fields under the header lock.
/// Pairs with readers' Acquire loads.
pub const WRITE_ORD: Ordering = Ordering::Release;

/// Ordering for the lock-bit CAS success.
pub const CAS_SUCCESS: Ordering = Ordering::AcqRel;

/// Ordering for the lock-bit CAS failure.
/// The retry loop only needs the current word.
pub const CAS_FAILURE: Ordering = Ordering::Acquire;

/// Ordering for relaxed loads: fields that are either immutable, guarded by
/// the header lock, or re-validated by the `stable`/`check` bracket.
pub const RELAXED: Ordering = Ordering::Relaxed;

/// Ordering for the `stable` spin load.
/// Must see the unlock that published the data it precedes.
pub const VERSION_ORD: Ordering = Ordering::Acquire;

/// Ordering for the unlock store (counter bump + lock clear).
/// Must publish every write made under the lock.
pub const UNLOCK_ORD: Ordering = Ordering::Release;
