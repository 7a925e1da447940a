//! Event counters for tuple instrumentation.
//!
//! Counters are observability only, never load-bearing: all of them are
//! relaxed atomics and none of the hot paths branch on their values. Tests
//! read them through [`snapshot`]; because they are process-global, assert
//! on deltas with `>=` rather than equality when tests run in parallel.

use std::sync::atomic::AtomicU64;

use crate::ordering::RELAXED;

// ============================================================================
//  Counter primitives
// ============================================================================

/// A monotonically increasing event counter.
#[derive(Debug)]
pub struct EventCounter {
    n: AtomicU64,
}

impl EventCounter {
    const fn new() -> Self {
        Self {
            n: AtomicU64::new(0),
        }
    }

    #[inline]
    pub(crate) fn inc(&self) {
        self.n.fetch_add(1, RELAXED);
    }

    #[inline]
    pub(crate) fn add(&self, delta: u64) {
        self.n.fetch_add(delta, RELAXED);
    }

    #[inline]
    #[must_use]
    pub fn get(&self) -> u64 {
        self.n.load(RELAXED)
    }

    fn reset(&self) {
        self.n.store(0, RELAXED);
    }
}

/// A running-average counter: total offered value plus offer count.
#[derive(Debug)]
pub struct EventAvgCounter {
    sum: AtomicU64,
    count: AtomicU64,
}

impl EventAvgCounter {
    const fn new() -> Self {
        Self {
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    #[inline]
    pub(crate) fn offer(&self, value: u64) {
        self.sum.fetch_add(value, RELAXED);
        self.count.fetch_add(1, RELAXED);
    }

    /// Average of all offered values, or 0.0 if nothing was offered.
    #[must_use]
    #[expect(clippy::cast_precision_loss, reason = "diagnostic output only")]
    pub fn avg(&self) -> f64 {
        let count: u64 = self.count.load(RELAXED);
        if count == 0 {
            return 0.0;
        }
        self.sum.load(RELAXED) as f64 / count as f64
    }

    #[must_use]
    pub fn offers(&self) -> u64 {
        self.count.load(RELAXED)
    }

    fn reset(&self) {
        self.sum.store(0, RELAXED);
        self.count.store(0, RELAXED);
    }
}

// ============================================================================
//  Crate-wide counters
// ============================================================================

/// Tuples allocated (both shapes).
pub static TUPLE_CREATES: EventCounter = EventCounter::new();

/// Tombstone writes (`write_record_at` with an empty record).
pub static LOGICAL_DELETES: EventCounter = EventCounter::new();

/// Tuples physically freed.
pub static PHYSICAL_DELETES: EventCounter = EventCounter::new();

/// Bytes handed out by the allocator, after rounding.
pub static BYTES_ALLOCATED: EventCounter = EventCounter::new();

/// Bytes returned to the allocator.
pub static BYTES_FREED: EventCounter = EventCounter::new();

/// Writes that pushed the previous version onto the chain.
pub static SPILLS: EventCounter = EventCounter::new();

/// Overwritable writes that did not fit the inline buffer.
pub static INPLACE_BUF_INSUFFICIENT: EventCounter = EventCounter::new();

/// Spilling writes that did not fit the inline buffer either.
pub static INPLACE_BUF_INSUFFICIENT_ON_SPILL: EventCounter = EventCounter::new();

/// Record length at the moment it was spilled.
pub static AVG_RECORD_SPILL_LEN: EventAvgCounter = EventAvgCounter::new();

/// Spins before each successful lock acquire.
pub static AVG_LOCK_ACQUIRE_SPINS: EventAvgCounter = EventAvgCounter::new();

/// Spins before each stable version sample.
pub static AVG_STABLE_VERSION_SPINS: EventAvgCounter = EventAvgCounter::new();

/// Version-check failures per `stable_read`.
pub static AVG_READ_RETRIES: EventAvgCounter = EventAvgCounter::new();

// ============================================================================
//  Snapshot / reset
// ============================================================================

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CounterSnapshot {
    pub creates: u64,
    pub logical_deletes: u64,
    pub physical_deletes: u64,
    pub bytes_allocated: u64,
    pub bytes_freed: u64,
    pub spills: u64,
    pub inplace_buf_insufficient: u64,
    pub inplace_buf_insufficient_on_spill: u64,
    pub avg_record_spill_len: f64,
    pub avg_lock_acquire_spins: f64,
    pub avg_stable_version_spins: f64,
    pub avg_read_retries: f64,
}

/// Read every counter at once.
#[must_use]
pub fn snapshot() -> CounterSnapshot {
    CounterSnapshot {
        creates: TUPLE_CREATES.get(),
        logical_deletes: LOGICAL_DELETES.get(),
        physical_deletes: PHYSICAL_DELETES.get(),
        bytes_allocated: BYTES_ALLOCATED.get(),
        bytes_freed: BYTES_FREED.get(),
        spills: SPILLS.get(),
        inplace_buf_insufficient: INPLACE_BUF_INSUFFICIENT.get(),
        inplace_buf_insufficient_on_spill: INPLACE_BUF_INSUFFICIENT_ON_SPILL.get(),
        avg_record_spill_len: AVG_RECORD_SPILL_LEN.avg(),
        avg_lock_acquire_spins: AVG_LOCK_ACQUIRE_SPINS.avg(),
        avg_stable_version_spins: AVG_STABLE_VERSION_SPINS.avg(),
        avg_read_retries: AVG_READ_RETRIES.avg(),
    }
}

/// Zero every counter. Intended for single-threaded test setup.
pub fn reset() {
    TUPLE_CREATES.reset();
    LOGICAL_DELETES.reset();
    PHYSICAL_DELETES.reset();
    BYTES_ALLOCATED.reset();
    BYTES_FREED.reset();
    SPILLS.reset();
    INPLACE_BUF_INSUFFICIENT.reset();
    INPLACE_BUF_INSUFFICIENT_ON_SPILL.reset();
    AVG_RECORD_SPILL_LEN.reset();
    AVG_LOCK_ACQUIRE_SPINS.reset();
    AVG_STABLE_VERSION_SPINS.reset();
    AVG_READ_RETRIES.reset();
}
