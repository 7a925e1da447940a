//! # mvtuple
//!
//! The versioned record cell of an in-memory MVCC database: the value an
//! underlying (non-transactional) index points at. Each [`Tuple`] carries
//! one version's record bytes, the chain of older versions, and the packed
//! concurrency metadata that lets readers take consistent snapshots
//! without ever blocking writers.
//!
//! ## Design
//!
//! - A single `AtomicU64` header word packs the writer lock, the shape
//!   bit, lifecycle flags, and the optimistic-read version counter, so
//!   readers sample everything at once and writers commit with one CAS.
//! - Reads are seqlock-style: `stable` sample, copy, `check`. Writers
//!   serialize on the per-tuple spinlock and bump the counter on unlock.
//! - Writes either overwrite in place (when the transaction layer's
//!   [`OverwriteOracle`] allows it and the bytes fit) or spill the current
//!   version onto the newest-first chain.
//! - Retired tuples go through [seize]'s deferred reclamation; nothing is
//!   freed while a reader that could observe it is still in its epoch.
//!
//! ## Integration contract
//!
//! The embedding engine owns a [`Collector`] per index (or per table).
//! Every tuple pointer obtained from the index must only be dereferenced
//! inside a guard from that collector, and pointers must not be held
//! across epoch boundaries. Calling [`Tuple::stable_read`] on a tuple
//! whose lock the calling thread holds spins forever.
//!
//! ```
//! use mvtuple::{AlwaysOverwrite, Collector, Tuple};
//!
//! let collector = Collector::new();
//! let head = Tuple::alloc_first(false, 8);
//! let tuple = unsafe { head.as_ref() };
//!
//! {
//!     let mut lock = tuple.header().lock();
//!     let _ = tuple.write_record_at(&mut lock, &AlwaysOverwrite, 10, b"value");
//! }
//!
//! let guard = collector.enter();
//! let mut buf = [0u8; 8];
//! assert_eq!(tuple.stable_read(10, &mut buf, &guard), Some((10, 5)));
//! assert_eq!(&buf[..5], b"value");
//! drop(guard);
//!
//! unsafe { Tuple::release_no_rcu(head) };
//! ```

pub mod counters;
pub mod header;
pub mod oracle;
pub mod ordering;
pub mod prefetch;
mod trace;
pub mod tuple;


#[cfg(all(test, feature = "shuttle"))]
mod shuttle_tests;

pub use header::{HeaderBits, HeaderGuard, TupleHeader};
pub use oracle::{AlwaysOverwrite, FnOracle, NeverOverwrite, OverwriteOracle};
pub use tuple::{MAX_CAPACITY, MAX_TID, MIN_TID, Tid, Tuple, WriteOutcome};

// The SMR runtime is part of the public API surface: readers pass its
// guards as epoch evidence and release goes through its collector.
pub use seize::{Collector, Guard, LocalGuard};
