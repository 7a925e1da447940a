//! Microbenchmarks for the tuple hot paths, using Divan.
//!
//! Run with: `cargo bench --bench tuple`

use divan::{Bencher, black_box};
use mvtuple::header::TupleHeader;
use mvtuple::{AlwaysOverwrite, Collector, NeverOverwrite, Tuple};

fn main() {
    divan::main();
}

// =============================================================================
// Header word
// =============================================================================

#[divan::bench_group]
mod header {
    use super::{Bencher, TupleHeader, black_box};

    #[divan::bench]
    fn lock_unlock(bencher: Bencher) {
        let header = TupleHeader::from_raw(0);
        bencher.bench_local(|| drop(black_box(&header).lock()));
    }

    #[divan::bench]
    fn stable_sample(bencher: Bencher) {
        let header = TupleHeader::from_raw(0);
        bencher.bench_local(|| black_box(&header).stable());
    }

    #[divan::bench]
    fn stable_then_check(bencher: Bencher) {
        let header = TupleHeader::from_raw(0);
        bencher.bench_local(|| {
            let v = black_box(&header).stable();
            black_box(header.check(v))
        });
    }
}

// =============================================================================
// Write path
// =============================================================================

#[divan::bench_group]
mod write {
    use super::{AlwaysOverwrite, Bencher, Tuple, black_box};

    #[divan::bench(args = [8, 64, 512])]
    fn overwrite_in_place(bencher: Bencher, size: usize) {
        let node = Tuple::alloc_first(false, size);
        let tuple = unsafe { node.as_ref() };
        let payload = vec![0x2a_u8; size];
        let mut tid = 0u64;

        bencher.bench_local(|| {
            tid += 1;
            let mut lock = tuple.header().lock();
            black_box(tuple.write_record_at(&mut lock, &AlwaysOverwrite, tid, &payload))
        });

        unsafe { Tuple::release_no_rcu(node) };
    }
}

// =============================================================================
// Read path
// =============================================================================

#[divan::bench_group]
mod read {
    use super::{AlwaysOverwrite, Bencher, Collector, NeverOverwrite, Tuple, black_box};

    /// Build a chain of `versions` nodes, newest TID = versions * 10.
    fn chain(versions: u64) -> std::ptr::NonNull<Tuple> {
        let mut head = Tuple::alloc_first(false, 16);
        for i in 1..=versions {
            let tuple = unsafe { head.as_ref() };
            let mut lock = tuple.header().lock();
            let outcome = if i == 1 {
                tuple.write_record_at(&mut lock, &AlwaysOverwrite, i * 10, &i.to_le_bytes())
            } else {
                tuple.write_record_at(&mut lock, &NeverOverwrite, i * 10, &i.to_le_bytes())
            };
            if let Some(rep) = outcome.replacement {
                head = rep;
            }
        }
        head
    }

    unsafe fn free_chain(head: std::ptr::NonNull<Tuple>) {
        let mut cur = Some(head);
        while let Some(p) = cur {
            cur = unsafe { p.as_ref().next() };
            unsafe { Tuple::release_no_rcu(p) };
        }
    }

    #[divan::bench(args = [1, 4, 16])]
    fn stable_read_depth(bencher: Bencher, versions: u64) {
        let collector = Collector::new();
        let guard = collector.enter();
        let head = chain(versions);
        let tuple = unsafe { head.as_ref() };
        let mut buf = [0u8; 16];

        // Snapshot below every TID: the read walks the full chain.
        bencher.bench_local(|| black_box(tuple.stable_read(black_box(15), &mut buf, &guard)));

        drop(guard);
        unsafe { free_chain(head) };
    }

    #[divan::bench]
    fn stable_is_latest_probe(bencher: Bencher) {
        let head = chain(1);
        let tuple = unsafe { head.as_ref() };

        bencher.bench_local(|| black_box(tuple.stable_is_latest_version(black_box(u64::MAX))));

        unsafe { free_chain(head) };
    }
}
