//! Software prefetching for chain traversal.
//!
//! The read path learns the next-older node's address one validation step
//! before it dereferences it: the link is loaded inside the optimistic
//! bracket, the version check runs, and only then does the walk move on.
//! Prefetching the next node between those two points hides most of the
//! pointer-chase latency on long chains.
//!
//! - **`x86_64`**: `_mm_prefetch` with `_MM_HINT_T0` (all cache levels)
//! - **`aarch64`**: `_prefetch` with locality 3 (keep in cache)
//! - **Other**: no-op

/// Prefetch the cache line at `ptr` for reading.
///
/// A hint only: safe with null or stale pointers, no fault is possible,
/// and the CPU may ignore it entirely.
#[inline(always)]
pub fn prefetch_read<T>(ptr: *const T) {
    if ptr.is_null() {
        return;
    }

    #[cfg(target_arch = "x86_64")]
    {
        // SAFETY: _mm_prefetch is a hint, not a load; invalid addresses
        // cause no fault.
        unsafe {
            std::arch::x86_64::_mm_prefetch(ptr.cast::<i8>(), std::arch::x86_64::_MM_HINT_T0);
        }
    }

    #[cfg(target_arch = "aarch64")]
    {
        // SAFETY: _prefetch is always safe to call on aarch64.
        unsafe {
            std::arch::aarch64::_prefetch(
                ptr.cast::<i8>(),
                std::arch::aarch64::_PREFETCH_READ,
                std::arch::aarch64::_PREFETCH_LOCALITY3,
            );
        }
    }

    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    {
        let _ = ptr;
    }
}
