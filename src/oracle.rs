//! The transaction layer's overwrite oracle.
//!
//! The tuple core asks the transaction layer exactly one question: may the
//! version currently in the head slot be discarded in place, or must it be
//! preserved on the chain? Everything else about transaction scheduling is
//! opaque to this crate.

use crate::tuple::Tid;

/// Decides whether a write may clobber the current head version.
///
/// `true` means no snapshot at `existing` can still be served once `new`
/// lands: typically the writer's own earlier write within the same
/// transaction, or a version every active reader has advanced past. The
/// tuple core treats the answer as ground truth and never second-guesses
/// it.
pub trait OverwriteOracle {
    fn can_overwrite_record(&self, existing: Tid, new: Tid) -> bool;
}

/// Adapter turning any predicate into an oracle.
#[derive(Debug, Clone, Copy)]
pub struct FnOracle<F>(pub F);

impl<F> OverwriteOracle for FnOracle<F>
where
    F: Fn(Tid, Tid) -> bool,
{
    #[inline]
    fn can_overwrite_record(&self, existing: Tid, new: Tid) -> bool {
        (self.0)(existing, new)
    }
}

/// Permits every in-place overwrite: single-writer bulk loads, or any
/// context with no snapshot readers. Discards history.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysOverwrite;

impl OverwriteOracle for AlwaysOverwrite {
    #[inline]
    fn can_overwrite_record(&self, _existing: Tid, _new: Tid) -> bool {
        true
    }
}

/// Preserves every version: the maximally conservative policy, and the one
/// that exercises the spill paths.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverOverwrite;

impl OverwriteOracle for NeverOverwrite {
    #[inline]
    fn can_overwrite_record(&self, _existing: Tid, _new: Tid) -> bool {
        false
    }
}
