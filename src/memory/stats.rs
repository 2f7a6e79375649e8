//! Diagnostic gauges for the locked pool. All counters use `Relaxed`
//! ordering and are eventually consistent; cross-counter snapshots may be
//! transiently inconsistent. Display only; the allocator never consults
//! them for allocation decisions.

use crate::sync::atomic::{AtomicIsize, Ordering};

/// Diagnostic-only gauge counter.
///
/// Under contention, subtract-before-add races are tolerated and the raw
/// value may transiently dip below zero. Readers use `load()`/`get()`,
/// which clamp negative values to zero.
pub struct Counter(AtomicIsize);

impl Counter {
    #[cfg(not(loom))]
    pub const fn new() -> Self {
        Self(AtomicIsize::new(0))
    }

    #[cfg(loom)]
    pub fn new() -> Self {
        Self(AtomicIsize::new(0))
    }

    #[inline]
    fn delta(val: usize) -> isize {
        // Diagnostic counters only: clamp absurd deltas instead of panicking.
        std::cmp::min(val, isize::MAX as usize).cast_signed()
    }

    #[inline]
    pub fn add(&self, val: usize) {
        self.0.fetch_add(Self::delta(val), Ordering::Relaxed);
    }

    #[inline]
    pub fn sub(&self, val: usize) {
        self.0.fetch_sub(Self::delta(val), Ordering::Relaxed);
    }

    #[inline]
    pub fn get(&self) -> usize {
        self.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn load(&self, ordering: Ordering) -> usize {
        self.0.load(ordering).max(0).cast_unsigned()
    }
}

// Bytes of page-locked pool capacity currently mapped
crate::sync::static_atomic! {
    pub static LOCKED_POOL_CAPACITY: Counter = Counter::new();
}
// Bytes currently handed out to callers
crate::sync::static_atomic! {
    pub static LOCKED_POOL_IN_USE: Counter = Counter::new();
}
// Number of outstanding allocations
crate::sync::static_atomic! {
    pub static LOCKED_POOL_LIVE_ALLOCS: Counter = Counter::new();
}

/// Point-in-time snapshot of the pool gauges.
#[derive(Clone, Copy, Debug)]
pub struct PoolStats {
    pub capacity: usize,
    pub in_use: usize,
    pub live_allocs: usize,
}

/// Read the gauges. Individual fields are exact; the combination may be
/// mid-update when other threads are allocating.
#[must_use]
pub fn snapshot() -> PoolStats {
    PoolStats {
        capacity: LOCKED_POOL_CAPACITY.get(),
        in_use: LOCKED_POOL_IN_USE.get(),
        live_allocs: LOCKED_POOL_LIVE_ALLOCS.get(),
    }
}
