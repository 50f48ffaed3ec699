//! Atomic counters for guarded-heap observability.
//!
//! All counters use relaxed ordering; they are diagnostic, not
//! synchronization primitives.

use std::sync::atomic::{AtomicU64, Ordering};

/// Heap operation counters, cumulative over the heap's lifetime.
#[derive(Debug)]
pub struct HeapMetrics {
    /// Successful allocations (including moves performed by resize).
    pub allocations: AtomicU64,
    /// Blocks returned to the provider.
    pub releases: AtomicU64,
    /// Allocations refused for zero size, overflow or provider exhaustion.
    pub refusals: AtomicU64,
    /// Allocations failed on purpose by the countdown.
    pub injected_failures: AtomicU64,
    /// Growing resizes satisfied without moving the block.
    pub resizes_in_place: AtomicU64,
    /// Growing resizes that copied into a fresh block.
    pub resizes_moved: AtomicU64,
    /// Trailer damage found at release/resize.
    pub overruns: AtomicU64,
    /// Header damage found at release/resize.
    pub underruns: AtomicU64,
    /// Releases of an address already released.
    pub double_releases: AtomicU64,
    /// Releases of an address the heap never handed out.
    pub foreign_releases: AtomicU64,
    /// Blocks reported as leaked at epoch end.
    pub leaked_blocks: AtomicU64,
}

impl HeapMetrics {
    /// Create a new zeroed metrics instance.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            allocations: AtomicU64::new(0),
            releases: AtomicU64::new(0),
            refusals: AtomicU64::new(0),
            injected_failures: AtomicU64::new(0),
            resizes_in_place: AtomicU64::new(0),
            resizes_moved: AtomicU64::new(0),
            overruns: AtomicU64::new(0),
            underruns: AtomicU64::new(0),
            double_releases: AtomicU64::new(0),
            foreign_releases: AtomicU64::new(0),
            leaked_blocks: AtomicU64::new(0),
        }
    }

    /// Increment a counter by 1.
    pub fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment a counter by `n`.
    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Read a counter value.
    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    /// Snapshot all counters.
    #[must_use]
    pub fn snapshot(&self) -> HeapMetricsSnapshot {
        HeapMetricsSnapshot {
            allocations: Self::get(&self.allocations),
            releases: Self::get(&self.releases),
            refusals: Self::get(&self.refusals),
            injected_failures: Self::get(&self.injected_failures),
            resizes_in_place: Self::get(&self.resizes_in_place),
            resizes_moved: Self::get(&self.resizes_moved),
            overruns: Self::get(&self.overruns),
            underruns: Self::get(&self.underruns),
            double_releases: Self::get(&self.double_releases),
            foreign_releases: Self::get(&self.foreign_releases),
            leaked_blocks: Self::get(&self.leaked_blocks),
        }
    }
}

impl Default for HeapMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of [`HeapMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapMetricsSnapshot {
    pub allocations: u64,
    pub releases: u64,
    pub refusals: u64,
    pub injected_failures: u64,
    pub resizes_in_place: u64,
    pub resizes_moved: u64,
    pub overruns: u64,
    pub underruns: u64,
    pub double_releases: u64,
    pub foreign_releases: u64,
    pub leaked_blocks: u64,
}

impl HeapMetricsSnapshot {
    /// Named counters in a stable order, for logs and reports.
    #[must_use]
    pub fn fields(&self) -> [(&'static str, u64); 11] {
        [
            ("allocations", self.allocations),
            ("releases", self.releases),
            ("refusals", self.refusals),
            ("injected_failures", self.injected_failures),
            ("resizes_in_place", self.resizes_in_place),
            ("resizes_moved", self.resizes_moved),
            ("overruns", self.overruns),
            ("underruns", self.underruns),
            ("double_releases", self.double_releases),
            ("foreign_releases", self.foreign_releases),
            ("leaked_blocks", self.leaked_blocks),
        ]
    }
}
