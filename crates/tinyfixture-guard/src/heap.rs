//! The guarded heap.
//!
//! Wraps a [`HeapProvider`] and surrounds every block with a header and a
//! trailing sentinel. All live blocks are tracked in a [`BlockRegistry`] so a
//! pointer is validated against the index before its header is read.
//!
//! Allocation happens within an [`AllocationEpoch`]: the runner opens one per
//! test, and closing it reports anything the test left behind.

#![allow(unsafe_code)]

use std::backtrace::Backtrace;
use std::collections::HashMap;
use std::fmt;
use std::panic::Location;
use std::ptr::NonNull;
use std::thread::{self, ThreadId};

use crate::audit::{self, BlockIntegrity, LeakReport};
use crate::config::TrackingLevel;
use crate::error::{HeapError, ReleaseSite};
use crate::layout::{self, BlockHeader, HEADER_SIZE, TOTAL_OVERHEAD, TRAILER, TRAILER_SIZE};
use crate::metrics::{HeapMetrics, HeapMetricsSnapshot};
use crate::provider::{HeapProvider, StaticArena, SystemProvider};
use crate::registry::{BlockRecord, BlockRegistry};

/// Per-test allocation scope.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocationEpoch {
    /// Monotonic epoch number; 0 before the first `start_epoch`.
    pub number: u64,
    /// Blocks allocated in this epoch and not yet released.
    pub live: usize,
    /// Allocation attempts left before the injected failure fires.
    pub fail_countdown: Option<u32>,
    /// Thread that first touched the heap in this epoch.
    pub owner: Option<ThreadId>,
}

/// Guarded allocator: leak, overrun, double-release and foreign-thread detection.
pub struct GuardedHeap {
    provider: Box<dyn HeapProvider>,
    registry: BlockRegistry,
    /// Released addresses not reissued since, keyed to the epoch that released them.
    released: HashMap<usize, u64>,
    epoch: AllocationEpoch,
    tracking: TrackingLevel,
    next_serial: u64,
    violation: Option<HeapError>,
    fatal: Option<HeapError>,
    /// Regions of leaked blocks, returned to the provider on drop.
    stranded: Vec<(NonNull<u8>, usize)>,
    metrics: HeapMetrics,
}

// SAFETY: every raw pointer held here addresses memory owned by `provider`,
// which is itself `Send`; the heap is only ever touched through `&mut self`.
unsafe impl Send for GuardedHeap {}

impl GuardedHeap {
    /// Heap over an arbitrary provider.
    #[must_use]
    pub fn new(provider: Box<dyn HeapProvider>) -> Self {
        Self {
            provider,
            registry: BlockRegistry::new(),
            released: HashMap::new(),
            epoch: AllocationEpoch::default(),
            tracking: TrackingLevel::default(),
            next_serial: 0,
            violation: None,
            fatal: None,
            stranded: Vec::new(),
            metrics: HeapMetrics::new(),
        }
    }

    /// Heap over the process allocator.
    #[must_use]
    pub fn with_system() -> Self {
        Self::new(Box::new(SystemProvider))
    }

    /// Heap over a fixed arena of `capacity` bytes.
    #[must_use]
    pub fn with_static_arena(capacity: usize) -> Self {
        Self::new(Box::new(StaticArena::with_capacity(capacity)))
    }

    /// Builder: set the leak diagnostic depth.
    #[must_use]
    pub fn with_tracking(mut self, tracking: TrackingLevel) -> Self {
        self.tracking = tracking;
        self
    }

    pub fn set_tracking(&mut self, tracking: TrackingLevel) {
        self.tracking = tracking;
    }

    #[must_use]
    pub fn tracking(&self) -> TrackingLevel {
        self.tracking
    }

    #[must_use]
    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    /// Current epoch state.
    #[must_use]
    pub fn epoch(&self) -> AllocationEpoch {
        self.epoch
    }

    /// Blocks allocated in the current epoch and still live.
    #[must_use]
    pub fn live_blocks(&self) -> usize {
        self.epoch.live
    }

    /// Registered blocks across all epochs.
    #[must_use]
    pub fn registered_blocks(&self) -> usize {
        self.registry.len()
    }

    #[must_use]
    pub fn metrics(&self) -> HeapMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Allocate `size` bytes.
    ///
    /// The returned pointer is 16-byte aligned and valid for `size` bytes
    /// until passed to [`release`](Self::release) or [`resize`](Self::resize).
    ///
    /// # Errors
    ///
    /// `ZeroSize` for an empty request, `InjectedFailure` when the armed
    /// countdown fires, `SizeOverflow`/`OutOfMemory` when the provider cannot
    /// serve it, `ForeignThread` when another thread owns the epoch.
    #[track_caller]
    pub fn allocate(&mut self, size: usize) -> Result<NonNull<u8>, HeapError> {
        self.allocate_at(size, Location::caller())
    }

    /// Allocate `num * size` zero-filled bytes.
    ///
    /// # Errors
    ///
    /// As [`allocate`](Self::allocate); `SizeOverflow` when the product overflows.
    #[track_caller]
    pub fn zeroed(&mut self, num: usize, size: usize) -> Result<NonNull<u8>, HeapError> {
        let origin = Location::caller();
        let Some(total) = num.checked_mul(size) else {
            return Err(self.refuse(HeapError::SizeOverflow));
        };
        let user = self.allocate_at(total, origin)?;
        // SAFETY: `user` is valid for `total` bytes.
        unsafe { user.as_ptr().write_bytes(0, total) };
        Ok(user)
    }

    /// Release a block. Null is a no-op.
    ///
    /// Damaged guards do not stop the release; the damage is reported after
    /// the region has been returned.
    ///
    /// # Errors
    ///
    /// `DoubleRelease`/`ForeignPointer` for unknown addresses (nothing is
    /// touched), `Overrun`/`Underrun` for damaged guards, `ForeignThread`.
    pub fn release(&mut self, ptr: *mut u8) -> Result<(), HeapError> {
        let Some(user) = NonNull::new(ptr) else {
            return Ok(());
        };
        self.claim_thread()?;
        self.release_block(user, ReleaseSite::Release)
    }

    /// Change the size of a block, moving it when it cannot grow in place.
    ///
    /// Null behaves as `allocate(new_size)`; `new_size == 0` behaves as
    /// `release(ptr)` and yields `None`. Shrinking keeps the address.
    ///
    /// # Errors
    ///
    /// A damaged block is released and its damage returned. When a growing
    /// resize cannot get memory the old block is left untouched.
    #[track_caller]
    pub fn resize(
        &mut self,
        ptr: *mut u8,
        new_size: usize,
    ) -> Result<Option<NonNull<u8>>, HeapError> {
        let origin = Location::caller();
        let Some(user) = NonNull::new(ptr) else {
            return self.allocate_at(new_size, origin).map(Some);
        };
        self.claim_thread()?;
        if new_size == 0 {
            return self.release_block(user, ReleaseSite::Resize).map(|()| None);
        }

        let addr = user.as_ptr() as usize;
        let Some((size, base)) = self.registry.get(addr).map(|r| (r.size, r.base)) else {
            return Err(self.reject_unknown(addr));
        };
        // SAFETY: the registry vouches for a live block of `size` bytes at `user`.
        if !unsafe { audit::inspect(user, size) }.is_intact() {
            return self.release_block(user, ReleaseSite::Resize).map(|()| None);
        }
        if new_size <= size {
            return Ok(Some(user));
        }

        self.consume_countdown()?;
        let Some(new_total) = layout::total_size(new_size) else {
            return Err(self.refuse(HeapError::SizeOverflow));
        };
        if self.provider.try_grow(base, size + TOTAL_OVERHEAD, new_total) {
            // SAFETY: the provider grew the region at `base` to `new_total` bytes.
            unsafe { write_guards(base, new_size) };
            if let Some(record) = self.registry.get_mut(addr) {
                record.size = new_size;
                record.origin = origin;
            }
            HeapMetrics::inc(&self.metrics.resizes_in_place);
            return Ok(Some(user));
        }

        let fresh = self.place(new_size, origin)?;
        // SAFETY: both blocks are live and distinct; the old one holds `size` bytes.
        unsafe { std::ptr::copy_nonoverlapping(user.as_ptr(), fresh.as_ptr(), size) };
        self.release_block(user, ReleaseSite::Resize)?;
        HeapMetrics::inc(&self.metrics.resizes_moved);
        Ok(Some(fresh))
    }

    /// User size of a live block.
    #[must_use]
    pub fn block_size(&self, ptr: *const u8) -> Option<usize> {
        self.registry.get(ptr as usize).map(|record| record.size)
    }

    /// Make the `(k+1)`-th allocation attempt from now fail once.
    pub fn arm_failure_after(&mut self, k: u32) {
        self.epoch.fail_countdown = Some(k);
    }

    pub fn disarm_failures(&mut self) {
        self.epoch.fail_countdown = None;
    }

    /// Open a fresh epoch. Anything still open is abandoned without a report.
    ///
    /// Release history older than the previous epoch is forgotten; a stale
    /// pointer from further back is then reported as foreign.
    pub fn start_epoch(&mut self) {
        let previous = self.epoch.number;
        self.epoch = AllocationEpoch {
            number: previous + 1,
            ..AllocationEpoch::default()
        };
        self.released.retain(|_, released_in| *released_in >= previous);
        self.violation = None;
        self.fatal = None;
    }

    /// Close the current epoch.
    ///
    /// # Errors
    ///
    /// `Leak` when blocks allocated in this epoch are still live. Their
    /// registry entries are dropped; the memory stays reserved until the heap
    /// is dropped.
    pub fn end_epoch(&mut self) -> Result<(), HeapError> {
        self.epoch.fail_countdown = None;
        if self.epoch.live == 0 {
            return Ok(());
        }
        let leaked = self.registry.drain_epoch(self.epoch.number);
        let report = LeakReport::new(self.epoch.number, self.epoch.live, &leaked, self.tracking);
        HeapMetrics::add(&self.metrics.leaked_blocks, self.epoch.live as u64);
        self.stranded.extend(
            leaked
                .iter()
                .map(|record| (record.base, record.size + TOTAL_OVERHEAD)),
        );
        self.epoch.live = 0;
        Err(HeapError::Leak(report))
    }

    /// First violation detected since the epoch started, if not yet taken.
    pub fn take_violation(&mut self) -> Option<HeapError> {
        self.violation.take()
    }

    /// Fatal error detected since the epoch started, if not yet taken.
    pub fn take_fatal(&mut self) -> Option<HeapError> {
        self.fatal.take()
    }

    fn allocate_at(
        &mut self,
        size: usize,
        origin: &'static Location<'static>,
    ) -> Result<NonNull<u8>, HeapError> {
        if size == 0 {
            return Err(self.refuse(HeapError::ZeroSize));
        }
        self.claim_thread()?;
        self.consume_countdown()?;
        self.place(size, origin)
    }

    fn claim_thread(&mut self) -> Result<(), HeapError> {
        let caller = thread::current().id();
        match self.epoch.owner {
            None => {
                self.epoch.owner = Some(caller);
                Ok(())
            }
            Some(owner) if owner == caller => Ok(()),
            Some(owner) => Err(self.latch(HeapError::ForeignThread { owner, caller })),
        }
    }

    fn consume_countdown(&mut self) -> Result<(), HeapError> {
        match self.epoch.fail_countdown {
            None => Ok(()),
            Some(0) => {
                self.epoch.fail_countdown = None;
                HeapMetrics::inc(&self.metrics.injected_failures);
                Err(HeapError::InjectedFailure)
            }
            Some(n) => {
                self.epoch.fail_countdown = Some(n - 1);
                Ok(())
            }
        }
    }

    /// Acquire a region, write its guards and register it.
    fn place(
        &mut self,
        size: usize,
        origin: &'static Location<'static>,
    ) -> Result<NonNull<u8>, HeapError> {
        let Some(total) = layout::total_size(size) else {
            return Err(self.refuse(HeapError::SizeOverflow));
        };
        let Some(base) = self.provider.acquire(total) else {
            let provider = self.provider.name();
            return Err(self.refuse(HeapError::OutOfMemory {
                provider,
                requested: size,
            }));
        };
        // SAFETY: the provider handed out `total` bytes at `base`.
        let user = unsafe {
            write_guards(base, size);
            base.add(HEADER_SIZE)
        };
        let addr = user.as_ptr() as usize;
        self.next_serial += 1;
        let backtrace = self
            .tracking
            .captures_backtrace()
            .then(Backtrace::force_capture);
        self.registry.insert(BlockRecord {
            addr,
            size,
            epoch: self.epoch.number,
            serial: self.next_serial,
            origin,
            backtrace,
            base,
        });
        self.released.remove(&addr);
        self.epoch.live += 1;
        HeapMetrics::inc(&self.metrics.allocations);
        Ok(user)
    }

    fn release_block(&mut self, user: NonNull<u8>, during: ReleaseSite) -> Result<(), HeapError> {
        let addr = user.as_ptr() as usize;
        let Some(record) = self.registry.remove(addr) else {
            return Err(self.reject_unknown(addr));
        };
        // SAFETY: the record was live, so the guards around `user` are still ours to read.
        let integrity = unsafe { audit::inspect(user, record.size) };
        if record.epoch == self.epoch.number {
            self.epoch.live = self.epoch.live.saturating_sub(1);
        }
        // SAFETY: `base` came from `acquire(size + TOTAL_OVERHEAD)` (or a grow to it) and
        // was just unregistered, so it is returned exactly once.
        unsafe { self.provider.release(record.base, record.size + TOTAL_OVERHEAD) };
        self.released.insert(addr, self.epoch.number);
        HeapMetrics::inc(&self.metrics.releases);

        match integrity {
            BlockIntegrity::Intact => Ok(()),
            BlockIntegrity::Overrun => {
                HeapMetrics::inc(&self.metrics.overruns);
                Err(self.latch(HeapError::Overrun {
                    during,
                    addr,
                    size: record.size,
                    origin: record.origin,
                }))
            }
            BlockIntegrity::Underrun => {
                HeapMetrics::inc(&self.metrics.underruns);
                Err(self.latch(HeapError::Underrun {
                    during,
                    addr,
                    size: record.size,
                    origin: record.origin,
                }))
            }
        }
    }

    fn reject_unknown(&mut self, addr: usize) -> HeapError {
        let err = if self.released.contains_key(&addr) {
            HeapMetrics::inc(&self.metrics.double_releases);
            HeapError::DoubleRelease { addr }
        } else {
            HeapMetrics::inc(&self.metrics.foreign_releases);
            HeapError::ForeignPointer { addr }
        };
        self.latch(err)
    }

    fn refuse(&self, err: HeapError) -> HeapError {
        HeapMetrics::inc(&self.metrics.refusals);
        err
    }

    /// Remember the first violation (and any fatal one) for the runner.
    fn latch(&mut self, err: HeapError) -> HeapError {
        if err.is_fatal() {
            if self.fatal.is_none() {
                self.fatal = Some(err.clone());
            }
        } else if self.violation.is_none() {
            self.violation = Some(err.clone());
        }
        err
    }
}

/// Write the header at `base` and the trailer after `size` user bytes.
///
/// # Safety
///
/// `base` must be valid for `size + TOTAL_OVERHEAD` bytes and 16-byte aligned.
unsafe fn write_guards(base: NonNull<u8>, size: usize) {
    // SAFETY: guaranteed by the caller.
    unsafe {
        base.cast::<BlockHeader>().write(BlockHeader::new(size));
        std::ptr::copy_nonoverlapping(
            TRAILER.as_ptr(),
            base.as_ptr().add(HEADER_SIZE + size),
            TRAILER_SIZE,
        );
    }
}

impl Default for GuardedHeap {
    fn default() -> Self {
        #[cfg(feature = "static-heap")]
        {
            Self::with_static_arena(crate::provider::DEFAULT_ARENA_BYTES)
        }
        #[cfg(not(feature = "static-heap"))]
        {
            Self::with_system()
        }
    }
}

impl Drop for GuardedHeap {
    fn drop(&mut self) {
        let live = self.registry.drain_all();
        let regions = live
            .iter()
            .map(|record| (record.base, record.size + TOTAL_OVERHEAD))
            .chain(self.stranded.drain(..))
            .collect::<Vec<_>>();
        // Newest first, so a LIFO arena can take every region back.
        for (base, total) in regions.into_iter().rev() {
            // SAFETY: each region is still held by this heap and returned once.
            unsafe { self.provider.release(base, total) };
        }
    }
}

impl fmt::Debug for GuardedHeap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuardedHeap")
            .field("provider", &self.provider.name())
            .field("epoch", &self.epoch)
            .field("registered", &self.registry.len())
            .field("stranded", &self.stranded.len())
            .field("tracking", &self.tracking)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heap() -> GuardedHeap {
        let mut heap = GuardedHeap::with_system();
        heap.start_epoch();
        heap
    }

    /// Pointer to the first byte of the header's guard word.
    fn guard_word(user: NonNull<u8>) -> *mut u8 {
        // SAFETY: the header lies entirely within the block's region.
        unsafe { user.as_ptr().sub(HEADER_SIZE).add(std::mem::size_of::<usize>()) }
    }

    #[test]
    fn allocate_and_release_balance_the_epoch() {
        let mut heap = heap();
        let p = heap.allocate(24).expect("allocate");
        assert_eq!(p.as_ptr() as usize % layout::BLOCK_ALIGN, 0);
        assert_eq!(heap.block_size(p.as_ptr()), Some(24));
        assert_eq!(heap.live_blocks(), 1);
        heap.release(p.as_ptr()).expect("release");
        assert_eq!(heap.live_blocks(), 0);
        assert!(heap.end_epoch().is_ok());
        assert_eq!(heap.metrics().allocations, 1);
        assert_eq!(heap.metrics().releases, 1);
    }

    #[test]
    fn zero_size_is_refused() {
        let mut heap = heap();
        assert!(matches!(heap.allocate(0), Err(HeapError::ZeroSize)));
        assert_eq!(heap.live_blocks(), 0);
        assert_eq!(heap.metrics().refusals, 1);
    }

    #[test]
    fn null_release_is_a_no_op() {
        let mut heap = heap();
        assert!(heap.release(std::ptr::null_mut()).is_ok());
        assert!(heap.take_violation().is_none());
    }

    #[test]
    fn double_release_is_detected_and_latched() {
        let mut heap = heap();
        let p = heap.allocate(8).expect("allocate");
        heap.release(p.as_ptr()).expect("first release");
        let err = heap.release(p.as_ptr()).expect_err("second release");
        assert!(matches!(err, HeapError::DoubleRelease { .. }));
        assert!(matches!(
            heap.take_violation(),
            Some(HeapError::DoubleRelease { .. })
        ));
        assert!(heap.take_violation().is_none(), "latch drains once");
    }

    #[test]
    fn release_history_spans_only_the_previous_epoch() {
        let mut heap = heap();
        let blocks: Vec<_> = (0..3).map(|_| heap.allocate(16).expect("allocate")).collect();
        for block in &blocks {
            heap.release(block.as_ptr()).expect("release");
        }
        assert_eq!(heap.released.len(), 3);

        heap.start_epoch();
        assert_eq!(heap.released.len(), 3);
        assert!(matches!(
            heap.release(blocks[0].as_ptr()),
            Err(HeapError::DoubleRelease { .. })
        ));

        heap.start_epoch();
        assert!(heap.released.is_empty());
        assert!(matches!(
            heap.release(blocks[1].as_ptr()),
            Err(HeapError::ForeignPointer { .. })
        ));
        assert_eq!(heap.metrics().double_releases, 1);
        assert_eq!(heap.metrics().foreign_releases, 1);
    }

    #[test]
    fn foreign_pointer_is_rejected_without_touching_it() {
        let mut heap = heap();
        let mut local = [7u8; 32];
        let err = heap.release(local.as_mut_ptr()).expect_err("foreign");
        assert!(matches!(err, HeapError::ForeignPointer { .. }));
        assert_eq!(local, [7u8; 32]);
        assert_eq!(heap.metrics().foreign_releases, 1);
    }

    #[test]
    fn overrun_is_reported_but_release_completes() {
        let mut heap = heap();
        let p = heap.allocate(10).expect("allocate");
        // SAFETY: writes the first trailer byte, still inside the region.
        unsafe { p.as_ptr().add(10).write(b'!') };
        let err = heap.release(p.as_ptr()).expect_err("overrun");
        assert!(matches!(
            err,
            HeapError::Overrun {
                during: ReleaseSite::Release,
                size: 10,
                ..
            }
        ));
        assert_eq!(heap.live_blocks(), 0);
        assert!(heap.end_epoch().is_ok());
        assert_eq!(heap.metrics().overruns, 1);
    }

    #[test]
    fn underrun_is_reported() {
        let mut heap = heap();
        let p = heap.allocate(10).expect("allocate");
        // SAFETY: writes into the header's guard word, inside the region.
        unsafe { guard_word(p).write(0x5A) };
        let err = heap.release(p.as_ptr()).expect_err("underrun");
        assert!(matches!(err, HeapError::Underrun { .. }));
        assert_eq!(heap.live_blocks(), 0);
    }

    #[test]
    fn leak_report_lists_blocks_in_allocation_order() {
        let mut heap = heap();
        let _a = heap.allocate(12).expect("a");
        let b = heap.allocate(5).expect("b");
        let _c = heap.allocate(30).expect("c");
        heap.release(b.as_ptr()).expect("release b");

        let Err(HeapError::Leak(report)) = heap.end_epoch() else {
            panic!("expected a leak");
        };
        assert_eq!(report.count, 2);
        let sizes: Vec<usize> = report.blocks.iter().map(|b| b.size).collect();
        assert_eq!(sizes, vec![12, 30]);
        assert!(report.blocks[0].origin.file().ends_with("heap.rs"));
        assert_eq!(heap.registered_blocks(), 0);
        assert_eq!(heap.metrics().leaked_blocks, 2);
    }

    #[test]
    fn tracking_off_reports_count_only() {
        let mut heap = GuardedHeap::with_system().with_tracking(TrackingLevel::Off);
        heap.start_epoch();
        let _ = heap.allocate(4).expect("allocate");
        let Err(HeapError::Leak(report)) = heap.end_epoch() else {
            panic!("expected a leak");
        };
        assert_eq!(report.count, 1);
        assert!(report.blocks.is_empty());
    }

    #[test]
    fn older_epoch_blocks_stay_releasable() {
        let mut heap = heap();
        let old = heap.allocate(8).expect("allocate");
        heap.start_epoch();
        assert_eq!(heap.live_blocks(), 0);
        heap.release(old.as_ptr()).expect("old block is still known");
        assert_eq!(heap.live_blocks(), 0);
        assert!(heap.end_epoch().is_ok());
    }

    #[test]
    fn injected_failure_hits_the_k_plus_first_attempt_once() {
        let mut heap = heap();
        heap.arm_failure_after(2);
        let a = heap.allocate(4).expect("first");
        let b = heap.allocate(4).expect("second");
        assert!(matches!(heap.allocate(4), Err(HeapError::InjectedFailure)));
        let c = heap.allocate(4).expect("disarmed after firing");
        for p in [a, b, c] {
            heap.release(p.as_ptr()).expect("release");
        }
        assert_eq!(heap.metrics().injected_failures, 1);
    }

    #[test]
    fn zero_size_does_not_consume_the_countdown() {
        let mut heap = heap();
        heap.arm_failure_after(0);
        assert!(matches!(heap.allocate(0), Err(HeapError::ZeroSize)));
        assert!(matches!(heap.allocate(1), Err(HeapError::InjectedFailure)));
    }

    #[test]
    fn end_epoch_disarms_injection() {
        let mut heap = heap();
        heap.arm_failure_after(0);
        assert!(heap.end_epoch().is_ok());
        assert_eq!(heap.epoch().fail_countdown, None);
    }

    #[test]
    fn zeroed_fills_and_checks_overflow() {
        let mut heap = heap();
        let p = heap.zeroed(4, 8).expect("zeroed");
        // SAFETY: p is valid for 32 bytes.
        let bytes = unsafe { std::slice::from_raw_parts(p.as_ptr(), 32) };
        assert!(bytes.iter().all(|&b| b == 0));
        heap.release(p.as_ptr()).expect("release");
        assert!(matches!(
            heap.zeroed(usize::MAX, 2),
            Err(HeapError::SizeOverflow)
        ));
    }

    #[test]
    fn resize_null_allocates_and_zero_releases() {
        let mut heap = heap();
        let p = heap
            .resize(std::ptr::null_mut(), 16)
            .expect("resize null")
            .expect("some block");
        assert_eq!(heap.block_size(p.as_ptr()), Some(16));
        assert!(heap.resize(p.as_ptr(), 0).expect("resize to zero").is_none());
        assert_eq!(heap.live_blocks(), 0);
    }

    #[test]
    fn shrinking_resize_keeps_the_address() {
        let mut heap = heap();
        let p = heap.allocate(32).expect("allocate");
        let q = heap.resize(p.as_ptr(), 8).expect("shrink").expect("block");
        assert_eq!(p, q);
        assert_eq!(heap.block_size(q.as_ptr()), Some(32));
        heap.release(q.as_ptr()).expect("release");
    }

    #[test]
    fn growing_resize_moves_and_copies() {
        let mut heap = heap();
        let p = heap.allocate(4).expect("allocate");
        // SAFETY: p is valid for 4 bytes.
        unsafe { std::ptr::copy_nonoverlapping(b"abcd".as_ptr(), p.as_ptr(), 4) };
        let q = heap.resize(p.as_ptr(), 64).expect("grow").expect("block");
        // SAFETY: q is valid for 64 bytes.
        let head = unsafe { std::slice::from_raw_parts(q.as_ptr(), 4) };
        assert_eq!(head, b"abcd");
        assert_eq!(heap.block_size(q.as_ptr()), Some(64));
        assert_eq!(heap.live_blocks(), 1);
        assert_eq!(heap.metrics().resizes_moved, 1);
        heap.release(q.as_ptr()).expect("release");
    }

    #[test]
    fn failed_grow_leaves_the_old_block_intact() {
        let mut heap = heap();
        let p = heap.allocate(8).expect("allocate");
        heap.arm_failure_after(0);
        assert!(matches!(
            heap.resize(p.as_ptr(), 128),
            Err(HeapError::InjectedFailure)
        ));
        assert_eq!(heap.block_size(p.as_ptr()), Some(8));
        heap.release(p.as_ptr()).expect("old block still releasable");
    }

    #[test]
    fn resize_of_corrupted_block_releases_and_reports() {
        let mut heap = heap();
        let p = heap.allocate(8).expect("allocate");
        // SAFETY: first trailer byte.
        unsafe { p.as_ptr().add(8).write(0) };
        let err = heap.resize(p.as_ptr(), 64).expect_err("corrupted");
        assert!(matches!(
            err,
            HeapError::Overrun {
                during: ReleaseSite::Resize,
                ..
            }
        ));
        assert_eq!(heap.live_blocks(), 0);
        assert!(heap.block_size(p.as_ptr()).is_none());
    }

    #[test]
    fn static_arena_grows_the_top_block_in_place() {
        let mut heap = GuardedHeap::with_static_arena(256);
        heap.start_epoch();
        let p = heap.allocate(8).expect("allocate");
        let q = heap.resize(p.as_ptr(), 40).expect("grow").expect("block");
        assert_eq!(p, q);
        assert_eq!(heap.block_size(q.as_ptr()), Some(40));
        assert_eq!(heap.metrics().resizes_in_place, 1);
        heap.release(q.as_ptr()).expect("release");
        assert!(heap.end_epoch().is_ok());
    }

    #[test]
    fn static_arena_exhaustion_is_out_of_memory() {
        let mut heap = GuardedHeap::with_static_arena(64);
        heap.start_epoch();
        let err = heap.allocate(100).expect_err("too big");
        assert!(matches!(
            err,
            HeapError::OutOfMemory {
                provider: "static-arena",
                requested: 100
            }
        ));
    }

    #[test]
    fn start_epoch_resets_counter_and_injection() {
        let mut heap = heap();
        let _ = heap.allocate(8).expect("allocate");
        heap.arm_failure_after(3);
        let before = heap.epoch().number;
        heap.start_epoch();
        let epoch = heap.epoch();
        assert_eq!(epoch.number, before + 1);
        assert_eq!(epoch.live, 0);
        assert_eq!(epoch.fail_countdown, None);
        assert_eq!(epoch.owner, None);
    }
}
