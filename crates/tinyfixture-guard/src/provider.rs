//! Raw memory providers underneath the guarded heap.
//!
//! A provider only hands out and takes back aligned regions; all guard
//! bookkeeping lives in [`crate::heap`]. Two providers ship with the crate:
//! - [`SystemProvider`]: the process heap via `std::alloc`.
//! - [`StaticArena`]: a fixed-capacity bump arena for targets without a heap.
//!   Regions are handed out strictly from the top and only the most recent
//!   one can be given back; anything released out of order stays stranded
//!   until the arena is dropped. Nothing is ever coalesced.

#![allow(unsafe_code)]

use std::alloc::{Layout, alloc, dealloc};
use std::ptr::NonNull;

use crate::layout::{BLOCK_ALIGN, align_up};

/// Default capacity of a [`StaticArena`] in bytes.
pub const DEFAULT_ARENA_BYTES: usize = 256;

/// Source of raw, [`BLOCK_ALIGN`]-aligned regions.
pub trait HeapProvider: Send {
    /// Short name used in diagnostics.
    fn name(&self) -> &'static str;

    /// Hand out a region of at least `total` bytes, or `None` when exhausted.
    fn acquire(&mut self, total: usize) -> Option<NonNull<u8>>;

    /// Take back a region.
    ///
    /// # Safety
    ///
    /// `base` must have been returned by `acquire(total)` on this provider and
    /// must not have been released since.
    unsafe fn release(&mut self, base: NonNull<u8>, total: usize);

    /// Grow the region at `base` from `old_total` to `new_total` bytes without
    /// moving it. Returns false when that is not possible.
    fn try_grow(&mut self, _base: NonNull<u8>, _old_total: usize, _new_total: usize) -> bool {
        false
    }
}

/// Provider backed by the process heap.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProvider;

impl HeapProvider for SystemProvider {
    fn name(&self) -> &'static str {
        "system"
    }

    fn acquire(&mut self, total: usize) -> Option<NonNull<u8>> {
        let layout = Layout::from_size_align(total, BLOCK_ALIGN).ok()?;
        if layout.size() == 0 {
            return None;
        }
        // SAFETY: layout has non-zero size.
        NonNull::new(unsafe { alloc(layout) })
    }

    unsafe fn release(&mut self, base: NonNull<u8>, total: usize) {
        let Ok(layout) = Layout::from_size_align(total, BLOCK_ALIGN) else {
            return;
        };
        // SAFETY: caller guarantees `base` came from `acquire(total)`, which used this layout.
        unsafe { dealloc(base.as_ptr(), layout) }
    }
}

#[derive(Clone, Copy)]
#[repr(C, align(16))]
struct Chunk([u8; BLOCK_ALIGN]);

/// Fixed-capacity, strictly LIFO, non-coalescing bump arena.
pub struct StaticArena {
    chunks: NonNull<[Chunk]>,
    base: NonNull<u8>,
    capacity: usize,
    top: usize,
}

// SAFETY: the arena exclusively owns its buffer and only touches it through `&mut self`.
unsafe impl Send for StaticArena {}

impl StaticArena {
    /// Arena of [`DEFAULT_ARENA_BYTES`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_ARENA_BYTES)
    }

    /// Arena of at least `capacity` bytes (rounded up to [`BLOCK_ALIGN`]).
    ///
    /// The buffer is reserved once, here; the arena never asks for more.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let count = capacity.div_ceil(BLOCK_ALIGN).max(1);
        let boxed: Box<[Chunk]> = vec![Chunk([0; BLOCK_ALIGN]); count].into_boxed_slice();
        let raw: *mut [Chunk] = Box::into_raw(boxed);
        // SAFETY: Box::into_raw never returns null.
        let chunks = unsafe { NonNull::new_unchecked(raw) };
        Self {
            chunks,
            base: chunks.cast::<u8>(),
            capacity: count * BLOCK_ALIGN,
            top: 0,
        }
    }

    /// Total bytes the arena can hand out.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes between the arena start and the current top, stranded regions included.
    #[must_use]
    pub fn used(&self) -> usize {
        self.top
    }

    fn offset_of(&self, ptr: NonNull<u8>) -> Option<usize> {
        let offset = (ptr.as_ptr() as usize).checked_sub(self.base.as_ptr() as usize)?;
        (offset < self.capacity).then_some(offset)
    }
}

impl Default for StaticArena {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for StaticArena {
    fn drop(&mut self) {
        // SAFETY: `chunks` came from Box::into_raw in `with_capacity` and is dropped once.
        drop(unsafe { Box::from_raw(self.chunks.as_ptr()) });
    }
}

impl std::fmt::Debug for StaticArena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticArena")
            .field("capacity", &self.capacity)
            .field("top", &self.top)
            .finish()
    }
}

impl HeapProvider for StaticArena {
    fn name(&self) -> &'static str {
        "static-arena"
    }

    fn acquire(&mut self, total: usize) -> Option<NonNull<u8>> {
        let size = align_up(total)?;
        if size == 0 {
            return None;
        }
        let end = self.top.checked_add(size)?;
        if end > self.capacity {
            return None;
        }
        // SAFETY: top < end <= capacity, so the offset stays inside the buffer.
        let region = unsafe { self.base.add(self.top) };
        self.top = end;
        Some(region)
    }

    unsafe fn release(&mut self, base: NonNull<u8>, total: usize) {
        let (Some(offset), Some(size)) = (self.offset_of(base), align_up(total)) else {
            return;
        };
        // Only the most recent region can be taken back; others stay stranded.
        if offset.checked_add(size) == Some(self.top) {
            self.top = offset;
        }
    }

    fn try_grow(&mut self, base: NonNull<u8>, old_total: usize, new_total: usize) -> bool {
        let (Some(offset), Some(old), Some(new)) = (
            self.offset_of(base),
            align_up(old_total),
            align_up(new_total),
        ) else {
            return false;
        };
        if offset.checked_add(old) != Some(self.top) {
            return false;
        }
        match offset.checked_add(new) {
            Some(end) if end <= self.capacity => {
                self.top = end;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_provider_hands_out_aligned_regions() {
        let mut provider = SystemProvider;
        let region = provider.acquire(40).expect("system acquire");
        assert_eq!(region.as_ptr() as usize % BLOCK_ALIGN, 0);
        // SAFETY: region came from acquire(40) and is released once.
        unsafe { provider.release(region, 40) };
    }

    #[test]
    fn system_provider_refuses_zero_bytes() {
        assert!(SystemProvider.acquire(0).is_none());
    }

    #[test]
    fn arena_capacity_rounds_up() {
        let arena = StaticArena::with_capacity(100);
        assert_eq!(arena.capacity(), 112);
        assert_eq!(StaticArena::new().capacity(), DEFAULT_ARENA_BYTES);
    }

    #[test]
    fn arena_hands_out_consecutive_aligned_regions() {
        let mut arena = StaticArena::with_capacity(128);
        let a = arena.acquire(20).expect("first");
        let b = arena.acquire(16).expect("second");
        assert_eq!(b.as_ptr() as usize - a.as_ptr() as usize, 32);
        assert_eq!(a.as_ptr() as usize % BLOCK_ALIGN, 0);
        assert_eq!(arena.used(), 48);
    }

    #[test]
    fn arena_reuses_top_region_after_lifo_release() {
        let mut arena = StaticArena::with_capacity(64);
        let a = arena.acquire(32).expect("a");
        // SAFETY: a came from acquire(32).
        unsafe { arena.release(a, 32) };
        assert_eq!(arena.used(), 0);
        let again = arena.acquire(32).expect("again");
        assert_eq!(again, a);
    }

    #[test]
    fn arena_strands_out_of_order_release() {
        let mut arena = StaticArena::with_capacity(64);
        let a = arena.acquire(16).expect("a");
        let _b = arena.acquire(16).expect("b");
        // SAFETY: a came from acquire(16).
        unsafe { arena.release(a, 16) };
        assert_eq!(arena.used(), 32, "non-top release must not move the top");
    }

    #[test]
    fn arena_refuses_when_exhausted() {
        let mut arena = StaticArena::with_capacity(32);
        assert!(arena.acquire(32).is_some());
        assert!(arena.acquire(1).is_none());
    }

    #[test]
    fn arena_grows_top_region_in_place_only() {
        let mut arena = StaticArena::with_capacity(128);
        let a = arena.acquire(16).expect("a");
        assert!(arena.try_grow(a, 16, 48));
        assert_eq!(arena.used(), 48);

        let b = arena.acquire(16).expect("b");
        assert!(!arena.try_grow(a, 48, 64), "a is no longer on top");
        assert!(!arena.try_grow(b, 16, 256), "beyond capacity");
        assert!(arena.try_grow(b, 16, 80));
        assert_eq!(arena.used(), 128);
    }
}
