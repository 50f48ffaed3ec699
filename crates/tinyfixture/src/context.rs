//! What a running test can reach: the guarded heap and the patch stack.

use parking_lot::MutexGuard;
use tinyfixture_guard::{GuardedHeap, SharedHeap};

use crate::failure::Failure;
use crate::patch::{PatchStack, Patchable};

/// Handed to every setup, body and teardown step.
pub struct TestContext<'r> {
    heap: &'r SharedHeap,
    patches: &'r mut PatchStack,
    group: &'r str,
    name: &'r str,
}

impl<'r> TestContext<'r> {
    pub(crate) fn new(
        heap: &'r SharedHeap,
        patches: &'r mut PatchStack,
        group: &'r str,
        name: &'r str,
    ) -> Self {
        Self {
            heap,
            patches,
            group,
            name,
        }
    }

    #[must_use]
    pub fn group(&self) -> &str {
        self.group
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.name
    }

    /// Lock the guarded heap. Release the guard before calling code that
    /// locks it again.
    pub fn heap(&self) -> MutexGuard<'_, GuardedHeap> {
        self.heap.lock()
    }

    /// A clone of the heap handle, e.g. for handing to code under test.
    #[must_use]
    pub fn heap_handle(&self) -> SharedHeap {
        self.heap.clone()
    }

    /// Make the `(k+1)`-th allocation attempt from now fail.
    pub fn fail_allocations_after(&self, k: u32) {
        self.heap.lock().arm_failure_after(k);
    }

    /// Replace `target` with `value` until the test ends.
    ///
    /// # Errors
    ///
    /// A `PatchCapacity` failure when the test already holds the maximum
    /// number of patches.
    #[track_caller]
    pub fn patch<T: 'static>(&mut self, target: &'static Patchable<T>, value: T) -> Result<(), Failure> {
        self.patches.set(target, value)
    }

    pub(crate) fn undo_patches(&mut self) {
        self.patches.undo_all();
    }

    /// Patches currently held by this test.
    #[must_use]
    pub fn patch_count(&self) -> usize {
        self.patches.len()
    }
}
