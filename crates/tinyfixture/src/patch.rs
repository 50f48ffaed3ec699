//! Restorable overwrites of global values.
//!
//! Code under test reads its collaborators through a [`Patchable`] cell. A
//! test swaps in a double with [`PatchStack::set`]; the runner calls
//! [`PatchStack::undo_all`] after teardown, restoring every original value in
//! reverse order, whether or not the test passed.

use parking_lot::Mutex;

use crate::failure::{Failure, FailureKind};

/// Number of patches a single test may hold at once.
pub const PATCH_CAPACITY: usize = 5;

/// Global cell whose value a test may temporarily replace.
///
/// ```
/// use tinyfixture::Patchable;
///
/// static RETRIES: Patchable<u32> = Patchable::new(3);
/// assert_eq!(RETRIES.get(), 3);
/// ```
pub struct Patchable<T> {
    cell: Mutex<T>,
}

impl<T> Patchable<T> {
    pub const fn new(value: T) -> Self {
        Self {
            cell: parking_lot::const_mutex(value),
        }
    }

    /// Borrow the current value.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.cell.lock())
    }

    /// Store `value`, returning the previous one.
    pub fn replace(&self, value: T) -> T {
        std::mem::replace(&mut *self.cell.lock(), value)
    }
}

impl<T: Clone> Patchable<T> {
    pub fn get(&self) -> T {
        self.cell.lock().clone()
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Patchable<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Patchable").field(&*self.cell.lock()).finish()
    }
}

trait Restore {
    fn restore(self: Box<Self>);
}

struct Saved<T: 'static> {
    target: &'static Patchable<T>,
    original: T,
}

impl<T: 'static> Restore for Saved<T> {
    fn restore(self: Box<Self>) {
        let Saved { target, original } = *self;
        target.replace(original);
    }
}

/// Bounded LIFO record of the patches applied by the running test.
pub struct PatchStack {
    saved: Vec<Box<dyn Restore>>,
    capacity: usize,
    overflow: Option<Failure>,
}

impl PatchStack {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(PATCH_CAPACITY)
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            saved: Vec::with_capacity(capacity),
            capacity,
            overflow: None,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.saved.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.saved.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Overwrite `target` with `value`, remembering the original.
    ///
    /// # Errors
    ///
    /// A `PatchCapacity` failure when the stack is full; `target` is left alone.
    /// The first such failure is also latched until [`take_overflow`](Self::take_overflow).
    #[track_caller]
    pub fn set<T: 'static>(&mut self, target: &'static Patchable<T>, value: T) -> Result<(), Failure> {
        if self.saved.len() >= self.capacity {
            let failure = Failure::new(FailureKind::PatchCapacity, "Too many pointers set");
            self.overflow.get_or_insert_with(|| failure.clone());
            return Err(failure);
        }
        let original = target.replace(value);
        self.saved.push(Box::new(Saved { target, original }));
        Ok(())
    }

    /// Forget all records and any latched overflow without restoring anything.
    pub fn reset_for_test(&mut self) {
        self.saved.clear();
        self.overflow = None;
    }

    /// The latched capacity failure, if any, clearing it.
    pub fn take_overflow(&mut self) -> Option<Failure> {
        self.overflow.take()
    }

    /// Restore every patched value, newest first.
    pub fn undo_all(&mut self) {
        while let Some(saved) = self.saved.pop() {
            saved.restore();
        }
    }
}

impl Default for PatchStack {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PatchStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatchStack")
            .field("len", &self.saved.len())
            .field("capacity", &self.capacity)
            .field("overflowed", &self.overflow.is_some())
            .finish()
    }
}
