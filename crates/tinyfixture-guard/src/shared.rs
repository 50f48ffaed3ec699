//! Cloneable, thread-safe handle to a [`GuardedHeap`].
//!
//! The runner owns one `SharedHeap` and lends clones to tests. A test may
//! hand a clone to another thread; the heap notices the foreign thread on
//! its first allocation and reports [`HeapError::ForeignThread`].
//!
//! [`HeapError::ForeignThread`]: crate::HeapError::ForeignThread

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::heap::GuardedHeap;

#[derive(Debug, Clone, Default)]
pub struct SharedHeap {
    inner: Arc<Mutex<GuardedHeap>>,
}

impl SharedHeap {
    #[must_use]
    pub fn new(heap: GuardedHeap) -> Self {
        Self {
            inner: Arc::new(Mutex::new(heap)),
        }
    }

    /// Lock the heap for the duration of the returned guard.
    pub fn lock(&self) -> MutexGuard<'_, GuardedHeap> {
        self.inner.lock()
    }

    /// Whether both handles refer to the same heap.
    #[must_use]
    pub fn same_heap(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl From<GuardedHeap> for SharedHeap {
    fn from(heap: GuardedHeap) -> Self {
        Self::new(heap)
    }
}
