//! # Read-Copy-Update List
//!
//! Reader-permissive, writer-synchronized list of shared objects.
//!
//! Readers take a snapshot of the current generation and walk it without
//! holding any lock, so a traversal never blocks on writers and never sees a
//! half-unlinked entry. Writers are serialized, publish a new generation, and
//! then wait for a grace period: every reader still holding the previous
//! generation must drop it before the writer returns. Once
//! [`RcuList::remove`] returns, no traversal can reach the removed object.
//!
//! A thread must not modify the list while it holds a read guard on it; the
//! grace period would wait for itself.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use core::ops::Deref;

use spin::{Mutex, RwLock};

type Generation<T> = Arc<Vec<Arc<T>>>;

/// Read-mostly list with deferred reclamation
pub struct RcuList<T> {
    /// Current generation; the lock only covers swapping/cloning the pointer
    current: RwLock<Generation<T>>,
    /// Serializes writers
    writer: Mutex<()>,
}

impl<T> RcuList<T> {
    /// Create an empty list
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(Vec::new())),
            writer: Mutex::new(()),
        }
    }

    /// Enter a read-side critical section
    pub fn read(&self) -> RcuReadGuard<T> {
        RcuReadGuard {
            snapshot: Arc::clone(&self.current.read()),
        }
    }

    /// Number of entries in the current generation
    pub fn len(&self) -> usize {
        self.current.read().len()
    }

    /// Is the current generation empty?
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Is `item` in the current generation?
    pub fn contains(&self, item: &Arc<T>) -> bool {
        self.current.read().iter().any(|e| Arc::ptr_eq(e, item))
    }

    /// Add `item`, returning false if it is already present
    pub fn insert(&self, item: Arc<T>) -> bool {
        let _writer = self.writer.lock();
        let mut next = Vec::clone(&self.current.read());
        if next.iter().any(|e| Arc::ptr_eq(e, &item)) {
            return false;
        }
        next.push(item);
        self.publish(next);
        true
    }

    /// Remove `item`, returning false if it was not present
    ///
    /// Waits for every reader of the old generation before returning.
    pub fn remove(&self, item: &Arc<T>) -> bool {
        let _writer = self.writer.lock();
        let mut next = Vec::clone(&self.current.read());
        let Some(pos) = next.iter().position(|e| Arc::ptr_eq(e, item)) else {
            return false;
        };
        // Order is irrelevant to readers
        next.swap_remove(pos);
        self.publish(next);
        true
    }

    fn publish(&self, next: Vec<Arc<T>>) {
        let old = core::mem::replace(&mut *self.current.write(), Arc::new(next));
        Self::synchronize(old);
    }

    /// Wait until this writer holds the only reference to `old`
    fn synchronize(old: Generation<T>) {
        while Arc::strong_count(&old) > 1 {
            core::hint::spin_loop();
        }
    }
}

impl<T> Default for RcuList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for RcuList<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RcuList").field("len", &self.len()).finish()
    }
}

/// Evidence of an ongoing read-side critical section
///
/// Dereferences to the snapshot being traversed.
pub struct RcuReadGuard<T> {
    snapshot: Generation<T>,
}

impl<T> Deref for RcuReadGuard<T> {
    type Target = [Arc<T>];

    fn deref(&self) -> &[Arc<T>] {
        &self.snapshot
    }
}

impl<T> RcuReadGuard<T> {
    /// Explicitly end the critical section
    pub fn unlock(self) {}
}
