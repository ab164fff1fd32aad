//! Shared Collector - One Heap, Many Threads
//!
//! The heap is single-threaded: at most one thread may allocate or collect
//! at a time. [`SharedCollector`] enforces that with a global lock. Each
//! entry re-attaches the conservative scanner to the thread holding the
//! lock, so the stack being scanned is always the caller's.
//!
//! ```text
//! thread A ──┐
//!            ├── lock ── attach_current_thread ── f(&mut gc) ── unlock
//! thread B ──┘
//! ```

use crate::gc::GarbageCollector;
use parking_lot::Mutex as ParkingMutex;
use std::sync::Arc;
use std::time::Duration;

struct CollectorCell(GarbageCollector);

// Callbacks stored in the collector are not `Send`. `SharedCollector::new`
// puts the burden on the caller; the mutex serialises all access.
unsafe impl Send for CollectorCell {}

/// Cloneable handle to a collector guarded by a global lock
#[derive(Clone)]
pub struct SharedCollector {
    inner: Arc<ParkingMutex<CollectorCell>>,
}

impl SharedCollector {
    /// Wrap `gc` for use from several threads
    ///
    /// # Safety
    /// Every callback already installed in `gc`, and every one installed
    /// later through [`with`](Self::with), must be safe to call from any
    /// thread: finalizer runner, post-GC hooks, teardown hooks and root
    /// providers alike. Values must not be shared between threads outside
    /// the lock.
    pub unsafe fn new(gc: GarbageCollector) -> Self {
        Self {
            inner: Arc::new(ParkingMutex::new(CollectorCell(gc))),
        }
    }

    /// Run `f` with exclusive access to the heap
    pub fn with<R>(&self, f: impl FnOnce(&mut GarbageCollector) -> R) -> R {
        let mut guard = self.inner.lock();
        let gc = &mut guard.0;
        gc.attach_current_thread();
        f(gc)
    }

    /// Like [`with`](Self::with), giving up after `timeout`
    pub fn try_with<R>(
        &self,
        timeout: Duration,
        f: impl FnOnce(&mut GarbageCollector) -> R,
    ) -> Option<R> {
        let mut guard = self.inner.try_lock_for(timeout)?;
        let gc = &mut guard.0;
        gc.attach_current_thread();
        Some(f(gc))
    }

    /// Whether another thread holds the heap right now
    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }
}

impl std::fmt::Debug for SharedCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedCollector")
            .field("locked", &self.inner.is_locked())
            .finish()
    }
}
