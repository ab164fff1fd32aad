//! System Allocator - Accounting Wrapper around the Global Allocator
//!
//! Semua block (cell blocks, vector blocks, string slabs, large objects)
//! diambil lewat wrapper ini supaya:
//! - jumlah byte yang dipakai selalu diketahui
//! - `heap_limit` bisa ditegakkan
//! - emergency reserve dilepas tepat sebelum out-of-memory dilaporkan
//!
//! Failure never returns a null pointer to callers: it is always
//! `GcError::OutOfMemory`.

use crate::error::{GcError, Result};
use crate::logging::{log_event, GcEvent};
use std::alloc::Layout;
use std::ptr::NonNull;

/// Accounting wrapper around `std::alloc`
pub struct SystemAllocator {
    /// Bytes currently obtained, reserve included
    in_use: usize,

    /// Highest value `in_use` has reached
    peak: usize,

    /// Optional hard cap on `in_use`
    limit: Option<usize>,

    /// Emergency reserve, released on the first failure
    reserve: Option<Vec<u8>>,

    /// Configured reserve size
    reserve_size: usize,

    /// Set once the reserve has been spent, cleared by a successful refill
    memory_full: bool,
}

impl SystemAllocator {
    /// Create allocator and take the emergency reserve
    pub fn new(limit: Option<usize>, reserve_size: usize) -> Self {
        let mut sys = Self {
            in_use: 0,
            peak: 0,
            limit,
            reserve: None,
            reserve_size,
            memory_full: false,
        };
        sys.refill_reserve();
        sys
    }

    fn would_exceed(&self, size: usize) -> bool {
        match self.limit {
            Some(limit) => self.in_use.saturating_add(size) > limit,
            None => false,
        }
    }

    fn charge(&mut self, size: usize) {
        self.in_use += size;
        self.peak = self.peak.max(self.in_use);
    }

    /// Allocate memory with the given layout
    ///
    /// Memory is zeroed when `zeroed` is true.
    pub fn allocate(&mut self, layout: Layout, zeroed: bool) -> Result<NonNull<u8>> {
        debug_assert!(layout.size() > 0);

        if self.would_exceed(layout.size()) {
            return Err(self.out_of_memory(layout.size()));
        }

        let raw = unsafe {
            if zeroed {
                std::alloc::alloc_zeroed(layout)
            } else {
                std::alloc::alloc(layout)
            }
        };

        match NonNull::new(raw) {
            Some(ptr) => {
                self.charge(layout.size());
                Ok(ptr)
            },
            None => Err(self.out_of_memory(layout.size())),
        }
    }

    /// Return memory obtained from [`allocate`](Self::allocate)
    ///
    /// # Safety
    /// `ptr` must come from this allocator with the same `layout` and must
    /// not be used afterwards.
    pub unsafe fn release(&mut self, ptr: NonNull<u8>, layout: Layout) {
        std::alloc::dealloc(ptr.as_ptr(), layout);
        self.in_use = self.in_use.saturating_sub(layout.size());
    }

    /// Build the out-of-memory error, spending the reserve first
    fn out_of_memory(&mut self, requested: usize) -> GcError {
        let reserve_released = match self.reserve.take() {
            Some(reserve) => {
                self.in_use = self.in_use.saturating_sub(reserve.len());
                drop(reserve);
                true
            },
            None => false,
        };
        self.memory_full = true;

        log::error!(
            "memory exhausted: requested {} bytes with {} in use",
            requested,
            self.in_use
        );
        log_event(GcEvent::AllocationFailure {
            size: requested,
            reserve_released,
        });

        GcError::OutOfMemory {
            requested,
            reserve_released,
        }
    }

    /// Try to take the emergency reserve again
    ///
    /// Returns true when the reserve is held afterwards.
    pub fn refill_reserve(&mut self) -> bool {
        if self.reserve.is_some() || self.reserve_size == 0 {
            self.memory_full = false;
            return true;
        }
        if self.would_exceed(self.reserve_size) {
            return false;
        }

        let mut reserve = Vec::new();
        if reserve.try_reserve_exact(self.reserve_size).is_err() {
            return false;
        }
        reserve.resize(self.reserve_size, 0u8);
        self.charge(self.reserve_size);
        self.reserve = Some(reserve);
        self.memory_full = false;
        true
    }

    /// Whether the reserve has been spent and not yet refilled
    pub fn memory_full(&self) -> bool {
        self.memory_full
    }

    /// Bytes currently obtained from the system
    pub fn in_use(&self) -> usize {
        self.in_use
    }

    /// Highest number of bytes held at once
    pub fn peak(&self) -> usize {
        self.peak
    }

    /// Configured cap, if any
    pub fn limit(&self) -> Option<usize> {
        self.limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_and_release_accounting() {
        let mut sys = SystemAllocator::new(None, 1024);
        assert_eq!(sys.in_use(), 1024);

        let layout = Layout::from_size_align(4096, 4096).unwrap();
        let ptr = sys.allocate(layout, true).unwrap();
        assert_eq!(ptr.as_ptr() as usize % 4096, 0);
        assert_eq!(sys.in_use(), 1024 + 4096);

        unsafe { sys.release(ptr, layout) };
        assert_eq!(sys.in_use(), 1024);
        assert_eq!(sys.peak(), 1024 + 4096);
    }

    #[test]
    fn test_limit_releases_reserve_once() {
        let mut sys = SystemAllocator::new(Some(2048), 1024);
        let layout = Layout::from_size_align(4096, 8).unwrap();

        match sys.allocate(layout, false) {
            Err(GcError::OutOfMemory {
                reserve_released, ..
            }) => assert!(reserve_released),
            other => panic!("expected OOM, got {:?}", other.map(|_| ())),
        }
        assert!(sys.memory_full());
        assert_eq!(sys.in_use(), 0);

        match sys.allocate(layout, false) {
            Err(GcError::OutOfMemory {
                reserve_released, ..
            }) => assert!(!reserve_released),
            other => panic!("expected OOM, got {:?}", other.map(|_| ())),
        }

        assert!(sys.refill_reserve());
        assert!(!sys.memory_full());
    }
}
