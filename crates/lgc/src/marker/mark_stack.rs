//! Mark Stack - Explicit Traversal Stack
//!
//! Marking tidak pernah rekursif: setiap referensi yang belum di-trace
//! di-push ke stack ini. Vector slots di-push sebagai satu range
//! `(ptr, n)` sehingga vector besar hanya makan satu entry.

use crate::value::Value;

/// One pending unit of marking work
#[derive(Debug, Clone, Copy)]
pub enum MarkEntry {
    Value(Value),
    /// `len` consecutive slots starting at `start`
    Slots { start: *const Value, len: usize },
}

/// Explicit LIFO of pending marking work
pub struct MarkStack {
    entries: Vec<MarkEntry>,
    /// Highest depth reached, for diagnostics
    high_water: usize,
}

impl MarkStack {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            high_water: 0,
        }
    }

    /// Push a value; immediates are dropped right away
    pub fn push(&mut self, value: Value) {
        if value.is_heap_object() {
            self.entries.push(MarkEntry::Value(value));
            self.high_water = self.high_water.max(self.entries.len());
        }
    }

    /// Push `len` slots starting at `start`
    ///
    /// # Safety
    /// The slots must stay valid until the entry is popped.
    pub unsafe fn push_slots(&mut self, start: *const Value, len: usize) {
        if len > 0 {
            self.entries.push(MarkEntry::Slots { start, len });
            self.high_water = self.high_water.max(self.entries.len());
        }
    }

    /// Pop the next value to trace
    ///
    /// Slot ranges are consumed one value at a time.
    pub fn pop(&mut self) -> Option<Value> {
        loop {
            match self.entries.pop()? {
                MarkEntry::Value(v) => return Some(v),
                MarkEntry::Slots { start, len } => {
                    let v = unsafe { *start };
                    if len > 1 {
                        self.entries.push(MarkEntry::Slots {
                            start: unsafe { start.add(1) },
                            len: len - 1,
                        });
                    }
                    if v.is_heap_object() {
                        return Some(v);
                    }
                },
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn high_water(&self) -> usize {
        self.high_water
    }

    /// Forget everything and reset the high-water mark
    pub fn reset(&mut self) {
        self.entries.clear();
        self.high_water = 0;
    }
}
