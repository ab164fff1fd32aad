//! Marker Module - Mark Phase
//!
//! This module decides which objects are still reachable.
//!
//! Marking Algorithm:
//! - Roots are pushed onto an explicit [`MarkStack`]
//! - The stack is drained; each popped object is skipped if it is already
//!   marked or lives in pure space, otherwise marked and its references
//!   pushed
//! - Pairs follow their cdr in a loop and only push the car, so long lists
//!   do not grow the stack
//! - Symbols follow their bucket link the same way
//!
//! Hash tables with weakness are marked as containers only; their entries
//! are settled afterwards by the fixpoint in [`weak`].
//!
//! Objects inside a dump image carry their mark in the loader's side table
//! and are traced the first time they are reached.

pub mod bitmap;
pub mod mark_stack;
pub mod roots;
pub mod stack_scan;
pub mod weak;

pub use mark_stack::MarkStack;
pub use roots::{RootId, RootProvider, RootSet, RootStats};
pub use stack_scan::StackScanner;

use crate::allocator::{Allocator, CellArena, CellKind, Slot};
use crate::dump::DumpImage;
use crate::heap::registry::MemKind;
use crate::object::pseudo::HashTable;
use crate::object::vector::{contents, VectorHeader, VectorPtr};
use crate::object::{IntervalPtr, LispFloat, LispString, Pair, PvecType, Symbol, SymbolValue};
use crate::value::{Tag, Value};
use std::ptr::NonNull;

pub(crate) fn cell_of<T>(v: Value) -> NonNull<Slot<T>> {
    match NonNull::new(v.as_ptr::<Slot<T>>()) {
        Some(cell) => cell,
        None => crate::heap_corruption!("null object reference with tag {:?}", v.tag()),
    }
}

pub(crate) fn vector_of(v: Value) -> VectorPtr {
    match NonNull::new(v.as_ptr::<VectorHeader>()) {
        Some(ptr) => ptr,
        None => crate::heap_corruption!("null vector reference"),
    }
}

/// Mark-phase state for one cycle
pub struct Marker<'a> {
    heap: &'a Allocator,
    dump: &'a mut dyn DumpImage,
    stack: &'a mut MarkStack,
    /// Weak hash tables reached so far
    weak_tables: Vec<VectorPtr>,
    /// Objects marked this cycle
    marked: usize,
    /// Stack words that resolved to a heap object
    conservative_hits: usize,
}

impl<'a> Marker<'a> {
    pub fn new(heap: &'a Allocator, dump: &'a mut dyn DumpImage, stack: &'a mut MarkStack) -> Self {
        stack.reset();
        Self {
            heap,
            dump,
            stack,
            weak_tables: Vec::new(),
            marked: 0,
            conservative_hits: 0,
        }
    }

    /// Mark `v` and everything reachable from it
    pub fn mark(&mut self, v: Value) {
        self.stack.push(v);
        self.drain();
    }

    /// Queue `v` without draining
    pub fn push(&mut self, v: Value) {
        self.stack.push(v);
    }

    /// Treat a raw word as a possible reference
    ///
    /// Returns true when the word resolved to a live object.
    pub fn mark_conservative_word(&mut self, word: usize) -> bool {
        let hit = self
            .heap
            .object_at(word)
            .or_else(|| self.dump.object_at(word));
        match hit {
            Some(v) => {
                self.conservative_hits += 1;
                self.mark(v);
                true
            },
            None => false,
        }
    }

    /// Whether `v` will survive this cycle given the marks so far
    pub fn survives(&self, v: Value) -> bool {
        if !v.is_heap_object() {
            return true;
        }
        let addr = v.addr();
        if self.heap.is_pure(addr) {
            return true;
        }
        if self.dump.is_dump_image_address(addr) {
            return self.dump.is_dump_image_address_marked(addr);
        }
        unsafe {
            match v.tag() {
                Tag::Pair => CellArena::<Pair>::is_marked(cell_of(v)),
                Tag::Float => CellArena::<LispFloat>::is_marked(cell_of(v)),
                Tag::Symbol => CellArena::<Symbol>::is_marked(cell_of(v)),
                Tag::String => CellArena::<LispString>::is_marked(cell_of(v)),
                Tag::Vectorlike => {
                    let ptr = vector_of(v);
                    self.heap.vectors.is_zero_vector(ptr) || ptr.as_ref().is_marked()
                },
                _ => true,
            }
        }
    }

    fn verify_kind(&self, v: Value, expected: &[MemKind]) {
        if !cfg!(debug_assertions) {
            return;
        }
        match self.heap.registry.find(v.addr()) {
            Some(node) if expected.contains(&node.kind) => {},
            Some(node) => crate::heap_corruption!(
                "{} {:#x} lies in a {:?} block",
                v.type_name(),
                v.addr(),
                node.kind
            ),
            None => crate::heap_corruption!(
                "{} {:#x} is outside every heap block",
                v.type_name(),
                v.addr()
            ),
        }
    }

    fn claim_cell<T: CellKind>(&mut self, v: Value) -> bool {
        self.verify_kind(v, &[T::MEM_KIND]);
        let cell = cell_of::<T>(v);
        unsafe {
            // Referencing a free cell aborts inside `live`
            let _ = CellArena::<T>::live(cell);
            if CellArena::<T>::is_marked(cell) {
                return false;
            }
            CellArena::<T>::set_marked(cell);
        }
        true
    }

    /// Set the mark of `v`; false if it was already marked or is exempt
    fn claim(&mut self, v: Value) -> bool {
        let addr = v.addr();
        if self.heap.is_pure(addr) {
            return false;
        }
        if self.dump.is_dump_image_address(addr) {
            if self.dump.is_dump_image_address_marked(addr) {
                return false;
            }
            self.dump.mark_dump_image_address(addr);
            self.marked += 1;
            return true;
        }

        let fresh = match v.tag() {
            Tag::Pair => self.claim_cell::<Pair>(v),
            Tag::Float => self.claim_cell::<LispFloat>(v),
            Tag::Symbol => self.claim_cell::<Symbol>(v),
            Tag::String => self.claim_cell::<LispString>(v),
            Tag::Vectorlike => {
                let ptr = vector_of(v);
                if self.heap.vectors.is_zero_vector(ptr) {
                    return false;
                }
                self.verify_kind(v, &[MemKind::VectorBlock, MemKind::LargeVector]);
                let header = unsafe { &mut *ptr.as_ptr() };
                if header.is_marked() {
                    false
                } else {
                    header.set_marked();
                    true
                }
            },
            _ => crate::heap_corruption!("stray word {:#x} reached the marker", v.bits()),
        };
        if fresh {
            self.marked += 1;
        }
        fresh
    }

    /// Drain the mark stack
    pub fn drain(&mut self) {
        while let Some(v) = self.stack.pop() {
            self.trace(v);
        }
    }

    fn trace(&mut self, mut v: Value) {
        loop {
            if !v.is_heap_object() || !self.claim(v) {
                return;
            }

            match v.tag() {
                Tag::Pair => {
                    let pair = unsafe { CellArena::<Pair>::live(cell_of(v)) };
                    self.stack.push(pair.car);
                    v = pair.cdr;
                },
                Tag::Symbol => {
                    let sym = unsafe { CellArena::<Symbol>::live(cell_of(v)) };
                    self.stack.push(sym.name);
                    self.stack.push(sym.function);
                    self.stack.push(sym.plist);
                    match &sym.value {
                        SymbolValue::Plain(value) | SymbolValue::Alias(value) => {
                            self.stack.push(*value)
                        },
                        SymbolValue::Localized(binding) => {
                            self.stack.push(binding.where_);
                            self.stack.push(binding.default_value);
                            self.stack.push(binding.value);
                        },
                        SymbolValue::Forwarded(_) => {},
                    }
                    v = sym.next;
                },
                Tag::String => {
                    let s = unsafe { CellArena::<LispString>::live(cell_of(v)) };
                    if let Some(root) = s.intervals {
                        self.mark_intervals(root);
                    }
                    return;
                },
                Tag::Vectorlike => {
                    self.trace_vector(vector_of(v));
                    return;
                },
                _ => return,
            }
        }
    }

    fn trace_vector(&mut self, ptr: VectorPtr) {
        let header = unsafe { ptr.as_ref() };
        match header.pvec_type() {
            PvecType::Free => crate::heap_corruption!(
                "free vector chunk {:p} reached during marking",
                ptr.as_ptr()
            ),
            PvecType::HashTable => {
                let table = unsafe { &*(ptr.as_ptr() as *const HashTable) };
                self.stack.push(table.test);
                if table.weakness.is_weak() {
                    // Entries are settled by the weak fixpoint
                    if table.key_and_value.is_heap_object() {
                        self.claim(table.key_and_value);
                    }
                    self.weak_tables.push(ptr);
                } else {
                    self.stack.push(table.key_and_value);
                }
            },
            _ => unsafe {
                self.stack
                    .push_slots(contents(ptr), header.traced_slots());
            },
        }
    }

    fn mark_intervals(&mut self, root: IntervalPtr) {
        let mut pending = vec![root];
        while let Some(node) = pending.pop() {
            let interval = unsafe { CellArena::live(node) };
            if interval.marked {
                continue;
            }
            interval.marked = true;
            self.stack.push(interval.plist);
            pending.extend(interval.left);
            pending.extend(interval.right);
        }
    }

    /// Weak tables reached this cycle
    pub fn weak_tables(&self) -> &[VectorPtr] {
        &self.weak_tables
    }

    pub fn marked_count(&self) -> usize {
        self.marked
    }

    pub fn conservative_hits(&self) -> usize {
        self.conservative_hits
    }

    pub fn stack_high_water(&self) -> usize {
        self.stack.high_water()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GcConfig;
    use crate::dump::NoDumpImage;

    fn heap() -> Allocator {
        Allocator::new(&GcConfig::default().with_pure_size(0)).unwrap()
    }

    #[test]
    fn test_long_list_keeps_stack_flat() {
        let mut heap = heap();
        let mut list = Value::NIL;
        for i in 0..5000 {
            list = heap.alloc_pair(Value::fixnum(i), list).unwrap();
        }

        let mut dump = NoDumpImage;
        let mut stack = MarkStack::with_capacity(16);
        let mut marker = Marker::new(&heap, &mut dump, &mut stack);
        marker.mark(list);
        assert_eq!(marker.marked_count(), 5000);
        assert!(marker.stack_high_water() <= 2);
        assert!(marker.survives(list));
    }

    #[test]
    fn test_cycles_terminate() {
        let mut heap = heap();
        let a = heap.alloc_pair(Value::NIL, Value::NIL).unwrap();
        let b = heap.alloc_pair(a, a).unwrap();
        unsafe { CellArena::<Pair>::live(cell_of(a)) }.cdr = b;

        let mut dump = NoDumpImage;
        let mut stack = MarkStack::with_capacity(16);
        let mut marker = Marker::new(&heap, &mut dump, &mut stack);
        marker.mark(a);
        assert_eq!(marker.marked_count(), 2);
    }

    #[test]
    fn test_vector_slots_and_unreached_objects() {
        let mut heap = heap();
        let inner = heap.alloc_float(1.0).unwrap();
        let outside = heap.alloc_float(2.0).unwrap();
        let v = heap.alloc_vectorlike(VectorHeader::plain(3), true).unwrap();
        unsafe { *contents(vector_of(v)).add(1) = inner };

        let mut dump = NoDumpImage;
        let mut stack = MarkStack::with_capacity(16);
        let mut marker = Marker::new(&heap, &mut dump, &mut stack);
        marker.mark(v);
        assert!(marker.survives(inner));
        assert!(!marker.survives(outside));
        assert!(marker.survives(Value::fixnum(3)));
    }

    #[test]
    fn test_conservative_word_marks_interior_pointer() {
        let mut heap = heap();
        let target = heap.alloc_pair(Value::NIL, Value::NIL).unwrap();

        let mut dump = NoDumpImage;
        let mut stack = MarkStack::with_capacity(16);
        let mut marker = Marker::new(&heap, &mut dump, &mut stack);
        assert!(!marker.mark_conservative_word(0xdead_0000));
        assert!(marker.mark_conservative_word(target.addr() + 8));
        assert!(marker.survives(target));
        assert_eq!(marker.conservative_hits(), 1);
    }
}
