//! Cell Arena - Fixed-Size Block Allocator
//!
//! Each fixed-size kind (pair, float, symbol, interval, string header) owns
//! one `CellArena`. Blocks are `CELL_BLOCK_BYTES` long and aligned to their
//! own size, so the block holding any cell is found by masking the cell's
//! address.
//!
//! Block layout:
//! ```text
//! base                                     base + CELL_BLOCK_BYTES
//! ┌──────┬──────┬──────┬─────┬──────┬───────────────┬─────┐
//! │slot 0│slot 1│slot 2│ ... │slot n│ mark bitmap   │ pad │
//! └──────┴──────┴──────┴─────┴──────┴───────────────┴─────┘
//! ```
//! The bitmap only exists for kinds with `SIDE_MARKS`; string headers and
//! intervals keep their mark flag inline.
//!
//! Allocation order: pop the free list, else bump the fill index of the
//! newest block, else take a new block. Free cells are `Slot::Free` and
//! carry the next free-list link in place of the object.

use crate::error::Result;
use crate::heap::registry::{HeapRegistry, MemKind};
use crate::heap::system::SystemAllocator;
use crate::marker::bitmap::MarkBits;
use std::alloc::Layout;
use std::marker::PhantomData;
use std::mem;
use std::ptr::{self, NonNull};

/// Size and alignment of every cell block
pub const CELL_BLOCK_BYTES: usize = 1 << 10;

/// A cell: either a live object or a free-list link
pub enum Slot<T> {
    Live(T),
    Free(Option<NonNull<Slot<T>>>),
}

/// Per-kind arena parameters
pub trait CellKind: Sized {
    /// Registry kind for blocks of this arena
    const MEM_KIND: MemKind;

    /// Name used in statistics
    const NAME: &'static str;

    /// Mark bits live in the block's side bitmap
    const SIDE_MARKS: bool;

    /// Inline mark flag (kinds without side marks)
    fn inline_mark(&self) -> bool {
        false
    }

    fn set_inline_mark(&mut self, _marked: bool) {}
}

/// Derived block geometry for one cell type
#[derive(Debug, Clone, Copy)]
pub struct Geometry {
    pub slot_size: usize,
    pub capacity: usize,
    pub marks_offset: usize,
    pub mark_words: usize,
}

impl Geometry {
    const fn compute(slot_size: usize, side_marks: bool) -> Geometry {
        if !side_marks {
            return Geometry {
                slot_size,
                capacity: CELL_BLOCK_BYTES / slot_size,
                marks_offset: CELL_BLOCK_BYTES,
                mark_words: 0,
            };
        }

        let mut capacity = CELL_BLOCK_BYTES * 8 / (slot_size * 8 + 1);
        loop {
            let mark_words = (capacity + 63) / 64;
            let marks_offset = capacity * slot_size;
            if marks_offset + mark_words * 8 <= CELL_BLOCK_BYTES {
                return Geometry {
                    slot_size,
                    capacity,
                    marks_offset,
                    mark_words,
                };
            }
            capacity -= 1;
        }
    }
}

/// Result of sweeping one arena
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepCount {
    pub live: usize,
    pub free: usize,
    pub blocks_released: usize,
}

/// Fixed-size cell allocator for one object kind
pub struct CellArena<T: CellKind> {
    /// Block bases, oldest first; the last one is being filled
    blocks: Vec<NonNull<u8>>,

    /// Cells handed out from the newest block
    fill: usize,

    /// Head of the free list
    free_head: Option<NonNull<Slot<T>>>,

    /// Cells currently on the free list
    free_count: usize,

    _marker: PhantomData<T>,
}

impl<T: CellKind> CellArena<T> {
    pub const GEOMETRY: Geometry = Geometry::compute(mem::size_of::<Slot<T>>(), T::SIDE_MARKS);

    pub fn new() -> Self {
        Self {
            blocks: Vec::new(),
            fill: 0,
            free_head: None,
            free_count: 0,
            _marker: PhantomData,
        }
    }

    fn block_layout() -> Layout {
        // CELL_BLOCK_BYTES is a non-zero power of two
        match Layout::from_size_align(CELL_BLOCK_BYTES, CELL_BLOCK_BYTES) {
            Ok(layout) => layout,
            Err(_) => unreachable!("cell block layout"),
        }
    }

    fn slot_at(base: NonNull<u8>, index: usize) -> NonNull<Slot<T>> {
        debug_assert!(index < Self::GEOMETRY.capacity);
        unsafe { base.cast::<Slot<T>>().add(index) }
    }

    fn block_base(cell: NonNull<Slot<T>>) -> usize {
        cell.as_ptr() as usize & !(CELL_BLOCK_BYTES - 1)
    }

    fn marks_of(base: usize) -> MarkBits {
        let g = Self::GEOMETRY;
        unsafe { MarkBits::from_raw((base + g.marks_offset) as *mut u64, g.mark_words) }
    }

    fn new_block(&mut self, sys: &mut SystemAllocator, registry: &mut HeapRegistry) -> Result<()> {
        let base = sys.allocate(Self::block_layout(), false)?;
        if T::SIDE_MARKS {
            Self::marks_of(base.as_ptr() as usize).clear_all();
        }
        let start = base.as_ptr() as usize;
        registry.insert(start, start + CELL_BLOCK_BYTES, T::MEM_KIND);
        self.blocks.push(base);
        self.fill = 0;
        Ok(())
    }

    /// Allocate a cell holding `value`
    pub fn allocate(
        &mut self,
        value: T,
        sys: &mut SystemAllocator,
        registry: &mut HeapRegistry,
    ) -> Result<NonNull<Slot<T>>> {
        if let Some(head) = self.free_head {
            let next = match unsafe { head.as_ref() } {
                Slot::Free(next) => *next,
                Slot::Live(_) => crate::heap_corruption!(
                    "live {} cell {:p} found on the free list",
                    T::NAME,
                    head.as_ptr()
                ),
            };
            self.free_head = next;
            self.free_count -= 1;
            unsafe { ptr::write(head.as_ptr(), Slot::Live(value)) };
            return Ok(head);
        }

        if self.blocks.is_empty() || self.fill == Self::GEOMETRY.capacity {
            self.new_block(sys, registry)?;
        }

        let base = match self.blocks.last() {
            Some(base) => *base,
            None => unreachable!("a block was just allocated"),
        };
        let cell = Self::slot_at(base, self.fill);
        unsafe { ptr::write(cell.as_ptr(), Slot::Live(value)) };
        self.fill += 1;
        Ok(cell)
    }

    /// Borrow the object in a live cell
    ///
    /// # Safety
    /// `cell` must point at an initialized slot of this arena.
    pub unsafe fn live<'a>(cell: NonNull<Slot<T>>) -> &'a mut T {
        match &mut *cell.as_ptr() {
            Slot::Live(value) => value,
            Slot::Free(_) => crate::heap_corruption!(
                "free {} cell {:p} referenced as live",
                T::NAME,
                cell.as_ptr()
            ),
        }
    }

    /// Query the mark bit of a live cell
    ///
    /// # Safety
    /// `cell` must be a live cell of an arena of this kind.
    pub unsafe fn is_marked(cell: NonNull<Slot<T>>) -> bool {
        if T::SIDE_MARKS {
            let base = Self::block_base(cell);
            let index = (cell.as_ptr() as usize - base) / Self::GEOMETRY.slot_size;
            Self::marks_of(base).get(index)
        } else {
            Self::live(cell).inline_mark()
        }
    }

    /// Set the mark bit of a live cell
    ///
    /// # Safety
    /// `cell` must be a live cell of an arena of this kind.
    pub unsafe fn set_marked(cell: NonNull<Slot<T>>) {
        if T::SIDE_MARKS {
            let base = Self::block_base(cell);
            let index = (cell.as_ptr() as usize - base) / Self::GEOMETRY.slot_size;
            Self::marks_of(base).set(index);
        } else {
            Self::live(cell).set_inline_mark(true);
        }
    }

    /// Resolve an arbitrary address inside a block of this arena to the
    /// live cell containing it
    ///
    /// The caller has already established through the registry that `addr`
    /// lies inside a block of this kind.
    pub fn live_cell_containing(&self, addr: usize) -> Option<NonNull<Slot<T>>> {
        let g = Self::GEOMETRY;
        let base = addr & !(CELL_BLOCK_BYTES - 1);
        let offset = addr - base;
        if offset >= g.capacity * g.slot_size {
            return None;
        }

        let index = offset / g.slot_size;
        let newest = self.blocks.last().map(|b| b.as_ptr() as usize);
        if newest == Some(base) && index >= self.fill {
            return None;
        }

        let base_ptr = NonNull::new(base as *mut u8)?;
        let cell = Self::slot_at(base_ptr, index);
        match unsafe { cell.as_ref() } {
            Slot::Live(_) => Some(cell),
            Slot::Free(_) => None,
        }
    }

    fn initialized_in(&self, block_index: usize) -> usize {
        if block_index + 1 == self.blocks.len() {
            self.fill
        } else {
            Self::GEOMETRY.capacity
        }
    }

    /// Visit every live cell
    pub fn for_each_live(&self, mut f: impl FnMut(NonNull<Slot<T>>, &T)) {
        for (i, base) in self.blocks.iter().enumerate() {
            for index in 0..self.initialized_in(i) {
                let cell = Self::slot_at(*base, index);
                if let Slot::Live(value) = unsafe { cell.as_ref() } {
                    f(cell, value);
                }
            }
        }
    }

    /// Reclaim every unmarked cell and clear marks on survivors
    ///
    /// `on_free` sees each dying object before it is dropped. Blocks that
    /// end up entirely free are returned to the system once
    /// `retained_blocks` blocks' worth of free cells has been kept. The
    /// block being filled is never returned.
    pub fn sweep(
        &mut self,
        retained_blocks: usize,
        sys: &mut SystemAllocator,
        registry: &mut HeapRegistry,
        mut on_free: impl FnMut(&mut T),
    ) -> SweepCount {
        let g = Self::GEOMETRY;
        let keep_threshold = retained_blocks.saturating_mul(g.capacity);
        let mut count = SweepCount::default();
        let mut free_head: Option<NonNull<Slot<T>>> = None;
        let mut kept: Vec<NonNull<u8>> = Vec::with_capacity(self.blocks.len());
        let newest = self.blocks.len().wrapping_sub(1);

        for block_index in (0..self.blocks.len()).rev() {
            let base = self.blocks[block_index];
            let lim = self.initialized_in(block_index);
            let marks = T::SIDE_MARKS.then(|| Self::marks_of(base.as_ptr() as usize));
            let mut this_free = 0;
            let block_head = free_head;

            for index in 0..lim {
                let cell = Self::slot_at(base, index);
                let slot = unsafe { &mut *cell.as_ptr() };
                let marked = match &*slot {
                    Slot::Free(_) => false,
                    Slot::Live(value) => match &marks {
                        Some(bits) => bits.get(index),
                        None => value.inline_mark(),
                    },
                };

                if marked {
                    if let Slot::Live(value) = &mut *slot {
                        value.set_inline_mark(false);
                    }
                    count.live += 1;
                    continue;
                }

                if let Slot::Live(value) = &mut *slot {
                    on_free(value);
                }
                // Dropping the old Live value releases anything it owns
                *slot = Slot::Free(free_head);
                free_head = Some(cell);
                this_free += 1;
            }

            if let Some(bits) = &marks {
                bits.clear_all();
            }

            if this_free == g.capacity && block_index != newest && count.free >= keep_threshold {
                // Every cell of this block was just pushed; unwind them
                free_head = block_head;
                registry.delete(base.as_ptr() as usize);
                unsafe { sys.release(base, Self::block_layout()) };
                count.blocks_released += 1;
            } else {
                count.free += this_free;
                kept.push(base);
            }
        }

        kept.reverse();
        self.blocks = kept;
        self.free_head = free_head;
        self.free_count = count.free;
        count
    }

    /// Cells handed out and not on the free list
    pub fn used(&self) -> usize {
        self.total_cells() - self.free_count
    }

    /// Cells on the free list
    pub fn free(&self) -> usize {
        self.free_count
    }

    /// Cells ever carved from the current blocks
    pub fn total_cells(&self) -> usize {
        match self.blocks.len() {
            0 => 0,
            n => (n - 1) * Self::GEOMETRY.capacity + self.fill,
        }
    }

    /// Number of blocks held
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Cell size in bytes
    pub fn cell_size(&self) -> usize {
        Self::GEOMETRY.slot_size
    }

    /// Drop every live object and return all blocks
    pub fn release_all(&mut self, sys: &mut SystemAllocator, registry: &mut HeapRegistry) {
        for block_index in 0..self.blocks.len() {
            let base = self.blocks[block_index];
            for index in 0..self.initialized_in(block_index) {
                unsafe { ptr::drop_in_place(Self::slot_at(base, index).as_ptr()) };
            }
            registry.delete(base.as_ptr() as usize);
            unsafe { sys.release(base, Self::block_layout()) };
        }
        self.blocks.clear();
        self.fill = 0;
        self.free_head = None;
        self.free_count = 0;
    }
}

impl<T: CellKind> Default for CellArena<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestCell {
        a: usize,
        b: usize,
    }

    impl CellKind for TestCell {
        const MEM_KIND: MemKind = MemKind::Cons;
        const NAME: &'static str = "test";
        const SIDE_MARKS: bool = true;
    }

    struct InlineCell {
        value: usize,
        marked: bool,
    }

    impl CellKind for InlineCell {
        const MEM_KIND: MemKind = MemKind::String;
        const NAME: &'static str = "inline";
        const SIDE_MARKS: bool = false;

        fn inline_mark(&self) -> bool {
            self.marked
        }

        fn set_inline_mark(&mut self, marked: bool) {
            self.marked = marked;
        }
    }

    fn env() -> (SystemAllocator, HeapRegistry) {
        (SystemAllocator::new(None, 0), HeapRegistry::new())
    }

    #[test]
    fn test_geometry_fits_block() {
        let g = CellArena::<TestCell>::GEOMETRY;
        assert!(g.capacity > 0);
        assert!(g.marks_offset + g.mark_words * 8 <= CELL_BLOCK_BYTES);
        assert!(g.mark_words * 64 >= g.capacity);

        let g = CellArena::<InlineCell>::GEOMETRY;
        assert_eq!(g.mark_words, 0);
        assert!(g.capacity * g.slot_size <= CELL_BLOCK_BYTES);
    }

    #[test]
    fn test_allocate_bumps_then_reuses_free_list() {
        let (mut sys, mut reg) = env();
        let mut arena = CellArena::<TestCell>::new();
        let cap = CellArena::<TestCell>::GEOMETRY.capacity;

        let cells: Vec<_> = (0..cap + 1)
            .map(|i| arena.allocate(TestCell { a: i, b: 0 }, &mut sys, &mut reg).unwrap())
            .collect();
        assert_eq!(arena.block_count(), 2);
        assert_eq!(reg.len(), 2);
        assert_eq!(arena.used(), cap + 1);

        // Keep only the first cell
        unsafe { CellArena::<TestCell>::set_marked(cells[0]) };
        let count = arena.sweep(usize::MAX, &mut sys, &mut reg, |_| {});
        assert_eq!(count.live, 1);
        assert_eq!(count.free, cap);
        assert_eq!(arena.used(), 1);

        // Marks are cleared by the sweep
        assert!(!unsafe { CellArena::<TestCell>::is_marked(cells[0]) });
        assert_eq!(unsafe { CellArena::<TestCell>::live(cells[0]) }.a, 0);

        // New allocations come from the free list, not new blocks
        for _ in 0..cap {
            arena.allocate(TestCell { a: 0, b: 1 }, &mut sys, &mut reg).unwrap();
        }
        assert_eq!(arena.block_count(), 2);
        assert_eq!(arena.free(), 0);

        arena.release_all(&mut sys, &mut reg);
        assert!(reg.is_empty());
    }

    #[test]
    fn test_empty_blocks_released_beyond_retention() {
        let (mut sys, mut reg) = env();
        let mut arena = CellArena::<TestCell>::new();
        let cap = CellArena::<TestCell>::GEOMETRY.capacity;

        for i in 0..cap * 6 {
            arena.allocate(TestCell { a: i, b: i }, &mut sys, &mut reg).unwrap();
        }
        assert_eq!(arena.block_count(), 6);

        let count = arena.sweep(2, &mut sys, &mut reg, |_| {});
        assert_eq!(count.live, 0);
        assert!(count.blocks_released >= 3);
        assert_eq!(arena.block_count(), 6 - count.blocks_released);
        assert_eq!(reg.len(), arena.block_count());
        assert_eq!(arena.free(), arena.total_cells());

        arena.release_all(&mut sys, &mut reg);
    }

    #[test]
    fn test_inline_marks_and_on_free() {
        let (mut sys, mut reg) = env();
        let mut arena = CellArena::<InlineCell>::new();

        let keep = arena
            .allocate(InlineCell { value: 1, marked: false }, &mut sys, &mut reg)
            .unwrap();
        arena
            .allocate(InlineCell { value: 2, marked: false }, &mut sys, &mut reg)
            .unwrap();

        unsafe { CellArena::<InlineCell>::set_marked(keep) };
        let mut freed = Vec::new();
        let count = arena.sweep(2, &mut sys, &mut reg, |cell| freed.push(cell.value));
        assert_eq!(count.live, 1);
        assert_eq!(freed, vec![2]);
        assert!(!unsafe { CellArena::<InlineCell>::live(keep) }.marked);

        arena.release_all(&mut sys, &mut reg);
    }

    #[test]
    fn test_live_cell_containing() {
        let (mut sys, mut reg) = env();
        let mut arena = CellArena::<TestCell>::new();
        let cell = arena.allocate(TestCell { a: 7, b: 8 }, &mut sys, &mut reg).unwrap();
        let addr = cell.as_ptr() as usize;

        assert_eq!(arena.live_cell_containing(addr), Some(cell));
        assert_eq!(arena.live_cell_containing(addr + 3), Some(cell));

        // Past the fill index of the newest block
        let slot = CellArena::<TestCell>::GEOMETRY.slot_size;
        assert_eq!(arena.live_cell_containing(addr + slot), None);

        let _ = unsafe { CellArena::<TestCell>::live(cell) }.b;
        arena.sweep(2, &mut sys, &mut reg, |_| {});
        assert_eq!(arena.live_cell_containing(addr), None);

        arena.release_all(&mut sys, &mut reg);
    }
}
