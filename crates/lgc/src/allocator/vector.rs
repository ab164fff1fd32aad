//! Vector Allocator - Size-Classed Blocks plus Large Objects
//!
//! Vector-like objects up to `LARGE_VECTOR_THRESH` bytes are carved out of
//! `VBLOCK_BYTES` blocks. Free chunks inside blocks keep a `Free` header so
//! a block can always be walked header to header, and are indexed by word
//! count in `free_lists`. Bigger objects get their own allocation and are
//! tracked in `large`.
//!
//! Allocation strategy (small):
//! 1. Exact-size free list, then larger lists whose remainder is either
//!    zero or big enough to be a vector of its own.
//! 2. Otherwise a fresh block; the tail goes onto the free lists.
//!
//! Sweep coalesces runs of dead objects and free chunks into one free
//! chunk, and returns blocks with no survivors to the system.

use crate::config::WORD_SIZE;
use crate::error::Result;
use crate::heap::registry::{HeapRegistry, MemKind, MemNode};
use crate::heap::system::SystemAllocator;
use crate::object::vector::{
    VectorHeader, VectorPtr, HEADER_SIZE, LISP_VECTOR_MIN, PSEUDOVECTOR_SIZE_BITS,
};
use crate::object::PvecType;
use std::alloc::Layout;
use std::ptr::{self, NonNull};

/// Usable bytes of one vector block
pub const VBLOCK_BYTES: usize = (1 << PSEUDOVECTOR_SIZE_BITS) - WORD_SIZE;

/// Vector-likes above this many bytes are allocated individually
pub const LARGE_VECTOR_THRESH: usize = (VBLOCK_BYTES >> 1) - WORD_SIZE;

/// One free list per word length
pub const VBLOCK_NFREE_LISTS: usize = 1 + (VBLOCK_BYTES - LISP_VECTOR_MIN) / WORD_SIZE;

fn vindex(nbytes: usize) -> usize {
    debug_assert!(nbytes >= LISP_VECTOR_MIN);
    (nbytes - LISP_VECTOR_MIN) / WORD_SIZE
}

fn block_layout() -> Layout {
    match Layout::from_size_align(VBLOCK_BYTES, WORD_SIZE) {
        Ok(layout) => layout,
        Err(_) => unreachable!("vector block layout"),
    }
}

fn advance(v: VectorPtr, nbytes: usize) -> VectorPtr {
    unsafe { NonNull::new_unchecked((v.as_ptr() as *mut u8).add(nbytes) as *mut VectorHeader) }
}

/// Individually allocated vector-like
struct LargeVector {
    ptr: VectorPtr,
    layout: Layout,
}

/// Sweep totals
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VectorSweep {
    /// Surviving vector-likes
    pub vectors: usize,
    /// Words (header included) held by survivors
    pub slots: usize,
    /// Words sitting on free lists
    pub free_slots: usize,
    pub blocks_released: usize,
    pub large_released: usize,
}

/// Allocator for every vector-like object
pub struct VectorAllocator {
    blocks: Vec<NonNull<u8>>,
    free_lists: Vec<Vec<VectorPtr>>,
    large: Vec<LargeVector>,
    /// The shared zero-length vector
    zero: Box<VectorHeader>,
}

impl VectorAllocator {
    pub fn new() -> Self {
        Self {
            blocks: Vec::new(),
            free_lists: vec![Vec::new(); VBLOCK_NFREE_LISTS],
            large: Vec::new(),
            zero: Box::new(VectorHeader::plain(0)),
        }
    }

    /// The one zero-slot vector
    pub fn zero_vector(&self) -> VectorPtr {
        NonNull::from(&*self.zero)
    }

    pub fn is_zero_vector(&self, v: VectorPtr) -> bool {
        ptr::eq(v.as_ptr(), &*self.zero)
    }

    fn add_free(&mut self, v: VectorPtr, nbytes: usize) {
        debug_assert!(nbytes >= LISP_VECTOR_MIN && nbytes % WORD_SIZE == 0);
        unsafe { ptr::write(v.as_ptr(), VectorHeader::free(nbytes)) };
        self.free_lists[vindex(nbytes)].push(v);
    }

    /// Allocate storage for a vector-like with `words` words after the header
    ///
    /// The caller writes the header. With `clear`, the whole object is
    /// zero-filled, which reads back as nil in every slot.
    pub fn allocate(
        &mut self,
        words: usize,
        clear: bool,
        sys: &mut SystemAllocator,
        registry: &mut HeapRegistry,
    ) -> Result<VectorPtr> {
        debug_assert!(words > 0);
        let nbytes = HEADER_SIZE + words * WORD_SIZE;

        if nbytes > LARGE_VECTOR_THRESH {
            let layout = match Layout::from_size_align(nbytes, WORD_SIZE) {
                Ok(layout) => layout,
                Err(_) => {
                    return Err(crate::error::GcError::VectorTooLarge {
                        requested: words,
                        max: crate::object::vector::VECTOR_ELTS_MAX,
                    })
                },
            };
            let raw = sys.allocate(layout, clear)?;
            let start = raw.as_ptr() as usize;
            registry.insert(start, start + nbytes, MemKind::LargeVector);
            let v = raw.cast::<VectorHeader>();
            self.large.push(LargeVector { ptr: v, layout });
            return Ok(v);
        }

        let exact = vindex(nbytes);
        let mut found = None;
        for index in exact..VBLOCK_NFREE_LISTS {
            let restbytes = index * WORD_SIZE + LISP_VECTOR_MIN - nbytes;
            if restbytes != 0 && restbytes < LISP_VECTOR_MIN {
                continue;
            }
            if let Some(v) = self.free_lists[index].pop() {
                found = Some((v, restbytes));
                break;
            }
        }

        let (v, restbytes) = match found {
            Some(hit) => hit,
            None => {
                let raw = sys.allocate(block_layout(), false)?;
                let start = raw.as_ptr() as usize;
                registry.insert(start, start + VBLOCK_BYTES, MemKind::VectorBlock);
                self.blocks.push(raw);
                (raw.cast::<VectorHeader>(), VBLOCK_BYTES - nbytes)
            },
        };

        if restbytes > 0 {
            self.add_free(advance(v, nbytes), restbytes);
        }

        if clear {
            unsafe { ptr::write_bytes(v.as_ptr() as *mut u8, 0, nbytes) };
        }
        Ok(v)
    }

    /// Reclaim unmarked vector-likes
    ///
    /// `teardown` runs once for every dead pseudo-vector, before its memory
    /// joins a free run or is released.
    pub fn sweep(
        &mut self,
        sys: &mut SystemAllocator,
        registry: &mut HeapRegistry,
        mut teardown: impl FnMut(VectorPtr),
    ) -> VectorSweep {
        for list in &mut self.free_lists {
            list.clear();
        }

        let mut totals = VectorSweep::default();
        let blocks = std::mem::take(&mut self.blocks);
        let mut kept = Vec::with_capacity(blocks.len());

        for block in blocks {
            let first = block.cast::<VectorHeader>();
            let mut run: Option<(VectorPtr, usize)> = None;
            let mut offset = 0;

            while offset < VBLOCK_BYTES {
                let v = advance(first, offset);
                let header = unsafe { &mut *v.as_ptr() };
                let nbytes = header.nbytes();
                if nbytes < LISP_VECTOR_MIN || offset + nbytes > VBLOCK_BYTES {
                    crate::heap_corruption!(
                        "vector at {:p} claims {} bytes at offset {} of its block",
                        v.as_ptr(),
                        nbytes,
                        offset
                    );
                }

                if header.is_marked() {
                    if let Some((run_start, run_bytes)) = run.take() {
                        self.add_free(run_start, run_bytes);
                        totals.free_slots += run_bytes / WORD_SIZE;
                    }
                    header.unmark();
                    totals.vectors += 1;
                    totals.slots += nbytes / WORD_SIZE;
                } else {
                    if header.pvec_type() != PvecType::Free {
                        teardown(v);
                    }
                    run = match run {
                        Some((start, bytes)) => Some((start, bytes + nbytes)),
                        None => Some((v, nbytes)),
                    };
                }
                offset += nbytes;
            }

            match run {
                Some((start, _)) if start == first => {
                    // Nothing in the block survived
                    registry.delete(block.as_ptr() as usize);
                    unsafe { sys.release(block, block_layout()) };
                    totals.blocks_released += 1;
                },
                Some((start, bytes)) => {
                    self.add_free(start, bytes);
                    totals.free_slots += bytes / WORD_SIZE;
                    kept.push(block);
                },
                None => kept.push(block),
            }
        }
        self.blocks = kept;

        let large = std::mem::take(&mut self.large);
        for lv in large {
            let header = unsafe { &mut *lv.ptr.as_ptr() };
            if header.is_marked() {
                header.unmark();
                totals.vectors += 1;
                totals.slots += header.nbytes() / WORD_SIZE;
                self.large.push(lv);
            } else {
                teardown(lv.ptr);
                registry.delete(lv.ptr.as_ptr() as usize);
                unsafe { sys.release(lv.ptr.cast::<u8>(), lv.layout) };
                totals.large_released += 1;
            }
        }

        totals
    }

    /// Find the live vector-like containing `addr`
    ///
    /// `node` is the registry range `addr` fell into. Block boundaries are
    /// irregular, so block ranges are walked from the start.
    pub fn live_vector_containing(&self, addr: usize, node: MemNode) -> Option<VectorPtr> {
        match node.kind {
            MemKind::LargeVector => {
                let v = NonNull::new(node.start as *mut VectorHeader)?;
                Some(v)
            },
            MemKind::VectorBlock => {
                let first = NonNull::new(node.start as *mut VectorHeader)?;
                let mut offset = 0;
                while offset < VBLOCK_BYTES {
                    let v = advance(first, offset);
                    let header = unsafe { &*v.as_ptr() };
                    let nbytes = header.nbytes();
                    if nbytes == 0 {
                        return None;
                    }
                    if addr < node.start + offset + nbytes {
                        return (header.pvec_type() != PvecType::Free).then_some(v);
                    }
                    offset += nbytes;
                }
                None
            },
            _ => None,
        }
    }

    /// Visit every vector-like that is not a free chunk
    pub fn for_each_live(&self, mut f: impl FnMut(VectorPtr)) {
        for block in &self.blocks {
            let first = block.cast::<VectorHeader>();
            let mut offset = 0;
            while offset < VBLOCK_BYTES {
                let v = advance(first, offset);
                let header = unsafe { &*v.as_ptr() };
                let nbytes = header.nbytes();
                if nbytes == 0 {
                    break;
                }
                if header.pvec_type() != PvecType::Free {
                    f(v);
                }
                offset += nbytes;
            }
        }
        for lv in &self.large {
            f(lv.ptr);
        }
    }

    /// Words currently sitting on free lists
    pub fn free_words(&self) -> usize {
        self.free_lists
            .iter()
            .flatten()
            .map(|v| unsafe { v.as_ref() }.nbytes() / WORD_SIZE)
            .sum()
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn large_count(&self) -> usize {
        self.large.len()
    }

    /// Release every block and large vector, tearing down live objects
    pub fn release_all(
        &mut self,
        sys: &mut SystemAllocator,
        registry: &mut HeapRegistry,
        mut teardown: impl FnMut(VectorPtr),
    ) {
        self.for_each_live(&mut teardown);
        for list in &mut self.free_lists {
            list.clear();
        }
        for block in self.blocks.drain(..) {
            registry.delete(block.as_ptr() as usize);
            unsafe { sys.release(block, block_layout()) };
        }
        for lv in self.large.drain(..) {
            registry.delete(lv.ptr.as_ptr() as usize);
            unsafe { sys.release(lv.ptr.cast::<u8>(), lv.layout) };
        }
    }
}

impl Default for VectorAllocator {
    fn default() -> Self {
        Self::new()
    }
}
