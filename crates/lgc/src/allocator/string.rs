//! String Allocator - Headers plus Payload Sub-allocator
//!
//! String headers are ordinary cells in a [`CellArena`]. Payload bytes live
//! in sblocks, outside the header arena:
//!
//! ```text
//! small sblock (SBLOCK_BYTES)
//! ┌──────────────────────┬──────────────────────┬─────────┐
//! │ owner │ nbytes │ data │ owner │ nbytes │ data │  free   │
//! └──────────────────────┴──────────────────────┴─────────┘
//!                                               ^ next_free
//! ```
//!
//! Each record starts with a back-pointer to the owning header cell and the
//! payload length, followed by the bytes and a NUL, padded to a word. A
//! record whose owner is null is dead; its stamped length still lets the
//! compactor step over it.
//!
//! Large or pinned payloads get an sblock of their own holding exactly one
//! record. Those are released outright once dead and never move.

use crate::allocator::arena::{CellArena, Slot, SweepCount};
use crate::config::WORD_SIZE;
use crate::error::{GcError, Result};
use crate::heap::registry::HeapRegistry;
use crate::heap::system::SystemAllocator;
use crate::object::LispString;
use std::alloc::Layout;
use std::ptr::{self, NonNull};

/// Size of a shared small-payload sblock
pub const SBLOCK_BYTES: usize = 8192;

/// Payloads above this many bytes get their own sblock
pub const LARGE_STRING_BYTES: usize = 1024;

/// Record header: owner pointer and byte count
const SDATA_HEADER: usize = 2 * WORD_SIZE;

/// Longest payload a string may have
pub const STRING_BYTES_MAX: usize = isize::MAX as usize - SDATA_HEADER - 2 * WORD_SIZE;

/// Cell holding a string header
pub type StringCell = NonNull<Slot<LispString>>;

/// Bytes one record of `nbytes` payload occupies
pub const fn sdata_size(nbytes: usize) -> usize {
    (SDATA_HEADER + nbytes + 1 + WORD_SIZE - 1) & !(WORD_SIZE - 1)
}

fn is_large_size(nbytes: usize) -> bool {
    sdata_size(nbytes) > sdata_size(LARGE_STRING_BYTES)
}

#[repr(C)]
struct SData {
    owner: *mut Slot<LispString>,
    nbytes: usize,
}

unsafe fn record_of(data: *mut u8) -> *mut SData {
    data.sub(SDATA_HEADER) as *mut SData
}

unsafe fn data_of(record: *mut SData) -> *mut u8 {
    (record as *mut u8).add(SDATA_HEADER)
}

struct SBlock {
    base: NonNull<u8>,
    size: usize,
    /// Offset of the first unused byte
    next_free: usize,
}

impl SBlock {
    fn layout(size: usize) -> Layout {
        match Layout::from_size_align(size, WORD_SIZE) {
            Ok(layout) => layout,
            Err(_) => unreachable!("sblock size bounded by STRING_BYTES_MAX"),
        }
    }
}

/// Result of one string sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StringSweep {
    pub headers: SweepCount,
    /// Payload bytes owned by surviving strings
    pub live_bytes: usize,
    pub small_blocks_released: usize,
    pub large_blocks_released: usize,
}

/// String header arena plus payload sblocks
pub struct StringAllocator {
    pub(crate) headers: CellArena<LispString>,
    /// Small sblocks, oldest first; the last one is being filled
    small: Vec<SBlock>,
    large: Vec<SBlock>,
}

impl StringAllocator {
    pub fn new() -> Self {
        Self {
            headers: CellArena::new(),
            small: Vec::new(),
            large: Vec::new(),
        }
    }

    /// Allocate a header and a payload of `nbytes` bytes
    ///
    /// The payload is zero-filled when `clear` is set; it is always NUL
    /// terminated.
    pub fn allocate(
        &mut self,
        nchars: usize,
        nbytes: usize,
        multibyte: bool,
        clear: bool,
        sys: &mut SystemAllocator,
        registry: &mut HeapRegistry,
    ) -> Result<StringCell> {
        if nbytes > STRING_BYTES_MAX {
            return Err(GcError::StringTooLarge {
                requested: nbytes,
                max: STRING_BYTES_MAX,
            });
        }

        let header = LispString {
            nchars,
            nbytes,
            multibyte,
            intervals: None,
            data: ptr::null_mut(),
            immovable: false,
            marked: false,
        };
        let cell = self.headers.allocate(header, sys, registry)?;

        match self.allocate_record(cell, nbytes, false, sys) {
            Ok(data) => {
                if clear {
                    unsafe { ptr::write_bytes(data, 0, nbytes) };
                }
                unsafe { CellArena::live(cell) }.data = data;
                Ok(cell)
            },
            Err(err) => {
                // Header is reclaimed by the next sweep: nothing refers to it
                unsafe { CellArena::live(cell) }.nbytes = 0;
                Err(err)
            },
        }
    }

    /// Allocate a record for `owner` and return its data pointer
    fn allocate_record(
        &mut self,
        owner: StringCell,
        nbytes: usize,
        immovable: bool,
        sys: &mut SystemAllocator,
    ) -> Result<*mut u8> {
        let size = sdata_size(nbytes);

        let record = if immovable || is_large_size(nbytes) {
            let base = sys.allocate(SBlock::layout(size), false)?;
            self.large.push(SBlock {
                base,
                size,
                next_free: size,
            });
            base.as_ptr() as *mut SData
        } else {
            let needs_block = match self.small.last() {
                Some(block) => block.next_free + size > SBLOCK_BYTES,
                None => true,
            };
            if needs_block {
                let base = sys.allocate(SBlock::layout(SBLOCK_BYTES), false)?;
                self.small.push(SBlock {
                    base,
                    size: SBLOCK_BYTES,
                    next_free: 0,
                });
            }
            let block = match self.small.last_mut() {
                Some(block) => block,
                None => unreachable!("a small sblock exists"),
            };
            let record = unsafe { block.base.as_ptr().add(block.next_free) } as *mut SData;
            block.next_free += size;
            record
        };

        unsafe {
            ptr::write(
                record,
                SData {
                    owner: owner.as_ptr(),
                    nbytes,
                },
            );
            let data = data_of(record);
            *data.add(nbytes) = 0;
            Ok(data)
        }
    }

    /// Change the payload length of a heap string
    ///
    /// Stays in place when the record size is unchanged. Otherwise a new
    /// record is allocated, the common prefix copied and the old record
    /// left ownerless with its old length stamped. New bytes are zeroed.
    pub fn resize(
        &mut self,
        cell: StringCell,
        new_nbytes: usize,
        sys: &mut SystemAllocator,
    ) -> Result<()> {
        if new_nbytes > STRING_BYTES_MAX {
            return Err(GcError::StringTooLarge {
                requested: new_nbytes,
                max: STRING_BYTES_MAX,
            });
        }

        let s = unsafe { CellArena::live(cell) };
        let old_nbytes = s.nbytes;
        let old_data = s.data;

        if sdata_size(old_nbytes) == sdata_size(new_nbytes) {
            unsafe {
                if new_nbytes > old_nbytes {
                    ptr::write_bytes(old_data.add(old_nbytes), 0, new_nbytes - old_nbytes);
                }
                (*record_of(old_data)).nbytes = new_nbytes;
                *old_data.add(new_nbytes) = 0;
            }
            s.nbytes = new_nbytes;
            return Ok(());
        }

        let immovable = s.immovable;
        let data = self.allocate_record(cell, new_nbytes, immovable, sys)?;
        unsafe {
            let common = old_nbytes.min(new_nbytes);
            ptr::copy_nonoverlapping(old_data, data, common);
            if new_nbytes > common {
                ptr::write_bytes(data.add(common), 0, new_nbytes - common);
            }
            (*record_of(old_data)).owner = ptr::null_mut();
        }

        let s = unsafe { CellArena::live(cell) };
        s.data = data;
        s.nbytes = new_nbytes;
        Ok(())
    }

    /// Make a string's payload immovable
    ///
    /// A small payload is moved once into an sblock of its own; after that
    /// compaction never touches it.
    pub fn pin(&mut self, cell: StringCell, sys: &mut SystemAllocator) -> Result<()> {
        let s = unsafe { CellArena::live(cell) };
        if s.immovable {
            return Ok(());
        }
        if is_large_size(s.nbytes) {
            s.immovable = true;
            return Ok(());
        }

        let (old_data, nbytes) = (s.data, s.nbytes);
        let data = self.allocate_record(cell, nbytes, true, sys)?;
        unsafe {
            ptr::copy_nonoverlapping(old_data, data, nbytes);
            (*record_of(old_data)).owner = ptr::null_mut();
        }
        let s = unsafe { CellArena::live(cell) };
        s.data = data;
        s.immovable = true;
        Ok(())
    }

    /// Sweep headers, release dead large payloads and compact the rest
    pub fn sweep(
        &mut self,
        retained_blocks: usize,
        sys: &mut SystemAllocator,
        registry: &mut HeapRegistry,
    ) -> StringSweep {
        let mut result = StringSweep::default();

        result.headers = self.headers.sweep(retained_blocks, sys, registry, |s| {
            if !s.data.is_null() {
                unsafe { (*record_of(s.data)).owner = ptr::null_mut() };
            }
            s.data = ptr::null_mut();
        });

        self.headers.for_each_live(|_, s| result.live_bytes += s.nbytes);

        let large = std::mem::take(&mut self.large);
        for block in large {
            let record = block.base.as_ptr() as *mut SData;
            if unsafe { (*record).owner.is_null() } {
                unsafe { sys.release(block.base, SBlock::layout(block.size)) };
                result.large_blocks_released += 1;
            } else {
                self.large.push(block);
            }
        }

        result.small_blocks_released = self.compact(sys);
        result
    }

    /// Slide every owned small record toward the oldest sblocks
    fn compact(&mut self, sys: &mut SystemAllocator) -> usize {
        if self.small.is_empty() {
            return 0;
        }

        let mut to_block = 0;
        let mut to = 0;

        for from_block in 0..self.small.len() {
            let base = self.small[from_block].base.as_ptr();
            let end = self.small[from_block].next_free;
            let mut from = 0;

            while from < end {
                let record = unsafe { base.add(from) } as *mut SData;
                let (owner, nbytes) = unsafe { ((*record).owner, (*record).nbytes) };
                let size = sdata_size(nbytes);
                if from + size > end {
                    crate::heap_corruption!(
                        "string record at {:p} runs past its sblock ({} bytes)",
                        record,
                        nbytes
                    );
                }

                if !owner.is_null() {
                    if to + size > SBLOCK_BYTES {
                        self.small[to_block].next_free = to;
                        to_block += 1;
                        to = 0;
                    }
                    let dest = unsafe { self.small[to_block].base.as_ptr().add(to) };
                    if dest as *mut SData != record {
                        unsafe {
                            ptr::copy(record as *const u8, dest, size);
                            let owner_cell = NonNull::new_unchecked(owner);
                            CellArena::live(owner_cell).data = data_of(dest as *mut SData);
                        }
                    }
                    to += size;
                }
                from += size;
            }
        }
        self.small[to_block].next_free = to;

        let released = self.small.len() - (to_block + 1);
        for block in self.small.drain(to_block + 1..) {
            unsafe { sys.release(block.base, SBlock::layout(block.size)) };
        }
        released
    }

    /// Header cells in use and on the free list
    pub fn header_counts(&self) -> (usize, usize) {
        (self.headers.used(), self.headers.free())
    }

    pub fn small_block_count(&self) -> usize {
        self.small.len()
    }

    pub fn large_block_count(&self) -> usize {
        self.large.len()
    }

    /// Release every header and payload block
    pub fn release_all(&mut self, sys: &mut SystemAllocator, registry: &mut HeapRegistry) {
        self.headers.release_all(sys, registry);
        for block in self.small.drain(..).chain(self.large.drain(..)) {
            unsafe { sys.release(block.base, SBlock::layout(block.size)) };
        }
    }
}

impl Default for StringAllocator {
    fn default() -> Self {
        Self::new()
    }
}
