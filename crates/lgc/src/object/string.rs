//! String header layout
//!
//! The header is a fixed-size cell. Payload bytes live in a record of the
//! string sub-allocator (`allocator::string`) or in the pure region; `data`
//! points at the first payload byte. Payloads are always followed by a NUL.

use crate::allocator::arena::CellKind;
use crate::heap::registry::MemKind;
use crate::object::interval::IntervalPtr;

/// String header
#[derive(Debug)]
pub struct LispString {
    /// Length in characters
    pub nchars: usize,
    /// Length in bytes
    pub nbytes: usize,
    pub multibyte: bool,
    /// Root of the text-property tree
    pub intervals: Option<IntervalPtr>,
    /// First payload byte
    pub data: *mut u8,
    /// Payload lives in a slab that compaction never moves
    pub immovable: bool,
    pub marked: bool,
}

impl LispString {
    pub fn bytes(&self) -> &[u8] {
        if self.nbytes == 0 || self.data.is_null() {
            return &[];
        }
        unsafe { std::slice::from_raw_parts(self.data, self.nbytes) }
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        if self.nbytes == 0 || self.data.is_null() {
            return &mut [];
        }
        unsafe { std::slice::from_raw_parts_mut(self.data, self.nbytes) }
    }
}

impl CellKind for LispString {
    const MEM_KIND: MemKind = MemKind::String;
    const NAME: &'static str = "strings";
    const SIDE_MARKS: bool = false;

    fn inline_mark(&self) -> bool {
        self.marked
    }

    fn set_inline_mark(&mut self, marked: bool) {
        self.marked = marked;
    }
}
