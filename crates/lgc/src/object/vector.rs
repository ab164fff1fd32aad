//! Vector Header - Shared Size Encoding
//!
//! Every vector-like object starts with one header word:
//!
//! ```text
//!  63   62   61      30 29   24 23      12 11       0
//! ┌────┬────┬──────────┬───────┬──────────┬──────────┐
//! │mark│pvec│  unused  │ type  │   rest   │   size   │   pseudo-vector
//! └────┴────┴──────────┴───────┴──────────┴──────────┘
//! ┌────┬────┬────────────────────────────────────────┐
//! │mark│ 0  │              slot count                │   plain vector
//! └────┴────┴────────────────────────────────────────┘
//! ```
//!
//! A pseudo-vector carries `size` traced `Value` slots followed by `rest`
//! untraced words. [`VectorHeader::layout`] is the one place that decodes
//! these fields; marking uses its traced count and sweeping uses its byte
//! count, so the two can never disagree.

use crate::config::WORD_SIZE;
use crate::value::Value;
use std::mem;
use std::ptr::NonNull;

/// Mark bit, stored in the header itself
pub const ARRAY_MARK_FLAG: usize = 1 << (usize::BITS - 1);

/// Set for every pseudo-vector
pub const PSEUDOVECTOR_FLAG: usize = ARRAY_MARK_FLAG >> 1;

pub const PSEUDOVECTOR_SIZE_BITS: u32 = 12;
pub const PSEUDOVECTOR_SIZE_MASK: usize = (1 << PSEUDOVECTOR_SIZE_BITS) - 1;
pub const PSEUDOVECTOR_REST_BITS: u32 = 12;
pub const PSEUDOVECTOR_REST_MASK: usize =
    ((1 << PSEUDOVECTOR_REST_BITS) - 1) << PSEUDOVECTOR_SIZE_BITS;
pub const PSEUDOVECTOR_AREA_BITS: u32 = PSEUDOVECTOR_SIZE_BITS + PSEUDOVECTOR_REST_BITS;
pub const PVEC_TYPE_MASK: usize = 0x3f << PSEUDOVECTOR_AREA_BITS;

/// Bytes in a vector header
pub const HEADER_SIZE: usize = mem::size_of::<VectorHeader>();

/// Smallest vector-like: header plus one slot
pub const LISP_VECTOR_MIN: usize = HEADER_SIZE + WORD_SIZE;

/// Largest slot count a plain vector header can encode
pub const VECTOR_ELTS_MAX: usize = {
    let by_flag = PSEUDOVECTOR_FLAG - 1;
    let by_bytes = (isize::MAX as usize - HEADER_SIZE) / WORD_SIZE;
    if by_flag < by_bytes {
        by_flag
    } else {
        by_bytes
    }
};

/// Kind of a vector-like object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PvecType {
    NormalVector = 0,
    Free = 1,
    Bignum = 2,
    Marker = 3,
    Overlay = 4,
    Finalizer = 5,
    UserPtr = 6,
    Thread = 7,
    Mutex = 8,
    CondVar = 9,
    HashTable = 10,
    Buffer = 11,
    Window = 12,
    Frame = 13,
    Terminal = 14,
    Record = 15,
    Closure = 16,
    Font = 17,
}

impl PvecType {
    pub fn from_u8(n: u8) -> Option<PvecType> {
        use PvecType::*;
        Some(match n {
            0 => NormalVector,
            1 => Free,
            2 => Bignum,
            3 => Marker,
            4 => Overlay,
            5 => Finalizer,
            6 => UserPtr,
            7 => Thread,
            8 => Mutex,
            9 => CondVar,
            10 => HashTable,
            11 => Buffer,
            12 => Window,
            13 => Frame,
            14 => Terminal,
            15 => Record,
            16 => Closure,
            17 => Font,
            _ => return None,
        })
    }

    /// Name used in diagnostics
    pub fn name(self) -> &'static str {
        use PvecType::*;
        match self {
            NormalVector => "vector",
            Free => "free",
            Bignum => "bignum",
            Marker => "marker",
            Overlay => "overlay",
            Finalizer => "finalizer",
            UserPtr => "user-ptr",
            Thread => "thread",
            Mutex => "mutex",
            CondVar => "condition-variable",
            HashTable => "hash-table",
            Buffer => "buffer",
            Window => "window",
            Frame => "frame",
            Terminal => "terminal",
            Record => "record",
            Closure => "closure",
            Font => "font",
        }
    }
}

/// Decoded header: traced slots and total words after the header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VectorLayout {
    pub traced: usize,
    pub words: usize,
}

impl VectorLayout {
    pub fn nbytes(self) -> usize {
        HEADER_SIZE + self.words * WORD_SIZE
    }
}

/// Header word of a vector-like object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct VectorHeader {
    pub size: usize,
}

impl VectorHeader {
    /// Header of a plain vector with `len` slots
    pub fn plain(len: usize) -> Self {
        debug_assert!(len <= VECTOR_ELTS_MAX);
        Self { size: len }
    }

    /// Header of a pseudo-vector with `traced` slots and `rest` raw words
    pub fn pseudo(kind: PvecType, traced: usize, rest: usize) -> Self {
        debug_assert!(traced <= PSEUDOVECTOR_SIZE_MASK);
        debug_assert!(rest <= PSEUDOVECTOR_REST_MASK >> PSEUDOVECTOR_SIZE_BITS);
        Self {
            size: PSEUDOVECTOR_FLAG
                | ((kind as usize) << PSEUDOVECTOR_AREA_BITS)
                | (rest << PSEUDOVECTOR_SIZE_BITS)
                | traced,
        }
    }

    /// Header of a free-list chunk spanning `nbytes`
    pub fn free(nbytes: usize) -> Self {
        let words = (nbytes - HEADER_SIZE) / WORD_SIZE;
        Self::pseudo(PvecType::Free, 0, words)
    }

    pub fn is_marked(&self) -> bool {
        self.size & ARRAY_MARK_FLAG != 0
    }

    pub fn set_marked(&mut self) {
        self.size |= ARRAY_MARK_FLAG;
    }

    pub fn unmark(&mut self) {
        self.size &= !ARRAY_MARK_FLAG;
    }

    pub fn is_pseudo(&self) -> bool {
        self.size & PSEUDOVECTOR_FLAG != 0
    }

    /// Kind; plain vectors report `NormalVector`
    pub fn pvec_type(&self) -> PvecType {
        if !self.is_pseudo() {
            return PvecType::NormalVector;
        }
        let raw = ((self.size & PVEC_TYPE_MASK) >> PSEUDOVECTOR_AREA_BITS) as u8;
        match PvecType::from_u8(raw) {
            Some(kind) => kind,
            None => crate::heap_corruption!(
                "vector header {:#x} carries unknown pseudo-vector type {}",
                self.size,
                raw
            ),
        }
    }

    /// Decode traced and total word counts
    pub fn layout(&self) -> VectorLayout {
        let size = self.size & !ARRAY_MARK_FLAG;
        if size & PSEUDOVECTOR_FLAG != 0 {
            let traced = size & PSEUDOVECTOR_SIZE_MASK;
            let rest = (size & PSEUDOVECTOR_REST_MASK) >> PSEUDOVECTOR_SIZE_BITS;
            VectorLayout {
                traced,
                words: traced + rest,
            }
        } else {
            VectorLayout {
                traced: size,
                words: size,
            }
        }
    }

    /// Number of leading `Value` slots the collector traces
    pub fn traced_slots(&self) -> usize {
        self.layout().traced
    }

    /// Total size in bytes, header included
    pub fn nbytes(&self) -> usize {
        self.layout().nbytes()
    }
}

/// Pointer to a vector-like object's header
pub type VectorPtr = NonNull<VectorHeader>;

/// First slot after the header
///
/// # Safety
/// `v` must point at a vector-like object.
pub unsafe fn contents(v: VectorPtr) -> *mut Value {
    v.as_ptr().add(1) as *mut Value
}

/// Raw words a `#[repr(C)]` pseudo-vector struct needs after its traced slots
pub const fn rest_words<T>(traced: usize) -> usize {
    let tail = mem::size_of::<T>() - HEADER_SIZE - traced * WORD_SIZE;
    (tail + WORD_SIZE - 1) / WORD_SIZE
}

/// Round a byte count up to whole words
pub const fn round_up_words(nbytes: usize) -> usize {
    (nbytes + WORD_SIZE - 1) / WORD_SIZE * WORD_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_layout() {
        let h = VectorHeader::plain(5);
        assert!(!h.is_pseudo());
        assert_eq!(h.pvec_type(), PvecType::NormalVector);
        assert_eq!(h.traced_slots(), 5);
        assert_eq!(h.nbytes(), HEADER_SIZE + 5 * WORD_SIZE);
    }

    #[test]
    fn test_pseudo_layout() {
        let h = VectorHeader::pseudo(PvecType::HashTable, 2, 3);
        assert!(h.is_pseudo());
        assert_eq!(h.pvec_type(), PvecType::HashTable);
        assert_eq!(h.traced_slots(), 2);
        assert_eq!(h.nbytes(), HEADER_SIZE + 5 * WORD_SIZE);
    }

    #[test]
    fn test_mark_bit_does_not_change_layout() {
        let mut h = VectorHeader::pseudo(PvecType::Record, 7, 0);
        let before = h.layout();
        h.set_marked();
        assert!(h.is_marked());
        assert_eq!(h.layout(), before);
        assert_eq!(h.pvec_type(), PvecType::Record);
        h.unmark();
        assert!(!h.is_marked());

        let mut v = VectorHeader::plain(3);
        v.set_marked();
        assert_eq!(v.nbytes(), HEADER_SIZE + 3 * WORD_SIZE);
    }

    #[test]
    fn test_free_chunk_header() {
        let h = VectorHeader::free(64);
        assert_eq!(h.pvec_type(), PvecType::Free);
        assert_eq!(h.traced_slots(), 0);
        assert_eq!(h.nbytes(), 64);
    }

    #[test]
    fn test_pvec_type_round_trip() {
        for n in 0..=17u8 {
            let kind = PvecType::from_u8(n).unwrap();
            assert_eq!(kind as u8, n);
        }
        assert!(PvecType::from_u8(18).is_none());
    }
}
