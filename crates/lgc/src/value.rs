//! Value - Tagged Object References
//!
//! A [`Value`] is one machine word. The low three bits carry the object
//! kind, the remaining bits carry either an immediate (fixnum, nil, t) or
//! the address of the object's cell. Cells are at least word aligned so the
//! tag never collides with address bits.
//!
//! ```text
//!  63                                        3  2  0
//! ┌──────────────────────────────────────────┬─────┐
//! │        address or immediate payload      │ tag │
//! └──────────────────────────────────────────┴─────┘
//! ```
//!
//! `Value::NIL` is the all-zero word, so zero-filled memory reads back as
//! nil. That keeps cleared vectors and fresh pseudo-vector slots valid.

use std::fmt;

/// Bits used for the tag
pub const TAG_BITS: u32 = 3;

/// Mask selecting the tag
pub const TAG_MASK: usize = (1 << TAG_BITS) - 1;

/// Largest representable fixnum
pub const MOST_POSITIVE_FIXNUM: isize = isize::MAX >> TAG_BITS;

/// Smallest representable fixnum
pub const MOST_NEGATIVE_FIXNUM: isize = isize::MIN >> TAG_BITS;

/// Object kind encoded in the low bits of a [`Value`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Tag {
    /// nil, t and internal markers
    Constant = 0,
    Fixnum = 1,
    Symbol = 2,
    Pair = 3,
    String = 4,
    Vectorlike = 5,
    Float = 6,
    /// Never produced by this crate; seeing it means a stray word
    Reserved = 7,
}

impl Tag {
    fn from_bits(bits: usize) -> Tag {
        match bits & TAG_MASK {
            0 => Tag::Constant,
            1 => Tag::Fixnum,
            2 => Tag::Symbol,
            3 => Tag::Pair,
            4 => Tag::String,
            5 => Tag::Vectorlike,
            6 => Tag::Float,
            _ => Tag::Reserved,
        }
    }

    /// Whether values with this tag point at heap storage
    pub fn is_pointer(self) -> bool {
        matches!(
            self,
            Tag::Symbol | Tag::Pair | Tag::String | Tag::Vectorlike | Tag::Float
        )
    }
}

/// A tagged reference to a heap object or an immediate
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Value(usize);

impl Value {
    /// The empty list and false
    pub const NIL: Value = Value(0);

    /// Canonical true
    pub const T: Value = Value(1 << TAG_BITS);

    /// Marker for empty hash table slots and void symbol values
    pub const UNBOUND: Value = Value(2 << TAG_BITS);

    /// Hash table key slot whose entry was removed
    pub const DELETED: Value = Value(3 << TAG_BITS);

    /// Make a fixnum, wrapping values outside the fixnum range
    pub fn fixnum(n: isize) -> Value {
        debug_assert!((MOST_NEGATIVE_FIXNUM..=MOST_POSITIVE_FIXNUM).contains(&n));
        Value(((n as usize) << TAG_BITS) | Tag::Fixnum as usize)
    }

    /// Make a fixnum if `n` is in range
    pub fn checked_fixnum(n: isize) -> Option<Value> {
        if (MOST_NEGATIVE_FIXNUM..=MOST_POSITIVE_FIXNUM).contains(&n) {
            Some(Value::fixnum(n))
        } else {
            None
        }
    }

    /// Lisp boolean
    pub fn from_bool(b: bool) -> Value {
        if b {
            Value::T
        } else {
            Value::NIL
        }
    }

    pub(crate) fn from_ptr<T>(ptr: *const T, tag: Tag) -> Value {
        let addr = ptr as usize;
        debug_assert_eq!(addr & TAG_MASK, 0, "unaligned cell address {:#x}", addr);
        Value(addr | tag as usize)
    }

    /// Raw word
    pub fn bits(self) -> usize {
        self.0
    }

    /// Rebuild a value from a raw word previously obtained with [`bits`](Self::bits)
    ///
    /// # Safety
    /// Pointer-tagged words must refer to an object that is still live in
    /// the collector that produced them.
    pub unsafe fn from_bits(bits: usize) -> Value {
        Value(bits)
    }

    /// Object kind
    pub fn tag(self) -> Tag {
        Tag::from_bits(self.0)
    }

    /// Address of the referenced cell (tag stripped)
    pub(crate) fn addr(self) -> usize {
        self.0 & !TAG_MASK
    }

    pub(crate) fn as_ptr<T>(self) -> *mut T {
        self.addr() as *mut T
    }

    pub fn is_nil(self) -> bool {
        self == Value::NIL
    }

    pub fn is_fixnum(self) -> bool {
        self.tag() == Tag::Fixnum
    }

    pub fn is_pair(self) -> bool {
        self.tag() == Tag::Pair
    }

    pub fn is_symbol(self) -> bool {
        self.tag() == Tag::Symbol
    }

    pub fn is_string(self) -> bool {
        self.tag() == Tag::String
    }

    pub fn is_float(self) -> bool {
        self.tag() == Tag::Float
    }

    pub fn is_vectorlike(self) -> bool {
        self.tag() == Tag::Vectorlike
    }

    /// Whether the value refers to heap storage at all
    pub fn is_heap_object(self) -> bool {
        self.tag().is_pointer()
    }

    /// Fixnum payload
    pub fn as_fixnum(self) -> Option<isize> {
        if self.is_fixnum() {
            Some((self.0 as isize) >> TAG_BITS)
        } else {
            None
        }
    }

    /// Short kind name used in error messages
    pub fn type_name(self) -> &'static str {
        match self.tag() {
            Tag::Constant if self.is_nil() => "nil",
            Tag::Constant => "constant",
            Tag::Fixnum => "fixnum",
            Tag::Symbol => "symbol",
            Tag::Pair => "cons",
            Tag::String => "string",
            Tag::Vectorlike => "vectorlike",
            Tag::Float => "float",
            Tag::Reserved => "invalid",
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.tag() {
            Tag::Constant => match *self {
                Value::NIL => write!(f, "nil"),
                Value::T => write!(f, "t"),
                Value::UNBOUND => write!(f, "#<unbound>"),
                Value::DELETED => write!(f, "#<deleted>"),
                _ => write!(f, "#<constant {:#x}>", self.0),
            },
            Tag::Fixnum => write!(f, "{}", (self.0 as isize) >> TAG_BITS),
            _ => write!(f, "#<{} {:#x}>", self.type_name(), self.addr()),
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::NIL
    }
}
