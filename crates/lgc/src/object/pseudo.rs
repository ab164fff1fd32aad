//! Pseudo-vector layouts understood by the collector
//!
//! Each struct is `#[repr(C)]`: header, traced `Value` slots, then raw
//! fields. The traced count passed to [`VectorHeader::pseudo`] must match
//! the number of leading `Value` fields, and the raw word count comes from
//! [`rest_words`](super::vector::rest_words).

use super::vector::{rest_words, PvecType, VectorHeader};
use crate::value::Value;
use std::ffi::c_void;
use std::mem::ManuallyDrop;

/// Weakness of a hash table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Weakness {
    /// Ordinary strong table
    None = 0,
    /// Entry dies with its key
    Key = 1,
    /// Entry dies with its value
    Value = 2,
    /// Entry survives while either side is reachable
    KeyOrValue = 3,
    /// Entry survives only while both sides are reachable
    KeyAndValue = 4,
}

impl Weakness {
    pub fn is_weak(self) -> bool {
        self != Weakness::None
    }

    /// Whether an entry with these liveness facts must be dropped
    pub fn entry_dies(self, key_live: bool, value_live: bool) -> bool {
        match self {
            Weakness::None => false,
            Weakness::Key => !key_live,
            Weakness::Value => !value_live,
            Weakness::KeyOrValue => !(key_live || value_live),
            Weakness::KeyAndValue => !(key_live && value_live),
        }
    }
}

/// Identity hash table
///
/// Entries live in `key_and_value`, a plain vector of `2 * capacity`
/// slots: key at `2i`, value at `2i + 1`, `Value::UNBOUND` marking an empty
/// key and `Value::DELETED` a removed one. The entry vector is traced
/// normally only when the table is strong.
#[repr(C)]
pub struct HashTable {
    pub header: VectorHeader,
    /// Test name, traced
    pub test: Value,
    pub key_and_value: Value,
    pub count: usize,
    pub weakness: Weakness,
}

impl HashTable {
    pub const TRACED: usize = 1;

    pub fn header() -> VectorHeader {
        VectorHeader::pseudo(
            PvecType::HashTable,
            Self::TRACED,
            rest_words::<HashTable>(Self::TRACED),
        )
    }
}

/// Finalizer object, linked into the live or doomed ring
#[repr(C)]
pub struct FinalizerObj {
    pub header: VectorHeader,
    /// Callback, traced; nil once run or unregistered
    pub function: Value,
    pub prev: *mut FinalizerObj,
    pub next: *mut FinalizerObj,
}

impl FinalizerObj {
    pub const TRACED: usize = 1;

    pub fn header() -> VectorHeader {
        VectorHeader::pseudo(
            PvecType::Finalizer,
            Self::TRACED,
            rest_words::<FinalizerObj>(Self::TRACED),
        )
    }

    /// Ring sentinel
    pub fn sentinel() -> Box<FinalizerObj> {
        let mut head = Box::new(FinalizerObj {
            header: Self::header(),
            function: Value::NIL,
            prev: std::ptr::null_mut(),
            next: std::ptr::null_mut(),
        });
        let p: *mut FinalizerObj = &mut *head;
        head.prev = p;
        head.next = p;
        head
    }
}

/// Native finalizer of a user pointer
pub type UserPtrFinalizer = unsafe fn(*mut c_void);

/// Native handle owned by the heap
#[repr(C)]
pub struct UserPtr {
    pub header: VectorHeader,
    pub finalizer: Option<UserPtrFinalizer>,
    pub p: *mut c_void,
}

impl UserPtr {
    pub fn header() -> VectorHeader {
        VectorHeader::pseudo(PvecType::UserPtr, 0, rest_words::<UserPtr>(0))
    }
}

/// Arbitrary-precision integer; limbs are owned by the object
#[repr(C)]
pub struct Bignum {
    pub header: VectorHeader,
    pub limbs: ManuallyDrop<Vec<u64>>,
    pub negative: bool,
}

impl Bignum {
    pub fn header() -> VectorHeader {
        VectorHeader::pseudo(PvecType::Bignum, 0, rest_words::<Bignum>(0))
    }
}
