//! Object Module - Heap Object Layouts
//!
//! Layout of every object kind the collector manages:
//! - [`Pair`] and [`LispFloat`]: two-word and one-word cells
//! - [`Symbol`]: name, value cell (four binding modes), function, plist, bucket link
//! - [`LispString`]: header only; payload bytes live in the string sub-allocator
//! - [`Interval`]: text-property tree node hanging off a string
//! - [`vector`]: header encoding shared by plain vectors and pseudo-vectors
//! - [`pseudo`]: fixed layouts of the pseudo-vectors the collector itself understands

pub mod interval;
pub mod pseudo;
pub mod string;
pub mod symbol;
pub mod vector;

pub use interval::{Interval, IntervalParent, IntervalPtr, IntervalRef};
pub use pseudo::{Bignum, FinalizerObj, HashTable, UserPtr, UserPtrFinalizer, Weakness};
pub use string::LispString;
pub use symbol::{ForwardId, LocalBinding, Symbol, SymbolValue};
pub use vector::{PvecType, VectorHeader};

use crate::allocator::arena::CellKind;
use crate::heap::registry::MemKind;
use crate::value::Value;

/// Two-slot cell
#[derive(Debug, Clone, Copy)]
pub struct Pair {
    pub car: Value,
    pub cdr: Value,
}

impl CellKind for Pair {
    const MEM_KIND: MemKind = MemKind::Cons;
    const NAME: &'static str = "conses";
    const SIDE_MARKS: bool = true;
}

/// Boxed float
#[derive(Debug, Clone, Copy)]
pub struct LispFloat {
    pub value: f64,
}

impl CellKind for LispFloat {
    const MEM_KIND: MemKind = MemKind::Float;
    const NAME: &'static str = "floats";
    const SIDE_MARKS: bool = true;
}
