//! Interval (text-property tree node) layout

use crate::allocator::arena::{CellKind, Slot};
use crate::heap::registry::MemKind;
use crate::value::Value;
use std::ptr::NonNull;

/// Raw pointer to an interval cell
pub type IntervalPtr = NonNull<Slot<Interval>>;

/// Opaque handle to an interval, handed to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IntervalRef(pub(crate) IntervalPtr);

/// Parent link of an interval
#[derive(Debug, Clone, Copy)]
pub enum IntervalParent {
    None,
    Interval(IntervalPtr),
    /// Root of a tree: the string or buffer that owns it
    Object(Value),
}

/// Tree node
#[derive(Debug)]
pub struct Interval {
    pub total_length: usize,
    pub position: usize,
    pub left: Option<IntervalPtr>,
    pub right: Option<IntervalPtr>,
    pub up: IntervalParent,
    pub plist: Value,
    pub marked: bool,
}

impl Interval {
    pub fn new() -> Self {
        Self {
            total_length: 0,
            position: 0,
            left: None,
            right: None,
            up: IntervalParent::None,
            plist: Value::NIL,
            marked: false,
        }
    }
}

impl Default for Interval {
    fn default() -> Self {
        Self::new()
    }
}

impl CellKind for Interval {
    const MEM_KIND: MemKind = MemKind::Interval;
    const NAME: &'static str = "intervals";
    const SIDE_MARKS: bool = false;

    fn inline_mark(&self) -> bool {
        self.marked
    }

    fn set_inline_mark(&mut self, marked: bool) {
        self.marked = marked;
    }
}
