//! Symbol layout

use crate::allocator::arena::CellKind;
use crate::heap::registry::MemKind;
use crate::value::Value;

/// Handle for a value cell owned by the host
///
/// The collector never traces through a forwarded symbol; the host marks
/// whatever the slot holds through a root provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ForwardId(pub u32);

/// Buffer-local binding of a symbol
#[derive(Debug, Clone)]
pub struct LocalBinding {
    /// Buffer (or frame) the current binding belongs to
    pub where_: Value,
    /// Global default
    pub default_value: Value,
    /// Value for `where_`
    pub value: Value,
    /// Become local automatically when set
    pub local_if_set: bool,
}

/// Value cell of a symbol
#[derive(Debug)]
pub enum SymbolValue {
    Plain(Value),
    /// Variable alias; holds the target symbol
    Alias(Value),
    Localized(Box<LocalBinding>),
    Forwarded(ForwardId),
}

/// Symbol cell
#[derive(Debug)]
pub struct Symbol {
    pub name: Value,
    pub value: SymbolValue,
    pub function: Value,
    pub plist: Value,
    /// Next symbol in the same obarray bucket, or nil
    pub next: Value,
    /// Kept alive regardless of reachability
    pub pinned: bool,
}

impl Symbol {
    pub fn new(name: Value) -> Self {
        Self {
            name,
            value: SymbolValue::Plain(Value::UNBOUND),
            function: Value::NIL,
            plist: Value::NIL,
            next: Value::NIL,
            pinned: false,
        }
    }
}

impl CellKind for Symbol {
    const MEM_KIND: MemKind = MemKind::Symbol;
    const NAME: &'static str = "symbols";
    const SIDE_MARKS: bool = true;
}
