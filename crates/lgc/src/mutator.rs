//! Mutator API - Object Constructors and Accessors
//!
//! Semua object Lisp dibuat lewat method di sini. Constructors only
//! allocate: they never start a collection, so values held in locals stay
//! valid until the host's next safe point ([`GarbageCollector::maybe_gc`]).
//!
//! Accessors check the kind of their argument and return
//! [`GcError::WrongType`] on mismatch. Objects in pure space are read-only;
//! mutating one is an [`GcError::InvalidArgument`].

use crate::allocator::{CellArena, PureKey, Slot};
use crate::error::{GcError, Result};
use crate::gc::GarbageCollector;
use crate::marker::{cell_of, vector_of, RootId, RootProvider};
use crate::object::pseudo::{Bignum, FinalizerObj, HashTable, UserPtr, UserPtrFinalizer, Weakness};
use crate::object::vector::{
    contents, VectorHeader, PSEUDOVECTOR_REST_MASK, PSEUDOVECTOR_SIZE_BITS,
    PSEUDOVECTOR_SIZE_MASK, VECTOR_ELTS_MAX,
};
use crate::object::{
    ForwardId, Interval, IntervalParent, IntervalRef, LispFloat, LispString, LocalBinding, Pair,
    PvecType, Symbol, SymbolValue,
};
use crate::value::{Tag, Value};
use rustc_hash::{FxHashSet, FxHasher};
use std::ffi::c_void;
use std::hash::Hasher;
use std::mem::{size_of, ManuallyDrop};
use std::ptr;

/// Most slots a record may have, type slot included
pub const RECORD_SLOTS_MAX: usize = PSEUDOVECTOR_SIZE_MASK;

/// Longest variable alias chain followed before giving up
const MAX_ALIAS_DEPTH: usize = 64;

fn wrong_type(expected: &'static str, actual: Value) -> GcError {
    GcError::WrongType {
        expected,
        actual: actual.type_name(),
    }
}

fn pair_ref<'a>(v: Value) -> Result<&'a mut Pair> {
    if !v.is_pair() {
        return Err(wrong_type("cons", v));
    }
    Ok(unsafe { CellArena::<Pair>::live(cell_of(v)) })
}

fn symbol_ref<'a>(v: Value) -> Result<&'a mut Symbol> {
    if !v.is_symbol() {
        return Err(wrong_type("symbol", v));
    }
    Ok(unsafe { CellArena::<Symbol>::live(cell_of(v)) })
}

fn string_ref<'a>(v: Value) -> Result<&'a mut LispString> {
    if !v.is_string() {
        return Err(wrong_type("string", v));
    }
    Ok(unsafe { CellArena::<LispString>::live(cell_of(v)) })
}

fn pvec_kind(v: Value) -> Result<PvecType> {
    if !v.is_vectorlike() {
        return Err(wrong_type("vectorlike", v));
    }
    Ok(unsafe { vector_of(v).as_ref() }.pvec_type())
}

/// Borrow a pseudo-vector of `kind` as its layout struct
fn pseudo_ref<'a, T>(v: Value, kind: PvecType, expected: &'static str) -> Result<&'a mut T> {
    if pvec_kind(v)? != kind {
        return Err(wrong_type(expected, v));
    }
    Ok(unsafe { &mut *(vector_of(v).as_ptr() as *mut T) })
}

/// Array-like kinds whose traced slots are open to `aref`/`aset`
fn is_array_like(kind: PvecType) -> bool {
    !matches!(
        kind,
        PvecType::Free
            | PvecType::HashTable
            | PvecType::Finalizer
            | PvecType::UserPtr
            | PvecType::Bignum
    )
}

/// Characters in a multibyte byte sequence
fn count_chars(bytes: &[u8]) -> usize {
    bytes.iter().filter(|b| (**b & 0xC0) != 0x80).count()
}

fn hash_slot(key: Value, capacity: usize) -> usize {
    let mut hasher = FxHasher::default();
    hasher.write_usize(key.bits());
    (hasher.finish() as usize) % capacity
}

/// Result of probing a hash table for a key
enum Probe {
    Found(usize),
    Missing {
        insert_at: Option<usize>,
        /// No empty slot was met; the table is full of tombstones
        exhausted: bool,
    },
}

fn kv_of(table: &HashTable) -> (*mut Value, usize) {
    let kv = vector_of(table.key_and_value);
    let capacity = unsafe { kv.as_ref() }.traced_slots() / 2;
    (unsafe { contents(kv) }, capacity)
}

fn probe(table: &HashTable, key: Value) -> Probe {
    let (base, capacity) = kv_of(table);
    if capacity == 0 {
        return Probe::Missing {
            insert_at: None,
            exhausted: true,
        };
    }

    let mut tombstone = None;
    let mut i = hash_slot(key, capacity);
    for _ in 0..capacity {
        let k = unsafe { *base.add(2 * i) };
        if k == key {
            return Probe::Found(i);
        }
        if k == Value::UNBOUND {
            return Probe::Missing {
                insert_at: Some(tombstone.unwrap_or(i)),
                exhausted: false,
            };
        }
        if k == Value::DELETED && tombstone.is_none() {
            tombstone = Some(i);
        }
        i = (i + 1) % capacity;
    }
    Probe::Missing {
        insert_at: tombstone,
        exhausted: true,
    }
}

impl GarbageCollector {
    fn check_impure(&self, v: Value) -> Result<()> {
        if v.is_heap_object() && self.heap.is_pure(v.addr()) {
            return Err(GcError::invalid_argument(
                "object",
                format!("{:?}", v),
                "attempt to modify a pure object",
            ));
        }
        Ok(())
    }

    /// Whether `v` lives in pure space
    pub fn is_pure(&self, v: Value) -> bool {
        v.is_heap_object() && self.heap.is_pure(v.addr())
    }

    // ------------------------------------------------------------------
    // Conses and floats

    pub fn cons(&mut self, car: Value, cdr: Value) -> Result<Value> {
        self.heap.alloc_pair(car, cdr)
    }

    /// Proper list of `items`
    pub fn list(&mut self, items: &[Value]) -> Result<Value> {
        let mut list = Value::NIL;
        for item in items.iter().rev() {
            list = self.cons(*item, list)?;
        }
        Ok(list)
    }

    pub fn car(&self, v: Value) -> Result<Value> {
        if v.is_nil() {
            return Ok(Value::NIL);
        }
        Ok(pair_ref(v)?.car)
    }

    pub fn cdr(&self, v: Value) -> Result<Value> {
        if v.is_nil() {
            return Ok(Value::NIL);
        }
        Ok(pair_ref(v)?.cdr)
    }

    pub fn setcar(&mut self, cell: Value, car: Value) -> Result<()> {
        let pair = pair_ref(cell)?;
        self.check_impure(cell)?;
        pair.car = car;
        Ok(())
    }

    pub fn setcdr(&mut self, cell: Value, cdr: Value) -> Result<()> {
        let pair = pair_ref(cell)?;
        self.check_impure(cell)?;
        pair.cdr = cdr;
        Ok(())
    }

    pub fn make_float(&mut self, value: f64) -> Result<Value> {
        self.heap.alloc_float(value)
    }

    pub fn float_value(&self, v: Value) -> Result<f64> {
        if !v.is_float() {
            return Err(wrong_type("float", v));
        }
        Ok(unsafe { CellArena::<LispFloat>::live(cell_of(v)) }.value)
    }

    // ------------------------------------------------------------------
    // Strings

    fn heap_string(&mut self, bytes: &[u8], nchars: usize, multibyte: bool) -> Result<Value> {
        let s = self
            .heap
            .alloc_string(nchars, bytes.len(), multibyte, false)?;
        let header = string_ref(s)?;
        unsafe { ptr::copy_nonoverlapping(bytes.as_ptr(), header.data, bytes.len()) };
        Ok(s)
    }

    /// String with a copy of `bytes`
    ///
    /// Empty strings are the shared constants from pure space.
    pub fn make_string(&mut self, bytes: &[u8], multibyte: bool) -> Result<Value> {
        if bytes.is_empty() {
            return Ok(self.empty_string(multibyte));
        }
        let nchars = if multibyte {
            count_chars(bytes)
        } else {
            bytes.len()
        };
        self.heap_string(bytes, nchars, multibyte)
    }

    pub fn make_unibyte_string(&mut self, bytes: &[u8]) -> Result<Value> {
        self.make_string(bytes, false)
    }

    /// Unibyte string of `nbytes` bytes for the caller to fill in
    ///
    /// The bytes read as zero until written.
    pub fn make_uninit_string(&mut self, nbytes: usize) -> Result<Value> {
        if nbytes == 0 {
            return Ok(self.empty_unibyte);
        }
        self.heap.alloc_string(nbytes, nbytes, false, true)
    }

    /// The shared empty string
    pub fn empty_string(&self, multibyte: bool) -> Value {
        if multibyte {
            self.empty_multibyte
        } else {
            self.empty_unibyte
        }
    }

    pub fn string_bytes(&self, s: Value) -> Result<&[u8]> {
        Ok(string_ref(s)?.bytes())
    }

    /// Writable payload of a heap string
    ///
    /// The slice is invalidated by the next collection, which may move it.
    pub fn string_bytes_mut(&mut self, s: Value) -> Result<&mut [u8]> {
        let header = string_ref(s)?;
        self.check_impure(s)?;
        Ok(header.bytes_mut())
    }

    pub fn string_chars(&self, s: Value) -> Result<usize> {
        Ok(string_ref(s)?.nchars)
    }

    pub fn string_multibyte(&self, s: Value) -> Result<bool> {
        Ok(string_ref(s)?.multibyte)
    }

    /// Change a string's length, keeping its leading bytes
    ///
    /// Stays in place when the record size does not change.
    pub fn resize_string_data(&mut self, s: Value, new_nchars: usize, new_nbytes: usize) -> Result<()> {
        string_ref(s)?;
        self.check_impure(s)?;
        let heap = &mut self.heap;
        heap.strings.resize(cell_of(s), new_nbytes, &mut heap.sys)?;
        string_ref(s)?.nchars = new_nchars;
        Ok(())
    }

    /// Make a string's payload immovable
    ///
    /// For callers that keep a raw pointer to the bytes across
    /// allocations and collections.
    pub fn pin(&mut self, s: Value) -> Result<()> {
        string_ref(s)?;
        if self.is_pure(s) {
            return Ok(());
        }
        let heap = &mut self.heap;
        heap.strings.pin(cell_of(s), &mut heap.sys)
    }

    // ------------------------------------------------------------------
    // Intervals

    /// Fresh, unattached text-property node
    ///
    /// Nodes survive only while reachable from a string's tree; attach it
    /// before the next collection.
    pub fn make_interval(&mut self, total_length: usize, position: usize) -> Result<IntervalRef> {
        let cell = self.heap.alloc_interval(Interval {
            total_length,
            position,
            ..Interval::new()
        })?;
        Ok(IntervalRef(cell))
    }

    pub fn interval_plist(&self, interval: IntervalRef) -> Value {
        unsafe { CellArena::live(interval.0) }.plist
    }

    pub fn set_interval_plist(&mut self, interval: IntervalRef, plist: Value) {
        unsafe { CellArena::live(interval.0) }.plist = plist;
    }

    /// Hang `left` and `right` under `parent`
    pub fn set_interval_children(
        &mut self,
        parent: IntervalRef,
        left: Option<IntervalRef>,
        right: Option<IntervalRef>,
    ) {
        for child in left.iter().chain(right.iter()) {
            unsafe { CellArena::live(child.0) }.up = IntervalParent::Interval(parent.0);
        }
        let node = unsafe { CellArena::live(parent.0) };
        node.left = left.map(|l| l.0);
        node.right = right.map(|r| r.0);
    }

    /// Attach (or with `None`, drop) a string's text-property tree
    pub fn string_set_intervals(&mut self, s: Value, root: Option<IntervalRef>) -> Result<()> {
        let header = string_ref(s)?;
        self.check_impure(s)?;
        if let Some(root) = root {
            unsafe { CellArena::live(root.0) }.up = IntervalParent::Object(s);
        }
        header.intervals = root.map(|r| r.0);
        Ok(())
    }

    pub fn string_intervals(&self, s: Value) -> Result<Option<IntervalRef>> {
        Ok(string_ref(s)?.intervals.map(IntervalRef))
    }

    // ------------------------------------------------------------------
    // Symbols

    /// Uninterned symbol named `name`
    pub fn make_symbol(&mut self, name: &str) -> Result<Value> {
        let name = self.make_string(name.as_bytes(), !name.is_ascii())?;
        self.heap.alloc_symbol(Symbol::new(name))
    }

    pub fn symbol_name(&self, sym: Value) -> Result<Value> {
        Ok(symbol_ref(sym)?.name)
    }

    /// Follow aliases to the symbol that owns the value cell
    fn resolve_alias<'a>(&self, sym: Value) -> Result<&'a mut Symbol> {
        let mut current = sym;
        for _ in 0..MAX_ALIAS_DEPTH {
            let s = symbol_ref(current)?;
            match s.value {
                SymbolValue::Alias(target) => current = target,
                _ => return Ok(symbol_ref(current)?),
            }
        }
        Err(GcError::invalid_argument(
            "symbol",
            format!("{:?}", sym),
            "variable alias chain too long",
        ))
    }

    /// Current value; `Value::UNBOUND` when void
    pub fn symbol_value(&self, sym: Value) -> Result<Value> {
        match &self.resolve_alias(sym)?.value {
            SymbolValue::Plain(v) => Ok(*v),
            SymbolValue::Localized(binding) => Ok(binding.value),
            SymbolValue::Forwarded(id) => Err(GcError::invalid_argument(
                "symbol",
                format!("{:?}", sym),
                format!("value lives in host slot {}", id.0),
            )),
            SymbolValue::Alias(_) => unreachable!("aliases resolved above"),
        }
    }

    pub fn set_symbol_value(&mut self, sym: Value, value: Value) -> Result<()> {
        match &mut self.resolve_alias(sym)?.value {
            SymbolValue::Plain(v) => *v = value,
            SymbolValue::Localized(binding) => binding.value = value,
            SymbolValue::Forwarded(id) => {
                return Err(GcError::invalid_argument(
                    "symbol",
                    format!("{:?}", sym),
                    format!("value lives in host slot {}", id.0),
                ))
            },
            SymbolValue::Alias(_) => unreachable!("aliases resolved above"),
        }
        Ok(())
    }

    /// Make `sym` a variable alias of `target`
    pub fn make_symbol_alias(&mut self, sym: Value, target: Value) -> Result<()> {
        symbol_ref(target)?;
        symbol_ref(sym)?.value = SymbolValue::Alias(target);
        Ok(())
    }

    /// Give `sym` a per-buffer binding, current in `where_`
    pub fn make_symbol_local(&mut self, sym: Value, where_: Value, default_value: Value) -> Result<()> {
        symbol_ref(sym)?.value = SymbolValue::Localized(Box::new(LocalBinding {
            where_,
            default_value,
            value: default_value,
            local_if_set: false,
        }));
        Ok(())
    }

    /// Hand the value cell to the host
    pub fn forward_symbol(&mut self, sym: Value, slot: ForwardId) -> Result<()> {
        symbol_ref(sym)?.value = SymbolValue::Forwarded(slot);
        Ok(())
    }

    pub fn symbol_function(&self, sym: Value) -> Result<Value> {
        Ok(symbol_ref(sym)?.function)
    }

    pub fn set_symbol_function(&mut self, sym: Value, function: Value) -> Result<()> {
        symbol_ref(sym)?.function = function;
        Ok(())
    }

    pub fn symbol_plist(&self, sym: Value) -> Result<Value> {
        Ok(symbol_ref(sym)?.plist)
    }

    pub fn set_symbol_plist(&mut self, sym: Value, plist: Value) -> Result<()> {
        symbol_ref(sym)?.plist = plist;
        Ok(())
    }

    /// Next symbol in the same obarray bucket
    pub fn symbol_next(&self, sym: Value) -> Result<Value> {
        Ok(symbol_ref(sym)?.next)
    }

    pub fn set_symbol_next(&mut self, sym: Value, next: Value) -> Result<()> {
        if !next.is_nil() {
            symbol_ref(next)?;
        }
        symbol_ref(sym)?.next = next;
        Ok(())
    }

    /// Keep `sym` alive for the life of the heap
    pub fn pin_symbol(&mut self, sym: Value) -> Result<()> {
        symbol_ref(sym)?.pinned = true;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Vectors and pseudo-vectors

    /// Vector of `len` slots, each `init`
    pub fn make_vector(&mut self, len: usize, init: Value) -> Result<Value> {
        if len > VECTOR_ELTS_MAX {
            return Err(GcError::VectorTooLarge {
                requested: len,
                max: VECTOR_ELTS_MAX,
            });
        }
        let v = self
            .heap
            .alloc_vectorlike(VectorHeader::plain(len), init.is_nil())?;
        if !init.is_nil() {
            let base = unsafe { contents(vector_of(v)) };
            for i in 0..len {
                unsafe { *base.add(i) = init };
            }
        }
        Ok(v)
    }

    /// Record of type `type_` with `nslots` further slots, each `init`
    pub fn make_record(&mut self, type_: Value, nslots: usize, init: Value) -> Result<Value> {
        let total = nslots + 1;
        if total > RECORD_SLOTS_MAX {
            return Err(GcError::VectorTooLarge {
                requested: total,
                max: RECORD_SLOTS_MAX,
            });
        }
        let v = self.allocate_pseudovector(total, total, PvecType::Record)?;
        let base = unsafe { contents(vector_of(v)) };
        unsafe {
            *base = type_;
            for i in 1..total {
                *base.add(i) = init;
            }
        }
        Ok(v)
    }

    /// Pseudo-vector of `memwords` words, the first `traced` of them traced
    ///
    /// Traced slots start as nil and raw words as zero. Kinds whose layout
    /// the collector itself reads (hash tables, finalizers, user pointers,
    /// bignums) only come from their own constructors.
    pub fn allocate_pseudovector(&mut self, memwords: usize, traced: usize, kind: PvecType) -> Result<Value> {
        match kind {
            PvecType::NormalVector | PvecType::Free => {
                return Err(GcError::invalid_argument(
                    "kind",
                    kind.name(),
                    "not a pseudo-vector kind",
                ))
            },
            PvecType::HashTable | PvecType::Finalizer | PvecType::UserPtr | PvecType::Bignum => {
                let constructor = match kind {
                    PvecType::HashTable => "make_hash_table",
                    PvecType::Finalizer => "make_finalizer",
                    PvecType::UserPtr => "make_user_ptr",
                    _ => "make_bignum",
                };
                return Err(GcError::invalid_argument(
                    "kind",
                    kind.name(),
                    format!("has a fixed layout; use {}", constructor),
                ));
            },
            _ => {},
        }
        if traced > memwords {
            return Err(GcError::invalid_argument(
                "traced",
                traced,
                format!("exceeds the {} words allocated", memwords),
            ));
        }
        let rest = memwords - traced;
        let rest_max = PSEUDOVECTOR_REST_MASK >> PSEUDOVECTOR_SIZE_BITS;
        if traced > PSEUDOVECTOR_SIZE_MASK || rest > rest_max {
            return Err(GcError::VectorTooLarge {
                requested: memwords,
                max: PSEUDOVECTOR_SIZE_MASK + rest_max,
            });
        }
        self.heap
            .alloc_vectorlike(VectorHeader::pseudo(kind, traced, rest), true)
    }

    /// Kind of a vector-like
    pub fn pvec_type(&self, v: Value) -> Result<PvecType> {
        pvec_kind(v)
    }

    /// Number of slots `aref` can reach
    pub fn vector_len(&self, v: Value) -> Result<usize> {
        let kind = pvec_kind(v)?;
        if !is_array_like(kind) {
            return Err(wrong_type("array", v));
        }
        Ok(unsafe { vector_of(v).as_ref() }.traced_slots())
    }

    pub fn aref(&self, v: Value, index: usize) -> Result<Value> {
        let len = self.vector_len(v)?;
        if index >= len {
            return Err(GcError::invalid_argument(
                "index",
                index,
                format!("out of range for length {}", len),
            ));
        }
        Ok(unsafe { *contents(vector_of(v)).add(index) })
    }

    pub fn aset(&mut self, v: Value, index: usize, value: Value) -> Result<()> {
        let len = self.vector_len(v)?;
        self.check_impure(v)?;
        if index >= len {
            return Err(GcError::invalid_argument(
                "index",
                index,
                format!("out of range for length {}", len),
            ));
        }
        unsafe { *contents(vector_of(v)).add(index) = value };
        Ok(())
    }

    /// Native handle; `finalizer` runs on `p` when the object is swept
    pub fn make_user_ptr(&mut self, finalizer: Option<UserPtrFinalizer>, p: *mut c_void) -> Result<Value> {
        let v = self.heap.alloc_vectorlike(UserPtr::header(), true)?;
        let obj = pseudo_ref::<UserPtr>(v, PvecType::UserPtr, "user-ptr")?;
        obj.finalizer = finalizer;
        obj.p = p;
        Ok(v)
    }

    pub fn user_ptr(&self, v: Value) -> Result<*mut c_void> {
        Ok(pseudo_ref::<UserPtr>(v, PvecType::UserPtr, "user-ptr")?.p)
    }

    pub fn make_bignum(&mut self, limbs: Vec<u64>, negative: bool) -> Result<Value> {
        let v = self.heap.alloc_vectorlike(Bignum::header(), true)?;
        let obj = vector_of(v).as_ptr() as *mut Bignum;
        unsafe {
            ptr::addr_of_mut!((*obj).limbs).write(ManuallyDrop::new(limbs));
            (*obj).negative = negative;
        }
        Ok(v)
    }

    /// Limbs (least significant first) and sign
    pub fn bignum_limbs(&self, v: Value) -> Result<(&[u64], bool)> {
        let big = pseudo_ref::<Bignum>(v, PvecType::Bignum, "bignum")?;
        Ok((&big.limbs[..], big.negative))
    }

    // ------------------------------------------------------------------
    // Hash tables

    /// Identity hash table with room for `capacity` entries
    pub fn make_hash_table(&mut self, weakness: Weakness, capacity: usize) -> Result<Value> {
        let kv = self.make_kv_vector(capacity.max(1))?;
        let t = self.heap.alloc_vectorlike(HashTable::header(), true)?;
        let table = pseudo_ref::<HashTable>(t, PvecType::HashTable, "hash-table")?;
        table.test = Value::NIL;
        table.key_and_value = kv;
        table.count = 0;
        table.weakness = weakness;
        Ok(t)
    }

    fn make_kv_vector(&mut self, capacity: usize) -> Result<Value> {
        let kv = self.make_vector(2 * capacity, Value::NIL)?;
        let base = unsafe { contents(vector_of(kv)) };
        for i in 0..capacity {
            unsafe { *base.add(2 * i) = Value::UNBOUND };
        }
        Ok(kv)
    }

    /// Set the weakness of an existing table
    ///
    /// Weak tables are found by marking; no separate list is kept.
    pub fn register_weak_table(&mut self, t: Value, weakness: Weakness) -> Result<()> {
        self.check_impure(t)?;
        pseudo_ref::<HashTable>(t, PvecType::HashTable, "hash-table")?.weakness = weakness;
        Ok(())
    }

    pub fn hash_weakness(&self, t: Value) -> Result<Weakness> {
        Ok(pseudo_ref::<HashTable>(t, PvecType::HashTable, "hash-table")?.weakness)
    }

    pub fn hash_get(&self, t: Value, key: Value) -> Result<Option<Value>> {
        let table = pseudo_ref::<HashTable>(t, PvecType::HashTable, "hash-table")?;
        match probe(table, key) {
            Probe::Found(i) => {
                let (base, _) = kv_of(table);
                Ok(Some(unsafe { *base.add(2 * i + 1) }))
            },
            Probe::Missing { .. } => Ok(None),
        }
    }

    pub fn hash_put(&mut self, t: Value, key: Value, value: Value) -> Result<()> {
        if key == Value::UNBOUND || key == Value::DELETED {
            return Err(GcError::invalid_argument(
                "key",
                format!("{:?}", key),
                "reserved marker cannot be a hash key",
            ));
        }
        self.check_impure(t)?;
        let table = pseudo_ref::<HashTable>(t, PvecType::HashTable, "hash-table")?;

        let (insert_at, exhausted) = match probe(table, key) {
            Probe::Found(i) => {
                let (base, _) = kv_of(table);
                unsafe { *base.add(2 * i + 1) = value };
                return Ok(());
            },
            Probe::Missing {
                insert_at,
                exhausted,
            } => (insert_at, exhausted),
        };

        let (_, capacity) = kv_of(table);
        let crowded = (table.count + 1) * 4 > capacity * 3;
        let slot = match insert_at {
            Some(i) if !crowded && !exhausted => i,
            _ => {
                let new_capacity = if crowded { capacity * 2 } else { capacity };
                self.rehash(t, new_capacity)?;
                let table = pseudo_ref::<HashTable>(t, PvecType::HashTable, "hash-table")?;
                match probe(table, key) {
                    Probe::Missing {
                        insert_at: Some(i), ..
                    } => i,
                    _ => crate::heap_corruption!("rehashed table {:?} has no free slot", t),
                }
            },
        };

        let table = pseudo_ref::<HashTable>(t, PvecType::HashTable, "hash-table")?;
        let (base, _) = kv_of(table);
        unsafe {
            *base.add(2 * slot) = key;
            *base.add(2 * slot + 1) = value;
        }
        table.count += 1;
        Ok(())
    }

    /// Remove `key`; false if it was absent
    pub fn hash_remove(&mut self, t: Value, key: Value) -> Result<bool> {
        self.check_impure(t)?;
        let table = pseudo_ref::<HashTable>(t, PvecType::HashTable, "hash-table")?;
        match probe(table, key) {
            Probe::Found(i) => {
                let (base, _) = kv_of(table);
                unsafe {
                    *base.add(2 * i) = Value::DELETED;
                    *base.add(2 * i + 1) = Value::NIL;
                }
                table.count -= 1;
                Ok(true)
            },
            Probe::Missing { .. } => Ok(false),
        }
    }

    pub fn hash_count(&self, t: Value) -> Result<usize> {
        Ok(pseudo_ref::<HashTable>(t, PvecType::HashTable, "hash-table")?.count)
    }

    /// Move every entry into a fresh entry vector, dropping tombstones
    fn rehash(&mut self, t: Value, capacity: usize) -> Result<()> {
        let kv = self.make_kv_vector(capacity.max(1))?;
        let table = pseudo_ref::<HashTable>(t, PvecType::HashTable, "hash-table")?;
        let (old_base, old_capacity) = kv_of(table);
        table.key_and_value = kv;

        let (new_base, new_capacity) = kv_of(table);
        for i in 0..old_capacity {
            let (key, value) = unsafe { (*old_base.add(2 * i), *old_base.add(2 * i + 1)) };
            if key == Value::UNBOUND || key == Value::DELETED {
                continue;
            }
            let mut j = hash_slot(key, new_capacity);
            while unsafe { *new_base.add(2 * j) } != Value::UNBOUND {
                j = (j + 1) % new_capacity;
            }
            unsafe {
                *new_base.add(2 * j) = key;
                *new_base.add(2 * j + 1) = value;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Finalizers

    /// Finalizer that calls `function` once after it becomes unreachable
    pub fn make_finalizer(&mut self, function: Value) -> Result<Value> {
        let v = self.heap.alloc_vectorlike(FinalizerObj::header(), true)?;
        let obj = pseudo_ref::<FinalizerObj>(v, PvecType::Finalizer, "finalizer")?;
        obj.function = function;
        unsafe { self.finalizers.register(obj) };
        Ok(v)
    }

    /// Cancel a finalizer; its function will never be called
    pub fn unregister_finalizer(&mut self, f: Value) -> Result<()> {
        pseudo_ref::<FinalizerObj>(f, PvecType::Finalizer, "finalizer")?.function = Value::NIL;
        Ok(())
    }

    pub fn finalizer_function(&self, f: Value) -> Result<Value> {
        Ok(pseudo_ref::<FinalizerObj>(f, PvecType::Finalizer, "finalizer")?.function)
    }

    // ------------------------------------------------------------------
    // Roots

    /// Mark whatever `slot` holds at every cycle
    ///
    /// # Safety
    /// `slot` must stay valid until [`unregister_root`](Self::unregister_root)
    /// or until the collector is dropped. Registering a slot twice aborts.
    pub unsafe fn register_root(&mut self, slot: *const Value) {
        self.roots.register_static(slot);
    }

    pub fn unregister_root(&mut self, slot: *const Value) -> bool {
        self.roots.unregister_static(slot)
    }

    /// Hold `value` until [`unroot`](Self::unroot)
    pub fn root(&mut self, value: Value) -> RootId {
        self.roots.root(value)
    }

    pub fn set_root(&mut self, id: RootId, value: Value) -> bool {
        self.roots.set_root(id, value)
    }

    pub fn get_root(&self, id: RootId) -> Option<Value> {
        self.roots.get_root(id)
    }

    pub fn unroot(&mut self, id: RootId) -> Option<Value> {
        self.roots.unroot(id)
    }

    /// Keep `value` alive for the life of the heap
    pub fn pin_object(&mut self, value: Value) {
        self.roots.pin(value);
    }

    pub fn add_root_provider(&mut self, provider: Box<dyn RootProvider>) {
        self.roots.add_provider(provider);
    }

    // ------------------------------------------------------------------
    // Pure space

    /// Place a string in pure space, sharing an equal one if present
    pub(crate) fn pure_string(&mut self, bytes: &[u8], nchars: usize, multibyte: bool) -> Result<Value> {
        let key = PureKey::String {
            bytes: bytes.to_vec(),
            multibyte,
        };
        if let Some(v) = self.heap.pure.lookup(&key) {
            return Ok(v);
        }

        let placed = self
            .heap
            .pure
            .alloc_object_with_bytes(size_of::<Slot<LispString>>(), bytes.len() + 1);
        let v = match placed {
            Some((header, data)) => unsafe {
                ptr::copy_nonoverlapping(bytes.as_ptr(), data, bytes.len());
                *data.add(bytes.len()) = 0;
                let cell = header as *mut Slot<LispString>;
                ptr::write(
                    cell,
                    Slot::Live(LispString {
                        nchars,
                        nbytes: bytes.len(),
                        multibyte,
                        intervals: None,
                        data,
                        immovable: true,
                        marked: false,
                    }),
                );
                Value::from_ptr(cell, Tag::String)
            },
            None => {
                let v = self.heap_string(bytes, nchars, multibyte)?;
                self.roots.pin(v);
                v
            },
        };
        self.heap.pure.remember(key, v);
        Ok(v)
    }

    fn pure_float(&mut self, value: f64) -> Result<Value> {
        let key = PureKey::Float(value.to_bits());
        if let Some(v) = self.heap.pure.lookup(&key) {
            return Ok(v);
        }
        let v = match self.heap.pure.alloc_object(size_of::<Slot<LispFloat>>()) {
            Some(at) => unsafe {
                let cell = at as *mut Slot<LispFloat>;
                ptr::write(cell, Slot::Live(LispFloat { value }));
                Value::from_ptr(cell, Tag::Float)
            },
            None => {
                let v = self.heap.alloc_float(value)?;
                self.roots.pin(v);
                v
            },
        };
        self.heap.pure.remember(key, v);
        Ok(v)
    }

    fn pure_pair(&mut self, car: Value, cdr: Value) -> Result<Value> {
        let key = PureKey::Pair(car, cdr);
        if let Some(v) = self.heap.pure.lookup(&key) {
            return Ok(v);
        }
        let v = match self.heap.pure.alloc_object(size_of::<Slot<Pair>>()) {
            Some(at) => unsafe {
                let cell = at as *mut Slot<Pair>;
                ptr::write(cell, Slot::Live(Pair { car, cdr }));
                Value::from_ptr(cell, Tag::Pair)
            },
            None => {
                let v = self.heap.alloc_pair(car, cdr)?;
                self.roots.pin(v);
                v
            },
        };
        self.heap.pure.remember(key, v);
        Ok(v)
    }

    fn pure_vector(&mut self, header: VectorHeader, slots: Vec<Value>) -> Result<Value> {
        let key = if header.is_pseudo() {
            let mut tagged = Vec::with_capacity(slots.len() + 1);
            tagged.push(Value::fixnum(header.pvec_type() as isize));
            tagged.extend_from_slice(&slots);
            PureKey::Record(tagged)
        } else {
            PureKey::Vector(slots.clone())
        };
        if let Some(v) = self.heap.pure.lookup(&key) {
            return Ok(v);
        }

        let v = match self.heap.pure.alloc_object(header.nbytes()) {
            Some(at) => unsafe {
                let ptr = at as *mut VectorHeader;
                ptr::write(ptr, header);
                let base = ptr.add(1) as *mut Value;
                ptr::copy_nonoverlapping(slots.as_ptr(), base, slots.len());
                Value::from_ptr(ptr, Tag::Vectorlike)
            },
            None => {
                let v = self.heap.alloc_vectorlike(header, false)?;
                let base = unsafe { contents(vector_of(v)) };
                unsafe { ptr::copy_nonoverlapping(slots.as_ptr(), base, slots.len()) };
                self.roots.pin(v);
                v
            },
        };
        self.heap.pure.remember(key, v);
        Ok(v)
    }

    /// Copy a constant into pure space
    ///
    /// Pairs, floats, strings, vectors and records are deep-copied and
    /// hash-consed; strings lose their text properties. Symbols and objects
    /// that cannot be copied (hash tables, finalizers, ...) are pinned and
    /// returned as they are. After
    /// [`finish_pure_loadup`](Self::finish_pure_loadup) this is the
    /// identity.
    ///
    /// # Errors
    /// `InvalidArgument` for circular structure.
    pub fn purecopy(&mut self, v: Value) -> Result<Value> {
        if !self.heap.pure.loading() {
            return Ok(v);
        }
        let mut path = FxHashSet::default();
        self.purecopy_inner(v, &mut path)
    }

    fn circular(v: Value) -> GcError {
        GcError::invalid_argument(
            "object",
            format!("{:?}", v),
            "circular structure cannot be purified",
        )
    }

    fn purecopy_inner(&mut self, v: Value, path: &mut FxHashSet<usize>) -> Result<Value> {
        if !v.is_heap_object()
            || self.heap.is_pure(v.addr())
            || self.dump.is_dump_image_address(v.addr())
        {
            return Ok(v);
        }

        match v.tag() {
            Tag::Float => {
                let value = self.float_value(v)?;
                self.pure_float(value)
            },
            Tag::String => {
                let s = string_ref(v)?;
                let (bytes, nchars, multibyte) = (s.bytes().to_vec(), s.nchars, s.multibyte);
                self.pure_string(&bytes, nchars, multibyte)
            },
            Tag::Symbol => {
                self.pin_symbol(v)?;
                Ok(v)
            },
            Tag::Pair => self.purecopy_list(v, path),
            Tag::Vectorlike => self.purecopy_vector(v, path),
            _ => Ok(v),
        }
    }

    fn purecopy_list(&mut self, list: Value, path: &mut FxHashSet<usize>) -> Result<Value> {
        let mut cells = Vec::new();
        let mut tail = list;
        while tail.is_pair() && !self.heap.is_pure(tail.addr()) {
            if !path.insert(tail.addr()) {
                return Err(Self::circular(list));
            }
            cells.push(tail);
            tail = pair_ref(tail)?.cdr;
        }

        let mut result = self.purecopy_inner(tail, path)?;
        for cell in cells.iter().rev() {
            let car = pair_ref(*cell)?.car;
            let car = self.purecopy_inner(car, path)?;
            result = self.pure_pair(car, result)?;
            path.remove(&cell.addr());
        }
        Ok(result)
    }

    fn purecopy_vector(&mut self, v: Value, path: &mut FxHashSet<usize>) -> Result<Value> {
        let ptr = vector_of(v);
        let header = unsafe { *ptr.as_ptr() };
        let layout = header.layout();
        let copyable = matches!(
            header.pvec_type(),
            PvecType::NormalVector | PvecType::Record | PvecType::Closure
        ) && layout.traced == layout.words;

        if !copyable {
            self.roots.pin(v);
            return Ok(v);
        }
        if layout.words == 0 {
            return Ok(v);
        }
        if !path.insert(v.addr()) {
            return Err(Self::circular(v));
        }

        let base = unsafe { contents(ptr) };
        let mut slots = Vec::with_capacity(layout.words);
        for i in 0..layout.words {
            let slot = unsafe { *base.add(i) };
            slots.push(self.purecopy_inner(slot, path)?);
        }
        path.remove(&v.addr());
        self.pure_vector(header, slots)
    }

    /// End start-up: drop the hash-cons table
    pub fn finish_pure_loadup(&mut self) {
        self.heap.pure.finish_loadup();
    }

    pub fn pure_bytes_used(&self) -> usize {
        self.heap.pure.bytes_used()
    }

    /// Whether any pure request fell back to the heap
    pub fn pure_overflowed(&self) -> bool {
        self.heap.pure.overflowed()
    }

    /// Additional pure bytes that would have been needed
    pub fn pure_overflow_bytes(&self) -> usize {
        self.heap.pure.overflow_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GcConfig;

    fn collector() -> GarbageCollector {
        GarbageCollector::new(GcConfig::default().with_conservative_scan(false)).unwrap()
    }

    #[test]
    fn test_list_and_accessors() {
        let mut gc = collector();
        let l = gc
            .list(&[Value::fixnum(1), Value::fixnum(2), Value::fixnum(3)])
            .unwrap();
        assert_eq!(gc.car(l).unwrap(), Value::fixnum(1));
        let rest = gc.cdr(l).unwrap();
        assert_eq!(gc.car(rest).unwrap(), Value::fixnum(2));
        assert_eq!(gc.car(Value::NIL).unwrap(), Value::NIL);

        gc.setcar(l, Value::T).unwrap();
        assert_eq!(gc.car(l).unwrap(), Value::T);

        let err = gc.car(Value::fixnum(4)).unwrap_err();
        assert!(matches!(err, GcError::WrongType { expected: "cons", .. }));
    }

    #[test]
    fn test_strings() {
        let mut gc = collector();
        let s = gc.make_string("héllo".as_bytes(), true).unwrap();
        assert_eq!(gc.string_chars(s).unwrap(), 5);
        assert_eq!(gc.string_bytes(s).unwrap(), "héllo".as_bytes());

        let u = gc.make_uninit_string(4).unwrap();
        gc.string_bytes_mut(u).unwrap().copy_from_slice(b"abcd");
        assert_eq!(gc.string_bytes(u).unwrap(), b"abcd");

        gc.resize_string_data(u, 2, 2).unwrap();
        assert_eq!(gc.string_bytes(u).unwrap(), b"ab");
        assert_eq!(gc.string_chars(u).unwrap(), 2);
    }

    #[test]
    fn test_empty_strings_are_shared_and_pure() {
        let mut gc = collector();
        let a = gc.make_string(b"", false).unwrap();
        let b = gc.make_unibyte_string(b"").unwrap();
        let m = gc.make_string(b"", true).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, m);
        assert!(gc.is_pure(a));
        assert!(gc.string_bytes_mut(a).is_err());
    }

    #[test]
    fn test_symbol_value_modes() {
        let mut gc = collector();
        let a = gc.make_symbol("a").unwrap();
        let b = gc.make_symbol("b").unwrap();
        assert_eq!(gc.symbol_value(a).unwrap(), Value::UNBOUND);

        gc.set_symbol_value(a, Value::fixnum(1)).unwrap();
        gc.make_symbol_alias(b, a).unwrap();
        assert_eq!(gc.symbol_value(b).unwrap(), Value::fixnum(1));
        gc.set_symbol_value(b, Value::fixnum(2)).unwrap();
        assert_eq!(gc.symbol_value(a).unwrap(), Value::fixnum(2));

        gc.make_symbol_local(a, Value::NIL, Value::fixnum(9)).unwrap();
        assert_eq!(gc.symbol_value(a).unwrap(), Value::fixnum(9));

        gc.forward_symbol(a, ForwardId(3)).unwrap();
        assert!(gc.symbol_value(b).is_err());

        let name = gc.symbol_name(a).unwrap();
        assert_eq!(gc.string_bytes(name).unwrap(), b"a");
    }

    #[test]
    fn test_record_limits() {
        let mut gc = collector();
        let ty = gc.make_symbol("point").unwrap();
        let r = gc.make_record(ty, 2, Value::fixnum(0)).unwrap();
        assert_eq!(gc.vector_len(r).unwrap(), 3);
        assert_eq!(gc.aref(r, 0).unwrap(), ty);
        assert_eq!(gc.pvec_type(r).unwrap(), PvecType::Record);

        let err = gc.make_record(ty, RECORD_SLOTS_MAX, Value::NIL).unwrap_err();
        assert!(matches!(err, GcError::VectorTooLarge { .. }));
    }

    #[test]
    fn test_fixed_layout_kinds_need_their_constructors() {
        let mut gc = collector();
        for kind in [
            PvecType::HashTable,
            PvecType::Finalizer,
            PvecType::UserPtr,
            PvecType::Bignum,
            PvecType::NormalVector,
            PvecType::Free,
        ] {
            let err = gc.allocate_pseudovector(8, 4, kind).unwrap_err();
            assert!(matches!(err, GcError::InvalidArgument { .. }), "{:?}", kind);
        }
        let window = gc.allocate_pseudovector(3, 2, PvecType::Window).unwrap();
        assert_eq!(gc.pvec_type(window).unwrap(), PvecType::Window);
    }

    #[test]
    fn test_vector_bounds() {
        let mut gc = collector();
        let v = gc.make_vector(3, Value::T).unwrap();
        assert_eq!(gc.aref(v, 2).unwrap(), Value::T);
        gc.aset(v, 0, Value::fixnum(5)).unwrap();
        assert_eq!(gc.aref(v, 0).unwrap(), Value::fixnum(5));
        assert!(gc.aref(v, 3).is_err());
        assert!(matches!(
            gc.make_vector(VECTOR_ELTS_MAX + 1, Value::NIL),
            Err(GcError::VectorTooLarge { .. })
        ));
    }

    #[test]
    fn test_hash_table_growth_and_tombstones() {
        let mut gc = collector();
        let t = gc.make_hash_table(Weakness::None, 2).unwrap();
        for i in 0..100 {
            gc.hash_put(t, Value::fixnum(i), Value::fixnum(i * 10)).unwrap();
        }
        assert_eq!(gc.hash_count(t).unwrap(), 100);
        assert_eq!(gc.hash_get(t, Value::fixnum(42)).unwrap(), Some(Value::fixnum(420)));

        for i in 0..100 {
            if i % 2 == 0 {
                assert!(gc.hash_remove(t, Value::fixnum(i)).unwrap());
            }
        }
        assert!(!gc.hash_remove(t, Value::fixnum(0)).unwrap());
        assert_eq!(gc.hash_count(t).unwrap(), 50);
        assert_eq!(gc.hash_get(t, Value::fixnum(41)).unwrap(), Some(Value::fixnum(410)));
        assert_eq!(gc.hash_get(t, Value::fixnum(40)).unwrap(), None);

        gc.hash_put(t, Value::fixnum(41), Value::T).unwrap();
        assert_eq!(gc.hash_get(t, Value::fixnum(41)).unwrap(), Some(Value::T));
        assert!(gc.hash_put(t, Value::UNBOUND, Value::T).is_err());
    }

    #[test]
    fn test_purecopy_hash_conses_equal_constants() {
        let mut gc = collector();
        let a1 = gc.make_string(b"abc", false).unwrap();
        let a2 = gc.make_string(b"abc", false).unwrap();
        let l1 = gc.list(&[a1, Value::fixnum(1)]).unwrap();
        let l2 = gc.list(&[a2, Value::fixnum(1)]).unwrap();

        let p1 = gc.purecopy(l1).unwrap();
        let p2 = gc.purecopy(l2).unwrap();
        assert_eq!(p1, p2);
        assert!(gc.is_pure(p1));
        assert!(gc.setcar(p1, Value::NIL).is_err());
        assert!(gc.pure_bytes_used() > 0);

        gc.finish_pure_loadup();
        let l3 = gc.list(&[Value::fixnum(1)]).unwrap();
        assert_eq!(gc.purecopy(l3).unwrap(), l3);
    }

    #[test]
    fn test_purecopy_rejects_cycles() {
        let mut gc = collector();
        let l = gc.list(&[Value::fixnum(1), Value::fixnum(2)]).unwrap();
        let tail = gc.cdr(l).unwrap();
        gc.setcdr(tail, l).unwrap();
        assert!(matches!(
            gc.purecopy(l),
            Err(GcError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_user_ptr_and_bignum() {
        let mut gc = collector();
        let mut payload = 7u32;
        let p = &mut payload as *mut u32 as *mut c_void;
        let u = gc.make_user_ptr(None, p).unwrap();
        assert_eq!(gc.user_ptr(u).unwrap(), p);

        let b = gc.make_bignum(vec![1, 2, 3], true).unwrap();
        let (limbs, negative) = gc.bignum_limbs(b).unwrap();
        assert_eq!(limbs, &[1, 2, 3]);
        assert!(negative);
        assert!(gc.user_ptr(b).is_err());
    }
}
