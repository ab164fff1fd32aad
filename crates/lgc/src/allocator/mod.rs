//! Allocator Module - Per-Kind Object Allocation
//!
//! Owns every allocator the collector sweeps:
//!
//! - **Cell arenas**: pairs, floats, symbols, intervals and string headers
//!   ([`arena`])
//! - **String payloads**: sblocks with compaction ([`string`])
//! - **Vector-likes**: size-classed blocks plus large objects ([`vector`])
//! - **Pure space**: immutable constants ([`pure`])
//!
//! All system memory goes through one [`SystemAllocator`] and every block
//! that can hold Lisp objects is entered in the [`HeapRegistry`], which is
//! what conservative scanning consults.
//!
//! Allocation never starts a collection. It only advances
//! `bytes_since_gc`; the driver compares that against the threshold at
//! safe points.

pub mod arena;
pub mod pure;
pub mod string;
pub mod vector;

pub use arena::{CellArena, CellKind, Slot, SweepCount, CELL_BLOCK_BYTES};
pub use pure::{PureKey, PureSpace};
pub use string::{StringAllocator, StringCell, StringSweep};
pub use vector::{VectorAllocator, VectorSweep};

use crate::config::{GcConfig, WORD_SIZE};
use crate::error::Result;
use crate::heap::registry::{HeapRegistry, MemKind};
use crate::heap::system::SystemAllocator;
use crate::object::vector::VectorHeader;
use crate::object::{Interval, IntervalPtr, LispFloat, Pair, PvecType, Symbol};
use crate::stats::{CollectionStats, ConsingCounters, KindStats};
use crate::value::{Tag, Value};
use std::ptr;

/// Every allocator of one heap
pub struct Allocator {
    pub(crate) sys: SystemAllocator,
    pub(crate) registry: HeapRegistry,
    pub(crate) conses: CellArena<Pair>,
    pub(crate) floats: CellArena<LispFloat>,
    pub(crate) symbols: CellArena<Symbol>,
    pub(crate) intervals: CellArena<Interval>,
    pub(crate) strings: StringAllocator,
    pub(crate) vectors: VectorAllocator,
    pub(crate) pure: PureSpace,

    /// Objects ever allocated, per kind
    pub(crate) counters: ConsingCounters,

    /// Bytes allocated since the last cycle finished
    pub(crate) bytes_since_gc: usize,
}

impl Allocator {
    pub fn new(config: &GcConfig) -> Result<Self> {
        Ok(Self {
            sys: SystemAllocator::new(config.heap_limit, config.memory_reserve),
            registry: HeapRegistry::new(),
            conses: CellArena::new(),
            floats: CellArena::new(),
            symbols: CellArena::new(),
            intervals: CellArena::new(),
            strings: StringAllocator::new(),
            vectors: VectorAllocator::new(),
            pure: PureSpace::new(config.pure_size)?,
            counters: ConsingCounters::default(),
            bytes_since_gc: 0,
        })
    }

    fn charge(&mut self, bytes: usize) {
        self.bytes_since_gc = self.bytes_since_gc.saturating_add(bytes);
    }

    pub fn alloc_pair(&mut self, car: Value, cdr: Value) -> Result<Value> {
        let cell = self
            .conses
            .allocate(Pair { car, cdr }, &mut self.sys, &mut self.registry)?;
        self.counters.conses += 1;
        self.charge(CellArena::<Pair>::GEOMETRY.slot_size);
        Ok(Value::from_ptr(cell.as_ptr(), Tag::Pair))
    }

    pub fn alloc_float(&mut self, value: f64) -> Result<Value> {
        let cell = self
            .floats
            .allocate(LispFloat { value }, &mut self.sys, &mut self.registry)?;
        self.counters.floats += 1;
        self.charge(CellArena::<LispFloat>::GEOMETRY.slot_size);
        Ok(Value::from_ptr(cell.as_ptr(), Tag::Float))
    }

    pub fn alloc_symbol(&mut self, symbol: Symbol) -> Result<Value> {
        let cell = self
            .symbols
            .allocate(symbol, &mut self.sys, &mut self.registry)?;
        self.counters.symbols += 1;
        self.charge(CellArena::<Symbol>::GEOMETRY.slot_size);
        Ok(Value::from_ptr(cell.as_ptr(), Tag::Symbol))
    }

    pub fn alloc_interval(&mut self, interval: Interval) -> Result<IntervalPtr> {
        let cell = self
            .intervals
            .allocate(interval, &mut self.sys, &mut self.registry)?;
        self.counters.intervals += 1;
        self.charge(CellArena::<Interval>::GEOMETRY.slot_size);
        Ok(cell)
    }

    /// Allocate a heap string of `nbytes` payload bytes
    pub fn alloc_string(
        &mut self,
        nchars: usize,
        nbytes: usize,
        multibyte: bool,
        clear: bool,
    ) -> Result<Value> {
        let cell = self.strings.allocate(
            nchars,
            nbytes,
            multibyte,
            clear,
            &mut self.sys,
            &mut self.registry,
        )?;
        self.counters.strings += 1;
        self.counters.string_chars += nchars as u64;
        self.charge(CellArena::<crate::object::LispString>::GEOMETRY.slot_size + nbytes);
        Ok(Value::from_ptr(cell.as_ptr(), Tag::String))
    }

    /// Allocate a vector-like and write its header
    ///
    /// Slots are zeroed (nil) when `clear` is set.
    pub fn alloc_vectorlike(&mut self, header: VectorHeader, clear: bool) -> Result<Value> {
        let words = header.layout().words;
        if words == 0 {
            if header.is_pseudo() {
                return Err(crate::error::GcError::invalid_argument(
                    "memwords",
                    0,
                    "a pseudo-vector needs at least one word",
                ));
            }
            return Ok(Value::from_ptr(
                self.vectors.zero_vector().as_ptr(),
                Tag::Vectorlike,
            ));
        }
        let v = self
            .vectors
            .allocate(words, clear, &mut self.sys, &mut self.registry)?;
        unsafe { ptr::write(v.as_ptr(), header) };
        self.counters.vector_cells += words as u64;
        self.charge(header.nbytes());
        Ok(Value::from_ptr(v.as_ptr(), Tag::Vectorlike))
    }

    /// Resolve an arbitrary word to the live object it points into
    ///
    /// Used by conservative scanning. Interior pointers count. Intervals are
    /// only reachable through their strings and are never reported.
    pub fn object_at(&self, addr: usize) -> Option<Value> {
        let node = self.registry.find(addr)?;
        match node.kind {
            MemKind::Cons => self
                .conses
                .live_cell_containing(addr)
                .map(|c| Value::from_ptr(c.as_ptr(), Tag::Pair)),
            MemKind::Float => self
                .floats
                .live_cell_containing(addr)
                .map(|c| Value::from_ptr(c.as_ptr(), Tag::Float)),
            MemKind::Symbol => self
                .symbols
                .live_cell_containing(addr)
                .map(|c| Value::from_ptr(c.as_ptr(), Tag::Symbol)),
            MemKind::String => self
                .strings
                .headers
                .live_cell_containing(addr)
                .map(|c| Value::from_ptr(c.as_ptr(), Tag::String)),
            MemKind::VectorBlock | MemKind::LargeVector => self
                .vectors
                .live_vector_containing(addr, node)
                .map(|v| Value::from_ptr(v.as_ptr(), Tag::Vectorlike)),
            MemKind::Interval => None,
        }
    }

    /// Whether `addr` is in the pure region
    pub fn is_pure(&self, addr: usize) -> bool {
        self.pure.contains(addr)
    }

    /// Per-kind usage, in the fixed reporting order
    pub fn collection_stats(&self) -> CollectionStats {
        let (strings_used, strings_free) = self.strings.header_counts();

        let mut string_bytes = 0;
        self.strings
            .headers
            .for_each_live(|_, s| string_bytes += s.nbytes);

        let mut vectors = 0;
        let mut vector_slots = 0;
        let mut buffers = 0;
        self.vectors.for_each_live(|v| {
            let header = unsafe { v.as_ref() };
            vectors += 1;
            vector_slots += header.nbytes() / WORD_SIZE;
            if header.pvec_type() == PvecType::Buffer {
                buffers += 1;
            }
        });

        CollectionStats {
            kinds: vec![
                KindStats::new(
                    "conses",
                    self.conses.cell_size(),
                    self.conses.used(),
                    self.conses.free(),
                ),
                KindStats::new(
                    "symbols",
                    self.symbols.cell_size(),
                    self.symbols.used(),
                    self.symbols.free(),
                ),
                KindStats::new(
                    "strings",
                    self.strings.headers.cell_size(),
                    strings_used,
                    strings_free,
                ),
                KindStats::new("string-bytes", 1, string_bytes, 0),
                KindStats::new("vectors", 0, vectors, 0),
                KindStats::new("vector-slots", WORD_SIZE, vector_slots, self.vectors.free_words()),
                KindStats::new(
                    "floats",
                    self.floats.cell_size(),
                    self.floats.used(),
                    self.floats.free(),
                ),
                KindStats::new(
                    "intervals",
                    self.intervals.cell_size(),
                    self.intervals.used(),
                    self.intervals.free(),
                ),
                KindStats::new("buffers", 0, buffers, 0),
            ],
        }
    }
}
