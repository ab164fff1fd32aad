//! Pure Space - Immutable Constant Region
//!
//! Region anonim (memmap2) untuk constant data yang dibuat saat start-up.
//! Object di sini tidak pernah di-mark, tidak pernah di-sweep dan tidak
//! pernah dipindah.
//!
//! Layout:
//! ```text
//! base                                              base + size
//! ┌───────────────────────┬──────────────┬────────────────────┐
//! │ Lisp objects  ──────► │     free     │ ◄────── raw bytes  │
//! └───────────────────────┴──────────────┴────────────────────┘
//!                         ^ front        ^ size - back
//! ```
//!
//! Lisp objects grow from the front with word alignment so their addresses
//! can be tagged; raw payload bytes grow from the back. When the two would
//! meet the request fails, the overflow is recorded and the caller falls
//! back to the ordinary heap.

use crate::config::WORD_SIZE;
use crate::error::{GcError, Result};
use crate::logging::{log_event, GcEvent};
use crate::value::Value;
use memmap2::{MmapMut, MmapOptions};
use rustc_hash::FxHashMap;

/// Structural key for hash-consing
///
/// Children are already pure when a key is built, so identity of the child
/// values is structural equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PureKey {
    Float(u64),
    String { bytes: Vec<u8>, multibyte: bool },
    Pair(Value, Value),
    Vector(Vec<Value>),
    Record(Vec<Value>),
}

/// Round `size` up to whole pages
pub fn align_to_page(size: usize) -> usize {
    let page = page_size::get();
    (size + page - 1) / page * page
}

/// The pure region
pub struct PureSpace {
    map: Option<MmapMut>,
    base: usize,
    size: usize,
    /// Bytes used at the front (Lisp objects)
    front: usize,
    /// Bytes used at the back (raw data)
    back: usize,
    /// Bytes requested after the region ran out
    overflow_bytes: usize,
    hash_cons: Option<FxHashMap<PureKey, Value>>,
}

impl PureSpace {
    /// Map a pure region of at least `size` bytes
    ///
    /// A zero size yields an empty region: every request overflows.
    pub fn new(size: usize) -> Result<Self> {
        let mut space = Self {
            map: None,
            base: 0,
            size: 0,
            front: 0,
            back: 0,
            overflow_bytes: 0,
            hash_cons: Some(FxHashMap::default()),
        };
        if size == 0 {
            return Ok(space);
        }

        let aligned = align_to_page(size);
        let mut map = MmapOptions::new().len(aligned).map_anon().map_err(|e| {
            log::error!("failed to map {} bytes of pure space: {}", aligned, e);
            GcError::OutOfMemory {
                requested: aligned,
                reserve_released: false,
            }
        })?;
        space.base = map.as_mut_ptr() as usize;
        space.size = aligned;
        space.map = Some(map);
        Ok(space)
    }

    /// Whether `addr` lies in the pure region
    pub fn contains(&self, addr: usize) -> bool {
        self.size != 0 && addr >= self.base && addr < self.base + self.size
    }

    fn record_overflow(&mut self, requested: usize) {
        if self.overflow_bytes == 0 {
            log::warn!(
                "pure space exhausted ({} bytes); falling back to the heap",
                self.size
            );
        }
        self.overflow_bytes += requested;
        log_event(GcEvent::PureOverflow {
            requested,
            pure_size: self.size,
        });
    }

    /// Bump `size` bytes for a Lisp object from the front
    ///
    /// Returns `None` and records the overflow when the region is full.
    pub fn alloc_object(&mut self, size: usize) -> Option<*mut u8> {
        let size = (size + WORD_SIZE - 1) & !(WORD_SIZE - 1);
        if self.front + size + self.back > self.size {
            self.record_overflow(size);
            return None;
        }
        let p = (self.base + self.front) as *mut u8;
        self.front += size;
        Some(p)
    }

    /// Object from the front and its raw payload from the back, or neither
    ///
    /// A failed request records the combined size as overflow.
    pub fn alloc_object_with_bytes(&mut self, size: usize, nbytes: usize) -> Option<(*mut u8, *mut u8)> {
        let size = (size + WORD_SIZE - 1) & !(WORD_SIZE - 1);
        if self.front + size + self.back + nbytes > self.size {
            self.record_overflow(size + nbytes);
            return None;
        }
        let object = (self.base + self.front) as *mut u8;
        self.front += size;
        self.back += nbytes;
        Some((object, (self.base + self.size - self.back) as *mut u8))
    }

    /// Take `size` raw bytes from the back
    pub fn alloc_bytes(&mut self, size: usize) -> Option<*mut u8> {
        if self.front + size + self.back > self.size {
            self.record_overflow(size);
            return None;
        }
        self.back += size;
        Some((self.base + self.size - self.back) as *mut u8)
    }

    /// Look up an already purified constant
    pub fn lookup(&self, key: &PureKey) -> Option<Value> {
        self.hash_cons.as_ref()?.get(key).copied()
    }

    /// Remember a purified constant
    pub fn remember(&mut self, key: PureKey, value: Value) {
        if let Some(table) = &mut self.hash_cons {
            table.insert(key, value);
        }
    }

    /// Whether purecopy is still active
    pub fn loading(&self) -> bool {
        self.hash_cons.is_some()
    }

    /// Drop the hash-cons table; later purecopy calls are identity
    pub fn finish_loadup(&mut self) {
        if let Some(table) = self.hash_cons.take() {
            log::debug!("pure loadup finished: {} constants shared", table.len());
        }
    }

    /// Bytes handed out
    pub fn bytes_used(&self) -> usize {
        self.front + self.back
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Whether any request has overflowed
    pub fn overflowed(&self) -> bool {
        self.overflow_bytes > 0
    }

    /// Extra bytes the region would have needed
    pub fn overflow_bytes(&self) -> usize {
        self.overflow_bytes
    }

    /// Whether the region is mapped at all
    pub fn is_mapped(&self) -> bool {
        self.map.is_some()
    }
}
