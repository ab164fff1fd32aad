//! Root Set - Where Marking Starts
//!
//! Roots are starting points for marking. Everything reachable from them
//! survives the cycle.
//!
//! # Root Types
//!
//! 1. **Static roots** - addresses of host-owned `Value` slots, registered
//!    once and read at every cycle
//! 2. **Owned roots** - values held by the collector on the host's behalf,
//!    addressed by [`RootId`]
//! 3. **Pinned objects** - kept alive for the life of the heap
//! 4. **Root providers** - host containers (buffers, frames, threads) that
//!    report their references through [`RootProvider`]
//!
//! The call stack and registers are the fifth source, handled by
//! [`stack_scan`](super::stack_scan).

use crate::value::Value;
use anyhow::Context;
use rustc_hash::{FxHashMap, FxHashSet};

/// Handle to an owned root
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RootId(u64);

/// Host container that holds references the collector cannot see
///
/// Called once per cycle, before any object is marked. The provider must
/// report every value it holds; unreported objects may be reclaimed.
pub trait RootProvider {
    /// Name used in diagnostics
    fn name(&self) -> &str {
        "root provider"
    }

    /// Report every held value through `visit`
    fn visit_roots(&self, visit: &mut dyn FnMut(Value)) -> anyhow::Result<()>;
}

/// Root counts, per type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RootStats {
    pub statics: usize,
    pub owned: usize,
    pub pinned: usize,
    pub providers: usize,
}

/// All explicit roots of one collector
#[derive(Default)]
pub struct RootSet {
    statics: Vec<*const Value>,
    static_index: FxHashSet<usize>,
    owned: FxHashMap<RootId, Value>,
    next_id: u64,
    pinned: Vec<Value>,
    providers: Vec<Box<dyn RootProvider>>,
}

impl RootSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a host slot as a root
    ///
    /// Registering the same slot twice is a host bug and aborts.
    ///
    /// # Safety
    /// `slot` must stay valid and readable until it is unregistered or the
    /// collector is dropped.
    pub unsafe fn register_static(&mut self, slot: *const Value) {
        if !self.static_index.insert(slot as usize) {
            crate::heap_corruption!("root slot {:p} registered twice", slot);
        }
        self.statics.push(slot);
    }

    /// Forget a slot registered with [`register_static`](Self::register_static)
    pub fn unregister_static(&mut self, slot: *const Value) -> bool {
        if !self.static_index.remove(&(slot as usize)) {
            return false;
        }
        self.statics.retain(|s| *s != slot);
        true
    }

    /// Hold `value` until [`unroot`](Self::unroot)
    pub fn root(&mut self, value: Value) -> RootId {
        let id = RootId(self.next_id);
        self.next_id += 1;
        self.owned.insert(id, value);
        id
    }

    /// Replace the value of an owned root; false if `id` is gone
    pub fn set_root(&mut self, id: RootId, value: Value) -> bool {
        match self.owned.get_mut(&id) {
            Some(slot) => {
                *slot = value;
                true
            },
            None => false,
        }
    }

    pub fn get_root(&self, id: RootId) -> Option<Value> {
        self.owned.get(&id).copied()
    }

    /// Drop an owned root and return its last value
    pub fn unroot(&mut self, id: RootId) -> Option<Value> {
        self.owned.remove(&id)
    }

    /// Keep `value` alive for the life of the heap
    pub fn pin(&mut self, value: Value) {
        if value.is_heap_object() {
            self.pinned.push(value);
        }
    }

    pub fn add_provider(&mut self, provider: Box<dyn RootProvider>) {
        self.providers.push(provider);
    }

    /// Gather every root value into `out`
    ///
    /// Provider failures are returned before anything is marked.
    pub fn collect(&self, out: &mut Vec<Value>) -> anyhow::Result<()> {
        for slot in &self.statics {
            out.push(unsafe { slot.read_volatile() });
        }
        out.extend(self.owned.values().copied());
        out.extend(self.pinned.iter().copied());
        for provider in &self.providers {
            provider
                .visit_roots(&mut |v| out.push(v))
                .with_context(|| format!("root provider '{}' failed", provider.name()))?;
        }
        Ok(())
    }

    pub fn stats(&self) -> RootStats {
        RootStats {
            statics: self.statics.len(),
            owned: self.owned.len(),
            pinned: self.pinned.len(),
            providers: self.providers.len(),
        }
    }
}
