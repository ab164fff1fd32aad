//! Finalizer - Deferred Callbacks for Unreachable Objects
//!
//! Setiap finalizer object ada di salah satu dari dua ring:
//! - **live**: belum unreachable
//! - **doomed**: tidak ter-mark di cycle ini, function-nya belum dipanggil
//!
//! Staging happens after strong marking. Doomed finalizers are marked
//! again so their functions survive the sweep, then the host's runner is
//! called for each of them once the heap is consistent. Each function
//! runs at most once: it is cleared before the call.

use crate::marker::Marker;
use crate::object::pseudo::FinalizerObj;
use crate::value::{Tag, Value};
use std::ptr;

/// Host callback that executes one finalizer function
pub type FinalizerRunner =
    Box<dyn FnMut(&mut crate::gc::GarbageCollector, Value) -> anyhow::Result<()>>;

/// Remove `f` from whatever ring holds it and self-link it
///
/// # Safety
/// `f` must be a live finalizer object or a ring sentinel.
pub(crate) unsafe fn unchain(f: *mut FinalizerObj) {
    let (prev, next) = ((*f).prev, (*f).next);
    if !prev.is_null() && !next.is_null() {
        (*prev).next = next;
        (*next).prev = prev;
    }
    (*f).prev = f;
    (*f).next = f;
}

/// Insert `f` just before `head`, at the tail of the ring
unsafe fn append(head: *mut FinalizerObj, f: *mut FinalizerObj) {
    let last = (*head).prev;
    (*f).prev = last;
    (*f).next = head;
    (*last).next = f;
    (*head).prev = f;
}

fn as_value(f: *mut FinalizerObj) -> Value {
    Value::from_ptr(f as *const FinalizerObj, Tag::Vectorlike)
}

/// The live and doomed rings
pub struct FinalizerRings {
    live: Box<FinalizerObj>,
    doomed: Box<FinalizerObj>,
}

impl FinalizerRings {
    pub fn new() -> Self {
        Self {
            live: FinalizerObj::sentinel(),
            doomed: FinalizerObj::sentinel(),
        }
    }

    fn live_head(&mut self) -> *mut FinalizerObj {
        &mut *self.live
    }

    fn doomed_head(&mut self) -> *mut FinalizerObj {
        &mut *self.doomed
    }

    /// Link a freshly allocated finalizer into the live ring
    ///
    /// # Safety
    /// `f` must point at an initialized finalizer object.
    pub unsafe fn register(&mut self, f: *mut FinalizerObj) {
        append(self.live_head(), f);
    }

    fn members(head: *const FinalizerObj) -> Vec<*mut FinalizerObj> {
        let mut out = Vec::new();
        unsafe {
            let mut f = (*head).next;
            while f as *const FinalizerObj != head {
                out.push(f);
                f = (*f).next;
            }
        }
        out
    }

    /// Move unreached finalizers with a function to the doomed ring, then
    /// mark everything on the doomed ring
    ///
    /// Returns the number of finalizers moved.
    pub fn queue_doomed(&mut self, marker: &mut Marker<'_>) -> usize {
        let doomed_head = self.doomed_head();
        let mut queued = 0;
        for f in Self::members(self.live_head()) {
            let unreached = !marker.survives(as_value(f));
            if unreached && unsafe { !(*f).function.is_nil() } {
                unsafe {
                    unchain(f);
                    append(doomed_head, f);
                }
                queued += 1;
            }
        }

        for f in Self::members(doomed_head) {
            marker.mark(as_value(f));
        }
        queued
    }

    /// Detach the next doomed finalizer and return its function
    ///
    /// The finalizer is left unlinked with a nil function.
    pub fn pop_doomed(&mut self) -> Option<Value> {
        let head = self.doomed_head();
        unsafe {
            let f = (*head).next;
            if f == head {
                return None;
            }
            unchain(f);
            let function = ptr::replace(&mut (*f).function, Value::NIL);
            Some(function)
        }
    }

    pub fn live_count(&self) -> usize {
        Self::members(&*self.live).len()
    }

    pub fn doomed_count(&self) -> usize {
        Self::members(&*self.doomed).len()
    }
}

impl Default for FinalizerRings {
    fn default() -> Self {
        Self::new()
    }
}
