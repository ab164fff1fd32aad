//! Teardown - Per-Kind Cleanup of Dying Pseudo-vectors
//!
//! Called by the vector sweep exactly once per dead pseudo-vector, before
//! its memory joins a free run or is released.
//!
//! Built-in kinds:
//! - finalizer: unchained from its ring
//! - user pointer: native finalizer called on the handle
//! - bignum: limb storage dropped
//!
//! Every other kind runs the hook the host registered for it, if any.
//! Hook failures are logged; the object is reclaimed regardless.

use super::finalizer::unchain;
use crate::object::pseudo::{Bignum, FinalizerObj, UserPtr};
use crate::object::vector::VectorPtr;
use crate::object::PvecType;
use rustc_hash::FxHashMap;
use std::mem::ManuallyDrop;

/// Host cleanup for one pseudo-vector kind
pub type TeardownHook = Box<dyn FnMut(VectorPtr) -> anyhow::Result<()>>;

/// Registered teardown hooks
#[derive(Default)]
pub struct Teardown {
    hooks: FxHashMap<PvecType, TeardownHook>,
    /// Objects torn down since creation
    count: u64,
}

impl Teardown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the hook for `kind`, replacing any previous one
    ///
    /// Kinds with built-in teardown also run the host hook afterwards.
    pub fn register(&mut self, kind: PvecType, hook: TeardownHook) {
        self.hooks.insert(kind, hook);
    }

    /// Release whatever a dying vector-like owns outside the heap
    pub fn free_by_pvtype(&mut self, v: VectorPtr) {
        let kind = unsafe { v.as_ref() }.pvec_type();
        match kind {
            PvecType::Free => return,
            PvecType::Finalizer => unsafe { unchain(v.as_ptr() as *mut FinalizerObj) },
            PvecType::UserPtr => {
                let uptr = unsafe { &mut *(v.as_ptr() as *mut UserPtr) };
                if let Some(finalizer) = uptr.finalizer.take() {
                    unsafe { finalizer(uptr.p) };
                }
            },
            PvecType::Bignum => {
                let big = unsafe { &mut *(v.as_ptr() as *mut Bignum) };
                unsafe { ManuallyDrop::drop(&mut big.limbs) };
            },
            _ => {},
        }
        self.count += 1;

        if let Some(hook) = self.hooks.get_mut(&kind) {
            if let Err(err) = hook(v) {
                log::warn!("teardown of {} at {:p} failed: {:#}", kind.name(), v.as_ptr(), err);
            }
        }
    }

    pub fn torn_down(&self) -> u64 {
        self.count
    }
}
