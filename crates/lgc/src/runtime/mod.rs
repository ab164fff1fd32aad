//! Runtime Module - Host-Facing Lifecycle Hooks
//!
//! Manages:
//! - Finalizer rings and the host's finalizer runner
//! - Teardown of dying pseudo-vectors (native handles, bignum limbs,
//!   host-registered kinds)

pub mod finalizer;
pub mod teardown;

pub use finalizer::{FinalizerRings, FinalizerRunner};
pub use teardown::{Teardown, TeardownHook};
