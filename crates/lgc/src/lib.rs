//! # LGC - Object Allocator and Mark-Sweep Collector for a Lisp Runtime
//!
//! LGC owns every heap object of a Lisp interpreter: pairs, floats,
//! strings, symbols, vectors, records, hash tables and host pseudo-vectors.
//! Memory is reclaimed by a stop-the-world, non-moving mark-sweep
//! collector; only string payloads are compacted.
//!
//! ## Overview
//!
//! - **Typed arenas**: fixed-size cells in 1 KiB blocks for pairs, floats,
//!   symbols, string headers and intervals
//! - **Vector allocator**: size-class free lists inside shared blocks,
//!   one allocation per large vector
//! - **String payloads**: packed records that are compacted during sweep;
//!   pinned payloads never move
//! - **Pure space**: read-only, hash-consed constants built at start-up
//! - **Conservative stack scan**: any word on the machine stack that points
//!   into a live object keeps it alive
//! - **Weak tables and finalizers**: settled by a fixpoint and run after
//!   the cycle
//!
//! ## Quick Start
//!
//! ```rust
//! use lgc::{GarbageCollector, GcConfig, Value};
//!
//! fn main() -> Result<(), lgc::GcError> {
//!     let mut gc = GarbageCollector::new(GcConfig::default())?;
//!
//!     let list = gc.list(&[Value::fixnum(1), Value::fixnum(2)])?;
//!     let root = gc.root(list);
//!
//!     // Hosts call this at safe points
//!     gc.maybe_gc()?;
//!
//!     gc.garbage_collect()?;
//!     assert_eq!(gc.car(list)?, Value::fixnum(1));
//!
//!     gc.unroot(root);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────┐
//! │                 Host interpreter                      │
//! │   cons / make_string / make_vector / purecopy ...     │
//! └──────────────┬──────────────────────────┬─────────────┘
//!                │ allocate                 │ maybe_gc
//!                ▼                          ▼
//! ┌──────────────────────────┐   ┌────────────────────────┐
//! │        Allocator         │   │   GarbageCollector     │
//! │  cell arenas   strings   │◄──┤  Marking               │
//! │  vectors       pure      │   │  WeakFixpoint          │
//! └──────────┬───────────────┘   │  Sweeping              │
//!            │                   │  finalizers, hooks     │
//!            ▼                   └────────────────────────┘
//! ┌──────────────────────────┐
//! │  SystemAllocator +       │
//! │  HeapRegistry (blocks)   │
//! └──────────────────────────┘
//! ```
//!
//! ## Safety
//!
//! [`Value`] is a tagged word, not a handle. A value is kept alive only by
//! a root ([`GarbageCollector::root`], [`GarbageCollector::register_root`],
//! a [`RootProvider`]), by reachability from another live object, or by
//! the conservative stack scan. Values must not be used after the
//! collection that freed them.
//!
//! ## Modules
//!
//! - [`allocator`]: cell arenas, vectors, string payloads, pure space
//! - [`config`]: tunables and their validation
//! - [`dump`]: contract with a persisted-image loader
//! - [`error`]: error types
//! - [`gc`]: cycle driver, thresholds, inhibition
//! - [`heap`]: OS memory and the block registry
//! - [`marker`]: roots, mark stack, stack scan, weak tables
//! - [`mutator`]: object constructors and accessors
//! - [`object`]: object layouts
//! - [`runtime`]: finalizers and teardown
//! - [`stats`]: counters and histograms
//! - [`sync`]: locking wrapper for multi-threaded hosts

// Core GC modules
pub mod gc;
pub mod config;
pub mod error;
pub mod value;

// Memory management subsystems
pub mod allocator;
pub mod heap;
pub mod object;
pub mod dump;

// GC algorithm components
pub mod marker;
pub mod mutator;

// Runtime and monitoring
pub mod runtime;
pub mod stats;
pub mod logging;
pub mod sync;

// Re-export main types for convenience
pub use config::GcConfig;
pub use dump::{DumpImage, NoDumpImage};
pub use error::{GcError, Result};
pub use gc::{CollectOutcome, GarbageCollector, GcReason, GcState, PostGcHook};
pub use marker::{RootId, RootProvider};
pub use object::{ForwardId, IntervalRef, PvecType, UserPtrFinalizer, Weakness};
pub use runtime::{FinalizerRunner, TeardownHook};
pub use stats::{CollectionStats, ConsingCounters, KindStats};
pub use sync::SharedCollector;
pub use value::Value;

/// LGC version string from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
