//! Heap Module - System Memory and Address Registry
//!
//! Two pieces sit under every allocator:
//!
//! - [`SystemAllocator`]: the only path to `std::alloc`. Tracks bytes in
//!   use, enforces an optional heap limit and holds the emergency reserve
//!   that is spent just before out-of-memory is reported.
//! - [`HeapRegistry`]: interval map from address ranges to block kinds,
//!   one node per cell block, vector block or large vector. Conservative
//!   scanning asks it whether a word could point into the heap at all.
//!
//! ```text
//!  arena / vector / sblock ──allocate──► SystemAllocator ──► std::alloc
//!         │
//!         └─insert/delete─► HeapRegistry ◄──find── conservative scan
//! ```

pub mod registry;
pub mod system;

pub use registry::{HeapRegistry, MemKind, MemNode};
pub use system::SystemAllocator;
