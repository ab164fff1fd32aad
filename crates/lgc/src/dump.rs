//! Dump Image - Loader Collaborator Contract
//!
//! Objects mapped from a persisted image live outside every allocator.
//! The collector treats them as permanently allocated: they are never
//! swept, and the loader keeps their mark state in its own side table. The
//! collector only calls the predicates below.

use crate::value::Value;

/// Interface the collector calls into the image loader
pub trait DumpImage {
    /// Whether `addr` lies inside the mapped image
    fn is_dump_image_address(&self, addr: usize) -> bool;

    /// Whether the image object at `addr` has been marked this cycle
    fn is_dump_image_address_marked(&self, addr: usize) -> bool;

    /// Mark the image object at `addr`
    fn mark_dump_image_address(&mut self, addr: usize);

    /// Resolve a candidate word from the stack to an image object
    ///
    /// Loaders that cannot answer leave the default; image objects only
    /// reachable from the stack are then not traced, but never freed.
    fn object_at(&self, _addr: usize) -> Option<Value> {
        None
    }

    /// Forget all marks; called at the end of every sweep
    fn clear_marks(&mut self) {}
}

/// Collector without a dump image
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDumpImage;

impl DumpImage for NoDumpImage {
    fn is_dump_image_address(&self, _addr: usize) -> bool {
        false
    }

    fn is_dump_image_address_marked(&self, _addr: usize) -> bool {
        false
    }

    fn mark_dump_image_address(&mut self, _addr: usize) {}
}
