//! Heap Registry - Address Range Index
//!
//! Maps every block the allocators obtained from the system to its
//! `[start, end)` range and the kind of object it hosts. Conservative
//! scanning asks the registry whether an arbitrary word could point into the
//! heap before any allocator-specific refinement runs.
//!
//! Backed by a `BTreeMap` keyed on range start, which gives the same
//! O(log n) insert/delete/find bounds as a balanced interval tree. Ranges
//! never overlap, so "the last range starting at or below the address"
//! is the only candidate.

use std::collections::BTreeMap;

/// Kind of memory a registered range holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemKind {
    /// Pair cell block
    Cons,
    /// String header block
    String,
    /// Symbol cell block
    Symbol,
    /// Float cell block
    Float,
    /// Interval block (never a conservative root)
    Interval,
    /// Block of small vector-likes with irregular boundaries
    VectorBlock,
    /// One individually allocated large vector-like
    LargeVector,
}

impl MemKind {
    /// Whether objects in this range can be referenced by a tagged value
    pub fn holds_lisp_objects(self) -> bool {
        !matches!(self, MemKind::Interval)
    }
}

/// One registered range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemNode {
    pub start: usize,
    pub end: usize,
    pub kind: MemKind,
}

impl MemNode {
    /// Whether `addr` falls inside the range
    pub fn contains(&self, addr: usize) -> bool {
        self.start <= addr && addr < self.end
    }

    /// Length in bytes
    pub fn len(&self) -> usize {
        self.end - self.start
    }
}

/// Registry of all heap ranges
#[derive(Debug, Default)]
pub struct HeapRegistry {
    nodes: BTreeMap<usize, MemNode>,
    /// Lowest and highest address ever registered, for a cheap pre-filter
    min_addr: usize,
    max_addr: usize,
}

impl HeapRegistry {
    pub fn new() -> Self {
        Self {
            nodes: BTreeMap::new(),
            min_addr: usize::MAX,
            max_addr: 0,
        }
    }

    /// Register `[start, end)` as holding objects of `kind`
    pub fn insert(&mut self, start: usize, end: usize, kind: MemKind) {
        debug_assert!(start < end);

        if let Some(prev) = self.find(start).or_else(|| self.find(end - 1)) {
            crate::heap_corruption!(
                "range {:#x}..{:#x} overlaps registered {:?} range {:#x}..{:#x}",
                start,
                end,
                prev.kind,
                prev.start,
                prev.end
            );
        }

        self.min_addr = self.min_addr.min(start);
        self.max_addr = self.max_addr.max(end);
        self.nodes.insert(start, MemNode { start, end, kind });
    }

    /// Remove the range starting at `start`
    pub fn delete(&mut self, start: usize) -> MemNode {
        match self.nodes.remove(&start) {
            Some(node) => node,
            None => crate::heap_corruption!("no registered range starts at {:#x}", start),
        }
    }

    /// Find the range containing `addr`
    pub fn find(&self, addr: usize) -> Option<MemNode> {
        if addr < self.min_addr || addr >= self.max_addr {
            return None;
        }
        self.nodes
            .range(..=addr)
            .next_back()
            .map(|(_, node)| *node)
            .filter(|node| node.contains(addr))
    }

    /// Number of registered ranges
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of ranges of one kind
    pub fn count_kind(&self, kind: MemKind) -> usize {
        self.nodes.values().filter(|node| node.kind == kind).count()
    }

    /// Total registered bytes
    pub fn total_bytes(&self) -> usize {
        self.nodes.values().map(MemNode::len).sum()
    }
}
