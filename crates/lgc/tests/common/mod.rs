//! Test Utilities for the LGC Bug-Finding Test Suite
//!
//! Fixtures hand out a fresh collector per test. Tests that count exact
//! frees use [`GcFixture::precise`], which turns the conservative stack scan
//! off so that stale words on the test thread's stack cannot keep garbage
//! alive.
//!
//! ============================================================================
//! CRITICAL: assertions here are exact. A test that only passes with a
//! tolerance is hiding a bug.
//! ============================================================================

#![allow(dead_code)]

use lgc::{CollectionStats, GarbageCollector, GcConfig, Value};

/// ============================================================================
/// GC FIXTURE
/// ============================================================================

/// Test fixture owning one collector
pub struct GcFixture {
    pub gc: GarbageCollector,
}

impl GcFixture {
    /// Collector with every default, conservative scan included
    ///
    /// **Bug this finds:** Initialization failures with the stock config
    pub fn with_defaults() -> Self {
        Self::with_config(GcConfig::default())
    }

    /// Collector that only trusts explicit roots
    pub fn precise() -> Self {
        Self::with_config(GcConfig::default().with_conservative_scan(false))
    }

    pub fn with_config(config: GcConfig) -> Self {
        let gc = GarbageCollector::new(config)
            .expect("GC initialization should succeed with valid config");
        Self { gc }
    }

    /// Run a full cycle and return its statistics
    pub fn collect(&mut self) -> CollectionStats {
        let outcome = self.gc.garbage_collect().expect("collection should succeed");
        outcome
            .stats()
            .cloned()
            .expect("collection should not be deferred here")
    }

    /// Allocate `n` unreachable pairs
    pub fn make_garbage_pairs(&mut self, n: usize) {
        for i in 0..n {
            self.gc
                .cons(Value::fixnum(i as isize), Value::NIL)
                .expect("cons should succeed");
        }
    }

    /// Rooted list `(0 1 ... n-1)`
    pub fn rooted_list(&mut self, n: usize) -> Value {
        let mut list = Value::NIL;
        for i in (0..n).rev() {
            list = self
                .gc
                .cons(Value::fixnum(i as isize), list)
                .expect("cons should succeed");
        }
        self.gc.root(list);
        list
    }

    /// Length of a proper list
    pub fn list_len(&self, mut list: Value) -> usize {
        let mut n = 0;
        while !list.is_nil() {
            n += 1;
            list = self.gc.cdr(list).expect("list should be proper");
        }
        n
    }
}

/// ============================================================================
/// ASSERTION HELPERS
/// ============================================================================

/// Assert the used count of one kind
///
/// **Bug this finds:** Leaks (too many) or premature frees (too few)
pub fn assert_used(stats: &CollectionStats, kind: &str, expected: usize, context: &str) {
    assert_eq!(
        stats.used(kind),
        expected,
        "{}: expected {} live {}, stats: {:?}",
        context,
        expected,
        kind,
        stats
    );
}

/// Assert that a list holds `0..n` in order
pub fn assert_counting_list(fixture: &GcFixture, list: Value, n: usize) {
    let mut l = list;
    for i in 0..n {
        let car = fixture.gc.car(l).expect("list cell should be live");
        assert_eq!(car, Value::fixnum(i as isize), "element {} corrupted", i);
        l = fixture.gc.cdr(l).expect("list cell should be live");
    }
    assert!(l.is_nil(), "list longer than {}", n);
}
