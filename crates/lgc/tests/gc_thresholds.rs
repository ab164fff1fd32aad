//! GC Threshold Tests - When Collection Happens, and Running Out of Memory
//!
//! Allocation never collects on its own. The host polls
//! `maybe_gc`/`maybe_collect` at safe points; these tests verify the
//! threshold arithmetic, the consing counters, and the emergency reserve
//! that keeps the out-of-memory path usable.
//!
//! ============================================================================
//! EACH TEST FINDS SPECIFIC TRIGGER AND OOM BUGS - DO NOT WEAKEN ASSERTIONS
//! ============================================================================

mod common;

use common::{assert_used, GcFixture};
use lgc::config::MIN_GC_CONS_THRESHOLD;
use lgc::{GcConfig, GcError, Value};

/// ============================================================================
/// THRESHOLDS
/// ============================================================================

/// `maybe_gc` collects only once the threshold is passed
///
/// **Bug this finds:** Off-by-one trigger, counter not reset after a cycle
#[test]
fn test_maybe_gc_fires_after_threshold() {
    // Arrange
    let mut fixture = GcFixture::with_config(
        GcConfig::default()
            .with_conservative_scan(false)
            .with_cons_threshold(MIN_GC_CONS_THRESHOLD),
    );
    let threshold = fixture.gc.bytes_between_gc();
    assert_eq!(threshold, MIN_GC_CONS_THRESHOLD);

    // Act - allocate until just past the threshold, polling as a host would
    let mut collected_at = None;
    for i in 0..1_000_000 {
        fixture.gc.cons(Value::NIL, Value::NIL).unwrap();
        if fixture.gc.maybe_gc().unwrap().is_some() {
            collected_at = Some(i);
            break;
        }
        assert!(fixture.gc.bytes_since_gc() <= threshold);
    }

    // Assert
    assert!(collected_at.is_some(), "threshold never fired");
    assert_eq!(fixture.gc.cycle_count(), 1);
    assert_eq!(fixture.gc.bytes_since_gc(), 0);
}

/// Larger factors collect sooner; factors below one never do
#[test]
fn test_maybe_collect_factor() {
    let mut fixture = GcFixture::with_config(
        GcConfig::default()
            .with_conservative_scan(false)
            .with_cons_threshold(MIN_GC_CONS_THRESHOLD),
    );
    let half = fixture.gc.bytes_between_gc() / 2;
    while fixture.gc.bytes_since_gc() <= half {
        fixture.gc.cons(Value::NIL, Value::NIL).unwrap();
    }

    assert!(fixture.gc.maybe_gc().unwrap().is_none());
    assert!(fixture.gc.maybe_collect(0.9).unwrap().is_none());
    let outcome = fixture.gc.maybe_collect(2.0).unwrap();
    assert!(matches!(outcome, Some(ref o) if !o.is_deferred()));
}

/// The next threshold follows the live heap when the percentage dominates
#[test]
fn test_threshold_scales_with_live_heap() {
    let mut fixture = GcFixture::with_config(
        GcConfig::default()
            .with_conservative_scan(false)
            .with_cons_threshold(MIN_GC_CONS_THRESHOLD)
            .with_cons_percentage(4.0),
    );
    fixture.rooted_list(20_000);
    let stats = fixture.collect();

    let expected = ((4.0 * stats.live_bytes() as f64) as usize).max(MIN_GC_CONS_THRESHOLD);
    assert_eq!(fixture.gc.bytes_between_gc(), expected);
    assert!(expected > MIN_GC_CONS_THRESHOLD);
}

/// Consing counters only ever grow; collection stats follow liveness
#[test]
fn test_memory_use_counts_are_cumulative() {
    let mut fixture = GcFixture::precise();
    fixture.make_garbage_pairs(100);
    fixture.gc.make_float(1.0).unwrap();
    fixture.gc.make_string(b"abc", false).unwrap();
    fixture.collect();
    fixture.make_garbage_pairs(10);

    let counts = fixture.gc.memory_use_counts();
    assert_eq!(counts.conses, 110);
    assert_eq!(counts.floats, 1);
    assert_eq!(counts.strings, 1);
    assert_eq!(counts.string_chars, 3);
    assert_used(&fixture.gc.collection_stats(), "conses", 10, "post-cycle pairs");
}

/// Kinds are reported in the fixed order
#[test]
fn test_collection_stats_order() {
    let fixture = GcFixture::precise();
    let names: Vec<_> = fixture
        .gc
        .collection_stats()
        .kinds
        .iter()
        .map(|k| k.name)
        .collect();
    assert_eq!(
        names,
        [
            "conses",
            "symbols",
            "strings",
            "string-bytes",
            "vectors",
            "vector-slots",
            "floats",
            "intervals",
            "buffers"
        ]
    );
}

/// ============================================================================
/// OUT OF MEMORY
/// ============================================================================

/// Hitting the heap limit spends the reserve, then recovers after a cycle
///
/// **Bug this finds:** OOM that aborts, reserve never refilled, allocator
/// state corrupted by a failed allocation
/// **Invariant verified:** `OutOfMemory` is returned, `memory_full` is set,
/// and collecting the garbage makes allocation possible again
#[test]
fn test_heap_limit_reports_oom_and_recovers() {
    // ========================================================================
    // Arrange
    // ========================================================================
    let mut fixture = GcFixture::with_config(
        GcConfig::default()
            .with_conservative_scan(false)
            .with_heap_limit(128 * 1024),
    );

    // ========================================================================
    // Act
    // ========================================================================
    let mut failure = None;
    for _ in 0..1_000_000 {
        if let Err(err) = fixture.gc.cons(Value::NIL, Value::NIL) {
            failure = Some(err);
            break;
        }
    }

    // ========================================================================
    // Assert
    // ========================================================================
    match failure {
        Some(GcError::OutOfMemory {
            reserve_released, ..
        }) => assert!(reserve_released, "first failure should spend the reserve"),
        other => panic!("expected OutOfMemory, got {:?}", other),
    }
    assert!(fixture.gc.memory_full());

    let stats = fixture.collect();
    assert_used(&stats, "conses", 0, "garbage reclaimed");
    assert!(!fixture.gc.memory_full(), "reserve should be refilled");
    assert!(fixture.gc.cons(Value::NIL, Value::NIL).is_ok());
}

/// Oversized requests fail without touching the heap
#[test]
fn test_oversized_requests_rejected() {
    let mut fixture = GcFixture::precise();
    let ty = fixture.gc.make_symbol("big").unwrap();
    assert!(matches!(
        fixture.gc.make_record(ty, 5_000, Value::NIL),
        Err(GcError::VectorTooLarge { .. })
    ));
    assert!(matches!(
        fixture.gc.allocate_pseudovector(4, 5, lgc::PvecType::Buffer),
        Err(GcError::InvalidArgument { .. })
    ));
    assert!(!fixture.gc.memory_full());
}

/// Kinds with a collector-owned layout cannot be built undersized
///
/// **Bug this finds:** Finalizer ring links or hash table fields read past
/// the end of a too-small pseudo-vector during sweep
/// **Invariant verified:** The request fails and a following cycle leaves
/// neighbouring objects intact
#[test]
fn test_fixed_layout_pseudovector_rejected() {
    // Arrange
    let mut fixture = GcFixture::precise();

    // Act
    let result = fixture.gc.allocate_pseudovector(1, 0, lgc::PvecType::Finalizer);
    let neighbour = fixture.gc.make_vector(3, Value::T).unwrap();
    fixture.gc.root(neighbour);
    let stats = fixture.collect();

    // Assert
    match result {
        Err(GcError::InvalidArgument { reason, .. }) => {
            assert!(reason.contains("make_finalizer"), "reason: {}", reason)
        },
        other => panic!("expected InvalidArgument, got {:?}", other),
    }
    assert_used(&stats, "vectors", 1, "only the rooted vector");
    for i in 0..3 {
        assert_eq!(fixture.gc.aref(neighbour, i).unwrap(), Value::T);
    }
}
