//! GC Weak Table Tests - Fixpoint and Entry Removal
//!
//! Weak hash tables hold some entries only as long as one or both sides
//! are reachable from elsewhere. These tests verify each weakness mode and
//! chains of tables that keep each other's entries alive.
//!
//! ============================================================================
//! EACH TEST FINDS SPECIFIC WEAK REFERENCE BUGS - DO NOT WEAKEN ASSERTIONS
//! ============================================================================

mod common;

use common::{assert_used, GcFixture};
use lgc::{Value, Weakness};

/// ============================================================================
/// WEAKNESS MODES
/// ============================================================================

fn table_with_entry(fixture: &mut GcFixture, weakness: Weakness) -> (Value, Value, Value) {
    let table = fixture.gc.make_hash_table(weakness, 4).unwrap();
    fixture.gc.root(table);
    let key = fixture.gc.make_float(1.0).unwrap();
    let value = fixture.gc.make_float(2.0).unwrap();
    fixture.gc.hash_put(table, key, value).unwrap();
    (table, key, value)
}

/// Key-weak entry dies with its key; a rooted key keeps the value alive
///
/// **Bug this finds:** Weak entries traced strongly, or values lost while
/// their key lives
#[test]
fn test_key_weak_entry() {
    // Arrange
    let mut fixture = GcFixture::precise();
    let (table, key, value) = table_with_entry(&mut fixture, Weakness::Key);
    let id = fixture.gc.root(key);

    // Act + Assert - key rooted
    let stats = fixture.collect();
    assert_eq!(fixture.gc.hash_count(table).unwrap(), 1);
    assert_used(&stats, "floats", 2, "key and its value");
    assert_eq!(fixture.gc.hash_get(table, key).unwrap(), Some(value));

    // Act + Assert - key released
    fixture.gc.unroot(id);
    let stats = fixture.collect();
    assert_eq!(fixture.gc.hash_count(table).unwrap(), 0);
    assert_used(&stats, "floats", 0, "entry removed");
}

/// Value-weak entry dies with its value even when the key is rooted
#[test]
fn test_value_weak_entry() {
    let mut fixture = GcFixture::precise();
    let (table, key, _value) = table_with_entry(&mut fixture, Weakness::Value);
    fixture.gc.root(key);

    let stats = fixture.collect();
    assert_eq!(fixture.gc.hash_count(table).unwrap(), 0);
    assert_used(&stats, "floats", 1, "only the rooted key");
    assert_eq!(fixture.gc.hash_get(table, key).unwrap(), None);
}

/// Key-or-value entries live while either side is reachable
#[test]
fn test_key_or_value_entry() {
    let mut fixture = GcFixture::precise();
    let (table, _key, value) = table_with_entry(&mut fixture, Weakness::KeyOrValue);
    let id = fixture.gc.root(value);

    let stats = fixture.collect();
    assert_eq!(fixture.gc.hash_count(table).unwrap(), 1);
    assert_used(&stats, "floats", 2, "value keeps the key");

    fixture.gc.unroot(id);
    fixture.collect();
    assert_eq!(fixture.gc.hash_count(table).unwrap(), 0);
}

/// Key-and-value entries need both sides reachable
#[test]
fn test_key_and_value_entry() {
    let mut fixture = GcFixture::precise();
    let (table, key, value) = table_with_entry(&mut fixture, Weakness::KeyAndValue);
    fixture.gc.root(key);
    let value_id = fixture.gc.root(value);

    fixture.collect();
    assert_eq!(fixture.gc.hash_count(table).unwrap(), 1);

    fixture.gc.unroot(value_id);
    let stats = fixture.collect();
    assert_eq!(fixture.gc.hash_count(table).unwrap(), 0);
    assert_used(&stats, "floats", 1, "rooted key only");
}

/// A strong table keeps everything
#[test]
fn test_strong_table_keeps_entries() {
    let mut fixture = GcFixture::precise();
    let (table, _key, _value) = table_with_entry(&mut fixture, Weakness::None);

    let stats = fixture.collect();
    assert_eq!(fixture.gc.hash_count(table).unwrap(), 1);
    assert_used(&stats, "floats", 2, "strong entry");
}

/// ============================================================================
/// FIXPOINT
/// ============================================================================

/// A → B in one key-weak table, B → C in another
///
/// **Bug this finds:** A single pass over weak tables; entries whose key is
/// only reachable through another weak table's value
/// **Invariant verified:** Rooting A keeps B and C; unrooting A removes both
/// entries
#[test]
fn test_weak_chain_settles_across_tables() {
    // ========================================================================
    // Arrange
    // ========================================================================
    let mut fixture = GcFixture::precise();
    let gc = &mut fixture.gc;
    // The second table is made first so a single ordered pass would miss C
    let t2 = gc.make_hash_table(Weakness::Key, 4).unwrap();
    let t1 = gc.make_hash_table(Weakness::Key, 4).unwrap();
    gc.root(t1);
    gc.root(t2);

    let a = gc.make_float(1.0).unwrap();
    let b = gc.make_float(2.0).unwrap();
    let c = gc.make_float(3.0).unwrap();
    gc.hash_put(t1, a, b).unwrap();
    gc.hash_put(t2, b, c).unwrap();
    let a_root = gc.root(a);

    // ========================================================================
    // Act
    // ========================================================================
    let stats = fixture.collect();

    // ========================================================================
    // Assert
    // ========================================================================
    assert_used(&stats, "floats", 3, "A rooted keeps B and C");
    assert_eq!(fixture.gc.hash_get(t1, a).unwrap(), Some(b));
    assert_eq!(fixture.gc.hash_get(t2, b).unwrap(), Some(c));
    assert_eq!(fixture.gc.float_value(c).unwrap(), 3.0);

    fixture.gc.unroot(a_root);
    let stats = fixture.collect();
    assert_used(&stats, "floats", 0, "whole chain released");
    assert_eq!(fixture.gc.hash_count(t1).unwrap(), 0);
    assert_eq!(fixture.gc.hash_count(t2).unwrap(), 0);
}

/// A weak table reachable only through another weak table's value
#[test]
fn test_weak_table_found_during_fixpoint() {
    let mut fixture = GcFixture::precise();
    let outer = fixture.gc.make_hash_table(Weakness::Key, 4).unwrap();
    fixture.gc.root(outer);
    let key = fixture.gc.make_float(1.0).unwrap();
    fixture.gc.root(key);

    let inner = fixture.gc.make_hash_table(Weakness::Value, 4).unwrap();
    let kept = fixture.gc.make_float(2.0).unwrap();
    let dropped = fixture.gc.make_float(3.0).unwrap();
    fixture.gc.hash_put(inner, Value::fixnum(1), dropped).unwrap();
    fixture.gc.hash_put(inner, Value::fixnum(2), kept).unwrap();
    fixture.gc.hash_put(outer, key, inner).unwrap();
    fixture.gc.root(kept);

    let stats = fixture.collect();
    assert_eq!(fixture.gc.hash_count(inner).unwrap(), 1);
    assert_eq!(fixture.gc.hash_get(inner, Value::fixnum(2)).unwrap(), Some(kept));
    assert_used(&stats, "floats", 2, "key and kept value");
}

/// Removed entries leave tombstones that later inserts reuse
#[test]
fn test_table_usable_after_weak_removal() {
    let mut fixture = GcFixture::precise();
    let table = fixture.gc.make_hash_table(Weakness::Key, 8).unwrap();
    fixture.gc.root(table);
    for i in 0..6 {
        let key = fixture.gc.make_float(i as f64).unwrap();
        fixture.gc.hash_put(table, key, Value::fixnum(i)).unwrap();
    }
    fixture.collect();
    assert_eq!(fixture.gc.hash_count(table).unwrap(), 0);

    for i in 0..20 {
        fixture.gc.hash_put(table, Value::fixnum(i), Value::T).unwrap();
    }
    assert_eq!(fixture.gc.hash_count(table).unwrap(), 20);
    for i in 0..20 {
        assert_eq!(fixture.gc.hash_get(table, Value::fixnum(i)).unwrap(), Some(Value::T));
    }
}
