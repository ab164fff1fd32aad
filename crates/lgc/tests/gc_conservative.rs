//! GC Conservative Scan Tests - Native Stack as a Root
//!
//! Any aligned word on the machine stack that points into a live object
//! (its start or its interior) keeps that object alive. Words that point
//! nowhere, into free space or into the middle of nothing must be ignored.
//!
//! ============================================================================
//! EACH TEST FINDS SPECIFIC STACK SCANNING BUGS - DO NOT WEAKEN ASSERTIONS
//! ============================================================================

#![cfg(any(target_os = "linux", target_os = "macos"))]

mod common;

use common::{assert_used, GcFixture};
use lgc::Value;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::hint::black_box;

/// A pair known only to a stack word survives
///
/// **Bug this finds:** Stack range computed wrongly, tag bits not stripped
/// **Invariant verified:** The planted object is live and intact
#[test]
fn test_planted_stack_word_keeps_pair_alive() {
    // Arrange
    let mut fixture = GcFixture::with_defaults();
    let pair = fixture
        .gc
        .cons(Value::fixnum(11), Value::fixnum(22))
        .unwrap();
    let planted = [pair.bits()];
    black_box(&planted);

    // Act
    fixture.collect();
    fixture.collect();

    // Assert
    black_box(&planted);
    assert_eq!(fixture.gc.car(pair).unwrap(), Value::fixnum(11));
    assert_eq!(fixture.gc.cdr(pair).unwrap(), Value::fixnum(22));
}

/// Interior pointers into a vector and a string header count
#[test]
fn test_interior_pointers_keep_objects_alive() {
    // Arrange
    let mut fixture = GcFixture::with_defaults();
    let vector = fixture.gc.make_vector(16, Value::fixnum(5)).unwrap();
    let string = fixture.gc.make_string(b"interior", false).unwrap();
    let tag_mask = 7usize;
    let planted = [
        (vector.bits() & !tag_mask) + 10 * std::mem::size_of::<usize>(),
        (string.bits() & !tag_mask) + std::mem::size_of::<usize>(),
    ];
    black_box(&planted);

    // Act
    fixture.collect();

    // Assert
    black_box(&planted);
    assert_eq!(fixture.gc.aref(vector, 15).unwrap(), Value::fixnum(5));
    assert_eq!(fixture.gc.string_bytes(string).unwrap(), b"interior");
}

/// Random words and pointers just outside objects are harmless
///
/// **Bug this finds:** Dereferencing words that fall into block headers,
/// free cells or unmapped memory
#[test]
fn test_random_stack_words_are_ignored_safely() {
    // Arrange
    let mut fixture = GcFixture::with_defaults();
    let mut rng = StdRng::seed_from_u64(0xdead_beef);
    let anchor = fixture.gc.cons(Value::NIL, Value::NIL).unwrap();
    let base = anchor.bits() & !0xfff;

    let mut noise = [0usize; 64];
    for (i, word) in noise.iter_mut().enumerate() {
        *word = if i % 2 == 0 {
            rng.gen()
        } else {
            base + rng.gen_range(0..4096)
        };
    }
    black_box(&noise);
    fixture.make_garbage_pairs(200);

    // Act
    let outcome = fixture.gc.garbage_collect();

    // Assert
    black_box(&noise);
    assert!(outcome.is_ok());
}

/// With scanning off, a stack word protects nothing
#[test]
fn test_precise_mode_ignores_stack() {
    let mut fixture = GcFixture::precise();
    let pair = fixture.gc.cons(Value::fixnum(1), Value::NIL).unwrap();
    let planted = [pair.bits()];
    black_box(&planted);

    let stats = fixture.collect();
    black_box(&planted);
    assert_used(&stats, "conses", 0, "stack word ignored");
}
