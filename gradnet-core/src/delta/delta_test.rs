// src/delta/delta_test.rs

use super::*;
use approx::assert_relative_eq;
use crate::tensor::Tensor;

fn parameter(values: Vec<f64>) -> Tensor {
    let len = values.len();
    Tensor::new(values, vec![len]).unwrap()
}

fn set_with(entries: &[(&Tensor, &[f64])]) -> DeltaSet<u32> {
    let mut set = DeltaSet::new();
    for (i, (target, values)) in entries.iter().enumerate() {
        set.get_or_insert(i as u32, target)
            .unwrap()
            .accumulate(values)
            .unwrap();
    }
    set
}

#[test]
fn lazy_entries_bind_to_their_target() {
    let p = parameter(vec![0.0, 0.0]);
    let mut set: DeltaSet<u32> = DeltaSet::new();
    assert!(set.is_empty());

    set.get_or_insert(7, &p).unwrap().accumulate(&[1.0, 2.0]).unwrap();
    assert_eq!(set.len(), 1);
    assert_eq!(set.get(&7).unwrap().values(), &[1.0, 2.0]);
    assert!(set.get(&7).unwrap().target().shares_storage(&p));
}

#[test]
fn rebinding_a_key_to_other_storage_is_fatal() {
    let p = parameter(vec![0.0]);
    let q = parameter(vec![0.0]);
    let mut set: DeltaSet<u32> = DeltaSet::new();
    set.get_or_insert(1, &p).unwrap();
    let err = set.get_or_insert(1, &q).unwrap_err();
    assert!(matches!(err, GradNetError::TargetMismatch { .. }));
    // The same storage through a cloned handle stays fine.
    assert!(set.get_or_insert(1, &p.clone()).is_ok());
}

#[test]
fn accumulate_checks_length_and_sanitizes() {
    let p = parameter(vec![0.0, 0.0]);
    let mut set: DeltaSet<u32> = DeltaSet::new();
    let delta = set.get_or_insert(0, &p).unwrap();
    assert!(matches!(
        delta.accumulate(&[1.0]),
        Err(GradNetError::DimensionMismatch { .. })
    ));

    delta.accumulate(&[f64::NAN, f64::INFINITY]).unwrap();
    assert_eq!(delta.values(), &[0.0, 0.0]);
    delta.accumulate(&[1.0, f64::NEG_INFINITY]).unwrap();
    assert_eq!(delta.values(), &[1.0, 0.0]);
}

#[test]
fn compensated_summation_beats_naive_accumulation() {
    let p = parameter(vec![0.0]);
    let mut set: DeltaSet<u32> = DeltaSet::new();
    let delta = set.get_or_insert(0, &p).unwrap();

    // 1.0 followed by many tiny contributions: naive f64 summation loses
    // most of the tail, the compensated sum keeps it.
    let tiny = 1e-16;
    let rounds = 100_000;
    delta.accumulate(&[1.0]).unwrap();
    let mut naive = 1.0f64;
    for _ in 0..rounds {
        delta.accumulate(&[tiny]).unwrap();
        naive += tiny;
    }
    let exact = 1.0 + rounds as f64 * tiny;
    let compensated = delta.values()[0];
    assert_relative_eq!(compensated, exact, max_relative = 1e-12);
    assert!((compensated - exact).abs() < (naive - exact).abs());
}

#[test]
fn add_commutes_within_tolerance() {
    let p = parameter(vec![0.0, 0.0]);
    let q = parameter(vec![0.0]);
    let a = set_with(&[(&p, &[1.0, 2.0]), (&q, &[3.0])]);
    let b = set_with(&[(&p, &[0.5, -1.0]), (&q, &[2.0])]);

    let ab = a.add(&b).unwrap();
    let ba = b.add(&a).unwrap();
    for key in ab.keys() {
        let left = ab.get(key).unwrap().values();
        let right = ba.get(key).unwrap().values();
        for (l, r) in left.iter().zip(right.iter()) {
            assert_relative_eq!(l, r, max_relative = 1e-12);
        }
    }
}

#[test]
fn add_treats_missing_keys_as_zero() {
    let p = parameter(vec![0.0]);
    let q = parameter(vec![0.0]);
    let mut a: DeltaSet<u32> = DeltaSet::new();
    a.get_or_insert(0, &p).unwrap().accumulate(&[1.0]).unwrap();
    let mut b: DeltaSet<u32> = DeltaSet::new();
    b.get_or_insert(1, &q).unwrap().accumulate(&[5.0]).unwrap();

    let sum = a.add(&b).unwrap();
    assert_eq!(sum.len(), 2);
    assert_eq!(sum.get(&0).unwrap().values(), &[1.0]);
    assert_eq!(sum.get(&1).unwrap().values(), &[5.0]);
}

#[test]
fn adding_the_negation_yields_the_zero_set() {
    let p = parameter(vec![0.0, 0.0, 0.0]);
    let a = set_with(&[(&p, &[1.0, -2.0, 3.5])]);
    let zero = a.add(&a.scale(-1.0)).unwrap();
    for (_, delta) in zero.iter() {
        for v in delta.values() {
            assert_relative_eq!(*v, 0.0, epsilon = 1e-12);
        }
    }
}

#[test]
fn copy_then_add_in_place_mutates_only_the_copy() {
    let p = parameter(vec![0.0]);
    let a = set_with(&[(&p, &[1.0])]);
    let b = set_with(&[(&p, &[10.0])]);

    let mut copied = a.copy();
    copied.add_in_place(&b).unwrap();
    assert_eq!(copied.get(&0).unwrap().values(), &[11.0]);
    assert_eq!(a.get(&0).unwrap().values(), &[1.0]);
}

#[test]
fn subtract_scale_magnitude_unit() {
    let p = parameter(vec![0.0, 0.0]);
    let a = set_with(&[(&p, &[3.0, 4.0])]);
    let b = set_with(&[(&p, &[1.0, 1.0])]);

    let diff = a.subtract(&b).unwrap();
    assert_eq!(diff.get(&0).unwrap().values(), &[2.0, 3.0]);

    assert_relative_eq!(a.magnitude(), 5.0);
    let unit = a.unit();
    assert_relative_eq!(unit.magnitude(), 1.0, max_relative = 1e-12);
    assert_relative_eq!(unit.get(&0).unwrap().values()[0], 0.6, max_relative = 1e-12);

    // Zero set stays zero instead of going non-finite.
    let zero: DeltaSet<u32> = DeltaSet::new();
    assert_eq!(zero.unit().magnitude(), 0.0);
}

#[test]
fn dot_covers_common_keys_only() {
    let p = parameter(vec![0.0, 0.0]);
    let q = parameter(vec![0.0]);
    let a = set_with(&[(&p, &[1.0, 2.0]), (&q, &[7.0])]);
    let mut b: DeltaSet<u32> = DeltaSet::new();
    b.get_or_insert(0, &p).unwrap().accumulate(&[3.0, 4.0]).unwrap();

    // Key 1 only exists on one side and contributes nothing.
    assert_relative_eq!(a.dot(&b).unwrap(), 11.0);
}

#[test]
fn dropped_sets_return_buffers_to_their_pool() {
    let pool = Arc::new(BufferPool::new());
    let p = parameter(vec![0.0, 0.0]);
    {
        let mut set: DeltaSet<u32> = DeltaSet::with_pool(Arc::clone(&pool));
        set.get_or_insert(0, &p).unwrap();
        assert_eq!(pool.idle(2), 0);
    }
    // delta + compensation both come back.
    assert_eq!(pool.idle(2), 2);
}
