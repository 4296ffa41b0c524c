use std::sync::Arc;
use std::thread;

use accumulators::{DoubleAccumulator, DoubleAdder, LongAccumulator, LongAdder};

#[test]
fn long_adder_single_threaded_sum() {
    let adder = LongAdder::new();
    for i in 1..=100 {
        adder.add(i);
    }
    assert_eq!(adder.sum(), 5050);
}

#[test]
fn long_adder_increment_decrement() {
    let adder = LongAdder::new();
    adder.increment();
    adder.increment();
    adder.decrement();
    assert_eq!(adder.sum(), 1);
}

#[test]
fn long_adder_reset_zeroes_the_total() {
    let adder = LongAdder::new();
    adder.add(42);
    adder.reset();
    assert_eq!(adder.sum(), 0);
}

#[test]
fn long_adder_sum_then_reset_is_atomic_per_field() {
    let adder = LongAdder::new();
    adder.add(7);
    adder.add(8);
    let observed = adder.sum_then_reset();
    assert_eq!(observed, 15);
    assert_eq!(adder.sum(), 0);
}

/// `spec.md` §8 scenario A: many threads incrementing a shared `LongAdder`
/// never lose an update, however much they collide.
#[test]
fn long_adder_concurrent_increments_are_never_lost() {
    let adder = Arc::new(LongAdder::new());
    let threads = 16;
    let per_thread = 5_000;

    thread::scope(|s| {
        for _ in 0..threads {
            let adder = Arc::clone(&adder);
            s.spawn(move || {
                for _ in 0..per_thread {
                    adder.increment();
                }
            });
        }
    });

    assert_eq!(adder.sum(), (threads * per_thread) as i64);
}

/// `spec.md` §8 scenario D: a max-combiner accumulator must start from the
/// combiner's identity element (`i64::MIN`), not zero.
#[test]
fn long_accumulator_max_combiner_tracks_the_running_maximum() {
    let acc = Arc::new(LongAccumulator::new(i64::MIN, |a, b| a.max(b)));
    let inputs = [3, 1, 41, -7, 40, 9];

    thread::scope(|s| {
        for &x in &inputs {
            let acc = Arc::clone(&acc);
            s.spawn(move || acc.accumulate(x));
        }
    });

    assert_eq!(acc.get(), 41);
}

#[test]
fn long_accumulator_reset_restores_identity_not_zero() {
    let acc = LongAccumulator::new(i64::MIN, |a, b| a.max(b));
    acc.accumulate(5);
    acc.reset();
    assert_eq!(acc.get(), i64::MIN);
}

#[test]
fn long_accumulator_get_then_reset_observes_the_fold_before_clearing() {
    let acc = LongAccumulator::new(0, |a, b| a + b);
    acc.accumulate(3);
    acc.accumulate(4);
    assert_eq!(acc.get_then_reset(), 7);
    assert_eq!(acc.get(), 0);
}

#[test]
fn double_adder_single_threaded_sum_matches_float_addition() {
    let adder = DoubleAdder::new();
    adder.add(0.1);
    adder.add(0.2);
    assert!((adder.sum() - 0.3).abs() < 1e-9);
}

/// `spec.md` §8 scenario E: concurrent float adds land within rounding error
/// of the mathematical sum, not necessarily bit-exact.
#[test]
fn double_adder_concurrent_adds_land_within_rounding_error() {
    let adder = Arc::new(DoubleAdder::new());
    let threads = 8;
    let per_thread = 1_000;

    thread::scope(|s| {
        for _ in 0..threads {
            let adder = Arc::clone(&adder);
            s.spawn(move || {
                for _ in 0..per_thread {
                    adder.add(0.5);
                }
            });
        }
    });

    let expected = (threads * per_thread) as f64 * 0.5;
    assert!((adder.sum() - expected).abs() < 1e-6);
}

#[test]
fn double_accumulator_min_combiner_tracks_the_running_minimum() {
    let acc = Arc::new(DoubleAccumulator::new(f64::INFINITY, |a, b| a.min(b)));
    let inputs = [3.5, 1.25, -7.0, 40.0];

    thread::scope(|s| {
        for &x in &inputs {
            let acc = Arc::clone(&acc);
            s.spawn(move || acc.accumulate(x));
        }
    });

    assert_eq!(acc.get(), -7.0);
}

#[test]
fn double_accumulator_reset_restores_identity() {
    let acc = DoubleAccumulator::new(f64::INFINITY, |a, b| a.min(b));
    acc.accumulate(2.0);
    acc.reset();
    assert_eq!(acc.get(), f64::INFINITY);
}
