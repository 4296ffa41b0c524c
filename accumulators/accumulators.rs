// Copyright (C) 2022 by Richard Berry <rjsberry@proton.me>
//
// Permission to use, copy, modify, and/or distribute this software for any
// purpose with or without fee is hereby granted.
//
// THE SOFTWARE IS PROVIDED "AS IS" AND THE AUTHOR DISCLAIMS ALL WARRANTIES
// WITH REGARD TO THIS SOFTWARE INCLUDING ALL IMPLIED WARRANTIES OF
// MERCHANTABILITY AND FITNESS. IN NO EVENT SHALL THE AUTHOR BE LIABLE FOR
// ANY SPECIAL, DIRECT, INDIRECT, OR CONSEQUENTIAL DAMAGES OR ANY DAMAGES
// WHATSOEVER RESULTING FROM LOSS OF USE, DATA OR PROFITS, WHETHER IN AN
// ACTION OF CONTRACT, NEGLIGENCE OR OTHER TORTIOUS ACTION, ARISING OUT OF
// OR IN CONNECTION WITH THE USE OR PERFORMANCE OF THIS SOFTWARE.

//! Concurrent counters and reductions built on [`striped64::Striped64`].
//!
//! [`LongAdder`] and [`DoubleAdder`] are concurrent sums; [`LongAccumulator`]
//! and [`DoubleAccumulator`] generalize that to any associative combiner
//! (`max`, `min`, bitwise-or, ...). None of these types add concurrency
//! logic of their own — they translate `i64`/`f64` call sites into the
//! `u64` words `Striped64` operates on, and implement the fast-path
//! convention its documentation describes: try the base word, then the
//! thread's own cell, and only fall into the retry loop if both are
//! contended.
//!
//! ```
//! use accumulators::LongAdder;
//!
//! let adder = LongAdder::new();
//! adder.add(1);
//! adder.add(2);
//! assert_eq!(adder.sum(), 3);
//! ```

use striped64::Striped64;

/// Runs the fast-path convention `striped64::Striped64` documents: try the
/// base word, then the thread's own cell, falling into the slow path only
/// when both are contended.
fn add_or_accumulate(core: &Striped64, x: u64, combine: Option<&dyn Fn(u64, u64) -> u64>) {
    if core.has_table() || !core.try_cas_base(x, combine) {
        match core.try_cell_update(x, combine) {
            Some(true) => {}
            Some(false) => core.accumulate(x, combine, false),
            None => core.accumulate(x, combine, true),
        }
    }
}

/// A concurrent sum of `i64` values.
///
/// Many threads may call [`LongAdder::add`] concurrently; aggregate
/// throughput scales with contention instead of collapsing under it.
/// [`LongAdder::sum`] is a best-effort, unlocked snapshot.
pub struct LongAdder {
    core: Striped64,
}

impl LongAdder {
    /// Creates a new adder starting at zero.
    pub fn new() -> Self {
        Self { core: Striped64::new(0) }
    }

    /// Adds `x` to the running total.
    pub fn add(&self, x: i64) {
        add_or_accumulate(&self.core, x as u64, None);
    }

    /// Equivalent to `self.add(1)`.
    pub fn increment(&self) {
        self.add(1);
    }

    /// Equivalent to `self.add(-1)`.
    pub fn decrement(&self) {
        self.add(-1);
    }

    /// A best-effort snapshot of the running total.
    pub fn sum(&self) -> i64 {
        self.core.fold(&|a, b| a.wrapping_add(b)) as i64
    }

    /// Resets the adder to zero. Not atomic across the internal cells.
    pub fn reset(&self) {
        self.core.reset(0);
    }

    /// Folds the current total while resetting to zero, in one pass.
    pub fn sum_then_reset(&self) -> i64 {
        self.core.fold_then_reset(0, &|a, b| a.wrapping_add(b)) as i64
    }
}

impl Default for LongAdder {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LongAdder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LongAdder").field("sum", &self.sum()).finish()
    }
}

/// A concurrent sum of `f64` values.
///
/// Floating-point addition is neither associative nor commutative under
/// rounding, so unlike [`LongAdder`] the result is only guaranteed to be
/// *within rounding* of the mathematical sum, not bit-exact, when threads
/// race (`spec.md` §8 scenario E).
pub struct DoubleAdder {
    core: Striped64,
}

fn double_add(a: u64, b: u64) -> u64 {
    (f64::from_bits(a) + f64::from_bits(b)).to_bits()
}

impl DoubleAdder {
    /// Creates a new adder starting at `0.0`.
    pub fn new() -> Self {
        Self { core: Striped64::new(0.0_f64.to_bits()) }
    }

    /// Adds `x` to the running total.
    pub fn add(&self, x: f64) {
        add_or_accumulate(&self.core, x.to_bits(), Some(&double_add));
    }

    /// A best-effort snapshot of the running total.
    pub fn sum(&self) -> f64 {
        f64::from_bits(self.core.fold(&double_add))
    }

    /// Resets the adder to `0.0`. Not atomic across the internal cells.
    pub fn reset(&self) {
        self.core.reset(0.0_f64.to_bits());
    }

    /// Folds the current total while resetting to `0.0`, in one pass.
    pub fn sum_then_reset(&self) -> f64 {
        f64::from_bits(self.core.fold_then_reset(0.0_f64.to_bits(), &double_add))
    }
}

impl Default for DoubleAdder {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DoubleAdder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DoubleAdder").field("sum", &self.sum()).finish()
    }
}

/// A concurrent reduction of `i64` values under an arbitrary associative
/// combiner, e.g. `max`, `min`, or bitwise-or.
///
/// `identity` must be the combiner's identity element: the value `e` such
/// that `combine(e, x) == x` for every `x` the accumulator will see. It
/// seeds the base word and is what [`LongAccumulator::reset`] restores.
pub struct LongAccumulator<F>
where
    F: Fn(i64, i64) -> i64 + Send + Sync,
{
    core: Striped64,
    identity: i64,
    combine: F,
}

impl<F> LongAccumulator<F>
where
    F: Fn(i64, i64) -> i64 + Send + Sync,
{
    /// Creates a new accumulator seeded at `identity`.
    pub fn new(identity: i64, combine: F) -> Self {
        Self {
            core: Striped64::new(identity as u64),
            identity,
            combine,
        }
    }

    fn combine_bits(&self, a: u64, b: u64) -> u64 {
        (self.combine)(a as i64, b as i64) as u64
    }

    /// Folds `x` into the accumulator using the configured combiner.
    pub fn accumulate(&self, x: i64) {
        let combine = |a, b| self.combine_bits(a, b);
        add_or_accumulate(&self.core, x as u64, Some(&combine));
    }

    /// A best-effort snapshot of the current reduction.
    pub fn get(&self) -> i64 {
        let combine = |a, b| self.combine_bits(a, b);
        self.core.fold(&combine) as i64
    }

    /// Resets the accumulator to `identity`. Not atomic across the internal
    /// cells.
    pub fn reset(&self) {
        self.core.reset(self.identity as u64);
    }

    /// Folds the current reduction while resetting to `identity`, in one
    /// pass.
    pub fn get_then_reset(&self) -> i64 {
        let combine = |a, b| self.combine_bits(a, b);
        self.core.fold_then_reset(self.identity as u64, &combine) as i64
    }
}

impl<F> std::fmt::Debug for LongAccumulator<F>
where
    F: Fn(i64, i64) -> i64 + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LongAccumulator").field("value", &self.get()).finish()
    }
}

/// A concurrent reduction of `f64` values under an arbitrary associative
/// combiner.
///
/// See [`LongAccumulator`] for the identity-element contract; the same
/// floating-point rounding caveat from [`DoubleAdder`] applies.
pub struct DoubleAccumulator<F>
where
    F: Fn(f64, f64) -> f64 + Send + Sync,
{
    core: Striped64,
    identity: f64,
    combine: F,
}

impl<F> DoubleAccumulator<F>
where
    F: Fn(f64, f64) -> f64 + Send + Sync,
{
    /// Creates a new accumulator seeded at `identity`.
    pub fn new(identity: f64, combine: F) -> Self {
        Self {
            core: Striped64::new(identity.to_bits()),
            identity,
            combine,
        }
    }

    fn combine_bits(&self, a: u64, b: u64) -> u64 {
        (self.combine)(f64::from_bits(a), f64::from_bits(b)).to_bits()
    }

    /// Folds `x` into the accumulator using the configured combiner.
    pub fn accumulate(&self, x: f64) {
        let combine = |a, b| self.combine_bits(a, b);
        add_or_accumulate(&self.core, x.to_bits(), Some(&combine));
    }

    /// A best-effort snapshot of the current reduction.
    pub fn get(&self) -> f64 {
        let combine = |a, b| self.combine_bits(a, b);
        f64::from_bits(self.core.fold(&combine))
    }

    /// Resets the accumulator to `identity`. Not atomic across the internal
    /// cells.
    pub fn reset(&self) {
        self.core.reset(self.identity.to_bits());
    }

    /// Folds the current reduction while resetting to `identity`, in one
    /// pass.
    pub fn get_then_reset(&self) -> f64 {
        let combine = |a, b| self.combine_bits(a, b);
        f64::from_bits(self.core.fold_then_reset(self.identity.to_bits(), &combine))
    }
}

impl<F> std::fmt::Debug for DoubleAccumulator<F>
where
    F: Fn(f64, f64) -> f64 + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DoubleAccumulator").field("value", &self.get()).finish()
    }
}
