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

//! A contention-adaptive 64-bit accumulator core.
//!
//! [`Striped64`] is a shared word that many threads update concurrently. It
//! starts out as a single `base` word updated with a compare-and-swap, and
//! only grows a table of cache-line-padded cells once concurrent writers
//! start colliding on that single word. Reads of the running total
//! ([`Striped64::fold`]) are best-effort snapshots, never locked.
//!
//! This crate is the engine underneath counters and reductions; it does not
//! itself expose `add`/`sum` ergonomics for `i64`/`f64` — see the
//! `accumulators` crate for that facade.
//!
//! ```
//! use striped64::Striped64;
//!
//! let acc = Striped64::new(0);
//! acc.try_cas_base(1, None);
//! assert_eq!(acc.fold(&|a, b| a.wrapping_add(b)), 1);
//! ```
//!
//! # Concurrency
//!
//! The only blocking-adjacent state is a single spin flag guarding table
//! initialization, growth, and slot attachment. Every hot-path update is a
//! lock-free compare-and-swap against either `base` or a per-thread cell; a
//! thread that cannot win a CAS never waits, it retries along a different
//! branch (another slot, the base word, or a rehash).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering::*};
use std::sync::{Arc, OnceLock};

use arc_swap::ArcSwapOption;
use crossbeam_utils::CachePadded;

mod probe {
    //! The per-thread probe: a pseudo-random hash that picks a thread's
    //! preferred cell, advanced by xorshift on every collision.

    use std::cell::Cell;
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    use std::sync::atomic::{AtomicU64, Ordering::Relaxed};
    use std::thread;

    thread_local! {
        static PROBE: Cell<u32> = const { Cell::new(0) };
    }

    // Same constant parking_lot's bucket hash multiplies by; a full-period
    // multiplicative step used only to mix a fresh seed, not as the per-call
    // xorshift (that uses the 13/17/5 shifts the contract pins down).
    const GOLDEN_GAMMA: u64 = 0x9E37_79B9_7F4A_7C15;

    static SEED_SEQUENCE: AtomicU64 = AtomicU64::new(0);

    /// Reads the current thread's probe. `0` means uninitialized.
    pub fn get_probe() -> u32 {
        PROBE.with(|p| p.get())
    }

    /// Seeds an uninitialized probe with a non-zero value. No-op if already set.
    pub(crate) fn init() {
        PROBE.with(|p| {
            if p.get() == 0 {
                p.set(seed());
            }
        });
    }

    /// Applies the xorshift step to the current thread's probe and returns it.
    ///
    /// The shift amounts (13, 17, 5) are part of the contract: they give a
    /// full-period sequence over non-zero 32-bit states.
    pub fn advance_probe() -> u32 {
        PROBE.with(|p| {
            let mut v = p.get();
            if v == 0 {
                v = seed();
            }
            v ^= v << 13;
            v ^= v >> 17;
            v ^= v << 5;
            p.set(v);
            v
        })
    }

    fn seed() -> u32 {
        let tick = SEED_SEQUENCE.fetch_add(GOLDEN_GAMMA, Relaxed);
        let tid = thread_id_hash();
        let mixed = tick.wrapping_add(tid).wrapping_mul(GOLDEN_GAMMA);
        let v = (mixed >> 32) as u32;
        if v == 0 {
            1
        } else {
            v
        }
    }

    fn thread_id_hash() -> u64 {
        let mut h = DefaultHasher::new();
        thread::current().id().hash(&mut h);
        h.finish()
    }
}

pub use probe::{advance_probe, get_probe};

/// A single cache-line-padded slot holding one atomically-updated word.
///
/// Padding is explicit (via [`CachePadded`]) rather than left to allocator
/// alignment: cells live packed inside a contiguous table, so without
/// padding two adjacent cells would share a cache line and every CAS from
/// one thread would invalidate its neighbour's line.
struct Cell {
    value: CachePadded<AtomicU64>,
}

impl Cell {
    fn new(value: u64) -> Self {
        Self {
            value: CachePadded::new(AtomicU64::new(value)),
        }
    }

    fn load(&self) -> u64 {
        self.value.load(Acquire)
    }

    fn cas(&self, expected: u64, desired: u64) -> bool {
        self.value
            .compare_exchange(expected, desired, AcqRel, Relaxed)
            .is_ok()
    }

    fn store(&self, value: u64) {
        self.value.store(value, Release);
    }

    fn swap(&self, value: u64) -> u64 {
        self.value.swap(value, AcqRel)
    }
}

/// A power-of-two table of lazily-populated cells.
///
/// Once a slot is given a cell it keeps that cell for the table's lifetime;
/// growth allocates a new, longer `Table` and copies the existing `Arc<Cell>`
/// references into it rather than moving or re-creating cells.
struct Table {
    slots: Box<[OnceLock<Arc<Cell>>]>,
}

impl Table {
    fn with_len(len: usize) -> Self {
        debug_assert!(len.is_power_of_two());
        Self {
            slots: (0..len).map(|_| OnceLock::new()).collect(),
        }
    }

    fn len(&self) -> usize {
        self.slots.len()
    }

    /// Doubles the table, carrying over every already-installed cell.
    fn grown(&self) -> Self {
        let grown = Self::with_len(self.len() * 2);
        for (slot, cell) in grown.slots.iter().zip(self.slots.iter()) {
            if let Some(cell) = cell.get() {
                let _ = slot.set(Arc::clone(cell));
            }
        }
        grown
    }
}

fn next_pow2(n: usize) -> usize {
    n.max(1).next_power_of_two()
}

/// The dynamic striping engine.
///
/// Owns the `base` word, the lazily-grown [`Table`] of cells, and the single
/// non-blocking spin flag that serializes table initialization, growth, and
/// slot attachment. See the crate documentation for the concurrency model.
pub struct Striped64 {
    base: AtomicU64,
    table: ArcSwapOption<Table>,
    busy: AtomicBool,
    max_cells: usize,
}

impl Striped64 {
    /// Creates a new accumulator with the given initial base value.
    ///
    /// `initial` is the identity the accumulator starts from (`0` for a
    /// plain adder, the combiner's identity element for a reduction such as
    /// `max`). The cell table is capped at the next power of two at or
    /// above the number of available hardware threads, read once here.
    pub fn new(initial: u64) -> Self {
        let ncpu = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            base: AtomicU64::new(initial),
            table: ArcSwapOption::from(None),
            busy: AtomicBool::new(false),
            max_cells: next_pow2(ncpu),
        }
    }

    /// Reads the base word. Part of the façade's fast path (§6).
    pub fn base(&self) -> u64 {
        self.base.load(Acquire)
    }

    /// Attempts the fast-path CAS against the base word exactly once.
    ///
    /// `combine` defaults to wrapping addition when absent. Returns whether
    /// the single attempt succeeded; on failure the caller is expected to
    /// fall into [`Striped64::accumulate`].
    pub fn try_cas_base(&self, x: u64, combine: Option<&dyn Fn(u64, u64) -> u64>) -> bool {
        let b = self.base.load(Acquire);
        let nb = apply(combine, b, x);
        self.cas_base(b, nb)
    }

    /// Raw compare-and-swap on the base word.
    pub fn cas_base(&self, expected: u64, desired: u64) -> bool {
        self.base
            .compare_exchange(expected, desired, AcqRel, Relaxed)
            .is_ok()
    }

    /// Whether a cell table has ever been allocated.
    pub fn has_table(&self) -> bool {
        self.table.load().is_some()
    }

    /// Attempts a CAS against the cell the current thread's probe maps to.
    ///
    /// Returns `None` when there is no table yet, or the mapped slot has no
    /// cell installed — in both cases the caller should fall into
    /// [`Striped64::accumulate`]. Otherwise returns whether the CAS
    /// succeeded.
    pub fn try_cell_update(&self, x: u64, combine: Option<&dyn Fn(u64, u64) -> u64>) -> Option<bool> {
        let guard = self.table.load();
        let table = guard.as_ref()?;
        let n = table.len();
        let idx = (get_probe() as usize) & (n - 1);
        let cell = table.slots[idx].get()?;
        let v = cell.load();
        let nv = apply(combine, v, x);
        Some(cell.cas(v, nv))
    }

    /// The slow-path retry loop (`spec.md` §4.4, branches B1–B7).
    ///
    /// `combine` is the optional associative combiner; `None` means wrapping
    /// addition. `was_uncontended` is `false` exactly when the caller already
    /// observed a CAS failure on an existing cell for this thread before
    /// calling in.
    pub fn accumulate(&self, x: u64, combine: Option<&dyn Fn(u64, u64) -> u64>, mut was_uncontended: bool) {
        let mut collide = false;

        loop {
            // B1: the per-thread probe hasn't been seeded yet.
            if get_probe() == 0 {
                probe::init();
                was_uncontended = true;
                continue;
            }

            let guard = self.table.load();
            let Some(table) = guard.as_ref() else {
                // B6: no table at all.
                if !self.busy.load(Relaxed) && self.table.load().is_none() && self.try_acquire_busy() {
                    if self.table.load().is_none() {
                        let fresh = Table::with_len(2);
                        let idx = (get_probe() as usize) & 1;
                        let _ = fresh.slots[idx].set(Arc::new(Cell::new(x)));
                        self.table.store(Some(Arc::new(fresh)));
                        tracing::trace!("striped64: allocated initial 2-slot table");
                        self.release_busy();
                        return;
                    }
                    self.release_busy();
                }
                // B7: someone else owns table creation right now; fall back.
                if self.try_cas_base(x, combine) {
                    return;
                }
                continue;
            };

            let n = table.len();
            let idx = (get_probe() as usize) & (n - 1);

            match table.slots[idx].get() {
                None => {
                    // B2: our slot is empty.
                    if !self.busy.load(Relaxed) {
                        let fresh_cell = Arc::new(Cell::new(x));
                        if self.try_acquire_busy() {
                            let still = self.table.load();
                            let ok = still
                                .as_ref()
                                .map(|t| Arc::ptr_eq(t, table) && t.len() == n && t.slots[idx].get().is_none())
                                .unwrap_or(false);
                            if ok {
                                let _ = still.as_ref().unwrap().slots[idx].set(fresh_cell);
                                self.release_busy();
                                return;
                            }
                            self.release_busy();
                        }
                    }
                    collide = false;
                    probe::advance_probe();
                }
                Some(cell) => {
                    if !was_uncontended {
                        // B3: give the caller's stale contention signal one
                        // rehash before escalating towards growth.
                        was_uncontended = true;
                        probe::advance_probe();
                        continue;
                    }

                    // B4: attempt the update.
                    let v = cell.load();
                    let nv = apply(combine, v, x);
                    if cell.cas(v, nv) {
                        return;
                    }

                    // B5: growth logic after a failed CAS.
                    let table_changed = !self
                        .table
                        .load()
                        .as_ref()
                        .map(|t| Arc::ptr_eq(t, table))
                        .unwrap_or(false);
                    if n >= self.max_cells || table_changed {
                        collide = false;
                        probe::advance_probe();
                    } else if !collide {
                        collide = true;
                        probe::advance_probe();
                    } else if self.try_acquire_busy() {
                        let current = self.table.load();
                        if current.as_ref().map(|t| Arc::ptr_eq(t, table)).unwrap_or(false) {
                            let grown = table.grown();
                            tracing::debug!(from = n, to = grown.len(), "striped64: table grown");
                            self.table.store(Some(Arc::new(grown)));
                        }
                        self.release_busy();
                        collide = false;
                        probe::advance_probe();
                    } else {
                        probe::advance_probe();
                    }
                }
            }
        }
    }

    /// A best-effort snapshot: `base` folded with every installed cell.
    ///
    /// No locking. Concurrent writers may be reflected in any interleaving.
    pub fn fold(&self, combine: &dyn Fn(u64, u64) -> u64) -> u64 {
        let mut result = self.base.load(Acquire);
        if let Some(table) = self.table.load().as_ref() {
            for slot in table.slots.iter() {
                if let Some(cell) = slot.get() {
                    result = combine(result, cell.load());
                }
            }
        }
        result
    }

    /// Writes `identity` to the base word and to every installed cell.
    ///
    /// Not atomic across cells — see the crate documentation.
    pub fn reset(&self, identity: u64) {
        self.base.store(identity, Release);
        if let Some(table) = self.table.load().as_ref() {
            for slot in table.slots.iter() {
                if let Some(cell) = slot.get() {
                    cell.store(identity);
                }
            }
        }
    }

    /// Folds the current total while resetting every field to `identity`.
    ///
    /// Reads and resets interleave per field; values written concurrently
    /// after a field's read-and-reset are preserved in that field rather
    /// than lost.
    pub fn fold_then_reset(&self, identity: u64, combine: &dyn Fn(u64, u64) -> u64) -> u64 {
        let mut result = self.base.swap(identity, AcqRel);
        if let Some(table) = self.table.load().as_ref() {
            for slot in table.slots.iter() {
                if let Some(cell) = slot.get() {
                    result = combine(result, cell.swap(identity));
                }
            }
        }
        result
    }

    /// The current cell table length, or `0` if no table has been
    /// allocated yet. Exposed for tests of the invariants in `spec.md` §8.
    pub fn cells_len(&self) -> usize {
        self.table.load().as_ref().map(|t| t.len()).unwrap_or(0)
    }

    /// The cap on cell-table growth: `nextPow2(NCPU)`.
    pub fn max_cells(&self) -> usize {
        self.max_cells
    }

    fn try_acquire_busy(&self) -> bool {
        self.busy.compare_exchange(false, true, Acquire, Relaxed).is_ok()
    }

    fn release_busy(&self) {
        self.busy.store(false, Release);
    }
}

fn apply(combine: Option<&dyn Fn(u64, u64) -> u64>, v: u64, x: u64) -> u64 {
    match combine {
        Some(f) => f(v, x),
        None => v.wrapping_add(x),
    }
}
