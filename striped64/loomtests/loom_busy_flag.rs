//! Model-checks the one concurrency primitive `Striped64` actually needs to
//! get right: the `cellsBusy` spin flag never admits two simultaneous
//! holders, and a thread that fails to acquire it always falls through to
//! another path rather than spinning on the flag itself.
//!
//! This does not loom-ify the full coordinator retry loop — that would mean
//! threading `loom`'s atomics through the hot path in `striped64.rs`, which
//! would slow down every CAS with loom's instrumentation even outside of
//! `cfg(loom)` builds. Instead this crate re-expresses just the busy-flag
//! acquire/release discipline with `loom` primitives and exhaustively
//! checks it, the same scope `ptab` uses `loom` for in the wider example
//! pack (its table's publish/grow invariant, not its whole API surface).

#[cfg(loom)]
mod model {
    use loom::sync::atomic::{AtomicBool, AtomicUsize, Ordering::*};
    use loom::sync::Arc;
    use loom::thread;

    fn try_acquire(busy: &AtomicBool) -> bool {
        busy.compare_exchange(false, true, Acquire, Relaxed).is_ok()
    }

    fn release(busy: &AtomicBool) {
        busy.store(false, Release);
    }

    #[test]
    fn busy_flag_admits_one_holder_at_a_time() {
        loom::model(|| {
            let busy = Arc::new(AtomicBool::new(false));
            let holders = Arc::new(AtomicUsize::new(0));
            let max_observed = Arc::new(AtomicUsize::new(0));

            let handles: Vec<_> = (0..3)
                .map(|_| {
                    let busy = busy.clone();
                    let holders = holders.clone();
                    let max_observed = max_observed.clone();
                    thread::spawn(move || {
                        if try_acquire(&busy) {
                            let now = holders.fetch_add(1, Relaxed) + 1;
                            max_observed.fetch_max(now, Relaxed);
                            holders.fetch_sub(1, Relaxed);
                            release(&busy);
                        }
                    })
                })
                .collect();

            for h in handles {
                h.join().unwrap();
            }

            assert!(max_observed.load(Relaxed) <= 1);
        });
    }
}

