//! Sustained concurrent load against `LongAdder`, unbounded in wall time,
//! meant to be run under ThreadSanitizer/loom-adjacent tooling by hand
//! rather than as part of the normal test suite.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use accumulators::LongAdder;

const WRITERS: usize = 8;
const READERS: usize = 4;

fn main() {
    let adder = Arc::new(LongAdder::new());
    let stop = Arc::new(AtomicBool::new(false));

    thread::scope(|s| {
        for _ in 0..WRITERS {
            let adder = Arc::clone(&adder);
            let stop = Arc::clone(&stop);
            s.spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    adder.increment();
                }
            });
        }
        for _ in 0..READERS {
            let adder = Arc::clone(&adder);
            let stop = Arc::clone(&stop);
            s.spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    std::hint::black_box(adder.sum());
                }
            });
        }

        thread::sleep(std::time::Duration::from_secs(5));
        stop.store(true, Ordering::Relaxed);
    });

    println!("final sum = {}", adder.sum());
}
