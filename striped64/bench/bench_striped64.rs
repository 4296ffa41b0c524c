use std::sync::Arc;
use std::thread;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use striped64::Striped64;

fn add(a: u64, b: u64) -> u64 {
    a.wrapping_add(b)
}

fn contended_increments(acc: &Arc<Striped64>, threads: usize, per_thread: u64) {
    thread::scope(|s| {
        for _ in 0..threads {
            let acc = Arc::clone(acc);
            s.spawn(move || {
                for _ in 0..per_thread {
                    if !acc.try_cas_base(1, None) {
                        match acc.try_cell_update(1, None) {
                            Some(true) => {}
                            Some(false) => acc.accumulate(1, None, false),
                            None => acc.accumulate(1, None, true),
                        }
                    }
                }
            });
        }
    });
}

fn bench_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("striped64_throughput");
    for threads in [1, 2, 4, 8, 16] {
        group.bench_with_input(BenchmarkId::from_parameter(threads), &threads, |b, &threads| {
            b.iter(|| {
                let acc = Arc::new(Striped64::new(0));
                contended_increments(&acc, threads, 10_000);
                std::hint::black_box(acc.fold(&add));
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_throughput);
criterion_main!(benches);
