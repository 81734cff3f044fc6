//! Allocation registry benchmarks.

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use leaktrace_core::{AllocationRegistry, Backtrace};

fn bench_insert_remove_cycle(c: &mut Criterion) {
    let live: &[usize] = &[0, 64, 1024, 16384];
    let mut group = c.benchmark_group("insert_remove_cycle");

    for &n in live {
        group.bench_with_input(BenchmarkId::new("live", n), &n, |b, &n| {
            let mut registry = AllocationRegistry::new();
            for i in 0..n {
                registry.insert(0x10_0000 + i * 32, 32, Backtrace::empty());
            }
            // Lands in the middle of the populated range.
            let addr = 0x10_0000 + n * 16 + 8;
            b.iter(|| {
                registry.insert(addr, 16, Backtrace::empty());
                criterion::black_box(registry.remove(addr));
            });
        });
    }
    group.finish();
}

fn bench_fill_ascending(c: &mut Criterion) {
    let mut group = c.benchmark_group("fill");

    group.bench_function("10000x_ascending", |b| {
        b.iter(|| {
            let mut registry = AllocationRegistry::new();
            for i in 0..10_000usize {
                registry.insert(0x1000 + i * 16, 16, Backtrace::empty());
            }
            criterion::black_box(registry.total_bytes());
        });
    });

    group.bench_function("10000x_descending", |b| {
        b.iter(|| {
            let mut registry = AllocationRegistry::new();
            for i in (0..10_000usize).rev() {
                registry.insert(0x1000 + i * 16, 16, Backtrace::empty());
            }
            criterion::black_box(registry.total_bytes());
        });
    });

    group.finish();
}

criterion_group!(benches, bench_insert_remove_cycle, bench_fill_ascending);
criterion_main!(benches);
