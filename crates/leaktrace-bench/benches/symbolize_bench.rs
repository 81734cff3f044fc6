//! Symbolizer benchmarks against the running bench binary.

use criterion::{Criterion, criterion_group, criterion_main};
use leaktrace_core::{ProcessResolver, SymbolCache, symbolize};

#[inline(never)]
fn target_function() -> u64 {
    criterion::black_box(7)
}

fn bench_symbolize(c: &mut Criterion) {
    let pc = target_function as fn() -> u64 as usize;
    let pc64 = pc as u64;
    let mut group = c.benchmark_group("symbolize");

    group.bench_function("cold_lookup", |b| {
        b.iter(|| criterion::black_box(symbolize(pc64)));
    });

    group.bench_function("memoized_lookup", |b| {
        let mut cache = SymbolCache::new(ProcessResolver);
        // Prime the cache with the return-address form used in reports.
        cache.lookup(pc + 1);
        b.iter(|| criterion::black_box(cache.lookup(pc + 1).is_some()));
    });

    group.finish();
}

criterion_group!(benches, bench_symbolize);
criterion_main!(benches);
