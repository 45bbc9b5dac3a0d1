//! Micro benchmarks for the segmented cache.
//! Pure CPU - no network, no IO.
//!
//! ```bash
//! cargo bench --bench bench_cache
//! ```

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use sluice_lib::cache::{CacheBuilder, SegmentedCache};
use std::hint::black_box;

const CAPACITY: u64 = 10_000;

fn filled_cache() -> SegmentedCache<u64, u64> {
    let cache = match CacheBuilder::new().maximum_weight(CAPACITY).build() {
        Ok(cache) => cache,
        Err(e) => panic!("failed to build cache: {e}"),
    };
    for k in 0..CAPACITY {
        cache.put(k, k);
    }
    cache
}

fn bench_get_hit(c: &mut Criterion) {
    let cache = filled_cache();
    let mut k = 0u64;
    c.bench_function("cache_get_hit", |b| {
        b.iter(|| {
            k = (k + 7) % CAPACITY;
            cache.get(black_box(&k))
        });
    });
}

fn bench_put_with_eviction(c: &mut Criterion) {
    let cache = filled_cache();
    let mut k = CAPACITY;
    c.bench_function("cache_put_evicting", |b| {
        b.iter(|| {
            k += 1;
            cache.put(black_box(k), k);
        });
    });
}

fn bench_compute_if_absent(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_compute_if_absent");
    for present in [true, false] {
        let cache = filled_cache();
        let mut k = if present { 0 } else { CAPACITY };
        let id = BenchmarkId::from_parameter(if present { "present" } else { "load" });
        group.bench_with_input(id, &present, |b, &present| {
            b.iter(|| {
                k = if present { (k + 7) % CAPACITY } else { k + 1 };
                cache.compute_if_absent(black_box(k), |k| Ok::<_, std::io::Error>(*k))
            });
        });
    }
    group.finish();
}

criterion_group!(cache_benches, bench_get_hit, bench_put_with_eviction, bench_compute_if_absent);
criterion_main!(cache_benches);
