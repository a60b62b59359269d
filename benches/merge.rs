//! Benchmarks for the N-way latency merge.
//!
//! Run:
//! - cargo bench --bench merge

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use sweep_bench::metrics::{merge_sorted, LatencySummary};

const WORKER_COUNTS: [usize; 3] = [4, 12, 48];
const SAMPLES_PER_WORKER: usize = 50_000;

/// Sorted, deterministic per-worker latencies with overlapping ranges.
fn build_workers(workers: usize) -> Vec<Vec<f64>> {
    (0..workers)
        .map(|w| {
            (0..SAMPLES_PER_WORKER)
                .map(|i| 8_000.0 + (i as f64) * 0.37 + (w as f64) * 11.0)
                .collect()
        })
        .collect()
}

fn bench_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge_sorted");
    group.sample_size(20);

    for &workers in &WORKER_COUNTS {
        let lists = build_workers(workers);
        let id = BenchmarkId::new("workers", workers);
        group.bench_with_input(id, &lists, |b, lists| {
            b.iter(|| merge_sorted(black_box(lists)));
        });
    }
    group.finish();
}

fn bench_merge_vs_resort(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge_then_summarize");
    group.sample_size(20);
    let lists = build_workers(12);

    group.bench_function("heap_merge", |b| {
        b.iter(|| LatencySummary::from_sorted(&merge_sorted(black_box(&lists))))
    });
    group.bench_function("concat_sort", |b| {
        b.iter(|| {
            let mut all: Vec<f64> = black_box(&lists).iter().flatten().copied().collect();
            all.sort_by(f64::total_cmp);
            LatencySummary::from_sorted(&all)
        })
    });
    group.finish();
}

criterion_group!(benches, bench_merge, bench_merge_vs_resort);
criterion_main!(benches);
