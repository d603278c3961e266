//! Criterion benchmarks for the per-cell pass array hot paths in `cps-core`.
//!
//! Benchmarks `PassArrayStore::locate_time` over growing cell histories and
//! `PassArrayStore::integrate` for fresh and overlapping batches.

use chrono::{DateTime, Duration, TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use cps_core::{CellPass, PassArrayStore};

fn base() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap()
}

fn history(len: i64) -> Vec<CellPass> {
    (0..len)
        .map(|i| CellPass {
            height: 100.0 + i as f32 * 0.001,
            ..CellPass::at((i % 3) as i32, base() + Duration::seconds(i * 10))
        })
        .collect()
}

fn bench_locate_time(c: &mut Criterion) {
    let mut group = c.benchmark_group("pass_store/locate_time");

    for len in [16i64, 256, 4096] {
        let mut store = PassArrayStore::new();
        for pass in history(len) {
            store.add_pass(7, 9, pass);
        }

        // Midpoint between two stored passes
        let target = base() + Duration::seconds(len * 5 + 5);
        group.bench_with_input(BenchmarkId::new("between", len), &target, |b, target| {
            b.iter(|| black_box(store.locate_time(7, 9, black_box(*target))))
        });

        let exact = base() + Duration::seconds((len - 1) * 10);
        group.bench_with_input(BenchmarkId::new("exact_last", len), &exact, |b, exact| {
            b.iter(|| black_box(store.locate_time(7, 9, black_box(*exact))))
        });
    }

    group.finish();
}

fn bench_integrate(c: &mut Criterion) {
    let mut group = c.benchmark_group("pass_store/integrate");

    for len in [64i64, 1024] {
        let incoming = history(len);

        group.bench_with_input(BenchmarkId::new("into_empty", len), &incoming, |b, incoming| {
            b.iter(|| {
                let mut store = PassArrayStore::new();
                black_box(store.integrate(0, 0, black_box(incoming), false, None))
            })
        });

        // Every incoming pass matches an existing one
        let mut populated = PassArrayStore::new();
        populated.integrate(0, 0, &incoming, false, None);
        group.bench_with_input(BenchmarkId::new("overlapping", len), &incoming, |b, incoming| {
            b.iter(|| {
                let mut store = populated.clone();
                black_box(store.integrate(0, 0, black_box(incoming), true, None))
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_locate_time, bench_integrate);
criterion_main!(benches);
