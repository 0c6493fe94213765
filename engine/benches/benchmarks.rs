//! Performance benchmarks for stockline-engine

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use stockline_engine::{
    BatchResponse, CatalogFilter, Intent, PendingBatch, ProductSnapshot, Reconciler, SortDirection,
    SortKey,
};

fn products(count: usize) -> Vec<ProductSnapshot> {
    (0..count)
        .map(|i| {
            ProductSnapshot::new(
                format!("p-{i}"),
                format!("Product {i}"),
                (i as u64 % 97) * 100,
                1_000,
                1,
            )
            .with_category(if i % 2 == 0 { "even" } else { "odd" })
            .with_sold(i as u64 % 53)
        })
        .collect()
}

fn loaded(count: usize) -> Reconciler {
    let mut reconciler = Reconciler::new(500);
    reconciler.apply_refresh(products(count));
    reconciler
}

fn bench_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch");

    group.bench_function("increment", |b| {
        let mut reconciler = loaded(100);
        let mut at = 0u64;

        b.iter(|| {
            at += 1;
            let intent = Intent::increment("p-7", "line-7", at);
            let _ = reconciler.dispatch(black_box(intent), black_box(at));
            // Keep the stock from running out.
            if at % 500 == 0 {
                reconciler.flush();
            }
        })
    });

    group.finish();
}

fn bench_flush(c: &mut Criterion) {
    let mut group = c.benchmark_group("flush");

    for size in [10, 100, 500].iter() {
        group.bench_with_input(BenchmarkId::new("coalesce", size), size, |b, &size| {
            b.iter_with_setup(
                || {
                    let mut reconciler = loaded(50);
                    for i in 0..size {
                        let id = format!("p-{}", i % 50);
                        let line = format!("line-{}", i % 50);
                        let intent = Intent::increment(id, line, i as u64);
                        let _ = reconciler.dispatch(intent, i as u64);
                    }
                    reconciler
                },
                |mut reconciler| reconciler.flush(),
            )
        });
    }

    group.bench_function("resolve", |b| {
        b.iter_with_setup(
            || {
                let mut reconciler = loaded(50);
                for i in 0..50u64 {
                    let _ = reconciler.dispatch(
                        Intent::increment(format!("p-{i}"), format!("line-{i}"), i),
                        i,
                    );
                }
                let batch: Option<PendingBatch> = reconciler.flush();
                (reconciler, batch)
            },
            |(mut reconciler, batch)| {
                if let Some(batch) = batch {
                    let _ = reconciler.complete_batch(
                        batch.batch_id,
                        Ok(BatchResponse::accepted([])),
                        1_000,
                    );
                }
            },
        )
    });

    group.finish();
}

fn bench_projection(c: &mut Criterion) {
    let mut group = c.benchmark_group("projection");

    for size in [100, 1000, 5000].iter() {
        group.bench_with_input(BenchmarkId::new("views", size), size, |b, &size| {
            let mut reconciler = loaded(size);
            for i in 0..20u64 {
                let _ = reconciler.dispatch(
                    Intent::increment(format!("p-{i}"), format!("line-{i}"), i),
                    i,
                );
            }
            let filter = CatalogFilter::new()
                .category("even")
                .sort_by(SortKey::Price, SortDirection::Descending);

            b.iter(|| reconciler.views(black_box(&filter), 8))
        });
    }

    group.finish();
}

fn bench_refresh(c: &mut Criterion) {
    let mut group = c.benchmark_group("refresh");

    for size in [100, 1000].iter() {
        group.bench_with_input(BenchmarkId::new("replace_all", size), size, |b, &size| {
            let mut reconciler = loaded(size);
            let fresh = products(size);

            b.iter(|| reconciler.apply_refresh(black_box(fresh.clone())))
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_dispatch,
    bench_flush,
    bench_projection,
    bench_refresh,
);
criterion_main!(benches);
