//! Transaction path benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use stratadb_bench::{bench_store, generate_keys, payload};

/// Benchmark committing transactions of varying write counts.
fn bench_commit(c: &mut Criterion) {
    let mut group = c.benchmark_group("commit");

    for batch_size in [10usize, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*batch_size as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(batch_size),
            batch_size,
            |b, &batch_size| {
                let store = bench_store();
                let keys = generate_keys(batch_size);
                let value = payload(256);

                b.iter(|| {
                    let tx = store.begin().unwrap();
                    let map = tx.open_map::<String, Vec<u8>>("bench").unwrap();
                    for key in &keys {
                        map.put(key, black_box(&value)).unwrap();
                    }
                    tx.commit().unwrap();
                });
            },
        );
    }
    group.finish();
}

/// Benchmark MVCC reads of committed data.
fn bench_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("read");

    let store = bench_store();
    let keys = generate_keys(1000);
    let value = payload(256);
    let setup = store.begin().unwrap();
    let map = setup.open_map::<String, Vec<u8>>("bench").unwrap();
    for key in &keys {
        map.put(key, &value).unwrap();
    }
    setup.commit().unwrap();

    group.bench_function("committed_get", |b| {
        let tx = store.begin().unwrap();
        let map = tx.open_map::<String, Vec<u8>>("bench").unwrap();
        let mut i = 0;
        b.iter(|| {
            let key = &keys[i % keys.len()];
            i += 1;
            black_box(map.get(key).unwrap())
        });
    });

    group.bench_function("own_uncommitted_get", |b| {
        let tx = store.begin().unwrap();
        let map = tx.open_map::<String, Vec<u8>>("bench").unwrap();
        for key in keys.iter().take(100) {
            map.put(key, &value).unwrap();
        }
        let mut i = 0;
        b.iter(|| {
            let key = &keys[i % 100];
            i += 1;
            black_box(map.get(key).unwrap())
        });
    });

    group.finish();
}

/// Benchmark rollback of transactions of varying write counts.
fn bench_rollback(c: &mut Criterion) {
    let mut group = c.benchmark_group("rollback");

    for batch_size in [10usize, 100].iter() {
        group.throughput(Throughput::Elements(*batch_size as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(batch_size),
            batch_size,
            |b, &batch_size| {
                let store = bench_store();
                let keys = generate_keys(batch_size);
                let value = payload(64);

                b.iter(|| {
                    let tx = store.begin().unwrap();
                    let map = tx.open_map::<String, Vec<u8>>("bench").unwrap();
                    for key in &keys {
                        map.put(key, &value).unwrap();
                    }
                    tx.rollback().unwrap();
                });
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_commit, bench_read, bench_rollback);
criterion_main!(benches);
