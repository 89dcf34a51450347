//! Codec benchmarks.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use stratadb_bench::payload;
use stratadb_codec::{Decoder, Encoder};
use stratadb_core::VersionedValue;

fn bench_varints(c: &mut Criterion) {
    let mut group = c.benchmark_group("varint");

    group.bench_function("write_varu64", |b| {
        b.iter(|| {
            let mut enc = Encoder::with_capacity(16);
            enc.write_varu64(black_box(0x1234_5678_9abc));
            black_box(enc.into_bytes())
        });
    });

    group.bench_function("ordered_roundtrip", |b| {
        b.iter(|| {
            let mut enc = Encoder::with_capacity(16);
            enc.write_ordered_u64(black_box(0x1234_5678));
            let bytes = enc.into_bytes();
            let mut dec = Decoder::new(&bytes);
            black_box(dec.read_ordered_u64().unwrap())
        });
    });

    group.finish();
}

fn bench_versioned_value(c: &mut Criterion) {
    let mut group = c.benchmark_group("versioned_value");
    let value = VersionedValue::new(1 << 40, 123, Some(payload(256)));
    let encoded = value.to_bytes();

    group.bench_function("encode", |b| {
        b.iter(|| black_box(value.to_bytes()));
    });
    group.bench_function("decode", |b| {
        b.iter(|| black_box(VersionedValue::from_bytes(&encoded).unwrap()));
    });

    group.finish();
}

criterion_group!(benches, bench_varints, bench_versioned_value);
criterion_main!(benches);
