//! Column codec benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use strata_codec::{decode_column, encode_column, LogicalType, Value};

fn column(ty: LogicalType, rows: usize) -> Vec<Value> {
    (0..rows)
        .map(|i| match ty {
            LogicalType::BigInt => Value::BigInt(i as i64),
            LogicalType::Double => Value::Double(i as f64 * 0.5),
            _ => Value::Varchar(format!("row-{i}")),
        })
        .collect()
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_column");

    for ty in [LogicalType::BigInt, LogicalType::Double, LogicalType::Varchar] {
        let values = column(ty, 8192);
        group.throughput(Throughput::Elements(values.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(ty), &values, |b, values| {
            b.iter(|| black_box(encode_column(ty, black_box(values), 0).unwrap()));
        });
    }

    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_column");

    for ty in [LogicalType::BigInt, LogicalType::Double, LogicalType::Varchar] {
        let encoded = encode_column(ty, &column(ty, 8192), 0).unwrap();
        group.throughput(Throughput::Elements(8192));
        group.bench_with_input(BenchmarkId::from_parameter(ty), &encoded, |b, encoded| {
            b.iter(|| {
                black_box(decode_column(ty, black_box(&encoded.fixed), &encoded.heap).unwrap())
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode);
criterion_main!(benches);
