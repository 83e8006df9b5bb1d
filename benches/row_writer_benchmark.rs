//! `UnsafeRow` writer benchmarks.
//!
//! Measures encoding throughput for:
//! - Fixed-width only schemas
//! - Mixed schemas with strings

use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use columnar_runtime::{RowWriterConfig, UnsafeRowWriter};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

fn fixed_batch(rows: usize) -> RecordBatch {
    let schema = Arc::new(Schema::new(vec![
        Field::new("a", DataType::Int64, true),
        Field::new("b", DataType::Float64, true),
    ]));
    let a = Int64Array::from_iter_values((0..rows).map(|i| i as i64));
    let b = Float64Array::from_iter_values((0..rows).map(|i| i as f64 * 0.5));
    RecordBatch::try_new(schema, vec![Arc::new(a) as ArrayRef, Arc::new(b)]).expect("create batch")
}

fn mixed_batch(rows: usize) -> RecordBatch {
    let schema = Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int64, true),
        Field::new("name", DataType::Utf8, true),
    ]));
    let id = Int64Array::from_iter_values((0..rows).map(|i| i as i64));
    let name = StringArray::from_iter_values((0..rows).map(|i| format!("name-{i:08}")));
    RecordBatch::try_new(schema, vec![Arc::new(id) as ArrayRef, Arc::new(name)])
        .expect("create batch")
}

/// Benchmark repeated writes of the same batch (buffers reused)
fn bench_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("row_writer_write");

    for rows in &[1024usize, 8192] {
        group.throughput(Throughput::Elements(*rows as u64));

        let mut fixed = UnsafeRowWriter::try_new(fixed_batch(*rows), RowWriterConfig::default())
            .expect("create writer");
        group.bench_with_input(BenchmarkId::new("fixed", rows), rows, |b, _| {
            b.iter(|| {
                fixed.write().expect("write rows");
                black_box(fixed.rows().count())
            });
        });

        let mut mixed = UnsafeRowWriter::try_new(mixed_batch(*rows), RowWriterConfig::default())
            .expect("create writer");
        group.bench_with_input(BenchmarkId::new("mixed", rows), rows, |b, _| {
            b.iter(|| {
                mixed.write().expect("write rows");
                black_box(mixed.rows().count())
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_write);
criterion_main!(benches);
