//! Performance benchmarks for the decode and projection hot paths.
//!
//! Run with: `cargo bench --bench pipeline_perf`

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use std::time::Duration;

use xlens::model::TweetRow;
use xlens::npy;
use xlens::projection::{ProjectionParams, dot, project};

/// Embedding width used by the analysis job.
const DIMENSIONS: usize = 384;

#[allow(clippy::cast_precision_loss)]
fn matrix_values(rows: usize, dims: usize) -> Vec<f32> {
    // Deterministic pseudo-random values in [-1, 1).
    let mut state: u64 = 0x9e37_79b9_7f4a_7c15;
    (0..rows * dims)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state >> 40) as f32 / (1u64 << 23) as f32 - 1.0
        })
        .collect()
}

fn rows(count: usize) -> Vec<TweetRow> {
    (0..count)
        .map(|i| TweetRow {
            tweet_id: i.to_string(),
            cluster_id: (i % 12).to_string(),
            ..TweetRow::default()
        })
        .collect()
}

fn bench_npy_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("npy_decode");
    for count in [1_000usize, 10_000] {
        let encoded = match npy::encode(&matrix_values(count, DIMENSIONS), &[count, DIMENSIONS], false) {
            Ok(bytes) => bytes,
            Err(err) => {
                eprintln!("bench_npy_decode setup failed: {err}");
                return;
            }
        };
        group.throughput(Throughput::Bytes(encoded.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &encoded, |b, bytes| {
            b.iter(|| npy::decode(black_box(bytes)));
        });
    }
    group.finish();
}

fn bench_projection(c: &mut Criterion) {
    let mut group = c.benchmark_group("projection");
    group.measurement_time(Duration::from_secs(10));
    group.sample_size(20);

    for count in [500usize, 5_000] {
        let encoded = match npy::encode(&matrix_values(count, DIMENSIONS), &[count, DIMENSIONS], false) {
            Ok(bytes) => bytes,
            Err(err) => {
                eprintln!("bench_projection setup failed: {err}");
                return;
            }
        };
        let Ok(matrix) = npy::decode(&encoded) else {
            eprintln!("bench_projection decode failed");
            return;
        };
        let rows = rows(count);
        group.bench_with_input(BenchmarkId::from_parameter(count), &matrix, |b, matrix| {
            b.iter(|| project(black_box(&rows), matrix, ProjectionParams::default()));
        });
    }
    group.finish();
}

fn bench_dot(c: &mut Criterion) {
    let a: Vec<f64> = matrix_values(1, DIMENSIONS).into_iter().map(f64::from).collect();
    let b: Vec<f64> = a.iter().rev().copied().collect();
    c.bench_function("dot_384", |bench| {
        bench.iter(|| dot(black_box(&a), black_box(&b)));
    });
}

criterion_group!(
    name = pipeline_benches;
    config = Criterion::default().significance_level(0.05);
    targets =
        bench_npy_decode,
        bench_projection,
        bench_dot
);

criterion_main!(pipeline_benches);
