//! Engine operation benchmarks.

use caskdb_core::{Config, Engine};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::Rng;
use tempfile::TempDir;

/// Generate random data of the specified size.
fn random_data(size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.gen()).collect()
}

fn open_engine() -> (TempDir, Engine) {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::open_with_config(dir.path(), Config::default().compaction(false)).unwrap();
    (dir, engine)
}

/// Benchmark single key writes.
fn bench_set(c: &mut Criterion) {
    let mut group = c.benchmark_group("set");

    for size in [64, 256, 1024, 4096].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let (_dir, engine) = open_engine();
            let data = random_data(size);
            let mut i = 0u64;

            b.iter(|| {
                let key = format!("key-{i}");
                i += 1;
                engine.set(key.as_bytes(), black_box(&data)).unwrap();
            });
        });
    }
    group.finish();
}

/// Benchmark overwriting a small hot key set.
fn bench_overwrite(c: &mut Criterion) {
    c.bench_function("overwrite", |b| {
        let (_dir, engine) = open_engine();
        let data = random_data(256);
        let mut i = 0u64;

        b.iter(|| {
            let key = format!("hot-{}", i % 16);
            i += 1;
            engine.set(key.as_bytes(), black_box(&data)).unwrap();
        });
    });
}

/// Benchmark point reads.
fn bench_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("get");

    for key_count in [100, 1000, 10000].iter() {
        group.bench_with_input(
            BenchmarkId::from_parameter(key_count),
            key_count,
            |b, &count| {
                let (_dir, engine) = open_engine();
                for i in 0..count {
                    engine.set(format!("key-{i}").as_bytes(), &random_data(256)).unwrap();
                }
                engine.flush_all().unwrap();
                let mut rng = rand::thread_rng();

                b.iter(|| {
                    let key = format!("key-{}", rng.gen_range(0..count));
                    let value = engine.get(black_box(key.as_bytes())).unwrap();
                    black_box(value);
                });
            },
        );
    }
    group.finish();
}

/// Benchmark key deletion.
fn bench_delete(c: &mut Criterion) {
    c.bench_function("delete", |b| {
        let (_dir, engine) = open_engine();
        let mut i = 0u64;

        b.iter_batched(
            || {
                let key = format!("key-{i}");
                i += 1;
                engine.set(key.as_bytes(), &random_data(64)).unwrap();
                key
            },
            |key| {
                engine.delete(black_box(key.as_bytes())).unwrap();
            },
            criterion::BatchSize::SmallInput,
        );
    });
}

/// Benchmark a forced merge of half-dead segments.
fn bench_merge(c: &mut Criterion) {
    c.bench_function("merge_1000_keys", |b| {
        b.iter_batched(
            || {
                let dir = tempfile::tempdir().unwrap();
                let config = Config::default()
                    .compaction(false)
                    .max_segment_size(16 * 1024)
                    .merge_pause(std::time::Duration::ZERO);
                let engine = Engine::open_with_config(dir.path(), config).unwrap();
                for round in 0..2 {
                    for i in 0..1000 {
                        let value = format!("value-{round}-{i}");
                        engine.set(format!("key-{i}").as_bytes(), value.as_bytes()).unwrap();
                    }
                }
                (dir, engine)
            },
            |(_dir, engine)| {
                let result = engine.merge().unwrap();
                black_box(result);
            },
            criterion::BatchSize::PerIteration,
        );
    });
}

criterion_group!(
    benches,
    bench_set,
    bench_overwrite,
    bench_get,
    bench_delete,
    bench_merge,
);
criterion_main!(benches);
