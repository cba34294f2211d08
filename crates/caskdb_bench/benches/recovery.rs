//! Startup replay benchmarks.

use caskdb_core::{Config, Engine};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tempfile::TempDir;

/// Build a closed store with `count` keys, each written twice.
fn populated_store(count: usize) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::default()
        .compaction(false)
        .max_segment_size(256 * 1024);
    let engine = Engine::open_with_config(dir.path(), config).unwrap();
    for round in 0..2 {
        for i in 0..count {
            let value = format!("value-{round}-{i:08}");
            engine.set(format!("key-{i:08}").as_bytes(), value.as_bytes()).unwrap();
        }
    }
    engine.close().unwrap();
    dir
}

/// Benchmark opening a store, which replays every segment.
fn bench_open(c: &mut Criterion) {
    let mut group = c.benchmark_group("open");
    group.sample_size(20);

    for count in [1000, 10000, 50000].iter() {
        let dir = populated_store(*count);
        group.throughput(Throughput::Elements((*count * 2) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, _| {
            b.iter(|| {
                let config = Config::default().compaction(false);
                let engine = Engine::open_with_config(black_box(dir.path()), config).unwrap();
                black_box(engine.len());
                engine.close().unwrap();
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_open);
criterion_main!(benches);
