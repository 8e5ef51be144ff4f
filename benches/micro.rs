//! Micro-benchmarks for the storage hot paths: puts, point reads, range
//! reads, and the windowed-join executor.

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use rand::Rng;
use sage_tsdb::compute::{ComputeConfig, ComputeEngine};
use sage_tsdb::lsm::{LsmConfig, LsmEngine};
use sage_tsdb::record::{Record, TimeRange};
use sage_tsdb::resource::{ResourceManager, ResourceRequest};
use sage_tsdb::table::{TableManager, TableManagerConfig};
use tempfile::TempDir;

fn bench_put(c: &mut Criterion) {
    let tmp = TempDir::new().unwrap();
    let engine = LsmEngine::open(LsmConfig {
        data_dir: tmp.path().to_path_buf(),
        ..LsmConfig::default()
    })
    .unwrap();

    let mut ts = 0i64;
    c.bench_function("lsm_put", |b| {
        b.iter(|| {
            ts += 1;
            engine
                .put(ts, Record::new_scalar(ts, ts as f64))
                .unwrap();
        })
    });
}

fn bench_get(c: &mut Criterion) {
    let tmp = TempDir::new().unwrap();
    let engine = LsmEngine::open_at(tmp.path()).unwrap();
    for ts in 0..100_000i64 {
        engine.put(ts, Record::new_scalar(ts, ts as f64)).unwrap();
    }
    engine.flush().unwrap();

    let mut rng = rand::rng();
    c.bench_function("lsm_get_hit", |b| {
        b.iter(|| {
            let ts = rng.random_range(0..100_000i64);
            black_box(engine.get(ts).unwrap());
        })
    });
    c.bench_function("lsm_get_miss", |b| {
        b.iter(|| {
            let ts = rng.random_range(200_000..300_000i64);
            black_box(engine.get(ts).unwrap());
        })
    });
}

fn bench_range_query(c: &mut Criterion) {
    let tmp = TempDir::new().unwrap();
    let engine = LsmEngine::open_at(tmp.path()).unwrap();
    for ts in 0..100_000i64 {
        engine.put(ts, Record::new_scalar(ts, ts as f64)).unwrap();
    }
    engine.flush().unwrap();

    c.bench_function("lsm_range_1k", |b| {
        b.iter(|| {
            black_box(engine.range_query(50_000, 50_999).unwrap());
        })
    });
}

fn bench_window_join(c: &mut Criterion) {
    let tmp = TempDir::new().unwrap();
    let db = TableManager::new(TableManagerConfig {
        data_dir: tmp.path().to_path_buf(),
        memory_limit_bytes: 512 * 1024 * 1024,
    });
    db.create_pecj_tables("").unwrap();

    let s = db.get_stream_table("stream_s").unwrap();
    let r = db.get_stream_table("stream_r").unwrap();
    for i in 0..10_000i64 {
        s.insert(Record::new_scalar(i, 1.0).with_tag("key", (i % 100).to_string()))
            .unwrap();
        r.insert(Record::new_scalar(i, 2.0).with_tag("key", (i % 100).to_string()))
            .unwrap();
    }

    let resources = ResourceManager::with_limits(16, u64::MAX);
    let handle = resources
        .allocate_for_compute("bench", ResourceRequest::default())
        .unwrap();
    let engine = ComputeEngine::new("bench");
    engine
        .initialize(ComputeConfig::default(), Some(&db), Some(handle))
        .unwrap();

    let mut window_id = 0u64;
    c.bench_function("window_join_10k", |b| {
        b.iter(|| {
            window_id += 1;
            black_box(
                engine
                    .execute_window_join(window_id, TimeRange::new(0, 10_000))
                    .unwrap(),
            );
        })
    });
}

criterion_group!(
    benches,
    bench_put,
    bench_get,
    bench_range_query,
    bench_window_join
);
criterion_main!(benches);
