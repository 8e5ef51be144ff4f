use crate::compute::{ComputeConfig, ComputeEngine, ComputeError, OperatorType, WatermarkTag};
use crate::record::{Record, TimeRange};
use crate::resource::{ResourceManager, ResourceRequest};
use crate::table::{TableManager, TableManagerConfig};
use std::sync::Arc;
use tempfile::TempDir;

struct Fixture {
    manager: TableManager,
    resources: ResourceManager,
    _tmp: TempDir,
}

fn fixture() -> Fixture {
    let tmp = TempDir::new().unwrap();
    let manager = TableManager::new(TableManagerConfig {
        data_dir: tmp.path().to_path_buf(),
        memory_limit_bytes: 64 * 1024 * 1024,
    });
    manager.create_pecj_tables("").unwrap();
    Fixture {
        manager,
        resources: ResourceManager::with_limits(16, u64::MAX),
        _tmp: tmp,
    }
}

fn initialized_engine(fx: &Fixture, config: ComputeConfig) -> ComputeEngine {
    let handle = fx
        .resources
        .allocate_for_compute("engine", ResourceRequest::default())
        .unwrap();
    let engine = ComputeEngine::new("engine");
    engine
        .initialize(config, Some(&fx.manager), Some(handle))
        .unwrap();
    engine
}

fn keyed(ts: i64, key: i64, value: f64) -> Record {
    Record::new_scalar(ts, value).with_tag("key", key.to_string())
}

#[test]
fn test_initialize_validation() {
    let fx = fixture();
    let handle = fx
        .resources
        .allocate_for_compute("v", ResourceRequest::default())
        .unwrap();

    let engine = ComputeEngine::new("v");
    assert!(matches!(
        engine.initialize(ComputeConfig::default(), None, Some(Arc::clone(&handle))),
        Err(ComputeError::NullDatabase)
    ));
    assert!(matches!(
        engine.initialize(ComputeConfig::default(), Some(&fx.manager), None),
        Err(ComputeError::NullResourceHandle)
    ));

    let mut bad = ComputeConfig::default();
    bad.window_len_us = -1;
    assert!(matches!(
        engine.initialize(bad, Some(&fx.manager), Some(Arc::clone(&handle))),
        Err(ComputeError::InvalidConfig(_))
    ));

    engine
        .initialize(ComputeConfig::default(), Some(&fx.manager), Some(Arc::clone(&handle)))
        .unwrap();
    assert!(engine.is_initialized());

    // Double initialization is a consistency error.
    assert!(matches!(
        engine.initialize(ComputeConfig::default(), Some(&fx.manager), Some(handle)),
        Err(ComputeError::AlreadyInitialized)
    ));
}

#[test]
fn test_execute_requires_initialize() {
    let engine = ComputeEngine::new("uninit");
    assert!(matches!(
        engine.execute_window_join(1, TimeRange::new(0, 100)),
        Err(ComputeError::NotInitialized)
    ));
}

#[test]
fn test_invalid_range_rejected() {
    let fx = fixture();
    let engine = initialized_engine(&fx, ComputeConfig::default());
    assert!(matches!(
        engine.execute_window_join(1, TimeRange::new(2000, 2000)),
        Err(ComputeError::InvalidRange { .. })
    ));
    assert!(matches!(
        engine.execute_window_join(1, TimeRange::new(2000, 0)),
        Err(ComputeError::InvalidRange { .. })
    ));
}

#[test]
fn test_single_window_exact_join() {
    let fx = fixture();
    let s = fx.manager.get_stream_table("stream_s").unwrap();
    let r = fx.manager.get_stream_table("stream_r").unwrap();

    s.insert(keyed(1000, 1, 10.0)).unwrap();
    s.insert(keyed(1100, 2, 20.0)).unwrap();
    r.insert(keyed(1050, 1, 30.0)).unwrap();
    r.insert(keyed(1200, 3, 40.0)).unwrap();

    let engine = initialized_engine(&fx, ComputeConfig::default());
    let status = engine
        .execute_window_join(1, TimeRange::new(0, 2000))
        .unwrap();

    assert!(status.success);
    assert_eq!(status.window_id, 1);
    assert_eq!(status.exact_count, 1);
    assert_eq!(status.input_s_count, 2);
    assert_eq!(status.input_r_count, 2);
    assert!((status.selectivity - 0.25).abs() < 1e-12);
    assert!(!status.used_aqp);

    // The result row landed under the window id with the joined pair.
    let results = fx.manager.get_join_result_table("join_results").unwrap();
    let row = results.query_by_window(1).unwrap().unwrap();
    assert_eq!(row.join_count, 1);
    assert_eq!(row.timestamp, 2000);
    assert_eq!(row.algorithm, "IAWJ");
    let pairs = crate::table::results::deserialize_payload(&row.payload).unwrap();
    assert_eq!(pairs.len(), 1);
    assert_eq!(pairs[0].0.timestamp, 1000);
    assert_eq!(pairs[0].1.timestamp, 1050);
}

#[test]
fn test_empty_window() {
    let fx = fixture();
    let engine = initialized_engine(&fx, ComputeConfig::default());

    let status = engine
        .execute_window_join(9, TimeRange::new(0, 1000))
        .unwrap();
    assert!(status.success);
    assert_eq!(status.exact_count, 0);
    assert_eq!(status.input_s_count, 0);
    assert_eq!(status.input_r_count, 0);
    assert_eq!(status.selectivity, 0.0);

    let metrics = engine.get_metrics();
    assert_eq!(metrics.windows_completed, 1);
    assert!(metrics.latency_avg_ms >= 0.0);
}

#[test]
fn test_window_boundary_is_half_open() {
    let fx = fixture();
    let s = fx.manager.get_stream_table("stream_s").unwrap();
    let r = fx.manager.get_stream_table("stream_r").unwrap();

    // ts == start is in; ts == end is out.
    s.insert(keyed(1000, 1, 1.0)).unwrap();
    s.insert(keyed(2000, 1, 1.0)).unwrap();
    r.insert(keyed(1000, 1, 2.0)).unwrap();

    let engine = initialized_engine(&fx, ComputeConfig::default());
    let status = engine
        .execute_window_join(1, TimeRange::new(1000, 2000))
        .unwrap();
    assert_eq!(status.input_s_count, 1);
    assert_eq!(status.input_r_count, 1);
    assert_eq!(status.exact_count, 1);
}

#[test]
fn test_recomputation_overwrites_result_row() {
    let fx = fixture();
    let s = fx.manager.get_stream_table("stream_s").unwrap();
    let r = fx.manager.get_stream_table("stream_r").unwrap();
    s.insert(keyed(100, 1, 1.0)).unwrap();
    r.insert(keyed(200, 1, 2.0)).unwrap();

    let engine = initialized_engine(&fx, ComputeConfig::default());
    engine.execute_window_join(5, TimeRange::new(0, 1000)).unwrap();

    // Late data arrives; the window is recomputed.
    r.insert(keyed(300, 1, 3.0)).unwrap();
    let status = engine
        .execute_window_join(5, TimeRange::new(0, 1000))
        .unwrap();
    assert_eq!(status.exact_count, 2);

    let results = fx.manager.get_join_result_table("join_results").unwrap();
    assert_eq!(results.len().unwrap(), 1);
    assert_eq!(results.query_by_window(5).unwrap().unwrap().join_count, 2);
}

#[test]
fn test_aqp_fallback_on_timeout() {
    let fx = fixture();
    let s = fx.manager.get_stream_table("stream_s").unwrap();
    let r = fx.manager.get_stream_table("stream_r").unwrap();

    // Enough tuples that feeding exceeds a 1 ms deadline; all share
    // keys so the estimate is positive.
    let mut s_batch = Vec::new();
    let mut r_batch = Vec::new();
    for i in 0..100_000i64 {
        s_batch.push(keyed(i, i % 100, 1.0));
        r_batch.push(keyed(i, i % 100, 2.0));
    }
    s.insert_batch(s_batch).unwrap();
    r.insert_batch(r_batch).unwrap();

    let mut config = ComputeConfig::default();
    config.timeout_ms = 1;
    config.enable_aqp = true;
    let engine = initialized_engine(&fx, config);

    let status = engine
        .execute_window_join(1, TimeRange::new(0, 100_000))
        .unwrap();
    assert!(status.success);
    assert!(status.used_aqp);
    assert!(status.timeout_occurred);
    assert!(status.aqp_estimate > 0.0);

    let metrics = engine.get_metrics();
    assert_eq!(metrics.windows_timeout, 1);
    assert!(metrics.aqp_invocations >= 1);

    let results = fx.manager.get_join_result_table("join_results").unwrap();
    let row = results.query_by_window(1).unwrap().unwrap();
    assert!(row.used_aqp);
    assert!(row.has_aqp_estimate());
}

#[test]
fn test_timeout_without_aqp_fails() {
    let fx = fixture();
    let s = fx.manager.get_stream_table("stream_s").unwrap();
    let r = fx.manager.get_stream_table("stream_r").unwrap();
    let mut s_batch = Vec::new();
    let mut r_batch = Vec::new();
    for i in 0..100_000i64 {
        s_batch.push(keyed(i, i % 100, 1.0));
        r_batch.push(keyed(i, i % 100, 2.0));
    }
    s.insert_batch(s_batch).unwrap();
    r.insert_batch(r_batch).unwrap();

    let mut config = ComputeConfig::default();
    config.timeout_ms = 1;
    config.enable_aqp = false;
    let engine = initialized_engine(&fx, config);

    assert!(matches!(
        engine.execute_window_join(1, TimeRange::new(0, 100_000)),
        Err(ComputeError::Timeout)
    ));
    let metrics = engine.get_metrics();
    assert_eq!(metrics.windows_timeout, 1);
    assert_eq!(metrics.windows_failed, 1);

    // No result row was written for the failed window.
    let results = fx.manager.get_join_result_table("join_results").unwrap();
    assert!(results.query_by_window(1).unwrap().is_none());
}

#[test]
fn test_normalization_consistent_across_operators() {
    // The same window must produce the same exact count under every
    // exact operator variant.
    let fx = fixture();
    let s = fx.manager.get_stream_table("stream_s").unwrap();
    let r = fx.manager.get_stream_table("stream_r").unwrap();
    for i in 0..50i64 {
        s.insert(keyed(1_000_000 + i, i % 5, 1.0)).unwrap();
        r.insert(keyed(1_000_000 + 50 + i, i % 5, 2.0)).unwrap();
    }

    let mut counts = Vec::new();
    for (idx, operator) in [OperatorType::Iawj, OperatorType::Shj, OperatorType::Prj]
        .into_iter()
        .enumerate()
    {
        let handle = fx
            .resources
            .allocate_for_compute(&format!("norm-{idx}"), ResourceRequest::default())
            .unwrap();
        let mut config = ComputeConfig::default();
        config.operator = operator;
        let engine = ComputeEngine::new(format!("norm-{idx}"));
        engine
            .initialize(config, Some(&fx.manager), Some(handle))
            .unwrap();
        let status = engine
            .execute_window_join(idx as u64 + 1, TimeRange::new(1_000_000, 1_000_200))
            .unwrap();
        counts.push(status.exact_count);
    }
    assert!(counts.windows(2).all(|w| w[0] == w[1]), "counts: {counts:?}");
}

#[test]
fn test_lateness_watermark_drives_compensation() {
    // Record timestamps sit decades behind the wall clock, so under
    // lateness watermarking every tuple trails the computation-time
    // arrival clock by far more than the allowance and IMA inflates
    // its estimate above the exact count.
    let fx = fixture();
    let s = fx.manager.get_stream_table("stream_s").unwrap();
    let r = fx.manager.get_stream_table("stream_r").unwrap();
    s.insert(keyed(1000, 1, 1.0)).unwrap();
    r.insert(keyed(1050, 1, 2.0)).unwrap();

    let mut config = ComputeConfig::default();
    config.operator = OperatorType::Ima;
    config.enable_aqp = true;
    config.watermark_tag = WatermarkTag::Lateness;
    config.lateness_ms = 1000;
    let engine = initialized_engine(&fx, config);

    let status = engine
        .execute_window_join(1, TimeRange::new(0, 2000))
        .unwrap();
    assert_eq!(status.exact_count, 1);
    assert!(
        status.aqp_estimate > status.exact_count as f64,
        "late tuples must inflate the estimate, got {}",
        status.aqp_estimate
    );
}

#[test]
fn test_arrival_watermark_keeps_estimate_exact() {
    // Same data under arrival watermarking: tuples arrive on the event
    // clock, nothing is late, and the estimate collapses to the exact
    // count.
    let fx = fixture();
    let s = fx.manager.get_stream_table("stream_s").unwrap();
    let r = fx.manager.get_stream_table("stream_r").unwrap();
    s.insert(keyed(1000, 1, 1.0)).unwrap();
    r.insert(keyed(1050, 1, 2.0)).unwrap();

    let mut config = ComputeConfig::default();
    config.operator = OperatorType::Ima;
    config.enable_aqp = true;
    let engine = initialized_engine(&fx, config);

    let status = engine
        .execute_window_join(1, TimeRange::new(0, 2000))
        .unwrap();
    assert_eq!(status.exact_count, 1);
    assert_eq!(status.aqp_estimate, status.exact_count as f64);
}

#[test]
fn test_reset_clears_metrics_not_tables() {
    let fx = fixture();
    let s = fx.manager.get_stream_table("stream_s").unwrap();
    let r = fx.manager.get_stream_table("stream_r").unwrap();
    s.insert(keyed(100, 1, 1.0)).unwrap();
    r.insert(keyed(200, 1, 2.0)).unwrap();

    let engine = initialized_engine(&fx, ComputeConfig::default());
    engine.execute_window_join(1, TimeRange::new(0, 1000)).unwrap();
    assert_eq!(engine.get_metrics().windows_completed, 1);

    engine.reset();
    assert_eq!(engine.get_metrics().windows_completed, 0);

    let results = fx.manager.get_join_result_table("join_results").unwrap();
    assert!(results.query_by_window(1).unwrap().is_some());
}
