use crate::compute::{ComputeConfig, ComputeEngine};
use crate::record::Record;
use crate::resource::{ResourceManager, ResourceRequest};
use crate::scheduler::{SchedulerConfig, WindowScheduler, WindowType};
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

fn scheduler(fx: &Fixture, config: SchedulerConfig) -> WindowScheduler {
    let handle = fx
        .resources
        .allocate("scheduler", ResourceRequest::default())
        .unwrap();
    let engine_handle = fx
        .resources
        .allocate_for_compute("engine", ResourceRequest::default())
        .unwrap();

    let engine = Arc::new(ComputeEngine::new("engine"));
    engine
        .initialize(ComputeConfig::default(), Some(&fx.manager), Some(engine_handle))
        .unwrap();

    let scheduler = WindowScheduler::new(config, engine, handle);
    let s = fx.manager.get_stream_table("stream_s").unwrap();
    let r = fx.manager.get_stream_table("stream_r").unwrap();
    scheduler.watch_table(&s, 0);
    scheduler.watch_table(&r, 1);
    scheduler
}

#[test]
fn test_tumbling_window_binning() {
    let fx = fixture();
    let sched = scheduler(
        &fx,
        SchedulerConfig {
            window_len_us: 1000,
            ..SchedulerConfig::default()
        },
    );

    sched.on_data_inserted("stream_s", 250, 1);
    sched.on_data_inserted("stream_s", 999, 1);
    sched.on_data_inserted("stream_s", 1000, 1);
    sched.on_data_inserted("stream_r", 2500, 1);

    // Three distinct tumbling windows: [0,1000), [1000,2000), [2000,3000).
    assert_eq!(sched.window_count(), 3);

    let w0 = sched.window_info(0).unwrap();
    assert_eq!(w0.range.start, 0);
    assert_eq!(w0.range.end, 1000);
    assert_eq!(w0.s_count, 2);
    assert_eq!(w0.r_count, 0);

    let w2 = sched.window_info(2).unwrap();
    assert_eq!(w2.r_count, 1);
}

#[test]
fn test_sliding_window_membership() {
    let fx = fixture();
    let sched = scheduler(
        &fx,
        SchedulerConfig {
            window_type: WindowType::Sliding,
            window_len_us: 1000,
            slide_len_us: 500,
            ..SchedulerConfig::default()
        },
    );

    // ts=750 belongs to windows starting at 0 and 500.
    sched.on_data_inserted("stream_s", 750, 1);
    assert_eq!(sched.window_count(), 2);

    let w0 = sched.window_info(0).unwrap();
    assert_eq!(w0.range.start, 0);
    let w1 = sched.window_info(1).unwrap();
    assert_eq!(w1.range.start, 500);
    assert_eq!(w1.range.end, 1500);
}

#[test]
fn test_session_window_gap_opens_new_window() {
    let fx = fixture();
    let sched = scheduler(
        &fx,
        SchedulerConfig {
            window_type: WindowType::Session,
            window_len_us: 1000,
            session_gap_us: 100,
            ..SchedulerConfig::default()
        },
    );

    sched.on_data_inserted("stream_s", 10, 1);
    sched.on_data_inserted("stream_s", 50, 1); // within gap — same session
    assert_eq!(sched.window_count(), 1);

    sched.on_data_inserted("stream_s", 500, 1); // gap exceeded — new session
    assert_eq!(sched.window_count(), 2);

    let first = sched.window_info(0).unwrap();
    assert!(first.range.end > 50);
    assert_eq!(first.s_count, 2);
}

#[test]
fn test_watermark_advances_with_slack() {
    let fx = fixture();
    let sched = scheduler(
        &fx,
        SchedulerConfig {
            watermark_slack_us: 100,
            ..SchedulerConfig::default()
        },
    );

    sched.on_data_inserted("stream_s", 1000, 1);
    assert_eq!(sched.watermark(), 900);

    // Watermark never regresses.
    sched.on_data_inserted("stream_s", 500, 1);
    assert_eq!(sched.watermark(), 900);

    sched.on_data_inserted("stream_s", 2000, 1);
    assert_eq!(sched.watermark(), 1900);
}

#[test]
fn test_unwatched_table_is_ignored() {
    let fx = fixture();
    let sched = scheduler(&fx, SchedulerConfig::default());
    sched.on_data_inserted("mystery_table", 1000, 1);
    assert_eq!(sched.window_count(), 0);
}

#[test]
fn test_stream_insert_notifies_scheduler() {
    let fx = fixture();
    let sched = scheduler(
        &fx,
        SchedulerConfig {
            window_len_us: 1_000_000,
            ..SchedulerConfig::default()
        },
    );

    // Inserting through the table fires the listener into the scheduler.
    let s = fx.manager.get_stream_table("stream_s").unwrap();
    s.insert(Record::new_scalar(1500, 1.0).with_tag("key", "1"))
        .unwrap();

    assert_eq!(sched.window_count(), 1);
    let info = sched.window_info(0).unwrap();
    assert_eq!(info.s_count, 1);

    // The window range was published back to the table.
    assert!(s.query_window(0).is_ok());
}
