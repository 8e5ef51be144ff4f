use crate::resource::{ResourceManager, ResourceRequest, ResourceUsage};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

fn request(threads: usize) -> ResourceRequest {
    ResourceRequest {
        threads,
        memory_soft_bytes: 1024,
        memory_hard_bytes: 2048,
        ..ResourceRequest::default()
    }
}

#[test]
fn test_submit_task_runs() {
    let manager = ResourceManager::with_limits(8, u64::MAX);
    let handle = manager.allocate("writer", request(2)).unwrap();

    let counter = Arc::new(AtomicUsize::new(0));
    for _ in 0..10 {
        let counter = Arc::clone(&counter);
        assert!(handle.submit_task(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
    }

    // Release drains the queue before joining workers.
    manager.release("writer").unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 10);
}

#[test]
fn test_allocate_same_name_returns_existing() {
    let manager = ResourceManager::with_limits(8, u64::MAX);
    let a = manager.allocate("engine", request(2)).unwrap();
    let b = manager.allocate("engine", request(4)).unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(b.get_allocated().threads, 2);
}

#[test]
fn test_submit_after_release_fails() {
    let manager = ResourceManager::with_limits(8, u64::MAX);
    let handle = manager.allocate("short-lived", request(1)).unwrap();
    assert!(handle.is_valid());

    manager.release("short-lived").unwrap();
    assert!(!handle.is_valid());
    assert!(!handle.submit_task(|| {}));
}

#[test]
fn test_zero_threads_gets_default() {
    let manager = ResourceManager::with_limits(32, u64::MAX);
    let handle = manager.allocate("defaulted", request(0)).unwrap();
    assert_eq!(handle.get_allocated().threads, 4);
    manager.release("defaulted").unwrap();
}

#[test]
fn test_report_and_query_usage() {
    let manager = ResourceManager::with_limits(8, u64::MAX);
    let handle = manager.allocate("compute", request(1)).unwrap();

    handle.report_usage(ResourceUsage {
        threads_used: 1,
        memory_used_bytes: 4096,
        tuples_processed: 500,
        ..ResourceUsage::default()
    });

    let usage = manager.query_usage("compute").unwrap();
    assert_eq!(usage.memory_used_bytes, 4096);
    assert_eq!(usage.tuples_processed, 500);
    manager.release("compute").unwrap();
}

#[test]
fn test_total_usage_aggregates() {
    let manager = ResourceManager::with_limits(8, u64::MAX);
    let a = manager.allocate("a", request(1)).unwrap();
    let b = manager.allocate("b", request(1)).unwrap();

    a.report_usage(ResourceUsage {
        tuples_processed: 10,
        ..ResourceUsage::default()
    });
    b.report_usage(ResourceUsage {
        tuples_processed: 32,
        ..ResourceUsage::default()
    });

    assert_eq!(manager.get_total_usage().tuples_processed, 42);
}

#[test]
fn test_tasks_run_concurrently_across_workers() {
    let manager = ResourceManager::with_limits(8, u64::MAX);
    let handle = manager.allocate("parallel", request(4)).unwrap();

    let (tx, rx) = crossbeam::channel::unbounded();
    for i in 0..4usize {
        let tx = tx.clone();
        handle.submit_task(move || {
            std::thread::sleep(Duration::from_millis(30));
            let _ = tx.send(i);
        });
    }

    // Four 30 ms tasks across 4 workers should all land well inside 1 s.
    let mut seen = Vec::new();
    for _ in 0..4 {
        seen.push(rx.recv_timeout(Duration::from_secs(1)).unwrap());
    }
    seen.sort_unstable();
    assert_eq!(seen, vec![0, 1, 2, 3]);
    manager.release("parallel").unwrap();
}

#[test]
fn test_release_unknown_name_errors() {
    let manager = ResourceManager::with_limits(8, u64::MAX);
    assert!(manager.release("ghost").is_err());
}
