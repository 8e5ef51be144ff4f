//! Window scheduler — event/time-driven window lifecycle management.
//!
//! The scheduler watches stream tables, tracks a watermark, opens
//! windows as data arrives, decides when each window may fire, and
//! dispatches triggered windows to the compute engine through a resource
//! handle.
//!
//! # Window kinds
//!
//! - **Tumbling** — window *n* spans `[n·len, (n+1)·len)`.
//! - **Sliding** — windows spaced by `slide`; a record belongs to every
//!   window whose `[start, start+len)` covers its timestamp.
//! - **Session** — a new window opens when an arrival exceeds the
//!   current window's end plus the inactivity gap; the window's end
//!   extends with each arrival and closes once the gap elapses.
//!
//! # Trigger policies
//!
//! - **TimeBased** — `watermark ≥ window.end + slack`.
//! - **CountBased** — `s_count + r_count ≥ threshold`.
//! - **Hybrid** — either condition.
//! - **Manual** — only [`WindowScheduler::trigger_window`] fires.
//!
//! # Concurrency
//!
//! One scheduler thread drives time triggers; insertion threads call
//! [`WindowScheduler::on_data_inserted`] concurrently. A mutex guards
//! the window map and pending heap; a condition variable wakes the
//! scheduler when the watermark advances or a window becomes ready.
//! Triggered windows are drained from a min-heap keyed by window id, at
//! most `max_concurrent_windows` in flight at a time.

#[cfg(test)]
mod tests;

use std::{
    cmp::Reverse,
    collections::{BTreeMap, BinaryHeap, HashMap},
    sync::{
        Arc, Condvar, Mutex, RwLock, Weak,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    thread::JoinHandle,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::compute::{ComputeEngine, ComputeStatus};
use crate::record::TimeRange;
use crate::resource::ResourceHandle;
use crate::table::StreamTable;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors surfaced by the window scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The scheduler is already running.
    #[error("scheduler already running")]
    AlreadyRunning,

    /// No window exists under the given id.
    #[error("window {0} not found")]
    WindowNotFound(u64),

    /// Internal invariant violation (poisoned lock, dead handle).
    #[error("Internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Configuration
// ------------------------------------------------------------------------------------------------

/// Window lifecycle kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WindowType {
    #[default]
    Tumbling,
    Sliding,
    Session,
}

/// When a window becomes eligible for computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TriggerPolicy {
    #[default]
    TimeBased,
    CountBased,
    Hybrid,
    Manual,
}

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub window_type: WindowType,
    /// Window length in microseconds.
    pub window_len_us: i64,
    /// Slide between sliding windows, microseconds.
    pub slide_len_us: i64,
    /// Session inactivity gap, microseconds.
    pub session_gap_us: i64,
    pub trigger_policy: TriggerPolicy,
    /// Interval between time-trigger evaluations.
    pub trigger_check_interval_ms: u64,
    /// Arrival-count threshold for count-based triggering.
    pub trigger_count_threshold: u64,
    /// Maximum tolerated event delay, microseconds.
    pub max_delay_us: i64,
    /// Watermark lag behind the newest timestamp, microseconds.
    pub watermark_slack_us: i64,
    pub allow_late_data: bool,
    pub max_pending_windows: usize,
    pub max_concurrent_windows: usize,
    /// Reserved; adaptive batching is not implemented yet.
    pub adaptive_scheduling: bool,
    pub metrics_report_interval_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            window_type: WindowType::Tumbling,
            window_len_us: 1_000_000,
            slide_len_us: 1_000_000,
            session_gap_us: 30_000_000,
            trigger_policy: TriggerPolicy::TimeBased,
            trigger_check_interval_ms: 50,
            trigger_count_threshold: 10_000,
            max_delay_us: 100_000,
            watermark_slack_us: 50_000,
            allow_late_data: false,
            max_pending_windows: 1024,
            max_concurrent_windows: 4,
            adaptive_scheduling: false,
            metrics_report_interval_ms: 1_000,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Window bookkeeping
// ------------------------------------------------------------------------------------------------

/// Lifecycle record for one window.
#[derive(Debug, Clone)]
pub struct WindowInfo {
    pub window_id: u64,
    pub range: TimeRange,
    pub ready: bool,
    pub computing: bool,
    pub completed: bool,
    pub has_late_data: bool,
    /// Arrivals attributed to stream S (id 0).
    pub s_count: u64,
    /// Arrivals attributed to stream R (id 1).
    pub r_count: u64,
    pub created_at_ms: i64,
    pub triggered_at_ms: i64,
    pub completed_at_ms: i64,
}

impl WindowInfo {
    fn new(window_id: u64, range: TimeRange) -> Self {
        Self {
            window_id,
            range,
            ready: false,
            computing: false,
            completed: false,
            has_late_data: false,
            s_count: 0,
            r_count: 0,
            created_at_ms: now_ms(),
            triggered_at_ms: 0,
            completed_at_ms: 0,
        }
    }
}

/// Counters exposed by [`WindowScheduler::get_metrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerMetrics {
    pub windows_created: u64,
    pub windows_triggered: u64,
    pub total_windows_completed: u64,
    pub total_windows_failed: u64,
    pub late_requeues: u64,
    pub total_compute_ms: u64,
}

/// Callback fired when a window completes successfully.
pub type CompletionCallback = Arc<dyn Fn(&ComputeStatus) + Send + Sync>;

/// Callback fired when a window fails: `(window_id, error message)`.
pub type FailureCallback = Arc<dyn Fn(u64, &str) + Send + Sync>;

struct SchedState {
    watermark: i64,
    windows: BTreeMap<u64, WindowInfo>,
    pending: BinaryHeap<Reverse<u64>>,
    /// Session windows get sequential ids independent of time binning.
    next_session_id: u64,
    /// Id of the currently open session window, if any.
    open_session: Option<u64>,
}

struct Shared {
    config: SchedulerConfig,
    engine: Arc<ComputeEngine>,
    handle: Arc<ResourceHandle>,
    /// Watched table name → stream id (0 = S, 1 = R).
    tables: RwLock<HashMap<String, u8>>,
    /// Handles to watched tables, used to publish window registrations.
    watched: RwLock<Vec<Arc<StreamTable>>>,
    state: Mutex<SchedState>,
    wakeup: Condvar,
    running: AtomicBool,
    in_flight: AtomicUsize,
    metrics: Mutex<SchedulerMetrics>,
    on_complete: RwLock<Vec<CompletionCallback>>,
    on_failure: RwLock<Vec<FailureCallback>>,
}

// ------------------------------------------------------------------------------------------------
// WindowScheduler
// ------------------------------------------------------------------------------------------------

/// Event/time-driven window scheduler.
pub struct WindowScheduler {
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl WindowScheduler {
    /// Creates a scheduler over the given engine and resource handle.
    pub fn new(
        config: SchedulerConfig,
        engine: Arc<ComputeEngine>,
        handle: Arc<ResourceHandle>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                engine,
                handle,
                tables: RwLock::new(HashMap::new()),
                watched: RwLock::new(Vec::new()),
                state: Mutex::new(SchedState {
                    watermark: i64::MIN,
                    windows: BTreeMap::new(),
                    pending: BinaryHeap::new(),
                    next_session_id: 0,
                    open_session: None,
                }),
                wakeup: Condvar::new(),
                running: AtomicBool::new(false),
                in_flight: AtomicUsize::new(0),
                metrics: Mutex::new(SchedulerMetrics::default()),
                on_complete: RwLock::new(Vec::new()),
                on_failure: RwLock::new(Vec::new()),
            }),
            thread: Mutex::new(None),
        }
    }

    /// Registers a stream table under a stream id (0 = S, 1 = R) and
    /// subscribes to its insert notifications.
    ///
    /// The listener holds only a weak reference, so dropping the
    /// scheduler does not leak through the table.
    pub fn watch_table(&self, table: &Arc<StreamTable>, stream_id: u8) {
        if let Ok(mut tables) = self.shared.tables.write() {
            tables.insert(table.name().to_string(), stream_id);
        }
        if let Ok(mut watched) = self.shared.watched.write() {
            watched.push(Arc::clone(table));
        }

        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        table.add_listener(Arc::new(move |name, ts, count| {
            if let Some(shared) = weak.upgrade() {
                Shared::on_data_inserted(&shared, name, ts, count);
            }
        }));
        info!(table = table.name(), stream_id, "table watched");
    }

    /// Entry point for insert notifications; also callable directly by
    /// embedders that bypass stream-table listeners.
    pub fn on_data_inserted(&self, table_name: &str, timestamp: i64, count: usize) {
        Shared::on_data_inserted(&self.shared, table_name, timestamp, count);
    }

    /// Spawns the scheduler thread.
    pub fn start(&self) -> Result<(), SchedulerError> {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return Err(SchedulerError::AlreadyRunning);
        }

        let shared = Arc::clone(&self.shared);
        let handle = std::thread::Builder::new()
            .name("window-scheduler".into())
            .spawn(move || scheduler_loop(shared))
            .map_err(|e| SchedulerError::Internal(e.to_string()))?;

        let mut guard = self
            .thread
            .lock()
            .map_err(|_| SchedulerError::Internal("Mutex poisoned".into()))?;
        *guard = Some(handle);
        info!("window scheduler started");
        Ok(())
    }

    /// Stops the scheduler thread.
    ///
    /// `wait_completion = false` marks the scheduler stopped without
    /// interrupting in-flight tasks; `true` additionally blocks until
    /// the pending heap is empty and no window is computing.
    pub fn stop(&self, wait_completion: bool) {
        self.shared.running.store(false, Ordering::SeqCst);
        self.shared.wakeup.notify_all();

        if let Ok(mut guard) = self.thread.lock()
            && let Some(handle) = guard.take()
        {
            let _ = handle.join();
        }

        if wait_completion {
            // Keep draining the pending heap until every triggered
            // window has returned.
            loop {
                let drained = match self.shared.state.lock() {
                    Ok(mut state) => {
                        dispatch(&self.shared, &mut state);
                        state.pending.is_empty()
                    }
                    Err(_) => true,
                };
                if drained && self.shared.in_flight.load(Ordering::SeqCst) == 0 {
                    break;
                }
                std::thread::sleep(Duration::from_millis(5));
            }
        }
        info!("window scheduler stopped");
    }

    /// Whether the scheduler thread is running.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Manually fires a window (the only trigger under
    /// [`TriggerPolicy::Manual`]).
    pub fn trigger_window(&self, window_id: u64) -> Result<(), SchedulerError> {
        let mut state = self
            .shared
            .state
            .lock()
            .map_err(|_| SchedulerError::Internal("Mutex poisoned".into()))?;
        let window = state
            .windows
            .get_mut(&window_id)
            .ok_or(SchedulerError::WindowNotFound(window_id))?;
        if window.computing || window.completed {
            return Ok(());
        }
        window.ready = true;
        state.pending.push(Reverse(window_id));
        drop(state);
        self.shared.wakeup.notify_all();
        Ok(())
    }

    /// Registers a completion callback.
    pub fn on_window_complete(&self, callback: CompletionCallback) {
        if let Ok(mut callbacks) = self.shared.on_complete.write() {
            callbacks.push(callback);
        }
    }

    /// Registers a failure callback.
    pub fn on_window_failure(&self, callback: FailureCallback) {
        if let Ok(mut callbacks) = self.shared.on_failure.write() {
            callbacks.push(callback);
        }
    }

    /// Current watermark (µs domain of the watched streams).
    pub fn watermark(&self) -> i64 {
        self.shared
            .state
            .lock()
            .map(|s| s.watermark)
            .unwrap_or(i64::MIN)
    }

    /// Snapshot of one window's lifecycle record.
    pub fn window_info(&self, window_id: u64) -> Option<WindowInfo> {
        self.shared
            .state
            .lock()
            .ok()
            .and_then(|s| s.windows.get(&window_id).cloned())
    }

    /// Number of windows currently tracked.
    pub fn window_count(&self) -> usize {
        self.shared.state.lock().map(|s| s.windows.len()).unwrap_or(0)
    }

    /// Scheduler counters.
    pub fn get_metrics(&self) -> SchedulerMetrics {
        self.shared
            .metrics
            .lock()
            .map(|m| m.clone())
            .unwrap_or_default()
    }
}

impl Drop for WindowScheduler {
    fn drop(&mut self) {
        self.shared.running.store(false, Ordering::SeqCst);
        self.shared.wakeup.notify_all();
        if let Ok(mut guard) = self.thread.lock()
            && let Some(handle) = guard.take()
        {
            let _ = handle.join();
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Shared implementation
// ------------------------------------------------------------------------------------------------

impl Shared {
    /// Handles one insert notification from a watched table.
    fn on_data_inserted(shared: &Arc<Shared>, table_name: &str, timestamp: i64, count: usize) {
        let stream_id = match shared.tables.read() {
            Ok(tables) => match tables.get(table_name) {
                Some(id) => *id,
                None => return,
            },
            Err(_) => return,
        };

        let mut new_windows: Vec<(u64, TimeRange)> = Vec::new();
        {
            let Ok(mut state) = shared.state.lock() else {
                return;
            };

            // (b) Advance the watermark.
            let candidate = timestamp.saturating_sub(shared.config.watermark_slack_us);
            if candidate > state.watermark {
                state.watermark = candidate;
            }

            // (c) Open any windows this timestamp belongs to. Session
            // windows may extend, so ranges are (re-)published every
            // arrival; registration is idempotent on the tables.
            for (id, range) in shared.windows_for(&mut state, timestamp) {
                if !state.windows.contains_key(&id) {
                    state.windows.insert(id, WindowInfo::new(id, range));
                    if let Ok(mut metrics) = shared.metrics.lock() {
                        metrics.windows_created += 1;
                    }
                }
                new_windows.push((id, range));
            }

            // (a) Update arrival counters; requeue late data.
            let mut requeues = Vec::new();
            let allow_late = shared.config.allow_late_data;
            for window in state.windows.values_mut() {
                if !window.range.contains(timestamp) {
                    continue;
                }
                if stream_id == 0 {
                    window.s_count += count as u64;
                } else {
                    window.r_count += count as u64;
                }
                if window.completed && allow_late && !window.has_late_data {
                    window.has_late_data = true;
                    window.completed = false;
                    window.ready = true;
                    requeues.push(window.window_id);
                }
            }
            for id in requeues {
                state.pending.push(Reverse(id));
                if let Ok(mut metrics) = shared.metrics.lock() {
                    metrics.late_requeues += 1;
                }
                debug!(window_id = id, "late data requeued window");
            }

            // Count-based triggers fire immediately on arrival.
            shared.evaluate_triggers(&mut state);
        }

        // Publish new window ranges to every watched table, outside the
        // scheduler lock.
        if !new_windows.is_empty()
            && let Ok(watched) = shared.watched.read()
        {
            for table in watched.iter() {
                for (id, range) in &new_windows {
                    table.register_window(*id, *range);
                }
            }
        }

        shared.wakeup.notify_all();
    }

    /// Window ids (and ranges) whose span covers `timestamp`.
    fn windows_for(&self, state: &mut SchedState, timestamp: i64) -> Vec<(u64, TimeRange)> {
        let len = self.config.window_len_us.max(1);
        match self.config.window_type {
            WindowType::Tumbling => {
                let n = timestamp.div_euclid(len);
                let start = n * len;
                vec![(n as u64, TimeRange::new(start, start + len))]
            }
            WindowType::Sliding => {
                let slide = self.config.slide_len_us.max(1);
                let first = (timestamp - len).div_euclid(slide) + 1;
                let last = timestamp.div_euclid(slide);
                (first..=last)
                    .filter(|k| *k >= 0)
                    .map(|k| {
                        let start = k * slide;
                        (k as u64, TimeRange::new(start, start + len))
                    })
                    .collect()
            }
            WindowType::Session => {
                let gap = self.config.session_gap_us.max(1);
                if let Some(open_id) = state.open_session
                    && let Some(window) = state.windows.get_mut(&open_id)
                    && timestamp <= window.range.end + gap
                {
                    // Arrival extends the open session.
                    if timestamp >= window.range.end {
                        window.range.end = timestamp + 1;
                    }
                    return vec![(open_id, window.range)];
                }
                let id = state.next_session_id;
                state.next_session_id += 1;
                state.open_session = Some(id);
                vec![(id, TimeRange::new(timestamp, timestamp + 1))]
            }
        }
    }

    /// Marks windows ready according to the trigger policy and fills
    /// the pending heap.
    fn evaluate_triggers(&self, state: &mut SchedState) {
        let watermark = state.watermark;
        let policy = self.config.trigger_policy;
        let slack = self.config.watermark_slack_us;
        let threshold = self.config.trigger_count_threshold;
        let max_pending = self.config.max_pending_windows;

        let mut to_enqueue = Vec::new();
        for window in state.windows.values_mut() {
            if window.ready || window.computing || window.completed {
                continue;
            }
            let time_ready = watermark >= window.range.end.saturating_add(slack);
            let count_ready = window.s_count + window.r_count >= threshold;
            let fire = match policy {
                TriggerPolicy::TimeBased => time_ready,
                TriggerPolicy::CountBased => count_ready,
                TriggerPolicy::Hybrid => time_ready || count_ready,
                TriggerPolicy::Manual => false,
            };
            if fire && state.pending.len() + to_enqueue.len() < max_pending {
                window.ready = true;
                to_enqueue.push(window.window_id);
            }
        }
        for id in to_enqueue {
            state.pending.push(Reverse(id));
        }
    }

    /// Removes completed windows far behind the watermark.
    fn cleanup(&self, state: &mut SchedState) {
        let horizon = state
            .watermark
            .saturating_sub(self.config.window_len_us.saturating_mul(10));
        state
            .windows
            .retain(|_, w| !(w.completed && w.range.end < horizon));
    }
}

// ------------------------------------------------------------------------------------------------
// Scheduler thread
// ------------------------------------------------------------------------------------------------

fn scheduler_loop(shared: Arc<Shared>) {
    let check_interval = Duration::from_millis(shared.config.trigger_check_interval_ms.max(1));

    while shared.running.load(Ordering::SeqCst) {
        let mut state = match shared.state.lock() {
            Ok(guard) => guard,
            Err(_) => {
                error!("scheduler state lock poisoned, stopping");
                return;
            }
        };
        let (guard, _timeout) = match shared.wakeup.wait_timeout(state, check_interval) {
            Ok(pair) => pair,
            Err(_) => {
                error!("scheduler state lock poisoned, stopping");
                return;
            }
        };
        state = guard;

        if !shared.running.load(Ordering::SeqCst) {
            break;
        }

        shared.evaluate_triggers(&mut state);
        shared.cleanup(&mut state);
        dispatch(&shared, &mut state);
    }
    debug!("scheduler loop exited");
}

/// Drains the pending heap into compute tasks, up to the concurrency cap.
fn dispatch(shared: &Arc<Shared>, state: &mut SchedState) {
    let max_concurrent = shared.config.max_concurrent_windows.max(1);

    while shared.in_flight.load(Ordering::SeqCst) < max_concurrent {
        let Some(Reverse(window_id)) = state.pending.pop() else {
            break;
        };
        let Some(window) = state.windows.get_mut(&window_id) else {
            continue;
        };
        if window.computing || window.completed {
            continue;
        }

        window.computing = true;
        window.triggered_at_ms = now_ms();
        let range = window.range;
        shared.in_flight.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut metrics) = shared.metrics.lock() {
            metrics.windows_triggered += 1;
        }

        let task_shared = Arc::clone(shared);
        let submitted = shared.handle.submit_task(move || {
            run_window(&task_shared, window_id, range);
        });

        if !submitted {
            warn!(window_id, "resource handle rejected window task");
            window.computing = false;
            window.ready = true;
            shared.in_flight.fetch_sub(1, Ordering::SeqCst);
            state.pending.push(Reverse(window_id));
            break;
        }
    }
}

/// Executes one window on a resource-handle worker and records the
/// outcome.
fn run_window(shared: &Arc<Shared>, window_id: u64, range: TimeRange) {
    let result = shared.engine.execute_window_join(window_id, range);

    {
        if let Ok(mut state) = shared.state.lock()
            && let Some(window) = state.windows.get_mut(&window_id)
        {
            window.computing = false;
            window.completed = result.is_ok();
            window.ready = false;
            window.completed_at_ms = now_ms();
        }
    }

    match result {
        Ok(status) => {
            if let Ok(mut metrics) = shared.metrics.lock() {
                metrics.total_windows_completed += 1;
                metrics.total_compute_ms += status.compute_time_ms;
            }
            if let Ok(callbacks) = shared.on_complete.read() {
                for callback in callbacks.iter() {
                    callback(&status);
                }
            }
        }
        Err(e) => {
            let message = e.to_string();
            warn!(window_id, error = %message, "window computation failed");
            if let Ok(mut metrics) = shared.metrics.lock() {
                metrics.total_windows_failed += 1;
            }
            if let Ok(callbacks) = shared.on_failure.read() {
                for callback in callbacks.iter() {
                    callback(window_id, &message);
                }
            }
        }
    }

    shared.in_flight.fetch_sub(1, Ordering::SeqCst);
    shared.wakeup.notify_all();
}

/// Milliseconds since the UNIX epoch.
fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
