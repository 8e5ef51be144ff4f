//! Compute engine — the stateless windowed-join executor.
//!
//! The engine owns no tuples: every [`ComputeEngine::execute_window_join`]
//! call queries the stream tables for the window's time range, runs a
//! fresh operator instance over the retrieved tuples, writes one result
//! row, and returns. The only state held between calls is the immutable
//! configuration, the collaborator handles captured at
//! [`ComputeEngine::initialize`], and aggregated metrics.
//!
//! # Choreography per window
//!
//! 1. Validate the range (`end > start`).
//! 2. Query the S and R stream tables.
//! 3. Convert records to `(key, value, event_time, arrival_time)` tuples
//!    and rebase all timestamps so the first observed timestamp becomes
//!    0 — identically across operator variants, so a window produces the
//!    same answer regardless of configuration mode. The arrival clock
//!    depends on the watermark mode: under `arrival` watermarking tuples
//!    arrive on the event clock; under `lateness` watermarking arrival
//!    is the wall-clock at computation, which lets the compensated
//!    operators see how far each record trails real time.
//! 4. Configure, start, and feed a fresh operator (S then R, arrival
//!    order), then read the exact and (when enabled) approximate counts.
//! 5. Enforce the timeout after each phase; an exceeded deadline either
//!    falls through to an AQP-only estimate (when enabled) or fails.
//! 6. Serialize matched pairs into the result payload and upsert one row
//!    keyed by window id.
//!
//! # Concurrency
//!
//! `execute_window_join` is reentrant: each call owns its operator, so
//! concurrent windows never contend on operator state. Metrics sit
//! behind a reader-writer lock with short write sections.

pub mod operator;

#[cfg(test)]
mod tests;

pub use operator::{JoinOperator, JoinTuple, OperatorType, build_operator};

use std::{
    collections::BTreeMap,
    str::FromStr,
    sync::{Arc, RwLock},
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::record::{Record, TimeRange};
use crate::resource::{ResourceHandle, ResourceUsage};
use crate::table::{JoinResultRecord, JoinResultTable, StreamTable, TableError, TableManager};
use crate::table::results::serialize_payload;

/// Bounded reservoir size for latency percentile tracking.
const LATENCY_RESERVOIR: usize = 1024;

/// Tag key carrying the join key on stream records.
const KEY_TAG: &str = "key";

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors surfaced by the compute engine.
#[derive(Debug, Error)]
pub enum ComputeError {
    /// Configuration failed validation.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// No table manager was supplied at initialization.
    #[error("no database supplied")]
    NullDatabase,

    /// No resource handle was supplied at initialization.
    #[error("no resource handle supplied")]
    NullResourceHandle,

    /// `initialize` was called twice.
    #[error("engine already initialized")]
    AlreadyInitialized,

    /// `execute_window_join` was called before `initialize`.
    #[error("engine not initialized")]
    NotInitialized,

    /// The window range is empty or inverted.
    #[error("invalid range [{start}, {end})")]
    InvalidRange { start: i64, end: i64 },

    /// A stream-table query failed.
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// The operator reported a failure.
    #[error("operator failed: {0}")]
    OperatorFailed(String),

    /// The window exceeded its computation timeout without AQP fallback.
    #[error("window computation timed out")]
    Timeout,

    /// Error from the table layer.
    #[error("table error: {0}")]
    Table(#[from] TableError),
}

// ------------------------------------------------------------------------------------------------
// Configuration
// ------------------------------------------------------------------------------------------------

/// Watermark semantics selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WatermarkTag {
    /// Watermark follows arrival time.
    #[default]
    Arrival,
    /// Watermark follows event time with a lateness bound.
    Lateness,
}

impl FromStr for WatermarkTag {
    type Err = ComputeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "arrival" => Ok(WatermarkTag::Arrival),
            "lateness" => Ok(WatermarkTag::Lateness),
            other => Err(ComputeError::InvalidConfig(format!(
                "unknown watermark tag '{other}'"
            ))),
        }
    }
}

/// Immutable compute-engine configuration.
#[derive(Debug, Clone)]
pub struct ComputeConfig {
    pub window_len_us: i64,
    pub slide_len_us: i64,
    pub operator: OperatorType,
    pub max_delay_us: i64,
    pub aqp_threshold: f64,
    pub s_buffer_len: usize,
    pub r_buffer_len: usize,
    pub time_step_us: i64,
    pub watermark_tag: WatermarkTag,
    pub watermark_time_ms: i64,
    pub lateness_ms: i64,
    /// false = count pairs; true = count × mean matched value.
    pub join_sum: bool,
    pub ima_disable_compensation: bool,
    pub mswj_compensation: bool,
    pub max_memory_bytes: u64,
    pub max_threads: usize,
    pub enable_aqp: bool,
    /// Reserved; SIMD probing is not implemented yet.
    pub enable_simd: bool,
    pub timeout_ms: u64,
    pub stream_s_table: String,
    pub stream_r_table: String,
    pub result_table: String,
}

impl Default for ComputeConfig {
    fn default() -> Self {
        Self {
            window_len_us: 1_000_000,
            slide_len_us: 1_000_000,
            operator: OperatorType::Iawj,
            max_delay_us: 100_000,
            aqp_threshold: 0.05,
            s_buffer_len: 65_536,
            r_buffer_len: 65_536,
            time_step_us: 1_000,
            watermark_tag: WatermarkTag::Arrival,
            watermark_time_ms: 1_000,
            lateness_ms: 100,
            join_sum: false,
            ima_disable_compensation: false,
            mswj_compensation: false,
            max_memory_bytes: 512 * 1024 * 1024,
            max_threads: 4,
            enable_aqp: false,
            enable_simd: false,
            timeout_ms: 10_000,
            stream_s_table: "stream_s".to_string(),
            stream_r_table: "stream_r".to_string(),
            result_table: "join_results".to_string(),
        }
    }
}

impl ComputeConfig {
    /// Builds a configuration from a string map (the plugin surface).
    ///
    /// Unknown keys are ignored; malformed values for known keys are
    /// configuration errors.
    pub fn from_map(map: &BTreeMap<String, String>) -> Result<Self, ComputeError> {
        let mut config = Self::default();

        fn parse<T: FromStr>(key: &str, value: &str) -> Result<T, ComputeError> {
            value.parse::<T>().map_err(|_| {
                ComputeError::InvalidConfig(format!("cannot parse '{value}' for key '{key}'"))
            })
        }

        for (key, value) in map {
            match key.as_str() {
                "window_len_us" => config.window_len_us = parse(key, value)?,
                "slide_len_us" => config.slide_len_us = parse(key, value)?,
                "operator_type" => config.operator = value.parse()?,
                "max_delay_us" => config.max_delay_us = parse(key, value)?,
                "aqp_threshold" => config.aqp_threshold = parse(key, value)?,
                "s_buffer_len" => config.s_buffer_len = parse(key, value)?,
                "r_buffer_len" => config.r_buffer_len = parse(key, value)?,
                "time_step_us" => config.time_step_us = parse(key, value)?,
                "watermark_tag" => config.watermark_tag = value.parse()?,
                "watermark_time_ms" => config.watermark_time_ms = parse(key, value)?,
                "lateness_ms" => config.lateness_ms = parse(key, value)?,
                "join_sum" => config.join_sum = parse(key, value)?,
                "ima_disable_compensation" => {
                    config.ima_disable_compensation = parse(key, value)?
                }
                "mswj_compensation" => config.mswj_compensation = parse(key, value)?,
                "max_memory_bytes" => config.max_memory_bytes = parse(key, value)?,
                "max_threads" => config.max_threads = parse(key, value)?,
                "enable_aqp" => config.enable_aqp = parse(key, value)?,
                "enable_simd" => config.enable_simd = parse(key, value)?,
                "timeout_ms" => config.timeout_ms = parse(key, value)?,
                "stream_s_table" => config.stream_s_table = value.clone(),
                "stream_r_table" => config.stream_r_table = value.clone(),
                "result_table" => config.result_table = value.clone(),
                _ => {} // unknown keys are ignored
            }
        }
        Ok(config)
    }

    /// Validates the invariants `initialize` depends on.
    pub fn validate(&self) -> Result<(), ComputeError> {
        if self.window_len_us <= 0 {
            return Err(ComputeError::InvalidConfig(
                "window length must be positive".into(),
            ));
        }
        if self.slide_len_us <= 0 {
            return Err(ComputeError::InvalidConfig(
                "slide length must be positive".into(),
            ));
        }
        if self.stream_s_table.is_empty()
            || self.stream_r_table.is_empty()
            || self.result_table.is_empty()
        {
            return Err(ComputeError::InvalidConfig(
                "table names must be non-empty".into(),
            ));
        }
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// Status and metrics
// ------------------------------------------------------------------------------------------------

/// Outcome of one window execution.
#[derive(Debug, Clone, PartialEq)]
pub struct ComputeStatus {
    pub window_id: u64,
    pub success: bool,
    pub exact_count: u64,
    /// `NaN` when the AQP path was not used.
    pub aqp_estimate: f64,
    pub selectivity: f64,
    pub input_s_count: usize,
    pub input_r_count: usize,
    pub used_aqp: bool,
    pub timeout_occurred: bool,
    pub compute_time_ms: u64,
    pub error_message: String,
}

/// Aggregated engine metrics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComputeMetrics {
    pub windows_completed: u64,
    pub windows_failed: u64,
    pub windows_timeout: u64,
    pub tuples_processed: u64,
    pub throughput_events_per_sec: f64,
    pub latency_min_ms: f64,
    pub latency_max_ms: f64,
    pub latency_avg_ms: f64,
    pub latency_p99_ms: f64,
    pub peak_memory_bytes: u64,
    pub avg_memory_bytes: u64,
    pub active_threads: usize,
    pub avg_selectivity: f64,
    pub avg_aqp_error: f64,
    pub aqp_invocations: u64,
    pub retries: u64,
}

#[derive(Default)]
struct MetricsInner {
    windows_completed: u64,
    windows_failed: u64,
    windows_timeout: u64,
    tuples_processed: u64,
    busy_time: Duration,
    latency_samples: Vec<f64>,
    latency_min_ms: f64,
    latency_max_ms: f64,
    latency_sum_ms: f64,
    latency_count: u64,
    peak_memory_bytes: u64,
    memory_sum: u64,
    memory_count: u64,
    selectivity_sum: f64,
    selectivity_count: u64,
    aqp_error_sum: f64,
    aqp_error_count: u64,
    aqp_invocations: u64,
    retries: u64,
}

impl MetricsInner {
    fn record_latency(&mut self, latency_ms: f64) {
        if self.latency_count == 0 || latency_ms < self.latency_min_ms {
            self.latency_min_ms = latency_ms;
        }
        if latency_ms > self.latency_max_ms {
            self.latency_max_ms = latency_ms;
        }
        self.latency_sum_ms += latency_ms;
        self.latency_count += 1;

        if self.latency_samples.len() >= LATENCY_RESERVOIR {
            // Overwrite pseudo-randomly so the reservoir stays fresh.
            let slot = (self.latency_count as usize * 31) % LATENCY_RESERVOIR;
            self.latency_samples[slot] = latency_ms;
        } else {
            self.latency_samples.push(latency_ms);
        }
    }

    fn p99(&self) -> f64 {
        if self.latency_samples.is_empty() {
            return 0.0;
        }
        let mut sorted = self.latency_samples.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let idx = ((sorted.len() as f64) * 0.99).ceil() as usize;
        sorted[idx.min(sorted.len()) - 1]
    }

    fn snapshot(&self, active_threads: usize) -> ComputeMetrics {
        ComputeMetrics {
            windows_completed: self.windows_completed,
            windows_failed: self.windows_failed,
            windows_timeout: self.windows_timeout,
            tuples_processed: self.tuples_processed,
            throughput_events_per_sec: if self.busy_time.as_secs_f64() > 0.0 {
                self.tuples_processed as f64 / self.busy_time.as_secs_f64()
            } else {
                0.0
            },
            latency_min_ms: if self.latency_count > 0 {
                self.latency_min_ms
            } else {
                0.0
            },
            latency_max_ms: self.latency_max_ms,
            latency_avg_ms: if self.latency_count > 0 {
                self.latency_sum_ms / self.latency_count as f64
            } else {
                0.0
            },
            latency_p99_ms: self.p99(),
            peak_memory_bytes: self.peak_memory_bytes,
            avg_memory_bytes: if self.memory_count > 0 {
                self.memory_sum / self.memory_count
            } else {
                0
            },
            active_threads,
            avg_selectivity: if self.selectivity_count > 0 {
                self.selectivity_sum / self.selectivity_count as f64
            } else {
                0.0
            },
            avg_aqp_error: if self.aqp_error_count > 0 {
                self.aqp_error_sum / self.aqp_error_count as f64
            } else {
                0.0
            },
            aqp_invocations: self.aqp_invocations,
            retries: self.retries,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Engine
// ------------------------------------------------------------------------------------------------

struct EngineState {
    config: ComputeConfig,
    s_table: Arc<StreamTable>,
    r_table: Arc<StreamTable>,
    result_table: Arc<JoinResultTable>,
    handle: Arc<ResourceHandle>,
}

/// The stateless windowed-join executor.
pub struct ComputeEngine {
    name: String,
    state: RwLock<Option<EngineState>>,
    metrics: RwLock<MetricsInner>,
}

impl ComputeEngine {
    /// Creates an uninitialized engine.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: RwLock::new(None),
            metrics: RwLock::new(MetricsInner::default()),
        }
    }

    /// Engine instance name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Validates the configuration, resolves the collaborating tables,
    /// and records the resource handle.
    pub fn initialize(
        &self,
        config: ComputeConfig,
        db: Option<&TableManager>,
        handle: Option<Arc<ResourceHandle>>,
    ) -> Result<(), ComputeError> {
        config.validate()?;
        let db = db.ok_or(ComputeError::NullDatabase)?;
        let handle = handle.ok_or(ComputeError::NullResourceHandle)?;

        let mut state = self
            .state
            .write()
            .map_err(|_| ComputeError::OperatorFailed("state lock poisoned".into()))?;
        if state.is_some() {
            return Err(ComputeError::AlreadyInitialized);
        }

        let s_table = db
            .get_stream_table(&config.stream_s_table)
            .map_err(|e| ComputeError::InvalidConfig(e.to_string()))?;
        let r_table = db
            .get_stream_table(&config.stream_r_table)
            .map_err(|e| ComputeError::InvalidConfig(e.to_string()))?;
        let result_table = db
            .get_join_result_table(&config.result_table)
            .map_err(|e| ComputeError::InvalidConfig(e.to_string()))?;

        info!(
            engine = %self.name,
            operator = config.operator.tag(),
            s = %config.stream_s_table,
            r = %config.stream_r_table,
            "compute engine initialized"
        );

        *state = Some(EngineState {
            config,
            s_table,
            r_table,
            result_table,
            handle,
        });
        Ok(())
    }

    /// True once `initialize` has succeeded.
    pub fn is_initialized(&self) -> bool {
        self.state.read().map(|s| s.is_some()).unwrap_or(false)
    }

    /// Executes the join for one window over `range`.
    ///
    /// Synchronous from the caller's view; safe to invoke concurrently
    /// for different window ids.
    pub fn execute_window_join(
        &self,
        window_id: u64,
        range: TimeRange,
    ) -> Result<ComputeStatus, ComputeError> {
        let started = Instant::now();

        let state = self
            .state
            .read()
            .map_err(|_| ComputeError::OperatorFailed("state lock poisoned".into()))?;
        let Some(state) = state.as_ref() else {
            return Err(ComputeError::NotInitialized);
        };
        let config = &state.config;

        // 1. Range validation.
        if !range.is_valid() {
            self.note_failure(0);
            return Err(ComputeError::InvalidRange {
                start: range.start,
                end: range.end,
            });
        }

        let deadline = started + Duration::from_millis(config.timeout_ms.max(1));

        // 2. Query both streams.
        let empty = BTreeMap::new();
        let s_records = state.s_table.query(range, &empty).map_err(|e| {
            self.note_failure(0);
            ComputeError::QueryFailed(e.to_string())
        })?;
        let r_records = state.r_table.query(range, &empty).map_err(|e| {
            self.note_failure(0);
            ComputeError::QueryFailed(e.to_string())
        })?;

        let input_s = s_records.len();
        let input_r = r_records.len();
        let tuples_total = (input_s + input_r) as u64;

        // 3. Tuple conversion with a shared per-window origin. Under
        // lateness watermarking the arrival clock is the wall-clock at
        // computation, so the lateness of each record is observable.
        let origin = s_records
            .iter()
            .chain(r_records.iter())
            .map(|r| r.timestamp)
            .min()
            .unwrap_or(range.start);
        let arrival_now = match config.watermark_tag {
            WatermarkTag::Arrival => None,
            WatermarkTag::Lateness => Some(epoch_micros()),
        };
        let s_tuples = to_tuples(&s_records, origin, arrival_now);
        let r_tuples = to_tuples(&r_records, origin, arrival_now);

        // 4. Fresh operator for this window.
        let mut operator = build_operator(config.operator, config);
        operator.set_window(config.window_len_us, config.slide_len_us);
        operator.sync_time(0);
        operator.start();

        let mut timeout_occurred = Instant::now() > deadline;

        if !timeout_occurred {
            for tuple in &s_tuples {
                operator.feed_s(tuple);
            }
            timeout_occurred = Instant::now() > deadline;
        }
        if !timeout_occurred {
            for tuple in &r_tuples {
                operator.feed_r(tuple);
            }
            timeout_occurred = Instant::now() > deadline;
        }

        // 5. Timeout handling: AQP fallback or failure.
        if timeout_occurred {
            operator.stop();
            if !config.enable_aqp {
                warn!(engine = %self.name, window_id, "window timed out without AQP fallback");
                self.note_timeout(tuples_total, false);
                return Err(ComputeError::Timeout);
            }

            let estimate = aqp_only_estimate(&s_tuples, &r_tuples, config);
            let status = self.finish_window(
                state,
                window_id,
                range,
                WindowOutcome {
                    exact_count: 0,
                    aqp_estimate: estimate,
                    used_aqp: true,
                    timeout_occurred: true,
                    pairs: Vec::new(),
                },
                input_s,
                input_r,
                started,
            )?;
            self.note_timeout(tuples_total, true);
            return Ok(status);
        }

        // 6. Read counts and stop.
        let exact_count = operator.exact_count();
        let aqp_estimate = if config.enable_aqp {
            operator.aqp_count()
        } else {
            f64::NAN
        };
        let used_aqp = config.enable_aqp && exact_count == 0 && !aqp_estimate.is_nan();
        let matches = operator.drain_matches();
        operator.stop();

        let pairs: Vec<(Record, Record)> = matches
            .into_iter()
            .filter_map(|(s_idx, r_idx)| {
                match (s_records.get(s_idx), r_records.get(r_idx)) {
                    (Some(s), Some(r)) => Some((s.clone(), r.clone())),
                    _ => None,
                }
            })
            .collect();

        let status = self.finish_window(
            state,
            window_id,
            range,
            WindowOutcome {
                exact_count,
                aqp_estimate,
                used_aqp,
                timeout_occurred: false,
                pairs,
            },
            input_s,
            input_r,
            started,
        )?;

        self.note_success(&status, tuples_total, started.elapsed());
        Ok(status)
    }

    /// Aggregated metrics snapshot.
    pub fn get_metrics(&self) -> ComputeMetrics {
        let active_threads = self
            .state
            .read()
            .ok()
            .and_then(|s| s.as_ref().map(|s| s.handle.get_allocated().threads))
            .unwrap_or(0);
        self.metrics
            .read()
            .map(|m| m.snapshot(active_threads))
            .unwrap_or_default()
    }

    /// Clears metrics and cached counters. Table contents are untouched.
    pub fn reset(&self) {
        if let Ok(mut metrics) = self.metrics.write() {
            *metrics = MetricsInner::default();
        }
    }

    /// Reports current usage through the resource handle.
    pub fn report_usage(&self) {
        let Ok(state) = self.state.read() else { return };
        let Some(state) = state.as_ref() else { return };
        let metrics = self.get_metrics();
        state.handle.report_usage(ResourceUsage {
            threads_used: metrics.active_threads,
            memory_used_bytes: metrics.peak_memory_bytes,
            queue_length: 0,
            tuples_processed: metrics.tuples_processed,
            avg_latency_ms: metrics.latency_avg_ms,
            errors_count: metrics.windows_failed,
            last_error: String::new(),
        });
    }

    // --------------------------------------------------------------------------------------------
    // Internals
    // --------------------------------------------------------------------------------------------

    /// Writes the result row and assembles the status.
    fn finish_window(
        &self,
        state: &EngineState,
        window_id: u64,
        range: TimeRange,
        outcome: WindowOutcome,
        input_s: usize,
        input_r: usize,
        started: Instant,
    ) -> Result<ComputeStatus, ComputeError> {
        let cross = (input_s as u64) * (input_r as u64);
        let selectivity = if cross > 0 {
            outcome.exact_count as f64 / cross as f64
        } else {
            0.0
        };
        let compute_time_ms = started.elapsed().as_millis() as u64;

        let payload = serialize_payload(&outcome.pairs)?;
        let memory_estimate = payload.len() as u64
            + ((input_s + input_r) * std::mem::size_of::<JoinTuple>()) as u64;

        let mut row = JoinResultRecord::new(window_id, range.end);
        row.join_count = outcome.exact_count;
        row.aqp_estimate = outcome.aqp_estimate;
        row.selectivity = selectivity;
        row.payload = payload;
        row.compute_time_ms = compute_time_ms;
        row.memory_used_bytes = memory_estimate;
        row.threads_used = state.handle.get_allocated().threads as u32;
        row.used_aqp = outcome.used_aqp;
        row.algorithm = state.config.operator.tag().to_string();
        state.result_table.insert(row)?;

        debug!(
            engine = %self.name,
            window_id,
            exact = outcome.exact_count,
            aqp = outcome.aqp_estimate,
            "window join finished"
        );

        Ok(ComputeStatus {
            window_id,
            success: true,
            exact_count: outcome.exact_count,
            aqp_estimate: outcome.aqp_estimate,
            selectivity,
            input_s_count: input_s,
            input_r_count: input_r,
            used_aqp: outcome.used_aqp,
            timeout_occurred: outcome.timeout_occurred,
            compute_time_ms,
            error_message: String::new(),
        })
    }

    fn note_success(&self, status: &ComputeStatus, tuples: u64, elapsed: Duration) {
        if let Ok(mut metrics) = self.metrics.write() {
            metrics.windows_completed += 1;
            metrics.tuples_processed += tuples;
            metrics.busy_time += elapsed;
            metrics.record_latency(elapsed.as_secs_f64() * 1000.0);
            metrics.selectivity_sum += status.selectivity;
            metrics.selectivity_count += 1;
            if status.used_aqp {
                metrics.aqp_invocations += 1;
            }
            if status.exact_count > 0 && !status.aqp_estimate.is_nan() {
                let error = (status.aqp_estimate - status.exact_count as f64).abs()
                    / status.exact_count as f64;
                metrics.aqp_error_sum += error;
                metrics.aqp_error_count += 1;
            }
            let memory = tuples * std::mem::size_of::<JoinTuple>() as u64;
            metrics.peak_memory_bytes = metrics.peak_memory_bytes.max(memory);
            metrics.memory_sum += memory;
            metrics.memory_count += 1;
        }
    }

    fn note_failure(&self, tuples: u64) {
        if let Ok(mut metrics) = self.metrics.write() {
            metrics.windows_failed += 1;
            metrics.tuples_processed += tuples;
        }
    }

    fn note_timeout(&self, tuples: u64, recovered: bool) {
        if let Ok(mut metrics) = self.metrics.write() {
            metrics.windows_timeout += 1;
            if recovered {
                metrics.windows_completed += 1;
                metrics.aqp_invocations += 1;
            } else {
                metrics.windows_failed += 1;
            }
            metrics.tuples_processed += tuples;
        }
    }
}

struct WindowOutcome {
    exact_count: u64,
    aqp_estimate: f64,
    used_aqp: bool,
    timeout_occurred: bool,
    pairs: Vec<(Record, Record)>,
}

/// Converts records to operator tuples against a shared origin.
///
/// `arrival_now` carries the window-absolute wall-clock when lateness
/// watermarking is active; `None` means tuples arrive on the event
/// clock (arrival watermarking).
fn to_tuples(records: &[Record], origin: i64, arrival_now: Option<i64>) -> Vec<JoinTuple> {
    records
        .iter()
        .map(|record| {
            let key = record
                .tags
                .get(KEY_TAG)
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(0);
            let relative = record.timestamp - origin;
            let arrival_time = match arrival_now {
                Some(now) => now.saturating_sub(origin),
                None => relative,
            };
            JoinTuple {
                key,
                value: record.scalar_value(),
                event_time: relative,
                arrival_time,
            }
        })
        .collect()
}

/// Microseconds since the UNIX epoch, the wall-clock arrival domain.
fn epoch_micros() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or(0)
}

/// Cheap sampling estimate used by the timeout fallback path.
fn aqp_only_estimate(s: &[JoinTuple], r: &[JoinTuple], config: &ComputeConfig) -> f64 {
    let mut estimator = operator::MeanAqpJoin::new();
    estimator.configure(config);
    for tuple in s {
        estimator.feed_s(tuple);
    }
    for tuple in r {
        estimator.feed_r(tuple);
    }
    estimator.aqp_count()
}
