//! Join operators — the pluggable algorithms behind the compute engine.
//!
//! The engine consumes operators through the narrow [`JoinOperator`]
//! capability trait and selects a concrete implementation from the
//! [`OperatorType`] tag at initialization. New operators plug in by
//! implementing the trait and extending the selector; the engine itself
//! never changes.
//!
//! Three implementation families cover the tag set:
//!
//! - [`SymmetricHashJoin`] — exact symmetric hash join (IAWJ, SHJ, PRJ,
//!   IAWJSel, LazyIAWJSel). Tracks matched index pairs so the engine can
//!   serialize joined records into the result payload.
//! - [`MeanAqpJoin`] — sampling-based mean estimator (MeanAQP,
//!   LinearSVI, AI). Produces an approximate count without materializing
//!   matches.
//! - [`CompensatedJoin`] — exact join plus a late-arrival compensation
//!   estimate (IMA, MSWJ; PECJ maps here). The compensation term models
//!   tuples expected after the watermark. Which tuples count as late
//!   depends on the configured watermark mode: under `arrival`
//!   watermarking the lateness threshold is `max_delay_us` against the
//!   tuple's own arrival/event separation; under `lateness` watermarking
//!   the engine supplies a wall-clock arrival time, so any tuple whose
//!   event time trails it by more than `lateness_ms` registers as late.

use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::time::Instant;

use super::{ComputeConfig, ComputeError, WatermarkTag};

// ------------------------------------------------------------------------------------------------
// Tuple form
// ------------------------------------------------------------------------------------------------

/// The quadruple every operator consumes.
///
/// Event times are window-relative: the engine rebases all timestamps so
/// the first observed timestamp in a window maps to 0, identically
/// across operator variants.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JoinTuple {
    /// Join key.
    pub key: i64,

    /// Scalar payload value.
    pub value: f64,

    /// Window-relative event time (µs).
    pub event_time: i64,

    /// Window-relative arrival time (µs).
    pub arrival_time: i64,
}

// ------------------------------------------------------------------------------------------------
// Operator tags
// ------------------------------------------------------------------------------------------------

/// The recognized operator variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorType {
    Iawj,
    MeanAqp,
    Ima,
    Mswj,
    Ai,
    LinearSvi,
    IawjSel,
    LazyIawjSel,
    Shj,
    Prj,
}

impl OperatorType {
    /// Canonical tag string, as stored in result rows.
    pub fn tag(&self) -> &'static str {
        match self {
            OperatorType::Iawj => "IAWJ",
            OperatorType::MeanAqp => "MeanAQP",
            OperatorType::Ima => "IMA",
            OperatorType::Mswj => "MSWJ",
            OperatorType::Ai => "AI",
            OperatorType::LinearSvi => "LinearSVI",
            OperatorType::IawjSel => "IAWJSel",
            OperatorType::LazyIawjSel => "LazyIAWJSel",
            OperatorType::Shj => "SHJ",
            OperatorType::Prj => "PRJ",
        }
    }

    /// Whether the variant can produce an approximate count.
    pub fn supports_aqp(&self) -> bool {
        !matches!(
            self,
            OperatorType::Iawj
                | OperatorType::Shj
                | OperatorType::Prj
                | OperatorType::IawjSel
                | OperatorType::LazyIawjSel
        )
    }
}

impl FromStr for OperatorType {
    type Err = ComputeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IAWJ" => Ok(OperatorType::Iawj),
            "MeanAQP" => Ok(OperatorType::MeanAqp),
            "IMA" => Ok(OperatorType::Ima),
            "MSWJ" => Ok(OperatorType::Mswj),
            "AI" => Ok(OperatorType::Ai),
            "LinearSVI" => Ok(OperatorType::LinearSvi),
            "IAWJSel" => Ok(OperatorType::IawjSel),
            "LazyIAWJSel" => Ok(OperatorType::LazyIawjSel),
            "SHJ" => Ok(OperatorType::Shj),
            "PRJ" => Ok(OperatorType::Prj),
            // Predictive error-compensation joins run on the IMA core.
            "PECJ" => Ok(OperatorType::Ima),
            other => Err(ComputeError::InvalidConfig(format!(
                "unknown operator tag '{other}'"
            ))),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Capability trait
// ------------------------------------------------------------------------------------------------

/// The capability set the compute engine requires from an operator.
///
/// Call order per window: `configure` → `set_window` → `sync_time` →
/// `start` → `feed_s`*/`feed_r`* → `exact_count`/`aqp_count` → `stop`.
/// One operator instance serves exactly one window execution; instances
/// are never shared across concurrent windows.
pub trait JoinOperator: Send {
    /// Applies engine configuration (buffer sizes, flags).
    fn configure(&mut self, config: &ComputeConfig);

    /// Sets window and slide lengths in microseconds.
    fn set_window(&mut self, window_len_us: i64, slide_len_us: i64);

    /// Synchronizes the operator's clock to the window-relative base.
    fn sync_time(&mut self, base_us: i64);

    /// Marks the start of a window execution.
    fn start(&mut self);

    /// Marks the end of a window execution.
    fn stop(&mut self);

    /// Feeds one tuple from stream S, in arrival order.
    fn feed_s(&mut self, tuple: &JoinTuple);

    /// Feeds one tuple from stream R, in arrival order.
    fn feed_r(&mut self, tuple: &JoinTuple);

    /// Exact number of matched pairs so far.
    fn exact_count(&self) -> u64;

    /// Approximate matched-pair estimate; `NaN` when unsupported.
    fn aqp_count(&self) -> f64;

    /// Matched `(s_index, r_index)` pairs in feed order; empty for
    /// approximate variants that do not materialize matches.
    fn drain_matches(&mut self) -> Vec<(usize, usize)>;

    /// Per-phase wall-clock breakdown in microseconds.
    fn time_breakdown(&self) -> BTreeMap<String, i64>;
}

/// Builds the operator implementation for a tag.
pub fn build_operator(operator: OperatorType, config: &ComputeConfig) -> Box<dyn JoinOperator> {
    let mut built: Box<dyn JoinOperator> = match operator {
        OperatorType::Iawj
        | OperatorType::Shj
        | OperatorType::Prj
        | OperatorType::IawjSel
        | OperatorType::LazyIawjSel => Box::new(SymmetricHashJoin::new()),
        OperatorType::MeanAqp | OperatorType::Ai | OperatorType::LinearSvi => {
            Box::new(MeanAqpJoin::new())
        }
        OperatorType::Ima | OperatorType::Mswj => Box::new(CompensatedJoin::new(operator)),
    };
    built.configure(config);
    built
}

// ------------------------------------------------------------------------------------------------
// SymmetricHashJoin — exact family
// ------------------------------------------------------------------------------------------------

/// Exact symmetric hash join: both sides build and probe, so matches are
/// found regardless of arrival interleaving.
pub struct SymmetricHashJoin {
    s_index: HashMap<i64, Vec<usize>>,
    r_index: HashMap<i64, Vec<usize>>,
    s_seen: usize,
    r_seen: usize,
    matches: Vec<(usize, usize)>,
    build_us: i64,
    probe_us: i64,
}

impl SymmetricHashJoin {
    pub fn new() -> Self {
        Self {
            s_index: HashMap::new(),
            r_index: HashMap::new(),
            s_seen: 0,
            r_seen: 0,
            matches: Vec::new(),
            build_us: 0,
            probe_us: 0,
        }
    }
}

impl Default for SymmetricHashJoin {
    fn default() -> Self {
        Self::new()
    }
}

impl JoinOperator for SymmetricHashJoin {
    fn configure(&mut self, _config: &ComputeConfig) {}

    fn set_window(&mut self, _window_len_us: i64, _slide_len_us: i64) {}

    fn sync_time(&mut self, _base_us: i64) {}

    fn start(&mut self) {}

    fn stop(&mut self) {}

    fn feed_s(&mut self, tuple: &JoinTuple) {
        let start = Instant::now();
        let s_idx = self.s_seen;
        self.s_seen += 1;

        if let Some(r_indices) = self.r_index.get(&tuple.key) {
            for &r_idx in r_indices {
                self.matches.push((s_idx, r_idx));
            }
        }
        self.probe_us += start.elapsed().as_micros() as i64;

        let start = Instant::now();
        self.s_index.entry(tuple.key).or_default().push(s_idx);
        self.build_us += start.elapsed().as_micros() as i64;
    }

    fn feed_r(&mut self, tuple: &JoinTuple) {
        let start = Instant::now();
        let r_idx = self.r_seen;
        self.r_seen += 1;

        if let Some(s_indices) = self.s_index.get(&tuple.key) {
            for &s_idx in s_indices {
                self.matches.push((s_idx, r_idx));
            }
        }
        self.probe_us += start.elapsed().as_micros() as i64;

        let start = Instant::now();
        self.r_index.entry(tuple.key).or_default().push(r_idx);
        self.build_us += start.elapsed().as_micros() as i64;
    }

    fn exact_count(&self) -> u64 {
        self.matches.len() as u64
    }

    fn aqp_count(&self) -> f64 {
        f64::NAN
    }

    fn drain_matches(&mut self) -> Vec<(usize, usize)> {
        std::mem::take(&mut self.matches)
    }

    fn time_breakdown(&self) -> BTreeMap<String, i64> {
        let mut breakdown = BTreeMap::new();
        breakdown.insert("build_us".to_string(), self.build_us);
        breakdown.insert("probe_us".to_string(), self.probe_us);
        breakdown
    }
}

// ------------------------------------------------------------------------------------------------
// MeanAqpJoin — sampling family
// ------------------------------------------------------------------------------------------------

/// Mean-based approximate join: samples every k-th tuple per side,
/// joins the samples exactly, and scales the sampled match count back
/// up. `join_sum` switches the estimate from pair counting to
/// `count × mean matched value`.
pub struct MeanAqpJoin {
    sample_every: usize,
    join_sum: bool,
    s_samples: HashMap<i64, Vec<f64>>,
    r_samples: HashMap<i64, Vec<f64>>,
    s_seen: usize,
    r_seen: usize,
    s_sampled: usize,
    r_sampled: usize,
    feed_us: i64,
}

impl MeanAqpJoin {
    pub fn new() -> Self {
        Self {
            sample_every: 1,
            join_sum: false,
            s_samples: HashMap::new(),
            r_samples: HashMap::new(),
            s_seen: 0,
            r_seen: 0,
            s_sampled: 0,
            r_sampled: 0,
            feed_us: 0,
        }
    }
}

impl Default for MeanAqpJoin {
    fn default() -> Self {
        Self::new()
    }
}

impl JoinOperator for MeanAqpJoin {
    fn configure(&mut self, config: &ComputeConfig) {
        // Sample so that each side keeps at most ~buffer_len tuples.
        let target = config.s_buffer_len.max(1);
        self.sample_every = 1.max(target / 1000);
        self.join_sum = config.join_sum;
    }

    fn set_window(&mut self, _window_len_us: i64, _slide_len_us: i64) {}

    fn sync_time(&mut self, _base_us: i64) {}

    fn start(&mut self) {}

    fn stop(&mut self) {}

    fn feed_s(&mut self, tuple: &JoinTuple) {
        let start = Instant::now();
        if self.s_seen % self.sample_every == 0 {
            self.s_samples.entry(tuple.key).or_default().push(tuple.value);
            self.s_sampled += 1;
        }
        self.s_seen += 1;
        self.feed_us += start.elapsed().as_micros() as i64;
    }

    fn feed_r(&mut self, tuple: &JoinTuple) {
        let start = Instant::now();
        if self.r_seen % self.sample_every == 0 {
            self.r_samples.entry(tuple.key).or_default().push(tuple.value);
            self.r_sampled += 1;
        }
        self.r_seen += 1;
        self.feed_us += start.elapsed().as_micros() as i64;
    }

    fn exact_count(&self) -> u64 {
        0
    }

    fn aqp_count(&self) -> f64 {
        if self.s_sampled == 0 || self.r_sampled == 0 {
            return 0.0;
        }

        let mut sampled_matches = 0u64;
        let mut matched_value_sum = 0.0;
        for (key, s_values) in &self.s_samples {
            if let Some(r_values) = self.r_samples.get(key) {
                let pairs = (s_values.len() * r_values.len()) as u64;
                sampled_matches += pairs;
                if self.join_sum {
                    let r_mean: f64 = r_values.iter().sum::<f64>() / r_values.len() as f64;
                    matched_value_sum += pairs as f64 * r_mean;
                }
            }
        }

        let scale_s = self.s_seen as f64 / self.s_sampled as f64;
        let scale_r = self.r_seen as f64 / self.r_sampled as f64;
        let estimate = sampled_matches as f64 * scale_s * scale_r;
        if self.join_sum && sampled_matches > 0 {
            estimate * (matched_value_sum / sampled_matches as f64)
        } else {
            estimate
        }
    }

    fn drain_matches(&mut self) -> Vec<(usize, usize)> {
        Vec::new()
    }

    fn time_breakdown(&self) -> BTreeMap<String, i64> {
        let mut breakdown = BTreeMap::new();
        breakdown.insert("feed_us".to_string(), self.feed_us);
        breakdown
    }
}

// ------------------------------------------------------------------------------------------------
// CompensatedJoin — out-of-order-aware family
// ------------------------------------------------------------------------------------------------

/// Exact hash join plus a compensation estimate for tuples expected to
/// arrive after the watermark. The exact side matches
/// [`SymmetricHashJoin`]; the AQP side adds
/// `late_fraction × observed_matches` unless compensation is disabled.
///
/// A tuple is late when its arrival time trails its event time by more
/// than the configured threshold — `max_delay_us` under arrival
/// watermarking, `lateness_ms` under lateness watermarking (where the
/// engine feeds a wall-clock arrival).
pub struct CompensatedJoin {
    variant: OperatorType,
    core: SymmetricHashJoin,
    late_threshold_us: i64,
    compensation_enabled: bool,
    late_tuples: u64,
    total_tuples: u64,
}

impl CompensatedJoin {
    pub fn new(variant: OperatorType) -> Self {
        Self {
            variant,
            core: SymmetricHashJoin::new(),
            late_threshold_us: 0,
            compensation_enabled: true,
            late_tuples: 0,
            total_tuples: 0,
        }
    }

    fn observe(&mut self, tuple: &JoinTuple) {
        self.total_tuples += 1;
        if tuple.arrival_time - tuple.event_time > self.late_threshold_us {
            self.late_tuples += 1;
        }
    }
}

impl JoinOperator for CompensatedJoin {
    fn configure(&mut self, config: &ComputeConfig) {
        self.late_threshold_us = match config.watermark_tag {
            WatermarkTag::Arrival => config.max_delay_us,
            WatermarkTag::Lateness => config.lateness_ms.saturating_mul(1000),
        };
        self.compensation_enabled = match self.variant {
            OperatorType::Ima => !config.ima_disable_compensation,
            OperatorType::Mswj => config.mswj_compensation,
            _ => true,
        };
        self.core.configure(config);
    }

    fn set_window(&mut self, window_len_us: i64, slide_len_us: i64) {
        self.core.set_window(window_len_us, slide_len_us);
    }

    fn sync_time(&mut self, base_us: i64) {
        self.core.sync_time(base_us);
    }

    fn start(&mut self) {
        self.core.start();
    }

    fn stop(&mut self) {
        self.core.stop();
    }

    fn feed_s(&mut self, tuple: &JoinTuple) {
        self.observe(tuple);
        self.core.feed_s(tuple);
    }

    fn feed_r(&mut self, tuple: &JoinTuple) {
        self.observe(tuple);
        self.core.feed_r(tuple);
    }

    fn exact_count(&self) -> u64 {
        self.core.exact_count()
    }

    fn aqp_count(&self) -> f64 {
        let exact = self.core.exact_count() as f64;
        if !self.compensation_enabled || self.total_tuples == 0 {
            return exact;
        }
        let late_fraction = self.late_tuples as f64 / self.total_tuples as f64;
        exact * (1.0 + late_fraction)
    }

    fn drain_matches(&mut self) -> Vec<(usize, usize)> {
        self.core.drain_matches()
    }

    fn time_breakdown(&self) -> BTreeMap<String, i64> {
        self.core.time_breakdown()
    }
}
