//! Aggregation engine
//!
//! Every function here is pure: it takes a batch and returns one metric
//! tagged `"aggregated"`. Degenerate input (nothing qualifies, or the sums
//! are not finite) yields [`Metric::empty_aggregate`] rather than an error,
//! so callers detect failure by checking for a zero TVL.
//!
//! [`Aggregator`] selects a strategy and an execution hint once and then
//! applies them uniformly.

use crate::{
    constants::{
        AGGREGATE_MAX_APY, AGGREGATION_WORKERS, CONSENSUS_MIN_CONFIDENCE, CONSENSUS_MIN_METRICS,
        DEFAULT_IQR_MULTIPLIER, DEFAULT_MAX_AGE_SECS, DEFAULT_TRIM_FRACTION, MIN_OUTLIER_SAMPLE,
    },
    types::Metric,
    validation::{self, Rejection},
};
use chrono::Utc;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// Running TVL-weighted sums
#[derive(Debug, Clone, Copy, Default)]
struct WeightedSums {
    tvl: f64,
    apy: f64,
    points: f64,
    count: usize,
    latest: i64,
}

impl WeightedSums {
    fn add(&mut self, m: &Metric) {
        if !m.is_weightable() {
            return;
        }
        self.tvl += m.tvl;
        self.apy += m.apy * m.tvl;
        self.points += m.points_per_eth * m.tvl;
        self.count += 1;
        self.latest = self.latest.max(m.collected_at);
    }

    fn merge(&mut self, other: &WeightedSums) {
        self.tvl += other.tvl;
        self.apy += other.apy;
        self.points += other.points;
        self.count += other.count;
        self.latest = self.latest.max(other.latest);
    }

    fn finish(self) -> Metric {
        if self.count == 0 || self.tvl <= 0.0 || !self.apy.is_finite() || !self.points.is_finite()
        {
            return Metric::empty_aggregate();
        }
        let apy = self.apy / self.tvl;
        let points = self.points / self.tvl;
        if !apy.is_finite() || !points.is_finite() || !self.tvl.is_finite() {
            return Metric::empty_aggregate();
        }
        Metric::aggregate(apy, self.tvl, points, self.latest)
    }
}

/// TVL-weighted mean of APY and points over metrics with TVL > 0, APY >= 0
/// and points >= 0
///
/// The result carries the summed TVL and the newest collection timestamp
/// among the included metrics.
pub fn weighted(metrics: &[Metric]) -> Metric {
    let mut sums = WeightedSums::default();
    for m in metrics {
        sums.add(m);
    }
    sums.finish()
}

/// [`weighted`] with the sums accumulated on the rayon pool
///
/// Each worker folds its chunk locally and merges into a shared
/// accumulator under a lock. The qualifying set is identical to the
/// sequential version; only summation order differs.
pub fn weighted_parallel(metrics: &[Metric]) -> Metric {
    if metrics.len() < AGGREGATION_WORKERS * 2 {
        return weighted(metrics);
    }

    let chunk_size = metrics.len().div_ceil(AGGREGATION_WORKERS);
    let total = Mutex::new(WeightedSums::default());

    metrics.par_chunks(chunk_size).for_each(|chunk| {
        let mut local = WeightedSums::default();
        for m in chunk {
            local.add(m);
        }
        total
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .merge(&local);
    });

    total
        .into_inner()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .finish()
}

/// Median of `selector` over metrics with TVL > 0
///
/// Even counts average the two middle values. Returns 0 when nothing
/// qualifies.
pub fn median<F>(metrics: &[Metric], selector: F) -> f64
where
    F: Fn(&Metric) -> f64,
{
    let mut values: Vec<f64> = metrics
        .iter()
        .filter(|m| m.tvl > 0.0)
        .map(selector)
        .collect();
    if values.is_empty() {
        return 0.0;
    }

    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

/// Per-field median of APY, TVL and points
pub fn median_aggregation(metrics: &[Metric]) -> Metric {
    if metrics.is_empty() {
        return Metric::empty_aggregate();
    }

    let latest = metrics.iter().map(|m| m.collected_at).max().unwrap_or(0);
    Metric::aggregate(
        median(metrics, |m| m.apy),
        median(metrics, |m| m.tvl),
        median(metrics, |m| m.points_per_eth),
        latest,
    )
}

/// Weighted mean after dropping `floor(n * trim_fraction)` metrics from
/// each end of the APY-sorted qualifying set
///
/// Falls back to [`weighted`] for fewer than three qualifying metrics or a
/// fraction outside `(0, 0.5)`.
pub fn trimmed_mean(metrics: &[Metric], trim_fraction: f64) -> Metric {
    if metrics.len() < 3 || trim_fraction <= 0.0 || trim_fraction >= 0.5 {
        return weighted(metrics);
    }

    let mut qualifying: Vec<Metric> = metrics
        .iter()
        .filter(|m| m.is_weightable())
        .cloned()
        .collect();
    if qualifying.len() < 3 {
        return weighted(metrics);
    }

    qualifying.sort_by(|a, b| a.apy.total_cmp(&b.apy));
    let trim = (qualifying.len() as f64 * trim_fraction) as usize;
    weighted(&qualifying[trim..qualifying.len() - trim])
}

/// Unweighted mean of APY, TVL and points over metrics with non-negative
/// APY and points
pub fn average(metrics: &[Metric]) -> Metric {
    let included: Vec<&Metric> = metrics
        .iter()
        .filter(|m| m.apy >= 0.0 && m.points_per_eth >= 0.0)
        .collect();
    if included.is_empty() {
        return Metric::empty_aggregate();
    }

    let n = included.len() as f64;
    let latest = included.iter().map(|m| m.collected_at).max().unwrap_or(0);
    Metric::aggregate(
        included.iter().map(|m| m.apy).sum::<f64>() / n,
        included.iter().map(|m| m.tvl).sum::<f64>() / n,
        included.iter().map(|m| m.points_per_eth).sum::<f64>() / n,
        latest,
    )
}

/// Plausibility check used before the validated strategies
///
/// Looser than [`validation::check_metric`]: APY may go up to 100.0 and
/// any positive TVL is accepted, but the timestamp must be set.
pub fn validate_metric(m: &Metric, now: i64) -> Result<(), Rejection> {
    if !m.apy.is_finite() || !m.tvl.is_finite() || !m.points_per_eth.is_finite() {
        return Err(Rejection::NonFinite);
    }
    if m.apy < 0.0 {
        return Err(Rejection::NegativeApy);
    }
    if m.apy > AGGREGATE_MAX_APY {
        return Err(Rejection::ApyAboveMax);
    }
    if m.tvl <= 0.0 {
        return Err(Rejection::TvlTooLow);
    }
    if m.points_per_eth < 0.0 {
        return Err(Rejection::NegativePoints);
    }
    if m.collected_at <= 0 {
        return Err(Rejection::MissingTimestamp);
    }
    if m.collected_at < now - DEFAULT_MAX_AGE_SECS {
        return Err(Rejection::Stale);
    }
    Ok(())
}

/// IQR outlier removal with the standard multiplier
///
/// Quartiles come from the APYs of metrics with TVL > 0 and APY >= 0; the
/// batch is returned untouched when fewer than four of those exist. Unlike
/// [`validation::filter_outliers`] there is no widening for near-constant
/// data.
pub fn filter_outliers(metrics: Vec<Metric>) -> Vec<Metric> {
    if metrics.len() < MIN_OUTLIER_SAMPLE {
        return metrics;
    }

    let apys: Vec<f64> = metrics
        .iter()
        .filter(|m| m.tvl > 0.0 && m.apy >= 0.0)
        .map(|m| m.apy)
        .collect();
    let Some(bounds) = validation::iqr_bounds(&apys, DEFAULT_IQR_MULTIPLIER) else {
        return metrics;
    };

    metrics
        .into_iter()
        .filter(|m| bounds.contains(m.apy))
        .collect()
}

/// [`validate_metric`] followed by [`filter_outliers`]
pub fn validate_and_filter(metrics: &[Metric]) -> Vec<Metric> {
    let now = Utc::now().timestamp();
    let valid: Vec<Metric> = metrics
        .iter()
        .filter(|m| match validate_metric(m, now) {
            Ok(()) => true,
            Err(reason) => {
                tracing::debug!(provider = %m.provider, ?reason, "Dropped implausible metric");
                false
            }
        })
        .cloned()
        .collect();
    filter_outliers(valid)
}

/// Validation and outlier removal, then [`weighted`]
pub fn weighted_with_validation(metrics: &[Metric]) -> Metric {
    weighted(&validate_and_filter(metrics))
}

/// Validation and outlier removal, then [`weighted_parallel`]
pub fn weighted_parallel_with_validation(metrics: &[Metric]) -> Metric {
    weighted_parallel(&validate_and_filter(metrics))
}

/// Weighted mean over the metrics that agree with the consensus
///
/// Keeps metrics whose confidence score exceeds 0.7; if fewer than two
/// survive, the whole scored batch is used instead.
pub fn consensus(metrics: &[Metric]) -> Metric {
    consensus_with(metrics, weighted)
}

fn consensus_with(metrics: &[Metric], combine: fn(&[Metric]) -> Metric) -> Metric {
    let scored = validation::confidence_scores(metrics);
    let agreeing: Vec<Metric> = scored
        .iter()
        .filter(|m| m.confidence.unwrap_or(0.0) > CONSENSUS_MIN_CONFIDENCE)
        .cloned()
        .collect();

    if agreeing.len() < CONSENSUS_MIN_METRICS {
        tracing::debug!(
            agreeing = agreeing.len(),
            total = scored.len(),
            "Too few agreeing metrics, using the full batch"
        );
        combine(&scored)
    } else {
        combine(&agreeing)
    }
}

/// How a batch is reduced to one metric
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationStrategy {
    #[default]
    Weighted,
    Median,
    TrimmedMean { trim_fraction: f64 },
    Average,
    Consensus,
    /// Plausibility check and outlier removal before weighting
    Validated,
    /// Unrecognized mode name; aggregates like `Weighted` but keeps the name
    Fallback(String),
}

impl AggregationStrategy {
    /// Maps a mode name to a strategy
    ///
    /// `trim_fraction` is only used by `"trimmed"`.
    pub fn parse(mode: &str, trim_fraction: f64) -> Self {
        match mode.trim().to_ascii_lowercase().as_str() {
            "weighted" => Self::Weighted,
            "median" => Self::Median,
            "trimmed" => Self::TrimmedMean { trim_fraction },
            "average" => Self::Average,
            "consensus" => Self::Consensus,
            "validated" => Self::Validated,
            _ => Self::Fallback(mode.to_string()),
        }
    }

    /// Mode name, used to qualify the aggregated provider tag
    pub fn name(&self) -> &str {
        match self {
            Self::Weighted => "weighted",
            Self::Median => "median",
            Self::TrimmedMean { .. } => "trimmed",
            Self::Average => "average",
            Self::Consensus => "consensus",
            Self::Validated => "validated",
            Self::Fallback(mode) => mode.as_str(),
        }
    }
}

impl std::str::FromStr for AggregationStrategy {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s, DEFAULT_TRIM_FRACTION))
    }
}

/// Where weighted sums are computed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Execution {
    #[default]
    Sequential,
    Parallel,
}

/// A strategy bound to an execution hint
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Aggregator {
    strategy: AggregationStrategy,
    execution: Execution,
}

impl Aggregator {
    /// Creates a sequential aggregator
    pub fn new(strategy: AggregationStrategy) -> Self {
        Self {
            strategy,
            execution: Execution::Sequential,
        }
    }

    /// Sets the execution hint
    pub fn with_execution(mut self, execution: Execution) -> Self {
        self.execution = execution;
        self
    }

    pub fn strategy(&self) -> &AggregationStrategy {
        &self.strategy
    }

    pub fn execution(&self) -> Execution {
        self.execution
    }

    /// Reduces `metrics` to one aggregate
    pub fn aggregate(&self, metrics: &[Metric]) -> Metric {
        let combine = self.weighted_fn();
        match &self.strategy {
            AggregationStrategy::Weighted => combine(metrics),
            AggregationStrategy::Median => median_aggregation(metrics),
            AggregationStrategy::TrimmedMean { trim_fraction } => {
                trimmed_mean(metrics, *trim_fraction)
            }
            AggregationStrategy::Average => average(metrics),
            AggregationStrategy::Consensus => consensus_with(metrics, combine),
            AggregationStrategy::Validated => combine(&validate_and_filter(metrics)),
            AggregationStrategy::Fallback(mode) => {
                tracing::debug!(mode = %mode, "Unknown aggregation mode, using weighted");
                combine(metrics)
            }
        }
    }

    fn weighted_fn(&self) -> fn(&[Metric]) -> Metric {
        match self.execution {
            Execution::Sequential => weighted,
            Execution::Parallel => weighted_parallel,
        }
    }
}
