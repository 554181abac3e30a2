//! Structural validation, IQR outlier rejection and confidence scoring
//!
//! Quartiles are taken positionally from the sorted APY values
//! (`Q1 = v[n / 4]`, `Q3 = v[3n / 4]`), not interpolated. The aggregation
//! engine's validated strategies use the same rule; keep them in step.

use crate::{
    constants::{
        DEFAULT_IQR_MULTIPLIER, DEFAULT_MAX_AGE_SECS, DEFAULT_MAX_APY, DEFAULT_MIN_TVL,
        MIN_OUTLIER_BOUND_WIDTH, MIN_OUTLIER_SAMPLE, PARALLEL_VALIDATION_THRESHOLD,
        VALIDATION_WORKERS,
    },
    types::Metric,
};
use chrono::Utc;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a validation pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationOptions {
    /// How recent metrics must be
    pub max_age: Duration,
    /// TVL must be strictly greater than this
    pub min_tvl: f64,
    /// APY ceiling (inclusive)
    pub max_apy: f64,
    /// Reject metrics with negative points-per-unit
    pub require_non_negative_points: bool,
    /// Run the IQR pass after the structural one
    pub enable_outlier_detection: bool,
    /// Sensitivity of the IQR pass
    pub iqr_multiplier: f64,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self {
            max_age: Duration::from_secs(DEFAULT_MAX_AGE_SECS as u64),
            min_tvl: DEFAULT_MIN_TVL,
            max_apy: DEFAULT_MAX_APY,
            require_non_negative_points: true,
            enable_outlier_detection: true,
            iqr_multiplier: DEFAULT_IQR_MULTIPLIER,
        }
    }
}

/// Why a metric failed the structural pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    NegativeApy,
    ApyAboveMax,
    TvlTooLow,
    Stale,
    MissingProvider,
    NegativePoints,
    NonFinite,
    MissingTimestamp,
}

/// Checks one metric against the structural rules
pub fn check_metric(m: &Metric, opts: &ValidationOptions, now: i64) -> Result<(), Rejection> {
    if m.apy < 0.0 {
        return Err(Rejection::NegativeApy);
    }
    if m.apy > opts.max_apy {
        return Err(Rejection::ApyAboveMax);
    }
    // protects against low-liquidity pools
    if m.tvl <= opts.min_tvl {
        return Err(Rejection::TvlTooLow);
    }
    if m.age_secs_at(now) > opts.max_age.as_secs() as i64 {
        return Err(Rejection::Stale);
    }
    if m.provider.is_empty() {
        return Err(Rejection::MissingProvider);
    }
    if opts.require_non_negative_points && m.points_per_eth < 0.0 {
        return Err(Rejection::NegativePoints);
    }
    // NaN fails none of the comparisons above
    if !m.apy.is_finite() || !m.tvl.is_finite() {
        return Err(Rejection::NonFinite);
    }
    Ok(())
}

/// Applies the structural pass to every metric independently
fn filter_structural(metrics: &[Metric], opts: &ValidationOptions, now: i64) -> Vec<Metric> {
    metrics
        .iter()
        .filter(|m| match check_metric(m, opts, now) {
            Ok(()) => true,
            Err(reason) => {
                tracing::debug!(
                    provider = %m.provider,
                    apy = m.apy,
                    tvl = m.tvl,
                    reason = ?reason,
                    "Filtered invalid metric"
                );
                false
            }
        })
        .cloned()
        .collect()
}

/// Removes structurally invalid and statistically anomalous metrics
///
/// # Returns
/// The surviving metrics in input order
pub fn filter(metrics: &[Metric], opts: &ValidationOptions) -> Vec<Metric> {
    let valid = filter_structural(metrics, opts, Utc::now().timestamp());
    apply_outlier_pass(valid, opts)
}

/// Same result set as [`filter`], with the structural pass split across workers
///
/// Batches below [`PARALLEL_VALIDATION_THRESHOLD`] are validated inline.
/// Survivor order is not guaranteed to match the input.
pub fn filter_concurrently(metrics: &[Metric], opts: &ValidationOptions) -> Vec<Metric> {
    if metrics.len() < PARALLEL_VALIDATION_THRESHOLD {
        return filter(metrics, opts);
    }

    let now = Utc::now().timestamp();
    let chunk_size = metrics.len().div_ceil(VALIDATION_WORKERS);

    let valid: Vec<Metric> = metrics
        .par_chunks(chunk_size)
        .flat_map_iter(|chunk| filter_structural(chunk, opts, now))
        .collect();

    apply_outlier_pass(valid, opts)
}

fn apply_outlier_pass(valid: Vec<Metric>, opts: &ValidationOptions) -> Vec<Metric> {
    if opts.enable_outlier_detection && valid.len() >= MIN_OUTLIER_SAMPLE {
        filter_outliers(valid, opts.iqr_multiplier)
    } else {
        valid
    }
}

/// Inclusive APY window outside of which a metric is an outlier
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutlierBounds {
    pub lower: f64,
    pub upper: f64,
}

impl OutlierBounds {
    /// Whether `apy` falls inside the window
    pub fn contains(&self, apy: f64) -> bool {
        apy >= self.lower && apy <= self.upper
    }
}

/// Positional-quartile IQR bounds over `values`
///
/// Returns `None` for fewer than [`MIN_OUTLIER_SAMPLE`] values.
pub fn iqr_bounds(values: &[f64], iqr_multiplier: f64) -> Option<OutlierBounds> {
    if values.len() < MIN_OUTLIER_SAMPLE {
        return None;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let n = sorted.len();
    let q1 = sorted[n / 4];
    let q3 = sorted[n * 3 / 4];
    let iqr = q3 - q1;

    Some(OutlierBounds {
        lower: q1 - iqr_multiplier * iqr,
        upper: q3 + iqr_multiplier * iqr,
    })
}

/// Removes APY outliers using the IQR rule
///
/// Near-constant data produces a window narrower than
/// [`MIN_OUTLIER_BOUND_WIDTH`]; in that case the window becomes
/// `[0.5 * mean, 2 * mean]` so the pass does not reject everything.
pub fn filter_outliers(metrics: Vec<Metric>, iqr_multiplier: f64) -> Vec<Metric> {
    let apys: Vec<f64> = metrics.iter().map(|m| m.apy).collect();
    let Some(mut bounds) = iqr_bounds(&apys, iqr_multiplier) else {
        return metrics;
    };

    if bounds.upper - bounds.lower < MIN_OUTLIER_BOUND_WIDTH {
        let mean = apys.iter().sum::<f64>() / apys.len() as f64;
        bounds = OutlierBounds {
            lower: mean * 0.5,
            upper: mean * 2.0,
        };
    }

    let total = metrics.len();
    let kept: Vec<Metric> = metrics
        .into_iter()
        .filter(|m| {
            let keep = bounds.contains(m.apy);
            if !keep {
                tracing::info!(
                    provider = %m.provider,
                    apy = m.apy,
                    lower = bounds.lower,
                    upper = bounds.upper,
                    "Filtered outlier metric"
                );
            }
            keep
        })
        .collect();

    tracing::debug!(
        total,
        filtered = total - kept.len(),
        lower = bounds.lower,
        upper = bounds.upper,
        "Outlier filtering complete"
    );
    kept
}

/// Scores each metric by its agreement with the TVL-weighted mean APY
///
/// `confidence = 1 / (1 + 5 * |apy - ref| / ref)`, with the plain `|apy|`
/// as distance when the reference is zero. A lone metric has nothing to
/// agree with and scores 0.
pub fn confidence_scores(metrics: &[Metric]) -> Vec<Metric> {
    if metrics.len() == 1 {
        return vec![metrics[0].clone().with_confidence(0.0)];
    }

    let (weighted_apy, total_tvl) = metrics
        .iter()
        .fold((0.0, 0.0), |(apy, tvl), m| (apy + m.apy * m.tvl, tvl + m.tvl));
    let reference = if total_tvl != 0.0 {
        weighted_apy / total_tvl
    } else {
        0.0
    };

    metrics
        .iter()
        .map(|m| {
            let distance = if reference == 0.0 {
                m.apy.abs()
            } else {
                (m.apy - reference).abs() / reference
            };
            m.clone().with_confidence(1.0 / (1.0 + distance * 5.0))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metric(provider: &str, apy: f64) -> Metric {
        Metric::new(provider, apy, 1000.0, 1.0)
    }

    fn clustered_with_outlier() -> Vec<Metric> {
        vec![
            metric("a", 0.05),
            metric("b", 0.055),
            metric("c", 0.06),
            metric("d", 0.07),
            metric("e", 0.50),
        ]
    }

    #[test]
    fn structural_rules() {
        let opts = ValidationOptions::default();
        let now = Utc::now().timestamp();

        assert_eq!(check_metric(&metric("a", 0.05), &opts, now), Ok(()));
        assert_eq!(
            check_metric(&metric("a", -0.01), &opts, now),
            Err(Rejection::NegativeApy)
        );
        assert_eq!(
            check_metric(&metric("a", 11.0), &opts, now),
            Err(Rejection::ApyAboveMax)
        );
        assert_eq!(
            check_metric(&Metric::new("a", 0.05, 1.0, 1.0), &opts, now),
            Err(Rejection::TvlTooLow)
        );
        assert_eq!(
            check_metric(&metric("", 0.05), &opts, now),
            Err(Rejection::MissingProvider)
        );
        assert_eq!(
            check_metric(&Metric::new("a", 0.05, 1000.0, -1.0), &opts, now),
            Err(Rejection::NegativePoints)
        );
        let stale = metric("a", 0.05).with_collected_at(now - DEFAULT_MAX_AGE_SECS - 1);
        assert_eq!(check_metric(&stale, &opts, now), Err(Rejection::Stale));

        let lenient = ValidationOptions {
            require_non_negative_points: false,
            ..ValidationOptions::default()
        };
        assert_eq!(
            check_metric(&Metric::new("a", 0.05, 1000.0, -1.0), &lenient, now),
            Ok(())
        );
    }

    #[test]
    fn removes_single_outlier() {
        let kept = filter(&clustered_with_outlier(), &ValidationOptions::default());
        assert_eq!(kept.len(), 4);
        assert!(kept.iter().all(|m| m.provider != "e"));
    }

    #[test]
    fn fewer_than_four_never_filtered() {
        let metrics = vec![metric("a", 0.01), metric("b", 0.02), metric("c", 5.0)];
        assert_eq!(filter(&metrics, &ValidationOptions::default()).len(), 3);
    }

    #[test]
    fn outlier_detection_can_be_disabled() {
        let opts = ValidationOptions {
            enable_outlier_detection: false,
            ..ValidationOptions::default()
        };
        assert_eq!(filter(&clustered_with_outlier(), &opts).len(), 5);
    }

    #[test]
    fn filtering_is_idempotent() {
        let opts = ValidationOptions::default();
        let once = filter(&clustered_with_outlier(), &opts);
        let twice = filter(&once, &opts);
        assert_eq!(once, twice);
    }

    #[test]
    fn near_constant_data_uses_mean_window() {
        // identical APYs give a zero-width IQR window
        let metrics = vec![
            metric("a", 0.05),
            metric("b", 0.05),
            metric("c", 0.05),
            metric("d", 0.05),
            metric("e", 0.09),
        ];
        let kept = filter_outliers(metrics, DEFAULT_IQR_MULTIPLIER);
        // mean = 0.058, window = [0.029, 0.116]
        assert_eq!(kept.len(), 5);
    }

    #[test]
    fn positional_quartiles() {
        // n = 6: Q1 = v[1] = 2, Q3 = v[4] = 5, IQR = 3
        let bounds = iqr_bounds(&[6.0, 1.0, 5.0, 2.0, 4.0, 3.0], 1.0).unwrap();
        assert_eq!(bounds.lower, -1.0);
        assert_eq!(bounds.upper, 8.0);
        assert!(iqr_bounds(&[1.0, 2.0, 3.0], 1.5).is_none());
    }

    #[test]
    fn concurrent_matches_sequential() {
        let now = Utc::now().timestamp();
        let mut metrics: Vec<Metric> = (0..250)
            .map(|i| metric(&format!("p{}", i), 0.04 + (i % 10) as f64 * 0.001))
            .collect();
        metrics.push(metric("spike", 3.0));
        metrics.push(metric("negative", -0.1));
        metrics.push(metric("stale", 0.05).with_collected_at(now - 2 * DEFAULT_MAX_AGE_SECS));

        let opts = ValidationOptions::default();
        let mut sequential: Vec<String> =
            filter(&metrics, &opts).into_iter().map(|m| m.provider).collect();
        let mut concurrent: Vec<String> = filter_concurrently(&metrics, &opts)
            .into_iter()
            .map(|m| m.provider)
            .collect();
        sequential.sort();
        concurrent.sort();

        assert_eq!(sequential.len(), 250);
        assert_eq!(sequential, concurrent);
    }

    #[test]
    fn closest_to_consensus_scores_highest() {
        let metrics = vec![
            Metric::new("a", 0.05, 1000.0, 1.0),
            Metric::new("b", 0.06, 2000.0, 1.0),
            Metric::new("c", 0.055, 1500.0, 1.0),
        ];
        let scored = confidence_scores(&metrics);
        let best = scored
            .iter()
            .max_by(|x, y| x.confidence.unwrap().total_cmp(&y.confidence.unwrap()))
            .unwrap();
        // reference = 0.05556, c is nearest
        assert_eq!(best.provider, "c");
        assert!(scored
            .iter()
            .all(|m| (0.0..=1.0).contains(&m.confidence.unwrap())));
    }

    #[test]
    fn single_metric_confidence_is_zero() {
        let scored = confidence_scores(&[metric("a", 0.05)]);
        assert_eq!(scored[0].confidence, Some(0.0));
        assert!(confidence_scores(&[]).is_empty());
    }

    #[test]
    fn zero_reference_uses_absolute_apy() {
        let metrics = vec![metric("a", 0.0), metric("b", 0.0)];
        let scored = confidence_scores(&metrics);
        assert_eq!(scored[0].confidence, Some(1.0));
    }
}
