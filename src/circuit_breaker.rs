//! Circuit breaker guarding the aggregate against anomalous batches
//!
//! ```text
//!            violation                    reset delay elapsed
//!   Closed ────────────▶ Open ──────────────────────────────▶ HalfOpen
//!     ▲                   ▲   (checked lazily on next check)     │
//!     │                   └──────────── violation ───────────────┤
//!     └──────────── success_threshold consecutive passes ────────┘
//! ```
//!
//! All state lives behind one lock and every `check` holds the write side
//! for its whole evaluation, so transitions and history appends are
//! serialized in completion order.

use crate::{
    constants::{
        BREAKER_HISTORY_CAPACITY, DEFAULT_BREAKER_MAX_APY, DEFAULT_MAX_TVL_CHANGE,
        DEFAULT_MIN_PROVIDERS, DEFAULT_RESET_DELAY_SECS, DEFAULT_SUCCESS_THRESHOLD,
        MIN_COMPARABLE_TVL,
    },
    error::{BreakerError, TripReason},
    types::{BreakerState, Metric},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// Callback invoked with the trip reason and the batch that caused it
pub type TripCallback = Arc<dyn Fn(String, Vec<Metric>) + Send + Sync>;

/// Limits that trip the breaker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    /// Maximum APY any single metric may report (10.0 = 1000%)
    pub max_apy: f64,
    /// Maximum relative change of total TVL against the last good aggregate
    pub max_tvl_change: f64,
    /// Minimum number of metrics in a batch
    pub min_providers: usize,
    /// Maximum sample standard deviation of APY as a multiple of the mean
    #[serde(default)]
    pub max_std_dev_multiple: Option<f64>,
    /// How long the breaker stays open before probing recovery
    #[serde(default = "default_reset_delay")]
    pub reset_delay: Duration,
    /// Consecutive half-open passes needed to close again
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
}

fn default_reset_delay() -> Duration {
    Duration::from_secs(DEFAULT_RESET_DELAY_SECS)
}

fn default_success_threshold() -> u32 {
    DEFAULT_SUCCESS_THRESHOLD
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            max_apy: DEFAULT_BREAKER_MAX_APY,
            max_tvl_change: DEFAULT_MAX_TVL_CHANGE,
            min_providers: DEFAULT_MIN_PROVIDERS,
            max_std_dev_multiple: None,
            reset_delay: default_reset_delay(),
            success_threshold: default_success_threshold(),
        }
    }
}

struct BreakerInner {
    state: BreakerState,
    last_trip: Option<Instant>,
    history: VecDeque<Metric>,
    last_good: Option<Vec<Metric>>,
    success_count: u32,
}

/// Stateful gate between validation and aggregation
pub struct CircuitBreaker {
    thresholds: Thresholds,
    inner: RwLock<BreakerInner>,
    on_trip: Option<TripCallback>,
}

impl CircuitBreaker {
    /// Creates a closed breaker with the given thresholds
    pub fn new(thresholds: Thresholds) -> Self {
        Self {
            thresholds,
            inner: RwLock::new(BreakerInner {
                state: BreakerState::Closed,
                last_trip: None,
                history: VecDeque::with_capacity(BREAKER_HISTORY_CAPACITY),
                last_good: None,
                success_count: 0,
            }),
            on_trip: None,
        }
    }

    /// Sets a custom reset delay
    pub fn with_reset_delay(mut self, delay: Duration) -> Self {
        self.thresholds.reset_delay = delay;
        self
    }

    /// Sets the number of half-open successes needed to close
    pub fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.thresholds.success_threshold = threshold;
        self
    }

    /// Registers a callback fired whenever the breaker opens
    ///
    /// The callback runs on its own task; `check` does not wait for it, and
    /// callbacks from rapid successive trips may run concurrently.
    pub fn with_trip_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(String, Vec<Metric>) + Send + Sync + 'static,
    {
        self.on_trip = Some(Arc::new(callback));
        self
    }

    /// The configured thresholds
    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    /// Evaluates a batch, recording it as the last good batch if it passes
    ///
    /// # Returns
    /// `Ok(())` if the batch may propagate; [`BreakerError::Open`] if the
    /// breaker is still cooling down; [`BreakerError::Tripped`] if this batch
    /// opened it.
    pub async fn check(&self, metrics: &[Metric]) -> Result<(), BreakerError> {
        let mut inner = self.inner.write().await;

        if inner.state == BreakerState::Open {
            let cooled = inner
                .last_trip
                .map(|at| at.elapsed() > self.thresholds.reset_delay)
                .unwrap_or(true);
            if !cooled {
                return Err(BreakerError::Open);
            }
            inner.state = BreakerState::HalfOpen;
            inner.success_count = 0;
            tracing::info!("Circuit breaker half-open: testing system recovery");
        }

        if metrics.is_empty() {
            return Err(BreakerError::NoMetrics);
        }

        if let Some(reason) = self.evaluate(&inner, metrics) {
            self.trip(&mut inner, &reason, metrics);
            return Err(BreakerError::Tripped(reason));
        }

        tracing::debug!(count = metrics.len(), "Circuit breaker checks passed");
        record_success(&mut inner, metrics);

        if inner.state == BreakerState::HalfOpen {
            inner.success_count += 1;
            if inner.success_count >= self.thresholds.success_threshold {
                inner.state = BreakerState::Closed;
                inner.success_count = 0;
                tracing::info!("Circuit breaker closed: system has recovered");
            }
        }

        Ok(())
    }

    /// First violated threshold, if any
    fn evaluate(&self, inner: &BreakerInner, metrics: &[Metric]) -> Option<TripReason> {
        let t = &self.thresholds;

        if metrics.len() < t.min_providers {
            return Some(TripReason::InsufficientProviders {
                got: metrics.len(),
                need: t.min_providers,
            });
        }

        if let Some(m) = metrics.iter().find(|m| m.apy > t.max_apy) {
            return Some(TripReason::ApyAboveMax {
                apy: m.apy,
                max: t.max_apy,
            });
        }

        if let Some(last) = inner.history.back() {
            let current_tvl = total_tvl(metrics);
            if last.tvl > MIN_COMPARABLE_TVL {
                let change = (current_tvl - last.tvl).abs() / last.tvl;
                if change > t.max_tvl_change {
                    return Some(TripReason::TvlChange {
                        change,
                        threshold: t.max_tvl_change,
                    });
                }
            }
        }

        if let Some(threshold) = t.max_std_dev_multiple.filter(|v| *v > 0.0) {
            if let Some((std_dev, mean)) = apy_std_dev_and_mean(metrics) {
                if mean > 0.0 && std_dev / mean > threshold {
                    return Some(TripReason::ApyStdDev {
                        ratio: std_dev / mean,
                        threshold,
                    });
                }
            }
        }

        None
    }

    fn trip(&self, inner: &mut BreakerInner, reason: &TripReason, metrics: &[Metric]) {
        inner.state = BreakerState::Open;
        inner.last_trip = Some(Instant::now());
        inner.success_count = 0;
        tracing::warn!(reason = %reason, count = metrics.len(), "Circuit breaker tripped");

        if let Some(callback) = &self.on_trip {
            let callback = callback.clone();
            let reason = reason.to_string();
            let batch = metrics.to_vec();
            tokio::spawn(async move { callback(reason, batch) });
        }
    }

    /// Current mode (an expired open breaker reports open until the next check)
    pub async fn state(&self) -> BreakerState {
        self.inner.read().await.state
    }

    /// Forces the breaker closed
    pub async fn reset(&self) {
        let mut inner = self.inner.write().await;
        inner.state = BreakerState::Closed;
        inner.success_count = 0;
        tracing::info!("Circuit breaker manually reset to closed state");
    }

    /// Copy of the most recent batch that passed `check`
    pub async fn last_good_metrics(&self) -> Option<Vec<Metric>> {
        self.inner.read().await.last_good.clone()
    }

    /// Copy of the aggregate history, oldest first
    pub async fn history(&self) -> Vec<Metric> {
        self.inner.read().await.history.iter().cloned().collect()
    }

    /// Consecutive passes recorded while half-open
    pub async fn success_count(&self) -> u32 {
        self.inner.read().await.success_count
    }
}

fn record_success(inner: &mut BreakerInner, metrics: &[Metric]) {
    let aggregate = Metric::aggregate(
        weighted_apy(metrics),
        total_tvl(metrics),
        0.0,
        Utc::now().timestamp(),
    );
    if inner.history.len() >= BREAKER_HISTORY_CAPACITY {
        inner.history.pop_front();
    }
    inner.history.push_back(aggregate);
    inner.last_good = Some(metrics.to_vec());
}

/// TVL-weighted mean APY
fn weighted_apy(metrics: &[Metric]) -> f64 {
    let (weighted, tvl) = metrics
        .iter()
        .fold((0.0, 0.0), |(w, t), m| (w + m.apy * m.tvl, t + m.tvl));
    if tvl > 0.0 {
        weighted / tvl
    } else {
        0.0
    }
}

fn total_tvl(metrics: &[Metric]) -> f64 {
    metrics.iter().map(|m| m.tvl).sum()
}

/// Bessel-corrected standard deviation and mean of APY; `None` below two values
fn apy_std_dev_and_mean(metrics: &[Metric]) -> Option<(f64, f64)> {
    if metrics.len() < 2 {
        return None;
    }
    let n = metrics.len() as f64;
    let mean = metrics.iter().map(|m| m.apy).sum::<f64>() / n;
    let variance = metrics
        .iter()
        .map(|m| (m.apy - mean).powi(2))
        .sum::<f64>()
        / (n - 1.0);
    Some((variance.sqrt(), mean))
}
