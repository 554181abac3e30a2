//! Source health metrics collection and reporting
//!
//! Tracks latency percentiles and success rates for every provider or chain
//! the orchestrator dispatches to.

use crate::constants::MAX_METRIC_SAMPLES;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Metrics for a single source
#[derive(Debug, Clone, PartialEq)]
pub struct SourceMetrics {
    /// Provider name or chain identifier
    pub source: String,
    /// 50th percentile latency of successful fetches in milliseconds
    pub latency_p50_ms: f64,
    /// 99th percentile latency of successful fetches in milliseconds
    pub latency_p99_ms: f64,
    /// Success rate over the lifetime of the collector (0.0 to 1.0)
    pub success_rate: f64,
    /// Total number of fetches tracked
    pub total_requests: u64,
    /// Number of failed fetches
    pub failed_requests: u64,
}

impl SourceMetrics {
    /// Creates metrics with no data
    pub fn empty(source: &str) -> Self {
        Self {
            source: source.to_string(),
            latency_p50_ms: 0.0,
            latency_p99_ms: 0.0,
            success_rate: 1.0,
            total_requests: 0,
            failed_requests: 0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct LatencySample {
    duration_ms: f64,
    success: bool,
}

#[derive(Debug, Default)]
struct SourceWindow {
    samples: VecDeque<LatencySample>,
    total: u64,
    failed: u64,
}

impl SourceWindow {
    fn record(&mut self, duration: Duration, success: bool) {
        self.total += 1;
        if !success {
            self.failed += 1;
        }
        if self.samples.len() >= MAX_METRIC_SAMPLES {
            self.samples.pop_front();
        }
        self.samples.push_back(LatencySample {
            duration_ms: duration.as_secs_f64() * 1000.0,
            success,
        });
    }

    fn snapshot(&self, source: &str) -> SourceMetrics {
        if self.samples.is_empty() {
            return SourceMetrics::empty(source);
        }

        let mut latencies: Vec<f64> = self
            .samples
            .iter()
            .filter(|s| s.success)
            .map(|s| s.duration_ms)
            .collect();
        latencies.sort_by(|a, b| a.total_cmp(b));

        SourceMetrics {
            source: source.to_string(),
            latency_p50_ms: percentile(&latencies, 50.0),
            latency_p99_ms: percentile(&latencies, 99.0),
            success_rate: (self.total - self.failed) as f64 / self.total as f64,
            total_requests: self.total,
            failed_requests: self.failed,
        }
    }
}

/// Collects fetch outcomes per source
#[derive(Debug, Default)]
pub struct MetricsCollector {
    windows: Arc<RwLock<HashMap<String, SourceWindow>>>,
}

impl MetricsCollector {
    /// Creates an empty collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a fetch with its duration and outcome
    pub async fn record(&self, source: &str, duration: Duration, success: bool) {
        let mut windows = self.windows.write().await;
        windows
            .entry(source.to_string())
            .or_default()
            .record(duration, success);
    }

    /// Metrics for one source
    pub async fn get(&self, source: &str) -> SourceMetrics {
        let windows = self.windows.read().await;
        windows
            .get(source)
            .map(|w| w.snapshot(source))
            .unwrap_or_else(|| SourceMetrics::empty(source))
    }

    /// Metrics for every source seen so far, sorted by name
    pub async fn all(&self) -> Vec<SourceMetrics> {
        let windows = self.windows.read().await;
        let mut all: Vec<SourceMetrics> = windows
            .iter()
            .map(|(source, w)| w.snapshot(source))
            .collect();
        all.sort_by(|a, b| a.source.cmp(&b.source));
        all
    }
}

/// Calculate percentile from sorted values
fn percentile(sorted_values: &[f64], p: f64) -> f64 {
    if sorted_values.is_empty() {
        return 0.0;
    }

    let idx = (p / 100.0 * (sorted_values.len() - 1) as f64).round() as usize;
    sorted_values[idx.min(sorted_values.len() - 1)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tracks_sources_independently() {
        let collector = MetricsCollector::new();

        collector.record("karak", Duration::from_millis(100), true).await;
        collector.record("karak", Duration::from_millis(200), true).await;
        collector.record("karak", Duration::from_millis(150), false).await;
        collector.record("symbiotic", Duration::from_millis(50), true).await;

        let karak = collector.get("karak").await;
        assert_eq!(karak.total_requests, 3);
        assert_eq!(karak.failed_requests, 1);
        assert!(karak.success_rate > 0.6 && karak.success_rate < 0.7);

        let all = collector.all().await;
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].source, "symbiotic");
        assert_eq!(all[1].success_rate, 1.0);
    }

    #[tokio::test]
    async fn unknown_source_is_empty() {
        let collector = MetricsCollector::new();
        assert_eq!(collector.get("nope").await, SourceMetrics::empty("nope"));
    }

    #[tokio::test]
    async fn window_is_bounded() {
        let collector = MetricsCollector::new();
        for _ in 0..(MAX_METRIC_SAMPLES + 20) {
            collector.record("a", Duration::from_millis(1), true).await;
        }
        let windows = collector.windows.read().await;
        assert_eq!(windows["a"].samples.len(), MAX_METRIC_SAMPLES);
        assert_eq!(windows["a"].total, (MAX_METRIC_SAMPLES + 20) as u64);
    }

    #[test]
    fn test_percentile() {
        let values: Vec<f64> = (1..=11).map(f64::from).collect();
        assert_eq!(percentile(&values, 50.0), 6.0);
        assert_eq!(percentile(&values, 99.0), 11.0);
        assert_eq!(percentile(&[], 50.0), 0.0);
    }
}
