//! Error types for the restaking yield aggregator

use serde::Serialize;
use thiserror::Error;

/// Errors that can occur when fetching metrics from a provider
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Network request failed
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    /// Invalid response from provider
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Rate limit exceeded
    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    /// Provider API error
    #[error("Provider API error: {0}")]
    ApiError(String),

    /// Timeout waiting for response
    #[error("Request timeout")]
    Timeout,

    /// Provider answered but returned no metrics
    #[error("No data returned from {0}")]
    EmptyResponse(String),

    /// Source is missing the configuration it needs
    #[error("Not configured: {0}")]
    NotConfigured(String),
}

impl ProviderError {
    /// Creates an InvalidResponse error
    pub fn invalid_response(msg: impl Into<String>) -> Self {
        Self::InvalidResponse(msg.into())
    }

    /// Creates an EmptyResponse error
    pub fn empty(source: impl Into<String>) -> Self {
        Self::EmptyResponse(source.into())
    }

    /// Whether another attempt could plausibly succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::NetworkError(e) => !e.is_builder() && !e.is_decode(),
            ProviderError::RateLimitExceeded => true,
            ProviderError::ApiError(msg) => msg.starts_with("HTTP 5"),
            _ => false,
        }
    }
}

/// A source (provider or chain) that failed during one fetch round
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceFailure {
    /// Provider name or chain identifier
    pub source: String,
    /// Rendered error
    pub error: String,
}

impl SourceFailure {
    /// Creates a failure record
    pub fn new(source: impl Into<String>, error: impl ToString) -> Self {
        Self {
            source: source.into(),
            error: error.to_string(),
        }
    }
}

/// Errors surfaced by the fetch orchestrator
#[derive(Debug, Error, Clone)]
pub enum FetchError {
    /// Every dispatched source failed and none returned data
    #[error("All sources failed: {}", render_failures(.failures))]
    AllSourcesFailed { failures: Vec<SourceFailure> },
}

fn render_failures(failures: &[SourceFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{}: {}", f.source, f.error))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Why the circuit breaker tripped
#[derive(Debug, Clone, PartialEq)]
pub enum TripReason {
    /// Batch had fewer metrics than the configured minimum
    InsufficientProviders { got: usize, need: usize },
    /// A metric's APY was above the ceiling
    ApyAboveMax { apy: f64, max: f64 },
    /// Aggregate TVL moved too far from the last good aggregate
    TvlChange { change: f64, threshold: f64 },
    /// APY dispersion relative to the mean was too high
    ApyStdDev { ratio: f64, threshold: f64 },
}

impl std::fmt::Display for TripReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TripReason::InsufficientProviders { got, need } => {
                write!(f, "insufficient provider count: got {}, need {}", got, need)
            }
            TripReason::ApyAboveMax { apy, max } => {
                write!(f, "APY exceeds maximum threshold: {:.6} > {:.6}", apy, max)
            }
            TripReason::TvlChange { change, threshold } => write!(
                f,
                "TVL change too drastic: {:.2}% (threshold: {:.2}%)",
                change * 100.0,
                threshold * 100.0
            ),
            TripReason::ApyStdDev { ratio, threshold } => write!(
                f,
                "APY standard deviation too high: {:.2} x mean (threshold: {:.2})",
                ratio, threshold
            ),
        }
    }
}

/// Errors returned by the circuit breaker
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BreakerError {
    /// Nothing to evaluate
    #[error("no metrics provided to circuit breaker")]
    NoMetrics,

    /// Breaker is open and the reset delay has not elapsed
    #[error("circuit breaker open: system protection engaged")]
    Open,

    /// This batch violated a threshold and opened the breaker
    #[error("{0}")]
    Tripped(TripReason),
}

/// Errors that can occur when producing an aggregate
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Fetching failed for every source
    #[error("Error fetching metrics: {0}")]
    Fetch(#[from] FetchError),

    /// Validation removed every metric
    #[error("No valid metrics available after validation")]
    NoValidMetrics,

    /// Breaker blocked the batch and there is nothing to fall back to
    #[error("Circuit breaker open: {0}")]
    Breaker(#[from] BreakerError),

    /// Overall deadline elapsed
    #[error("Request deadline exceeded")]
    DeadlineExceeded,

    /// A blocking validation or aggregation task panicked
    #[error("Worker task failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}
