//! Yield aggregation service
//!
//! Wires the stages together for one request:
//!
//! ```text
//! FetchOrchestrator::fetch_all(deadline)
//!     ↓
//! validation::filter_concurrently        (optional)
//!     ↓
//! CircuitBreaker::check                  (optional; on error → last good batch)
//!     ↓
//! Aggregator::aggregate → "aggregated-{strategy}"
//! ```

use crate::{
    aggregate::Aggregator,
    circuit_breaker::CircuitBreaker,
    config::AppConfig,
    constants::{AGGREGATED_PROVIDER, REQUEST_TIMEOUT_SECS},
    error::{FetchError, PipelineError, ProviderError, SourceFailure},
    metrics::SourceMetrics,
    orchestrator::{FetchMode, FetchOrchestrator},
    provider::YieldProvider,
    providers::{EigenLayerProvider, KarakProvider, SymbioticProvider},
    types::{BreakerState, ComponentHealth, HealthStatus, Metric},
    validation::{self, ValidationOptions},
};
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use uuid::Uuid;

/// Outcome of one pipeline run
#[derive(Debug, Clone, Serialize)]
pub struct AggregationReport {
    /// Identifier for correlating log lines of this run
    pub request_id: Uuid,
    /// The aggregate, tagged `aggregated-{strategy}`
    pub metric: Metric,
    /// Number of metrics that went into the aggregate
    pub metric_count: usize,
    /// Strategy name
    pub strategy: String,
    /// Whether the breaker rejected this round and the last good batch was used
    pub used_fallback: bool,
    /// Sources that failed during the fetch
    pub failures: Vec<SourceFailure>,
    /// Wall time of the run
    pub latency: Duration,
}

/// Fetch, validate, guard and aggregate yield metrics
///
/// # Example
/// ```no_run
/// use restake_yield_sdk::{AppConfig, YieldAggregator};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let aggregator = YieldAggregator::from_config(&AppConfig::from_env())?;
/// let report = aggregator.run_default().await?;
/// println!("{}: {:.4}", report.metric.provider, report.metric.apy);
/// # Ok(())
/// # }
/// ```
pub struct YieldAggregator {
    orchestrator: FetchOrchestrator,
    validation: Option<ValidationOptions>,
    breaker: Option<CircuitBreaker>,
    aggregator: Aggregator,
    request_timeout: Duration,
    last_failures: RwLock<Vec<SourceFailure>>,
}

impl YieldAggregator {
    /// Creates a service with default validation, a default breaker and
    /// weighted aggregation
    pub fn new(orchestrator: FetchOrchestrator) -> Self {
        Self {
            orchestrator,
            validation: Some(ValidationOptions::default()),
            breaker: Some(CircuitBreaker::new(Default::default())),
            aggregator: Aggregator::default(),
            request_timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
            last_failures: RwLock::new(Vec::new()),
        }
    }

    /// Builds the service and its providers from configuration
    ///
    /// Single-chain mode uses the EigenLayer, Karak and Symbiotic adapters;
    /// multi-chain mode fetches every enabled chain in `config.chains`.
    pub fn from_config(config: &AppConfig) -> Result<Self, ProviderError> {
        let orchestrator = if config.multi_chain {
            FetchOrchestrator::multi_chain(config.chains.clone())
        } else {
            let providers: Vec<Arc<dyn YieldProvider>> = vec![
                Arc::new(EigenLayerProvider::new(
                    config.eigen_url.clone(),
                    config.api_key("eigenlayer"),
                )?),
                Arc::new(KarakProvider::new(
                    config.karak_url.clone(),
                    config.api_key("karak"),
                )?),
                Arc::new(SymbioticProvider::new(
                    config.symbiotic_url.clone(),
                    config.api_key("symbiotic"),
                )?),
            ];
            FetchOrchestrator::new(providers)
        };

        let breaker = config.enable_circuit_breaker.then(|| {
            CircuitBreaker::new(config.thresholds.clone()).with_trip_callback(|reason, batch| {
                tracing::warn!(reason = %reason, count = batch.len(), "Circuit breaker tripped");
            })
        });

        tracing::info!(
            strategy = config.strategy.name(),
            multi_chain = config.multi_chain,
            validation = config.enable_validation,
            circuit_breaker = config.enable_circuit_breaker,
            "Yield aggregator initialized"
        );

        Ok(Self::new(orchestrator)
            .with_validation(
                config
                    .enable_validation
                    .then(|| config.validation.clone()),
            )
            .with_circuit_breaker(breaker)
            .with_aggregator(
                Aggregator::new(config.strategy.clone()).with_execution(config.execution),
            )
            .with_request_timeout(config.request_timeout))
    }

    /// Sets validation options; `None` disables validation
    pub fn with_validation(mut self, options: Option<ValidationOptions>) -> Self {
        self.validation = options;
        self
    }

    /// Sets the breaker; `None` disables it
    pub fn with_circuit_breaker(mut self, breaker: Option<CircuitBreaker>) -> Self {
        self.breaker = breaker;
        self
    }

    pub fn with_aggregator(mut self, aggregator: Aggregator) -> Self {
        self.aggregator = aggregator;
        self
    }

    /// Sets the budget used by [`run_default`](Self::run_default)
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// The underlying orchestrator, for registering providers or updating
    /// chain configuration
    pub fn orchestrator(&self) -> &FetchOrchestrator {
        &self.orchestrator
    }

    /// Runs the pipeline once with the configured request timeout
    pub async fn run_default(&self) -> Result<AggregationReport, PipelineError> {
        self.run_within(self.request_timeout).await
    }

    /// Runs the pipeline once with a relative budget
    pub async fn run_within(&self, budget: Duration) -> Result<AggregationReport, PipelineError> {
        self.run(Instant::now() + budget).await
    }

    /// Runs the pipeline once, fetching by `deadline`
    ///
    /// # Returns
    /// The aggregate and its provenance. Fails if every source failed,
    /// validation left nothing, or the breaker blocked the round with no
    /// good batch to fall back to.
    pub async fn run(&self, deadline: Instant) -> Result<AggregationReport, PipelineError> {
        let started = Instant::now();
        let request_id = Uuid::new_v4();
        if started >= deadline {
            return Err(PipelineError::DeadlineExceeded);
        }

        let outcome = self.orchestrator.fetch_all(deadline).await;
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                let FetchError::AllSourcesFailed { failures } = &e;
                *self.last_failures.write().await = failures.clone();
                tracing::error!(%request_id, error = %e, "Fetch failed");
                return Err(e.into());
            }
        };
        *self.last_failures.write().await = outcome.failures.clone();

        // CPU-bound stages run on the blocking pool, off the async workers
        let metrics = match &self.validation {
            Some(options) => {
                let options = options.clone();
                let fetched = outcome.metrics;
                tokio::task::spawn_blocking(move || {
                    validation::filter_concurrently(&fetched, &options)
                })
                .await?
            }
            None => outcome.metrics,
        };
        if metrics.is_empty() {
            tracing::warn!(%request_id, "No valid metrics after validation");
            return Err(PipelineError::NoValidMetrics);
        }

        let (batch, used_fallback) = self.guard(request_id, metrics).await?;

        let strategy = self.aggregator.strategy().name().to_string();
        let aggregator = self.aggregator.clone();
        let (mut metric, batch) = tokio::task::spawn_blocking(move || {
            let metric = aggregator.aggregate(&batch);
            (metric, batch)
        })
        .await?;
        metric.provider = format!("{}-{}", AGGREGATED_PROVIDER, strategy);
        if metric.collected_at == 0 {
            metric.collected_at = Utc::now().timestamp();
        }

        let latency = started.elapsed();
        tracing::info!(
            %request_id,
            strategy = %strategy,
            apy = metric.apy,
            tvl = metric.tvl,
            count = batch.len(),
            used_fallback,
            latency_ms = latency.as_millis() as u64,
            "Aggregation complete"
        );

        Ok(AggregationReport {
            request_id,
            metric,
            metric_count: batch.len(),
            strategy,
            used_fallback,
            failures: outcome.failures,
            latency,
        })
    }

    /// Runs the breaker, substituting the last good batch when it objects
    async fn guard(
        &self,
        request_id: Uuid,
        metrics: Vec<Metric>,
    ) -> Result<(Vec<Metric>, bool), PipelineError> {
        let Some(breaker) = &self.breaker else {
            return Ok((metrics, false));
        };

        match breaker.check(&metrics).await {
            Ok(()) => Ok((metrics, false)),
            Err(e) => match breaker.last_good_metrics().await {
                Some(good) => {
                    tracing::info!(
                        %request_id,
                        error = %e,
                        count = good.len(),
                        "Using last known good metrics"
                    );
                    Ok((good, true))
                }
                None => {
                    tracing::error!(%request_id, error = %e, "No fallback metrics available");
                    Err(e.into())
                }
            },
        }
    }

    /// Current breaker mode, or `None` if the breaker is disabled
    pub async fn breaker_state(&self) -> Option<BreakerState> {
        match &self.breaker {
            Some(breaker) => Some(breaker.state().await),
            None => None,
        }
    }

    /// Forces the breaker closed
    pub async fn reset_breaker(&self) {
        if let Some(breaker) = &self.breaker {
            breaker.reset().await;
        }
    }

    /// Fetch latency and success rates per source
    pub async fn source_metrics(&self) -> Vec<SourceMetrics> {
        self.orchestrator.source_metrics().await
    }

    /// Perform a health check on the aggregator
    ///
    /// # Returns
    /// Unhealthy while the breaker is open, degraded while it is half-open or
    /// when the last fetch had failing sources, healthy otherwise.
    pub async fn health_check(&self) -> ComponentHealth {
        let mut details = HashMap::new();

        let breaker_state = self.breaker_state().await;
        if let Some(state) = breaker_state {
            details.insert("circuit_state".to_string(), serde_json::json!(state));
            details.insert("circuit_gauge".to_string(), serde_json::json!(state.as_gauge()));
        }

        let failures = self.last_failures.read().await.clone();
        let failing: Vec<&str> = failures.iter().map(|f| f.source.as_str()).collect();
        details.insert("failing_sources".to_string(), serde_json::json!(failing));
        details.insert(
            "strategy".to_string(),
            serde_json::json!(self.aggregator.strategy().name()),
        );
        details.insert(
            "multi_chain".to_string(),
            serde_json::json!(self.orchestrator.mode() == FetchMode::MultiChain),
        );
        details.insert(
            "validation".to_string(),
            serde_json::json!(self.validation.is_some()),
        );

        let status = match breaker_state {
            Some(BreakerState::Open) => HealthStatus::Unhealthy,
            Some(BreakerState::HalfOpen) => HealthStatus::Degraded,
            _ if !failures.is_empty() => HealthStatus::Degraded,
            _ => HealthStatus::Healthy,
        };

        let message = match status {
            HealthStatus::Healthy => "Yield aggregator is operational".to_string(),
            HealthStatus::Degraded if breaker_state == Some(BreakerState::HalfOpen) => {
                "Circuit breaker is testing recovery".to_string()
            }
            HealthStatus::Degraded => format!("{} sources failed on the last fetch", failures.len()),
            HealthStatus::Unhealthy => "Circuit breaker is open".to_string(),
        };

        ComponentHealth {
            name: "yield_aggregator".to_string(),
            status,
            message: Some(message),
            details,
            last_checked: Utc::now(),
        }
    }
}
