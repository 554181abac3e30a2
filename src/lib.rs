//! # Restaking Yield Aggregator SDK
//!
//! Collects APY / TVL metrics from restaking protocols (EigenLayer, Karak,
//! Symbiotic) or per-chain yield APIs, filters implausible and outlying
//! values, guards the result with a circuit breaker and reduces the batch
//! to one aggregated metric.
//!
//! ## Pipeline
//!
//! ```text
//! FetchOrchestrator → validation → CircuitBreaker → Aggregator
//! ```
//!
//! Every stage is usable on its own. [`YieldAggregator`] wires them
//! together from an [`AppConfig`].
//!
//! ## Usage
//!
//! ```no_run
//! use restake_yield_sdk::{AppConfig, YieldAggregator};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let aggregator = YieldAggregator::from_config(&AppConfig::from_env())?;
//!
//! let report = aggregator.run_default().await?;
//! println!(
//!     "{}: APY {:.2}% over TVL {:.0} ({} metrics)",
//!     report.metric.provider,
//!     report.metric.apy * 100.0,
//!     report.metric.tvl,
//!     report.metric_count
//! );
//!
//! let health = aggregator.health_check().await;
//! println!("{:?}", health.status);
//! # Ok(())
//! # }
//! ```

pub mod aggregate;
pub mod cache;
pub mod circuit_breaker;
pub mod config;
pub mod constants;
pub mod error;
pub mod metrics;
pub mod orchestrator;
pub mod pipeline;
pub mod provider;
pub mod providers;
pub mod types;
pub mod validation;

// Re-export commonly used types
pub use aggregate::{AggregationStrategy, Aggregator, Execution};
pub use circuit_breaker::{CircuitBreaker, Thresholds};
pub use config::AppConfig;
pub use error::{BreakerError, FetchError, PipelineError, ProviderError, TripReason};
pub use metrics::SourceMetrics;
pub use orchestrator::{FetchMode, FetchOrchestrator, FetchOutcome};
pub use pipeline::{AggregationReport, YieldAggregator};
pub use provider::YieldProvider;
pub use types::{BreakerState, Chain, ChainConfig, ComponentHealth, HealthStatus, Metric};
pub use validation::ValidationOptions;
