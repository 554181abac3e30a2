//! Types for the restaking yield aggregator

use crate::constants::{AGGREGATED_PROVIDER, DEFAULT_MAX_AGE_SECS};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Supported blockchain networks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    /// Ethereum mainnet
    Ethereum,
    /// Polygon PoS
    Polygon,
    /// Arbitrum One
    Arbitrum,
    /// Optimism
    Optimism,
    /// Avalanche C-Chain
    Avalanche,
    /// BNB Smart Chain
    #[serde(rename = "binance")]
    Bsc,
    /// Base
    Base,
}

impl Chain {
    /// Get the chain identifier used in configuration and metric tags
    pub fn id(&self) -> &'static str {
        match self {
            Chain::Ethereum => "ethereum",
            Chain::Polygon => "polygon",
            Chain::Arbitrum => "arbitrum",
            Chain::Optimism => "optimism",
            Chain::Avalanche => "avalanche",
            Chain::Bsc => "binance",
            Chain::Base => "base",
        }
    }

    /// Get all supported chains
    pub fn all() -> &'static [Chain] {
        &[
            Chain::Ethereum,
            Chain::Polygon,
            Chain::Arbitrum,
            Chain::Optimism,
            Chain::Avalanche,
            Chain::Bsc,
            Chain::Base,
        ]
    }
}

impl std::fmt::Display for Chain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

impl std::str::FromStr for Chain {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Chain::all()
            .iter()
            .copied()
            .find(|c| c.id().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unsupported chain: {}", s))
    }
}

/// Per-network configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Whether this chain takes part in fetch rounds
    #[serde(default)]
    pub enabled: bool,
    /// API base URL for the chain's yield endpoint
    #[serde(default)]
    pub api_endpoint: String,
    /// Optional bearer key for the endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Weight for cross-chain aggregation
    #[serde(default = "default_weight")]
    pub weight: f64,
    /// Gas cost normalization multiplier
    #[serde(default = "default_weight", rename = "gas_multiple")]
    pub gas_multiplier: f64,
}

fn default_weight() -> f64 {
    1.0
}

impl ChainConfig {
    /// Creates an enabled chain configuration with unit weights
    pub fn enabled(api_endpoint: impl Into<String>) -> Self {
        Self {
            enabled: true,
            api_endpoint: api_endpoint.into(),
            api_key: None,
            weight: 1.0,
            gas_multiplier: 1.0,
        }
    }

    /// Sets the cross-chain weight
    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    /// Sets the API key
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }
}

/// A single yield metric reported by a source
///
/// Metrics are values: stages produce new metrics rather than mutating the
/// ones they are given.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    /// Identifier of the data source
    pub provider: String,

    /// Annual percentage yield as a decimal (0.05 = 5%)
    pub apy: f64,

    /// Total value locked
    pub tvl: f64,

    /// Protocol points per unit staked
    pub points_per_eth: f64,

    /// Unix timestamp (seconds) at which the metric was collected
    pub collected_at: i64,

    /// Agreement with the TVL-weighted consensus, in [0, 1]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,

    /// Network this metric was fetched from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain: Option<Chain>,

    /// Cross-chain weight taken from the chain's configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,

    /// Error annotation from the source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Metric {
    /// Create a new metric collected now
    pub fn new(provider: impl Into<String>, apy: f64, tvl: f64, points_per_eth: f64) -> Self {
        Self {
            provider: provider.into(),
            apy,
            tvl,
            points_per_eth,
            collected_at: Utc::now().timestamp(),
            confidence: None,
            chain: None,
            weight: None,
            error: None,
        }
    }

    /// The zero-valued aggregate returned for degenerate input
    pub fn empty_aggregate() -> Self {
        Self {
            collected_at: 0,
            ..Self::new(AGGREGATED_PROVIDER, 0.0, 0.0, 0.0)
        }
    }

    /// Create an aggregate metric
    pub fn aggregate(apy: f64, tvl: f64, points_per_eth: f64, collected_at: i64) -> Self {
        Self {
            collected_at,
            ..Self::new(AGGREGATED_PROVIDER, apy, tvl, points_per_eth)
        }
    }

    /// Returns a copy with a different collection timestamp
    pub fn with_collected_at(mut self, collected_at: i64) -> Self {
        self.collected_at = collected_at;
        self
    }

    /// Returns a copy carrying a confidence score
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    /// Returns a copy tagged with its origin chain and weight
    pub fn with_chain(mut self, chain: Chain, weight: f64) -> Self {
        self.chain = Some(chain);
        self.weight = Some(weight);
        self
    }

    /// Age of the metric in seconds relative to `now` (negative if from the future)
    pub fn age_secs_at(&self, now: i64) -> i64 {
        now - self.collected_at
    }

    /// Age of the metric in seconds
    pub fn age_secs(&self) -> i64 {
        self.age_secs_at(Utc::now().timestamp())
    }

    /// Basic sanity check independent of any validation options
    pub fn is_valid(&self) -> bool {
        self.apy >= 0.0
            && self.tvl > 0.0
            && self.points_per_eth >= 0.0
            && self.age_secs() < DEFAULT_MAX_AGE_SECS
            && !self.provider.is_empty()
    }

    /// Whether this metric can take part in TVL-weighted combination
    pub fn is_weightable(&self) -> bool {
        self.tvl > 0.0 && self.apy >= 0.0 && self.points_per_eth >= 0.0
    }
}

/// Circuit breaker mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    /// Normal operation
    Closed,
    /// Tripped; batches are blocked
    Open,
    /// Probing recovery
    HalfOpen,
}

impl BreakerState {
    /// Numeric form for gauges (0 = closed, 1 = open, 2 = half-open)
    pub fn as_gauge(&self) -> u8 {
        match self {
            BreakerState::Closed => 0,
            BreakerState::Open => 1,
            BreakerState::HalfOpen => 2,
        }
    }
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BreakerState::Closed => f.write_str("closed"),
            BreakerState::Open => f.write_str("open"),
            BreakerState::HalfOpen => f.write_str("half_open"),
        }
    }
}

/// Overall system health status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    /// System is healthy and all components are operational
    Healthy,
    /// System is degraded but still functional
    Degraded,
    /// System is unhealthy and requires attention
    Unhealthy,
}

/// Component health information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    /// Component name
    pub name: String,
    /// Component status
    pub status: HealthStatus,
    /// Optional status message
    pub message: Option<String>,
    /// Component-specific details
    pub details: std::collections::HashMap<String, serde_json::Value>,
    /// Last checked timestamp
    pub last_checked: DateTime<Utc>,
}
