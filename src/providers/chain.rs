//! Generic per-network yield provider
//!
//! Network-specific clients (Polygon, Arbitrum, ...) are this provider with
//! a different [`Chain`]; the endpoint layout is shared.

use crate::{
    constants::CHAIN_YIELD_ENDPOINT,
    error::ProviderError,
    provider::YieldProvider,
    providers::http::{build_client, decode_json, RetryPolicy},
    types::{Chain, ChainConfig, Metric},
};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tokio::time::Instant;

#[derive(Debug, Deserialize)]
struct ChainYieldResponse {
    #[serde(default)]
    data: Vec<ChainYieldEntry>,
}

#[derive(Debug, Deserialize)]
struct ChainYieldEntry {
    protocol: String,
    apy: f64,
    tvl: f64,
    #[serde(default)]
    points_per_eth: f64,
    timestamp: i64,
}

/// Yield provider for a single chain's API
pub struct ChainProvider {
    client: Client,
    chain: Chain,
    api_url: String,
    api_key: Option<String>,
    name: String,
    retry: RetryPolicy,
}

impl ChainProvider {
    /// Creates a new provider for `chain`
    pub fn new(
        chain: Chain,
        api_url: impl Into<String>,
        api_key: Option<String>,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            client: build_client()?,
            chain,
            api_url: api_url.into(),
            api_key,
            name: format!("{}-yield", chain),
            retry: RetryPolicy::default(),
        })
    }

    /// Builds the default provider for a configured chain
    pub fn from_config(chain: Chain, config: &ChainConfig) -> Result<Self, ProviderError> {
        if !config.enabled {
            return Err(ProviderError::NotConfigured(format!(
                "chain {} is disabled",
                chain
            )));
        }
        if config.api_endpoint.is_empty() {
            return Err(ProviderError::NotConfigured(format!(
                "no providers available for chain {}",
                chain
            )));
        }
        Self::new(chain, config.api_endpoint.clone(), config.api_key.clone())
    }

    /// Overrides the retry schedule
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// The chain this provider reports for
    pub fn chain(&self) -> Chain {
        self.chain
    }
}

#[async_trait]
impl YieldProvider for ChainProvider {
    async fn fetch_metrics(&self, deadline: Instant) -> Result<Vec<Metric>, ProviderError> {
        let url = format!("{}{}", self.api_url.trim_end_matches('/'), CHAIN_YIELD_ENDPOINT);
        tracing::debug!(chain = %self.chain, url = %url, "Fetching chain yield");

        let response = self
            .retry
            .send(&self.name, deadline, || {
                let request = self.client.get(&url);
                match &self.api_key {
                    Some(key) if !key.is_empty() => request.bearer_auth(key),
                    _ => request,
                }
            })
            .await?;

        let body: ChainYieldResponse = decode_json(self.chain.id(), response).await?;
        if body.data.is_empty() {
            return Err(ProviderError::empty(self.chain.id()));
        }

        Ok(body
            .data
            .into_iter()
            .map(|d| {
                let mut metric = Metric::new(d.protocol, d.apy, d.tvl, d.points_per_eth)
                    .with_collected_at(d.timestamp);
                metric.chain = Some(self.chain);
                metric
            })
            .collect())
    }

    fn provider_name(&self) -> &str {
        &self.name
    }
}
