//! EigenLayer yield provider implementation

use crate::{
    constants::{
        EIGENLAYER_API_URL, EIGENLAYER_INITIAL_BACKOFF_MS, EIGENLAYER_MAX_BACKOFF_MS,
        EIGENLAYER_METRICS_ENDPOINT,
    },
    error::ProviderError,
    provider::YieldProvider,
    providers::http::{build_client, decode_json, RetryPolicy},
    types::Metric,
};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tokio::time::Instant;

/// EigenLayer API response for metric queries
#[derive(Debug, Deserialize)]
struct EigenLayerResponse {
    #[serde(default)]
    data: Vec<EigenLayerMetric>,
}

#[derive(Debug, Deserialize)]
struct EigenLayerMetric {
    apy: f64,
    tvl: f64,
    #[serde(default)]
    points_per_eth: f64,
    collected_at: i64,
}

/// EigenLayer yield provider
pub struct EigenLayerProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    retry: RetryPolicy,
}

impl EigenLayerProvider {
    /// Creates a new EigenLayer provider
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Result<Self, ProviderError> {
        Ok(Self {
            client: build_client()?,
            base_url: base_url.into(),
            api_key,
            retry: RetryPolicy::new(EIGENLAYER_INITIAL_BACKOFF_MS, EIGENLAYER_MAX_BACKOFF_MS),
        })
    }

    /// Overrides the retry schedule
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn build_url(&self) -> String {
        format!(
            "{}{}",
            self.base_url.trim_end_matches('/'),
            EIGENLAYER_METRICS_ENDPOINT
        )
    }
}

impl Default for EigenLayerProvider {
    fn default() -> Self {
        Self::new(EIGENLAYER_API_URL, None).expect("Failed to create EigenLayer provider")
    }
}

#[async_trait]
impl YieldProvider for EigenLayerProvider {
    async fn fetch_metrics(&self, deadline: Instant) -> Result<Vec<Metric>, ProviderError> {
        let url = self.build_url();
        tracing::debug!(url = %url, "Fetching metrics from EigenLayer");

        let response = self
            .retry
            .send(self.provider_name(), deadline, || {
                let request = self.client.get(&url);
                match &self.api_key {
                    Some(key) => request.bearer_auth(key),
                    None => request,
                }
            })
            .await?;

        let body: EigenLayerResponse = decode_json("EigenLayer", response).await?;
        if body.data.is_empty() {
            return Err(ProviderError::empty(self.provider_name()));
        }

        let metrics: Vec<Metric> = body
            .data
            .into_iter()
            .map(|d| {
                Metric::new(self.provider_name(), d.apy, d.tvl, d.points_per_eth)
                    .with_collected_at(d.collected_at)
            })
            .collect();

        tracing::debug!(count = metrics.len(), "Received metrics from EigenLayer");
        Ok(metrics)
    }

    fn provider_name(&self) -> &str {
        "eigenlayer"
    }
}
