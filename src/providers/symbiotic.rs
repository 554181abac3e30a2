//! Symbiotic yield provider implementation

use crate::{
    constants::SYMBIOTIC_API_URL,
    error::ProviderError,
    provider::YieldProvider,
    providers::http::{build_client, decode_json, RetryPolicy},
    types::Metric,
};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tokio::time::Instant;

/// Symbiotic answers with a single flat object; points may be absent
#[derive(Debug, Deserialize)]
struct SymbioticResponse {
    apy: f64,
    tvl: f64,
    #[serde(default, rename = "pointsPerETH")]
    points_per_eth: f64,
}

/// Symbiotic yield provider
pub struct SymbioticProvider {
    client: Client,
    url: String,
    api_key: Option<String>,
    retry: RetryPolicy,
}

impl SymbioticProvider {
    /// Creates a new Symbiotic provider
    pub fn new(url: impl Into<String>, api_key: Option<String>) -> Result<Self, ProviderError> {
        Ok(Self {
            client: build_client()?,
            url: url.into(),
            api_key,
            retry: RetryPolicy::default(),
        })
    }

    /// Overrides the retry schedule
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

impl Default for SymbioticProvider {
    fn default() -> Self {
        Self::new(SYMBIOTIC_API_URL, None).expect("Failed to create Symbiotic provider")
    }
}

#[async_trait]
impl YieldProvider for SymbioticProvider {
    async fn fetch_metrics(&self, deadline: Instant) -> Result<Vec<Metric>, ProviderError> {
        tracing::debug!(url = %self.url, "Fetching yield from Symbiotic");

        let response = self
            .retry
            .send(self.provider_name(), deadline, || {
                let request = self.client.get(&self.url);
                match &self.api_key {
                    Some(key) => request.header(reqwest::header::AUTHORIZATION, key),
                    None => request,
                }
            })
            .await?;

        let data: SymbioticResponse = decode_json("Symbiotic", response).await?;

        Ok(vec![Metric::new(
            self.provider_name(),
            data.apy,
            data.tvl,
            data.points_per_eth,
        )])
    }

    fn provider_name(&self) -> &str {
        "symbiotic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn missing_points_default_to_zero() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("authorization", "key-1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"apy": 0.045, "tvl": 800.0})),
            )
            .mount(&server)
            .await;

        let provider = SymbioticProvider::new(server.uri(), Some("key-1".into())).unwrap();
        let metrics = provider
            .fetch_metrics(Instant::now() + Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].provider, "symbiotic");
        assert_eq!(metrics[0].points_per_eth, 0.0);
        assert_eq!(metrics[0].tvl, 800.0);
    }
}
