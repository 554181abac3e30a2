//! Karak yield provider implementation

use crate::{
    constants::{KARAK_API_URL, KARAK_VAULTS_QUERY},
    error::ProviderError,
    provider::YieldProvider,
    providers::http::{build_client, decode_json, RetryPolicy},
    types::Metric,
};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// GraphQL request body
#[derive(Debug, Serialize)]
struct GraphQlRequest<'a> {
    query: &'a str,
}

#[derive(Debug, Deserialize)]
struct KarakResponse {
    data: KarakData,
}

#[derive(Debug, Deserialize)]
struct KarakData {
    #[serde(default)]
    vaults: Vec<KarakVault>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KarakVault {
    apy: f64,
    tvl: f64,
    #[serde(default, rename = "pointsPerETH")]
    points_per_eth: f64,
}

/// Karak yield provider
///
/// Reports the first vault of the GraphQL answer, stamped with the time of
/// collection since the API carries no timestamp.
pub struct KarakProvider {
    client: Client,
    url: String,
    api_key: Option<String>,
    retry: RetryPolicy,
}

impl KarakProvider {
    /// Creates a new Karak provider
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

impl Default for KarakProvider {
    fn default() -> Self {
        Self::new(KARAK_API_URL, None).expect("Failed to create Karak provider")
    }
}

#[async_trait]
impl YieldProvider for KarakProvider {
    async fn fetch_metrics(&self, deadline: Instant) -> Result<Vec<Metric>, ProviderError> {
        tracing::debug!(url = %self.url, "Fetching vaults from Karak");

        let body = GraphQlRequest {
            query: KARAK_VAULTS_QUERY,
        };
        let response = self
            .retry
            .send(self.provider_name(), deadline, || {
                let request = self.client.post(&self.url).json(&body);
                match &self.api_key {
                    Some(key) => request.header(reqwest::header::AUTHORIZATION, key),
                    None => request,
                }
            })
            .await?;

        let parsed: KarakResponse = decode_json("Karak", response).await?;
        let vault = parsed
            .data
            .vaults
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::empty(self.provider_name()))?;

        Ok(vec![Metric::new(
            self.provider_name(),
            vault.apy,
            vault.tvl,
            vault.points_per_eth,
        )])
    }

    fn provider_name(&self) -> &str {
        "karak"
    }
}
