//! Provider abstraction for fetching yield metrics from external sources

use crate::{error::ProviderError, types::Metric};
use async_trait::async_trait;
use tokio::time::Instant;

/// Trait for yield data providers
///
/// One implementation per data source, and in multi-chain mode one per
/// network-specific client. The orchestrator enforces `deadline` by dropping
/// the future; implementations should also bound their own transport by it
/// and must not retry past it.
#[async_trait]
pub trait YieldProvider: Send + Sync {
    /// Fetches a batch of metrics
    ///
    /// # Arguments
    /// * `deadline` - Point in time after which the call is abandoned
    ///
    /// # Returns
    /// The metrics reported by this source. An empty batch is reported as
    /// [`ProviderError::EmptyResponse`], never as `Ok(vec![])`.
    async fn fetch_metrics(&self, deadline: Instant) -> Result<Vec<Metric>, ProviderError>;

    /// Returns the name of this provider
    fn provider_name(&self) -> &str;
}
