//! Shared HTTP plumbing for provider adapters
//!
//! Retries live here rather than in the orchestrator: each adapter owns a
//! bounded [`RetryPolicy`] and the orchestrator treats whatever comes back
//! as final for the round.

use crate::{
    constants::{INITIAL_BACKOFF_MS, MAX_BACKOFF_MS, MAX_RETRY_ATTEMPTS, USER_AGENT},
    error::ProviderError,
};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};

/// Builds the HTTP client shared by an adapter
pub fn build_client() -> Result<Client, ProviderError> {
    Client::builder()
        .user_agent(USER_AGENT)
        .build()
        .map_err(ProviderError::NetworkError)
}

/// Bounded retry schedule with doubling backoff
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Wait before the second attempt
    pub initial_backoff: Duration,
    /// Cap for any single wait
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(INITIAL_BACKOFF_MS, MAX_BACKOFF_MS)
    }
}

impl RetryPolicy {
    /// Creates a policy with the standard attempt count
    pub fn new(initial_backoff_ms: u64, max_backoff_ms: u64) -> Self {
        Self {
            max_attempts: MAX_RETRY_ATTEMPTS,
            initial_backoff: Duration::from_millis(initial_backoff_ms),
            max_backoff: Duration::from_millis(max_backoff_ms),
        }
    }

    /// Wait before attempt `attempt + 1` (attempts are 1-based)
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    /// Sends a request built by `build`, retrying transient failures
    ///
    /// Each attempt is bounded by the time left until `deadline`, and no
    /// backoff sleep is started that would end past it.
    pub async fn send<F>(
        &self,
        source: &str,
        deadline: Instant,
        build: F,
    ) -> Result<Response, ProviderError>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut attempt = 1;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ProviderError::Timeout);
            }

            let result = match build().timeout(remaining).send().await {
                Ok(response) => check_status(response).await,
                Err(e) if e.is_timeout() => Err(ProviderError::Timeout),
                Err(e) => Err(ProviderError::NetworkError(e)),
            };

            match result {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    let wait = self.backoff_for(attempt);
                    let wake = Instant::now() + wait;
                    if wake >= deadline {
                        tracing::debug!(source, attempt, "No budget left for another attempt");
                        return Err(e);
                    }
                    tracing::debug!(
                        source,
                        attempt,
                        max_attempts = self.max_attempts,
                        backoff_ms = wait.as_millis() as u64,
                        error = %e,
                        "Request failed, retrying"
                    );
                    sleep_until(wake).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Maps non-success statuses to provider errors
async fn check_status(response: Response) -> Result<Response, ProviderError> {
    let status = response.status();

    // Check for rate limiting
    if status.as_u16() == 429 {
        return Err(ProviderError::RateLimitExceeded);
    }

    // Check for other errors
    if !status.is_success() {
        return Err(ProviderError::ApiError(format!(
            "HTTP {}: {}",
            status,
            response.text().await.unwrap_or_default()
        )));
    }

    Ok(response)
}

/// Reads and decodes a JSON body, keeping the raw text in decode errors
pub async fn decode_json<T: DeserializeOwned>(
    source: &str,
    response: Response,
) -> Result<T, ProviderError> {
    let response_text = response.text().await.map_err(ProviderError::NetworkError)?;
    serde_json::from_str(&response_text).map_err(|e| {
        ProviderError::InvalidResponse(format!(
            "Failed to parse {} response: {}. Response: {}",
            source, e, response_text
        ))
    })
}
