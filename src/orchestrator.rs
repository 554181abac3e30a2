//! Fetch orchestration across providers and chains
//!
//! One task is spawned per provider (single-chain) or per enabled chain
//! (multi-chain). Every task gets its own sub-deadline of at most
//! [`PROVIDER_TIMEOUT_SECS`], clipped to the caller's deadline. A failing
//! task never aborts the others; the round only fails when nothing came
//! back and at least one source failed.
//!
//! ```text
//! fetch_all(deadline)
//!     ↓
//! JoinSet: one task per provider / chain
//!     ↓                        (chain task: cache hit? → return cached)
//! timeout_at(min(deadline, now + 10s), provider.fetch_metrics)
//!     ↓
//! merge + stamp chain tag / weight → FetchOutcome
//! ```

use crate::{
    cache::ChainCache,
    constants::PROVIDER_TIMEOUT_SECS,
    error::{FetchError, ProviderError, SourceFailure},
    metrics::{MetricsCollector, SourceMetrics},
    provider::YieldProvider,
    providers::ChainProvider,
    types::{Chain, ChainConfig, Metric},
};
use futures::future::{join_all, BoxFuture, FutureExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tokio::time::{timeout_at, Instant};

type SharedProvider = Arc<dyn YieldProvider>;

/// How sources are grouped for a fetch round
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    /// One task per configured provider
    SingleChain,
    /// One task per enabled chain, each fanning out to its providers
    MultiChain,
}

/// Result of a fetch round that produced at least some data
#[derive(Debug, Clone, Default)]
pub struct FetchOutcome {
    /// Merged metrics from every source that answered
    pub metrics: Vec<Metric>,
    /// Sources that failed this round
    pub failures: Vec<SourceFailure>,
    /// Number of top-level tasks dispatched
    pub dispatched: usize,
}

/// Output of one chain task
struct ChainRound {
    chain: Chain,
    result: Result<Vec<Metric>, ProviderError>,
    provider_failures: Vec<SourceFailure>,
}

/// Drives providers concurrently and merges their answers
pub struct FetchOrchestrator {
    mode: FetchMode,
    providers: Vec<SharedProvider>,
    chains: RwLock<HashMap<Chain, ChainConfig>>,
    chain_providers: RwLock<HashMap<Chain, Vec<SharedProvider>>>,
    default_providers: RwLock<HashMap<Chain, SharedProvider>>,
    cache: Arc<ChainCache>,
    metrics: Arc<MetricsCollector>,
    provider_timeout: Duration,
}

impl FetchOrchestrator {
    /// Creates a single-chain orchestrator over `providers`
    pub fn new(providers: Vec<Arc<dyn YieldProvider>>) -> Self {
        Self::build(FetchMode::SingleChain, providers, HashMap::new())
    }

    /// Creates a multi-chain orchestrator for the given chain configuration
    pub fn multi_chain(chains: HashMap<Chain, ChainConfig>) -> Self {
        Self::build(FetchMode::MultiChain, Vec::new(), chains)
    }

    fn build(
        mode: FetchMode,
        providers: Vec<SharedProvider>,
        chains: HashMap<Chain, ChainConfig>,
    ) -> Self {
        Self {
            mode,
            providers,
            chains: RwLock::new(chains),
            chain_providers: RwLock::new(HashMap::new()),
            default_providers: RwLock::new(HashMap::new()),
            cache: Arc::new(ChainCache::new()),
            metrics: Arc::new(MetricsCollector::new()),
            provider_timeout: Duration::from_secs(PROVIDER_TIMEOUT_SECS),
        }
    }

    /// Overrides the per-provider call budget
    pub fn with_provider_timeout(mut self, timeout: Duration) -> Self {
        self.provider_timeout = timeout;
        self
    }

    /// Overrides the per-chain cache TTL
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache = Arc::new(ChainCache::with_ttl(ttl));
        self
    }

    /// The fetch mode chosen at construction
    pub fn mode(&self) -> FetchMode {
        self.mode
    }

    /// Adds a data provider for a chain
    pub async fn register_provider(&self, chain: Chain, provider: Arc<dyn YieldProvider>) {
        let mut chain_providers = self.chain_providers.write().await;
        tracing::info!(
            chain = %chain,
            provider = provider.provider_name(),
            "Registered provider for chain"
        );
        chain_providers.entry(chain).or_default().push(provider);
    }

    /// Replaces a chain's configuration at runtime
    pub async fn update_chain_config(&self, chain: Chain, config: ChainConfig) {
        self.chains.write().await.insert(chain, config);
        // the default provider was built from the old endpoint
        self.default_providers.write().await.remove(&chain);
        tracing::info!(chain = %chain, "Updated chain configuration");
    }

    /// Current configuration for a chain
    pub async fn chain_config(&self, chain: Chain) -> Option<ChainConfig> {
        self.chains.read().await.get(&chain).cloned()
    }

    /// Enabled chains, in a stable order
    pub async fn enabled_chains(&self) -> Vec<Chain> {
        let chains = self.chains.read().await;
        let mut enabled: Vec<Chain> = chains
            .iter()
            .filter(|(_, cfg)| cfg.enabled)
            .map(|(chain, _)| *chain)
            .collect();
        enabled.sort();
        enabled
    }

    /// Fetch latency and success rates per source
    pub async fn source_metrics(&self) -> Vec<SourceMetrics> {
        self.metrics.all().await
    }

    /// Drops every cached chain batch
    pub async fn clear_cache(&self) {
        self.cache.clear().await;
    }

    /// Fetches from every source, finishing by `deadline`
    ///
    /// # Returns
    /// All metrics collected plus the sources that failed, or
    /// [`FetchError::AllSourcesFailed`] when no source produced data.
    pub async fn fetch_all(&self, deadline: Instant) -> Result<FetchOutcome, FetchError> {
        let outcome = match self.mode {
            FetchMode::SingleChain => self.fetch_providers(deadline).await,
            FetchMode::MultiChain => self.fetch_chains(deadline).await,
        };

        tracing::info!(
            succeeded = outcome.dispatched.saturating_sub(outcome.failures.len()),
            dispatched = outcome.dispatched,
            metrics = outcome.metrics.len(),
            "Fetch round complete"
        );

        if outcome.metrics.is_empty() && !outcome.failures.is_empty() {
            return Err(FetchError::AllSourcesFailed {
                failures: outcome.failures,
            });
        }
        Ok(outcome)
    }

    /// Convenience wrapper taking a relative budget
    pub async fn fetch_all_within(&self, budget: Duration) -> Result<FetchOutcome, FetchError> {
        self.fetch_all(Instant::now() + budget).await
    }

    async fn fetch_providers(&self, deadline: Instant) -> FetchOutcome {
        let jobs: Vec<BoxFuture<'static, Result<Vec<Metric>, ProviderError>>> = self
            .providers
            .iter()
            .map(|provider| {
                let source = provider.provider_name().to_string();
                call_provider(
                    provider.clone(),
                    source,
                    deadline,
                    self.provider_timeout,
                    self.metrics.clone(),
                )
                .boxed()
            })
            .collect();

        let joined = join_within(deadline, jobs).await;

        let mut outcome = FetchOutcome {
            dispatched: self.providers.len(),
            ..FetchOutcome::default()
        };
        for (provider, result) in self.providers.iter().zip(joined.results) {
            let name = provider.provider_name();
            match result.unwrap_or_else(|| Err(unfinished_error(joined.deadline_hit))) {
                Ok(metrics) => outcome.metrics.extend(metrics),
                Err(e) => {
                    tracing::warn!(provider = name, error = %e, "Provider fetch failed");
                    outcome.failures.push(SourceFailure::new(name, e));
                }
            }
        }
        outcome
    }

    async fn fetch_chains(&self, deadline: Instant) -> FetchOutcome {
        let enabled = self.enabled_chains().await;

        let mut jobs: Vec<BoxFuture<'static, ChainRound>> = Vec::with_capacity(enabled.len());
        for chain in &enabled {
            let chain = *chain;
            let providers = self.providers_for(chain).await;
            let cache = self.cache.clone();
            let metrics = self.metrics.clone();
            let provider_timeout = self.provider_timeout;
            jobs.push(
                async move {
                    fetch_chain(chain, providers, cache, metrics, deadline, provider_timeout).await
                }
                .boxed(),
            );
        }

        let joined = join_within(deadline, jobs).await;
        let chains = self.chains.read().await;

        let mut outcome = FetchOutcome {
            dispatched: enabled.len(),
            ..FetchOutcome::default()
        };
        for (chain, round) in enabled.iter().zip(joined.results) {
            let round = round.unwrap_or_else(|| ChainRound {
                chain: *chain,
                result: Err(unfinished_error(joined.deadline_hit)),
                provider_failures: Vec::new(),
            });
            outcome.failures.extend(round.provider_failures);

            match round.result {
                Ok(metrics) => {
                    let weight = chains.get(&round.chain).map(|c| c.weight).unwrap_or(1.0);
                    outcome.metrics.extend(
                        metrics
                            .into_iter()
                            .map(|m| m.with_chain(round.chain, weight)),
                    );
                }
                Err(e) => {
                    tracing::warn!(chain = %round.chain, error = %e, "Error fetching data for chain");
                    outcome.failures.push(SourceFailure::new(round.chain.id(), e));
                }
            }
        }
        outcome
    }

    /// Registered providers for a chain, or the default one built from its config
    async fn providers_for(&self, chain: Chain) -> Result<Vec<SharedProvider>, ProviderError> {
        if let Some(registered) = self.chain_providers.read().await.get(&chain) {
            if !registered.is_empty() {
                return Ok(registered.clone());
            }
        }
        if let Some(default) = self.default_providers.read().await.get(&chain) {
            return Ok(vec![default.clone()]);
        }

        let config = self
            .chain_config(chain)
            .await
            .ok_or_else(|| ProviderError::NotConfigured(format!("chain {} not configured", chain)))?;
        let provider: SharedProvider = Arc::new(ChainProvider::from_config(chain, &config)?);
        self.default_providers
            .write()
            .await
            .insert(chain, provider.clone());
        tracing::info!(chain = %chain, "Created default provider for chain");
        Ok(vec![provider])
    }
}

/// One chain task: cache first, then all of the chain's providers concurrently
async fn fetch_chain(
    chain: Chain,
    providers: Result<Vec<SharedProvider>, ProviderError>,
    cache: Arc<ChainCache>,
    metrics: Arc<MetricsCollector>,
    deadline: Instant,
    provider_timeout: Duration,
) -> ChainRound {
    if let Some(cached) = cache.get_fresh(chain).await {
        tracing::debug!(chain = %chain, count = cached.len(), "Serving chain from cache");
        return ChainRound {
            chain,
            result: Ok(cached),
            provider_failures: Vec::new(),
        };
    }

    let providers = match providers {
        Ok(providers) => providers,
        Err(e) => {
            return ChainRound {
                chain,
                result: Err(e),
                provider_failures: Vec::new(),
            }
        }
    };

    let calls = providers.iter().map(|provider| {
        let source = format!("{}/{}", chain, provider.provider_name());
        call_provider(
            provider.clone(),
            source,
            deadline,
            provider_timeout,
            metrics.clone(),
        )
    });
    let results = join_all(calls).await;

    let mut collected = Vec::new();
    let mut provider_failures = Vec::new();
    for (provider, result) in providers.iter().zip(results) {
        match result {
            Ok(batch) => collected.extend(batch),
            Err(e) => provider_failures.push(SourceFailure::new(
                format!("{}/{}", chain, provider.provider_name()),
                e,
            )),
        }
    }

    if collected.is_empty() && !provider_failures.is_empty() {
        let failed = provider_failures.len();
        return ChainRound {
            chain,
            result: Err(ProviderError::ApiError(format!(
                "all {} providers failed for chain {}",
                failed, chain
            ))),
            provider_failures,
        };
    }

    cache.store(chain, collected.clone()).await;
    ChainRound {
        chain,
        result: Ok(collected),
        provider_failures,
    }
}

/// Calls one provider under its own sub-deadline and records the outcome
async fn call_provider(
    provider: SharedProvider,
    source: String,
    parent_deadline: Instant,
    provider_timeout: Duration,
    metrics: Arc<MetricsCollector>,
) -> Result<Vec<Metric>, ProviderError> {
    let started = Instant::now();
    let deadline = parent_deadline.min(started + provider_timeout);

    let result = match timeout_at(deadline, provider.fetch_metrics(deadline)).await {
        Ok(Ok(batch)) if batch.is_empty() => Err(ProviderError::empty(source.clone())),
        Ok(result) => result,
        Err(_) => Err(ProviderError::Timeout),
    };

    metrics
        .record(&source, started.elapsed(), result.is_ok())
        .await;
    result
}

struct Joined<T> {
    results: Vec<Option<T>>,
    deadline_hit: bool,
}

/// Spawns every job and waits for all of them, or until `deadline`
///
/// On deadline the remaining tasks are aborted and joined before returning,
/// so nothing outlives the call. Unfinished jobs come back as `None`.
async fn join_within<T: Send + 'static>(
    deadline: Instant,
    jobs: Vec<BoxFuture<'static, T>>,
) -> Joined<T> {
    let mut results: Vec<Option<T>> = (0..jobs.len()).map(|_| None).collect();
    let mut set = JoinSet::new();
    for (idx, job) in jobs.into_iter().enumerate() {
        set.spawn(async move { (idx, job.await) });
    }

    let finished = timeout_at(deadline, async {
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((idx, value)) => results[idx] = Some(value),
                Err(e) => tracing::error!(error = %e, "Fetch task did not complete"),
            }
        }
    })
    .await;

    let deadline_hit = finished.is_err();
    if deadline_hit {
        set.abort_all();
        while let Some(joined) = set.join_next().await {
            if let Ok((idx, value)) = joined {
                results[idx] = Some(value);
            }
        }
    }

    Joined {
        results,
        deadline_hit,
    }
}

fn unfinished_error(deadline_hit: bool) -> ProviderError {
    if deadline_hit {
        ProviderError::Timeout
    } else {
        ProviderError::ApiError("fetch task aborted".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::mock::MockProvider;

    fn metric(provider: &str, apy: f64, tvl: f64) -> Metric {
        Metric::new(provider, apy, tvl, 1.0)
    }

    fn deadline() -> Instant {
        Instant::now() + Duration::from_secs(5)
    }

    #[tokio::test]
    async fn merges_all_providers() {
        let orchestrator = FetchOrchestrator::new(vec![
            Arc::new(MockProvider::returning("a", vec![metric("a", 0.05, 1000.0)])),
            Arc::new(MockProvider::returning(
                "b",
                vec![metric("b", 0.06, 2000.0), metric("b", 0.07, 500.0)],
            )),
        ]);

        let outcome = orchestrator.fetch_all(deadline()).await.unwrap();
        assert_eq!(outcome.metrics.len(), 3);
        assert!(outcome.failures.is_empty());
        assert_eq!(outcome.dispatched, 2);
    }

    #[tokio::test]
    async fn partial_failure_is_tolerated() {
        let orchestrator = FetchOrchestrator::new(vec![
            Arc::new(MockProvider::returning("a", vec![metric("a", 0.05, 1000.0)])),
            Arc::new(MockProvider::failing("b", "HTTP 500")),
            Arc::new(MockProvider::new("empty")),
        ]);

        let outcome = orchestrator.fetch_all(deadline()).await.unwrap();
        assert_eq!(outcome.metrics.len(), 1);
        assert_eq!(outcome.failures.len(), 2);
        let failed: Vec<&str> = outcome.failures.iter().map(|f| f.source.as_str()).collect();
        assert!(failed.contains(&"b"));
        assert!(failed.contains(&"empty"));
    }

    #[tokio::test]
    async fn total_failure_is_an_error() {
        let orchestrator = FetchOrchestrator::new(vec![
            Arc::new(MockProvider::failing("a", "boom")),
            Arc::new(MockProvider::new("b")),
        ]);

        let err = orchestrator.fetch_all(deadline()).await.unwrap_err();
        let FetchError::AllSourcesFailed { failures } = err;
        assert_eq!(failures.len(), 2);
    }

    #[tokio::test]
    async fn no_sources_is_an_empty_success() {
        let orchestrator = FetchOrchestrator::new(Vec::new());
        let outcome = orchestrator.fetch_all(deadline()).await.unwrap();
        assert!(outcome.metrics.is_empty());
        assert_eq!(outcome.dispatched, 0);
    }

    #[tokio::test]
    async fn slow_provider_hits_its_own_timeout() {
        let slow = MockProvider::returning("slow", vec![metric("slow", 0.05, 1000.0)]);
        slow.set_delay(Duration::from_secs(2));
        let orchestrator = FetchOrchestrator::new(vec![
            Arc::new(slow),
            Arc::new(MockProvider::returning("fast", vec![metric("fast", 0.06, 1000.0)])),
        ])
        .with_provider_timeout(Duration::from_millis(50));

        let started = Instant::now();
        let outcome = orchestrator.fetch_all(deadline()).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(outcome.metrics.len(), 1);
        assert_eq!(outcome.failures[0].source, "slow");
        assert_eq!(outcome.failures[0].error, "Request timeout");
    }

    #[tokio::test]
    async fn parent_deadline_cancels_every_task() {
        let slow = MockProvider::returning("slow", vec![metric("slow", 0.05, 1000.0)]);
        slow.set_delay(Duration::from_secs(2));
        let orchestrator = FetchOrchestrator::new(vec![Arc::new(slow)]);

        let started = Instant::now();
        let err = orchestrator
            .fetch_all(Instant::now() + Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(err.to_string().contains("slow: Request timeout"));
    }

    #[tokio::test]
    async fn timed_out_provider_is_not_fatal() {
        let stalled = MockProvider::new("stalled");
        stalled.set_timeout();
        let orchestrator = FetchOrchestrator::new(vec![
            Arc::new(stalled),
            Arc::new(MockProvider::returning("ok", vec![metric("ok", 0.05, 1000.0)])),
        ]);

        let outcome = orchestrator.fetch_all(deadline()).await.unwrap();
        assert_eq!(outcome.metrics.len(), 1);
        assert_eq!(outcome.metrics[0].provider, "ok");
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].source, "stalled");
        assert_eq!(outcome.failures[0].error, "Request timeout");
    }

    #[tokio::test]
    async fn records_source_metrics() {
        let orchestrator = FetchOrchestrator::new(vec![
            Arc::new(MockProvider::returning("a", vec![metric("a", 0.05, 1000.0)])),
            Arc::new(MockProvider::failing("b", "boom")),
        ]);
        orchestrator.fetch_all(deadline()).await.unwrap();

        let stats = orchestrator.source_metrics().await;
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].source, "a");
        assert_eq!(stats[0].success_rate, 1.0);
        assert_eq!(stats[1].failed_requests, 1);
    }

    fn two_chains() -> HashMap<Chain, ChainConfig> {
        let mut chains = HashMap::new();
        chains.insert(Chain::Ethereum, ChainConfig::enabled("").with_weight(1.0));
        chains.insert(Chain::Arbitrum, ChainConfig::enabled("").with_weight(0.5));
        chains.insert(
            Chain::Polygon,
            ChainConfig {
                enabled: false,
                ..ChainConfig::enabled("")
            },
        );
        chains
    }

    #[tokio::test]
    async fn multi_chain_stamps_chain_and_weight() {
        let orchestrator = FetchOrchestrator::multi_chain(two_chains());
        orchestrator
            .register_provider(
                Chain::Ethereum,
                Arc::new(MockProvider::returning("eth", vec![metric("eth", 0.05, 1000.0)])),
            )
            .await;
        orchestrator
            .register_provider(
                Chain::Arbitrum,
                Arc::new(MockProvider::returning("arb", vec![metric("arb", 0.04, 300.0)])),
            )
            .await;

        let outcome = orchestrator.fetch_all(deadline()).await.unwrap();
        assert_eq!(outcome.dispatched, 2);
        assert_eq!(outcome.metrics.len(), 2);

        let arb = outcome
            .metrics
            .iter()
            .find(|m| m.provider == "arb")
            .unwrap();
        assert_eq!(arb.chain, Some(Chain::Arbitrum));
        assert_eq!(arb.weight, Some(0.5));
        let eth = outcome
            .metrics
            .iter()
            .find(|m| m.provider == "eth")
            .unwrap();
        assert_eq!(eth.chain, Some(Chain::Ethereum));
        assert_eq!(eth.weight, Some(1.0));
    }

    #[tokio::test]
    async fn fresh_cache_skips_upstream() {
        let mut chains = HashMap::new();
        chains.insert(Chain::Ethereum, ChainConfig::enabled(""));
        let orchestrator = FetchOrchestrator::multi_chain(chains);

        let provider = Arc::new(MockProvider::returning("eth", vec![metric("eth", 0.05, 1000.0)]));
        orchestrator
            .register_provider(Chain::Ethereum, provider.clone())
            .await;

        orchestrator.fetch_all(deadline()).await.unwrap();
        // upstream now broken, but the cached batch is still fresh
        provider.set_error("down");
        let outcome = orchestrator.fetch_all(deadline()).await.unwrap();

        assert_eq!(provider.call_count(), 1);
        assert_eq!(outcome.metrics.len(), 1);
        assert_eq!(outcome.metrics[0].chain, Some(Chain::Ethereum));
    }

    #[tokio::test]
    async fn expired_cache_refetches() {
        let mut chains = HashMap::new();
        chains.insert(Chain::Base, ChainConfig::enabled(""));
        let orchestrator =
            FetchOrchestrator::multi_chain(chains).with_cache_ttl(Duration::from_millis(20));

        let provider = Arc::new(MockProvider::returning("base", vec![metric("base", 0.05, 1000.0)]));
        orchestrator.register_provider(Chain::Base, provider.clone()).await;

        orchestrator.fetch_all(deadline()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        provider.set_metrics(vec![metric("base", 0.06, 900.0)]);
        let outcome = orchestrator.fetch_all(deadline()).await.unwrap();

        assert_eq!(provider.call_count(), 2);
        assert_eq!(outcome.metrics[0].apy, 0.06);
    }

    #[tokio::test]
    async fn partial_chain_success_refreshes_cache() {
        let mut chains = HashMap::new();
        chains.insert(Chain::Optimism, ChainConfig::enabled(""));
        let orchestrator = FetchOrchestrator::multi_chain(chains);

        let good = Arc::new(MockProvider::returning("good", vec![metric("good", 0.05, 1000.0)]));
        orchestrator.register_provider(Chain::Optimism, good.clone()).await;
        orchestrator
            .register_provider(Chain::Optimism, Arc::new(MockProvider::failing("bad", "boom")))
            .await;

        let outcome = orchestrator.fetch_all(deadline()).await.unwrap();
        assert_eq!(outcome.metrics.len(), 1);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].source, "optimism/bad");

        let again = orchestrator.fetch_all(deadline()).await.unwrap();
        assert_eq!(good.call_count(), 1);
        assert!(again.failures.is_empty());
    }

    #[tokio::test]
    async fn chain_without_provider_or_endpoint_fails_alone() {
        let mut chains = HashMap::new();
        chains.insert(Chain::Ethereum, ChainConfig::enabled(""));
        chains.insert(Chain::Avalanche, ChainConfig::enabled(""));
        let orchestrator = FetchOrchestrator::multi_chain(chains);
        orchestrator
            .register_provider(
                Chain::Ethereum,
                Arc::new(MockProvider::returning("eth", vec![metric("eth", 0.05, 1000.0)])),
            )
            .await;

        let outcome = orchestrator.fetch_all(deadline()).await.unwrap();
        assert_eq!(outcome.metrics.len(), 1);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].source, "avalanche");
        assert!(outcome.failures[0].error.contains("no providers available"));
    }

    #[tokio::test]
    async fn all_chains_failing_is_an_error() {
        let mut chains = HashMap::new();
        chains.insert(Chain::Ethereum, ChainConfig::enabled(""));
        let orchestrator = FetchOrchestrator::multi_chain(chains);
        orchestrator
            .register_provider(Chain::Ethereum, Arc::new(MockProvider::failing("eth", "boom")))
            .await;

        let err = orchestrator.fetch_all(deadline()).await.unwrap_err();
        assert!(err.to_string().contains("all 1 providers failed for chain ethereum"));
    }

    #[tokio::test]
    async fn parent_deadline_cancels_chain_tasks() {
        let mut chains = HashMap::new();
        chains.insert(Chain::Ethereum, ChainConfig::enabled(""));
        let orchestrator = FetchOrchestrator::multi_chain(chains);

        let slow = Arc::new(MockProvider::returning("eth", vec![metric("eth", 0.05, 1000.0)]));
        slow.set_delay(Duration::from_secs(2));
        orchestrator.register_provider(Chain::Ethereum, slow).await;

        let started = Instant::now();
        let err = orchestrator
            .fetch_all(Instant::now() + Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(1));

        let FetchError::AllSourcesFailed { failures } = err;
        assert!(failures
            .iter()
            .any(|f| f.source.starts_with("ethereum") && f.error == "Request timeout"));
    }

    #[tokio::test]
    async fn chain_config_hot_reload() {
        let orchestrator = FetchOrchestrator::multi_chain(two_chains());
        assert_eq!(
            orchestrator.enabled_chains().await,
            vec![Chain::Arbitrum, Chain::Ethereum]
        );

        orchestrator
            .update_chain_config(Chain::Polygon, ChainConfig::enabled("http://polygon").with_weight(2.0))
            .await;
        assert_eq!(orchestrator.enabled_chains().await.len(), 3);
        assert_eq!(
            orchestrator.chain_config(Chain::Polygon).await.unwrap().weight,
            2.0
        );
    }
}
