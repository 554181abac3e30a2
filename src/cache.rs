//! In-memory per-chain metric cache

use crate::{
    constants::CHAIN_CACHE_TTL_SECS,
    types::{Chain, Metric},
};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// A cached batch and when it was fetched
#[derive(Debug, Clone)]
struct CacheEntry {
    metrics: Vec<Metric>,
    fetched_at: Instant,
}

/// Short-lived cache of the last batch fetched per chain
///
/// Entries are never evicted; an expired entry is simply ignored on read
/// and replaced by the next successful fetch for that chain.
pub struct ChainCache {
    entries: RwLock<HashMap<Chain, CacheEntry>>,
    ttl: Duration,
}

impl ChainCache {
    /// Creates a cache with the default TTL
    pub fn new() -> Self {
        Self::with_ttl(Duration::from_secs(CHAIN_CACHE_TTL_SECS))
    }

    /// Creates a cache with a custom TTL
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Returns a copy of the chain's batch if it is younger than the TTL
    pub async fn get_fresh(&self, chain: Chain) -> Option<Vec<Metric>> {
        let entries = self.entries.read().await;
        let entry = entries.get(&chain)?;
        if entry.fetched_at.elapsed() < self.ttl {
            Some(entry.metrics.clone())
        } else {
            None
        }
    }

    /// Replaces the chain's batch
    pub async fn store(&self, chain: Chain, metrics: Vec<Metric>) {
        let count = metrics.len();
        let mut entries = self.entries.write().await;
        entries.insert(
            chain,
            CacheEntry {
                metrics,
                fetched_at: Instant::now(),
            },
        );
        tracing::debug!(chain = %chain, count, "Updated chain cache");
    }

    /// Drops every entry
    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    /// The configured TTL
    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

impl Default for ChainCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fresh_entries_are_returned() {
        let cache = ChainCache::new();
        assert!(cache.get_fresh(Chain::Ethereum).await.is_none());

        cache
            .store(Chain::Ethereum, vec![Metric::new("eigenlayer", 0.05, 1000.0, 1.0)])
            .await;
        let cached = cache.get_fresh(Chain::Ethereum).await.unwrap();
        assert_eq!(cached.len(), 1);
        assert!(cache.get_fresh(Chain::Polygon).await.is_none());
    }

    #[tokio::test]
    async fn expired_entries_are_ignored_then_replaced() {
        let cache = ChainCache::with_ttl(Duration::from_millis(20));
        cache
            .store(Chain::Base, vec![Metric::new("a", 0.05, 1000.0, 1.0)])
            .await;
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(cache.get_fresh(Chain::Base).await.is_none());

        cache
            .store(Chain::Base, vec![Metric::new("b", 0.06, 900.0, 1.0)])
            .await;
        let cached = cache.get_fresh(Chain::Base).await.unwrap();
        assert_eq!(cached[0].provider, "b");
    }
}
