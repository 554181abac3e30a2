//! Runtime configuration read from the environment
//!
//! Every field has a compiled-in default from [`crate::constants`]. A
//! variable that is set but cannot be parsed is logged and ignored.

use crate::{
    aggregate::{AggregationStrategy, Execution},
    circuit_breaker::Thresholds,
    constants::{
        DEFAULT_TRIM_FRACTION, EIGENLAYER_API_URL, KARAK_API_URL, REQUEST_TIMEOUT_SECS,
        SYMBIOTIC_API_URL,
    },
    types::{Chain, ChainConfig},
    validation::ValidationOptions,
};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

/// Settings for a [`crate::pipeline::YieldAggregator`]
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub eigen_url: String,
    pub karak_url: String,
    pub symbiotic_url: String,
    /// Provider name to API key
    pub api_keys: HashMap<String, String>,
    /// Overall deadline for one pipeline run
    pub request_timeout: Duration,
    pub strategy: AggregationStrategy,
    pub execution: Execution,
    pub enable_validation: bool,
    pub enable_circuit_breaker: bool,
    pub validation: ValidationOptions,
    pub thresholds: Thresholds,
    /// Fetch per chain instead of per provider
    pub multi_chain: bool,
    pub chains: HashMap<Chain, ChainConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            eigen_url: EIGENLAYER_API_URL.to_string(),
            karak_url: KARAK_API_URL.to_string(),
            symbiotic_url: SYMBIOTIC_API_URL.to_string(),
            api_keys: HashMap::new(),
            request_timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
            strategy: AggregationStrategy::Weighted,
            execution: Execution::Sequential,
            enable_validation: true,
            enable_circuit_breaker: true,
            validation: ValidationOptions::default(),
            thresholds: Thresholds::default(),
            multi_chain: false,
            chains: HashMap::new(),
        }
    }
}

impl AppConfig {
    /// Reads the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);
        let defaults = Self::default();
        let thresholds = &defaults.thresholds;

        let trim_fraction = env.parsed("TRIM_FRACTION", DEFAULT_TRIM_FRACTION);
        let strategy = env
            .string("AGGREGATION_MODE")
            .map(|mode| AggregationStrategy::parse(&mode, trim_fraction))
            .unwrap_or(defaults.strategy);
        let execution = if env.flag("PARALLEL_AGGREGATION", false) {
            Execution::Parallel
        } else {
            Execution::Sequential
        };

        let max_std_dev_multiple = match env.string("MAX_STD_DEV_MULTIPLE") {
            Some(raw) => match raw.parse::<f64>() {
                Ok(v) if v > 0.0 => Some(v),
                Ok(_) => None,
                Err(_) => {
                    warn_invalid("MAX_STD_DEV_MULTIPLE", &raw);
                    thresholds.max_std_dev_multiple
                }
            },
            None => thresholds.max_std_dev_multiple,
        };

        let config = Self {
            eigen_url: env.string("EIGEN_URL").unwrap_or(defaults.eigen_url),
            karak_url: env.string("KARAK_URL").unwrap_or(defaults.karak_url),
            symbiotic_url: env.string("SYMBIOTIC_URL").unwrap_or(defaults.symbiotic_url),
            api_keys: env.json("API_KEYS").unwrap_or_default(),
            request_timeout: env.duration("REQUEST_TIMEOUT", defaults.request_timeout),
            strategy,
            execution,
            enable_validation: env.flag("ENABLE_VALIDATION", defaults.enable_validation),
            enable_circuit_breaker: env
                .flag("ENABLE_CIRCUIT_BREAKER", defaults.enable_circuit_breaker),
            validation: defaults.validation.clone(),
            thresholds: Thresholds {
                max_apy: env.parsed("MAX_APY", thresholds.max_apy),
                max_tvl_change: env.parsed("MAX_TVL_CHANGE", thresholds.max_tvl_change),
                min_providers: env.parsed("MIN_PROVIDER_COUNT", thresholds.min_providers),
                max_std_dev_multiple,
                reset_delay: env.duration("CIRCUIT_RESET_DELAY", thresholds.reset_delay),
                success_threshold: env
                    .parsed("CIRCUIT_SUCCESS_THRESHOLD", thresholds.success_threshold),
            },
            multi_chain: env.flag("MULTI_CHAIN", defaults.multi_chain),
            chains: env.json("CHAINS").unwrap_or_default(),
        };

        tracing::debug!(
            strategy = config.strategy.name(),
            multi_chain = config.multi_chain,
            chains = config.chains.len(),
            validation = config.enable_validation,
            circuit_breaker = config.enable_circuit_breaker,
            "Loaded configuration"
        );
        config
    }

    /// API key configured for `provider`
    pub fn api_key(&self, provider: &str) -> Option<String> {
        self.api_keys.get(provider).cloned()
    }
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parsed<T: FromStr>(&self, key: &str, default: T) -> T {
        match self.string(key) {
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                warn_invalid(key, &raw);
                default
            }),
            None => default,
        }
    }

    fn flag(&self, key: &str, default: bool) -> bool {
        match self.string(key) {
            Some(raw) => parse_bool(&raw).unwrap_or_else(|| {
                warn_invalid(key, &raw);
                default
            }),
            None => default,
        }
    }

    fn duration(&self, key: &str, default: Duration) -> Duration {
        match self.string(key) {
            Some(raw) => parse_duration(&raw).unwrap_or_else(|| {
                warn_invalid(key, &raw);
                default
            }),
            None => default,
        }
    }

    fn json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.string(key)?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(key, error = %e, "Ignoring malformed JSON in environment");
                None
            }
        }
    }
}

fn warn_invalid(key: &str, raw: &str) {
    tracing::warn!(key, value = raw, "Ignoring invalid environment value, using default");
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parses `500ms`, `10s`, `5m`, `1h` or a bare number of seconds
pub fn parse_duration(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(raw.len());
    let (number, unit) = raw.split_at(split);
    let value: f64 = number.parse().ok()?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }

    let secs = match unit.trim() {
        "ms" => value / 1000.0,
        "" | "s" => value,
        "m" => value * 60.0,
        "h" => value * 3600.0,
        _ => return None,
    };
    Duration::try_from_secs_f64(secs).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(vars: &[(&str, &str)]) -> AppConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn empty_environment_uses_defaults() {
        assert_eq!(config(&[]), AppConfig::default());
    }

    #[test]
    fn reads_overrides() {
        let cfg = config(&[
            ("EIGEN_URL", "http://localhost:9000"),
            ("API_KEYS", r#"{"eigenlayer":"k1","karak":"k2"}"#),
            ("REQUEST_TIMEOUT", "15s"),
            ("AGGREGATION_MODE", "trimmed"),
            ("TRIM_FRACTION", "0.2"),
            ("PARALLEL_AGGREGATION", "true"),
            ("ENABLE_VALIDATION", "false"),
            ("MAX_APY", "2.5"),
            ("MIN_PROVIDER_COUNT", "3"),
            ("MAX_STD_DEV_MULTIPLE", "0.8"),
            ("CIRCUIT_RESET_DELAY", "2m"),
            ("CIRCUIT_SUCCESS_THRESHOLD", "5"),
        ]);

        assert_eq!(cfg.eigen_url, "http://localhost:9000");
        assert_eq!(cfg.api_key("karak").as_deref(), Some("k2"));
        assert_eq!(cfg.request_timeout, Duration::from_secs(15));
        assert_eq!(
            cfg.strategy,
            AggregationStrategy::TrimmedMean { trim_fraction: 0.2 }
        );
        assert_eq!(cfg.execution, Execution::Parallel);
        assert!(!cfg.enable_validation);
        assert!(cfg.enable_circuit_breaker);
        assert_eq!(cfg.thresholds.max_apy, 2.5);
        assert_eq!(cfg.thresholds.min_providers, 3);
        assert_eq!(cfg.thresholds.max_std_dev_multiple, Some(0.8));
        assert_eq!(cfg.thresholds.reset_delay, Duration::from_secs(120));
        assert_eq!(cfg.thresholds.success_threshold, 5);
    }

    #[test]
    fn unknown_mode_is_kept_as_fallback() {
        let cfg = config(&[("AGGREGATION_MODE", "quantum")]);
        assert_eq!(cfg.strategy, AggregationStrategy::Fallback("quantum".into()));
    }

    #[test]
    fn invalid_values_fall_back() {
        let cfg = config(&[
            ("REQUEST_TIMEOUT", "soon"),
            ("MAX_APY", "lots"),
            ("MULTI_CHAIN", "maybe"),
            ("CHAINS", "{not json"),
        ]);
        let defaults = AppConfig::default();
        assert_eq!(cfg.request_timeout, defaults.request_timeout);
        assert_eq!(cfg.thresholds.max_apy, defaults.thresholds.max_apy);
        assert!(!cfg.multi_chain);
        assert!(cfg.chains.is_empty());
    }

    #[test]
    fn reads_chain_map() {
        let cfg = config(&[
            ("MULTI_CHAIN", "1"),
            (
                "CHAINS",
                r#"{"ethereum":{"enabled":true,"api_endpoint":"https://eth.example","weight":2.0},
                    "binance":{"enabled":false,"api_endpoint":""}}"#,
            ),
        ]);
        assert!(cfg.multi_chain);
        assert_eq!(cfg.chains[&Chain::Ethereum].weight, 2.0);
        assert!(!cfg.chains[&Chain::Bsc].enabled);
        assert_eq!(cfg.chains[&Chain::Bsc].weight, 1.0);
    }

    #[test]
    fn durations() {
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("10s"), Some(Duration::from_secs(10)));
        assert_eq!(parse_duration("5m"), Some(Duration::from_secs(300)));
        assert_eq!(parse_duration("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration("45"), Some(Duration::from_secs(45)));
        assert_eq!(parse_duration("1.5s"), Some(Duration::from_millis(1500)));
        assert_eq!(parse_duration("10d"), None);
        assert_eq!(parse_duration("ms"), None);
    }

    #[test]
    fn oversized_duration_is_rejected() {
        assert_eq!(parse_duration("99999999999999999999999h"), None);
        assert_eq!(parse_duration("1e400"), None);

        let cfg = config(&[("CIRCUIT_RESET_DELAY", "99999999999999999999999h")]);
        assert_eq!(
            cfg.thresholds.reset_delay,
            AppConfig::default().thresholds.reset_delay
        );
    }
}
