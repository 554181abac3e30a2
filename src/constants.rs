//! Constants for the restaking yield aggregator
//!
//! Compile-time defaults for every stage of the pipeline. Values that
//! operators commonly tune can be overridden at runtime through
//! [`crate::config::AppConfig::from_env`].

/// Fixed budget for a single provider call (in seconds)
///
/// Applied per provider regardless of how much of the parent deadline is
/// left, so one slow upstream cannot eat the whole request.
pub const PROVIDER_TIMEOUT_SECS: u64 = 10;

/// Default overall deadline for a pipeline run (in seconds)
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

/// How long a per-chain cache entry stays fresh (in seconds)
pub const CHAIN_CACHE_TTL_SECS: u64 = 300;

/// Maximum number of attempts a provider makes per call
pub const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Initial backoff delay between provider retries (in milliseconds)
pub const INITIAL_BACKOFF_MS: u64 = 500;

/// Maximum backoff delay between provider retries (in milliseconds)
pub const MAX_BACKOFF_MS: u64 = 3000;

/// EigenLayer uses a slower retry schedule
pub const EIGENLAYER_INITIAL_BACKOFF_MS: u64 = 1000;

/// Upper bound for the EigenLayer retry schedule (in milliseconds)
pub const EIGENLAYER_MAX_BACKOFF_MS: u64 = 5000;

/// Provider tag for every aggregated metric
pub const AGGREGATED_PROVIDER: &str = "aggregated";

/// Capacity of the circuit breaker's aggregate history
pub const BREAKER_HISTORY_CAPACITY: usize = 100;

/// Default APY ceiling for the circuit breaker (fractional, 10.0 = 1000%)
pub const DEFAULT_BREAKER_MAX_APY: f64 = 10.0;

/// Default maximum relative TVL change between two batches
pub const DEFAULT_MAX_TVL_CHANGE: f64 = 0.5;

/// Default minimum number of metrics a batch must carry
pub const DEFAULT_MIN_PROVIDERS: usize = 2;

/// Default delay before an open breaker probes recovery (in seconds)
pub const DEFAULT_RESET_DELAY_SECS: u64 = 300;

/// Default number of half-open successes needed to close the breaker
pub const DEFAULT_SUCCESS_THRESHOLD: u32 = 3;

/// Prior TVL at or below this value is too small to compare against
pub const MIN_COMPARABLE_TVL: f64 = 1.0;

/// Default maximum metric age accepted by validation (in seconds)
pub const DEFAULT_MAX_AGE_SECS: i64 = 24 * 60 * 60;

/// Default minimum TVL accepted by validation (exclusive)
pub const DEFAULT_MIN_TVL: f64 = 1.0;

/// Default APY ceiling accepted by validation (10.0 = 1000%)
pub const DEFAULT_MAX_APY: f64 = 10.0;

/// Standard IQR multiplier for outlier rejection
pub const DEFAULT_IQR_MULTIPLIER: f64 = 1.5;

/// Outlier detection needs at least this many points
pub const MIN_OUTLIER_SAMPLE: usize = 4;

/// IQR bounds narrower than this fall back to a mean-relative window
pub const MIN_OUTLIER_BOUND_WIDTH: f64 = 0.005;

/// Batches smaller than this are validated on the calling thread
pub const PARALLEL_VALIDATION_THRESHOLD: usize = 100;

/// Number of rayon chunks used for large-batch validation
pub const VALIDATION_WORKERS: usize = 4;

/// APY ceiling used by the validated aggregation variants (100.0 = 10000%)
pub const AGGREGATE_MAX_APY: f64 = 100.0;

/// Number of rayon chunks used by parallel weighted aggregation
pub const AGGREGATION_WORKERS: usize = 4;

/// Default trim fraction for the trimmed-mean strategy
pub const DEFAULT_TRIM_FRACTION: f64 = 0.1;

/// Minimum confidence a metric needs to take part in consensus aggregation
pub const CONSENSUS_MIN_CONFIDENCE: f64 = 0.7;

/// Consensus aggregation keeps the full set when fewer metrics than this agree
pub const CONSENSUS_MIN_METRICS: usize = 2;

/// Rolling window size for per-source fetch metrics
pub const MAX_METRIC_SAMPLES: usize = 100;

/// Default EigenLayer API base URL
pub const EIGENLAYER_API_URL: &str = "https://api.eigenlayer.xyz/yield";

/// EigenLayer endpoint for yield metrics
pub const EIGENLAYER_METRICS_ENDPOINT: &str = "/v1/metrics";

/// Default Karak GraphQL URL
pub const KARAK_API_URL: &str = "https://karak.network/graphql";

/// Karak GraphQL query for vault yields
pub const KARAK_VAULTS_QUERY: &str = "{ vaults { apy tvl pointsPerETH } }";

/// Default Symbiotic API URL
pub const SYMBIOTIC_API_URL: &str = "https://api.symbiotic.finance/yield";

/// Endpoint appended to a chain's API base URL
pub const CHAIN_YIELD_ENDPOINT: &str = "/yield";

/// User agent for HTTP requests
pub const USER_AGENT: &str = "restake-yield-sdk/0.1.0";
