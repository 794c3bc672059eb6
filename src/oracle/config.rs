//! Process-wide configuration, loaded once at startup.
//!
//! Values come from the environment (optionally seeded from a `.env` file).
//! Required keys have no defaults; their absence is a fatal startup error.

use crate::oracle::error::ConfigError;
use crate::types::AssetId;
use alloy::primitives::Address;
use nonempty::NonEmpty;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tokio_retry::strategy::ExponentialBackoff;

pub const PRIVATE_KEY: &str = "PRIVATE_KEY";
pub const WEB3_PROVIDER_URL: &str = "WEB3_PROVIDER_URL";
pub const CONTRACT_ADDRESS: &str = "CONTRACT_ADDRESS";
pub const ACCOUNT_ADDRESS: &str = "ACCOUNT_ADDRESS";
pub const MONITORED_ASSETS: &str = "MONITORED_ASSETS";
pub const TEMP_THRESHOLD: &str = "TEMP_THRESHOLD";
pub const BREACH_SCORE: &str = "BREACH_SCORE";
pub const POLL_INTERVAL_SECS: &str = "POLL_INTERVAL_SECS";
pub const RECEIPT_TIMEOUT_SECS: &str = "RECEIPT_TIMEOUT_SECS";
pub const RECEIPT_POLL_INTERVAL_MS: &str = "RECEIPT_POLL_INTERVAL_MS";
pub const RETRY_MAX_ATTEMPTS: &str = "RETRY_MAX_ATTEMPTS";
pub const RETRY_BASE_DELAY_MS: &str = "RETRY_BASE_DELAY_MS";
pub const RETRY_MAX_DELAY_MS: &str = "RETRY_MAX_DELAY_MS";
pub const GAS_LIMIT: &str = "GAS_LIMIT";
pub const RPC_TIMEOUT_SECS: &str = "RPC_TIMEOUT_SECS";
pub const RPC_RATE_LIMIT_PER_SEC: &str = "RPC_RATE_LIMIT_PER_SEC";
pub const MAX_CONCURRENT_SUBMISSIONS: &str = "MAX_CONCURRENT_SUBMISSIONS";
pub const EXPECTED_CHAIN_ID: &str = "EXPECTED_CHAIN_ID";
pub const SENSOR_MODE: &str = "SENSOR_MODE";

/// Threshold policy applied to every reading.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyConfig {
    /// Readings strictly above this value are breaches
    pub threshold: f64,
    /// Score written on-chain when a breach is detected
    pub breach_score: u8,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            threshold: 10.0,
            breach_score: 90,
        }
    }
}

/// Bounded exponential backoff for transient submission failures.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total attempts per sequence, including the first
    pub max_attempts: u32,
    /// Delay before the first retry; doubles for each subsequent one
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryConfig {
    /// Delays to sleep between attempts; yields `max_attempts - 1` values.
    pub fn backoff(&self) -> impl Iterator<Item = Duration> {
        // ExponentialBackoff yields factor * 2^n starting at n = 1, so the
        // base delay itself goes first.
        let base_ms = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX);
        let max_delay = self.max_delay;
        std::iter::once(self.base_delay.min(max_delay))
            .chain(ExponentialBackoff::from_millis(2).factor(base_ms).max_delay(max_delay))
            .take(self.max_attempts.saturating_sub(1) as usize)
    }
}

/// Connection settings for the ledger endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerConfig {
    /// HTTP JSON-RPC endpoint
    pub endpoint_url: String,
    /// Deadline for a single request
    pub request_timeout: Duration,
    /// Requests per second across every caller; 0 falls back to 10
    pub rate_limit_per_second: u32,
    /// Refuse to start when the endpoint reports another chain
    pub expected_chain_id: Option<u64>,
    /// Pause between receipt lookups while a transaction is pending
    pub receipt_poll_interval: Duration,
    /// Consecutive transient failures before the endpoint is degraded.
    /// Twice as many put it in cooldown.
    pub circuit_breaker_failure_threshold: u32,
    pub circuit_breaker_cooldown_seconds: u64,
}

impl LedgerConfig {
    /// Defaults for `endpoint_url`: 10s requests, 20 requests per second,
    /// one receipt lookup per second.
    pub fn new(endpoint_url: impl Into<String>) -> Self {
        Self {
            endpoint_url: endpoint_url.into(),
            request_timeout: Duration::from_secs(10),
            rate_limit_per_second: 20,
            expected_chain_id: None,
            receipt_poll_interval: Duration::from_millis(1000),
            circuit_breaker_failure_threshold: 5,
            circuit_breaker_cooldown_seconds: 30,
        }
    }
}

/// Which stand-in measurement source to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorMode {
    /// Independent uniform reading on every poll
    Random,
    /// Per-asset random walk
    Drifting,
}

impl FromStr for SensorMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "random" => Ok(SensorMode::Random),
            "drifting" => Ok(SensorMode::Drifting),
            other => Err(format!("unknown sensor mode `{other}` (expected `random` or `drifting`)")),
        }
    }
}

/// Signing key material. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretKey(String);

impl SecretKey {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// The raw key, for the signer only.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(<redacted>)")
    }
}

/// Complete oracle configuration.
#[derive(Debug, Clone)]
pub struct OracleConfig {
    pub private_key: SecretKey,
    pub account_address: Address,
    pub contract_address: Address,
    pub ledger: LedgerConfig,
    pub policy: PolicyConfig,
    pub retry: RetryConfig,
    /// Ordered list of assets polled each round
    pub monitored_assets: NonEmpty<AssetId>,
    pub poll_interval: Duration,
    pub receipt_timeout: Duration,
    pub gas_limit: u64,
    pub max_concurrent_submissions: usize,
    pub sensor_mode: SensorMode,
}

impl OracleConfig {
    /// Configuration with defaults for everything except the required values.
    pub fn new(
        private_key: SecretKey,
        account_address: Address,
        contract_address: Address,
        endpoint_url: impl Into<String>,
    ) -> Self {
        Self {
            private_key,
            account_address,
            contract_address,
            ledger: LedgerConfig::new(endpoint_url),
            policy: PolicyConfig::default(),
            retry: RetryConfig::default(),
            monitored_assets: NonEmpty {
                head: AssetId(1),
                tail: vec![AssetId(2), AssetId(3), AssetId(4)],
            },
            poll_interval: Duration::from_secs(30),
            receipt_timeout: Duration::from_secs(120),
            gas_limit: 120_000,
            max_concurrent_submissions: 4,
            sensor_mode: SensorMode::Random,
        }
    }

    /// Load from the process environment, after reading `.env` if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let required = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));

        let private_key = SecretKey::new(required(PRIVATE_KEY)?);
        let endpoint_url = required(WEB3_PROVIDER_URL)?;
        let contract_address = parse_value::<Address>(CONTRACT_ADDRESS, &required(CONTRACT_ADDRESS)?)?;
        let account_address = parse_value::<Address>(ACCOUNT_ADDRESS, &required(ACCOUNT_ADDRESS)?)?;

        let mut config = Self::new(private_key, account_address, contract_address, endpoint_url);

        if let Some(raw) = get(MONITORED_ASSETS) {
            config.monitored_assets = parse_assets(&raw)?;
        }
        if let Some(raw) = get(TEMP_THRESHOLD) {
            let threshold = parse_value::<f64>(TEMP_THRESHOLD, &raw)?;
            if !threshold.is_finite() {
                return Err(ConfigError::Invalid {
                    key: TEMP_THRESHOLD,
                    reason: "threshold must be finite".into(),
                });
            }
            config.policy.threshold = threshold;
        }
        if let Some(raw) = get(BREACH_SCORE) {
            config.policy.breach_score = parse_value(BREACH_SCORE, &raw)?;
        }
        if let Some(raw) = get(POLL_INTERVAL_SECS) {
            config.poll_interval = Duration::from_secs(parse_positive(POLL_INTERVAL_SECS, &raw)?);
        }
        if let Some(raw) = get(RECEIPT_TIMEOUT_SECS) {
            config.receipt_timeout = Duration::from_secs(parse_positive(RECEIPT_TIMEOUT_SECS, &raw)?);
        }
        if let Some(raw) = get(RECEIPT_POLL_INTERVAL_MS) {
            config.ledger.receipt_poll_interval =
                Duration::from_millis(parse_positive(RECEIPT_POLL_INTERVAL_MS, &raw)?);
        }
        if let Some(raw) = get(RETRY_MAX_ATTEMPTS) {
            config.retry.max_attempts = parse_positive(RETRY_MAX_ATTEMPTS, &raw)? as u32;
        }
        if let Some(raw) = get(RETRY_BASE_DELAY_MS) {
            config.retry.base_delay = Duration::from_millis(parse_value(RETRY_BASE_DELAY_MS, &raw)?);
        }
        if let Some(raw) = get(RETRY_MAX_DELAY_MS) {
            config.retry.max_delay = Duration::from_millis(parse_value(RETRY_MAX_DELAY_MS, &raw)?);
        }
        if let Some(raw) = get(GAS_LIMIT) {
            config.gas_limit = parse_positive(GAS_LIMIT, &raw)?;
        }
        if let Some(raw) = get(RPC_TIMEOUT_SECS) {
            config.ledger.request_timeout = Duration::from_secs(parse_positive(RPC_TIMEOUT_SECS, &raw)?);
        }
        if let Some(raw) = get(RPC_RATE_LIMIT_PER_SEC) {
            config.ledger.rate_limit_per_second = parse_positive(RPC_RATE_LIMIT_PER_SEC, &raw)? as u32;
        }
        if let Some(raw) = get(MAX_CONCURRENT_SUBMISSIONS) {
            config.max_concurrent_submissions = parse_positive(MAX_CONCURRENT_SUBMISSIONS, &raw)? as usize;
        }
        if let Some(raw) = get(EXPECTED_CHAIN_ID) {
            config.ledger.expected_chain_id = Some(parse_value(EXPECTED_CHAIN_ID, &raw)?);
        }
        if let Some(raw) = get(SENSOR_MODE) {
            config.sensor_mode = raw
                .parse()
                .map_err(|reason| ConfigError::Invalid { key: SENSOR_MODE, reason })?;
        }

        Ok(config)
    }
}

fn parse_value<T>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    raw.parse::<T>().map_err(|e| ConfigError::Invalid {
        key,
        reason: format!("`{raw}`: {e}"),
    })
}

fn parse_positive(key: &'static str, raw: &str) -> Result<u64, ConfigError> {
    match parse_value::<u64>(key, raw)? {
        0 => Err(ConfigError::Invalid {
            key,
            reason: "must be greater than zero".into(),
        }),
        value => Ok(value),
    }
}

fn parse_assets(raw: &str) -> Result<NonEmpty<AssetId>, ConfigError> {
    let ids = raw
        .split(',')
        .filter(|part| !part.trim().is_empty())
        .map(|part| parse_value::<AssetId>(MONITORED_ASSETS, part))
        .collect::<Result<Vec<_>, _>>()?;

    NonEmpty::from_vec(ids).ok_or(ConfigError::Invalid {
        key: MONITORED_ASSETS,
        reason: "at least one asset id is required".into(),
    })
}
