//! In-process counters for the oracle loop. Nothing is persisted.

use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::info;

pub const ROUNDS: &str = "oracle_rounds_total";
pub const READINGS: &str = "oracle_readings_total";
pub const SENSOR_FAILURES: &str = "oracle_sensor_failures_total";
pub const BREACHES: &str = "oracle_breaches_total";
pub const CONFIRMED: &str = "oracle_submissions_confirmed_total";
pub const REVERTED: &str = "oracle_submissions_reverted_total";
pub const FAILED: &str = "oracle_submissions_failed_total";
pub const ATTEMPTS: &str = "oracle_submission_attempts_total";
pub const FAULTS: &str = "oracle_unexpected_faults_total";

/// Point-in-time copy of all counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OracleMetrics {
    pub rounds: u64,
    pub readings: u64,
    pub sensor_failures: u64,
    pub breaches: u64,
    pub confirmed: u64,
    pub reverted: u64,
    pub failed: u64,
    pub attempts: u64,
    pub faults: u64,
}

#[derive(Default)]
pub struct OracleMetricsCollector {
    counters: RwLock<HashMap<&'static str, u64>>,
}

impl OracleMetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn increment_counter(&self, name: &'static str) {
        self.add(name, 1).await;
    }

    /// Add `value` to the counter `name`, creating it at zero.
    pub async fn add(&self, name: &'static str, value: u64) {
        *self.counters.write().await.entry(name).or_insert(0) += value;
    }

    /// Copy of every counter; unknown names read zero.
    pub async fn snapshot(&self) -> OracleMetrics {
        let counters = self.counters.read().await;
        let get = |name: &str| counters.get(name).copied().unwrap_or(0);
        OracleMetrics {
            rounds: get(ROUNDS),
            readings: get(READINGS),
            sensor_failures: get(SENSOR_FAILURES),
            breaches: get(BREACHES),
            confirmed: get(CONFIRMED),
            reverted: get(REVERTED),
            failed: get(FAILED),
            attempts: get(ATTEMPTS),
            faults: get(FAULTS),
        }
    }

    /// Emit every counter as one `info` event; called on shutdown.
    pub async fn log_summary(&self) {
        let m = self.snapshot().await;
        info!(
            rounds = m.rounds,
            readings = m.readings,
            breaches = m.breaches,
            confirmed = m.confirmed,
            reverted = m.reverted,
            failed = m.failed,
            attempts = m.attempts,
            faults = m.faults,
            "Final oracle metrics"
        );
    }
}
