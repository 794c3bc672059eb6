//! The polling loop: measure every monitored asset, evaluate the reading,
//! and push a score update on-chain when the policy is breached.
//!
//! Measurement is sequential, in the configured order. Submissions for
//! breached assets run as their own tasks, so they proceed concurrently
//! while the remaining assets are measured; the account context serializes
//! their nonce usage. A round ends once every submission it started has
//! finished, so an asset never has two sequences in flight.

use crate::oracle::coordinator::{Confirmation, SubmissionCoordinator};
use crate::oracle::error::{ForgeError, SubmissionError};
use crate::oracle::metrics::{self, OracleMetrics, OracleMetricsCollector};
use crate::oracle::policy::BreachPolicy;
use crate::oracle::sensor::MeasurementSource;
use crate::types::{AssetId, Decision, OracleEvent};
use nonempty::NonEmpty;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Lifecycle of the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    PollingRound,
    Sleeping,
    ShuttingDown,
    Stopped,
}

/// What happened to each asset during one round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoundReport {
    pub round: u64,
    /// Assets whose reading reached the policy
    pub evaluated: usize,
    /// Assets without a usable reading
    pub skipped: usize,
    pub breaches: usize,
    pub confirmed: usize,
    /// Included on-chain but reverted by the contract
    pub reverted: usize,
    pub failed: usize,
    /// Panics caught at the per-asset task boundary
    pub faults: usize,
}

enum AssetOutcome {
    Safe,
    Breach { score: u8 },
    Skipped,
    Fault,
}

type SubmissionHandle = JoinHandle<Result<Confirmation, SubmissionError>>;

/// The polling loop: reads every monitored asset each round and submits an
/// update for each breach.
pub struct SensorOracle {
    /// Polled in this order every round
    assets: NonEmpty<AssetId>,
    /// Pause between the end of one round and the start of the next
    poll_interval: Duration,
    sensor: Arc<dyn MeasurementSource>,
    policy: BreachPolicy,
    coordinator: Arc<SubmissionCoordinator>,
    /// Caps concurrent submissions within a round
    submission_permits: Arc<Semaphore>,
    metrics: Arc<OracleMetricsCollector>,
    events: Option<mpsc::Sender<OracleEvent>>,
    /// Lifecycle, observable through `subscribe_state`
    state: watch::Sender<LoopState>,
}

impl SensorOracle {
    /// Assemble a loop over `assets`. At most `max_concurrent_submissions`
    /// updates are in flight at once (at least one). When `events` is set,
    /// breaches, confirmations, failures and round ends are published on it.
    pub fn new(
        assets: NonEmpty<AssetId>,
        poll_interval: Duration,
        sensor: Arc<dyn MeasurementSource>,
        policy: BreachPolicy,
        coordinator: Arc<SubmissionCoordinator>,
        max_concurrent_submissions: usize,
        events: Option<mpsc::Sender<OracleEvent>>,
    ) -> Self {
        let (state, _) = watch::channel(LoopState::Idle);
        Self {
            assets,
            poll_interval,
            sensor,
            policy,
            coordinator,
            submission_permits: Arc::new(Semaphore::new(max_concurrent_submissions.max(1))),
            metrics: Arc::new(OracleMetricsCollector::new()),
            events,
            state,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LoopState {
        *self.state.borrow()
    }

    /// Watch lifecycle transitions, e.g. to wait for `Stopped`.
    pub fn subscribe_state(&self) -> watch::Receiver<LoopState> {
        self.state.subscribe()
    }

    pub fn coordinator(&self) -> &Arc<SubmissionCoordinator> {
        &self.coordinator
    }

    /// Counters accumulated since construction.
    pub async fn metrics(&self) -> OracleMetrics {
        self.metrics.snapshot().await
    }

    /// Poll forever until `cancel` fires.
    ///
    /// Only an unusable signing credential ends the loop early; every other
    /// failure is logged and the next round proceeds on schedule.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), ForgeError> {
        info!(
            assets = self.assets.len(),
            interval_secs = self.poll_interval.as_secs(),
            threshold = self.policy.threshold(),
            "Starting FreshChain Sensor Oracle..."
        );

        let mut round = 0u64;
        let outcome = loop {
            if cancel.is_cancelled() {
                break Ok(());
            }

            round += 1;
            self.set_state(LoopState::PollingRound);
            if let Err(e) = self.poll_round(round, &cancel).await {
                error!(error = %e, "Signing credential failed; stopping oracle");
                break Err(e);
            }

            self.set_state(LoopState::Sleeping);
            tokio::select! {
                _ = cancel.cancelled() => break Ok(()),
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        };

        self.set_state(LoopState::ShuttingDown);
        self.metrics.log_summary().await;
        self.set_state(LoopState::Stopped);
        info!("Exiting FreshChain Sensor Oracle.");
        outcome
    }

    /// Run one pass over the monitored assets.
    #[instrument(skip(self, cancel))]
    pub async fn poll_round(&self, round: u64, cancel: &CancellationToken) -> Result<RoundReport, ForgeError> {
        let mut report = RoundReport {
            round,
            ..RoundReport::default()
        };
        let mut in_flight: Vec<(AssetId, SubmissionHandle)> = Vec::new();

        for &asset in self.assets.iter() {
            if cancel.is_cancelled() {
                info!(round, "Shutdown requested, skipping the rest of the round");
                break;
            }

            match self.evaluate_asset(asset).await {
                AssetOutcome::Safe => report.evaluated += 1,
                AssetOutcome::Breach { score } => {
                    report.evaluated += 1;
                    report.breaches += 1;
                    in_flight.push((asset, self.spawn_submission(asset, score, cancel.clone())));
                }
                AssetOutcome::Skipped => report.skipped += 1,
                AssetOutcome::Fault => report.faults += 1,
            }
        }

        let mut fatal = None;
        for (asset, handle) in in_flight {
            match handle.await {
                Ok(Ok(confirmation)) => {
                    self.metrics.add(metrics::ATTEMPTS, confirmation.attempts as u64).await;
                    self.record_confirmation(asset, confirmation, &mut report).await;
                }
                Ok(Err(e)) => {
                    self.metrics.add(metrics::ATTEMPTS, e.attempts() as u64).await;
                    self.metrics.increment_counter(metrics::FAILED).await;
                    report.failed += 1;
                    error!(asset = %asset, error = %e, "Failed to update freshness score");
                    self.notify(OracleEvent::SubmissionFailed {
                        asset,
                        error: e.to_string(),
                    });
                    if let SubmissionError::Credential(e) = e {
                        if fatal.is_none() {
                            fatal = Some(e);
                        }
                    }
                }
                Err(join_error) => {
                    self.metrics.increment_counter(metrics::FAULTS).await;
                    report.faults += 1;
                    error!(asset = %asset, error = %join_error, "Unexpected fault during submission");
                }
            }
        }

        self.metrics.increment_counter(metrics::ROUNDS).await;
        debug!(?report, "Round complete");
        self.notify(OracleEvent::RoundCompleted {
            round,
            evaluated: report.evaluated,
            breaches: report.breaches,
        });

        match fatal {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    async fn evaluate_asset(&self, asset: AssetId) -> AssetOutcome {
        // Read on a separate task so a panicking sensor only costs this asset.
        let sensor = Arc::clone(&self.sensor);
        let reading = match tokio::spawn(async move { sensor.read(asset).await }).await {
            Ok(Ok(reading)) if reading.value.is_finite() => reading,
            Ok(Ok(reading)) => {
                warn!(asset = %asset, value = reading.value, "Discarding non-finite reading");
                self.metrics.increment_counter(metrics::SENSOR_FAILURES).await;
                return AssetOutcome::Skipped;
            }
            Ok(Err(e)) => {
                warn!(asset = %asset, error = %e, "No reading this round");
                self.metrics.increment_counter(metrics::SENSOR_FAILURES).await;
                return AssetOutcome::Skipped;
            }
            Err(join_error) => {
                error!(asset = %asset, error = %join_error, "Unexpected fault while reading sensor");
                self.metrics.increment_counter(metrics::FAULTS).await;
                return AssetOutcome::Fault;
            }
        };

        self.metrics.increment_counter(metrics::READINGS).await;
        info!(
            "Monitoring asset {} | Current temperature: {:.2}{}",
            asset, reading.value, reading.unit
        );

        match self.policy.evaluate(&reading) {
            Decision::Safe => {
                info!(asset = %asset, "Temperature is within the safe range.");
                AssetOutcome::Safe
            }
            Decision::Breach { score } => {
                warn!(asset = %asset, score, "ALERT: Temperature breach detected! Updating freshness score.");
                self.metrics.increment_counter(metrics::BREACHES).await;
                self.notify(OracleEvent::BreachDetected { asset, reading, score });
                AssetOutcome::Breach { score }
            }
        }
    }

    fn spawn_submission(&self, asset: AssetId, score: u8, cancel: CancellationToken) -> SubmissionHandle {
        let coordinator = Arc::clone(&self.coordinator);
        let permits = Arc::clone(&self.submission_permits);
        tokio::spawn(async move {
            let _permit = permits
                .acquire_owned()
                .await
                .map_err(|_| SubmissionError::Cancelled { attempts: 0 })?;
            coordinator.submit(asset, score, &cancel).await
        })
    }

    async fn record_confirmation(&self, asset: AssetId, confirmation: Confirmation, report: &mut RoundReport) {
        let receipt = &confirmation.receipt;
        if receipt.succeeded {
            report.confirmed += 1;
            self.metrics.increment_counter(metrics::CONFIRMED).await;
            info!(
                asset = %asset,
                hash = %receipt.tx_hash,
                attempts = confirmation.attempts,
                "Transaction confirmed in block {}.",
                receipt.block_number
            );
        } else {
            report.reverted += 1;
            self.metrics.increment_counter(metrics::REVERTED).await;
            warn!(
                asset = %asset,
                hash = %receipt.tx_hash,
                block = receipt.block_number,
                "Transaction included but reverted by the contract"
            );
        }

        self.notify(OracleEvent::Confirmed {
            asset,
            receipt: confirmation.receipt,
            attempts: confirmation.attempts,
        });
    }

    fn notify(&self, event: OracleEvent) {
        if let Some(events) = &self.events {
            if let Err(e) = events.try_send(event) {
                debug!(error = %e, "Dropped oracle event");
            }
        }
    }

    fn set_state(&self, state: LoopState) {
        debug!(?state, "Oracle loop state");
        self.state.send_replace(state);
    }
}
