//! Oracle module - sensor polling, breach policy and on-chain score updates.
//!
//! `SensorOracle` drives the rounds. Each breach is handed to the
//! `SubmissionCoordinator`, which builds transactions with the
//! `TransactionForge` and talks to the chain through a `LedgerClient`.

pub mod account;
pub mod circuit_breaker;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod forge;
pub mod ledger;
pub mod metrics;
pub mod policy;
pub mod rate_limit;
pub mod sensor;
pub mod sensor_oracle;

// Re-export the loop and its configuration
pub use config::{LedgerConfig, OracleConfig, PolicyConfig, RetryConfig, SecretKey, SensorMode};
pub use sensor_oracle::{LoopState, RoundReport, SensorOracle};

// Re-export the components for callers wiring their own pieces
pub use account::{AccountContext, NonceCache};
pub use coordinator::{Confirmation, SubmissionCoordinator, SubmissionState};
pub use error::{ConfigError, ForgeError, LedgerError, RejectKind, SensorError, StartupError, SubmissionError};
pub use forge::{SignedTx, TransactionForge, UnsignedTx};
pub use ledger::{JsonRpcLedger, LedgerClient};
pub use metrics::{OracleMetrics, OracleMetricsCollector};
pub use policy::BreachPolicy;
pub use sensor::{DriftingTemperatureSensor, MeasurementSource, RandomTemperatureSensor};

use crate::types::OracleEvent;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Wires a `SensorOracle` from configuration.
///
/// Without an injected ledger, `build` connects a `JsonRpcLedger` to the
/// configured endpoint. Without an injected sensor, one is picked from
/// `sensor_mode`.
pub struct OracleBuilder {
    config: OracleConfig,
    ledger: Option<Arc<dyn LedgerClient>>,
    sensor: Option<Arc<dyn MeasurementSource>>,
    events: Option<mpsc::Sender<OracleEvent>>,
}

impl OracleBuilder {
    pub fn new(config: OracleConfig) -> Self {
        Self {
            config,
            ledger: None,
            sensor: None,
            events: None,
        }
    }

    /// Use an already connected ledger instead of the JSON-RPC endpoint.
    pub fn with_ledger(mut self, ledger: Arc<dyn LedgerClient>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Read measurements from `sensor` instead of a simulated one.
    pub fn with_sensor(mut self, sensor: Arc<dyn MeasurementSource>) -> Self {
        self.sensor = Some(sensor);
        self
    }

    /// Receive `OracleEvent`s. Events are dropped when the channel is full.
    pub fn with_event_sender(mut self, events: mpsc::Sender<OracleEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn config(&self) -> &OracleConfig {
        &self.config
    }

    /// Validate the credential, reach the ledger and assemble the loop.
    pub async fn build(self) -> Result<SensorOracle, StartupError> {
        let config = self.config;
        let signer = AccountContext::load_signer(&config.private_key, config.account_address)?;

        let ledger: Arc<dyn LedgerClient> = match self.ledger {
            Some(ledger) => ledger,
            None => {
                let rpc = JsonRpcLedger::connect(&config.ledger).await?;
                match rpc.is_authorized_oracle(config.contract_address, signer.address()).await {
                    Ok(true) => info!(address = %signer.address(), "Oracle account is authorized"),
                    Ok(false) => warn!(
                        address = %signer.address(),
                        contract = %config.contract_address,
                        "Oracle account is not authorized; updates will revert"
                    ),
                    Err(e) => warn!(error = %e, "Could not check oracle authorization"),
                }
                Arc::new(rpc)
            }
        };

        let initial_nonce = ledger.current_nonce(signer.address()).await?;
        info!(
            address = %signer.address(),
            chain_id = ledger.chain_id(),
            nonce = initial_nonce,
            "Oracle account ready"
        );

        let account = Arc::new(AccountContext::new(signer, initial_nonce));
        let forge = TransactionForge::new(config.contract_address, ledger.chain_id(), config.gas_limit);
        let coordinator = Arc::new(SubmissionCoordinator::new(
            ledger,
            account,
            forge,
            config.retry.clone(),
            config.receipt_timeout,
        ));

        let sensor = self.sensor.unwrap_or_else(|| match config.sensor_mode {
            SensorMode::Random => Arc::new(RandomTemperatureSensor::default()) as Arc<dyn MeasurementSource>,
            SensorMode::Drifting => Arc::new(DriftingTemperatureSensor::default()),
        });

        Ok(SensorOracle::new(
            config.monitored_assets,
            config.poll_interval,
            sensor,
            BreachPolicy::new(&config.policy),
            coordinator,
            config.max_concurrent_submissions,
            self.events,
        ))
    }
}
