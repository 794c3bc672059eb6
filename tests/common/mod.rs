//! Shared fixtures for the integration tests: an in-memory ledger with
//! scripted failures and a sensor with per-asset behaviour.

#![allow(dead_code)]

use alloy::primitives::Address;
use async_trait::async_trait;
use freshchain_oracle::oracle::{
    AccountContext, LedgerClient, LedgerError, MeasurementSource, OracleConfig, RetryConfig, SecretKey,
    SensorError, SignedTx, SubmissionCoordinator, TransactionForge,
};
use freshchain_oracle::types::{AssetId, FeeEstimate, Reading, Receipt, TxHash};
use std::collections::{HashMap, VecDeque};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const TEST_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
pub const TEST_ACCOUNT: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";
pub const TEST_CONTRACT: &str = "0x5FbDB2315678afecb367f032d93F642f64180aa3";
pub const TEST_CHAIN_ID: u64 = 31337;
pub const FIRST_BLOCK: u64 = 123;

/// Ledger double. Unscripted calls succeed; scripted results are consumed
/// in order, one per call.
pub struct MockLedger {
    pending_nonce: Mutex<u64>,
    nonce_script: Mutex<VecDeque<Result<u64, LedgerError>>>,
    fee_script: Mutex<VecDeque<Result<FeeEstimate, LedgerError>>>,
    submit_script: Mutex<VecDeque<Result<(), LedgerError>>>,
    /// `Ok(succeeded)` or an error
    receipt_script: Mutex<VecDeque<Result<bool, LedgerError>>>,
    receipt_delay: Duration,
    submitted: Mutex<Vec<SignedTx>>,
    next_block: AtomicU64,
    nonce_calls: AtomicUsize,
    fee_calls: AtomicUsize,
    receipt_calls: AtomicUsize,
}

impl MockLedger {
    pub fn new(pending_nonce: u64) -> Self {
        Self {
            pending_nonce: Mutex::new(pending_nonce),
            nonce_script: Mutex::new(VecDeque::new()),
            fee_script: Mutex::new(VecDeque::new()),
            submit_script: Mutex::new(VecDeque::new()),
            receipt_script: Mutex::new(VecDeque::new()),
            receipt_delay: Duration::ZERO,
            submitted: Mutex::new(Vec::new()),
            next_block: AtomicU64::new(FIRST_BLOCK),
            nonce_calls: AtomicUsize::new(0),
            fee_calls: AtomicUsize::new(0),
            receipt_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_receipt_delay(mut self, delay: Duration) -> Self {
        self.receipt_delay = delay;
        self
    }

    pub fn script_nonce(&self, result: Result<u64, LedgerError>) {
        self.nonce_script.lock().unwrap().push_back(result);
    }

    pub fn script_fee(&self, result: Result<FeeEstimate, LedgerError>) {
        self.fee_script.lock().unwrap().push_back(result);
    }

    pub fn script_submit(&self, result: Result<(), LedgerError>) {
        self.submit_script.lock().unwrap().push_back(result);
    }

    pub fn script_receipt(&self, result: Result<bool, LedgerError>) {
        self.receipt_script.lock().unwrap().push_back(result);
    }

    pub fn submitted(&self) -> Vec<SignedTx> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn submitted_nonces(&self) -> Vec<u64> {
        self.submitted().iter().map(|tx| tx.nonce).collect()
    }

    pub fn submit_calls(&self) -> usize {
        self.submitted.lock().unwrap().len()
    }

    pub fn nonce_calls(&self) -> usize {
        self.nonce_calls.load(Ordering::SeqCst)
    }

    pub fn fee_calls(&self) -> usize {
        self.fee_calls.load(Ordering::SeqCst)
    }

    pub fn receipt_calls(&self) -> usize {
        self.receipt_calls.load(Ordering::SeqCst)
    }

    /// Any ledger traffic beyond the startup nonce lookup.
    pub fn submission_traffic(&self) -> usize {
        self.fee_calls() + self.submit_calls() + self.receipt_calls()
    }
}

#[async_trait]
impl LedgerClient for MockLedger {
    fn chain_id(&self) -> u64 {
        TEST_CHAIN_ID
    }

    async fn current_nonce(&self, _address: Address) -> Result<u64, LedgerError> {
        self.nonce_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(scripted) = self.nonce_script.lock().unwrap().pop_front() {
            return scripted;
        }
        Ok(*self.pending_nonce.lock().unwrap())
    }

    async fn current_fee_rate(&self) -> Result<FeeEstimate, LedgerError> {
        self.fee_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(scripted) = self.fee_script.lock().unwrap().pop_front() {
            return scripted;
        }
        Ok(FeeEstimate {
            gas_price: 1_000_000_000,
        })
    }

    async fn submit(&self, tx: &SignedTx) -> Result<TxHash, LedgerError> {
        self.submitted.lock().unwrap().push(tx.clone());
        if let Some(Err(e)) = self.submit_script.lock().unwrap().pop_front() {
            return Err(e);
        }

        let mut pending = self.pending_nonce.lock().unwrap();
        *pending = (*pending).max(tx.nonce + 1);
        Ok(tx.hash)
    }

    async fn await_receipt(&self, hash: TxHash, _timeout: Duration) -> Result<Receipt, LedgerError> {
        self.receipt_calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self.receipt_script.lock().unwrap().pop_front();
        if !self.receipt_delay.is_zero() {
            tokio::time::sleep(self.receipt_delay).await;
        }

        let succeeded = match scripted {
            Some(Err(e)) => return Err(e),
            Some(Ok(succeeded)) => succeeded,
            None => true,
        };
        Ok(Receipt {
            tx_hash: hash,
            block_number: self.next_block.fetch_add(1, Ordering::SeqCst),
            block_hash: None,
            succeeded,
            gas_used: Some(45_000),
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub enum SensorBehavior {
    Value(f64),
    Fail,
    Panic,
}

/// Sensor returning fixed behaviour per asset; unknown assets read 8.0.
pub struct ScriptedSensor {
    behaviors: HashMap<AssetId, SensorBehavior>,
    reads: Mutex<Vec<AssetId>>,
}

impl ScriptedSensor {
    pub fn new(behaviors: impl IntoIterator<Item = (u64, SensorBehavior)>) -> Self {
        Self {
            behaviors: behaviors.into_iter().map(|(id, b)| (AssetId(id), b)).collect(),
            reads: Mutex::new(Vec::new()),
        }
    }

    /// Every asset reads a safe value.
    pub fn safe() -> Self {
        Self::new(Vec::<(u64, SensorBehavior)>::new())
    }

    pub fn reads(&self) -> Vec<AssetId> {
        self.reads.lock().unwrap().clone()
    }
}

#[async_trait]
impl MeasurementSource for ScriptedSensor {
    async fn read(&self, asset: AssetId) -> Result<Reading, SensorError> {
        self.reads.lock().unwrap().push(asset);
        match self.behaviors.get(&asset).copied().unwrap_or(SensorBehavior::Value(8.0)) {
            SensorBehavior::Value(value) => Ok(Reading::celsius(asset, value)),
            SensorBehavior::Fail => Err(SensorError::Unavailable {
                asset,
                reason: "probe offline".into(),
            }),
            SensorBehavior::Panic => panic!("sensor driver crashed for asset {asset}"),
        }
    }
}

pub fn fast_retry(max_attempts: u32) -> RetryConfig {
    RetryConfig {
        max_attempts,
        base_delay: Duration::from_millis(2),
        max_delay: Duration::from_millis(10),
    }
}

pub fn test_config() -> OracleConfig {
    let mut config = OracleConfig::new(
        SecretKey::new(TEST_KEY),
        Address::from_str(TEST_ACCOUNT).unwrap(),
        Address::from_str(TEST_CONTRACT).unwrap(),
        "http://127.0.0.1:9",
    );
    config.retry = fast_retry(4);
    config.poll_interval = Duration::from_millis(20);
    config.receipt_timeout = Duration::from_secs(1);
    config
}

/// Coordinator over `ledger` whose nonce cache starts at `cached_nonce`.
pub fn coordinator(
    ledger: Arc<MockLedger>,
    cached_nonce: u64,
    retry: RetryConfig,
) -> SubmissionCoordinator {
    let signer = AccountContext::load_signer(&SecretKey::new(TEST_KEY), Address::from_str(TEST_ACCOUNT).unwrap())
        .unwrap();
    let account = Arc::new(AccountContext::new(signer, cached_nonce));
    let forge = TransactionForge::new(Address::from_str(TEST_CONTRACT).unwrap(), TEST_CHAIN_ID, 120_000);
    SubmissionCoordinator::new(ledger, account, forge, retry, Duration::from_secs(1))
}
