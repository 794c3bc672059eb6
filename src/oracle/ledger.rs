//! Ledger client: every interaction with the remote ledger endpoint.
//!
//! The coordinator depends only on the `LedgerClient` trait. `JsonRpcLedger`
//! is the production implementation, an alloy HTTP provider behind a
//! request-rate limiter and an endpoint circuit breaker.

use crate::oracle::circuit_breaker::CircuitBreaker;
use crate::oracle::config::LedgerConfig;
use crate::oracle::error::{LedgerError, RejectKind};
use crate::oracle::forge::{authorizedOraclesCall, SignedTx};
use crate::oracle::rate_limit::RpcRateLimiter;
use crate::types::{FeeEstimate, Receipt, TxHash};
use alloy::network::ReceiptResponse;
use alloy::primitives::{Address, Bytes};
use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use alloy::rpc::types::eth::{TransactionInput, TransactionRequest};
use alloy::sol_types::SolCall;
use alloy::transports::http::Http;
use alloy::transports::{RpcError, TransportError, TransportErrorKind, TransportResult};
use async_trait::async_trait;
use reqwest::Client;
use std::future::IntoFuture;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

/// Operations the oracle needs from the ledger.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Chain id captured when the connection was verified.
    fn chain_id(&self) -> u64;

    /// Next nonce for `address`, counting transactions still pending.
    async fn current_nonce(&self, address: Address) -> Result<u64, LedgerError>;

    async fn current_fee_rate(&self) -> Result<FeeEstimate, LedgerError>;

    /// Broadcast a signed payload. The only call that may report `Rejected`.
    async fn submit(&self, tx: &SignedTx) -> Result<TxHash, LedgerError>;

    /// Wait until `hash` is included or `timeout` elapses. Dropping the
    /// returned future abandons the wait.
    async fn await_receipt(&self, hash: TxHash, timeout: Duration) -> Result<Receipt, LedgerError>;
}

/// Ethereum JSON-RPC ledger over an alloy HTTP provider.
pub struct JsonRpcLedger {
    provider: RootProvider<Http<Client>>,
    chain_id: u64,
    request_timeout: Duration,
    receipt_poll_interval: Duration,
    rate_limiter: RpcRateLimiter,
    circuit_breaker: Mutex<CircuitBreaker>,
}

impl JsonRpcLedger {
    /// Connect and verify liveness. Nothing else may be called before this
    /// succeeds; failure here is fatal at startup.
    #[instrument(skip(config), fields(url = %config.endpoint_url))]
    pub async fn connect(config: &LedgerConfig) -> Result<Self, LedgerError> {
        let unreachable = |reason: String| LedgerError::Unreachable {
            url: config.endpoint_url.clone(),
            reason,
        };

        let url: reqwest::Url = config
            .endpoint_url
            .parse()
            .map_err(|e| unreachable(format!("invalid endpoint url: {e}")))?;

        let mut ledger = Self {
            provider: ProviderBuilder::new().on_http(url),
            chain_id: 0,
            request_timeout: config.request_timeout,
            receipt_poll_interval: config.receipt_poll_interval,
            rate_limiter: RpcRateLimiter::new(config.rate_limit_per_second),
            circuit_breaker: Mutex::new(CircuitBreaker::new(
                config.circuit_breaker_failure_threshold,
                config.circuit_breaker_cooldown_seconds,
                50,
            )),
        };

        let chain_id = ledger
            .call("eth_chainId", false, ledger.provider.get_chain_id())
            .await
            .map_err(|e| unreachable(e.to_string()))?;

        if let Some(expected) = config.expected_chain_id {
            if expected != chain_id {
                return Err(LedgerError::ChainMismatch {
                    expected,
                    actual: chain_id,
                });
            }
        }

        ledger.chain_id = chain_id;
        info!(chain_id, "Connected to ledger endpoint");
        Ok(ledger)
    }

    /// Whether `address` may write scores on `contract`.
    #[instrument(skip(self))]
    pub async fn is_authorized_oracle(&self, contract: Address, address: Address) -> Result<bool, LedgerError> {
        let request = TransactionRequest::default()
            .to(contract)
            .input(TransactionInput::new(Bytes::from(
                authorizedOraclesCall { oracle: address }.abi_encode(),
            )));
        let output = self.call("eth_call", false, self.provider.call(&request)).await?;

        let decoded = authorizedOraclesCall::abi_decode_returns(&output, true)
            .map_err(|e| LedgerError::Transient(format!("cannot decode authorizedOracles result: {e}")))?;
        Ok(decoded._0)
    }

    /// `None` while the transaction is still pending.
    async fn fetch_receipt(&self, hash: TxHash) -> Result<Option<Receipt>, LedgerError> {
        let receipt = self
            .call("eth_getTransactionReceipt", false, self.provider.get_transaction_receipt(hash))
            .await?;

        Ok(receipt.and_then(|r| {
            let block_number = r.block_number()?;
            Some(Receipt {
                tx_hash: r.transaction_hash(),
                block_number,
                block_hash: r.block_hash(),
                succeeded: r.status(),
                gas_used: u64::try_from(r.gas_used()).ok(),
            })
        }))
    }

    /// One provider request behind the breaker and the rate limiter, bounded
    /// by `request_timeout`. Only requests with `may_reject` set can come
    /// back as `Rejected`; every other failure is transient.
    async fn call<T, F>(&self, method: &'static str, may_reject: bool, request: F) -> Result<T, LedgerError>
    where
        F: IntoFuture<Output = TransportResult<T>>,
    {
        if !self.breaker(|cb| cb.is_available()) {
            return Err(LedgerError::Transient(format!(
                "ledger endpoint cooling down, skipped {method}"
            )));
        }
        self.rate_limiter.acquire().await;

        let result = match tokio::time::timeout(self.request_timeout, request).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(classify_transport_error(method, e, may_reject)),
            Err(_) => Err(LedgerError::Transient(format!(
                "{method}: no response within {}ms",
                self.request_timeout.as_millis()
            ))),
        };

        match &result {
            Err(LedgerError::Transient(reason)) => {
                let stats = self.breaker(|cb| {
                    cb.record_failure();
                    cb.stats()
                });
                debug!(
                    method,
                    %reason,
                    state = ?stats.state,
                    consecutive_failures = stats.consecutive_failures,
                    success_rate = stats.success_rate,
                    "Ledger call failed"
                );
            }
            _ => self.breaker(|cb| cb.record_success()),
        }
        result
    }

    fn breaker<R>(&self, f: impl FnOnce(&mut CircuitBreaker) -> R) -> R {
        match self.circuit_breaker.lock() {
            Ok(mut cb) => f(&mut cb),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }
}

#[async_trait]
impl LedgerClient for JsonRpcLedger {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    #[instrument(skip(self))]
    async fn current_nonce(&self, address: Address) -> Result<u64, LedgerError> {
        self.call(
            "eth_getTransactionCount",
            false,
            self.provider.get_transaction_count(address).pending(),
        )
        .await
    }

    #[instrument(skip(self))]
    async fn current_fee_rate(&self) -> Result<FeeEstimate, LedgerError> {
        let gas_price = self.call("eth_gasPrice", false, self.provider.get_gas_price()).await?;
        Ok(FeeEstimate { gas_price })
    }

    #[instrument(skip(self, tx), fields(asset = %tx.asset, nonce = tx.nonce))]
    async fn submit(&self, tx: &SignedTx) -> Result<TxHash, LedgerError> {
        match self
            .call("eth_sendRawTransaction", true, self.provider.send_raw_transaction(&tx.raw))
            .await
        {
            Ok(pending) => {
                let hash = *pending.tx_hash();
                if hash != tx.hash {
                    warn!(local = %tx.hash, remote = %hash, "Endpoint returned a different transaction hash");
                }
                Ok(hash)
            }
            Err(LedgerError::Rejected { message, .. }) if is_already_known(&message) => {
                debug!(hash = %tx.hash, "Transaction already in the endpoint's pool");
                Ok(tx.hash)
            }
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self))]
    async fn await_receipt(&self, hash: TxHash, timeout: Duration) -> Result<Receipt, LedgerError> {
        let started = Instant::now();
        let poll = async {
            loop {
                match self.fetch_receipt(hash).await {
                    Ok(Some(receipt)) => return receipt,
                    Ok(None) => {}
                    Err(e) => debug!(error = %e, "Receipt poll failed, will retry until timeout"),
                }
                tokio::time::sleep(self.receipt_poll_interval).await;
            }
        };

        tokio::time::timeout(timeout, poll)
            .await
            .map_err(|_| LedgerError::TimedOut {
                hash,
                waited_ms: started.elapsed().as_millis() as u64,
            })
    }
}

/// Map a provider failure onto the ledger taxonomy. JSON-RPC error objects
/// and HTTP client errors are only deterministic for `may_reject` calls.
fn classify_transport_error(method: &str, err: TransportError, may_reject: bool) -> LedgerError {
    match err {
        RpcError::ErrorResp(payload) if may_reject => classify_rpc_error(payload.code, &payload.message),
        RpcError::ErrorResp(payload) => {
            LedgerError::Transient(format!("{method}: rpc error {}: {}", payload.code, payload.message))
        }
        RpcError::Transport(TransportErrorKind::HttpError(http))
            if may_reject && (400..500).contains(&http.status) && http.status != 429 =>
        {
            LedgerError::Rejected {
                kind: RejectKind::Other,
                message: format!("{method}: HTTP {}: {}", http.status, http.body),
            }
        }
        other => LedgerError::Transient(format!("{method}: {other}")),
    }
}

fn is_already_known(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains("already known") || message.contains("known transaction")
}

/// Map a JSON-RPC error object to rejected (deterministic) or transient.
pub fn classify_rpc_error(code: i64, message: &str) -> LedgerError {
    let lower = message.to_ascii_lowercase();
    let rejected = |kind| LedgerError::Rejected {
        kind,
        message: message.to_string(),
    };

    if lower.contains("nonce too low")
        || lower.contains("nonce too high")
        || lower.contains("replacement transaction underpriced")
        || lower.contains("invalid nonce")
    {
        rejected(RejectKind::NonceConflict)
    } else if lower.contains("already known") || lower.contains("known transaction") {
        rejected(RejectKind::Other)
    } else if lower.contains("insufficient funds") {
        rejected(RejectKind::InsufficientFunds)
    } else if lower.contains("invalid sender") || lower.contains("invalid signature") {
        rejected(RejectKind::InvalidSignature)
    } else if lower.contains("execution reverted") || lower.contains("revert") {
        rejected(RejectKind::Reverted)
    } else if lower.contains("intrinsic gas too low")
        || lower.contains("exceeds block gas limit")
        || lower.contains("fee cap")
        || (-32602..=-32600).contains(&code)
        || code == -32700
    {
        rejected(RejectKind::Other)
    } else {
        // Rate limits, internal errors and unrecognised server errors.
        LedgerError::Transient(format!("rpc error {code}: {message}"))
    }
}
