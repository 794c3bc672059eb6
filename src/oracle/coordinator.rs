//! Submission coordinator: drives one update from build to confirmation.
//!
//! Each attempt walks `Building -> Signing -> Submitting -> AwaitingReceipt`.
//! Transient failures (including receipt time-outs and nonce races) restart
//! the whole sequence from `Building` with fresh nonce and fee data, after an
//! exponential backoff. Deterministic rejections end the sequence at once.
//!
//! The account's nonce guard is held from nonce lookup until the ledger has
//! answered the submission, and released before waiting for the receipt.

use crate::oracle::account::AccountContext;
use crate::oracle::config::RetryConfig;
use crate::oracle::error::{ForgeError, LedgerError, SubmissionError};
use crate::oracle::forge::TransactionForge;
use crate::oracle::ledger::LedgerClient;
use crate::types::{AssetId, Receipt};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Where an attempt sequence currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionState {
    Building,
    Signing,
    Submitting,
    AwaitingReceipt,
    Confirmed,
    Failed,
}

/// Successful end of a sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirmation {
    pub receipt: Receipt,
    /// Attempts used, including the successful one
    pub attempts: u32,
    pub nonce: u64,
}

enum AttemptFailure {
    Ledger(LedgerError),
    Credential(ForgeError),
    Cancelled,
}

impl From<LedgerError> for AttemptFailure {
    fn from(e: LedgerError) -> Self {
        AttemptFailure::Ledger(e)
    }
}

impl From<ForgeError> for AttemptFailure {
    fn from(e: ForgeError) -> Self {
        AttemptFailure::Credential(e)
    }
}

/// Drives one breach update from nonce reservation to receipt.
///
/// Attempts for the same account are serialized from the nonce lookup up to
/// the broadcast, so concurrent breaches get distinct, increasing nonces.
/// Transient failures and nonce conflicts rebuild the transaction from
/// scratch after a backoff delay.
pub struct SubmissionCoordinator {
    ledger: Arc<dyn LedgerClient>,
    /// Shared by every in-flight submission
    account: Arc<AccountContext>,
    forge: TransactionForge,
    /// Attempt budget and backoff between attempts
    retry: RetryConfig,
    /// Longest wait for inclusion after a broadcast
    receipt_timeout: Duration,
}

impl SubmissionCoordinator {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        account: Arc<AccountContext>,
        forge: TransactionForge,
        retry: RetryConfig,
        receipt_timeout: Duration,
    ) -> Self {
        Self {
            ledger,
            account,
            forge,
            retry,
            receipt_timeout,
        }
    }

    /// Signing account and its nonce cache.
    pub fn account(&self) -> &Arc<AccountContext> {
        &self.account
    }

    /// Write `score` for `asset` and wait for confirmation.
    ///
    /// Cancellation is honoured before an attempt starts and while backing
    /// off; an attempt that has reached the ledger runs to its receipt.
    #[instrument(skip(self, cancel), fields(asset = %asset))]
    pub async fn submit(
        &self,
        asset: AssetId,
        score: u8,
        cancel: &CancellationToken,
    ) -> Result<Confirmation, SubmissionError> {
        let mut delays = self.retry.backoff();
        let mut attempts = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Err(SubmissionError::Cancelled { attempts });
            }
            attempts += 1;

            let failure = match self.attempt(asset, score, cancel).await {
                Ok((receipt, nonce)) => {
                    debug!(state = ?SubmissionState::Confirmed, attempts, "Submission sequence finished");
                    return Ok(Confirmation {
                        receipt,
                        attempts,
                        nonce,
                    });
                }
                Err(AttemptFailure::Credential(e)) => {
                    debug!(state = ?SubmissionState::Failed, "Signing credential unusable");
                    return Err(SubmissionError::Credential(e));
                }
                Err(AttemptFailure::Cancelled) => {
                    return Err(SubmissionError::Cancelled {
                        attempts: attempts - 1,
                    });
                }
                Err(AttemptFailure::Ledger(e)) => e,
            };

            if !(failure.is_transient() || failure.is_nonce_conflict()) {
                debug!(state = ?SubmissionState::Failed, attempts, error = %failure, "Not retrying");
                return Err(match failure {
                    LedgerError::Rejected { kind, message } => SubmissionError::Rejected {
                        kind,
                        message,
                        attempts,
                    },
                    other => SubmissionError::Exhausted {
                        last: other,
                        attempts,
                    },
                });
            }

            let Some(delay) = delays.next() else {
                debug!(state = ?SubmissionState::Failed, attempts, "Retry budget exhausted");
                return Err(SubmissionError::Exhausted {
                    last: failure,
                    attempts,
                });
            };

            warn!(
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                error = %failure,
                "Submission attempt failed, retrying from a fresh build"
            );
            tokio::select! {
                _ = cancel.cancelled() => return Err(SubmissionError::Cancelled { attempts }),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// One pass through the state machine. Returns the receipt and the nonce used.
    async fn attempt(
        &self,
        asset: AssetId,
        score: u8,
        cancel: &CancellationToken,
    ) -> Result<(Receipt, u64), AttemptFailure> {
        let (hash, nonce) = {
            let mut nonce_cache = tokio::select! {
                guard = self.account.lock_nonce() => guard,
                _ = cancel.cancelled() => return Err(AttemptFailure::Cancelled),
            };

            debug!(state = ?SubmissionState::Building);
            let ledger_nonce = self.ledger.current_nonce(self.account.address()).await?;
            let fee = self.ledger.current_fee_rate().await?;
            let nonce = nonce_cache.reserve(ledger_nonce);
            let unsigned = self.forge.build(asset, score, nonce, &fee);

            debug!(state = ?SubmissionState::Signing, nonce, gas_price = fee.gas_price);
            let signed = self.forge.sign(&unsigned, self.account.signer())?;

            debug!(state = ?SubmissionState::Submitting, hash = %signed.hash);
            match self.ledger.submit(&signed).await {
                Ok(hash) => {
                    nonce_cache.commit(signed.nonce);
                    (hash, signed.nonce)
                }
                Err(e) => {
                    if e.is_nonce_conflict() {
                        nonce_cache.invalidate();
                    }
                    return Err(e.into());
                }
            }
        };

        info!(asset = %asset, %hash, nonce, "Transaction sent. Waiting for confirmation...");
        debug!(state = ?SubmissionState::AwaitingReceipt);
        match self.ledger.await_receipt(hash, self.receipt_timeout).await {
            Ok(receipt) => Ok((receipt, nonce)),
            Err(e) => {
                if matches!(e, LedgerError::TimedOut { .. }) {
                    // The transaction may have been dropped; let the ledger decide the next nonce.
                    self.account.invalidate_nonce().await;
                }
                Err(e.into())
            }
        }
    }
}
