//! Error taxonomy for the sensor oracle.
//!
//! `StartupError` is fatal and stops the process before the loop starts.
//! `LedgerError` is classified as rejected (deterministic) or transient
//! (retryable). `SubmissionError` is what a failed attempt sequence
//! surfaces to the loop, which logs it and moves on.

use crate::types::{AssetId, TxHash};
use alloy::primitives::Address;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required configuration: {0}")]
    Missing(&'static str),
    #[error("invalid configuration `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Debug, Error)]
pub enum ForgeError {
    #[error("invalid signing key: {0}")]
    InvalidKey(String),
    #[error("signing key belongs to {derived}, but the configured account is {configured}")]
    AddressMismatch { configured: Address, derived: Address },
    #[error("signing failed: {0}")]
    Signing(String),
}

/// Deterministic reason a ledger refused a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectKind {
    NonceConflict,
    InsufficientFunds,
    InvalidSignature,
    Reverted,
    Other,
}

impl fmt::Display for RejectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RejectKind::NonceConflict => "nonce conflict",
            RejectKind::InsufficientFunds => "insufficient funds",
            RejectKind::InvalidSignature => "invalid signature",
            RejectKind::Reverted => "reverted",
            RejectKind::Other => "rejected",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Error)]
pub enum LedgerError {
    #[error("ledger endpoint {url} unreachable: {reason}")]
    Unreachable { url: String, reason: String },
    #[error("ledger reports chain id {actual}, expected {expected}")]
    ChainMismatch { expected: u64, actual: u64 },
    #[error("transaction rejected ({kind}): {message}")]
    Rejected { kind: RejectKind, message: String },
    #[error("transient ledger failure: {0}")]
    Transient(String),
    #[error("no receipt for {hash} after {waited_ms}ms")]
    TimedOut { hash: TxHash, waited_ms: u64 },
}

impl LedgerError {
    /// Whether the failure may succeed if the whole sequence is retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, LedgerError::Transient(_) | LedgerError::TimedOut { .. })
    }

    /// The ledger refused the nonce; retry with a resynchronised one.
    pub fn is_nonce_conflict(&self) -> bool {
        matches!(
            self,
            LedgerError::Rejected {
                kind: RejectKind::NonceConflict,
                ..
            }
        )
    }
}

#[derive(Debug, Error)]
pub enum SensorError {
    #[error("no reading available for asset {asset}: {reason}")]
    Unavailable { asset: AssetId, reason: String },
}

/// Terminal failure of one submission attempt sequence.
#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error("rejected after {attempts} attempt(s) ({kind}): {message}")]
    Rejected {
        kind: RejectKind,
        message: String,
        attempts: u32,
    },
    #[error("gave up after {attempts} attempt(s): {last}")]
    Exhausted { last: LedgerError, attempts: u32 },
    #[error("credential failure: {0}")]
    Credential(#[from] ForgeError),
    #[error("cancelled before attempt {}", .attempts + 1)]
    Cancelled { attempts: u32 },
}

impl SubmissionError {
    /// Attempts started before the sequence ended.
    pub fn attempts(&self) -> u32 {
        match self {
            SubmissionError::Rejected { attempts, .. }
            | SubmissionError::Exhausted { attempts, .. }
            | SubmissionError::Cancelled { attempts } => *attempts,
            SubmissionError::Credential(_) => 1,
        }
    }
}

/// Fatal startup failure; the loop never starts.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Credential(#[from] ForgeError),
}
