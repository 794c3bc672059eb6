//! Core types and data structures for the FreshChain sensor oracle.

use alloy::primitives::{B256, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Hash identifying a submitted transaction on the ledger.
pub type TxHash = B256;

/// Identifier of a monitored item (the on-chain token id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetId(pub u64);

impl AssetId {
    /// The id as the contract's `uint256` argument.
    pub fn as_u256(&self) -> U256 {
        U256::from(self.0)
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AssetId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(AssetId)
    }
}

impl From<u64> for AssetId {
    fn from(id: u64) -> Self {
        AssetId(id)
    }
}

/// Unit attached to a reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MeasurementUnit {
    Celsius,
}

impl fmt::Display for MeasurementUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeasurementUnit::Celsius => write!(f, "°C"),
        }
    }
}

/// A single observation for one asset. Created per poll, never retained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub asset: AssetId,
    pub value: f64,
    pub unit: MeasurementUnit,
    pub observed_at: DateTime<Utc>,
}

impl Reading {
    /// Temperature reading observed now.
    pub fn celsius(asset: AssetId, value: f64) -> Self {
        Self {
            asset,
            value,
            unit: MeasurementUnit::Celsius,
            observed_at: Utc::now(),
        }
    }
}

/// Outcome of evaluating a reading against the breach policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    /// Reading within the safe range; nothing is written on-chain
    Safe,
    /// Reading violated the threshold; the score to write on-chain
    Breach { score: u8 },
}

/// Fee data sampled from the ledger right before building a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeEstimate {
    /// Gas price in wei
    pub gas_price: u128,
}

/// Terminal artifact of one confirmed transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub tx_hash: TxHash,
    pub block_number: u64,
    pub block_hash: Option<B256>,
    /// Execution status reported by the ledger (`false` means reverted)
    pub succeeded: bool,
    pub gas_used: Option<u64>,
}

/// Process-local notification emitted by the oracle loop.
#[derive(Debug, Clone, Serialize)]
pub enum OracleEvent {
    BreachDetected {
        asset: AssetId,
        reading: Reading,
        score: u8,
    },
    Confirmed {
        asset: AssetId,
        receipt: Receipt,
        attempts: u32,
    },
    SubmissionFailed {
        asset: AssetId,
        error: String,
    },
    RoundCompleted {
        round: u64,
        evaluated: usize,
        breaches: usize,
    },
}
