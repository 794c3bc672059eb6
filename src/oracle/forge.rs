//! Builds and signs the freshness-score update transaction.
//!
//! The contract exposes a single state-mutating entry point,
//! `updateFreshnessScore(uint256 tokenId, uint256 newScore)`, which is
//! idempotent for the same arguments. Transactions are EIP-155 legacy
//! transactions priced with the sampled `gasPrice`.

use crate::oracle::error::ForgeError;
use crate::types::{AssetId, FeeEstimate, TxHash};
use alloy::consensus::{SignableTransaction, TxEnvelope, TxLegacy};
use alloy::eips::eip2718::Encodable2718;
use alloy::primitives::{Address, Bytes, TxKind, U256};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::SignerSync;
use alloy::sol;
use alloy::sol_types::SolCall;
use tracing::debug;

sol! {
    /// Freshness-score NFT contract, as seen by the oracle.
    interface IFreshChainNFT {
        function updateFreshnessScore(uint256 tokenId, uint256 newScore) external;
        function authorizedOracles(address oracle) external view returns (bool);
    }
}

pub use IFreshChainNFT::{authorizedOraclesCall, updateFreshnessScoreCall};

/// A state-mutation request before signing. Rebuilt on every attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedTx {
    pub asset: AssetId,
    pub score: u8,
    pub nonce: u64,
    pub gas_price: u128,
    pub gas_limit: u64,
    pub chain_id: u64,
    pub to: Address,
    pub input: Bytes,
}

impl UnsignedTx {
    fn to_legacy(&self) -> TxLegacy {
        TxLegacy {
            chain_id: Some(self.chain_id),
            nonce: self.nonce,
            gas_price: self.gas_price,
            gas_limit: self.gas_limit,
            to: TxKind::Call(self.to),
            value: U256::ZERO,
            input: self.input.clone(),
        }
    }
}

/// A transmittable, signed payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTx {
    pub asset: AssetId,
    pub nonce: u64,
    pub hash: TxHash,
    /// EIP-2718 encoded bytes for `eth_sendRawTransaction`
    pub raw: Bytes,
}

/// Constructs update transactions for one contract on one chain.
#[derive(Debug, Clone)]
pub struct TransactionForge {
    contract: Address,
    chain_id: u64,
    gas_limit: u64,
}

impl TransactionForge {
    /// `chain_id` is bound into every signature (EIP-155); `gas_limit` is
    /// fixed for all updates.
    pub fn new(contract: Address, chain_id: u64, gas_limit: u64) -> Self {
        Self {
            contract,
            chain_id,
            gas_limit,
        }
    }

    /// Registry contract every update is addressed to.
    pub fn contract(&self) -> Address {
        self.contract
    }

    /// Chain id used for replay protection.
    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Pure construction from the reserved nonce and sampled fee.
    pub fn build(&self, asset: AssetId, score: u8, nonce: u64, fee: &FeeEstimate) -> UnsignedTx {
        let call = updateFreshnessScoreCall {
            tokenId: asset.as_u256(),
            newScore: U256::from(score),
        };

        UnsignedTx {
            asset,
            score,
            nonce,
            gas_price: fee.gas_price,
            gas_limit: self.gas_limit,
            chain_id: self.chain_id,
            to: self.contract,
            input: call.abi_encode().into(),
        }
    }

    /// Deterministic (RFC 6979) signature over the unsigned payload.
    pub fn sign(&self, unsigned: &UnsignedTx, signer: &PrivateKeySigner) -> Result<SignedTx, ForgeError> {
        let tx = unsigned.to_legacy();
        let signature = signer
            .sign_hash_sync(&tx.signature_hash())
            .map_err(|e| ForgeError::Signing(e.to_string()))?;

        let signed = tx.into_signed(signature);
        let hash = *signed.hash();
        let envelope = TxEnvelope::from(signed);
        let raw = Bytes::from(envelope.encoded_2718());

        debug!(asset = %unsigned.asset, nonce = unsigned.nonce, %hash, "Signed update transaction");
        Ok(SignedTx {
            asset: unsigned.asset,
            nonce: unsigned.nonce,
            hash,
            raw,
        })
    }
}
