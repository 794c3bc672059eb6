//! The single signing account and its nonce cache.
//!
//! All submissions share one `AccountContext`. The nonce cache sits behind an
//! async mutex; a submission holds the guard from nonce lookup until the
//! ledger has accepted (or refused) the signed payload, so two in-flight
//! transactions can never carry the same nonce.

use crate::oracle::config::SecretKey;
use crate::oracle::error::ForgeError;
use alloy::primitives::Address;
use alloy::signers::local::PrivateKeySigner;
use std::str::FromStr;
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

/// Best-known next nonce for the account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NonceCache {
    next: u64,
    needs_resync: bool,
}

impl NonceCache {
    /// Cache starting at `next`, trusted until invalidated.
    pub fn new(next: u64) -> Self {
        Self {
            next,
            needs_resync: false,
        }
    }

    pub fn next(&self) -> u64 {
        self.next
    }

    /// Whether the next reservation ignores the cached value.
    pub fn needs_resync(&self) -> bool {
        self.needs_resync
    }

    /// Pick the nonce for a new transaction given the ledger's current count.
    ///
    /// Normally the higher of the ledger value and the cache wins, so a
    /// lagging endpoint cannot hand out an already used nonce. After an
    /// invalidation the ledger value is taken as-is.
    pub fn reserve(&mut self, ledger_nonce: u64) -> u64 {
        if self.needs_resync {
            debug!(cached = self.next, ledger = ledger_nonce, "Resynchronising nonce from ledger");
            self.next = ledger_nonce;
            self.needs_resync = false;
        } else {
            self.next = self.next.max(ledger_nonce);
        }
        self.next
    }

    /// Record that a transaction with `used` was accepted by the ledger.
    pub fn commit(&mut self, used: u64) {
        self.next = self.next.max(used + 1);
    }

    /// Distrust the cache until the next reservation.
    pub fn invalidate(&mut self) {
        self.needs_resync = true;
    }
}

/// The oracle's signing identity plus the nonce cache guarding it.
pub struct AccountContext {
    signer: PrivateKeySigner,
    nonce: Mutex<NonceCache>,
}

impl AccountContext {
    /// `initial_nonce` is normally the ledger's pending count at startup.
    pub fn new(signer: PrivateKeySigner, initial_nonce: u64) -> Self {
        Self {
            signer,
            nonce: Mutex::new(NonceCache::new(initial_nonce)),
        }
    }

    /// Parse the key and check it belongs to the configured address.
    pub fn load_signer(key: &SecretKey, expected: Address) -> Result<PrivateKeySigner, ForgeError> {
        let signer = PrivateKeySigner::from_str(key.expose())
            .map_err(|e| ForgeError::InvalidKey(e.to_string()))?;

        if signer.address() != expected {
            return Err(ForgeError::AddressMismatch {
                configured: expected,
                derived: signer.address(),
            });
        }
        Ok(signer)
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    pub fn signer(&self) -> &PrivateKeySigner {
        &self.signer
    }

    /// Enter the nonce serialization boundary.
    pub async fn lock_nonce(&self) -> MutexGuard<'_, NonceCache> {
        self.nonce.lock().await
    }

    /// Next nonce the cache would hand out, ignoring the ledger.
    pub async fn current_nonce(&self) -> u64 {
        self.nonce.lock().await.next()
    }

    /// Force the next reservation to trust the ledger's count.
    pub async fn invalidate_nonce(&self) {
        self.nonce.lock().await.invalidate();
    }
}
