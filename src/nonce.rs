//! Stuck-nonce detection and repair.
//!
//! A wallet whose network-visible pending transaction count exceeds its
//! confirmed count has a transaction stuck in the mempool, blocking
//! everything behind it. Repair clears the stuck slot with a zero-value
//! self-transfer priced well above the market, which the mempool accepts as
//! a replacement.

use crate::{
    constants::{NONCE_REPAIR_GAS_BOOST, NONCE_REPAIR_MAX_ATTEMPTS, NONCE_REPAIR_TIMEOUT},
    error::RelayerError,
    ledger::Ledger,
};
use alloy::{primitives::U256, signers::local::PrivateKeySigner};
use std::{sync::Arc, time::Duration};
use tracing::{info, instrument, warn};

/// Clears stuck nonces with boosted-gas self-transfers.
///
/// Runs before any batch of work is dispatched from a wallet. Calling it on
/// a healthy wallet is a no-op.
#[derive(Debug)]
pub struct NonceRepairService {
    ledger: Arc<dyn Ledger>,
    max_attempts: u32,
    gas_boost: u128,
    confirmation_timeout: Duration,
}

impl NonceRepairService {
    /// Creates a new [`NonceRepairService`] with default bounds.
    pub fn new(ledger: Arc<dyn Ledger>) -> Self {
        Self {
            ledger,
            max_attempts: NONCE_REPAIR_MAX_ATTEMPTS,
            gas_boost: NONCE_REPAIR_GAS_BOOST,
            confirmation_timeout: NONCE_REPAIR_TIMEOUT,
        }
    }

    /// Overrides the attempt bound.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Repairs the wallet's nonce gap, if any.
    ///
    /// Returns the number of repair transactions sent. Bounded: after
    /// `max_attempts` self-transfers the gap is re-read one last time and
    /// [`RelayerError::NonceRepairExhausted`] is surfaced if it persists.
    #[instrument(skip_all, fields(wallet = %signer.address()))]
    pub async fn repair(&self, signer: &PrivateKeySigner) -> Result<u32, RelayerError> {
        let wallet = signer.address();
        let (mut confirmed, mut pending) = self.ledger.nonce_counts(wallet).await?;
        if pending <= confirmed {
            return Ok(0);
        }

        info!(confirmed, pending, "detected stuck nonce");
        let mut attempts = 0;
        while pending > confirmed && attempts < self.max_attempts {
            attempts += 1;
            let gas_price = self.ledger.gas_price().await?.saturating_mul(self.gas_boost);

            // Replace the stuck slot: a zero-value self-transfer at the
            // first unconfirmed nonce, priced to outbid whatever is there.
            let tx_hash = self
                .ledger
                .send_native(signer, wallet, U256::ZERO, Some(gas_price), Some(confirmed))
                .await?;

            match self.ledger.wait_for_confirmation(tx_hash, self.confirmation_timeout).await? {
                Some(confirmation) => {
                    info!(attempt = attempts, %tx_hash, success = confirmation.success, "repair transaction confirmed");
                }
                None => {
                    warn!(attempt = attempts, %tx_hash, "repair transaction not confirmed in time");
                }
            }

            (confirmed, pending) = self.ledger.nonce_counts(wallet).await?;
        }

        if pending > confirmed {
            return Err(RelayerError::NonceRepairExhausted { wallet, pending, confirmed });
        }

        info!(attempts, "nonce gap cleared");
        Ok(attempts)
    }
}
