//! Gas funding economics: batch cost estimation, atomic multi-recipient
//! funding, and residual recovery.

use crate::{
    constants::{
        DEFAULT_CONFIRMATION_TIMEOUT, DEFAULT_EXECUTION_GAS, DEFAULT_FUNDING_SAFETY_MULTIPLIER,
        DEFAULT_GAS_BUFFER_PCT, DEFAULT_GAS_CUSHION, DEFAULT_SWEEP_CONCURRENCY, DUST_BUFFER,
        GAS_ESTIMATE_SAMPLE_SIZE, MIN_FAUCET_RESERVE, TRANSFER_GAS_LIMIT,
    },
    error::{FundingError, RelayerError},
    keystore::KeyStore,
    ledger::{ExecuteRequest, Ledger},
    metrics::FundingMetrics,
    storage::{RelayerStorage, StorageApi},
    types::{Batch, BatchId, RelayerWallet},
};
use alloy::primitives::{Address, U256};
use futures_util::{StreamExt, stream};
use std::{sync::Arc, time::Duration};
use tracing::{debug, info, instrument, warn};

/// Tuning knobs for [`GasFundingController`].
#[derive(Debug, Clone)]
pub struct FundingConfig {
    /// Percentage buffer on the sampled batch estimate.
    pub gas_buffer_pct: u64,
    /// Fixed cushion added to the buffered budget, in wei.
    pub gas_cushion: U256,
    /// Multiplier on the funding transaction's own gas when computing the
    /// faucet reserve.
    pub safety_multiplier: u64,
    /// Floor of the faucet reserve, in wei.
    pub min_reserve: U256,
    /// Residuals below this are left as dust, in wei.
    pub dust_buffer: U256,
    /// Wallets swept concurrently.
    pub sweep_concurrency: usize,
    /// Confirmation wait for funding and sweep transactions.
    pub confirmation_timeout: Duration,
}

impl Default for FundingConfig {
    fn default() -> Self {
        Self {
            gas_buffer_pct: DEFAULT_GAS_BUFFER_PCT,
            gas_cushion: U256::from(DEFAULT_GAS_CUSHION),
            safety_multiplier: DEFAULT_FUNDING_SAFETY_MULTIPLIER,
            min_reserve: U256::from(MIN_FAUCET_RESERVE),
            dust_buffer: U256::from(DUST_BUFFER),
            sweep_concurrency: DEFAULT_SWEEP_CONCURRENCY,
            confirmation_timeout: DEFAULT_CONFIRMATION_TIMEOUT,
        }
    }
}

/// Cost estimate for a whole batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchBudget {
    /// Raw requirement: sampled average gas x remaining jobs x gas price.
    pub raw: U256,
    /// Raw requirement plus the percentage buffer and fixed cushion.
    pub buffered: U256,
}

/// How a batch's budget is split across its relayer wallets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FundingPlan {
    /// Amount each wallet receives.
    pub amount_each: U256,
    /// Whether the faucet balance forced the distribution below the
    /// buffered budget.
    pub clamped: bool,
}

/// Splits the budget across workers, clamping to what the faucet can
/// afford after its reserve.
///
/// Fails only when even the raw, unbuffered requirement is unaffordable;
/// that failure fires before any wallet receives funds.
pub(crate) fn funding_plan(
    batch_id: BatchId,
    budget: &BatchBudget,
    balance: U256,
    reserve: U256,
    workers: u64,
) -> Result<FundingPlan, FundingError> {
    let affordable = balance.saturating_sub(reserve);
    if affordable < budget.raw {
        return Err(FundingError::InsufficientFaucetBalance {
            batch_id,
            required: budget.raw,
            affordable,
            reserve,
        });
    }

    let distributable = budget.buffered.min(affordable);
    Ok(FundingPlan {
        amount_each: distributable / U256::from(workers),
        clamped: distributable < budget.buffered,
    })
}

/// Reserve withheld so the funding transaction can always pay its own gas.
pub(crate) fn faucet_reserve(
    funding_gas: u64,
    gas_price: u128,
    multiplier: u64,
    min_reserve: U256,
) -> U256 {
    let dynamic = U256::from(funding_gas) * U256::from(gas_price) * U256::from(multiplier);
    dynamic.max(min_reserve)
}

/// Estimates batch costs, funds relayer wallets in one atomic distribution,
/// and sweeps residuals back afterwards.
#[derive(Debug)]
pub struct GasFundingController {
    storage: RelayerStorage,
    ledger: Arc<dyn Ledger>,
    keystore: Arc<dyn KeyStore>,
    config: FundingConfig,
    metrics: Arc<FundingMetrics>,
}

impl GasFundingController {
    /// Creates a new [`GasFundingController`].
    pub fn new(
        storage: RelayerStorage,
        ledger: Arc<dyn Ledger>,
        keystore: Arc<dyn KeyStore>,
        config: FundingConfig,
    ) -> Self {
        let metrics = Arc::new(FundingMetrics::default());
        Self { storage, ledger, keystore, config, metrics }
    }

    /// Estimates the batch's total gas cost.
    ///
    /// Dry-runs a small sample of pending jobs instead of all of them, then
    /// scales the average by the remaining job count, the percentage
    /// buffer, and the current gas price.
    #[instrument(skip(self, batch), fields(batch_id = batch.id))]
    pub async fn estimate_batch_cost(&self, batch: &Batch) -> Result<BatchBudget, RelayerError> {
        let sample = self.storage.pending_jobs(batch.id, GAS_ESTIMATE_SAMPLE_SIZE).await?;
        let remaining = self.storage.open_job_count(batch.id).await?;

        let mut estimates = Vec::with_capacity(sample.len());
        for job in &sample {
            let request = ExecuteRequest {
                batch_id: batch.id,
                job_id: job.id,
                funder: batch.funder,
                recipient: job.recipient,
                amount: job.amount,
                proof: Vec::new(),
            };
            match self.ledger.estimate_execution(batch.funder, &request).await {
                Ok(gas) => estimates.push(gas),
                Err(err) => {
                    debug!(job_id = job.id, %err, "dry-run estimate failed, using fallback");
                    estimates.push(DEFAULT_EXECUTION_GAS);
                }
            }
        }

        let average = if estimates.is_empty() {
            DEFAULT_EXECUTION_GAS
        } else {
            estimates.iter().sum::<u64>() / estimates.len() as u64
        };
        let gas_price = self.ledger.gas_price().await?;

        let raw = U256::from(average) * U256::from(remaining) * U256::from(gas_price);
        let buffered =
            raw * U256::from(100 + self.config.gas_buffer_pct) / U256::from(100)
                + self.config.gas_cushion;

        debug!(average, remaining, gas_price, %raw, %buffered, "estimated batch cost");
        Ok(BatchBudget { raw, buffered })
    }

    /// Funds every relayer wallet of a batch with one atomic multi-recipient
    /// transaction.
    ///
    /// The faucet's live balance and a dynamically computed reserve are
    /// re-read right before sending, so the funding transaction can always
    /// pay its own gas. Funding succeeds or fails as a unit.
    #[instrument(skip_all, fields(batch_id = batch.id, relayers = relayers.len()))]
    pub async fn fund_relayers(
        &self,
        batch: &Batch,
        faucet: &alloy::signers::local::PrivateKeySigner,
        relayers: &[RelayerWallet],
    ) -> Result<U256, RelayerError> {
        if relayers.is_empty() {
            return Err(FundingError::NoRelayers(batch.id).into());
        }

        let budget = self.estimate_batch_cost(batch).await?;
        let recipients: Vec<Address> = relayers.iter().map(|r| r.address).collect();

        // Tentative split for the gas estimate of the funding tx itself.
        let tentative = budget.buffered / U256::from(recipients.len() as u64);
        let funding_gas = match self
            .ledger
            .estimate_distribution(faucet.address(), &recipients, tentative)
            .await
        {
            Ok(gas) => gas,
            Err(err) => {
                debug!(%err, "distribution estimate failed, using fallback");
                TRANSFER_GAS_LIMIT + 30_000 * recipients.len() as u64
            }
        };

        let gas_price = self.ledger.gas_price().await?;
        let reserve = faucet_reserve(
            funding_gas,
            gas_price,
            self.config.safety_multiplier,
            self.config.min_reserve,
        );
        let balance = self.ledger.native_balance(faucet.address()).await?;

        let plan =
            funding_plan(batch.id, &budget, balance, reserve, recipients.len() as u64)?;
        if plan.clamped {
            warn!(
                %balance, %reserve, buffered = %budget.buffered,
                "faucet balance short of buffered budget, clamping distribution"
            );
        }

        let tx_hash = self
            .ledger
            .distribute(faucet, &recipients, plan.amount_each, funding_gas * 12 / 10)
            .await?;
        let confirmation = self
            .ledger
            .wait_for_confirmation(tx_hash, self.config.confirmation_timeout)
            .await?
            .ok_or(RelayerError::ConfirmationTimeout(tx_hash))?;
        if !confirmation.success {
            return Err(FundingError::FundingTxFailed { tx_hash }.into());
        }

        let total = plan.amount_each * U256::from(recipients.len() as u64);
        self.storage.set_batch_funding(batch.id, total).await?;
        self.metrics.funded.increment(1);

        info!(
            %tx_hash, %total, amount_each = %plan.amount_each,
            funding_gas_cost = %confirmation.gas_cost(),
            "funded relayer wallets"
        );
        Ok(total)
    }

    /// Sweeps every wallet's residual balance back to the faucet.
    ///
    /// Refuses to run while the batch still has non-terminal jobs; sweeping
    /// earlier would starve active workers of gas. Residuals smaller than
    /// the dust buffer are recorded instead of swept, so a sweep never burns
    /// more in gas than it recovers.
    #[instrument(skip_all, fields(batch_id = batch.id, relayers = relayers.len()))]
    pub async fn sweep_residuals(
        &self,
        batch: &Batch,
        faucet_address: Address,
        relayers: &[RelayerWallet],
    ) -> Result<U256, RelayerError> {
        let open = self.storage.open_job_count(batch.id).await?;
        if open > 0 {
            return Err(FundingError::BatchStillActive { batch_id: batch.id, open_jobs: open }
                .into());
        }

        let gas_price = self.ledger.gas_price().await?;
        let swept: Vec<U256> = stream::iter(relayers)
            .map(|relayer| self.sweep_wallet(batch.id, relayer, faucet_address, gas_price))
            .buffer_unordered(self.config.sweep_concurrency)
            .collect()
            .await;

        let total = swept.iter().copied().sum::<U256>();
        info!(%total, "swept batch residuals");
        Ok(total)
    }

    /// Sweeps one wallet. Never fails the batch: errors are logged with
    /// exact amounts so operators can reconcile manually.
    async fn sweep_wallet(
        &self,
        batch_id: BatchId,
        relayer: &RelayerWallet,
        faucet_address: Address,
        gas_price: u128,
    ) -> U256 {
        match self.try_sweep_wallet(batch_id, relayer, faucet_address, gas_price).await {
            Ok(returned) => returned,
            Err(err) => {
                warn!(
                    wallet = %relayer.address, %err,
                    "failed to sweep wallet, residual left on-chain"
                );
                U256::ZERO
            }
        }
    }

    async fn try_sweep_wallet(
        &self,
        batch_id: BatchId,
        relayer: &RelayerWallet,
        faucet_address: Address,
        gas_price: u128,
    ) -> Result<U256, RelayerError> {
        let balance = self.ledger.native_balance(relayer.address).await?;
        let sweep_cost = U256::from(TRANSFER_GAS_LIMIT) * U256::from(gas_price);
        let sweepable =
            balance.saturating_sub(sweep_cost).saturating_sub(self.config.dust_buffer);

        if sweepable.is_zero() {
            // Not worth a transaction; retire the wallet with its dust.
            debug!(wallet = %relayer.address, %balance, "residual below dust buffer");
            self.storage.mark_relayer_drained(relayer.address, balance).await?;
            self.metrics.dust_wallets.increment(1);
            return Ok(U256::ZERO);
        }

        let signer = self.keystore.get_key(relayer.address).await?;
        let value = balance - sweep_cost;
        let tx_hash = self
            .ledger
            .send_native(&signer, faucet_address, value, Some(gas_price), None)
            .await?;
        let confirmation = self
            .ledger
            .wait_for_confirmation(tx_hash, self.config.confirmation_timeout)
            .await?
            .ok_or(RelayerError::ConfirmationTimeout(tx_hash))?;
        if !confirmation.success {
            return Err(RelayerError::Reverted(tx_hash));
        }

        let remaining = self.ledger.native_balance(relayer.address).await?;
        self.storage.add_batch_refund(batch_id, value).await?;
        self.storage.mark_relayer_drained(relayer.address, remaining).await?;
        self.metrics.swept_wallets.increment(1);

        debug!(wallet = %relayer.address, %value, %remaining, "swept wallet");
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn budget(raw: u64, buffered: u64) -> BatchBudget {
        BatchBudget { raw: U256::from(raw), buffered: U256::from(buffered) }
    }

    #[test]
    fn plan_splits_buffered_budget_when_affordable() {
        let plan =
            funding_plan(1, &budget(100, 200), U256::from(1_000), U256::from(50), 4).unwrap();
        assert_eq!(plan.amount_each, U256::from(50));
        assert!(!plan.clamped);
    }

    #[test]
    fn plan_clamps_to_affordable_balance() {
        // balance - reserve = 150, raw = 100, buffered = 200.
        let plan =
            funding_plan(1, &budget(100, 200), U256::from(200), U256::from(50), 3).unwrap();
        assert_eq!(plan.amount_each, U256::from(50));
        assert!(plan.clamped);
    }

    #[test]
    fn plan_fails_below_raw_requirement() {
        let err = funding_plan(7, &budget(100, 200), U256::from(120), U256::from(50), 2)
            .unwrap_err();
        match err {
            FundingError::InsufficientFaucetBalance { batch_id, required, affordable, .. } => {
                assert_eq!(batch_id, 7);
                assert_eq!(required, U256::from(100));
                assert_eq!(affordable, U256::from(70));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn reserve_floors_at_minimum() {
        let floor = U256::from(1_000_000u64);
        assert_eq!(faucet_reserve(21_000, 1, 2, floor), floor);

        let dynamic = faucet_reserve(21_000, 100_000_000_000, 2, floor);
        assert_eq!(dynamic, U256::from(21_000u64) * U256::from(100_000_000_000u128) * U256::from(2u64));
    }
}
