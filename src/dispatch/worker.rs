//! The per-wallet worker loop and the shared per-job execution path.

use super::DispatchConfig;
use crate::{
    error::RelayerError,
    ledger::{ExecuteRequest, Ledger},
    merkle::MerkleProofService,
    metrics::DispatchMetrics,
    queue::JobQueue,
    storage::{RelayerStorage, StorageApi},
    types::{Batch, BatchJob, JobStatus, payment_leaf},
};
use alloy::{
    primitives::{Address, B256, U256},
    signers::local::PrivateKeySigner,
};
use std::sync::Arc;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, instrument, warn};

/// What happened to a job after one execution attempt.
#[derive(Debug)]
pub enum JobOutcome {
    /// Confirmed on-chain.
    Completed {
        /// Hash of the confirming transaction.
        tx_hash: B256,
        /// Gas the relayer wallet paid.
        gas_cost: U256,
    },
    /// The leaf was already processed on-chain; reconciled with zero gas
    /// attributed and no transaction sent.
    AlreadyProcessed {
        /// Hash of the earlier execution, when event logs still carry it.
        tx_hash: Option<B256>,
    },
    /// Submitted, but the confirmation wait hit its hard timeout.
    TimedOut {
        /// Hash of the unconfirmed transaction.
        tx_hash: B256,
    },
    /// The transaction reverted on-chain.
    Reverted {
        /// Hash of the reverted transaction.
        tx_hash: B256,
        /// Gas the relayer wallet still paid for the revert.
        gas_cost: U256,
    },
    /// The funder cannot cover the payout; nothing was submitted.
    PreflightRejected,
}

/// Executes single jobs on behalf of one relayer wallet.
///
/// Shared by the worker loop and the retry coordinator so both dispatch
/// paths behave identically.
#[derive(Debug, Clone)]
pub struct JobRunner {
    pub(crate) storage: RelayerStorage,
    pub(crate) proofs: MerkleProofService,
    pub(crate) ledger: Arc<dyn Ledger>,
    pub(crate) batch: Batch,
    pub(crate) signer: PrivateKeySigner,
    pub(crate) config: DispatchConfig,
    pub(crate) metrics: Arc<DispatchMetrics>,
}

impl JobRunner {
    /// Creates a runner bound to one relayer wallet.
    pub fn new(
        storage: RelayerStorage,
        proofs: MerkleProofService,
        ledger: Arc<dyn Ledger>,
        batch: Batch,
        signer: PrivateKeySigner,
        config: DispatchConfig,
        metrics: Arc<DispatchMetrics>,
    ) -> Self {
        Self { storage, proofs, ledger, batch, signer, config, metrics }
    }

    /// The relayer wallet address this runner signs with.
    pub fn wallet(&self) -> Address {
        self.signer.address()
    }

    /// Runs one claimed job to a recorded outcome.
    ///
    /// Per-job errors are caught here and written into job state; they
    /// never abort the calling worker loop or its siblings.
    #[instrument(skip_all, fields(job_id = job.id, wallet = %self.wallet()))]
    pub async fn run_job(&self, job: &BatchJob) {
        let outcome = self.execute_job(job).await;
        if let Err(err) = self.record_outcome(job, outcome).await {
            warn!(%err, "failed to record job outcome");
        }
    }

    async fn record_outcome(
        &self,
        job: &BatchJob,
        outcome: Result<JobOutcome, RelayerError>,
    ) -> Result<(), RelayerError> {
        match outcome {
            Ok(JobOutcome::Completed { tx_hash, gas_cost }) => {
                self.storage
                    .record_job_result(job.id, JobStatus::Completed, Some(tx_hash))
                    .await?;
                self.storage.add_relayer_gas(self.wallet(), gas_cost).await?;
                self.metrics.confirmed.increment(1);
                info!(%tx_hash, %gas_cost, "job confirmed");
            }
            Ok(JobOutcome::AlreadyProcessed { tx_hash }) => {
                self.storage.record_job_result(job.id, JobStatus::Completed, tx_hash).await?;
                self.metrics.reconciled.increment(1);
                info!(?tx_hash, "leaf already processed on-chain, reconciled");
            }
            Ok(JobOutcome::TimedOut { tx_hash }) => {
                // Already parked in waiting_confirmation at submission time;
                // stuck-reclaim or a retry cycle picks it up from there.
                warn!(%tx_hash, "confirmation wait timed out");
            }
            Ok(JobOutcome::Reverted { tx_hash, gas_cost }) => {
                self.storage.record_job_result(job.id, JobStatus::Failed, Some(tx_hash)).await?;
                self.storage.add_relayer_gas(self.wallet(), gas_cost).await?;
                self.metrics.failed.increment(1);
                warn!(%tx_hash, %gas_cost, "transaction reverted");
            }
            Ok(JobOutcome::PreflightRejected) => {
                self.storage.record_job_result(job.id, JobStatus::Failed, None).await?;
                self.metrics.failed.increment(1);
            }
            Err(err) => {
                self.storage.record_job_result(job.id, JobStatus::Failed, None).await?;
                self.metrics.failed.increment(1);
                warn!(%err, "job execution failed");
            }
        }

        Ok(())
    }

    async fn execute_job(&self, job: &BatchJob) -> Result<JobOutcome, RelayerError> {
        let domain = self.ledger.domain();
        let leaf =
            payment_leaf(&domain, job.batch_id, job.id, self.batch.funder, job.recipient, job.amount);

        // Idempotency guard: a prior attempt may have confirmed after its
        // worker gave up waiting. On-chain state decides, not local rows.
        if self.ledger.is_leaf_processed(leaf).await? {
            let tx_hash = self.ledger.find_execution(leaf).await?;
            return Ok(JobOutcome::AlreadyProcessed { tx_hash });
        }

        let proof = self.proofs.proof(job.batch_id, job.id).await?;
        let request = ExecuteRequest {
            batch_id: job.batch_id,
            job_id: job.id,
            funder: self.batch.funder,
            recipient: job.recipient,
            amount: job.amount,
            proof,
        };

        // Cheap read that avoids a guaranteed-to-revert submission.
        let (balance, allowance) = self.ledger.funder_capacity(self.batch.funder).await?;
        if balance < job.amount || allowance < job.amount {
            warn!(
                funder = %self.batch.funder, required = %job.amount, %balance, %allowance,
                "funder cannot cover payout"
            );
            return Ok(JobOutcome::PreflightRejected);
        }

        let estimate = self.ledger.estimate_execution(self.wallet(), &request).await?;
        let gas_limit = estimate * self.config.gas_multiplier_pct / 100;

        let submitted_at = Instant::now();
        let tx_hash = self.ledger.execute(&self.signer, &request, gas_limit).await?;
        self.storage
            .record_job_result(job.id, JobStatus::WaitingConfirmation, Some(tx_hash))
            .await?;
        self.metrics.sent.increment(1);
        debug!(%tx_hash, gas_limit, "submitted job transaction");

        match self
            .ledger
            .wait_for_confirmation(tx_hash, self.config.confirmation_timeout)
            .await?
        {
            Some(confirmation) if confirmation.success => {
                self.metrics
                    .confirmation_time
                    .record(submitted_at.elapsed().as_millis() as f64);
                Ok(JobOutcome::Completed { tx_hash, gas_cost: confirmation.gas_cost() })
            }
            Some(confirmation) => {
                Ok(JobOutcome::Reverted { tx_hash, gas_cost: confirmation.gas_cost() })
            }
            None => Ok(JobOutcome::TimedOut { tx_hash }),
        }
    }
}

/// One worker: a loop bound to one relayer wallet, draining the batch
/// queue until no claimable work remains.
#[derive(Debug)]
pub struct Worker {
    runner: JobRunner,
    queue: JobQueue,
}

impl Worker {
    /// Creates a worker over a runner and the batch queue.
    pub fn new(runner: JobRunner, queue: JobQueue) -> Self {
        Self { runner, queue }
    }

    /// Drains the queue: claim the next pending job, fall back to expired
    /// claims, exit when neither yields work.
    pub async fn run(self) {
        let wallet = self.runner.wallet();
        let batch_id = self.runner.batch.id;
        self.runner.metrics.active_workers.increment(1.0);

        loop {
            let claimed = match self.claim(batch_id, wallet).await {
                Ok(claimed) => claimed,
                Err(err) => {
                    warn!(%wallet, %err, "claim failed, worker exiting");
                    break;
                }
            };
            let Some(job) = claimed else {
                debug!(%wallet, "queue drained, worker exiting");
                break;
            };

            self.runner.run_job(&job).await;

            // Self-throttle to stay under RPC rate limits.
            sleep(self.runner.config.throttle).await;
        }

        self.runner.metrics.active_workers.decrement(1.0);
    }

    async fn claim(
        &self,
        batch_id: crate::types::BatchId,
        wallet: Address,
    ) -> Result<Option<BatchJob>, crate::error::StorageError> {
        if let Some(job) = self.queue.claim_next(batch_id, wallet).await? {
            return Ok(Some(job));
        }

        let reclaimed = self.queue.claim_stuck(batch_id, wallet).await?;
        if let Some(job) = &reclaimed {
            self.runner.metrics.stuck_reclaims.increment(1);
            info!(job_id = job.id, %wallet, "reclaimed job with expired lease");
        }
        Ok(reclaimed)
    }
}
