//! Batch orchestration: provision, fund, register, dispatch, retry,
//! reconcile, sweep, finalize.

use crate::{
    constants::DEFAULT_WORKER_COUNT,
    dispatch::{DispatchConfig, JobRunner, RetryCoordinator, Worker, WorkerPool},
    error::RelayerError,
    funding::{FundingConfig, GasFundingController},
    keystore::KeyStore,
    ledger::{Ledger, RootRegistration},
    merkle::MerkleProofService,
    metrics::DispatchMetrics,
    nonce::NonceRepairService,
    queue::JobQueue,
    storage::{RelayerStorage, StorageApi},
    types::{
        Batch, BatchId, BatchJob, BatchStatus, JobStatus, RelayerWallet, payment_leaf,
    },
};
use alloy::{
    primitives::{Address, B256, Bytes, U256, keccak256},
    signers::{Signer, local::PrivateKeySigner},
    sol_types::SolValue,
};
use chrono::Utc;
use itertools::Itertools;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Relayer wallets provisioned per batch.
    pub workers: usize,
    /// Funding controller tuning.
    pub funding: FundingConfig,
    /// Dispatch and retry tuning.
    pub dispatch: DispatchConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKER_COUNT,
            funding: FundingConfig::default(),
            dispatch: DispatchConfig::default(),
        }
    }
}

/// Aggregated result of a finished batch.
#[derive(Debug, Clone)]
pub struct BatchReport {
    /// The batch that ran.
    pub batch_id: BatchId,
    /// Jobs that reached [`JobStatus::Completed`].
    pub completed: u64,
    /// Jobs left in [`JobStatus::Failed`].
    pub failed: u64,
    /// Native amount distributed to relayer wallets.
    pub funding_amount: U256,
    /// Native amount swept back to the faucet.
    pub refund_amount: U256,
    /// Total gas spent across all relayer wallets, in wei.
    pub gas_spent: U256,
}

/// Runs batches end to end.
#[derive(Debug)]
pub struct BatchEngine {
    storage: RelayerStorage,
    ledger: Arc<dyn Ledger>,
    keystore: Arc<dyn KeyStore>,
    proofs: MerkleProofService,
    funding: GasFundingController,
    nonce_repair: NonceRepairService,
    config: EngineConfig,
    metrics: Arc<DispatchMetrics>,
}

impl BatchEngine {
    /// Creates a new [`BatchEngine`].
    pub fn new(
        storage: RelayerStorage,
        ledger: Arc<dyn Ledger>,
        keystore: Arc<dyn KeyStore>,
        config: EngineConfig,
    ) -> Self {
        let proofs = MerkleProofService::new(storage.clone());
        let funding = GasFundingController::new(
            storage.clone(),
            ledger.clone(),
            keystore.clone(),
            config.funding.clone(),
        );
        let nonce_repair = NonceRepairService::new(ledger.clone());
        let metrics = Arc::new(DispatchMetrics::default());

        Self { storage, ledger, keystore, proofs, funding, nonce_repair, config, metrics }
    }

    /// Runs a batch to a terminal state.
    ///
    /// Fatal errors mark the batch failed before propagating; per-job
    /// failures only show up in the report.
    #[instrument(skip(self))]
    pub async fn run_batch(&self, batch_id: BatchId) -> Result<BatchReport, RelayerError> {
        match self.run_batch_inner(batch_id).await {
            Ok(report) => Ok(report),
            Err(err) => {
                warn!(%err, "batch halted");
                self.halt_batch(batch_id).await;
                Err(err)
            }
        }
    }

    /// Best-effort terminal write for a halted batch.
    async fn halt_batch(&self, batch_id: BatchId) {
        if let Err(err) = self.storage.update_batch_status(batch_id, BatchStatus::Failed).await {
            warn!(%err, "could not mark batch failed");
        }
        if let Err(err) = self.storage.set_batch_ended(batch_id, Utc::now()).await {
            warn!(%err, "could not stamp batch end time");
        }
    }

    async fn run_batch_inner(&self, batch_id: BatchId) -> Result<BatchReport, RelayerError> {
        let batch = self
            .storage
            .read_batch(batch_id)
            .await?
            .ok_or(RelayerError::UnknownBatch(batch_id))?;
        if batch.status != BatchStatus::Preparing {
            return Err(RelayerError::BadBatchState {
                batch_id,
                actual: batch.status,
                expected: BatchStatus::Preparing,
            });
        }

        let jobs = self.storage.batch_jobs(batch_id).await?;
        if jobs.is_empty() {
            return Err(RelayerError::Internal(eyre::eyre!("batch {batch_id} has no jobs")));
        }

        let faucet = self
            .storage
            .read_faucet(batch.funder)
            .await?
            .ok_or_else(|| RelayerError::Internal(eyre::eyre!("no faucet for {}", batch.funder)))?;
        let faucet_signer = self.keystore.get_key(faucet.address).await?;

        // Provision ephemeral wallets, keys straight into the vault.
        let signers = self.provision_relayers(&batch, jobs.len()).await?;
        let relayers = self.storage.batch_relayers(batch_id).await?;
        info!(
            wallets = %signers.iter().map(|s| s.address()).join(", "),
            "provisioned relayer wallets"
        );

        // A stuck faucet nonce would wedge the funding transaction.
        self.nonce_repair.repair(&faucet_signer).await?;

        let funding_amount = self.funding.fund_relayers(&batch, &faucet_signer, &relayers).await?;
        self.storage.update_batch_status(batch_id, BatchStatus::Ready).await?;

        let root = self.proofs.build_tree(&self.ledger.domain(), &batch, &jobs).await?;
        self.register_root(&batch, &faucet_signer, root, &jobs).await?;

        self.storage.update_batch_status(batch_id, BatchStatus::Sent).await?;
        self.storage.set_batch_started(batch_id, Utc::now()).await?;

        // No wallet dispatches with a nonce gap. A no-op for the fresh
        // wallets this engine provisions, but reclaimed or reused state
        // would surface here instead of wedging a worker.
        for signer in &signers {
            self.nonce_repair.repair(signer).await?;
        }

        // Initial pass: one worker per wallet drains the queue.
        let queue = JobQueue::new(self.storage.clone(), self.config.dispatch.claim_lease);
        let runners: Vec<JobRunner> = signers
            .iter()
            .map(|signer| {
                JobRunner::new(
                    self.storage.clone(),
                    self.proofs.clone(),
                    self.ledger.clone(),
                    batch.clone(),
                    signer.clone(),
                    self.config.dispatch.clone(),
                    self.metrics.clone(),
                )
            })
            .collect();

        let workers = runners
            .iter()
            .map(|runner| Worker::new(runner.clone(), queue.clone()))
            .collect::<Vec<_>>();
        WorkerPool::new(workers).run().await;

        // Cleanup pass over stragglers.
        let retry = RetryCoordinator::new(
            self.storage.clone(),
            queue.clone(),
            runners,
            self.config.dispatch.clone(),
            self.metrics.clone(),
        );
        let unresolved = retry.run(batch_id).await?;
        if unresolved > 0 {
            warn!(unresolved, "jobs left unresolved after retry cycles");
        }

        // Settle anything still open from on-chain truth, so sweeping can
        // start from a quiet queue.
        self.reconcile_open_jobs(&batch, faucet.address).await?;

        let refund_amount =
            self.funding.sweep_residuals(&batch, faucet.address, &relayers).await?;

        self.finalize(batch_id, funding_amount, refund_amount).await
    }

    /// Creates `min(workers, jobs)` fresh wallets for the batch and stores
    /// their keys and rows.
    async fn provision_relayers(
        &self,
        batch: &Batch,
        job_count: usize,
    ) -> Result<Vec<PrivateKeySigner>, RelayerError> {
        let count = self.config.workers.min(job_count).max(1);

        let mut signers = Vec::with_capacity(count);
        let mut rows = Vec::with_capacity(count);
        for _ in 0..count {
            let signer = PrivateKeySigner::random();
            self.keystore.set_key(signer.address(), &signer).await?;
            rows.push(RelayerWallet::new(signer.address(), batch.id));
            signers.push(signer);
        }
        self.storage.insert_relayers(&rows).await?;

        Ok(signers)
    }

    /// Registers the batch root on-chain and verifies the contract agrees
    /// with the local tree. A mismatch is fatal: every proof in the batch
    /// would be rejected, so nothing gets submitted.
    async fn register_root(
        &self,
        batch: &Batch,
        faucet_signer: &PrivateKeySigner,
        root: B256,
        jobs: &[BatchJob],
    ) -> Result<(), RelayerError> {
        let total_amount = jobs.iter().map(|job| job.amount).sum::<U256>();
        let registration = RootRegistration {
            funder: batch.funder,
            batch_id: batch.id,
            root,
            total_txs: jobs.len() as u64,
            total_amount,
            signature: self
                .sign_registration(faucet_signer, batch, root, jobs.len() as u64, total_amount)
                .await?,
        };

        let tx_hash = self.ledger.register_batch_root(faucet_signer, &registration).await?;
        let confirmation = self
            .ledger
            .wait_for_confirmation(tx_hash, self.config.dispatch.confirmation_timeout)
            .await?
            .ok_or(RelayerError::ConfirmationTimeout(tx_hash))?;
        if !confirmation.success {
            return Err(RelayerError::Reverted(tx_hash));
        }

        let onchain = self.ledger.batch_root(batch.funder, batch.id).await?;
        if onchain != root {
            return Err(RelayerError::RootMismatch { batch_id: batch.id, onchain, local: root });
        }

        info!(%root, %tx_hash, "batch root registered and verified");
        Ok(())
    }

    /// Signs the registration payload on the funder's behalf.
    async fn sign_registration(
        &self,
        signer: &PrivateKeySigner,
        batch: &Batch,
        root: B256,
        total_txs: u64,
        total_amount: U256,
    ) -> Result<Bytes, RelayerError> {
        let digest = keccak256(
            (
                batch.funder,
                U256::from(batch.id as u64),
                root,
                U256::from(total_txs),
                total_amount,
            )
                .abi_encode(),
        );
        let signature = signer.sign_hash(&digest).await?;

        Ok(Bytes::copy_from_slice(&signature.as_bytes()))
    }

    /// Settles every remaining open job from on-chain state: processed
    /// leaves become completed, everything else fails. Runs after the
    /// retry budget so the sweep never races active work.
    async fn reconcile_open_jobs(
        &self,
        batch: &Batch,
        reconciler: Address,
    ) -> Result<(), RelayerError> {
        let domain = self.ledger.domain();

        for job in self.storage.batch_jobs(batch.id).await? {
            if job.status.is_terminal() {
                continue;
            }

            // Pending rows need a claim first to keep transitions legal.
            let job = if job.status == JobStatus::Pending {
                match self.storage.claim_job_for_retry(job.id, reconciler).await? {
                    Some(job) => job,
                    None => continue,
                }
            } else {
                job
            };

            let leaf = payment_leaf(
                &domain,
                batch.id,
                job.id,
                batch.funder,
                job.recipient,
                job.amount,
            );
            if self.ledger.is_leaf_processed(leaf).await? {
                let tx_hash = self.ledger.find_execution(leaf).await?;
                self.storage.record_job_result(job.id, JobStatus::Completed, tx_hash).await?;
                info!(job_id = job.id, "reconciled open job from on-chain state");
            } else {
                self.storage.record_job_result(job.id, JobStatus::Failed, None).await?;
                warn!(job_id = job.id, "open job not found on-chain, marking failed");
            }
        }

        Ok(())
    }

    /// Stamps the terminal state and aggregates the batch's accounting.
    async fn finalize(
        &self,
        batch_id: BatchId,
        funding_amount: U256,
        refund_amount: U256,
    ) -> Result<BatchReport, RelayerError> {
        let jobs = self.storage.batch_jobs(batch_id).await?;
        let completed =
            jobs.iter().filter(|job| job.status == JobStatus::Completed).count() as u64;
        let failed = jobs.len() as u64 - completed;

        // Net gas is accounted from per-relayer spend, the one canonical
        // source; funding minus refund only bounds it from above.
        let gas_spent = self
            .storage
            .batch_relayers(batch_id)
            .await?
            .iter()
            .map(|relayer| relayer.gas_spent)
            .sum::<U256>();

        let status =
            if failed == 0 { BatchStatus::Completed } else { BatchStatus::Failed };
        self.storage.update_batch_status(batch_id, status).await?;
        self.storage.set_batch_ended(batch_id, Utc::now()).await?;

        let report =
            BatchReport { batch_id, completed, failed, funding_amount, refund_amount, gas_spent };
        info!(
            completed, failed, %funding_amount, %refund_amount, %gas_spent, %status,
            "batch finished"
        );

        Ok(report)
    }
}
