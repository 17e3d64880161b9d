//! Relayer storage api.

use crate::{
    error::StorageError,
    types::{
        Batch, BatchId, BatchJob, BatchStatus, FaucetWallet, JobId, JobStatus, MerkleNode,
        RelayerWallet,
    },
};
use alloy::primitives::{Address, B256, U256};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::{fmt::Debug, time::Duration};

/// Type alias for `Result<T, StorageError>`.
pub type Result<T> = core::result::Result<T, StorageError>;

/// Storage API.
///
/// Both status-update operations validate the state machine and reject
/// illegal transitions; the claim operations are atomic, so a job row is
/// owned by at most one worker at any instant.
#[async_trait]
pub trait StorageApi: Debug + Send + Sync {
    /// Creates a batch row.
    async fn create_batch(&self, batch: &Batch) -> Result<()>;

    /// Reads a batch row.
    async fn read_batch(&self, id: BatchId) -> Result<Option<Batch>>;

    /// Advances a batch through its state machine.
    async fn update_batch_status(&self, id: BatchId, status: BatchStatus) -> Result<()>;

    /// Records the batch's Merkle root once the tree is built.
    async fn set_batch_root(&self, id: BatchId, root: B256) -> Result<()>;

    /// Records the amount distributed to the batch's relayer wallets.
    async fn set_batch_funding(&self, id: BatchId, amount: U256) -> Result<()>;

    /// Adds a swept residual to the batch's refund total.
    async fn add_batch_refund(&self, id: BatchId, amount: U256) -> Result<()>;

    /// Stamps the dispatch start time.
    async fn set_batch_started(&self, id: BatchId, at: DateTime<Utc>) -> Result<()>;

    /// Stamps the terminal time.
    async fn set_batch_ended(&self, id: BatchId, at: DateTime<Utc>) -> Result<()>;

    /// Inserts the batch's job rows.
    async fn insert_jobs(&self, jobs: &[BatchJob]) -> Result<()>;

    /// Reads a single job row.
    async fn read_job(&self, id: JobId) -> Result<Option<BatchJob>>;

    /// Reads all job rows of a batch, ordered by id.
    async fn batch_jobs(&self, batch_id: BatchId) -> Result<Vec<BatchJob>>;

    /// Atomically claims the oldest pending job for `worker`.
    ///
    /// The row is moved to [`JobStatus::Claimed`] with a fresh timestamp and
    /// returned. Rows locked by a concurrent claimant are skipped rather
    /// than waited on.
    async fn claim_next_job(&self, batch_id: BatchId, worker: Address)
    -> Result<Option<BatchJob>>;

    /// Atomically reclaims a job whose claim lease has expired.
    ///
    /// Targets rows sitting in [`JobStatus::Claimed`] or
    /// [`JobStatus::WaitingConfirmation`] untouched for longer than `lease`.
    async fn claim_stuck_job(
        &self,
        batch_id: BatchId,
        worker: Address,
        lease: Duration,
    ) -> Result<Option<BatchJob>>;

    /// Atomically claims a specific retryable job for a retry cycle,
    /// bumping its retry count.
    async fn claim_job_for_retry(&self, id: JobId, worker: Address) -> Result<Option<BatchJob>>;

    /// Moves a job through its state machine.
    async fn update_job_status(&self, id: JobId, status: JobStatus) -> Result<()>;

    /// Records a job outcome: status plus the transaction hash, if any.
    async fn record_job_result(
        &self,
        id: JobId,
        status: JobStatus,
        tx_hash: Option<B256>,
    ) -> Result<()>;

    /// Jobs eligible for a retry cycle: retryable status and retry count
    /// under the ceiling.
    async fn retryable_jobs(&self, batch_id: BatchId, max_retries: u32) -> Result<Vec<BatchJob>>;

    /// Number of jobs not yet in a terminal state.
    async fn open_job_count(&self, batch_id: BatchId) -> Result<u64>;

    /// Up to `limit` pending jobs, oldest first. Used for gas sampling.
    async fn pending_jobs(&self, batch_id: BatchId, limit: usize) -> Result<Vec<BatchJob>>;

    /// Inserts relayer wallet rows.
    async fn insert_relayers(&self, relayers: &[RelayerWallet]) -> Result<()>;

    /// Reads all relayer wallets of a batch.
    async fn batch_relayers(&self, batch_id: BatchId) -> Result<Vec<RelayerWallet>>;

    /// Adds to a relayer wallet's cumulative gas spend.
    async fn add_relayer_gas(&self, address: Address, gas: U256) -> Result<()>;

    /// Marks a relayer wallet drained, recording its final balance.
    async fn mark_relayer_drained(&self, address: Address, last_balance: U256) -> Result<()>;

    /// Persists tree nodes so proofs can be regenerated without rebuilding.
    async fn insert_merkle_nodes(&self, nodes: &[MerkleNode]) -> Result<()>;

    /// Reads one node by position.
    async fn merkle_node(
        &self,
        batch_id: BatchId,
        level: u32,
        index: u32,
    ) -> Result<Option<MerkleNode>>;

    /// Reads the level-0 node backing a job.
    async fn leaf_node(&self, batch_id: BatchId, job_id: JobId) -> Result<Option<MerkleNode>>;

    /// Height of the persisted tree: its maximum level.
    async fn tree_height(&self, batch_id: BatchId) -> Result<u32>;

    /// Reads the faucet wallet for a funder identity.
    async fn read_faucet(&self, funder: Address) -> Result<Option<FaucetWallet>>;

    /// Writes a faucet wallet row.
    async fn write_faucet(&self, faucet: &FaucetWallet) -> Result<()>;

    /// Storage liveness check.
    async fn ping(&self) -> Result<()>;
}
