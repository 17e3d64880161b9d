//! Relayer storage.

mod api;
pub use api::StorageApi;

mod memory;
pub use memory::InMemoryStorage;

mod pg;
pub use pg::PgStorage;

use crate::types::{
    Batch, BatchId, BatchJob, BatchStatus, FaucetWallet, JobId, JobStatus, MerkleNode,
    RelayerWallet,
};
use alloy::primitives::{Address, B256, U256};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::{sync::Arc, time::Duration};

/// Relayer storage interface.
#[derive(Debug, Clone)]
pub struct RelayerStorage {
    inner: Arc<dyn StorageApi>,
}

impl RelayerStorage {
    /// Creates [`RelayerStorage`] with an in-memory backend. Used for
    /// testing only.
    pub fn in_memory() -> Self {
        Self { inner: Arc::new(InMemoryStorage::default()) }
    }

    /// Creates [`RelayerStorage`] with a PostgreSQL backend.
    pub fn pg(pool: PgPool) -> Self {
        Self { inner: Arc::new(PgStorage::new(pool)) }
    }
}

#[async_trait]
impl StorageApi for RelayerStorage {
    async fn create_batch(&self, batch: &Batch) -> api::Result<()> {
        self.inner.create_batch(batch).await
    }

    async fn read_batch(&self, id: BatchId) -> api::Result<Option<Batch>> {
        self.inner.read_batch(id).await
    }

    async fn update_batch_status(&self, id: BatchId, status: BatchStatus) -> api::Result<()> {
        self.inner.update_batch_status(id, status).await
    }

    async fn set_batch_root(&self, id: BatchId, root: B256) -> api::Result<()> {
        self.inner.set_batch_root(id, root).await
    }

    async fn set_batch_funding(&self, id: BatchId, amount: U256) -> api::Result<()> {
        self.inner.set_batch_funding(id, amount).await
    }

    async fn add_batch_refund(&self, id: BatchId, amount: U256) -> api::Result<()> {
        self.inner.add_batch_refund(id, amount).await
    }

    async fn set_batch_started(&self, id: BatchId, at: DateTime<Utc>) -> api::Result<()> {
        self.inner.set_batch_started(id, at).await
    }

    async fn set_batch_ended(&self, id: BatchId, at: DateTime<Utc>) -> api::Result<()> {
        self.inner.set_batch_ended(id, at).await
    }

    async fn insert_jobs(&self, jobs: &[BatchJob]) -> api::Result<()> {
        self.inner.insert_jobs(jobs).await
    }

    async fn read_job(&self, id: JobId) -> api::Result<Option<BatchJob>> {
        self.inner.read_job(id).await
    }

    async fn batch_jobs(&self, batch_id: BatchId) -> api::Result<Vec<BatchJob>> {
        self.inner.batch_jobs(batch_id).await
    }

    async fn claim_next_job(
        &self,
        batch_id: BatchId,
        worker: Address,
    ) -> api::Result<Option<BatchJob>> {
        self.inner.claim_next_job(batch_id, worker).await
    }

    async fn claim_stuck_job(
        &self,
        batch_id: BatchId,
        worker: Address,
        lease: Duration,
    ) -> api::Result<Option<BatchJob>> {
        self.inner.claim_stuck_job(batch_id, worker, lease).await
    }

    async fn claim_job_for_retry(
        &self,
        id: JobId,
        worker: Address,
    ) -> api::Result<Option<BatchJob>> {
        self.inner.claim_job_for_retry(id, worker).await
    }

    async fn update_job_status(&self, id: JobId, status: JobStatus) -> api::Result<()> {
        self.inner.update_job_status(id, status).await
    }

    async fn record_job_result(
        &self,
        id: JobId,
        status: JobStatus,
        tx_hash: Option<B256>,
    ) -> api::Result<()> {
        self.inner.record_job_result(id, status, tx_hash).await
    }

    async fn retryable_jobs(
        &self,
        batch_id: BatchId,
        max_retries: u32,
    ) -> api::Result<Vec<BatchJob>> {
        self.inner.retryable_jobs(batch_id, max_retries).await
    }

    async fn open_job_count(&self, batch_id: BatchId) -> api::Result<u64> {
        self.inner.open_job_count(batch_id).await
    }

    async fn pending_jobs(&self, batch_id: BatchId, limit: usize) -> api::Result<Vec<BatchJob>> {
        self.inner.pending_jobs(batch_id, limit).await
    }

    async fn insert_relayers(&self, relayers: &[RelayerWallet]) -> api::Result<()> {
        self.inner.insert_relayers(relayers).await
    }

    async fn batch_relayers(&self, batch_id: BatchId) -> api::Result<Vec<RelayerWallet>> {
        self.inner.batch_relayers(batch_id).await
    }

    async fn add_relayer_gas(&self, address: Address, gas: U256) -> api::Result<()> {
        self.inner.add_relayer_gas(address, gas).await
    }

    async fn mark_relayer_drained(
        &self,
        address: Address,
        last_balance: U256,
    ) -> api::Result<()> {
        self.inner.mark_relayer_drained(address, last_balance).await
    }

    async fn insert_merkle_nodes(&self, nodes: &[MerkleNode]) -> api::Result<()> {
        self.inner.insert_merkle_nodes(nodes).await
    }

    async fn merkle_node(
        &self,
        batch_id: BatchId,
        level: u32,
        index: u32,
    ) -> api::Result<Option<MerkleNode>> {
        self.inner.merkle_node(batch_id, level, index).await
    }

    async fn leaf_node(
        &self,
        batch_id: BatchId,
        job_id: JobId,
    ) -> api::Result<Option<MerkleNode>> {
        self.inner.leaf_node(batch_id, job_id).await
    }

    async fn tree_height(&self, batch_id: BatchId) -> api::Result<u32> {
        self.inner.tree_height(batch_id).await
    }

    async fn read_faucet(&self, funder: Address) -> api::Result<Option<FaucetWallet>> {
        self.inner.read_faucet(funder).await
    }

    async fn write_faucet(&self, faucet: &FaucetWallet) -> api::Result<()> {
        self.inner.write_faucet(faucet).await
    }

    async fn ping(&self) -> api::Result<()> {
        self.inner.ping().await
    }
}
