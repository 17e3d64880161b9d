//! Relayer storage implementation in-memory. For testing only.

use super::api::{Result, StorageApi};
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
use dashmap::DashMap;
use std::{collections::BTreeMap, time::Duration};
use tokio::sync::Mutex;

/// [`StorageApi`] implementation in-memory. Used for testing.
///
/// Job rows live behind a single [`Mutex`] so that select-and-claim is one
/// critical section, matching the atomicity of the SQL backend's
/// `FOR UPDATE SKIP LOCKED` claims.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    batches: DashMap<BatchId, Batch>,
    jobs: Mutex<BTreeMap<JobId, BatchJob>>,
    relayers: DashMap<Address, RelayerWallet>,
    nodes: DashMap<(BatchId, u32, u32), MerkleNode>,
    faucets: DashMap<Address, FaucetWallet>,
}

impl InMemoryStorage {
    fn with_batch<T>(
        &self,
        id: BatchId,
        f: impl FnOnce(&mut Batch) -> Result<T>,
    ) -> Result<T> {
        let mut batch = self
            .batches
            .get_mut(&id)
            .ok_or_else(|| StorageError::NotFound(format!("batch {id}")))?;
        f(&mut batch)
    }

    fn claim(job: &mut BatchJob, worker: Address, bump_retry: bool) {
        job.status = JobStatus::Claimed;
        job.relayer = Some(worker);
        job.updated_at = Utc::now();
        if bump_retry {
            job.retry_count += 1;
        }
    }
}

#[async_trait]
impl StorageApi for InMemoryStorage {
    async fn create_batch(&self, batch: &Batch) -> Result<()> {
        self.batches.insert(batch.id, batch.clone());
        Ok(())
    }

    async fn read_batch(&self, id: BatchId) -> Result<Option<Batch>> {
        Ok(self.batches.get(&id).map(|b| b.clone()))
    }

    async fn update_batch_status(&self, id: BatchId, status: BatchStatus) -> Result<()> {
        self.with_batch(id, |batch| {
            if !batch.status.can_transition_to(status) {
                return Err(StorageError::IllegalBatchTransition {
                    from: batch.status,
                    to: status,
                });
            }
            batch.status = status;
            Ok(())
        })
    }

    async fn set_batch_root(&self, id: BatchId, root: B256) -> Result<()> {
        self.with_batch(id, |batch| {
            batch.merkle_root = Some(root);
            Ok(())
        })
    }

    async fn set_batch_funding(&self, id: BatchId, amount: U256) -> Result<()> {
        self.with_batch(id, |batch| {
            batch.funding_amount = amount;
            Ok(())
        })
    }

    async fn add_batch_refund(&self, id: BatchId, amount: U256) -> Result<()> {
        self.with_batch(id, |batch| {
            batch.refund_amount += amount;
            Ok(())
        })
    }

    async fn set_batch_started(&self, id: BatchId, at: DateTime<Utc>) -> Result<()> {
        self.with_batch(id, |batch| {
            batch.started_at = Some(at);
            Ok(())
        })
    }

    async fn set_batch_ended(&self, id: BatchId, at: DateTime<Utc>) -> Result<()> {
        self.with_batch(id, |batch| {
            batch.ended_at = Some(at);
            Ok(())
        })
    }

    async fn insert_jobs(&self, jobs: &[BatchJob]) -> Result<()> {
        let mut table = self.jobs.lock().await;
        for job in jobs {
            table.insert(job.id, job.clone());
        }
        Ok(())
    }

    async fn read_job(&self, id: JobId) -> Result<Option<BatchJob>> {
        Ok(self.jobs.lock().await.get(&id).cloned())
    }

    async fn batch_jobs(&self, batch_id: BatchId) -> Result<Vec<BatchJob>> {
        Ok(self
            .jobs
            .lock()
            .await
            .values()
            .filter(|job| job.batch_id == batch_id)
            .cloned()
            .collect())
    }

    async fn claim_next_job(
        &self,
        batch_id: BatchId,
        worker: Address,
    ) -> Result<Option<BatchJob>> {
        let mut table = self.jobs.lock().await;
        let Some(job) = table
            .values_mut()
            .find(|job| job.batch_id == batch_id && job.status == JobStatus::Pending)
        else {
            return Ok(None);
        };

        Self::claim(job, worker, false);
        Ok(Some(job.clone()))
    }

    async fn claim_stuck_job(
        &self,
        batch_id: BatchId,
        worker: Address,
        lease: Duration,
    ) -> Result<Option<BatchJob>> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(lease).unwrap_or_else(|_| chrono::Duration::zero());

        let mut table = self.jobs.lock().await;
        let Some(job) = table.values_mut().find(|job| {
            job.batch_id == batch_id && job.status.is_reclaimable() && job.updated_at < cutoff
        }) else {
            return Ok(None);
        };

        Self::claim(job, worker, false);
        Ok(Some(job.clone()))
    }

    async fn claim_job_for_retry(&self, id: JobId, worker: Address) -> Result<Option<BatchJob>> {
        let mut table = self.jobs.lock().await;
        let Some(job) = table.get_mut(&id) else {
            return Ok(None);
        };
        if !job.status.is_retryable() {
            return Ok(None);
        }

        Self::claim(job, worker, true);
        Ok(Some(job.clone()))
    }

    async fn update_job_status(&self, id: JobId, status: JobStatus) -> Result<()> {
        let mut table = self.jobs.lock().await;
        let job = table
            .get_mut(&id)
            .ok_or_else(|| StorageError::NotFound(format!("job {id}")))?;

        if !job.status.can_transition_to(status) {
            return Err(StorageError::IllegalJobTransition { from: job.status, to: status });
        }
        job.status = status;
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn record_job_result(
        &self,
        id: JobId,
        status: JobStatus,
        tx_hash: Option<B256>,
    ) -> Result<()> {
        let mut table = self.jobs.lock().await;
        let job = table
            .get_mut(&id)
            .ok_or_else(|| StorageError::NotFound(format!("job {id}")))?;

        if !job.status.can_transition_to(status) {
            return Err(StorageError::IllegalJobTransition { from: job.status, to: status });
        }
        job.status = status;
        if tx_hash.is_some() {
            job.tx_hash = tx_hash;
        }
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn retryable_jobs(&self, batch_id: BatchId, max_retries: u32) -> Result<Vec<BatchJob>> {
        Ok(self
            .jobs
            .lock()
            .await
            .values()
            .filter(|job| {
                job.batch_id == batch_id
                    && job.status.is_retryable()
                    && job.retry_count < max_retries
            })
            .cloned()
            .collect())
    }

    async fn open_job_count(&self, batch_id: BatchId) -> Result<u64> {
        Ok(self
            .jobs
            .lock()
            .await
            .values()
            .filter(|job| job.batch_id == batch_id && !job.status.is_terminal())
            .count() as u64)
    }

    async fn pending_jobs(&self, batch_id: BatchId, limit: usize) -> Result<Vec<BatchJob>> {
        Ok(self
            .jobs
            .lock()
            .await
            .values()
            .filter(|job| job.batch_id == batch_id && job.status == JobStatus::Pending)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn insert_relayers(&self, relayers: &[RelayerWallet]) -> Result<()> {
        for relayer in relayers {
            self.relayers.insert(relayer.address, relayer.clone());
        }
        Ok(())
    }

    async fn batch_relayers(&self, batch_id: BatchId) -> Result<Vec<RelayerWallet>> {
        let mut relayers: Vec<_> = self
            .relayers
            .iter()
            .filter(|entry| entry.batch_id == batch_id)
            .map(|entry| entry.clone())
            .collect();
        relayers.sort_by_key(|r| r.address);
        Ok(relayers)
    }

    async fn add_relayer_gas(&self, address: Address, gas: U256) -> Result<()> {
        if let Some(mut relayer) = self.relayers.get_mut(&address) {
            relayer.gas_spent += gas;
        }
        Ok(())
    }

    async fn mark_relayer_drained(&self, address: Address, last_balance: U256) -> Result<()> {
        let mut relayer = self
            .relayers
            .get_mut(&address)
            .ok_or_else(|| StorageError::NotFound(format!("relayer {address}")))?;
        relayer.status = crate::types::WalletStatus::Drained;
        relayer.last_balance = last_balance;
        Ok(())
    }

    async fn insert_merkle_nodes(&self, nodes: &[MerkleNode]) -> Result<()> {
        for node in nodes {
            self.nodes.insert((node.batch_id, node.level, node.index), node.clone());
        }
        Ok(())
    }

    async fn merkle_node(
        &self,
        batch_id: BatchId,
        level: u32,
        index: u32,
    ) -> Result<Option<MerkleNode>> {
        Ok(self.nodes.get(&(batch_id, level, index)).map(|node| node.clone()))
    }

    async fn leaf_node(&self, batch_id: BatchId, job_id: JobId) -> Result<Option<MerkleNode>> {
        Ok(self
            .nodes
            .iter()
            .find(|entry| entry.batch_id == batch_id && entry.job_id == Some(job_id))
            .map(|entry| entry.clone()))
    }

    async fn tree_height(&self, batch_id: BatchId) -> Result<u32> {
        Ok(self
            .nodes
            .iter()
            .filter(|entry| entry.batch_id == batch_id)
            .map(|entry| entry.level)
            .max()
            .unwrap_or_default())
    }

    async fn read_faucet(&self, funder: Address) -> Result<Option<FaucetWallet>> {
        Ok(self.faucets.get(&funder).map(|f| f.clone()))
    }

    async fn write_faucet(&self, faucet: &FaucetWallet) -> Result<()> {
        self.faucets.insert(faucet.funder, faucet.clone());
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
