//! The batch job queue.
//!
//! A thin facade over the storage layer's atomic claim operations. All
//! worker coordination happens here: a claim either takes exclusive
//! ownership of a row or returns nothing, so no two workers ever process
//! the same job concurrently.

use crate::{
    error::StorageError,
    storage::{RelayerStorage, StorageApi},
    types::{BatchId, BatchJob, JobId},
};
use alloy::primitives::Address;
use std::time::Duration;

/// Exclusive-claim work queue over a batch's job rows.
#[derive(Debug, Clone)]
pub struct JobQueue {
    storage: RelayerStorage,
    lease: Duration,
}

impl JobQueue {
    /// Creates a queue with the given claim lease.
    pub fn new(storage: RelayerStorage, lease: Duration) -> Self {
        Self { storage, lease }
    }

    /// Claims the oldest pending job for `worker`, if any.
    pub async fn claim_next(
        &self,
        batch_id: BatchId,
        worker: Address,
    ) -> Result<Option<BatchJob>, StorageError> {
        self.storage.claim_next_job(batch_id, worker).await
    }

    /// Reclaims a job whose previous owner went quiet past the lease.
    ///
    /// Crash recovery without an external watchdog: an abandoned claim
    /// simply expires and the row becomes claimable again.
    pub async fn claim_stuck(
        &self,
        batch_id: BatchId,
        worker: Address,
    ) -> Result<Option<BatchJob>, StorageError> {
        self.storage.claim_stuck_job(batch_id, worker, self.lease).await
    }

    /// Claims a specific job for a retry cycle, bumping its retry count.
    pub async fn claim_for_retry(
        &self,
        job_id: JobId,
        worker: Address,
    ) -> Result<Option<BatchJob>, StorageError> {
        self.storage.claim_job_for_retry(job_id, worker).await
    }
}
