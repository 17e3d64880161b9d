//! Queue exclusivity and state machine tests over the in-memory backend.

use alloy::primitives::{Address, U256};
use batch_relayer::{
    error::StorageError,
    storage::{RelayerStorage, StorageApi},
    types::{BatchJob, JobStatus},
};
use chrono::{Duration as ChronoDuration, Utc};
use std::{collections::HashSet, time::Duration};

fn jobs(batch_id: i64, count: i64) -> Vec<BatchJob> {
    (0..count)
        .map(|i| {
            BatchJob::new(i + 1, batch_id, Address::repeat_byte(1), U256::from(1_000_000u64))
        })
        .collect()
}

#[tokio::test]
async fn concurrent_claimants_never_share_a_job() {
    const JOBS: i64 = 100;
    const CLAIMANTS: usize = 8;

    let storage = RelayerStorage::in_memory();
    storage.insert_jobs(&jobs(1, JOBS)).await.unwrap();

    let mut tasks = Vec::new();
    for worker in 0..CLAIMANTS {
        let storage = storage.clone();
        tasks.push(tokio::spawn(async move {
            let me = Address::repeat_byte(worker as u8 + 1);
            let mut claimed = Vec::new();
            while let Some(job) = storage.claim_next_job(1, me).await.unwrap() {
                assert_eq!(job.status, JobStatus::Claimed);
                assert_eq!(job.relayer, Some(me));
                claimed.push(job.id);
            }
            claimed
        }));
    }

    let mut all = Vec::new();
    for task in tasks {
        all.extend(task.await.unwrap());
    }

    // Exactly one successful claim per job, across all claimants.
    assert_eq!(all.len(), JOBS as usize);
    let unique: HashSet<_> = all.iter().collect();
    assert_eq!(unique.len(), JOBS as usize);
}

#[tokio::test]
async fn expired_claims_are_reclaimable() {
    let storage = RelayerStorage::in_memory();
    let owner = Address::repeat_byte(1);
    let thief = Address::repeat_byte(2);

    // A claim whose owner went quiet ten minutes ago.
    let mut stale = BatchJob::new(1, 1, Address::repeat_byte(9), U256::from(1u64));
    stale.status = JobStatus::Claimed;
    stale.relayer = Some(owner);
    stale.updated_at = Utc::now() - ChronoDuration::minutes(10);
    storage.insert_jobs(&[stale]).await.unwrap();

    let lease = Duration::from_secs(120);
    let reclaimed = storage.claim_stuck_job(1, thief, lease).await.unwrap().unwrap();
    assert_eq!(reclaimed.id, 1);
    assert_eq!(reclaimed.relayer, Some(thief));

    // The reclaim refreshed the lease, so a second reclaim finds nothing.
    assert!(storage.claim_stuck_job(1, owner, lease).await.unwrap().is_none());
}

#[tokio::test]
async fn fresh_claims_are_not_reclaimable() {
    let storage = RelayerStorage::in_memory();
    storage.insert_jobs(&jobs(1, 1)).await.unwrap();

    let owner = Address::repeat_byte(1);
    storage.claim_next_job(1, owner).await.unwrap().unwrap();

    let lease = Duration::from_secs(120);
    assert!(storage
        .claim_stuck_job(1, Address::repeat_byte(2), lease)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn illegal_transitions_are_rejected() {
    let storage = RelayerStorage::in_memory();
    storage.insert_jobs(&jobs(1, 1)).await.unwrap();

    // A pending row cannot jump straight to a terminal state.
    let err = storage.update_job_status(1, JobStatus::Completed).await.unwrap_err();
    assert!(matches!(
        err,
        StorageError::IllegalJobTransition { from: JobStatus::Pending, to: JobStatus::Completed }
    ));

    // And a completed row never moves again.
    let worker = Address::repeat_byte(1);
    storage.claim_next_job(1, worker).await.unwrap().unwrap();
    storage.update_job_status(1, JobStatus::Completed).await.unwrap();
    let err = storage.update_job_status(1, JobStatus::Failed).await.unwrap_err();
    assert!(matches!(err, StorageError::IllegalJobTransition { .. }));
}

#[tokio::test]
async fn retry_claims_bump_the_counter_and_skip_resolved_rows() {
    let storage = RelayerStorage::in_memory();
    storage.insert_jobs(&jobs(1, 2)).await.unwrap();
    let worker = Address::repeat_byte(1);

    // Fail job 1, then reclaim it for a retry.
    storage.claim_next_job(1, worker).await.unwrap().unwrap();
    storage.update_job_status(1, JobStatus::Failed).await.unwrap();
    let retried = storage.claim_job_for_retry(1, worker).await.unwrap().unwrap();
    assert_eq!(retried.status, JobStatus::Claimed);
    assert_eq!(retried.retry_count, 1);

    // Complete job 2; it is no longer claimable for retries.
    storage.claim_next_job(1, worker).await.unwrap().unwrap();
    storage.update_job_status(2, JobStatus::Completed).await.unwrap();
    assert!(storage.claim_job_for_retry(2, worker).await.unwrap().is_none());
}
