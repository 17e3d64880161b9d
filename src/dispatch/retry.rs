//! Bounded retry cycles over failed and unconfirmed jobs.

use super::{DispatchConfig, worker::JobRunner};
use crate::{
    error::RelayerError,
    metrics::DispatchMetrics,
    queue::JobQueue,
    storage::{RelayerStorage, StorageApi},
    types::BatchId,
};
use futures_util::{StreamExt, stream};
use rand::seq::SliceRandom;
use std::{sync::Arc, time::Duration};
use tokio::time::sleep;
use tracing::{info, instrument, warn};

/// Backoff before the given retry cycle: exponential from `base`, capped.
pub(crate) fn cycle_backoff(base: Duration, cap: Duration, cycle: u32) -> Duration {
    let doubled = base.saturating_mul(1u32 << cycle.saturating_sub(1).min(16));
    doubled.min(cap)
}

/// Drives bounded retry cycles after the initial dispatch pass.
///
/// Each cycle re-queries for jobs still under the retry ceiling, reassigns
/// them across a freshly shuffled worker set, and dispatches with bounded
/// concurrency. A single bad relayer therefore never keeps receiving and
/// re-failing the same jobs.
#[derive(Debug)]
pub struct RetryCoordinator {
    storage: RelayerStorage,
    queue: JobQueue,
    runners: Vec<JobRunner>,
    config: DispatchConfig,
    metrics: Arc<DispatchMetrics>,
}

impl RetryCoordinator {
    /// Creates a coordinator over the batch's job runners.
    pub fn new(
        storage: RelayerStorage,
        queue: JobQueue,
        runners: Vec<JobRunner>,
        config: DispatchConfig,
        metrics: Arc<DispatchMetrics>,
    ) -> Self {
        Self { storage, queue, runners, config, metrics }
    }

    /// Runs retry cycles until no qualifying jobs remain or the cycle
    /// budget is exhausted.
    ///
    /// Returns the number of jobs still unresolved; those stay failed for
    /// operator attention.
    #[instrument(skip(self))]
    pub async fn run(&self, batch_id: BatchId) -> Result<u64, RelayerError> {
        if self.runners.is_empty() {
            return Ok(self.storage.retryable_jobs(batch_id, self.config.retry_ceiling).await?.len()
                as u64);
        }

        for cycle in 1..=self.config.retry_cycles {
            let jobs =
                self.storage.retryable_jobs(batch_id, self.config.retry_ceiling).await?;
            if jobs.is_empty() {
                info!(cycle, "no retryable jobs left");
                return Ok(0);
            }

            info!(cycle, jobs = jobs.len(), "starting retry cycle");
            self.metrics.retry_cycles.increment(1);

            // Fresh shuffle each cycle so job-to-relayer assignment rotates.
            let mut runners: Vec<&JobRunner> = self.runners.iter().collect();
            runners.shuffle(&mut rand::rng());

            stream::iter(jobs.into_iter().enumerate())
                .for_each_concurrent(self.config.cycle_concurrency, |(i, job)| {
                    let runner = runners[i % runners.len()];
                    async move {
                        // The claim bumps the retry count; a row someone
                        // else resolved in the meantime is skipped.
                        match self.queue.claim_for_retry(job.id, runner.wallet()).await {
                            Ok(Some(job)) => runner.run_job(&job).await,
                            Ok(None) => {}
                            Err(err) => warn!(job_id = job.id, %err, "retry claim failed"),
                        }
                    }
                })
                .await;

            if cycle < self.config.retry_cycles {
                let backoff = cycle_backoff(
                    self.config.retry_base_backoff,
                    self.config.retry_max_backoff,
                    cycle,
                );
                sleep(backoff).await;
            }
        }

        let remaining =
            self.storage.retryable_jobs(batch_id, self.config.retry_ceiling).await?.len() as u64;
        if remaining > 0 {
            warn!(remaining, "retry budget exhausted with jobs unresolved");
        }
        Ok(remaining)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let base = Duration::from_secs(2);
        let cap = Duration::from_secs(60);

        assert_eq!(cycle_backoff(base, cap, 1), Duration::from_secs(2));
        assert_eq!(cycle_backoff(base, cap, 2), Duration::from_secs(4));
        assert_eq!(cycle_backoff(base, cap, 3), Duration::from_secs(8));
        assert_eq!(cycle_backoff(base, cap, 5), Duration::from_secs(32));
        assert_eq!(cycle_backoff(base, cap, 6), Duration::from_secs(60));
        assert_eq!(cycle_backoff(base, cap, 20), Duration::from_secs(60));
    }
}
