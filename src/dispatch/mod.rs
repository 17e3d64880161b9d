//! Parallel job dispatch: one worker per relayer wallet, plus the retry
//! coordinator that cleans up stragglers after the initial pass.

use crate::constants::{
    DEFAULT_CLAIM_LEASE, DEFAULT_CONFIRMATION_TIMEOUT, DEFAULT_CYCLE_CONCURRENCY,
    DEFAULT_RETRY_BASE_BACKOFF, DEFAULT_RETRY_CEILING, DEFAULT_RETRY_CYCLES,
    DEFAULT_RETRY_MAX_BACKOFF, DEFAULT_WORKER_THROTTLE, EXECUTION_GAS_MULTIPLIER_PCT,
};
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::error;

mod worker;
pub use worker::{JobOutcome, JobRunner, Worker};

mod retry;
pub use retry::RetryCoordinator;

/// Tuning knobs for workers and retry cycles.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// How long a claim may sit untouched before it can be reclaimed.
    pub claim_lease: Duration,
    /// Hard cap on a single confirmation wait.
    pub confirmation_timeout: Duration,
    /// Fixed delay between worker loop iterations.
    pub throttle: Duration,
    /// Percentage multiplier on per-job gas estimates.
    pub gas_multiplier_pct: u64,
    /// Maximum retries a single job is eligible for.
    pub retry_ceiling: u32,
    /// Maximum retry cycles after the initial pass.
    pub retry_cycles: u32,
    /// Backoff before the second retry cycle; doubles each cycle.
    pub retry_base_backoff: Duration,
    /// Cap on the backoff between cycles.
    pub retry_max_backoff: Duration,
    /// In-flight job limit per retry cycle.
    pub cycle_concurrency: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            claim_lease: DEFAULT_CLAIM_LEASE,
            confirmation_timeout: DEFAULT_CONFIRMATION_TIMEOUT,
            throttle: DEFAULT_WORKER_THROTTLE,
            gas_multiplier_pct: EXECUTION_GAS_MULTIPLIER_PCT,
            retry_ceiling: DEFAULT_RETRY_CEILING,
            retry_cycles: DEFAULT_RETRY_CYCLES,
            retry_base_backoff: DEFAULT_RETRY_BASE_BACKOFF,
            retry_max_backoff: DEFAULT_RETRY_MAX_BACKOFF,
            cycle_concurrency: DEFAULT_CYCLE_CONCURRENCY,
        }
    }
}

/// Runs one worker task per relayer wallet until the queue is drained.
#[derive(Debug)]
pub struct WorkerPool {
    workers: Vec<Worker>,
}

impl WorkerPool {
    /// Creates a pool over the given workers.
    pub fn new(workers: Vec<Worker>) -> Self {
        Self { workers }
    }

    /// Spawns every worker and waits for all of them to exit.
    ///
    /// Workers never propagate job errors, so the pool only ever fails on
    /// task-level panics, which are logged and swallowed to keep sibling
    /// workers draining.
    pub async fn run(self) {
        let mut tasks = JoinSet::new();
        for worker in self.workers {
            tasks.spawn(worker.run());
        }

        while let Some(result) = tasks.join_next().await {
            if let Err(err) = result {
                error!(%err, "worker task failed");
            }
        }
    }
}
