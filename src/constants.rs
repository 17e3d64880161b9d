//! Relayer constants.

use std::time::Duration;

/// Percentage buffer added on top of the sampled per-job gas estimate when
/// budgeting a whole batch.
pub const DEFAULT_GAS_BUFFER_PCT: u64 = 60;

/// Fixed cushion, in wei, added to every batch funding budget on top of the
/// buffered estimate.
pub const DEFAULT_GAS_CUSHION: u128 = 1_000_000_000_000_000; // 0.001 native

/// Multiplier applied to the funding transaction's own estimated gas cost to
/// derive the faucet reserve.
pub const DEFAULT_FUNDING_SAFETY_MULTIPLIER: u64 = 2;

/// The faucet reserve never goes below this, in wei.
pub const MIN_FAUCET_RESERVE: u128 = 1_000_000_000_000_000; // 0.001 native

/// Residuals below this are recorded as dust instead of swept, in wei.
pub const DUST_BUFFER: u128 = 10_000_000_000_000; // 0.00001 native

/// Fallback per-job gas when a dry-run estimate is unavailable.
pub const DEFAULT_EXECUTION_GAS: u64 = 180_000;

/// Number of pending jobs sampled when estimating batch cost.
pub const GAS_ESTIMATE_SAMPLE_SIZE: usize = 3;

/// Percentage multiplier applied to per-job gas estimates before submission.
pub const EXECUTION_GAS_MULTIPLIER_PCT: u64 = 120;

/// Gas limit of a plain native transfer.
pub const TRANSFER_GAS_LIMIT: u64 = 21_000;

/// Relayer wallets provisioned per batch unless configured otherwise.
pub const DEFAULT_WORKER_COUNT: usize = 10;

/// Maximum retries a single job is eligible for.
pub const DEFAULT_RETRY_CEILING: u32 = 3;

/// Maximum retry cycles after the initial dispatch pass.
pub const DEFAULT_RETRY_CYCLES: u32 = 5;

/// Backoff between retry cycles starts here and doubles each cycle.
pub const DEFAULT_RETRY_BASE_BACKOFF: Duration = Duration::from_secs(2);

/// Backoff between retry cycles never exceeds this.
pub const DEFAULT_RETRY_MAX_BACKOFF: Duration = Duration::from_secs(60);

/// In-flight job limit per retry cycle.
pub const DEFAULT_CYCLE_CONCURRENCY: usize = 50;

/// In-flight wallet limit while sweeping residuals.
pub const DEFAULT_SWEEP_CONCURRENCY: usize = 20;

/// A claimed job whose row has not been touched for this long may be
/// reclaimed by another worker.
pub const DEFAULT_CLAIM_LEASE: Duration = Duration::from_secs(120);

/// Hard cap on a single confirmation wait.
pub const DEFAULT_CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(300);

/// Fixed delay between worker loop iterations.
pub const DEFAULT_WORKER_THROTTLE: Duration = Duration::from_millis(200);

/// Maximum self-transfer attempts when clearing a stuck nonce.
pub const NONCE_REPAIR_MAX_ATTEMPTS: u32 = 3;

/// Gas price multiplier for nonce-clearing self-transfers.
pub const NONCE_REPAIR_GAS_BOOST: u128 = 3;

/// Confirmation wait for nonce-clearing self-transfers.
pub const NONCE_REPAIR_TIMEOUT: Duration = Duration::from_secs(120);

/// Per-call RPC attempts before an error is propagated.
pub const DEFAULT_RPC_ATTEMPTS: u32 = 3;

/// Initial adaptive delay between RPC calls.
pub const DEFAULT_RPC_BASE_DELAY: Duration = Duration::from_millis(50);

/// Cap on the adaptive delay between RPC calls.
pub const DEFAULT_RPC_MAX_DELAY: Duration = Duration::from_secs(8);

/// Consecutive rate-limit errors before switching to the fallback endpoint.
pub const DEFAULT_FAILOVER_THRESHOLD: u32 = 5;

/// Consecutive successes before the adaptive delay is lowered a notch.
pub const DEFAULT_RPC_SUCCESS_STREAK: u32 = 10;
