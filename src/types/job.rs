//! Job (batch transaction) row and its state machine.

use super::{BatchId, JobId};
use alloy::primitives::{Address, B256, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Lifecycle of a single payout job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting in the queue.
    Pending,
    /// Exclusively owned by a worker.
    Claimed,
    /// Submitted, but the confirmation wait timed out.
    WaitingConfirmation,
    /// Confirmed on-chain.
    Completed,
    /// Reverted, preflight-rejected, or errored.
    Failed,
}

impl JobStatus {
    /// Whether the status is terminal for dispatch purposes.
    ///
    /// Note that [`JobStatus::Failed`] jobs may still be picked up by retry
    /// cycles while under the retry ceiling.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether a retry cycle may reassign a job in this state.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Pending | Self::WaitingConfirmation | Self::Failed)
    }

    /// Whether a stale claim in this state may be reclaimed after the lease
    /// expires.
    pub fn is_reclaimable(&self) -> bool {
        matches!(self, Self::Claimed | Self::WaitingConfirmation)
    }

    /// Whether a transition from `self` to `next` is legal.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match (self, next) {
            (Self::Pending, Self::Claimed) => true,
            (Self::Claimed, Self::WaitingConfirmation | Self::Completed | Self::Failed) => true,
            // Stale-claim reclaim and retry reassignment are themselves claims.
            (Self::Claimed | Self::WaitingConfirmation | Self::Failed, Self::Claimed) => true,
            // A timed-out submission may later be reconciled either way.
            (Self::WaitingConfirmation, Self::Completed | Self::Failed) => true,
            _ => false,
        }
    }

    /// Canonical storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Claimed => "claimed",
            Self::WaitingConfirmation => "waiting_confirmation",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = eyre::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "claimed" => Ok(Self::Claimed),
            "waiting_confirmation" => Ok(Self::WaitingConfirmation),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(eyre::eyre!("unknown job status {other:?}")),
        }
    }
}

/// One payout: a row in the batch queue and a leaf in the batch tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchJob {
    /// Row id. Claim order follows ascending ids.
    pub id: JobId,
    /// Owning batch.
    pub batch_id: BatchId,
    /// Payout recipient.
    pub recipient: Address,
    /// Payout amount in the token's smallest unit.
    pub amount: U256,
    /// Current lifecycle state.
    pub status: JobStatus,
    /// Relayer wallet that currently owns or last touched the job.
    pub relayer: Option<Address>,
    /// Number of retry reassignments so far.
    pub retry_count: u32,
    /// Hash of the submitted transaction, if any.
    pub tx_hash: Option<B256>,
    /// Last row touch; doubles as the claim lease timestamp.
    pub updated_at: DateTime<Utc>,
}

impl BatchJob {
    /// Creates a new pending job.
    pub fn new(id: JobId, batch_id: BatchId, recipient: Address, amount: U256) -> Self {
        Self {
            id,
            batch_id,
            recipient,
            amount,
            status: JobStatus::Pending,
            relayer: None,
            retry_count: 0,
            tx_hash: None,
            updated_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_transitions() {
        use JobStatus::*;

        assert!(Pending.can_transition_to(Claimed));
        assert!(Claimed.can_transition_to(WaitingConfirmation));
        assert!(Claimed.can_transition_to(Completed));
        assert!(Claimed.can_transition_to(Failed));
        // Reclaims and retries.
        assert!(Claimed.can_transition_to(Claimed));
        assert!(WaitingConfirmation.can_transition_to(Claimed));
        assert!(Failed.can_transition_to(Claimed));
        // Reconciliation of a timed-out submission.
        assert!(WaitingConfirmation.can_transition_to(Completed));
    }

    #[test]
    fn completed_is_final() {
        use JobStatus::*;

        for next in [Pending, Claimed, WaitingConfirmation, Completed, Failed] {
            assert!(!Completed.can_transition_to(next), "completed -> {next} must be rejected");
        }
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Pending.can_transition_to(Failed));
    }

    #[test]
    fn retry_eligibility() {
        assert!(JobStatus::Failed.is_retryable());
        assert!(JobStatus::WaitingConfirmation.is_retryable());
        assert!(JobStatus::Pending.is_retryable());
        assert!(!JobStatus::Completed.is_retryable());
        assert!(!JobStatus::Claimed.is_retryable());
    }
}
