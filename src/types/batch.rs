//! Batch row and its state machine.

use super::BatchId;
use alloy::primitives::{Address, B256, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Lifecycle of a batch.
///
/// The status only ever advances forward; the storage layer rejects any
/// other write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// Wallets are being provisioned and the tree has not been registered.
    Preparing,
    /// Funded and registered, ready for dispatch.
    Ready,
    /// Workers are draining the queue.
    Sent,
    /// All jobs reached a terminal state and residuals were swept.
    Completed,
    /// The batch was halted by a fatal error.
    Failed,
}

impl BatchStatus {
    /// Whether the status is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether a transition from `self` to `next` is legal.
    pub fn can_transition_to(&self, next: BatchStatus) -> bool {
        match (self, next) {
            (Self::Preparing, Self::Ready) => true,
            (Self::Ready, Self::Sent) => true,
            (Self::Sent, Self::Completed) => true,
            // Any non-terminal state may fail.
            (Self::Preparing | Self::Ready | Self::Sent, Self::Failed) => true,
            _ => false,
        }
    }

    /// Canonical storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Preparing => "preparing",
            Self::Ready => "ready",
            Self::Sent => "sent",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BatchStatus {
    type Err = eyre::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "preparing" => Ok(Self::Preparing),
            "ready" => Ok(Self::Ready),
            "sent" => Ok(Self::Sent),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(eyre::eyre!("unknown batch status {other:?}")),
        }
    }
}

/// A payout batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    /// Row id.
    pub id: BatchId,
    /// Funder identity bankrolling the batch.
    pub funder: Address,
    /// Total number of jobs in the batch.
    pub total_transactions: u64,
    /// Root of the batch's Merkle tree, set once the tree is built.
    pub merkle_root: Option<B256>,
    /// Current lifecycle state.
    pub status: BatchStatus,
    /// Native amount distributed to relayer wallets.
    pub funding_amount: U256,
    /// Native amount swept back to the faucet.
    pub refund_amount: U256,
    /// When dispatch started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the batch reached a terminal state.
    pub ended_at: Option<DateTime<Utc>>,
}

impl Batch {
    /// Creates a new batch in [`BatchStatus::Preparing`].
    pub fn new(id: BatchId, funder: Address, total_transactions: u64) -> Self {
        Self {
            id,
            funder,
            total_transactions,
            merkle_root: None,
            status: BatchStatus::Preparing,
            funding_amount: U256::ZERO,
            refund_amount: U256::ZERO,
            started_at: None,
            ended_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_only_transitions() {
        use BatchStatus::*;

        assert!(Preparing.can_transition_to(Ready));
        assert!(Ready.can_transition_to(Sent));
        assert!(Sent.can_transition_to(Completed));
        assert!(Sent.can_transition_to(Failed));

        // Never backwards, never out of a terminal state.
        assert!(!Ready.can_transition_to(Preparing));
        assert!(!Sent.can_transition_to(Ready));
        assert!(!Completed.can_transition_to(Sent));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Preparing));
        // No skipping straight to completion.
        assert!(!Preparing.can_transition_to(Completed));
        assert!(!Ready.can_transition_to(Completed));
    }

    #[test]
    fn status_roundtrip() {
        for status in [
            BatchStatus::Preparing,
            BatchStatus::Ready,
            BatchStatus::Sent,
            BatchStatus::Completed,
            BatchStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<BatchStatus>().unwrap(), status);
        }
    }
}
