//! Relayer error types.

use alloy::primitives::{Address, B256, U256};
use thiserror::Error;

mod storage;
pub use storage::StorageError;

mod funding;
pub use funding::FundingError;

mod keys;
pub use keys::KeyStoreError;

/// The overarching error type of the batch relayer engine.
#[derive(Debug, Error)]
pub enum RelayerError {
    /// Errors related to storage.
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// Errors related to funding and sweeping.
    #[error(transparent)]
    Funding(#[from] FundingError),
    /// Errors related to Merkle trees and proofs.
    #[error(transparent)]
    Merkle(#[from] crate::types::MerkleError),
    /// The on-chain batch root does not match the locally built tree.
    ///
    /// Every proof in the batch would be rejected by the contract, so the
    /// batch is halted instead of submitting doomed transactions.
    #[error("on-chain root {onchain} does not match local root {local} for batch {batch_id}")]
    RootMismatch {
        /// Batch whose root diverged.
        batch_id: i64,
        /// Root registered on-chain.
        onchain: B256,
        /// Root derived from the local node table.
        local: B256,
    },
    /// A wallet still has a nonce gap after the bounded repair attempts.
    #[error("nonce repair exhausted for {wallet}: pending {pending} > confirmed {confirmed}")]
    NonceRepairExhausted {
        /// The wallet that could not be repaired.
        wallet: Address,
        /// Network-visible pending transaction count.
        pending: u64,
        /// Confirmed transaction count.
        confirmed: u64,
    },
    /// The funder's token balance or allowance cannot cover a job.
    #[error(
        "funder {funder} cannot cover {required}: balance {balance}, allowance {allowance}"
    )]
    InsufficientFunderCapacity {
        /// The funder address.
        funder: Address,
        /// Amount the job needs.
        required: U256,
        /// Funder token balance.
        balance: U256,
        /// Allowance granted to the ledger contract.
        allowance: U256,
    },
    /// A confirmation wait hit its hard timeout.
    #[error("confirmation timed out for {0}")]
    ConfirmationTimeout(B256),
    /// The submitted transaction reverted on-chain.
    #[error("transaction {0} reverted")]
    Reverted(B256),
    /// A batch is in the wrong state for the requested operation.
    #[error("batch {batch_id} is {actual}, expected {expected}")]
    BadBatchState {
        /// The batch in question.
        batch_id: i64,
        /// State the batch is actually in.
        actual: crate::types::BatchStatus,
        /// State the operation requires.
        expected: crate::types::BatchStatus,
    },
    /// The referenced batch does not exist.
    #[error("unknown batch {0}")]
    UnknownBatch(i64),
    /// Error while talking to the secret store.
    #[error(transparent)]
    KeyStore(#[from] KeyStoreError),
    /// Error occurred while signing.
    #[error(transparent)]
    Sign(#[from] alloy::signers::Error),
    /// Terminal RPC error, already past failover and retries.
    #[error(transparent)]
    Rpc(#[from] alloy::transports::RpcError<alloy::transports::TransportErrorKind>),
    /// An internal error occurred.
    #[error(transparent)]
    Internal(#[from] eyre::Error),
}

impl RelayerError {
    /// Whether the error is fatal to the whole batch rather than a single job.
    pub fn is_batch_fatal(&self) -> bool {
        matches!(
            self,
            Self::RootMismatch { .. }
                | Self::BadBatchState { .. }
                | Self::UnknownBatch(_)
                | Self::Funding(_)
        )
    }
}
