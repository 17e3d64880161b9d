//! Core domain types of the batch relayer engine.

mod batch;
pub use batch::{Batch, BatchStatus};

mod job;
pub use job::{BatchJob, JobStatus};

mod wallet;
pub use wallet::{FaucetWallet, RelayerWallet, WalletStatus};

pub mod merkle;
pub use merkle::{BatchMerkleTree, LeafDomain, MerkleError, MerkleNode, payment_leaf};

pub mod contract;

/// Identifier of a batch row.
pub type BatchId = i64;

/// Identifier of a batch transaction (job) row.
pub type JobId = i64;
