//! Funding error types.

use alloy::primitives::U256;
use thiserror::Error;

/// Errors returned by the gas funding controller.
#[derive(Debug, Error)]
pub enum FundingError {
    /// The faucet cannot cover even the raw, unbuffered batch requirement.
    ///
    /// Buffered shortfalls are clamped instead; this fires only when the
    /// minimum viable distribution is unaffordable, before any relayer
    /// receives funds.
    #[error(
        "faucet balance cannot cover batch {batch_id}: required {required} wei, \
         affordable {affordable} wei after {reserve} wei reserve"
    )]
    InsufficientFaucetBalance {
        /// Batch that could not be funded.
        batch_id: i64,
        /// Raw, unbuffered batch requirement.
        required: U256,
        /// What the faucet can actually distribute.
        affordable: U256,
        /// Reserve withheld for the funding transaction's own gas.
        reserve: U256,
    },
    /// A batch has no relayer wallets to fund.
    #[error("no relayer wallets provisioned for batch {0}")]
    NoRelayers(i64),
    /// The funding transaction itself failed on-chain.
    #[error("funding transaction {tx_hash} failed")]
    FundingTxFailed {
        /// Hash of the failed distribution transaction.
        tx_hash: alloy::primitives::B256,
    },
    /// Residual sweeping was requested while jobs are still open.
    #[error("batch {batch_id} still has {open_jobs} non-terminal jobs")]
    BatchStillActive {
        /// The batch being swept.
        batch_id: i64,
        /// Number of jobs not yet in a terminal state.
        open_jobs: u64,
    },
}
