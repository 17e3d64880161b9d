//! Relayer and faucet wallet rows.

use super::BatchId;
use alloy::primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Lifecycle of an ephemeral relayer wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletStatus {
    /// Funded and available for dispatch.
    Active,
    /// Swept and retired. Never reused.
    Drained,
}

impl WalletStatus {
    /// Canonical storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Drained => "drained",
        }
    }
}

impl fmt::Display for WalletStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WalletStatus {
    type Err = eyre::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "drained" => Ok(Self::Drained),
            other => Err(eyre::eyre!("unknown wallet status {other:?}")),
        }
    }
}

/// An ephemeral wallet that signs and submits jobs for exactly one batch.
///
/// Key material never touches this row; it lives in the key store, addressed
/// by the wallet address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayerWallet {
    /// Wallet address.
    pub address: Address,
    /// The batch this wallet belongs to.
    pub batch_id: BatchId,
    /// Current lifecycle state.
    pub status: WalletStatus,
    /// Last observed native balance.
    pub last_balance: U256,
    /// Cumulative gas spent by this wallet, in wei.
    pub gas_spent: U256,
}

impl RelayerWallet {
    /// Creates a fresh active wallet for a batch.
    pub fn new(address: Address, batch_id: BatchId) -> Self {
        Self {
            address,
            batch_id,
            status: WalletStatus::Active,
            last_balance: U256::ZERO,
            gas_spent: U256::ZERO,
        }
    }
}

/// Long-lived funding source for one funder identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaucetWallet {
    /// Faucet address.
    pub address: Address,
    /// Funder identity this faucet bankrolls.
    pub funder: Address,
}
