//! Key store error types.

use alloy::primitives::Address;
use thiserror::Error;

/// Errors returned by the secret-store collaborator.
#[derive(Debug, Error)]
pub enum KeyStoreError {
    /// No key material stored for the address.
    #[error("no key stored for {0}")]
    Missing(Address),
    /// The stored key material could not be parsed.
    #[error("malformed key for {address}: {reason}")]
    Malformed {
        /// The address whose key is malformed.
        address: Address,
        /// Why parsing failed.
        reason: String,
    },
    /// The vault rejected the request.
    #[error("vault returned {status} for {address}")]
    Rejected {
        /// HTTP status returned by the vault.
        status: u16,
        /// The address being accessed.
        address: Address,
    },
    /// Transport error talking to the vault.
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
}
