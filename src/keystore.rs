//! Secret-store collaborator holding wallet key material.
//!
//! The engine never persists private keys itself; relayer and faucet keys
//! live behind this interface, addressed by lowercase hex address.

use crate::error::KeyStoreError;
use alloy::{hex, primitives::Address, signers::local::PrivateKeySigner};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use url::Url;

/// Type alias for `Result<T, KeyStoreError>`.
pub type Result<T> = core::result::Result<T, KeyStoreError>;

/// Opaque secret store addressed by wallet address.
#[async_trait]
pub trait KeyStore: Debug + Send + Sync {
    /// Loads the signer stored for `address`.
    async fn get_key(&self, address: Address) -> Result<PrivateKeySigner>;

    /// Stores the signer for `address`.
    async fn set_key(&self, address: Address, key: &PrivateKeySigner) -> Result<()>;
}

/// Wire format of a vault key record.
#[derive(Debug, Serialize, Deserialize)]
struct KeyRecord {
    private_key: String,
}

/// Key store backed by an HTTP vault service.
#[derive(Debug, Clone)]
pub struct HttpKeyStore {
    client: reqwest::Client,
    base: Url,
}

impl HttpKeyStore {
    /// Creates a client for the vault at `base`.
    pub fn new(base: Url) -> Self {
        Self { client: reqwest::Client::new(), base }
    }

    fn key_url(&self, address: Address) -> Result<Url> {
        // Vault paths are lowercase hex.
        self.base
            .join(&format!("keys/{address:#x}"))
            .map_err(|err| KeyStoreError::Malformed { address, reason: err.to_string() })
    }
}

#[async_trait]
impl KeyStore for HttpKeyStore {
    async fn get_key(&self, address: Address) -> Result<PrivateKeySigner> {
        let response = self.client.get(self.key_url(address)?).send().await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(KeyStoreError::Missing(address));
        }
        if !response.status().is_success() {
            return Err(KeyStoreError::Rejected { status: response.status().as_u16(), address });
        }

        let record: KeyRecord = response.json().await?;
        record
            .private_key
            .parse::<PrivateKeySigner>()
            .map_err(|err| KeyStoreError::Malformed { address, reason: err.to_string() })
    }

    async fn set_key(&self, address: Address, key: &PrivateKeySigner) -> Result<()> {
        let record =
            KeyRecord { private_key: format!("0x{}", hex::encode(key.to_bytes())) };
        let response =
            self.client.post(self.key_url(address)?).json(&record).send().await?;

        if !response.status().is_success() {
            return Err(KeyStoreError::Rejected { status: response.status().as_u16(), address });
        }
        Ok(())
    }
}

/// [`KeyStore`] implementation in-memory. Used for testing.
#[derive(Debug, Default)]
pub struct InMemoryKeyStore {
    keys: DashMap<Address, PrivateKeySigner>,
}

#[async_trait]
impl KeyStore for InMemoryKeyStore {
    async fn get_key(&self, address: Address) -> Result<PrivateKeySigner> {
        self.keys
            .get(&address)
            .map(|key| key.clone())
            .ok_or(KeyStoreError::Missing(address))
    }

    async fn set_key(&self, address: Address, key: &PrivateKeySigner) -> Result<()> {
        self.keys.insert(address, key.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_roundtrip() {
        let store = InMemoryKeyStore::default();
        let signer = PrivateKeySigner::random();
        let address = signer.address();

        store.set_key(address, &signer).await.unwrap();
        let loaded = store.get_key(address).await.unwrap();
        assert_eq!(loaded.address(), address);

        let missing = Address::repeat_byte(9);
        assert!(matches!(
            store.get_key(missing).await,
            Err(KeyStoreError::Missing(addr)) if addr == missing
        ));
    }
}
