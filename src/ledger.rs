//! The on-chain ledger seam.
//!
//! Everything the engine needs from the chain goes through the [`Ledger`]
//! trait: contract calls, the handful of plain chain reads, and raw value
//! transfers. The production implementation routes every call through
//! [`RpcFailover`]; tests substitute their own implementation.

use crate::{
    error::RelayerError,
    transport::RpcFailover,
    types::{
        BatchId, JobId, LeafDomain,
        contract::{BatchLedger, PaymentToken},
    },
};
use alloy::{
    consensus::TxLegacy,
    eips::Encodable2718,
    network::{Ethereum, EthereumWallet, NetworkWallet},
    primitives::{Address, B256, Bytes, U256},
    providers::{PendingTransactionConfig, Provider},
    rpc::types::{Filter, TransactionRequest},
    signers::local::PrivateKeySigner,
    sol_types::{SolCall, SolEvent},
    transports::TransportErrorKind,
};
use async_trait::async_trait;
use std::{fmt::Debug, sync::Arc, time::Duration};
use tracing::instrument;

/// One `executeTransaction` call, fully resolved.
#[derive(Debug, Clone)]
pub struct ExecuteRequest {
    /// The batch the leaf belongs to.
    pub batch_id: BatchId,
    /// The job backing the leaf.
    pub job_id: JobId,
    /// Funder whose tokens are paid out.
    pub funder: Address,
    /// Payout recipient.
    pub recipient: Address,
    /// Payout amount in the token's smallest unit.
    pub amount: U256,
    /// Inclusion proof for the leaf.
    pub proof: Vec<B256>,
}

/// A `setBatchRootWithSignature` call, fully resolved.
#[derive(Debug, Clone)]
pub struct RootRegistration {
    /// Funder the root is registered for.
    pub funder: Address,
    /// The batch being registered.
    pub batch_id: BatchId,
    /// Root of the batch tree.
    pub root: B256,
    /// Number of leaves under the root.
    pub total_txs: u64,
    /// Sum of all payout amounts.
    pub total_amount: U256,
    /// Authorization signature over the registration.
    pub signature: Bytes,
}

/// Outcome of a confirmed transaction.
#[derive(Debug, Clone, Copy)]
pub struct Confirmation {
    /// Hash of the confirmed transaction.
    pub tx_hash: B256,
    /// Whether execution succeeded.
    pub success: bool,
    /// Gas consumed.
    pub gas_used: u64,
    /// Price actually paid per gas unit.
    pub effective_gas_price: u128,
}

impl Confirmation {
    /// Total gas cost of the transaction, in wei.
    pub fn gas_cost(&self) -> U256 {
        U256::from(self.gas_used) * U256::from(self.effective_gas_price)
    }
}

/// Chain access used by the engine.
#[async_trait]
pub trait Ledger: Debug + Send + Sync {
    /// The chain and contract leaves are bound to.
    fn domain(&self) -> LeafDomain;

    /// Whether the contract has already executed this leaf.
    async fn is_leaf_processed(&self, leaf: B256) -> Result<bool, RelayerError>;

    /// Looks up the transaction that executed a leaf, from event logs.
    async fn find_execution(&self, leaf: B256) -> Result<Option<B256>, RelayerError>;

    /// The root registered for a funder's batch.
    async fn batch_root(&self, funder: Address, batch_id: BatchId) -> Result<B256, RelayerError>;

    /// Registers a batch root on behalf of a funder. Returns the tx hash.
    async fn register_batch_root(
        &self,
        signer: &PrivateKeySigner,
        registration: &RootRegistration,
    ) -> Result<B256, RelayerError>;

    /// Dry-runs an execution to estimate its gas.
    async fn estimate_execution(
        &self,
        from: Address,
        request: &ExecuteRequest,
    ) -> Result<u64, RelayerError>;

    /// Signs and submits an execution. Returns the tx hash.
    async fn execute(
        &self,
        signer: &PrivateKeySigner,
        request: &ExecuteRequest,
        gas_limit: u64,
    ) -> Result<B256, RelayerError>;

    /// Estimates the gas of one multi-recipient funding transaction.
    async fn estimate_distribution(
        &self,
        from: Address,
        recipients: &[Address],
        amount_each: U256,
    ) -> Result<u64, RelayerError>;

    /// Signs and submits one multi-recipient funding transaction. Returns
    /// the tx hash.
    async fn distribute(
        &self,
        signer: &PrivateKeySigner,
        recipients: &[Address],
        amount_each: U256,
        gas_limit: u64,
    ) -> Result<B256, RelayerError>;

    /// Signs and submits a plain native transfer, optionally pinning the
    /// gas price and nonce. Returns the tx hash.
    async fn send_native(
        &self,
        signer: &PrivateKeySigner,
        to: Address,
        value: U256,
        gas_price: Option<u128>,
        nonce: Option<u64>,
    ) -> Result<B256, RelayerError>;

    /// Waits for a transaction to confirm, bounded by `timeout`.
    ///
    /// `Ok(None)` means the wait timed out; the transaction may still land
    /// later, which is why callers re-check on-chain state before ever
    /// resubmitting.
    async fn wait_for_confirmation(
        &self,
        tx_hash: B256,
        timeout: Duration,
    ) -> Result<Option<Confirmation>, RelayerError>;

    /// The funder's token balance and the allowance granted to the ledger.
    async fn funder_capacity(&self, funder: Address) -> Result<(U256, U256), RelayerError>;

    /// Native balance of an address.
    async fn native_balance(&self, address: Address) -> Result<U256, RelayerError>;

    /// Confirmed ("latest") and pending transaction counts of an address.
    async fn nonce_counts(&self, address: Address) -> Result<(u64, u64), RelayerError>;

    /// Current gas price, in wei.
    async fn gas_price(&self) -> Result<u128, RelayerError>;
}

/// [`Ledger`] implementation over a real chain.
#[derive(Debug)]
pub struct OnchainLedger {
    rpc: Arc<RpcFailover>,
    contract: Address,
    token: Address,
    chain_id: u64,
}

impl OnchainLedger {
    /// Connects to the chain behind `rpc` and binds the ledger contract and
    /// payment token addresses.
    pub async fn new(
        rpc: Arc<RpcFailover>,
        contract: Address,
        token: Address,
    ) -> Result<Self, RelayerError> {
        let chain_id = rpc.call(|p| async move { p.get_chain_id().await }).await?;
        Ok(Self { rpc, contract, token, chain_id })
    }

    /// Runs a read-only contract call through the failover manager.
    async fn view<C>(&self, to: Address, call: C) -> Result<C::Return, RelayerError>
    where
        C: SolCall + Clone + Send + Sync,
        C::Return: Send,
    {
        let input: Bytes = call.abi_encode().into();
        let ret = self
            .rpc
            .call(|provider| {
                let input = input.clone();
                async move {
                    let request = TransactionRequest {
                        to: Some(to.into()),
                        input: input.into(),
                        ..Default::default()
                    };
                    let output = provider.call(request).await?;
                    C::abi_decode_returns(&output).map_err(TransportErrorKind::custom)
                }
            })
            .await?;

        Ok(ret)
    }

    /// Dry-runs a state-changing call to estimate its gas.
    async fn estimate<C>(&self, from: Address, to: Address, call: C) -> Result<u64, RelayerError>
    where
        C: SolCall + Clone + Send + Sync,
    {
        let input: Bytes = call.abi_encode().into();
        let gas = self
            .rpc
            .call(|provider| {
                let input = input.clone();
                async move {
                    let request = TransactionRequest {
                        from: Some(from),
                        to: Some(to.into()),
                        input: input.into(),
                        ..Default::default()
                    };
                    provider.estimate_gas(request).await
                }
            })
            .await?;

        Ok(gas)
    }

    /// Signs a legacy transaction and broadcasts it through the failover
    /// manager.
    #[allow(clippy::too_many_arguments)]
    async fn send_signed(
        &self,
        signer: &PrivateKeySigner,
        to: Address,
        input: Bytes,
        value: U256,
        gas_limit: u64,
        gas_price: Option<u128>,
        nonce: Option<u64>,
    ) -> Result<B256, RelayerError> {
        let from = signer.address();
        let gas_price = match gas_price {
            Some(price) => price,
            None => self.gas_price().await?,
        };
        let nonce = match nonce {
            Some(nonce) => nonce,
            None => {
                self.rpc
                    .call(|p| async move { p.get_transaction_count(from).pending().await })
                    .await?
            }
        };

        let tx = TxLegacy {
            chain_id: Some(self.chain_id),
            nonce,
            gas_price,
            gas_limit,
            to: to.into(),
            value,
            input,
        };

        let wallet = EthereumWallet::from(signer.clone());
        let envelope =
            NetworkWallet::<Ethereum>::sign_transaction_from(&wallet, from, tx.into()).await?;
        let encoded = envelope.encoded_2718();

        let hash = self
            .rpc
            .call(|provider| {
                let encoded = encoded.clone();
                async move {
                    provider
                        .send_raw_transaction(&encoded)
                        .await
                        .map(|pending| *pending.tx_hash())
                }
            })
            .await?;

        Ok(hash)
    }
}

#[async_trait]
impl Ledger for OnchainLedger {
    fn domain(&self) -> LeafDomain {
        LeafDomain { chain_id: self.chain_id, contract: self.contract }
    }

    async fn is_leaf_processed(&self, leaf: B256) -> Result<bool, RelayerError> {
        self.view(self.contract, BatchLedger::processedLeavesCall { leaf }).await
    }

    async fn find_execution(&self, leaf: B256) -> Result<Option<B256>, RelayerError> {
        let contract = self.contract;
        let logs = self
            .rpc
            .call(|provider| async move {
                let filter = Filter::new()
                    .address(contract)
                    .event_signature(BatchLedger::TransactionExecuted::SIGNATURE_HASH)
                    .topic3(leaf);
                provider.get_logs(&filter).await
            })
            .await?;

        Ok(logs.iter().find_map(|log| log.transaction_hash))
    }

    async fn batch_root(&self, funder: Address, batch_id: BatchId) -> Result<B256, RelayerError> {
        self.view(
            self.contract,
            BatchLedger::batchRootsCall { funder, batchId: U256::from(batch_id as u64) },
        )
        .await
    }

    #[instrument(skip_all, fields(batch_id = registration.batch_id, root = %registration.root))]
    async fn register_batch_root(
        &self,
        signer: &PrivateKeySigner,
        registration: &RootRegistration,
    ) -> Result<B256, RelayerError> {
        let call = BatchLedger::setBatchRootWithSignatureCall {
            funder: registration.funder,
            batchId: U256::from(registration.batch_id as u64),
            root: registration.root,
            totalTxs: U256::from(registration.total_txs),
            totalAmount: registration.total_amount,
            signature: registration.signature.clone(),
        };
        let gas = self.estimate(signer.address(), self.contract, call.clone()).await?;

        self.send_signed(
            signer,
            self.contract,
            call.abi_encode().into(),
            U256::ZERO,
            gas * 12 / 10,
            None,
            None,
        )
        .await
    }

    async fn estimate_execution(
        &self,
        from: Address,
        request: &ExecuteRequest,
    ) -> Result<u64, RelayerError> {
        self.estimate(from, self.contract, execute_call(request)).await
    }

    async fn execute(
        &self,
        signer: &PrivateKeySigner,
        request: &ExecuteRequest,
        gas_limit: u64,
    ) -> Result<B256, RelayerError> {
        self.send_signed(
            signer,
            self.contract,
            execute_call(request).abi_encode().into(),
            U256::ZERO,
            gas_limit,
            None,
            None,
        )
        .await
    }

    async fn estimate_distribution(
        &self,
        from: Address,
        recipients: &[Address],
        amount_each: U256,
    ) -> Result<u64, RelayerError> {
        let call = BatchLedger::distributeMaticCall {
            recipients: recipients.to_vec(),
            amountEach: amount_each,
        };

        // Value-bearing estimate, so the contract sees the real distribution.
        let input: Bytes = call.abi_encode().into();
        let value = amount_each * U256::from(recipients.len());
        let to = self.contract;
        let gas = self
            .rpc
            .call(|provider| {
                let input = input.clone();
                async move {
                    let request = TransactionRequest {
                        from: Some(from),
                        to: Some(to.into()),
                        input: input.into(),
                        value: Some(value),
                        ..Default::default()
                    };
                    provider.estimate_gas(request).await
                }
            })
            .await?;

        Ok(gas)
    }

    #[instrument(skip_all, fields(recipients = recipients.len(), %amount_each))]
    async fn distribute(
        &self,
        signer: &PrivateKeySigner,
        recipients: &[Address],
        amount_each: U256,
        gas_limit: u64,
    ) -> Result<B256, RelayerError> {
        let call = BatchLedger::distributeMaticCall {
            recipients: recipients.to_vec(),
            amountEach: amount_each,
        };
        let value = amount_each * U256::from(recipients.len());

        self.send_signed(
            signer,
            self.contract,
            call.abi_encode().into(),
            value,
            gas_limit,
            None,
            None,
        )
        .await
    }

    async fn send_native(
        &self,
        signer: &PrivateKeySigner,
        to: Address,
        value: U256,
        gas_price: Option<u128>,
        nonce: Option<u64>,
    ) -> Result<B256, RelayerError> {
        self.send_signed(
            signer,
            to,
            Bytes::new(),
            value,
            crate::constants::TRANSFER_GAS_LIMIT,
            gas_price,
            nonce,
        )
        .await
    }

    async fn wait_for_confirmation(
        &self,
        tx_hash: B256,
        timeout: Duration,
    ) -> Result<Option<Confirmation>, RelayerError> {
        let provider = self.rpc.active();
        let pending = provider
            .watch_pending_transaction(
                PendingTransactionConfig::new(tx_hash).with_timeout(Some(timeout)),
            )
            .await
            .map_err(|err| RelayerError::Internal(eyre::Report::new(err)))?;

        if pending.await.is_err() {
            // Timed out or dropped; the caller decides how to reconcile.
            return Ok(None);
        }

        let receipt = self
            .rpc
            .call(|p| async move { p.get_transaction_receipt(tx_hash).await })
            .await?;

        Ok(receipt.map(|receipt| Confirmation {
            tx_hash,
            success: receipt.status(),
            gas_used: receipt.gas_used,
            effective_gas_price: receipt.effective_gas_price,
        }))
    }

    async fn funder_capacity(&self, funder: Address) -> Result<(U256, U256), RelayerError> {
        let balance =
            self.view(self.token, PaymentToken::balanceOfCall { owner: funder }).await?;
        let allowance = self
            .view(
                self.token,
                PaymentToken::allowanceCall { owner: funder, spender: self.contract },
            )
            .await?;

        Ok((balance, allowance))
    }

    async fn native_balance(&self, address: Address) -> Result<U256, RelayerError> {
        Ok(self.rpc.call(|p| async move { p.get_balance(address).await }).await?)
    }

    async fn nonce_counts(&self, address: Address) -> Result<(u64, u64), RelayerError> {
        let confirmed = self
            .rpc
            .call(|p| async move { p.get_transaction_count(address).latest().await })
            .await?;
        let pending = self
            .rpc
            .call(|p| async move { p.get_transaction_count(address).pending().await })
            .await?;

        Ok((confirmed, pending))
    }

    async fn gas_price(&self) -> Result<u128, RelayerError> {
        Ok(self.rpc.call(|p| async move { p.get_gas_price().await }).await?)
    }
}

fn execute_call(request: &ExecuteRequest) -> BatchLedger::executeTransactionCall {
    BatchLedger::executeTransactionCall {
        batchId: U256::from(request.batch_id as u64),
        txId: U256::from(request.job_id as u64),
        funder: request.funder,
        recipient: request.recipient,
        amount: request.amount,
        proof: request.proof.clone(),
    }
}
