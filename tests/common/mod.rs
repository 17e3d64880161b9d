//! Shared fixtures: a scriptable in-memory ledger and batch builders.

use alloy::{
    primitives::{Address, B256, U256},
    signers::local::PrivateKeySigner,
};
use async_trait::async_trait;
use batch_relayer::{
    error::RelayerError,
    keystore::{InMemoryKeyStore, KeyStore},
    ledger::{Confirmation, ExecuteRequest, Ledger, RootRegistration},
    storage::{RelayerStorage, StorageApi},
    types::{Batch, BatchId, BatchJob, BatchMerkleTree, FaucetWallet, LeafDomain, payment_leaf},
};
use dashmap::DashMap;
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicU32, AtomicU64, Ordering},
};
use std::time::Duration;

pub const GAS_PRICE: u128 = 30_000_000_000; // 30 gwei
pub const EXECUTION_GAS: u64 = 100_000;
pub const DISTRIBUTION_GAS: u64 = 100_000;
pub const TRANSFER_GAS: u64 = 21_000;

/// A ledger that mimics the contract's behavior in memory: it verifies
/// proofs against the registered root, enforces the processed-leaves guard,
/// and moves native balances the way the chain would.
#[derive(Debug)]
pub struct MockLedger {
    domain: LeafDomain,
    /// Native balances by address.
    pub balances: DashMap<Address, U256>,
    /// Funder token balance backing payouts.
    pub token_balance: Mutex<U256>,
    /// Allowance the funder granted the contract.
    pub token_allowance: Mutex<U256>,
    /// Executed leaves and the transaction that landed them.
    pub processed: DashMap<B256, B256>,
    /// Registered batch roots.
    pub roots: DashMap<(Address, u64), B256>,
    /// Confirmed (latest, pending) transaction counts.
    pub nonce_counts: DashMap<Address, (u64, u64)>,
    /// Every submitted execution, in order.
    pub executions: Mutex<Vec<ExecuteRequest>>,
    /// Every funding distribution, in order.
    pub distributions: Mutex<Vec<(Vec<Address>, U256)>>,
    /// Every native transfer: (from, to, value).
    pub transfers: Mutex<Vec<(Address, Address, U256)>>,
    /// When set, the registered root is silently replaced with this value.
    pub corrupt_root: Mutex<Option<B256>>,
    /// The next N executions revert (gas still burned, leaf not processed).
    pub revert_remaining: AtomicU32,
    /// When true, nonce repair transactions never close the gap.
    pub nonce_repair_sticks: Mutex<bool>,
    confirmations: DashMap<B256, Confirmation>,
    next_hash: AtomicU64,
}

impl MockLedger {
    pub fn new(domain: LeafDomain) -> Self {
        Self {
            domain,
            balances: DashMap::new(),
            token_balance: Mutex::new(U256::MAX),
            token_allowance: Mutex::new(U256::MAX),
            processed: DashMap::new(),
            roots: DashMap::new(),
            nonce_counts: DashMap::new(),
            executions: Mutex::new(Vec::new()),
            distributions: Mutex::new(Vec::new()),
            transfers: Mutex::new(Vec::new()),
            corrupt_root: Mutex::new(None),
            revert_remaining: AtomicU32::new(0),
            nonce_repair_sticks: Mutex::new(false),
            confirmations: DashMap::new(),
            next_hash: AtomicU64::new(1),
        }
    }

    pub fn set_balance(&self, address: Address, balance: U256) {
        self.balances.insert(address, balance);
    }

    pub fn balance(&self, address: Address) -> U256 {
        self.balances.get(&address).map(|b| *b).unwrap_or_default()
    }

    fn debit(&self, address: Address, amount: U256) {
        let mut entry = self.balances.entry(address).or_default();
        *entry = entry.saturating_sub(amount);
    }

    fn credit(&self, address: Address, amount: U256) {
        *self.balances.entry(address).or_default() += amount;
    }

    fn fresh_hash(&self) -> B256 {
        B256::from(U256::from(self.next_hash.fetch_add(1, Ordering::Relaxed)))
    }

    fn confirm(&self, tx_hash: B256, success: bool, gas_used: u64) {
        self.confirmations.insert(
            tx_hash,
            Confirmation { tx_hash, success, gas_used, effective_gas_price: GAS_PRICE },
        );
    }
}

#[async_trait]
impl Ledger for MockLedger {
    fn domain(&self) -> LeafDomain {
        self.domain
    }

    async fn is_leaf_processed(&self, leaf: B256) -> Result<bool, RelayerError> {
        Ok(self.processed.contains_key(&leaf))
    }

    async fn find_execution(&self, leaf: B256) -> Result<Option<B256>, RelayerError> {
        Ok(self.processed.get(&leaf).map(|hash| *hash))
    }

    async fn batch_root(&self, funder: Address, batch_id: BatchId) -> Result<B256, RelayerError> {
        Ok(self
            .roots
            .get(&(funder, batch_id as u64))
            .map(|root| *root)
            .unwrap_or_default())
    }

    async fn register_batch_root(
        &self,
        signer: &PrivateKeySigner,
        registration: &RootRegistration,
    ) -> Result<B256, RelayerError> {
        let root = self
            .corrupt_root
            .lock()
            .unwrap()
            .unwrap_or(registration.root);
        self.roots
            .insert((registration.funder, registration.batch_id as u64), root);

        let tx_hash = self.fresh_hash();
        self.debit(signer.address(), U256::from(TRANSFER_GAS) * U256::from(GAS_PRICE));
        self.confirm(tx_hash, true, TRANSFER_GAS);
        Ok(tx_hash)
    }

    async fn estimate_execution(
        &self,
        _from: Address,
        _request: &ExecuteRequest,
    ) -> Result<u64, RelayerError> {
        Ok(EXECUTION_GAS)
    }

    async fn execute(
        &self,
        signer: &PrivateKeySigner,
        request: &ExecuteRequest,
        _gas_limit: u64,
    ) -> Result<B256, RelayerError> {
        self.executions.lock().unwrap().push(request.clone());

        let tx_hash = self.fresh_hash();
        let gas_cost = U256::from(EXECUTION_GAS) * U256::from(GAS_PRICE);
        self.debit(signer.address(), gas_cost);

        let leaf = payment_leaf(
            &self.domain,
            request.batch_id,
            request.job_id,
            request.funder,
            request.recipient,
            request.amount,
        );
        let root = self.batch_root(request.funder, request.batch_id).await?;

        let scripted_revert = self
            .revert_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        let valid = !scripted_revert
            && !self.processed.contains_key(&leaf)
            && BatchMerkleTree::verify_proof(&root, &request.proof, &leaf);

        if valid {
            self.processed.insert(leaf, tx_hash);
        }
        self.confirm(tx_hash, valid, EXECUTION_GAS);
        Ok(tx_hash)
    }

    async fn estimate_distribution(
        &self,
        _from: Address,
        _recipients: &[Address],
        _amount_each: U256,
    ) -> Result<u64, RelayerError> {
        Ok(DISTRIBUTION_GAS)
    }

    async fn distribute(
        &self,
        signer: &PrivateKeySigner,
        recipients: &[Address],
        amount_each: U256,
        _gas_limit: u64,
    ) -> Result<B256, RelayerError> {
        self.distributions
            .lock()
            .unwrap()
            .push((recipients.to_vec(), amount_each));

        let total = amount_each * U256::from(recipients.len());
        let gas_cost = U256::from(DISTRIBUTION_GAS) * U256::from(GAS_PRICE);
        self.debit(signer.address(), total + gas_cost);
        for recipient in recipients {
            self.credit(*recipient, amount_each);
        }

        let tx_hash = self.fresh_hash();
        self.confirm(tx_hash, true, DISTRIBUTION_GAS);
        Ok(tx_hash)
    }

    async fn send_native(
        &self,
        signer: &PrivateKeySigner,
        to: Address,
        value: U256,
        _gas_price: Option<u128>,
        nonce: Option<u64>,
    ) -> Result<B256, RelayerError> {
        let from = signer.address();
        self.transfers.lock().unwrap().push((from, to, value));

        let gas_cost = U256::from(TRANSFER_GAS) * U256::from(GAS_PRICE);
        self.debit(from, value + gas_cost);
        self.credit(to, value);

        // A pinned-nonce self-transfer is a repair: close the gap unless
        // the scenario keeps it stuck.
        if nonce.is_some() && !*self.nonce_repair_sticks.lock().unwrap() {
            if let Some(mut counts) = self.nonce_counts.get_mut(&from) {
                counts.0 = counts.1;
            }
        }

        let tx_hash = self.fresh_hash();
        self.confirm(tx_hash, true, TRANSFER_GAS);
        Ok(tx_hash)
    }

    async fn wait_for_confirmation(
        &self,
        tx_hash: B256,
        _timeout: Duration,
    ) -> Result<Option<Confirmation>, RelayerError> {
        Ok(self.confirmations.get(&tx_hash).map(|confirmation| *confirmation))
    }

    async fn funder_capacity(&self, _funder: Address) -> Result<(U256, U256), RelayerError> {
        Ok((
            *self.token_balance.lock().unwrap(),
            *self.token_allowance.lock().unwrap(),
        ))
    }

    async fn native_balance(&self, address: Address) -> Result<U256, RelayerError> {
        Ok(self.balance(address))
    }

    async fn nonce_counts(&self, address: Address) -> Result<(u64, u64), RelayerError> {
        Ok(self.nonce_counts.get(&address).map(|counts| *counts).unwrap_or((0, 0)))
    }

    async fn gas_price(&self) -> Result<u128, RelayerError> {
        Ok(GAS_PRICE)
    }
}

/// A prepared batch environment: storage, keystore, mock ledger, and a
/// funded faucet.
pub struct TestEnv {
    pub storage: RelayerStorage,
    pub keystore: Arc<InMemoryKeyStore>,
    pub ledger: Arc<MockLedger>,
    pub batch: Batch,
    pub jobs: Vec<BatchJob>,
    pub faucet: PrivateKeySigner,
    pub funder: Address,
}

impl TestEnv {
    /// Builds a batch of `jobs` payouts with a faucet holding `faucet_balance`.
    pub async fn new(job_count: u64, faucet_balance: U256) -> Self {
        let domain = LeafDomain { chain_id: 137, contract: Address::repeat_byte(0xAA) };
        let funder = Address::repeat_byte(0xBB);

        let storage = RelayerStorage::in_memory();
        let keystore = Arc::new(InMemoryKeyStore::default());
        let ledger = Arc::new(MockLedger::new(domain));

        let batch = Batch::new(1, funder, job_count);
        storage.create_batch(&batch).await.unwrap();

        let jobs: Vec<BatchJob> = (0..job_count)
            .map(|i| {
                BatchJob::new(
                    i as i64 + 1,
                    batch.id,
                    Address::repeat_byte(0x10 + i as u8),
                    U256::from(1_000_000u64 * (i + 1)),
                )
            })
            .collect();
        storage.insert_jobs(&jobs).await.unwrap();

        let faucet = PrivateKeySigner::random();
        keystore.set_key(faucet.address(), &faucet).await.unwrap();
        storage
            .write_faucet(&FaucetWallet { address: faucet.address(), funder })
            .await
            .unwrap();
        ledger.set_balance(faucet.address(), faucet_balance);

        Self { storage, keystore, ledger, batch, jobs, faucet, funder }
    }
}
