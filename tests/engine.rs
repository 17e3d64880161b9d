//! End-to-end engine scenarios over the in-memory storage and the mock
//! ledger.

mod common;

use alloy::{
    primitives::{B256, U256},
    signers::local::PrivateKeySigner,
};
use batch_relayer::{
    dispatch::DispatchConfig,
    engine::{BatchEngine, EngineConfig},
    error::{FundingError, RelayerError},
    funding::FundingConfig,
    ledger::Ledger,
    nonce::NonceRepairService,
    storage::StorageApi,
    types::{BatchStatus, JobStatus, WalletStatus, payment_leaf},
};
use common::{EXECUTION_GAS, GAS_PRICE, TRANSFER_GAS, TestEnv};
use std::time::Duration;

fn fast_config(workers: usize) -> EngineConfig {
    let dispatch = DispatchConfig {
        throttle: Duration::from_millis(1),
        retry_base_backoff: Duration::from_millis(1),
        retry_max_backoff: Duration::from_millis(5),
        ..DispatchConfig::default()
    };
    // A cushion large enough that any job-to-worker split leaves every
    // wallet able to pay for all four executions plus its sweep.
    let funding = FundingConfig {
        gas_cushion: U256::from(8_000_000_000_000_000u64),
        ..FundingConfig::default()
    };
    EngineConfig { workers, funding, dispatch }
}

fn engine(env: &TestEnv, workers: usize) -> BatchEngine {
    BatchEngine::new(
        env.storage.clone(),
        env.ledger.clone(),
        env.keystore.clone(),
        fast_config(workers),
    )
}

fn one_native() -> U256 {
    U256::from(10u64).pow(U256::from(18u64))
}

#[tokio::test]
async fn happy_path_completes_and_sweeps() {
    let env = TestEnv::new(4, one_native()).await;
    let report = engine(&env, 2).run_batch(env.batch.id).await.unwrap();

    assert_eq!(report.completed, 4);
    assert_eq!(report.failed, 0);
    assert!(report.funding_amount > U256::ZERO);
    assert!(report.refund_amount > U256::ZERO);

    let batch = env.storage.read_batch(env.batch.id).await.unwrap().unwrap();
    assert_eq!(batch.status, BatchStatus::Completed);
    assert_eq!(batch.funding_amount, report.funding_amount);
    assert_eq!(batch.refund_amount, report.refund_amount);
    assert!(batch.started_at.is_some() && batch.ended_at.is_some());

    for job in env.storage.batch_jobs(env.batch.id).await.unwrap() {
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.tx_hash.is_some());
    }

    // Every wallet funded once, then retired.
    let relayers = env.storage.batch_relayers(env.batch.id).await.unwrap();
    assert_eq!(relayers.len(), 2);
    for relayer in &relayers {
        assert_eq!(relayer.status, WalletStatus::Drained);
    }
    assert_eq!(env.ledger.distributions.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn funds_are_conserved_within_sweep_gas() {
    let env = TestEnv::new(4, one_native()).await;
    let faucet_before = env.ledger.balance(env.faucet.address());
    let report = engine(&env, 2).run_batch(env.batch.id).await.unwrap();

    // Everything handed to relayers came back as refund, job gas, or the
    // two sweep transactions' own gas.
    let sweep_gas = U256::from(TRANSFER_GAS) * U256::from(GAS_PRICE) * U256::from(2u64);
    assert_eq!(
        report.funding_amount - report.refund_amount - report.gas_spent,
        sweep_gas
    );

    // All four executions are accounted in per-relayer gas.
    assert_eq!(
        report.gas_spent,
        U256::from(EXECUTION_GAS) * U256::from(GAS_PRICE) * U256::from(4u64)
    );

    // The faucet never overdrew its pre-funding balance.
    assert!(report.funding_amount <= faucet_before);
}

#[tokio::test]
async fn duplicate_leaf_is_reconciled_without_resubmission() {
    let env = TestEnv::new(4, one_native()).await;

    // Job 2 already executed on-chain in some earlier life.
    let prior_hash = B256::repeat_byte(0x77);
    let job = &env.jobs[1];
    let leaf = payment_leaf(
        &env.ledger.domain(),
        env.batch.id,
        job.id,
        env.funder,
        job.recipient,
        job.amount,
    );
    env.ledger.processed.insert(leaf, prior_hash);

    let report = engine(&env, 2).run_batch(env.batch.id).await.unwrap();
    assert_eq!(report.completed, 4);

    // Three submissions only, and no gas attributed for the duplicate.
    assert_eq!(env.ledger.executions.lock().unwrap().len(), 3);
    assert!(env.ledger.executions.lock().unwrap().iter().all(|r| r.job_id != job.id));
    assert_eq!(
        report.gas_spent,
        U256::from(EXECUTION_GAS) * U256::from(GAS_PRICE) * U256::from(3u64)
    );

    let reconciled = env.storage.read_job(job.id).await.unwrap().unwrap();
    assert_eq!(reconciled.status, JobStatus::Completed);
    assert_eq!(reconciled.tx_hash, Some(prior_hash));
}

#[tokio::test]
async fn underfunded_faucet_fails_before_any_distribution() {
    let env = TestEnv::new(4, U256::from(1_000u64)).await;

    let err = engine(&env, 2).run_batch(env.batch.id).await.unwrap_err();
    assert!(matches!(
        err,
        RelayerError::Funding(FundingError::InsufficientFaucetBalance { batch_id: 1, .. })
    ));

    // Nothing left the faucet and nothing was submitted.
    assert!(env.ledger.distributions.lock().unwrap().is_empty());
    assert!(env.ledger.executions.lock().unwrap().is_empty());

    let batch = env.storage.read_batch(env.batch.id).await.unwrap().unwrap();
    assert_eq!(batch.status, BatchStatus::Failed);
}

#[tokio::test]
async fn root_mismatch_halts_before_dispatch() {
    let env = TestEnv::new(4, one_native()).await;
    *env.ledger.corrupt_root.lock().unwrap() = Some(B256::repeat_byte(0xEE));

    let err = engine(&env, 2).run_batch(env.batch.id).await.unwrap_err();
    assert!(matches!(err, RelayerError::RootMismatch { batch_id: 1, .. }));

    // Doomed submissions never started.
    assert!(env.ledger.executions.lock().unwrap().is_empty());
    let batch = env.storage.read_batch(env.batch.id).await.unwrap().unwrap();
    assert_eq!(batch.status, BatchStatus::Failed);
}

#[tokio::test]
async fn reverted_jobs_recover_through_retry_cycles() {
    let env = TestEnv::new(4, one_native()).await;
    env.ledger.revert_remaining.store(2, std::sync::atomic::Ordering::SeqCst);

    let report = engine(&env, 2).run_batch(env.batch.id).await.unwrap();
    assert_eq!(report.completed, 4);
    assert_eq!(report.failed, 0);

    // Two reverts plus four eventual successes.
    assert_eq!(env.ledger.executions.lock().unwrap().len(), 6);

    // The recovered jobs carry their retry history.
    let retried = env
        .storage
        .batch_jobs(env.batch.id)
        .await
        .unwrap()
        .iter()
        .filter(|job| job.retry_count > 0)
        .count();
    assert_eq!(retried, 2);
}

#[tokio::test]
async fn nonce_repair_converges_on_a_stuck_wallet() {
    let env = TestEnv::new(1, one_native()).await;
    let wallet = PrivateKeySigner::random();
    env.ledger.set_balance(wallet.address(), one_native());
    env.ledger.nonce_counts.insert(wallet.address(), (5, 8));

    let service = NonceRepairService::new(env.ledger.clone());
    let attempts = service.repair(&wallet).await.unwrap();
    assert_eq!(attempts, 1);

    let (confirmed, pending) = env.ledger.nonce_counts.get(&wallet.address()).map(|c| *c).unwrap();
    assert_eq!(confirmed, pending);
}

#[tokio::test]
async fn nonce_repair_is_a_noop_on_healthy_wallets() {
    let env = TestEnv::new(1, one_native()).await;
    let wallet = PrivateKeySigner::random();
    env.ledger.nonce_counts.insert(wallet.address(), (3, 3));

    let service = NonceRepairService::new(env.ledger.clone());
    assert_eq!(service.repair(&wallet).await.unwrap(), 0);
    assert!(env.ledger.transfers.lock().unwrap().is_empty());
}

#[tokio::test]
async fn nonce_repair_gives_up_after_bounded_attempts() {
    let env = TestEnv::new(1, one_native()).await;
    let wallet = PrivateKeySigner::random();
    env.ledger.set_balance(wallet.address(), one_native());
    env.ledger.nonce_counts.insert(wallet.address(), (5, 8));
    *env.ledger.nonce_repair_sticks.lock().unwrap() = true;

    let service = NonceRepairService::new(env.ledger.clone());
    let err = service.repair(&wallet).await.unwrap_err();
    assert!(matches!(
        err,
        RelayerError::NonceRepairExhausted { pending: 8, confirmed: 5, .. }
    ));
    // One boosted self-transfer per attempt, never more.
    assert_eq!(env.ledger.transfers.lock().unwrap().len(), 3);
}
