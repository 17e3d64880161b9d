//! # Relayer CLI

use crate::{
    config::{ChainSettings, RelayerConfig, RpcSettings},
    engine::BatchEngine,
    keystore::{HttpKeyStore, InMemoryKeyStore, KeyStore},
    ledger::OnchainLedger,
    metrics::setup_exporter,
    storage::RelayerStorage,
    transport::RpcFailover,
    types::BatchId,
};
use alloy::primitives::Address;
use clap::Parser;
use sqlx::PgPool;
use std::{
    net::{IpAddr, Ipv4Addr},
    path::PathBuf,
    sync::Arc,
};
use tracing::info;
use url::Url;

/// The batch relayer distributes token payouts across ephemeral relayer
/// wallets submitting in parallel.
#[derive(Debug, Parser)]
#[command(author, about = "Batch relayer", long_about = None)]
pub struct Args {
    /// The configuration file.
    ///
    /// If missing, one is assembled from the CLI values and stored in the
    /// working directory under `relayer.yaml`.
    #[arg(long, value_name = "CONFIG", env = "RELAYER_CONFIG", default_value = "relayer.yaml")]
    pub config: PathBuf,
    /// The batch to run.
    #[arg(long, value_name = "BATCH_ID")]
    pub batch: BatchId,
    /// Primary JSON-RPC endpoint.
    #[arg(long = "rpc-url", value_name = "RPC_ENDPOINT", env = "RELAYER_RPC_URL")]
    pub rpc_url: Option<Url>,
    /// Fallback JSON-RPC endpoint.
    #[arg(long = "rpc-fallback-url", value_name = "RPC_ENDPOINT", env = "RELAYER_RPC_FALLBACK_URL")]
    pub rpc_fallback_url: Option<Url>,
    /// Address of the ledger contract.
    #[arg(long, value_name = "ADDRESS")]
    pub contract: Option<Address>,
    /// Address of the payment token.
    #[arg(long, value_name = "ADDRESS")]
    pub token: Option<Address>,
    /// Percentage buffer on sampled batch gas estimates.
    #[arg(long, value_name = "PCT")]
    pub gas_buffer: Option<u64>,
    /// Funding safety multiplier for the faucet reserve.
    #[arg(long, value_name = "FACTOR")]
    pub funding_safety_multiplier: Option<u64>,
    /// Maximum retries a single job is eligible for.
    #[arg(long, value_name = "NUM")]
    pub retry_ceiling: Option<u32>,
    /// In-flight job limit per retry cycle.
    #[arg(long, value_name = "NUM")]
    pub cycle_concurrency: Option<usize>,
    /// Relayer wallets provisioned per batch.
    #[arg(long, value_name = "NUM")]
    pub workers: Option<usize>,
    /// The database URL.
    #[arg(long = "database-url", value_name = "URL", env = "RELAYER_DB_URL")]
    pub database_url: Option<String>,
    /// The key vault URL.
    #[arg(long = "keystore-url", value_name = "URL", env = "RELAYER_KEYSTORE_URL")]
    pub keystore_url: Option<Url>,
    /// The port to serve metrics on.
    #[arg(long = "metrics-port", value_name = "PORT")]
    pub metrics_port: Option<u16>,
}

impl Args {
    /// Overlays CLI values on a loaded configuration.
    fn merge_config(&self, mut config: RelayerConfig) -> RelayerConfig {
        if let Some(url) = &self.rpc_url {
            config.rpc.primary = url.clone();
        }
        if let Some(url) = &self.rpc_fallback_url {
            config.rpc.fallback = Some(url.clone());
        }
        if let Some(contract) = self.contract {
            config.chain.contract = contract;
        }
        if let Some(token) = self.token {
            config.chain.token = token;
        }
        if let Some(buffer) = self.gas_buffer {
            config = config.with_gas_buffer_pct(buffer);
        }
        if let Some(multiplier) = self.funding_safety_multiplier {
            config = config.with_safety_multiplier(multiplier);
        }
        if let Some(ceiling) = self.retry_ceiling {
            config = config.with_retry_ceiling(ceiling);
        }
        if let Some(concurrency) = self.cycle_concurrency {
            config = config.with_cycle_concurrency(concurrency);
        }
        if let Some(workers) = self.workers {
            config = config.with_workers(workers);
        }
        if self.database_url.is_some() {
            config.database_url = self.database_url.clone();
        }
        if self.keystore_url.is_some() {
            config.keystore_url = self.keystore_url.clone();
        }
        if self.metrics_port.is_some() {
            config.metrics_port = self.metrics_port;
        }
        config
    }

    /// Assembles a configuration when no file exists yet.
    fn base_config(&self) -> eyre::Result<RelayerConfig> {
        let primary = self
            .rpc_url
            .clone()
            .ok_or_else(|| eyre::eyre!("--rpc-url is required without a config file"))?;
        let contract = self
            .contract
            .ok_or_else(|| eyre::eyre!("--contract is required without a config file"))?;
        let token = self
            .token
            .ok_or_else(|| eyre::eyre!("--token is required without a config file"))?;

        Ok(RelayerConfig {
            rpc: RpcSettings { primary, fallback: self.rpc_fallback_url.clone() },
            chain: ChainSettings { contract, token },
            gas: Default::default(),
            retry: Default::default(),
            workers: crate::constants::DEFAULT_WORKER_COUNT,
            database_url: None,
            keystore_url: None,
            metrics_port: None,
        })
    }

    /// Runs the configured batch to completion.
    pub async fn run(self) -> eyre::Result<()> {
        let config = if self.config.exists() {
            self.merge_config(RelayerConfig::load_from_file(&self.config)?)
        } else {
            let config = self.merge_config(self.base_config()?);
            config.save_to_file(&self.config)?;
            config
        };

        if let Some(port) = config.metrics_port {
            setup_exporter((IpAddr::V4(Ipv4Addr::LOCALHOST), port)).await;
        }

        let storage = if let Some(db_url) = &config.database_url {
            info!("Using PostgreSQL as storage.");
            RelayerStorage::pg(PgPool::connect(db_url).await?)
        } else {
            info!("Using in-memory storage.");
            RelayerStorage::in_memory()
        };

        let keystore: Arc<dyn KeyStore> = match &config.keystore_url {
            Some(url) => Arc::new(HttpKeyStore::new(url.clone())),
            None => Arc::new(InMemoryKeyStore::default()),
        };

        let rpc = Arc::new(
            RpcFailover::connect(
                &config.rpc.primary,
                config.rpc.fallback.as_ref(),
                config.failover_config(),
            )
            .await?,
        );
        let ledger = Arc::new(
            OnchainLedger::new(rpc, config.chain.contract, config.chain.token).await?,
        );

        let engine = BatchEngine::new(storage, ledger, keystore, config.engine_config());
        let report = engine.run_batch(self.batch).await?;

        info!(
            batch_id = report.batch_id,
            completed = report.completed,
            failed = report.failed,
            funding = %report.funding_amount,
            refund = %report.refund_amount,
            gas = %report.gas_spent,
            "batch run finished"
        );

        Ok(())
    }
}
