//! Relayer configuration.

use crate::{
    constants::{
        DEFAULT_CYCLE_CONCURRENCY, DEFAULT_FUNDING_SAFETY_MULTIPLIER, DEFAULT_GAS_BUFFER_PCT,
        DEFAULT_GAS_CUSHION, DEFAULT_RETRY_CEILING, DEFAULT_RETRY_CYCLES, DEFAULT_WORKER_COUNT,
    },
    dispatch::DispatchConfig,
    engine::EngineConfig,
    funding::FundingConfig,
    transport::FailoverConfig,
};
use alloy::primitives::{Address, U256};
use eyre::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use url::Url;

/// Relayer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayerConfig {
    /// RPC endpoints.
    pub rpc: RpcSettings,
    /// Chain-level addresses.
    pub chain: ChainSettings,
    /// Gas economics.
    #[serde(default)]
    pub gas: GasSettings,
    /// Retry behavior.
    #[serde(default)]
    pub retry: RetrySettings,
    /// Relayer wallets provisioned per batch.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Database URL. Falls back to in-memory storage when unset.
    #[serde(default)]
    pub database_url: Option<String>,
    /// Key vault URL. Falls back to an in-memory store when unset.
    #[serde(default)]
    pub keystore_url: Option<Url>,
    /// Port to serve Prometheus metrics on, if any.
    #[serde(default)]
    pub metrics_port: Option<u16>,
}

/// RPC endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcSettings {
    /// Primary JSON-RPC endpoint.
    pub primary: Url,
    /// Fallback endpoint used after repeated rate-limit errors.
    #[serde(default)]
    pub fallback: Option<Url>,
}

/// Chain-level addresses a batch executes against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainSettings {
    /// Address of the ledger contract.
    pub contract: Address,
    /// Address of the payment token.
    pub token: Address,
}

/// Gas economics settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GasSettings {
    /// Percentage buffer on sampled batch estimates.
    pub buffer_pct: u64,
    /// Fixed cushion added to every funding budget, in wei.
    pub cushion: U256,
    /// Multiplier on the funding transaction's own gas for the faucet
    /// reserve.
    pub safety_multiplier: u64,
}

impl Default for GasSettings {
    fn default() -> Self {
        Self {
            buffer_pct: DEFAULT_GAS_BUFFER_PCT,
            cushion: U256::from(DEFAULT_GAS_CUSHION),
            safety_multiplier: DEFAULT_FUNDING_SAFETY_MULTIPLIER,
        }
    }
}

/// Retry behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Maximum retries a single job is eligible for.
    pub ceiling: u32,
    /// Maximum retry cycles after the initial pass.
    pub cycles: u32,
    /// In-flight job limit per retry cycle.
    pub cycle_concurrency: usize,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            ceiling: DEFAULT_RETRY_CEILING,
            cycles: DEFAULT_RETRY_CYCLES,
            cycle_concurrency: DEFAULT_CYCLE_CONCURRENCY,
        }
    }
}

fn default_workers() -> usize {
    DEFAULT_WORKER_COUNT
}

impl RelayerConfig {
    /// Loads the configuration from a YAML file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> eyre::Result<Self> {
        let content = std::fs::read_to_string(&path)
            .wrap_err_with(|| format!("reading config {}", path.as_ref().display()))?;
        serde_yaml::from_str(&content).wrap_err("parsing config")
    }

    /// Saves the configuration to a YAML file.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> eyre::Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(&path, content)
            .wrap_err_with(|| format!("writing config {}", path.as_ref().display()))
    }

    /// Sets the gas buffer percentage.
    pub fn with_gas_buffer_pct(mut self, buffer_pct: u64) -> Self {
        self.gas.buffer_pct = buffer_pct;
        self
    }

    /// Sets the fixed gas cushion.
    pub fn with_gas_cushion(mut self, cushion: U256) -> Self {
        self.gas.cushion = cushion;
        self
    }

    /// Sets the funding safety multiplier.
    pub fn with_safety_multiplier(mut self, safety_multiplier: u64) -> Self {
        self.gas.safety_multiplier = safety_multiplier;
        self
    }

    /// Sets the retry ceiling.
    pub fn with_retry_ceiling(mut self, ceiling: u32) -> Self {
        self.retry.ceiling = ceiling;
        self
    }

    /// Sets the per-cycle concurrency limit.
    pub fn with_cycle_concurrency(mut self, cycle_concurrency: usize) -> Self {
        self.retry.cycle_concurrency = cycle_concurrency;
        self
    }

    /// Sets the number of relayer wallets per batch.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// The funding controller configuration.
    pub fn funding_config(&self) -> FundingConfig {
        FundingConfig {
            gas_buffer_pct: self.gas.buffer_pct,
            gas_cushion: self.gas.cushion,
            safety_multiplier: self.gas.safety_multiplier,
            ..FundingConfig::default()
        }
    }

    /// The dispatch configuration.
    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            retry_ceiling: self.retry.ceiling,
            retry_cycles: self.retry.cycles,
            cycle_concurrency: self.retry.cycle_concurrency,
            ..DispatchConfig::default()
        }
    }

    /// The engine configuration.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            workers: self.workers,
            funding: self.funding_config(),
            dispatch: self.dispatch_config(),
        }
    }

    /// The RPC failover configuration.
    pub fn failover_config(&self) -> FailoverConfig {
        FailoverConfig::default()
    }
}
