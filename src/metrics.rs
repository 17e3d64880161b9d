//! Engine metrics.

use metrics::{Counter, Gauge, Histogram};
use metrics_derive::Metrics;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::{net::SocketAddr, sync::Mutex, time::Duration};

/// Metrics for the dispatch layer.
#[derive(Metrics)]
#[metrics(scope = "dispatch")]
pub struct DispatchMetrics {
    /// Number of submitted job transactions.
    pub sent: Counter,
    /// Number of jobs confirmed on-chain.
    pub confirmed: Counter,
    /// Number of jobs that reached a failed state.
    pub failed: Counter,
    /// Jobs found already processed on-chain and reconciled without a
    /// submission.
    pub reconciled: Counter,
    /// Jobs reclaimed after their claim lease expired.
    pub stuck_reclaims: Counter,
    /// Retry cycles executed.
    pub retry_cycles: Counter,
    /// Workers currently running.
    pub active_workers: Gauge,
    /// Time from submission to confirmation, in milliseconds.
    pub confirmation_time: Histogram,
}

/// Metrics for the funding controller.
#[derive(Metrics)]
#[metrics(scope = "funding")]
pub struct FundingMetrics {
    /// Batches funded.
    pub funded: Counter,
    /// Wallets swept back to the faucet.
    pub swept_wallets: Counter,
    /// Wallets retired with only dust left.
    pub dust_wallets: Counter,
}

/// Builds the Prometheus exporter and installs it as the global recorder.
pub async fn setup_exporter(metrics_addr: impl Into<SocketAddr>) -> PrometheusHandle {
    static HANDLE: Mutex<Option<PrometheusHandle>> = Mutex::new(None);

    let mut lock = HANDLE.lock().expect("metrics handle lock poisoned");
    if let Some(handle) = &*lock {
        return handle.clone();
    }

    let addr: SocketAddr = metrics_addr.into();
    let (recorder, exporter) = PrometheusBuilder::new()
        .with_http_listener(addr)
        .upkeep_timeout(Duration::from_secs(5))
        .build()
        .expect("failed to build metrics recorder");

    let handle = recorder.handle();
    metrics::set_global_recorder(recorder).expect("could not set metrics recorder");
    tokio::spawn(exporter);

    tracing::info!(%addr, "Started metrics server");

    *lock = Some(handle.clone());

    handle
}
