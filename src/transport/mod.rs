//! RPC access with adaptive rate limiting and endpoint failover.
//!
//! Every chain call the engine makes goes through [`RpcFailover`]. The
//! manager keeps a process-wide congestion signal: an adaptive delay that
//! grows geometrically on rate-limit errors and decays after a run of
//! consecutive successes. After enough consecutive rate-limit errors it
//! switches to the fallback endpoint. All state is atomic so the manager can
//! be shared by every concurrent worker.

use crate::constants::{
    DEFAULT_FAILOVER_THRESHOLD, DEFAULT_RPC_ATTEMPTS, DEFAULT_RPC_BASE_DELAY,
    DEFAULT_RPC_MAX_DELAY, DEFAULT_RPC_SUCCESS_STREAK,
};
use alloy::{
    providers::{DynProvider, Provider, ProviderBuilder},
    transports::{TransportErrorKind, TransportResult},
};
use std::{
    sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
    time::Duration,
};
use tracing::{debug, warn};
use url::Url;

pub mod error;
pub use error::{RpcErrorClass, TransportErrExt};

/// Tuning knobs for [`RpcFailover`].
#[derive(Debug, Clone)]
pub struct FailoverConfig {
    /// Attempts per call before the last error is propagated.
    pub attempts: u32,
    /// Floor of the adaptive inter-call delay.
    pub base_delay: Duration,
    /// Cap of the adaptive inter-call delay.
    pub max_delay: Duration,
    /// Consecutive rate-limit errors before switching endpoints.
    pub failover_threshold: u32,
    /// Consecutive successes before the delay is lowered a notch.
    pub success_streak: u32,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_RPC_ATTEMPTS,
            base_delay: DEFAULT_RPC_BASE_DELAY,
            max_delay: DEFAULT_RPC_MAX_DELAY,
            failover_threshold: DEFAULT_FAILOVER_THRESHOLD,
            success_streak: DEFAULT_RPC_SUCCESS_STREAK,
        }
    }
}

/// Shared congestion state. Mutated by every call from every worker, so all
/// fields are atomic.
#[derive(Debug)]
struct AdaptiveState {
    /// Current inter-call delay in milliseconds.
    delay_ms: AtomicU64,
    /// Run of consecutive successful calls.
    successes: AtomicU32,
    /// Run of consecutive rate-limited calls.
    rate_limits: AtomicU32,
    /// Whether calls are currently routed to the fallback endpoint.
    on_fallback: AtomicBool,
}

impl AdaptiveState {
    fn new(base: Duration) -> Self {
        Self {
            delay_ms: AtomicU64::new(base.as_millis() as u64),
            successes: AtomicU32::new(0),
            rate_limits: AtomicU32::new(0),
            on_fallback: AtomicBool::new(false),
        }
    }

    fn current_delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms.load(Ordering::Relaxed))
    }

    /// Records a success; after a full streak the delay is halved, floored
    /// at the base delay.
    fn on_success(&self, base: Duration, streak: u32) {
        self.rate_limits.store(0, Ordering::Relaxed);
        if self.successes.fetch_add(1, Ordering::Relaxed) + 1 >= streak {
            self.successes.store(0, Ordering::Relaxed);
            let current = self.delay_ms.load(Ordering::Relaxed);
            let lowered = (current / 2).max(base.as_millis() as u64);
            self.delay_ms.store(lowered, Ordering::Relaxed);
        }
    }

    /// Records a rate-limit error; the delay doubles up to the cap. Returns
    /// true once the consecutive error count crosses the failover threshold.
    fn on_rate_limit(&self, max: Duration, threshold: u32) -> bool {
        self.successes.store(0, Ordering::Relaxed);
        let current = self.delay_ms.load(Ordering::Relaxed);
        let raised = (current.saturating_mul(2)).min(max.as_millis() as u64).max(1);
        self.delay_ms.store(raised, Ordering::Relaxed);

        self.rate_limits.fetch_add(1, Ordering::Relaxed) + 1 >= threshold
    }
}

/// Primary/fallback provider pair with adaptive call pacing.
#[derive(Debug)]
pub struct RpcFailover {
    primary: DynProvider,
    fallback: Option<DynProvider>,
    state: AdaptiveState,
    config: FailoverConfig,
}

impl RpcFailover {
    /// Creates a manager over already-connected providers.
    pub fn new(
        primary: DynProvider,
        fallback: Option<DynProvider>,
        config: FailoverConfig,
    ) -> Self {
        let state = AdaptiveState::new(config.base_delay);
        Self { primary, fallback, state, config }
    }

    /// Connects the primary and optional fallback endpoints.
    pub async fn connect(
        primary: &Url,
        fallback: Option<&Url>,
        config: FailoverConfig,
    ) -> TransportResult<Self> {
        let primary = ProviderBuilder::new().connect(primary.as_str()).await?.erased();
        let fallback = match fallback {
            Some(url) => Some(ProviderBuilder::new().connect(url.as_str()).await?.erased()),
            None => None,
        };

        Ok(Self::new(primary, fallback, config))
    }

    /// The provider calls are currently routed to.
    pub fn active(&self) -> DynProvider {
        if self.state.on_fallback.load(Ordering::Relaxed)
            && let Some(fallback) = &self.fallback
        {
            return fallback.clone();
        }
        self.primary.clone()
    }

    /// Whether calls are currently routed to the fallback endpoint.
    pub fn is_on_fallback(&self) -> bool {
        self.state.on_fallback.load(Ordering::Relaxed)
    }

    /// Routes calls back to the primary endpoint and clears the error run.
    pub fn reset_primary(&self) {
        self.state.on_fallback.store(false, Ordering::Relaxed);
        self.state.rate_limits.store(0, Ordering::Relaxed);
    }

    fn switch_to_fallback(&self) {
        if self.fallback.is_some() && !self.state.on_fallback.swap(true, Ordering::Relaxed) {
            warn!("switching RPC calls to fallback endpoint");
        }
    }

    /// Runs one RPC operation with pacing, bounded retries, and failover.
    ///
    /// Rate-limit errors grow the delay and retry; network errors fail over
    /// and retry; terminal errors propagate immediately.
    pub async fn call<T, F, Fut>(&self, op: F) -> TransportResult<T>
    where
        F: Fn(DynProvider) -> Fut,
        Fut: Future<Output = TransportResult<T>>,
    {
        let mut last_err = None;

        for attempt in 1..=self.config.attempts {
            let delay = self.state.current_delay();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            match op(self.active()).await {
                Ok(value) => {
                    self.state.on_success(self.config.base_delay, self.config.success_streak);
                    return Ok(value);
                }
                Err(err) => match err.classify() {
                    RpcErrorClass::RateLimited => {
                        debug!(attempt, %err, "RPC call rate limited");
                        if self
                            .state
                            .on_rate_limit(self.config.max_delay, self.config.failover_threshold)
                        {
                            self.switch_to_fallback();
                        }
                        last_err = Some(err);
                    }
                    RpcErrorClass::Network => {
                        warn!(attempt, %err, "RPC endpoint unreachable");
                        self.switch_to_fallback();
                        last_err = Some(err);
                    }
                    RpcErrorClass::Terminal => return Err(err),
                },
            }
        }

        Err(last_err.unwrap_or_else(|| TransportErrorKind::custom_str("rpc attempts exhausted")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_geometrically_and_caps() {
        let state = AdaptiveState::new(Duration::from_millis(100));
        let max = Duration::from_millis(350);

        state.on_rate_limit(max, u32::MAX);
        assert_eq!(state.current_delay(), Duration::from_millis(200));
        state.on_rate_limit(max, u32::MAX);
        assert_eq!(state.current_delay(), Duration::from_millis(350));
        state.on_rate_limit(max, u32::MAX);
        assert_eq!(state.current_delay(), Duration::from_millis(350));
    }

    #[test]
    fn delay_decays_after_success_streak() {
        let base = Duration::from_millis(100);
        let state = AdaptiveState::new(base);
        state.on_rate_limit(Duration::from_secs(8), u32::MAX);
        state.on_rate_limit(Duration::from_secs(8), u32::MAX);
        assert_eq!(state.current_delay(), Duration::from_millis(400));

        // Two streaks of three successes walk the delay back down to base.
        for _ in 0..3 {
            state.on_success(base, 3);
        }
        assert_eq!(state.current_delay(), Duration::from_millis(200));
        for _ in 0..3 {
            state.on_success(base, 3);
        }
        assert_eq!(state.current_delay(), base);
    }

    #[test]
    fn success_resets_rate_limit_run() {
        let state = AdaptiveState::new(Duration::ZERO);
        let max = Duration::from_secs(1);

        assert!(!state.on_rate_limit(max, 3));
        assert!(!state.on_rate_limit(max, 3));
        state.on_success(Duration::ZERO, 10);
        // The run starts over after a success.
        assert!(!state.on_rate_limit(max, 3));
        assert!(!state.on_rate_limit(max, 3));
        assert!(state.on_rate_limit(max, 3));
    }
}
