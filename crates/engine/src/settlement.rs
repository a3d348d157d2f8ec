use std::time::Duration;

use async_trait::async_trait;

/// How long to wait for a market order to settle before giving up and
/// returning whatever the exchange last reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementPolicy {
    /// Wait before the first status fetch.
    pub initial_wait: Duration,
    /// Wait before each extra fetch while the order is unsettled.
    pub retry_wait: Duration,
    /// Extra fetches allowed after the first one.
    pub max_refetches: u32,
    /// Multiplier applied to `retry_wait` on every further attempt.
    pub backoff_factor: u32,
}

impl Default for SettlementPolicy {
    fn default() -> Self {
        Self {
            initial_wait: Duration::from_secs(5),
            retry_wait: Duration::from_secs(30),
            max_refetches: 1,
            backoff_factor: 1,
        }
    }
}

impl SettlementPolicy {
    /// Delay before extra fetch number `attempt` (1-based).
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let scale = self
            .backoff_factor
            .max(1)
            .saturating_pow(attempt.saturating_sub(1));
        self.retry_wait.saturating_mul(scale)
    }
}

/// Suspends the current workflow. Swappable so tests do not sleep for real.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Sleeps on the tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
