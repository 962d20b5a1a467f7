//! Time source for polling.

use async_trait::async_trait;
use tokio::time::Instant;

/// Where the tracker reads the time and sleeps.
///
/// [`TokioClock`] follows `tokio::time`, so tests running with a paused
/// runtime get virtual, deterministic time for free.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;

    async fn sleep_until(&self, deadline: Instant);
}

/// The tokio runtime clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep_until(&self, deadline: Instant) {
        tokio::time::sleep_until(deadline).await;
    }
}
