use async_trait::async_trait;
use std::time::Duration;
use tokio::time::sleep;

/// Courtesy throttle applied after every generation request.
#[async_trait]
pub trait Pacer: Send + Sync {
    async fn pause(&self, delay: Duration);
}

/// Sleeps on the tokio clock, so paused-clock tests observe exact elapsed time.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioPacer;

#[async_trait]
impl Pacer for TokioPacer {
    async fn pause(&self, delay: Duration) {
        if delay.is_zero() {
            return;
        }
        sleep(delay).await;
    }
}

/// Never waits. Used for dry runs and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPacing;

#[async_trait]
impl Pacer for NoPacing {
    async fn pause(&self, _delay: Duration) {}
}
