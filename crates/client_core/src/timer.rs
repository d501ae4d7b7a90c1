use std::time::{Duration, Instant};

use async_trait::async_trait;

/// Clock and sleep capability used by the polling loop.
#[async_trait]
pub trait PollTimer: Send + Sync {
    async fn sleep(&self, duration: Duration);
    fn now(&self) -> Instant;
}

pub struct TokioTimer;

#[async_trait]
impl PollTimer for TokioTimer {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn now(&self) -> Instant {
        Instant::now()
    }
}
