//! Rate gate implementations

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

/// Injected rate limiter
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Wait until the next external call may start
    async fn acquire(&self);
}

/// Enforces a fixed minimum interval between consecutive calls
///
/// The first call never waits.
pub struct FixedIntervalGate {
    interval: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl FixedIntervalGate {
    pub fn new(interval: Duration) -> Self {
        debug!(?interval, "FixedIntervalGate::new: called");
        Self {
            interval,
            last_call: Mutex::new(None),
        }
    }
}

#[async_trait]
impl RateLimiter for FixedIntervalGate {
    async fn acquire(&self) {
        // Held across the sleep so concurrent callers queue behind each other
        let mut last_call = self.last_call.lock().await;

        if let Some(last) = *last_call {
            let elapsed = last.elapsed();
            if elapsed < self.interval {
                let wait = self.interval - elapsed;
                debug!(wait_ms = wait.as_millis() as u64, "FixedIntervalGate::acquire: waiting");
                tokio::time::sleep(wait).await;
            }
        } else {
            debug!("FixedIntervalGate::acquire: first call, no wait");
        }

        *last_call = Some(Instant::now());
    }
}

/// Limiter that never waits
#[derive(Debug, Default, Clone, Copy)]
pub struct Unlimited;

#[async_trait]
impl RateLimiter for Unlimited {
    async fn acquire(&self) {}
}
