// src/core/correlator/throttle.rs

use std::future::Future;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Enforces a minimum spacing between calls to an external service.
///
/// The lock is held for the whole wait-call-record sequence, so concurrent
/// callers queue up behind each other and never observe a stale timestamp.
/// The next call can only start once `min_interval` has passed since the
/// previous call *completed*, which also keeps call starts at least
/// `min_interval` apart.
#[derive(Debug)]
pub struct RequestThrottle {
    min_interval: Duration,
    last_completed: Mutex<Option<Instant>>,
}

impl RequestThrottle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_completed: Mutex::new(None),
        }
    }

    /// Runs `call` once the spacing since the previous call allows it.
    pub async fn run<F, Fut, T>(&self, call: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let mut last_completed = self.last_completed.lock().await;

        if let Some(previous) = *last_completed {
            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                let wait = self.min_interval - elapsed;
                debug!(wait_ms = %wait.as_millis(), "Rate limiting: delaying request.");
                tokio::time::sleep(wait).await;
            }
        }

        let output = call().await;
        *last_completed = Some(Instant::now());
        output
    }
}
