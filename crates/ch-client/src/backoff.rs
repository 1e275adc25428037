//! Jittered exponential backoff for reconnect loops.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Backoff parameters. The defaults are the production reconnect policy.
#[derive(Debug, Clone, Copy)]
pub struct BackoffConfig {
    pub initial: Duration,
    pub cap: Duration,
    pub max_retries: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        BackoffConfig {
            initial: Duration::from_secs(1),
            cap: Duration::from_secs(30),
            max_retries: 10,
        }
    }
}

/// A single reconnect loop's backoff state.
///
/// Each `sleep` waits the current nominal duration plus a jitter uniform
/// in `[0, duration/4]`, then doubles the nominal duration up to the cap.
pub struct Backoff {
    cfg: BackoffConfig,
    current: Duration,
}

impl Backoff {
    pub fn new(cfg: BackoffConfig) -> Self {
        Backoff {
            current: cfg.initial,
            cfg,
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.cfg.max_retries
    }

    /// Wait out the next backoff interval. Returns `true` iff the wait was
    /// interrupted by `cancel` before the deadline.
    pub async fn sleep(&mut self, cancel: &CancellationToken) -> bool {
        let jitter = self.current.mul_f64(rand::random::<f64>() / 4.0);
        let wait = self.current + jitter;
        self.current = (self.current * 2).min(self.cfg.cap);
        tokio::select! {
            biased;
            () = cancel.cancelled() => true,
            () = tokio::time::sleep(wait) => false,
        }
    }
}
