//! Exponential backoff with jitter
//!
//! Generic retry driver used by the transport layer and the workflow
//! engine. Callers decide retryability per error; the driver only owns the
//! delay schedule.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Backoff schedule for retried operations
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct BackoffPolicy {
    /// Maximum attempts including the first
    pub max_attempts: u32,
    /// Initial delay in milliseconds
    pub base_delay_ms: u64,
    /// Upper bound on any single delay, in milliseconds
    pub cap_delay_ms: u64,
    /// Multiplier applied per attempt
    pub multiplier: f64,
    /// Whether to add up to 25% random jitter
    pub jitter: bool,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            cap_delay_ms: 30_000,
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl BackoffPolicy {
    /// Create a policy with a custom attempt count
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    /// Set the initial delay
    pub fn with_base_delay_ms(mut self, ms: u64) -> Self {
        self.base_delay_ms = ms;
        self
    }

    /// Set the delay cap
    pub fn with_cap_delay_ms(mut self, ms: u64) -> Self {
        self.cap_delay_ms = ms;
        self
    }

    /// Enable or disable jitter
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before the given retry (0 = delay after the first failure)
    pub fn delay(&self, retry: u32) -> Duration {
        let raw = (self.base_delay_ms as f64 * self.multiplier.powi(retry as i32)) as u64;
        let capped = raw.min(self.cap_delay_ms);
        let with_jitter = if self.jitter {
            capped + (capped as f64 * 0.25 * rand::random::<f64>()) as u64
        } else {
            capped
        };
        Duration::from_millis(with_jitter)
    }
}

/// Run an operation with retries
///
/// `should_retry` is consulted on each failure; permanent errors short out
/// immediately. The last error is returned when attempts are exhausted.
pub async fn retry_with_backoff<F, Fut, T, E, P>(
    policy: &BackoffPolicy,
    operation_name: &str,
    mut f: F,
    should_retry: P,
) -> std::result::Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match f().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation = operation_name, attempt, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) => {
                if attempt >= policy.max_attempts || !should_retry(&e) {
                    return Err(e);
                }
                let delay = policy.delay(attempt - 1);
                warn!(
                    operation = operation_name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
