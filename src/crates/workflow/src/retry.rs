//! Per-task retry driving
//!
//! Each attempt runs under the task's deadline; retries apply only to
//! transport errors and errors the component explicitly flags retryable.
//! Backoff is exponential with jitter (base 500 ms, cap 30 s).

use crate::definition::RetryPolicy;
use crate::dispatch::{DispatchError, TaskDispatcher, TaskInvocation};
use serde_json::Value;
use tooling::retry::BackoffPolicy;
use tracing::warn;

impl RetryPolicy {
    /// The backoff schedule for this policy
    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::new(self.max_attempts)
            .with_base_delay_ms(self.base_delay_ms)
            .with_cap_delay_ms(self.cap_delay_ms)
    }
}

/// Outcome of driving a task through its retry policy
#[derive(Debug)]
pub struct AttemptOutcome {
    /// Attempts actually made
    pub attempts: u32,
    /// Final result
    pub result: std::result::Result<Value, DispatchError>,
}

/// Run a task attempt loop against a dispatcher
pub async fn run_with_retries(
    dispatcher: &dyn TaskDispatcher,
    invocation: &TaskInvocation,
    policy: &RetryPolicy,
) -> AttemptOutcome {
    let backoff = policy.backoff();
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        match dispatcher.dispatch(invocation).await {
            Ok(output) => {
                return AttemptOutcome {
                    attempts,
                    result: Ok(output),
                }
            }
            Err(e) => {
                if attempts >= policy.max_attempts || !e.is_retryable() {
                    return AttemptOutcome {
                        attempts,
                        result: Err(e),
                    };
                }
                let delay = backoff.delay(attempts - 1);
                warn!(
                    task = %invocation.task_id,
                    attempt = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Task attempt failed; backing off"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
