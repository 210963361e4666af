//! Deadline wrappers for outbound calls
//!
//! Every outbound call in tekton carries a deadline; elapsing it maps to a
//! `timeout` error the caller's retry policy understands.

use std::future::Future;
use std::time::Duration;
use tokio::time::timeout as tokio_timeout;

/// Outcome of a deadline-bounded operation
#[derive(Debug)]
pub enum DeadlineError<E> {
    /// The operation completed but failed
    Failed(E),
    /// The deadline elapsed before completion
    Elapsed(Duration),
}

impl<E: std::fmt::Display> std::fmt::Display for DeadlineError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeadlineError::Failed(e) => write!(f, "Operation failed: {}", e),
            DeadlineError::Elapsed(d) => write!(f, "Deadline of {:?} elapsed", d),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for DeadlineError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DeadlineError::Failed(e) => Some(e),
            DeadlineError::Elapsed(_) => None,
        }
    }
}

/// Run an operation under a deadline
///
/// Cancels the future when the deadline elapses.
pub async fn with_deadline<F, T, E>(
    deadline: Duration,
    operation: F,
) -> std::result::Result<T, DeadlineError<E>>
where
    F: Future<Output = std::result::Result<T, E>>,
{
    match tokio_timeout(deadline, operation).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(DeadlineError::Failed(e)),
        Err(_) => Err(DeadlineError::Elapsed(deadline)),
    }
}
