//! Shared connection pool with bounded per-target concurrency
//!
//! The shell and the workflow orchestrator issue all outbound calls
//! through one pool. Each target endpoint gets a concurrency cap and a
//! bounded wait queue; beyond the queue, calls are rejected with
//! `overloaded` rather than piling up. Transient connect failures are
//! retried with capped exponential backoff.

use crate::client::HttpClient;
use crate::{Result, TransportError};
use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tooling::retry::{retry_with_backoff, BackoffPolicy};
use tracing::debug;

/// Pool limits
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    /// Concurrent in-flight requests per target endpoint
    pub max_per_target: usize,
    /// Requests waiting per target before rejection
    pub queue_depth: usize,
    /// Backoff schedule for reconnect attempts
    pub reconnect: BackoffPolicy,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_per_target: 5,
            queue_depth: 100,
            reconnect: BackoffPolicy::new(3)
                .with_base_delay_ms(200)
                .with_cap_delay_ms(5_000),
        }
    }
}

impl PoolConfig {
    /// Set the per-target concurrency cap
    pub fn with_max_per_target(mut self, max: usize) -> Self {
        self.max_per_target = max;
        self
    }

    /// Set the per-target queue depth
    pub fn with_queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth;
        self
    }
}

struct TargetState {
    permits: Semaphore,
    waiting: AtomicUsize,
}

/// Connection pool shared across shell and orchestrator
pub struct ConnectionPool {
    client: HttpClient,
    config: PoolConfig,
    targets: DashMap<String, Arc<TargetState>>,
}

impl ConnectionPool {
    /// Create a pool over an HTTP client
    pub fn new(client: HttpClient, config: PoolConfig) -> Self {
        Self {
            client,
            config,
            targets: DashMap::new(),
        }
    }

    fn target_state(&self, target: &str) -> Arc<TargetState> {
        self.targets
            .entry(target.to_string())
            .or_insert_with(|| {
                Arc::new(TargetState {
                    permits: Semaphore::new(self.config.max_per_target),
                    waiting: AtomicUsize::new(0),
                })
            })
            .clone()
    }

    /// POST through the pool, respecting the target's concurrency cap
    ///
    /// The target key is the endpoint origin; calls beyond the queue depth
    /// are rejected immediately with `overloaded`.
    pub async fn post(&self, url: &str, body: &Value, deadline: Option<Duration>) -> Result<Value> {
        let target = Self::origin_of(url);
        let state = self.target_state(&target);

        let _permit = match state.permits.try_acquire() {
            Ok(permit) => permit,
            Err(_) => {
                // Capacity exhausted; join the bounded wait queue.
                let waiting = state.waiting.fetch_add(1, Ordering::SeqCst);
                if waiting >= self.config.queue_depth {
                    state.waiting.fetch_sub(1, Ordering::SeqCst);
                    return Err(TransportError::Overloaded(format!(
                        "Queue for {} is full ({} waiting)",
                        target, waiting
                    )));
                }
                let permit = state.permits.acquire().await;
                state.waiting.fetch_sub(1, Ordering::SeqCst);
                permit.map_err(|_| TransportError::Unavailable("Pool shut down".to_string()))?
            }
        };

        debug!(target = %target, "Dispatching pooled request");
        retry_with_backoff(
            &self.config.reconnect,
            "pool_post",
            || self.client.post_json(url, body, deadline),
            |e: &TransportError| {
                // Reconnect only on connection-level failures; a timeout
                // consumed the caller's deadline already.
                matches!(e, TransportError::Unavailable(_) | TransportError::ConnectionReset(_))
            },
        )
        .await
    }

    /// Current number of queued callers for a target (observability)
    pub fn queued(&self, target_url: &str) -> usize {
        let target = Self::origin_of(target_url);
        self.targets
            .get(&target)
            .map(|s| s.waiting.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    fn origin_of(url: &str) -> String {
        // scheme://host:port is enough to key pool state
        match url.find("://") {
            Some(scheme_end) => {
                let rest = &url[scheme_end + 3..];
                let authority_end = rest.find('/').unwrap_or(rest.len());
                url[..scheme_end + 3 + authority_end].to_string()
            }
            None => url.to_string(),
        }
    }
}
