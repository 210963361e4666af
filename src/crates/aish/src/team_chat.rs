//! Team chat: greek-chorus fan-out
//!
//! Broadcasts a message to every greek-chorus CI in parallel through the
//! shared connection pool. Each target gets its own timeout; tardy
//! responders are marked `timeout` but are not failed at the registry
//! level. Results arrive in completion order.

use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use transport::pool::ConnectionPool;
use transport::TransportError;

/// Per-target outcome of a team-chat broadcast
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ChatOutcome {
    /// The CI replied
    Replied {
        /// Reply payload
        reply: Value,
    },
    /// The per-target timeout elapsed
    Timeout,
    /// The call failed outright
    Failed {
        /// Error code
        code: String,
        /// Error message
        message: String,
    },
}

/// One target's result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResult {
    /// CI name
    pub ci: String,
    /// What happened
    pub outcome: ChatOutcome,
    /// Round-trip time observed
    pub elapsed_ms: u64,
}

/// Broadcast a message to all targets in parallel
///
/// `targets` pairs each CI name with its resolved URL. Results are
/// collected in arrival order.
pub async fn broadcast(
    pool: Arc<ConnectionPool>,
    targets: Vec<(String, String)>,
    sender: &str,
    message: &str,
    per_target_timeout: Duration,
) -> Vec<ChatResult> {
    let body = json!({
        "message": message,
        "sender": sender,
        "purpose": "team-chat",
    });

    let mut in_flight: FuturesUnordered<_> = targets
        .into_iter()
        .map(|(ci, url)| {
            let pool = pool.clone();
            let body = body.clone();
            async move {
                let started = Instant::now();
                let outcome =
                    match tokio::time::timeout(per_target_timeout, pool.post(&url, &body, Some(per_target_timeout)))
                        .await
                    {
                        Ok(Ok(reply)) => ChatOutcome::Replied { reply },
                        Ok(Err(TransportError::Timeout(_))) | Err(_) => ChatOutcome::Timeout,
                        Ok(Err(e)) => ChatOutcome::Failed {
                            code: e.code().to_string(),
                            message: e.to_string(),
                        },
                    };
                ChatResult {
                    ci,
                    outcome,
                    elapsed_ms: started.elapsed().as_millis() as u64,
                }
            }
        })
        .collect();

    let mut results = Vec::new();
    while let Some(result) = in_flight.next().await {
        results.push(result);
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use transport::client::{ClientConfig, HttpClient};
    use transport::pool::PoolConfig;

    #[tokio::test]
    async fn test_unreachable_targets_report_individually() {
        let pool = Arc::new(ConnectionPool::new(
            HttpClient::new(ClientConfig::default()).unwrap(),
            PoolConfig::default(),
        ));

        // TEST-NET addresses; connects fail fast or time out per target.
        let targets = vec![
            ("metis".to_string(), "http://192.0.2.1:1/message".to_string()),
            ("athena".to_string(), "http://192.0.2.2:1/message".to_string()),
        ];

        let results = broadcast(
            pool,
            targets,
            "term-a",
            "standup in five",
            Duration::from_millis(300),
        )
        .await;

        assert_eq!(results.len(), 2);
        for result in &results {
            assert!(matches!(
                result.outcome,
                ChatOutcome::Timeout | ChatOutcome::Failed { .. }
            ));
        }
    }

    #[tokio::test]
    async fn test_empty_target_list() {
        let pool = Arc::new(ConnectionPool::new(
            HttpClient::new(ClientConfig::default()).unwrap(),
            PoolConfig::default(),
        ));
        let results = broadcast(pool, vec![], "term-a", "anyone?", Duration::from_secs(2)).await;
        assert!(results.is_empty());
    }
}
