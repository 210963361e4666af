//! Deadline-aware JSON HTTP client
//!
//! Thin wrapper over `reqwest` that maps transport failures onto the
//! `TransportError` taxonomy and unwraps the uniform `{ok,data,error}`
//! response body.

use crate::envelope::ApiResponse;
use crate::{Result, TransportError};
use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;

/// HTTP client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Default per-call deadline
    pub deadline: Duration,
    /// TCP keepalive probe interval for pooled connections
    pub keepalive: Duration,
    /// How long idle connections stay pooled
    pub pool_idle_timeout: Duration,
    /// User agent header
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(30),
            keepalive: Duration::from_secs(30),
            pool_idle_timeout: Duration::from_secs(90),
            user_agent: format!("tekton/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl ClientConfig {
    /// Set the default deadline
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Set the keepalive interval
    pub fn with_keepalive(mut self, keepalive: Duration) -> Self {
        self.keepalive = keepalive;
        self
    }
}

/// JSON request/response client with persistent connections
#[derive(Clone)]
pub struct HttpClient {
    config: ClientConfig,
    client: reqwest::Client,
}

impl HttpClient {
    /// Build a client from configuration
    pub fn new(config: ClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .tcp_keepalive(config.keepalive)
            .pool_idle_timeout(config.pool_idle_timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| TransportError::Unavailable(format!("Failed to build client: {}", e)))?;
        Ok(Self { config, client })
    }

    /// The configured default deadline
    pub fn default_deadline(&self) -> Duration {
        self.config.deadline
    }

    /// POST a JSON body and unwrap the uniform response envelope
    ///
    /// `deadline` overrides the configured default when provided.
    pub async fn post_json(&self, url: &str, body: &Value, deadline: Option<Duration>) -> Result<Value> {
        let deadline = deadline.unwrap_or(self.config.deadline);
        let response = self
            .client
            .post(url)
            .json(body)
            .timeout(deadline)
            .send()
            .await
            .map_err(|e| Self::map_reqwest_error(e, deadline))?;
        Self::unwrap_response(response).await
    }

    /// GET with query parameters and unwrap the uniform response envelope
    pub async fn get_json(
        &self,
        url: &str,
        query: &[(&str, &str)],
        deadline: Option<Duration>,
    ) -> Result<Value> {
        let deadline = deadline.unwrap_or(self.config.deadline);
        let response = self
            .client
            .get(url)
            .query(query)
            .timeout(deadline)
            .send()
            .await
            .map_err(|e| Self::map_reqwest_error(e, deadline))?;
        Self::unwrap_response(response).await
    }

    /// GET returning the raw response, for event streams
    pub async fn get_stream(&self, url: &str) -> Result<reqwest::Response> {
        self.client
            .get(url)
            .send()
            .await
            .map_err(|e| Self::map_reqwest_error(e, self.config.deadline))
    }

    async fn unwrap_response(response: reqwest::Response) -> Result<Value> {
        let status = response.status();
        if status == StatusCode::SERVICE_UNAVAILABLE {
            return Err(TransportError::Overloaded(format!("Peer returned {}", status)));
        }

        let body: ApiResponse = response
            .json()
            .await
            .map_err(|e| TransportError::Protocol(format!("Non-envelope response body: {}", e)))?;
        body.into_result()
    }

    fn map_reqwest_error(e: reqwest::Error, deadline: Duration) -> TransportError {
        if e.is_timeout() {
            TransportError::Timeout(deadline.as_millis() as u64)
        } else if e.is_connect() {
            TransportError::Unavailable(e.to_string())
        } else if e.is_request() || e.is_body() {
            TransportError::ConnectionReset(e.to_string())
        } else {
            TransportError::Unavailable(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.deadline, Duration::from_secs(30));
        assert!(config.user_agent.starts_with("tekton/"));
    }

    #[tokio::test]
    async fn test_unreachable_target_is_unavailable() {
        let client = HttpClient::new(ClientConfig::default().with_deadline(Duration::from_millis(500)))
            .unwrap();
        // Reserved TEST-NET address; nothing listens there.
        let err = client
            .post_json("http://192.0.2.1:1/ping", &serde_json::json!({}), None)
            .await
            .unwrap_err();
        assert!(err.is_retryable(), "expected retryable transport error, got {:?}", err);
    }
}
