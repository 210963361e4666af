//! Task dispatch
//!
//! The engine dispatches task actions through a pluggable `TaskDispatcher`
//! so that tests can script component behavior. The production dispatcher
//! resolves the component through the service registry and posts over the
//! shared connection pool with a per-call deadline.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use transport::pool::ConnectionPool;
use transport::TransportError;

/// One task dispatch
#[derive(Debug, Clone)]
pub struct TaskInvocation {
    /// Execution the task belongs to
    pub execution_id: String,
    /// Task id
    pub task_id: String,
    /// Target component
    pub component: String,
    /// Action on the component
    pub action: String,
    /// Fully substituted input
    pub input: Value,
    /// Per-dispatch deadline
    pub deadline: Duration,
}

/// Why a dispatch failed
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Transport-class failure; always retryable
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The component returned a task-level error
    #[error("Task error: {message}")]
    Task {
        /// Error message from the component
        message: String,
        /// Whether the component flagged the error retryable
        retryable: bool,
    },
}

impl DispatchError {
    /// Whether the retry policy may try again
    pub fn is_retryable(&self) -> bool {
        match self {
            DispatchError::Transport(e) => e.is_retryable(),
            DispatchError::Task { retryable, .. } => *retryable,
        }
    }
}

/// Dispatches task actions to components
#[async_trait]
pub trait TaskDispatcher: Send + Sync {
    /// Execute one attempt of a task action
    async fn dispatch(&self, invocation: &TaskInvocation) -> std::result::Result<Value, DispatchError>;
}

/// Resolves a component id to a base URL (the service registry in
/// production; scripted in tests)
#[async_trait]
pub trait ComponentResolver: Send + Sync {
    /// Resolve a component to a base URL
    async fn resolve(&self, component: &str) -> std::result::Result<String, DispatchError>;
}

/// `ComponentResolver` backed by the service registry client
pub struct RegistryResolver {
    client: registry::client::RegistryClient,
}

impl RegistryResolver {
    /// Wrap a registry client
    pub fn new(client: registry::client::RegistryClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ComponentResolver for RegistryResolver {
    async fn resolve(&self, component: &str) -> std::result::Result<String, DispatchError> {
        let endpoints = self.client.resolve_name(component).await.map_err(|e| match e {
            registry::RegistryError::Transport(t) => DispatchError::Transport(t),
            other => DispatchError::Transport(TransportError::Unavailable(other.to_string())),
        })?;
        endpoints
            .first()
            .map(|endpoint| endpoint.url())
            .ok_or_else(|| {
                DispatchError::Transport(TransportError::Unavailable(format!(
                    "{} has no live endpoints",
                    component
                )))
            })
    }
}

/// Production dispatcher: resolve, then POST the action envelope
pub struct HttpDispatcher {
    resolver: Arc<dyn ComponentResolver>,
    pool: Arc<ConnectionPool>,
}

impl HttpDispatcher {
    /// Create a dispatcher over a resolver and the shared pool
    pub fn new(resolver: Arc<dyn ComponentResolver>, pool: Arc<ConnectionPool>) -> Self {
        Self { resolver, pool }
    }
}

#[async_trait]
impl TaskDispatcher for HttpDispatcher {
    async fn dispatch(&self, invocation: &TaskInvocation) -> std::result::Result<Value, DispatchError> {
        let base = self.resolver.resolve(&invocation.component).await?;
        let url = format!("{}{}", base.trim_end_matches('/'), format_action_path(&invocation.action));
        let body = json!({
            "action": invocation.action,
            "input": invocation.input,
            "execution_id": invocation.execution_id,
            "task_id": invocation.task_id,
        });

        match self.pool.post(&url, &body, Some(invocation.deadline)).await {
            Ok(output) => Ok(output),
            Err(TransportError::Remote { code, message, details }) => {
                // The component answered with a structured task error; honor
                // its explicit retryable flag.
                let retryable = details
                    .as_ref()
                    .and_then(|d| d.get("retryable"))
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                Err(DispatchError::Task {
                    message: format!("{}: {}", code, message),
                    retryable,
                })
            }
            Err(e) => Err(DispatchError::Transport(e)),
        }
    }
}

fn format_action_path(action: &str) -> String {
    if action.starts_with('/') {
        action.to_string()
    } else {
        format!("/{}", action)
    }
}
