//! Typed HTTP client for the registry
//!
//! Used by every other tekton process (the shell, the orchestrator,
//! components themselves) to register, heartbeat, and resolve over the
//! wire instead of linking the registry in-process.

use crate::component::{ComponentDescriptor, Endpoint};
use crate::health::HeartbeatDirective;
use crate::registry::{RegistrationToken, ResolvedProvider};
use crate::{RegistryError, Result};
use serde_json::json;
use std::collections::HashMap;
use transport::client::HttpClient;
use transport::TransportError;
use uuid::Uuid;

/// Client for a remote service registry
#[derive(Clone)]
pub struct RegistryClient {
    base_url: String,
    http: HttpClient,
}

impl RegistryClient {
    /// Create a client for the registry at `base_url`
    pub fn new(base_url: impl Into<String>, http: HttpClient) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self { base_url, http }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn map_error(e: TransportError) -> RegistryError {
        match e {
            TransportError::Remote { ref code, ref message, .. } => match code.as_str() {
                "not_found" | "unknown" => RegistryError::NotFound(message.clone()),
                "conflict" => RegistryError::Conflict(message.clone()),
                "invalid" => RegistryError::Invalid(message.clone()),
                "stale" => RegistryError::Invalid(message.clone()),
                "overloaded" => RegistryError::Overloaded(message.clone()),
                _ => RegistryError::Transport(e),
            },
            other => RegistryError::Transport(other),
        }
    }

    /// Register a component incarnation
    pub async fn register(
        &self,
        component: &ComponentDescriptor,
        instance_uuid: Uuid,
    ) -> Result<RegistrationToken> {
        let body = json!({"component": component, "instance_uuid": instance_uuid});
        let data = self
            .http
            .post_json(&self.url("/register"), &body, None)
            .await
            .map_err(Self::map_error)?;
        Ok(serde_json::from_value(data)?)
    }

    /// Unregister a component incarnation
    pub async fn unregister(&self, id: &str, instance_uuid: Uuid) -> Result<()> {
        let body = json!({"id": id, "instance_uuid": instance_uuid});
        self.http
            .post_json(&self.url("/unregister"), &body, None)
            .await
            .map_err(Self::map_error)?;
        Ok(())
    }

    /// Send a heartbeat with metric gauges
    pub async fn heartbeat(
        &self,
        id: &str,
        instance_uuid: Uuid,
        metrics: HashMap<String, f64>,
    ) -> Result<HeartbeatDirective> {
        let body = json!({"id": id, "instance_uuid": instance_uuid, "metrics": metrics});
        let data = self
            .http
            .post_json(&self.url("/heartbeat"), &body, None)
            .await
            .map_err(Self::map_error)?;
        let directive = data
            .get("directive")
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        Ok(serde_json::from_value(directive).unwrap_or(HeartbeatDirective::None))
    }

    /// Resolve a component name to endpoints
    pub async fn resolve_name(&self, name: &str) -> Result<Vec<Endpoint>> {
        let data = self
            .http
            .get_json(&self.url("/resolve"), &[("name", name)], None)
            .await
            .map_err(Self::map_error)?;
        let endpoints = data.get("endpoints").cloned().unwrap_or(serde_json::Value::Null);
        Ok(serde_json::from_value(endpoints)?)
    }

    /// Resolve a capability to an ordered provider list
    pub async fn resolve_capability(&self, capability: &str) -> Result<Vec<ResolvedProvider>> {
        let data = self
            .http
            .get_json(&self.url("/resolve"), &[("capability", capability)], None)
            .await
            .map_err(Self::map_error)?;
        let providers = data.get("providers").cloned().unwrap_or(serde_json::Value::Null);
        Ok(serde_json::from_value(providers)?)
    }
}
