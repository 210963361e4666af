//! CI name resolution
//!
//! Given a CI name, the registry decides where its messages go: a forward
//! target's terminal, a directly declared endpoint, or the endpoint of the
//! owning component resolved through the service registry. Reserved
//! command words never reach this layer.

use crate::ci::{CiEntry, CiKind};
use crate::forward::ForwardTable;
use crate::terminal::TerminalRegistry;
use crate::{AishError, Result};
use async_trait::async_trait;
use registry::component::Endpoint;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tooling::persistence::{get_typed, put_typed, KvStore};
use tracing::warn;

/// Storage key for the persisted CI registry
pub const CI_REGISTRY_KEY: &str = "ci_registry.json";

/// Resolves a component name to endpoints (the service registry, on the
/// wire in production and scripted in tests)
#[async_trait]
pub trait EndpointResolver: Send + Sync {
    /// Resolve a name to its live endpoints
    async fn resolve_endpoints(&self, name: &str) -> Result<Vec<Endpoint>>;
}

/// Where a resolved message should be delivered
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedTarget {
    /// Deliver into a terminal's mailboxes
    Terminal {
        /// Session id of the receiving terminal
        terminal_id: String,
        /// Whether the forward asked for the JSON envelope
        json: bool,
        /// Whether a forward produced this target
        forwarded: bool,
    },
    /// POST to an endpoint
    Endpoint {
        /// Target URL
        url: String,
    },
}

/// The CI registry: entries plus the forwarding table
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct CiRegistry {
    entries: HashMap<String, CiEntry>,
    /// Persistent forwarding rules
    pub forwards: ForwardTable,
}

impl CiRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a CI entry
    pub fn upsert(&mut self, entry: CiEntry) {
        self.entries.insert(entry.ci_name.clone(), entry);
    }

    /// Remove a CI entry
    pub fn remove(&mut self, ci_name: &str) -> Option<CiEntry> {
        self.entries.remove(ci_name)
    }

    /// Fetch an entry
    pub fn get(&self, ci_name: &str) -> Option<&CiEntry> {
        self.entries.get(ci_name)
    }

    /// All entries, sorted by name
    pub fn list(&self) -> Vec<&CiEntry> {
        let mut entries: Vec<&CiEntry> = self.entries.values().collect();
        entries.sort_by_key(|entry| entry.ci_name.as_str());
        entries
    }

    /// All greek-chorus CIs (the team-chat audience)
    pub fn greek_chorus(&self) -> Vec<&CiEntry> {
        self.list()
            .into_iter()
            .filter(|entry| entry.kind == CiKind::GreekChorus)
            .collect()
    }

    /// Resolve a CI name to a delivery target
    ///
    /// Forwards win first; a forward whose terminal has exited is
    /// invalidated with a warning and resolution falls through to the
    /// entry itself.
    pub async fn resolve(
        &mut self,
        ci_name: &str,
        terminals: &TerminalRegistry,
        resolver: &dyn EndpointResolver,
    ) -> Result<ResolvedTarget> {
        if let Some(rule) = self.forwards.get(ci_name) {
            match terminals.find_id(&rule.terminal_id) {
                Some(terminal_id) => {
                    return Ok(ResolvedTarget::Terminal {
                        terminal_id,
                        json: rule.json,
                        forwarded: true,
                    })
                }
                None => {
                    warn!(
                        ci = ci_name,
                        terminal = %rule.terminal_id,
                        "Forward target no longer exists; invalidating rule"
                    );
                    self.forwards.invalidate(ci_name);
                }
            }
        }

        let entry = self
            .entries
            .get(ci_name)
            .ok_or_else(|| AishError::UnknownCi(ci_name.to_string()))?;

        if entry.kind == CiKind::Terminal {
            let terminal_id = terminals
                .find_id(ci_name)
                .ok_or_else(|| AishError::UnknownTerminal(ci_name.to_string()))?;
            return Ok(ResolvedTarget::Terminal {
                terminal_id,
                json: false,
                forwarded: false,
            });
        }

        if let Some(endpoint) = &entry.endpoint {
            return Ok(ResolvedTarget::Endpoint {
                url: endpoint.url(),
            });
        }

        let component = entry.component.as_deref().unwrap_or(ci_name);
        let endpoints = resolver.resolve_endpoints(component).await?;
        let endpoint = endpoints
            .first()
            .ok_or_else(|| AishError::Resolution(format!("{} has no live endpoints", component)))?;
        Ok(ResolvedTarget::Endpoint {
            url: endpoint.url(),
        })
    }

    /// Create a forward; the target terminal must exist
    pub fn set_forward(
        &mut self,
        ci_name: &str,
        terminal: &str,
        json: bool,
        terminals: &TerminalRegistry,
    ) -> Result<()> {
        if !terminals.exists(terminal) {
            return Err(AishError::UnknownTerminal(terminal.to_string()));
        }
        self.forwards.set(ci_name, terminal, json)
    }

    /// Persist entries and forwards
    pub async fn save(&self, store: &dyn KvStore) -> Result<()> {
        put_typed(store, CI_REGISTRY_KEY, self).await?;
        Ok(())
    }

    /// Load a previously persisted registry
    pub async fn load(store: &dyn KvStore) -> Result<Option<Self>> {
        Ok(get_typed(store, CI_REGISTRY_KEY).await?)
    }
}

/// `EndpointResolver` backed by the service registry over HTTP
pub struct ServiceEndpointResolver {
    client: registry::client::RegistryClient,
}

impl ServiceEndpointResolver {
    /// Wrap a registry client
    pub fn new(client: registry::client::RegistryClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl EndpointResolver for ServiceEndpointResolver {
    async fn resolve_endpoints(&self, name: &str) -> Result<Vec<Endpoint>> {
        self.client.resolve_name(name).await.map_err(|e| match e {
            registry::RegistryError::NotFound(msg) => AishError::Resolution(msg),
            registry::RegistryError::Transport(t) => AishError::Transport(t),
            other => AishError::Resolution(other.to_string()),
        })
    }
}
