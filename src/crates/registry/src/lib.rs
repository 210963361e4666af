//! Service registry and routing fabric
//!
//! Authoritative source of truth for which components exist, where they
//! are reachable, whether they are healthy, and which capabilities they
//! provide. The registry publishes endpoints and never proxies traffic:
//! callers resolve a name or capability and open their own connection.
//!
//! Module layout:
//!
//! - `component` - descriptors, endpoints, and the lifecycle state machine
//! - `health` - heartbeat ledger and T1/T2 classification
//! - `capability` - capability table, fallback bindings, ordered resolution
//! - `readiness` - readiness conditions and dependency ordering
//! - `registry` - the `ServiceRegistry` write boundary
//! - `events` - lifecycle event stream for observers
//! - `snapshot` - periodic durable snapshots
//! - `monitor` - background health sweep
//! - `api` - HTTP surface (axum)
//! - `client` - typed client used by other tekton processes

pub mod api;
pub mod capability;
pub mod client;
pub mod component;
pub mod events;
pub mod health;
pub mod monitor;
pub mod readiness;
pub mod registry;
pub mod snapshot;

pub use capability::{Capability, FallbackBinding, FallbackOutcome};
pub use component::{Component, ComponentDescriptor, ComponentKind, ComponentState, Endpoint};
pub use events::RegistryEvent;
pub use health::{HealthClass, HeartbeatDirective};
pub use registry::{ServiceRegistry, RegistrationToken};

use thiserror::Error;

/// Errors surfaced by registry operations
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Descriptor failed schema or identifier validation
    #[error("Invalid registration: {0}")]
    Invalid(String),

    /// No component or capability matched the query
    #[error("Not found: {0}")]
    NotFound(String),

    /// A live instance already holds this id
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Operation referred to a superseded instance uuid
    #[error("Stale instance uuid {instance_uuid} for component {id}")]
    Stale {
        /// Component id
        id: String,
        /// The stale uuid presented by the caller
        instance_uuid: uuid::Uuid,
    },

    /// Heartbeat or signal for a component that was never registered
    #[error("Unknown component: {0}")]
    Unknown(String),

    /// Primary and every fallback provider failed
    #[error("No fallback available for capability {0}")]
    NoFallbackAvailable(String),

    /// Declared dependencies form a cycle
    #[error("Dependency cycle: {}", .0.join(" -> "))]
    DependencyCycle(Vec<String>),

    /// Intake queue is full
    #[error("Overloaded: {0}")]
    Overloaded(String),

    /// Transport failure while invoking a provider
    #[error(transparent)]
    Transport(#[from] transport::TransportError),

    /// Persistence or configuration failure
    #[error(transparent)]
    Tooling(#[from] tooling::ToolingError),

    /// Serialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RegistryError {
    /// Stable wire code for the error body
    pub fn code(&self) -> &'static str {
        match self {
            RegistryError::Invalid(_) => "invalid",
            RegistryError::NotFound(_) => "not_found",
            RegistryError::Conflict(_) => "conflict",
            RegistryError::Stale { .. } => "stale",
            RegistryError::Unknown(_) => "unknown",
            RegistryError::NoFallbackAvailable(_) => "no_fallback_available",
            RegistryError::DependencyCycle(_) => "invalid",
            RegistryError::Overloaded(_) => "overloaded",
            RegistryError::Transport(_) => "unavailable",
            RegistryError::Tooling(_) => "persistence-failure",
            RegistryError::Serialization(_) => "invalid",
        }
    }
}

/// Result type for registry operations
pub type Result<T> = std::result::Result<T, RegistryError>;
