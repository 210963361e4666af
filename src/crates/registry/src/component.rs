//! Component descriptors and the lifecycle state machine

use crate::{RegistryError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// What kind of participant a component is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ComponentKind {
    /// Long-lived platform service
    Service,
    /// CI worker process
    CiWorker,
    /// Interactive terminal session
    Terminal,
    /// UI hosting process
    UiHost,
}

impl std::fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Service => write!(f, "service"),
            Self::CiWorker => write!(f, "ci-worker"),
            Self::Terminal => write!(f, "terminal"),
            Self::UiHost => write!(f, "ui-host"),
        }
    }
}

/// A transport endpoint a component accepts traffic on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// URL scheme (`http`, `ws`)
    pub scheme: String,
    /// Host name or address
    pub host: String,
    /// TCP port
    pub port: u16,
    /// Path prefix
    #[serde(default = "default_path")]
    pub path: String,
}

fn default_path() -> String {
    "/".to_string()
}

impl Endpoint {
    /// Create an HTTP endpoint
    pub fn http(host: impl Into<String>, port: u16, path: impl Into<String>) -> Self {
        Self {
            scheme: "http".to_string(),
            host: host.into(),
            port,
            path: path.into(),
        }
    }

    /// Render as a URL string
    pub fn url(&self) -> String {
        let path = if self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        };
        format!("{}://{}:{}{}", self.scheme, self.host, self.port, path)
    }
}

/// Lifecycle state of a registered component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentState {
    /// Not currently registered
    Unregistered,
    /// Registration record being created
    Registering,
    /// Registered, readiness conditions not yet satisfied
    Initializing,
    /// Fully operational
    Ready,
    /// Operational but missing heartbeats or self-reported degraded
    Degraded,
    /// Heartbeat deadline exceeded or explicit failure
    Failed,
}

impl ComponentState {
    /// Whether the state machine permits this transition
    ///
    /// Any state may move to `Failed`; recovery from `Failed` goes through
    /// re-registration with a fresh instance uuid.
    pub fn can_transition(self, to: ComponentState) -> bool {
        use ComponentState::*;
        if to == Failed {
            return self != Unregistered;
        }
        matches!(
            (self, to),
            (Unregistered, Registering)
                | (Registering, Initializing)
                | (Initializing, Ready)
                | (Ready, Degraded)
                | (Degraded, Ready)
                | (Failed, Initializing)
                | (Ready, Unregistered)
                | (Degraded, Unregistered)
                | (Initializing, Unregistered)
                | (Failed, Unregistered)
        )
    }

    /// Whether a component in this state can serve traffic
    pub fn is_live(self) -> bool {
        matches!(self, ComponentState::Ready | ComponentState::Degraded)
    }

    /// Ordering weight used by resolution (ready outranks degraded)
    pub fn routing_priority(self) -> u8 {
        match self {
            ComponentState::Ready => 2,
            ComponentState::Degraded => 1,
            _ => 0,
        }
    }
}

impl std::fmt::Display for ComponentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Unregistered => "unregistered",
            Self::Registering => "registering",
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::Degraded => "degraded",
            Self::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// What a component submits when registering
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentDescriptor {
    /// Stable lower-case slug
    pub id: String,
    /// Display name
    pub name: String,
    /// Component kind
    pub kind: ComponentKind,
    /// Version string (dotted numerics compare highest-first on resolve)
    #[serde(default = "default_version")]
    pub version: String,
    /// Declared capabilities, `name` or `name@level`
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Endpoints accepting traffic
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
    /// Component ids required before this one can become ready
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Free-form metadata
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

fn default_version() -> String {
    "0.1.0".to_string()
}

/// A registered component
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Component {
    /// Stable lower-case slug
    pub id: String,
    /// Display name
    pub name: String,
    /// Component kind
    pub kind: ComponentKind,
    /// Version string
    pub version: String,
    /// Declared capability strings
    pub capabilities: Vec<String>,
    /// Endpoints accepting traffic
    pub endpoints: Vec<Endpoint>,
    /// Component ids required before this one can become ready
    pub dependencies: Vec<String>,
    /// Lifecycle state
    pub state: ComponentState,
    /// Identifier for this incarnation; regenerated on every start
    pub instance_uuid: Uuid,
    /// When the current incarnation registered
    pub registered_at: DateTime<Utc>,
    /// When the component last became ready, if ever
    pub ready_at: Option<DateTime<Utc>>,
    /// Wall-clock time of the last accepted heartbeat
    pub last_heartbeat: Option<DateTime<Utc>>,
    /// Latest metric gauges reported with heartbeats
    pub gauges: HashMap<String, f64>,
    /// Free-form metadata
    pub metadata: HashMap<String, String>,
}

impl Component {
    /// Build a component record from a descriptor and instance uuid
    pub fn from_descriptor(descriptor: ComponentDescriptor, instance_uuid: Uuid) -> Self {
        Self {
            id: descriptor.id,
            name: descriptor.name,
            kind: descriptor.kind,
            version: descriptor.version,
            capabilities: descriptor.capabilities,
            endpoints: descriptor.endpoints,
            dependencies: descriptor.dependencies,
            state: ComponentState::Registering,
            instance_uuid,
            registered_at: Utc::now(),
            ready_at: None,
            last_heartbeat: None,
            gauges: HashMap::new(),
            metadata: descriptor.metadata,
        }
    }

    /// Apply a state transition, enforcing the machine
    pub fn transition(&mut self, to: ComponentState) -> Result<()> {
        if !self.state.can_transition(to) {
            return Err(RegistryError::Invalid(format!(
                "Component {} cannot move from {} to {}",
                self.id, self.state, to
            )));
        }
        if to == ComponentState::Ready {
            self.ready_at = Some(Utc::now());
        }
        self.state = to;
        Ok(())
    }

    /// Reject operations presented with a superseded instance uuid
    pub fn check_instance(&self, instance_uuid: Uuid) -> Result<()> {
        if self.instance_uuid != instance_uuid {
            return Err(RegistryError::Stale {
                id: self.id.clone(),
                instance_uuid,
            });
        }
        Ok(())
    }
}

/// Compare dotted-numeric version strings, highest first on resolve
pub fn compare_versions(a: &str, b: &str) -> std::cmp::Ordering {
    let parse = |v: &str| -> Vec<u64> {
        v.split('.')
            .map(|part| {
                part.chars()
                    .take_while(|c| c.is_ascii_digit())
                    .collect::<String>()
                    .parse()
                    .unwrap_or(0)
            })
            .collect()
    };
    parse(a).cmp(&parse(b))
}
