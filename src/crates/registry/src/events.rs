//! Lifecycle event stream for observers
//!
//! Every registration, readiness change, degradation, and failure is
//! published to subscribers. Operators and supervising CIs consume the
//! stream over `GET /events`.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A registry lifecycle event
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RegistryEvent {
    /// A component registered a new incarnation
    Registered {
        id: String,
        instance_uuid: Uuid,
        timestamp: i64,
    },
    /// A component satisfied readiness and became ready
    Ready {
        id: String,
        timestamp: i64,
    },
    /// A component degraded (missed heartbeats or self-report)
    Degraded {
        id: String,
        reason: String,
        timestamp: i64,
    },
    /// A component recovered from degraded back to ready
    Recovered {
        id: String,
        timestamp: i64,
    },
    /// A component failed
    Failed {
        id: String,
        reason: String,
        timestamp: i64,
    },
    /// A component unregistered cleanly
    Unregistered {
        id: String,
        timestamp: i64,
    },
}

impl RegistryEvent {
    /// Create a Registered event
    pub fn registered(id: impl Into<String>, instance_uuid: Uuid) -> Self {
        Self::Registered {
            id: id.into(),
            instance_uuid,
            timestamp: Utc::now().timestamp(),
        }
    }

    /// Create a Ready event
    pub fn ready(id: impl Into<String>) -> Self {
        Self::Ready {
            id: id.into(),
            timestamp: Utc::now().timestamp(),
        }
    }

    /// Create a Degraded event
    pub fn degraded(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Degraded {
            id: id.into(),
            reason: reason.into(),
            timestamp: Utc::now().timestamp(),
        }
    }

    /// Create a Recovered event
    pub fn recovered(id: impl Into<String>) -> Self {
        Self::Recovered {
            id: id.into(),
            timestamp: Utc::now().timestamp(),
        }
    }

    /// Create a Failed event
    pub fn failed(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Failed {
            id: id.into(),
            reason: reason.into(),
            timestamp: Utc::now().timestamp(),
        }
    }

    /// Create an Unregistered event
    pub fn unregistered(id: impl Into<String>) -> Self {
        Self::Unregistered {
            id: id.into(),
            timestamp: Utc::now().timestamp(),
        }
    }

    /// Component the event concerns
    pub fn component_id(&self) -> &str {
        match self {
            Self::Registered { id, .. }
            | Self::Ready { id, .. }
            | Self::Degraded { id, .. }
            | Self::Recovered { id, .. }
            | Self::Failed { id, .. }
            | Self::Unregistered { id, .. } => id,
        }
    }

    /// Event timestamp (unix seconds)
    pub fn timestamp(&self) -> i64 {
        match self {
            Self::Registered { timestamp, .. }
            | Self::Ready { timestamp, .. }
            | Self::Degraded { timestamp, .. }
            | Self::Recovered { timestamp, .. }
            | Self::Failed { timestamp, .. }
            | Self::Unregistered { timestamp, .. } => *timestamp,
        }
    }

    /// Human-readable event description for operator logs
    pub fn description(&self) -> String {
        match self {
            Self::Registered { id, instance_uuid, .. } => {
                format!("Component registered: {} (instance {})", id, instance_uuid)
            }
            Self::Ready { id, .. } => format!("Component ready: {}", id),
            Self::Degraded { id, reason, .. } => format!("Component degraded: {} - {}", id, reason),
            Self::Recovered { id, .. } => format!("Component recovered: {}", id),
            Self::Failed { id, reason, .. } => format!("Component failed: {} - {}", id, reason),
            Self::Unregistered { id, .. } => format!("Component unregistered: {}", id),
        }
    }
}
