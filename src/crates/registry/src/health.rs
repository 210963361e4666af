//! Heartbeat ledger and health classification
//!
//! Components send heartbeats on a fixed interval; the registry classifies
//! each by elapsed time since the last one: `healthy < T1`,
//! `degraded ∈ [T1, T2)`, `failed ≥ T2`. All deadlines are measured on the
//! registry's monotonic clock.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tooling::config::HeartbeatConfig;

/// Health class derived from heartbeat recency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthClass {
    /// Heartbeats arriving on schedule
    Healthy,
    /// Heartbeats missing beyond T1 but under T2
    Degraded,
    /// Heartbeat deadline T2 exceeded
    Failed,
}

impl std::fmt::Display for HealthClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Classify elapsed time since the last heartbeat
///
/// The T1 boundary itself classifies as degraded and the T2 boundary as
/// failed.
pub fn classify(elapsed: Duration, config: &HeartbeatConfig) -> HealthClass {
    if elapsed >= config.t2() {
        HealthClass::Failed
    } else if elapsed >= config.t1() {
        HealthClass::Degraded
    } else {
        HealthClass::Healthy
    }
}

/// Directive returned to a component with a heartbeat acknowledgement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeartbeatDirective {
    /// Keep going
    None,
    /// Stop accepting new work and finish what is in flight
    Drain,
}

/// Per-component heartbeat bookkeeping on the monotonic clock
#[derive(Debug, Default)]
pub struct HeartbeatLedger {
    last_seen: HashMap<String, Instant>,
    consecutive_healthy: HashMap<String, u32>,
    drain_requested: HashMap<String, bool>,
}

impl HeartbeatLedger {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a heartbeat arrival
    ///
    /// Returns the number of consecutive heartbeats that arrived while the
    /// component was healthy at classification time, used for
    /// degraded-to-ready recovery.
    pub fn record(&mut self, id: &str, now: Instant, was_healthy: bool) -> u32 {
        self.last_seen.insert(id.to_string(), now);
        let counter = self.consecutive_healthy.entry(id.to_string()).or_insert(0);
        if was_healthy {
            *counter += 1;
        } else {
            *counter = 1;
        }
        *counter
    }

    /// Elapsed time since the component's last heartbeat
    pub fn elapsed(&self, id: &str, now: Instant) -> Option<Duration> {
        self.last_seen.get(id).map(|seen| now.duration_since(*seen))
    }

    /// Classify a component right now; `None` when it never heartbeated
    pub fn classify(&self, id: &str, now: Instant, config: &HeartbeatConfig) -> Option<HealthClass> {
        self.elapsed(id, now).map(|elapsed| classify(elapsed, config))
    }

    /// Reset bookkeeping for a component (on unregister or failure)
    pub fn forget(&mut self, id: &str) {
        self.last_seen.remove(id);
        self.consecutive_healthy.remove(id);
        self.drain_requested.remove(id);
    }

    /// Reset the recovery counter (on degradation)
    pub fn reset_recovery(&mut self, id: &str) {
        self.consecutive_healthy.insert(id.to_string(), 0);
    }

    /// Ask the component to drain on its next heartbeat
    pub fn request_drain(&mut self, id: &str) {
        self.drain_requested.insert(id.to_string(), true);
    }

    /// Consume a pending drain directive
    pub fn take_directive(&mut self, id: &str) -> HeartbeatDirective {
        if self.drain_requested.remove(id).unwrap_or(false) {
            HeartbeatDirective::Drain
        } else {
            HeartbeatDirective::None
        }
    }
}
