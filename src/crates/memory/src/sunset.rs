//! The sunset/sunrise protocol
//!
//! When a CI approaches context exhaustion it is drained: a
//! `SUNSET_PROTOCOL` system prompt asks it to summarize its essential
//! working state, the response is captured as sunrise context, and the CI
//! sleeps. A later sunrise command re-injects the captured context plus a
//! delta of what happened while it rested. Sunrise is idempotent; a
//! sleeping CI rejects normal turns with `ci_asleep`.

use crate::{MemoryError, Result};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::info;

/// The system prompt emitted to begin a sunset
pub const SUNSET_PROMPT: &str = "SUNSET_PROTOCOL: You are approaching your context limit. \
Summarize your essential working state: active tasks, key decisions, open questions, \
and anything your future self must know. Keep it under 300 words.";

/// Where a CI sits in the sunset lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SunsetState {
    /// Taking normal turns
    Awake,
    /// The sunset prompt has been emitted; awaiting the drain response
    SunsetPending,
    /// Drained; rejecting normal turns until sunrise
    Sunset,
}

/// Auto-detection configuration
///
/// Outputs matching any signature promote the CI to sunset even without a
/// preceding trigger. The active list is logged at startup so deployments
/// can audit it.
#[derive(Debug, Clone)]
pub struct SunsetConfig {
    signatures: Vec<Regex>,
}

impl Default for SunsetConfig {
    fn default() -> Self {
        Self {
            signatures: vec![Regex::new(r"\bSUNSET_PROTOCOL\b").expect("static pattern compiles")],
        }
    }
}

impl SunsetConfig {
    /// Add a detection signature
    pub fn with_signature(mut self, pattern: &str) -> std::result::Result<Self, regex::Error> {
        self.signatures.push(Regex::new(pattern)?);
        Ok(self)
    }

    /// Whether a CI output matches a sunset signature
    pub fn matches(&self, output: &str) -> bool {
        self.signatures.iter().any(|re| re.is_match(output))
    }

    /// Log the active signature list
    pub fn log_active(&self) {
        let patterns: Vec<&str> = self.signatures.iter().map(|re| re.as_str()).collect();
        info!(signatures = ?patterns, "Sunset auto-detection signatures active");
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CiSunsetRecord {
    state: SunsetState,
    sunrise_context: Option<String>,
    sunset_at: Option<DateTime<Utc>>,
    advisory_flag: bool,
}

impl Default for CiSunsetRecord {
    fn default() -> Self {
        Self {
            state: SunsetState::Awake,
            sunrise_context: None,
            sunset_at: None,
            advisory_flag: false,
        }
    }
}

/// What the caller must do for the CI's next turn
#[derive(Debug, Clone, PartialEq)]
pub enum TurnGate {
    /// Proceed with a normal turn
    Normal,
    /// Emit the sunset prompt instead of the user message
    EmitSunsetPrompt,
}

/// The restored state handed back at sunrise
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SunriseRestore {
    /// Captured sunrise context, injected as a leading system message
    pub context: String,
    /// When the CI went to sleep
    pub sunset_at: DateTime<Utc>,
}

/// Sunset lifecycle tracker for all CIs
#[derive(Debug, Default)]
pub struct SunsetTracker {
    records: HashMap<String, CiSunsetRecord>,
    config: SunsetConfig,
}

impl SunsetTracker {
    /// Create a tracker with the given detection config
    pub fn new(config: SunsetConfig) -> Self {
        config.log_active();
        Self {
            records: HashMap::new(),
            config,
        }
    }

    fn record_mut(&mut self, ci: &str) -> &mut CiSunsetRecord {
        self.records.entry(ci.to_string()).or_default()
    }

    /// Whether the CI is asleep
    pub fn is_asleep(&self, ci: &str) -> bool {
        self.records
            .get(ci)
            .map(|r| r.state == SunsetState::Sunset)
            .unwrap_or(false)
    }

    /// Current lifecycle state for a CI
    pub fn state(&self, ci: &str) -> SunsetState {
        self.records.get(ci).map(|r| r.state).unwrap_or(SunsetState::Awake)
    }

    /// Write an advisory flag from a supervising observer
    pub fn set_advisory(&mut self, ci: &str) {
        self.record_mut(ci).advisory_flag = true;
    }

    /// Gate the CI's next outbound turn
    ///
    /// `sunset_due` comes from the budget check. A sleeping CI rejects the
    /// turn with `ci_asleep`; a due or advised CI gets the sunset prompt.
    pub fn gate_turn(&mut self, ci: &str, sunset_due: bool) -> Result<TurnGate> {
        let record = self.record_mut(ci);
        match record.state {
            SunsetState::Sunset => Err(MemoryError::CiAsleep(ci.to_string())),
            SunsetState::SunsetPending => Ok(TurnGate::EmitSunsetPrompt),
            SunsetState::Awake => {
                if sunset_due || record.advisory_flag {
                    record.state = SunsetState::SunsetPending;
                    record.advisory_flag = false;
                    info!(ci, "Sunset triggered; emitting drain prompt on next turn");
                    Ok(TurnGate::EmitSunsetPrompt)
                } else {
                    Ok(TurnGate::Normal)
                }
            }
        }
    }

    /// Observe a CI response
    ///
    /// A pending sunset captures the response as sunrise context and puts
    /// the CI to sleep. Awake CIs whose output matches a configured
    /// signature are auto-promoted the same way.
    pub fn observe_response(&mut self, ci: &str, response: &str) -> SunsetState {
        let matches_signature = self.config.matches(response);
        let record = self.record_mut(ci);
        match record.state {
            SunsetState::SunsetPending => {
                record.sunrise_context = Some(response.to_string());
                record.sunset_at = Some(Utc::now());
                record.state = SunsetState::Sunset;
                info!(ci, "Sunset complete; sunrise context captured");
            }
            SunsetState::Awake if matches_signature => {
                record.sunrise_context = Some(response.to_string());
                record.sunset_at = Some(Utc::now());
                record.state = SunsetState::Sunset;
                info!(ci, "Sunset signature detected in output; CI auto-promoted to sunset");
            }
            _ => {}
        }
        record.state
    }

    /// Apply a sunrise
    ///
    /// Idempotent: an awake CI yields `None`. A sleeping CI without
    /// captured context stays asleep and surfaces an actionable error.
    pub fn sunrise(&mut self, ci: &str) -> Result<Option<SunriseRestore>> {
        let record = self.record_mut(ci);
        if record.state != SunsetState::Sunset {
            return Ok(None);
        }
        let context = record
            .sunrise_context
            .clone()
            .ok_or_else(|| MemoryError::SunriseWithoutContext(ci.to_string()))?;
        let sunset_at = record.sunset_at.unwrap_or_else(Utc::now);

        record.state = SunsetState::Awake;
        record.sunrise_context = None;
        record.sunset_at = None;
        info!(ci, "Sunrise applied; CI awake");
        Ok(Some(SunriseRestore { context, sunset_at }))
    }

    /// When the CI last went to sleep, if currently asleep
    pub fn sunset_at(&self, ci: &str) -> Option<DateTime<Utc>> {
        self.records.get(ci).and_then(|r| r.sunset_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> SunsetTracker {
        SunsetTracker::new(SunsetConfig::default())
    }

    #[test]
    fn test_full_cycle() {
        let mut tracker = tracker();

        assert_eq!(tracker.gate_turn("metis", false).unwrap(), TurnGate::Normal);

        // Budget says sunset is due; the next turn drains.
        assert_eq!(tracker.gate_turn("metis", true).unwrap(), TurnGate::EmitSunsetPrompt);
        assert_eq!(
            tracker.observe_response("metis", "working state: planning sprint-4"),
            SunsetState::Sunset
        );

        // Normal turns are rejected while asleep.
        assert!(matches!(
            tracker.gate_turn("metis", false),
            Err(MemoryError::CiAsleep(_))
        ));

        // Sunrise restores the captured context.
        let restore = tracker.sunrise("metis").unwrap().unwrap();
        assert_eq!(restore.context, "working state: planning sprint-4");
        assert_eq!(tracker.gate_turn("metis", false).unwrap(), TurnGate::Normal);
    }

    #[test]
    fn test_sunrise_is_idempotent() {
        let mut tracker = tracker();
        tracker.gate_turn("metis", true).unwrap();
        tracker.observe_response("metis", "state");

        assert!(tracker.sunrise("metis").unwrap().is_some());
        // Repeated sunrise without an intervening sunset is a no-op.
        assert!(tracker.sunrise("metis").unwrap().is_none());
    }

    #[test]
    fn test_auto_detection() {
        let mut tracker = tracker();
        let state = tracker.observe_response("metis", "SUNSET_PROTOCOL engaged: saving state now");
        assert_eq!(state, SunsetState::Sunset);
        assert!(tracker.is_asleep("metis"));
    }

    #[test]
    fn test_custom_signature() {
        let config = SunsetConfig::default()
            .with_signature(r"\[drain-complete\]")
            .unwrap();
        let mut tracker = SunsetTracker::new(config);
        tracker.observe_response("metis", "done. [drain-complete]");
        assert!(tracker.is_asleep("metis"));
    }

    #[test]
    fn test_advisory_flag_triggers_sunset() {
        let mut tracker = tracker();
        tracker.set_advisory("metis");
        assert_eq!(tracker.gate_turn("metis", false).unwrap(), TurnGate::EmitSunsetPrompt);
    }

    #[test]
    fn test_pending_gate_repeats_prompt() {
        let mut tracker = tracker();
        tracker.gate_turn("metis", true).unwrap();
        // Until a response is observed, the gate keeps asking to drain.
        assert_eq!(tracker.gate_turn("metis", false).unwrap(), TurnGate::EmitSunsetPrompt);
    }

    #[test]
    fn test_normal_output_does_not_sleep() {
        let mut tracker = tracker();
        assert_eq!(tracker.observe_response("metis", "regular answer"), SunsetState::Awake);
    }
}
