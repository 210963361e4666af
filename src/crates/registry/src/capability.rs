//! Capability table and fallback bindings
//!
//! Multiple providers may offer the same capability at different levels;
//! resolution prefers ready providers, then higher levels, then breaks
//! ties with the registry's monotonic counter so replays resolve
//! identically. Fallback execution is a result type, never control flow by
//! exception: callers receive `Completed`, `FallbackApplied`, or
//! `NoFallbackAvailable`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A capability offered by a provider component
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capability {
    /// Component offering the capability
    pub provider_id: String,
    /// Capability name
    pub name: String,
    /// Level; higher wins at resolution
    pub level: i32,
    /// Provider-specific parameters
    #[serde(default)]
    pub parameters: Value,
}

impl Capability {
    /// Create a capability registration
    pub fn new(provider_id: impl Into<String>, name: impl Into<String>, level: i32) -> Self {
        Self {
            provider_id: provider_id.into(),
            name: name.into(),
            level,
            parameters: Value::Null,
        }
    }

    /// Attach provider parameters
    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }

    /// Parse a declared capability string: `name` or `name@level`
    pub fn parse_declaration(provider_id: &str, decl: &str) -> Self {
        match decl.rsplit_once('@') {
            Some((name, level)) if level.chars().all(|c| c.is_ascii_digit()) && !name.is_empty() => {
                Self::new(provider_id, name, level.parse().unwrap_or(0))
            }
            _ => Self::new(provider_id, decl, 0),
        }
    }
}

/// A fallback provider bound for a consumer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackBinding {
    /// Component that will fall back
    pub consumer_id: String,
    /// Capability being guarded
    pub capability_name: String,
    /// Provider to try when the primary is unavailable
    pub provider_id: String,
    /// Level; the highest surviving fallback is tried first
    pub level: i32,
    /// Reference to the handler resolved at registration time
    pub handler_ref: String,
}

/// Outcome of `execute_with_fallback`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FallbackOutcome {
    /// The primary provider answered
    Completed {
        /// Provider that answered
        provider_id: String,
        /// Provider result
        value: Value,
    },
    /// The primary was unavailable; a fallback answered
    FallbackApplied {
        /// Fallback provider that answered
        provider_id: String,
        /// Providers that failed before it, in attempt order
        attempted: Vec<String>,
        /// Provider result
        value: Value,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_declaration_with_level() {
        let cap = Capability::parse_declaration("apollo", "predict@10");
        assert_eq!(cap.name, "predict");
        assert_eq!(cap.level, 10);
        assert_eq!(cap.provider_id, "apollo");
    }

    #[test]
    fn test_parse_declaration_without_level() {
        let cap = Capability::parse_declaration("apollo", "predict");
        assert_eq!(cap.name, "predict");
        assert_eq!(cap.level, 0);
    }

    #[test]
    fn test_parse_declaration_odd_at_sign() {
        // A trailing @ without digits belongs to the name.
        let cap = Capability::parse_declaration("apollo", "odd@name");
        assert_eq!(cap.name, "odd@name");
        assert_eq!(cap.level, 0);
    }

    #[test]
    fn test_fallback_outcome_serialization() {
        let outcome = FallbackOutcome::FallbackApplied {
            provider_id: "rhetor".to_string(),
            attempted: vec!["apollo".to_string()],
            value: serde_json::json!({"answer": 42}),
        };
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["outcome"], "fallback_applied");
        assert_eq!(value["provider_id"], "rhetor");
    }
}
