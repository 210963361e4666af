//! The persistent forwarding table
//!
//! Forwards redirect a CI's messages to a terminal, optionally wrapping
//! them in a JSON envelope. The table refuses self-forwards and loops; a
//! removed terminal invalidates its forwards lazily, at the next
//! resolution attempt.

use crate::{AishError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One forwarding rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwardRule {
    /// Terminal receiving the forwarded messages
    pub terminal_id: String,
    /// Whether to wrap messages in the JSON envelope
    pub json: bool,
    /// When the rule was created
    pub created_at: DateTime<Utc>,
}

/// CI name to forward rule mapping
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ForwardTable {
    rules: HashMap<String, ForwardRule>,
}

impl ForwardTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a forward for a CI
    ///
    /// Rejects self-forwards and chains that loop back to the CI.
    pub fn set(&mut self, ci_name: &str, terminal_id: &str, json: bool) -> Result<()> {
        if ci_name == terminal_id {
            return Err(AishError::ForwardingCycle(format!(
                "{} cannot forward to itself",
                ci_name
            )));
        }

        // Walk the chain from the target; reaching the source is a loop.
        let mut hop = terminal_id;
        let mut path = vec![ci_name.to_string(), terminal_id.to_string()];
        while let Some(rule) = self.rules.get(hop) {
            if rule.terminal_id == ci_name {
                path.push(ci_name.to_string());
                return Err(AishError::ForwardingCycle(path.join(" -> ")));
            }
            path.push(rule.terminal_id.clone());
            hop = &rule.terminal_id;
        }

        self.rules.insert(
            ci_name.to_string(),
            ForwardRule {
                terminal_id: terminal_id.to_string(),
                json,
                created_at: Utc::now(),
            },
        );
        Ok(())
    }

    /// Remove a forward; removing a missing one is not an error
    pub fn remove(&mut self, ci_name: &str) -> Option<ForwardRule> {
        self.rules.remove(ci_name)
    }

    /// Look up the forward for a CI
    pub fn get(&self, ci_name: &str) -> Option<&ForwardRule> {
        self.rules.get(ci_name)
    }

    /// All rules, sorted by CI name
    pub fn list(&self) -> Vec<(&str, &ForwardRule)> {
        let mut rules: Vec<(&str, &ForwardRule)> = self
            .rules
            .iter()
            .map(|(name, rule)| (name.as_str(), rule))
            .collect();
        rules.sort_by_key(|(name, _)| *name);
        rules
    }

    /// Drop a stale rule discovered during resolution
    pub fn invalidate(&mut self, ci_name: &str) {
        self.rules.remove(ci_name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_get() {
        let mut table = ForwardTable::new();
        table.set("apollo", "term-a", true).unwrap();

        let rule = table.get("apollo").unwrap();
        assert_eq!(rule.terminal_id, "term-a");
        assert!(rule.json);
    }

    #[test]
    fn test_self_forward_rejected() {
        let mut table = ForwardTable::new();
        let err = table.set("apollo", "apollo", false).unwrap_err();
        assert!(matches!(err, AishError::ForwardingCycle(_)));
    }

    #[test]
    fn test_loop_rejected() {
        let mut table = ForwardTable::new();
        table.set("a", "b", false).unwrap();
        table.set("b", "c", false).unwrap();
        let err = table.set("c", "a", false).unwrap_err();
        assert!(matches!(err, AishError::ForwardingCycle(_)));
    }

    #[test]
    fn test_unforward_restores_resolution() {
        let mut table = ForwardTable::new();
        table.set("apollo", "term-a", false).unwrap();
        assert!(table.get("apollo").is_some());

        table.remove("apollo");
        assert!(table.get("apollo").is_none());
    }

    #[test]
    fn test_list_sorted() {
        let mut table = ForwardTable::new();
        table.set("zeta", "t1", false).unwrap();
        table.set("alpha", "t2", false).unwrap();

        let names: Vec<&str> = table.list().iter().map(|(name, _)| *name).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }
}
