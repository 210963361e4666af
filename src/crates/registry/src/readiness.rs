//! Readiness conditions and dependency ordering
//!
//! A component becomes ready only when every declared readiness condition
//! holds and every declared dependency is itself ready. Dependencies form
//! directed capability edges; a declared cycle fails registration.

use crate::{RegistryError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};

/// A named condition gating a component's readiness
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessCondition {
    /// Component the condition belongs to
    pub component_id: String,
    /// Condition name, unique per component
    pub name: String,
    /// Check expression, evaluated by the component itself
    pub check: String,
    /// Operator-facing description
    pub description: String,
    /// How long the component may take before the condition is failed
    pub timeout_ms: u64,
}

/// Tracked condition state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionState {
    /// The declared condition
    pub condition: ReadinessCondition,
    /// Whether the component has reported it satisfied
    pub satisfied: bool,
}

/// Per-component readiness bookkeeping
#[derive(Debug, Default)]
pub struct ReadinessTracker {
    conditions: HashMap<String, Vec<ConditionState>>,
}

impl ReadinessTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a condition; re-declaring by name resets satisfaction
    pub fn declare(&mut self, condition: ReadinessCondition) {
        let entry = self.conditions.entry(condition.component_id.clone()).or_default();
        entry.retain(|c| c.condition.name != condition.name);
        entry.push(ConditionState {
            condition,
            satisfied: false,
        });
    }

    /// Record a condition result reported by the component
    pub fn report(&mut self, component_id: &str, name: &str, satisfied: bool) -> Result<()> {
        let entry = self
            .conditions
            .get_mut(component_id)
            .and_then(|conditions| conditions.iter_mut().find(|c| c.condition.name == name))
            .ok_or_else(|| {
                RegistryError::NotFound(format!(
                    "No readiness condition {} declared for {}",
                    name, component_id
                ))
            })?;
        entry.satisfied = satisfied;
        Ok(())
    }

    /// Whether every declared condition for a component holds
    ///
    /// A component with no declared conditions is trivially satisfied.
    pub fn all_satisfied(&self, component_id: &str) -> bool {
        self.conditions
            .get(component_id)
            .map(|conditions| conditions.iter().all(|c| c.satisfied))
            .unwrap_or(true)
    }

    /// Conditions declared for a component
    pub fn conditions_for(&self, component_id: &str) -> &[ConditionState] {
        self.conditions
            .get(component_id)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Drop a component's conditions
    pub fn forget(&mut self, component_id: &str) {
        self.conditions.remove(component_id);
    }
}

/// Reject a registration whose dependencies would close a cycle
///
/// `edges` maps each component to its declared dependencies, with the
/// candidate's edges already included. Returns the cycle path on failure.
pub fn check_for_cycle(edges: &HashMap<String, Vec<String>>) -> Result<()> {
    // Kahn's algorithm over the known components; unregistered
    // dependencies cannot close a cycle yet.
    let mut indegree: HashMap<&str, usize> = edges.keys().map(|id| (id.as_str(), 0)).collect();
    for deps in edges.values() {
        for dep in deps {
            if let Some(count) = indegree.get_mut(dep.as_str()) {
                *count += 1;
            }
        }
    }

    let mut queue: VecDeque<&str> = indegree
        .iter()
        .filter(|(_, &count)| count == 0)
        .map(|(&id, _)| id)
        .collect();
    let mut visited = 0usize;

    while let Some(id) = queue.pop_front() {
        visited += 1;
        if let Some(deps) = edges.get(id) {
            for dep in deps {
                if let Some(count) = indegree.get_mut(dep.as_str()) {
                    *count -= 1;
                    if *count == 0 {
                        queue.push_back(dep.as_str());
                    }
                }
            }
        }
    }

    if visited == edges.len() {
        return Ok(());
    }

    // Walk the remainder to report one concrete cycle.
    let in_cycle: HashSet<&str> = indegree
        .iter()
        .filter(|(_, &count)| count > 0)
        .map(|(&id, _)| id)
        .collect();
    let start = in_cycle.iter().min().copied().unwrap_or_default();
    let mut path = vec![start.to_string()];
    let mut current = start;
    loop {
        let next = edges
            .get(current)
            .into_iter()
            .flatten()
            .find(|dep| in_cycle.contains(dep.as_str()));
        match next {
            Some(next) => {
                if path.contains(next) {
                    path.push(next.clone());
                    break;
                }
                path.push(next.clone());
                current = next;
            }
            None => break,
        }
    }
    Err(RegistryError::DependencyCycle(path))
}
