//! Workflow and task definitions
//!
//! Definitions load from JSON or YAML and are validated before any
//! execution: the task graph must be acyclic, every referenced task must
//! exist, and `${tasks.X.output...}` references may only point at declared
//! dependencies.

use crate::substitution::{collect_refs, Reference};
use crate::template::ParametersSchema;
use crate::{Result, WorkflowError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet, VecDeque};

/// Per-task retry policy
///
/// Retries apply only to transport errors and errors the provider flags
/// `retryable`; backoff is exponential with jitter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Attempts including the first (default 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Initial backoff in milliseconds (default 500)
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,
    /// Backoff cap in milliseconds (default 30 000)
    #[serde(default = "default_cap_delay")]
    pub cap_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay() -> u64 {
    500
}
fn default_cap_delay() -> u64 {
    30_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay(),
            cap_delay_ms: default_cap_delay(),
        }
    }
}

/// What to do when a task fails after retries
///
/// Serialized as `fail`, `skip`, or `compensate:<task_id>`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum OnError {
    /// Halt the execution with drain semantics
    #[default]
    Fail,
    /// Mark the task skipped but satisfied for dependents
    Skip,
    /// Schedule the named compensating task
    Compensate(String),
}

impl Serialize for OnError {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            OnError::Fail => serializer.serialize_str("fail"),
            OnError::Skip => serializer.serialize_str("skip"),
            OnError::Compensate(task) => serializer.serialize_str(&format!("compensate:{}", task)),
        }
    }
}

impl<'de> Deserialize<'de> for OnError {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        match raw.as_str() {
            "fail" => Ok(OnError::Fail),
            "skip" => Ok(OnError::Skip),
            other => match other.strip_prefix("compensate:") {
                Some(task) if !task.is_empty() => Ok(OnError::Compensate(task.to_string())),
                _ => Err(serde::de::Error::custom(format!("invalid on_error: {}", raw))),
            },
        }
    }
}

/// One task in a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDef {
    /// Display name
    pub name: String,
    /// Component the action is dispatched to
    pub component: String,
    /// Action invoked on the component
    pub action: String,
    /// Input payload; may contain `${...}` references
    #[serde(default)]
    pub input: Value,
    /// Tasks that must finish first
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Retry policy
    #[serde(default)]
    pub retry_policy: RetryPolicy,
    /// Per-dispatch deadline
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Failure handling after retries
    #[serde(default)]
    pub on_error: OnError,
    /// Dispatch priority among ready tasks (higher first)
    #[serde(default)]
    pub priority: i32,
    /// Checkpoint immediately when this task reaches a terminal state
    #[serde(default)]
    pub durable: bool,
    /// Abort this task when the execution pauses
    #[serde(default)]
    pub cancel_on_pause: bool,
}

/// A complete workflow definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Workflow id
    pub id: String,
    /// Display name
    pub name: String,
    /// Definition version
    #[serde(default = "default_version")]
    pub version: String,
    /// Typed parameter schema for templates
    #[serde(default)]
    pub parameters_schema: ParametersSchema,
    /// Tasks by id
    pub tasks: BTreeMap<String, TaskDef>,
}

fn default_version() -> String {
    "1".to_string()
}

impl WorkflowDefinition {
    /// Parse a definition from JSON text
    pub fn from_json(text: &str) -> Result<Self> {
        let definition: Self = serde_json::from_str(text)
            .map_err(|e| WorkflowError::InvalidDefinition(e.to_string()))?;
        definition.validate()?;
        Ok(definition)
    }

    /// Parse a definition from YAML text
    pub fn from_yaml(text: &str) -> Result<Self> {
        let definition: Self = serde_yaml::from_str(text)
            .map_err(|e| WorkflowError::InvalidDefinition(e.to_string()))?;
        definition.validate()?;
        Ok(definition)
    }

    /// Validate graph shape and references
    pub fn validate(&self) -> Result<()> {
        if self.tasks.is_empty() {
            return Err(WorkflowError::InvalidDefinition(format!(
                "Workflow {} has no tasks",
                self.id
            )));
        }

        // Every referenced task id must exist.
        for (task_id, task) in &self.tasks {
            for dep in &task.depends_on {
                if !self.tasks.contains_key(dep) {
                    return Err(WorkflowError::InvalidReference(format!(
                        "Task {} depends on unknown task {}",
                        task_id, dep
                    )));
                }
            }
            if let OnError::Compensate(target) = &task.on_error {
                if !self.tasks.contains_key(target) {
                    return Err(WorkflowError::InvalidReference(format!(
                        "Task {} compensates with unknown task {}",
                        task_id, target
                    )));
                }
            }
        }

        self.check_acyclic()?;

        // Output references must point at declared dependencies.
        for (task_id, task) in &self.tasks {
            let deps: HashSet<&str> = task.depends_on.iter().map(|d| d.as_str()).collect();
            for reference in collect_refs(&task.input) {
                if let Reference::TaskOutput { task: source, .. } = reference {
                    if !deps.contains(source.as_str()) {
                        return Err(WorkflowError::InvalidReference(format!(
                            "Task {} reads output of {} without depending on it",
                            task_id, source
                        )));
                    }
                }
            }
        }

        Ok(())
    }

    fn check_acyclic(&self) -> Result<()> {
        // Kahn's algorithm; anything not drained sits on a cycle.
        let mut indegree: BTreeMap<&str, usize> = self
            .tasks
            .iter()
            .map(|(id, task)| (id.as_str(), task.depends_on.len()))
            .collect();

        let mut queue: VecDeque<&str> = indegree
            .iter()
            .filter(|(_, &n)| n == 0)
            .map(|(&id, _)| id)
            .collect();
        let mut drained = 0usize;
        while let Some(done) = queue.pop_front() {
            drained += 1;
            for (id, task) in &self.tasks {
                if task.depends_on.iter().any(|d| d == done) {
                    let n = indegree.get_mut(id.as_str()).expect("own key");
                    *n -= 1;
                    if *n == 0 {
                        queue.push_back(id.as_str());
                    }
                }
            }
        }

        if drained != self.tasks.len() {
            let stuck = indegree
                .iter()
                .find(|(_, &n)| n > 0)
                .map(|(&id, _)| id.to_string())
                .unwrap_or_default();
            return Err(WorkflowError::CyclicGraph(stuck));
        }
        Ok(())
    }

    /// Task ids with no dependencies (the initial ready set)
    pub fn roots(&self) -> Vec<&str> {
        self.tasks
            .iter()
            .filter(|(_, task)| task.depends_on.is_empty())
            .map(|(id, _)| id.as_str())
            .collect()
    }

    /// Direct dependents of a task
    pub fn dependents_of(&self, task_id: &str) -> Vec<&str> {
        self.tasks
            .iter()
            .filter(|(_, task)| task.depends_on.iter().any(|d| d == task_id))
            .map(|(id, _)| id.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn task(component: &str) -> TaskDef {
        TaskDef {
            name: component.to_string(),
            component: component.to_string(),
            action: "run".to_string(),
            input: Value::Null,
            depends_on: vec![],
            retry_policy: RetryPolicy::default(),
            timeout_ms: None,
            on_error: OnError::Fail,
            priority: 0,
            durable: false,
            cancel_on_pause: false,
        }
    }

    fn definition(tasks: Vec<(&str, TaskDef)>) -> WorkflowDefinition {
        WorkflowDefinition {
            id: "w1".to_string(),
            name: "test workflow".to_string(),
            version: "1".to_string(),
            parameters_schema: ParametersSchema::default(),
            tasks: tasks.into_iter().map(|(id, t)| (id.to_string(), t)).collect(),
        }
    }

    #[test]
    fn test_valid_chain() {
        let mut b = task("athena");
        b.depends_on = vec!["a".to_string()];
        let def = definition(vec![("a", task("telos")), ("b", b)]);
        assert!(def.validate().is_ok());
        assert_eq!(def.roots(), vec!["a"]);
        assert_eq!(def.dependents_of("a"), vec!["b"]);
    }

    #[test]
    fn test_unknown_dependency() {
        let mut b = task("athena");
        b.depends_on = vec!["ghost".to_string()];
        let def = definition(vec![("b", b)]);
        assert!(matches!(def.validate(), Err(WorkflowError::InvalidReference(_))));
    }

    #[test]
    fn test_cycle_detected() {
        let mut a = task("telos");
        a.depends_on = vec!["b".to_string()];
        let mut b = task("athena");
        b.depends_on = vec!["a".to_string()];
        let def = definition(vec![("a", a), ("b", b)]);
        assert!(matches!(def.validate(), Err(WorkflowError::CyclicGraph(_))));
    }

    #[test]
    fn test_reference_must_be_declared_dependency() {
        let mut b = task("athena");
        b.input = json!({"data": "${tasks.a.output}"});
        // No depends_on declared.
        let def = definition(vec![("a", task("telos")), ("b", b)]);
        assert!(matches!(def.validate(), Err(WorkflowError::InvalidReference(_))));
    }

    #[test]
    fn test_reference_to_declared_dependency_ok() {
        let mut b = task("athena");
        b.input = json!({"data": "${tasks.a.output}"});
        b.depends_on = vec!["a".to_string()];
        let def = definition(vec![("a", task("telos")), ("b", b)]);
        assert!(def.validate().is_ok());
    }

    #[test]
    fn test_compensate_target_must_exist() {
        let mut a = task("telos");
        a.on_error = OnError::Compensate("undo".to_string());
        let def = definition(vec![("a", a)]);
        assert!(matches!(def.validate(), Err(WorkflowError::InvalidReference(_))));
    }

    #[test]
    fn test_on_error_serde_forms() {
        assert_eq!(serde_json::to_value(OnError::Fail).unwrap(), json!("fail"));
        assert_eq!(
            serde_json::to_value(OnError::Compensate("undo".into())).unwrap(),
            json!("compensate:undo")
        );
        let parsed: OnError = serde_json::from_value(json!("compensate:undo")).unwrap();
        assert_eq!(parsed, OnError::Compensate("undo".into()));
        assert!(serde_json::from_value::<OnError>(json!("explode")).is_err());
    }

    #[test]
    fn test_from_json_validates() {
        let text = r#"{
            "id": "w1",
            "name": "fetch and analyze",
            "tasks": {
                "a": {"name": "fetch", "component": "telos", "action": "fetch"},
                "b": {
                    "name": "analyze",
                    "component": "athena",
                    "action": "analyze",
                    "input": {"data": "${tasks.a.output}"},
                    "depends_on": ["a"],
                    "retry_policy": {"max_attempts": 3}
                }
            }
        }"#;
        let def = WorkflowDefinition::from_json(text).unwrap();
        assert_eq!(def.tasks.len(), 2);
        assert_eq!(def.tasks["b"].retry_policy.max_attempts, 3);
    }

    #[test]
    fn test_from_yaml() {
        let text = r#"
id: w2
name: single step
tasks:
  only:
    name: only
    component: telos
    action: fetch
"#;
        let def = WorkflowDefinition::from_yaml(text).unwrap();
        assert_eq!(def.tasks.len(), 1);
    }

    #[test]
    fn test_empty_workflow_rejected() {
        let def = definition(vec![]);
        assert!(matches!(def.validate(), Err(WorkflowError::InvalidDefinition(_))));
    }
}
