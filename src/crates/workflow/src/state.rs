//! Task and execution state machines
//!
//! A task moves `pending → ready → running → (succeeded | failed)`;
//! `skipped` and `cancelled` are the other terminal states. Terminal
//! states never regress. All transitions for one execution happen on its
//! scheduler loop, so they are totally ordered.

use crate::{Result, WorkflowError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Task status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Dependencies unsatisfied
    Pending,
    /// Eligible for dispatch
    Ready,
    /// Dispatched, awaiting result
    Running,
    /// Finished successfully
    Succeeded,
    /// Failed after retries
    Failed,
    /// Failed but treated as satisfied for dependents
    Skipped,
    /// Cancelled before completion
    Cancelled,
}

impl TaskStatus {
    /// Whether this status is terminal
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Skipped | TaskStatus::Cancelled
        )
    }

    /// Whether a dependent may run once its dependency reaches this status
    pub fn satisfies_dependents(self) -> bool {
        matches!(self, TaskStatus::Succeeded | TaskStatus::Skipped)
    }

    /// Whether the state machine permits this transition
    pub fn can_transition(self, to: TaskStatus) -> bool {
        use TaskStatus::*;
        if self.is_terminal() {
            return false;
        }
        matches!(
            (self, to),
            (Pending, Ready)
                | (Pending, Cancelled)
                | (Pending, Skipped)
                | (Ready, Running)
                | (Ready, Cancelled)
                // A paused cancel_on_pause task re-queues.
                | (Running, Ready)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Running, Skipped)
                | (Running, Cancelled)
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{}", name)
    }
}

/// Per-task execution state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskState {
    /// Current status
    pub status: TaskStatus,
    /// Dispatch attempts made
    pub attempts: u32,
    /// Recorded output on success
    pub output: Option<Value>,
    /// Final error on failure
    pub error: Option<String>,
    /// When the first attempt started
    pub started_at: Option<DateTime<Utc>>,
    /// When the task reached a terminal state
    pub finished_at: Option<DateTime<Utc>>,
}

impl Default for TaskState {
    fn default() -> Self {
        Self {
            status: TaskStatus::Pending,
            attempts: 0,
            output: None,
            error: None,
            started_at: None,
            finished_at: None,
        }
    }
}

impl TaskState {
    /// Apply a transition, enforcing the machine
    pub fn transition(&mut self, task_id: &str, to: TaskStatus) -> Result<()> {
        if !self.status.can_transition(to) {
            return Err(WorkflowError::InvalidTransition {
                task_id: task_id.to_string(),
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        if to == TaskStatus::Running && self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
        if to.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        self.status = to;
        Ok(())
    }
}

/// Execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Created, not yet started
    Pending,
    /// The scheduler is dispatching
    Running,
    /// Dispatch suspended by the operator
    Paused,
    /// All tasks finished, none failed without skip or compensation
    Succeeded,
    /// At least one task failed fatally
    Failed,
    /// Cancelled by the operator
    Cancelled,
    /// The engine itself faulted; needs operator attention
    FailedEngine,
}

impl ExecutionStatus {
    /// Whether this status is terminal
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionStatus::Succeeded
                | ExecutionStatus::Failed
                | ExecutionStatus::Cancelled
                | ExecutionStatus::FailedEngine
        )
    }
}

/// One run of a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecution {
    /// Execution id
    pub execution_id: String,
    /// Workflow the run belongs to
    pub workflow_id: String,
    /// Launch inputs (resolved parameters)
    pub inputs: Value,
    /// Execution status
    pub status: ExecutionStatus,
    /// When the run started
    pub started_at: Option<DateTime<Utc>>,
    /// When the run finished
    pub finished_at: Option<DateTime<Utc>>,
    /// Per-task state
    pub task_states: BTreeMap<String, TaskState>,
    /// Ids of checkpoints taken
    pub checkpoints: Vec<String>,
}

impl WorkflowExecution {
    /// Create a fresh execution for a workflow's task set
    pub fn new(workflow_id: &str, task_ids: impl Iterator<Item = String>, inputs: Value) -> Self {
        Self {
            execution_id: Uuid::new_v4().to_string(),
            workflow_id: workflow_id.to_string(),
            inputs,
            status: ExecutionStatus::Pending,
            started_at: None,
            finished_at: None,
            task_states: task_ids.map(|id| (id, TaskState::default())).collect(),
            checkpoints: Vec::new(),
        }
    }

    /// Tasks currently in a given status
    pub fn tasks_in(&self, status: TaskStatus) -> Vec<&str> {
        self.task_states
            .iter()
            .filter(|(_, state)| state.status == status)
            .map(|(id, _)| id.as_str())
            .collect()
    }

    /// Whether any task is not yet terminal
    pub fn has_live_tasks(&self) -> bool {
        self.task_states.values().any(|state| !state.status.is_terminal())
    }
}
