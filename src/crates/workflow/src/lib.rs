//! DAG workflow orchestrator
//!
//! Defines, stores, executes, monitors, checkpoints, and resumes
//! multi-step workflows whose steps are calls to other tekton components.
//! Dependencies, retries, and error handling are enforced by the engine;
//! progress surfaces through the status API and the event log.
//!
//! - `definition` - workflow/task definitions and DAG validation
//! - `template` - typed parameter schemas and instantiation
//! - `substitution` - `${parameters.*}` / `${tasks.*.output.*}` splicing
//! - `state` - task and execution state machines
//! - `retry` - per-task retry policies
//! - `dispatch` - the pluggable task dispatcher
//! - `engine` - the ready-set scheduler and worker pool
//! - `checkpoint` - durable snapshots and restore
//! - `push` - the inter-component `/workflow` push protocol
//! - `api` - HTTP surface
//! - `service` - execution bookkeeping behind the API

pub mod api;
pub mod checkpoint;
pub mod definition;
pub mod dispatch;
pub mod engine;
pub mod push;
pub mod retry;
pub mod service;
pub mod state;
pub mod substitution;
pub mod template;

pub use definition::{OnError, RetryPolicy, TaskDef, WorkflowDefinition};
pub use dispatch::{DispatchError, TaskDispatcher, TaskInvocation};
pub use engine::{EngineConfig, ExecutionControl, WorkflowEngine};
pub use state::{ExecutionStatus, TaskState, TaskStatus, WorkflowExecution};

use thiserror::Error;

/// Errors surfaced by the orchestrator
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// Definition failed validation
    #[error("Invalid workflow definition: {0}")]
    InvalidDefinition(String),

    /// The task graph contains a cycle
    #[error("Workflow graph has a cycle through {0}")]
    CyclicGraph(String),

    /// A reference points at a missing task or undeclared dependency
    #[error("Invalid reference: {0}")]
    InvalidReference(String),

    /// Template values failed schema validation
    #[error("Template instantiation failed: {0}")]
    TemplateError(String),

    /// No workflow or execution by that id
    #[error("Not found: {0}")]
    NotFound(String),

    /// A task exhausted its retries
    #[error("Task {task_id} failed: {message}")]
    TaskFailed {
        /// The failing task
        task_id: String,
        /// Final error message
        message: String,
    },

    /// An illegal state transition was attempted
    #[error("Invalid state transition for {task_id}: {from} -> {to}")]
    InvalidTransition {
        /// Task involved
        task_id: String,
        /// Current status
        from: String,
        /// Requested status
        to: String,
    },

    /// Engine-level fault (scheduler, persistence); execution is parked
    #[error("Engine fault: {0}")]
    EngineFault(String),

    /// Persistence failure
    #[error(transparent)]
    Tooling(#[from] tooling::ToolingError),

    /// Serialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl WorkflowError {
    /// Stable wire code for the error body
    pub fn code(&self) -> &'static str {
        match self {
            WorkflowError::InvalidDefinition(_)
            | WorkflowError::CyclicGraph(_)
            | WorkflowError::InvalidReference(_)
            | WorkflowError::TemplateError(_)
            | WorkflowError::Serialization(_) => "invalid",
            WorkflowError::NotFound(_) => "not_found",
            WorkflowError::TaskFailed { .. } => "task_failed",
            WorkflowError::InvalidTransition { .. } => "invalid",
            WorkflowError::EngineFault(_) => "engine-fault",
            WorkflowError::Tooling(_) => "persistence-failure",
        }
    }
}

/// Result type for orchestrator operations
pub type Result<T> = std::result::Result<T, WorkflowError>;
