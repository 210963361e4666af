//! Execution bookkeeping behind the HTTP surface
//!
//! Owns the definition library and the live execution table. Each launch
//! spawns one scheduler loop; cross-execution isolation is strict (no
//! shared task state), so records only hold the shared state handle and
//! the control handle.

use crate::checkpoint::CheckpointStore;
use crate::definition::WorkflowDefinition;
use crate::engine::{ExecutionControl, WorkflowEngine};
use crate::state::{ExecutionStatus, WorkflowExecution};
use crate::{Result, WorkflowError};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info};

struct ExecutionRecord {
    shared: Arc<RwLock<WorkflowExecution>>,
    control: Arc<ExecutionControl>,
}

/// The orchestrator service: definitions plus live executions
pub struct OrchestratorService {
    engine: Arc<WorkflowEngine>,
    checkpoints: Arc<CheckpointStore>,
    definitions: RwLock<HashMap<String, WorkflowDefinition>>,
    executions: RwLock<HashMap<String, ExecutionRecord>>,
}

impl OrchestratorService {
    /// Create a service over an engine and checkpoint store
    pub fn new(engine: Arc<WorkflowEngine>, checkpoints: Arc<CheckpointStore>) -> Self {
        Self {
            engine,
            checkpoints,
            definitions: RwLock::new(HashMap::new()),
            executions: RwLock::new(HashMap::new()),
        }
    }

    /// Register a workflow definition
    pub async fn define(&self, definition: WorkflowDefinition) -> Result<String> {
        definition.validate()?;
        let id = definition.id.clone();
        self.definitions.write().await.insert(id.clone(), definition);
        info!(workflow = %id, "Workflow defined");
        Ok(id)
    }

    /// Fetch a definition
    pub async fn definition(&self, workflow_id: &str) -> Result<WorkflowDefinition> {
        self.definitions
            .read()
            .await
            .get(workflow_id)
            .cloned()
            .ok_or_else(|| WorkflowError::NotFound(format!("workflow {}", workflow_id)))
    }

    /// Launch an execution of a defined workflow
    ///
    /// `values` are validated against the definition's parameter schema.
    pub async fn launch(&self, workflow_id: &str, values: Value) -> Result<String> {
        let definition = self.definition(workflow_id).await?;
        let inputs = definition.parameters_schema.resolve(&values)?;

        let execution =
            WorkflowExecution::new(workflow_id, definition.tasks.keys().cloned(), inputs);
        let execution_id = execution.execution_id.clone();

        self.checkpoints.save_definition(&execution_id, &definition).await?;
        self.checkpoints.save_state(&execution).await?;

        let shared = Arc::new(RwLock::new(execution));
        let control = Arc::new(ExecutionControl::new());
        self.executions.write().await.insert(
            execution_id.clone(),
            ExecutionRecord {
                shared: shared.clone(),
                control: control.clone(),
            },
        );

        let engine = self.engine.clone();
        let checkpoints = self.checkpoints.clone();
        let spawned_id = execution_id.clone();
        tokio::spawn(async move {
            if let Err(e) = engine.run(&definition, shared.clone(), control).await {
                // Engine-level failure: park the execution for operators.
                error!(execution = %spawned_id, error = %e, "Execution parked by engine fault");
                let mut execution = shared.write().await;
                execution.status = ExecutionStatus::FailedEngine;
            }
            let snapshot = shared.read().await.clone();
            if let Err(e) = checkpoints.save_state(&snapshot).await {
                error!(execution = %spawned_id, error = %e, "Final state write failed");
            }
        });

        info!(workflow = %workflow_id, execution = %execution_id, "Execution launched");
        Ok(execution_id)
    }

    /// Current state of an execution
    pub async fn status(&self, execution_id: &str) -> Result<WorkflowExecution> {
        if let Some(record) = self.executions.read().await.get(execution_id) {
            return Ok(record.shared.read().await.clone());
        }
        // Not live in this process; fall back to the persisted document.
        self.checkpoints
            .load_definition(execution_id)
            .await
            .ok()
            .ok_or_else(|| WorkflowError::NotFound(format!("execution {}", execution_id)))?;
        let latest = self.checkpoints.load_latest(execution_id).await?;
        Ok(latest.execution)
    }

    async fn control_of(&self, execution_id: &str) -> Result<Arc<ExecutionControl>> {
        self.executions
            .read()
            .await
            .get(execution_id)
            .map(|record| record.control.clone())
            .ok_or_else(|| WorkflowError::NotFound(format!("execution {}", execution_id)))
    }

    /// Pause dispatch; running tasks drain
    pub async fn pause(&self, execution_id: &str) -> Result<()> {
        self.control_of(execution_id).await?.pause();
        Ok(())
    }

    /// Resume dispatch
    pub async fn resume(&self, execution_id: &str) -> Result<()> {
        self.control_of(execution_id).await?.resume();
        Ok(())
    }

    /// Cancel the execution
    pub async fn cancel(&self, execution_id: &str) -> Result<()> {
        self.control_of(execution_id).await?.cancel();
        Ok(())
    }

    /// Take an explicit checkpoint
    pub async fn checkpoint(&self, execution_id: &str) -> Result<()> {
        self.control_of(execution_id).await?.request_checkpoint();
        Ok(())
    }

    /// Restore an execution from its latest checkpoint and resume it
    ///
    /// Used after an engine restart; in-flight tasks at checkpoint time
    /// re-run (at-least-once).
    pub async fn restore(&self, execution_id: &str) -> Result<()> {
        if self.executions.read().await.contains_key(execution_id) {
            return Err(WorkflowError::InvalidDefinition(format!(
                "Execution {} is live in this process",
                execution_id
            )));
        }

        let definition = self.checkpoints.load_definition(execution_id).await?;
        let checkpoint = self.checkpoints.load_latest(execution_id).await?;

        let control = Arc::new(ExecutionControl::new());
        let engine = self.engine.clone();
        let checkpoints = self.checkpoints.clone();
        let spawned_id = execution_id.to_string();

        // resume() re-derives the ready set and re-marks in-flight tasks.
        let shared = Arc::new(RwLock::new(checkpoint.execution));
        {
            let mut execution = shared.write().await;
            let task_ids: Vec<String> = execution.task_states.keys().cloned().collect();
            for task_id in task_ids {
                let state = execution.task_states.get_mut(&task_id).expect("own key");
                if state.status == crate::state::TaskStatus::Running {
                    state.transition(&task_id, crate::state::TaskStatus::Ready)?;
                }
            }
            execution.status = ExecutionStatus::Pending;
            execution.finished_at = None;
        }

        self.executions.write().await.insert(
            execution_id.to_string(),
            ExecutionRecord {
                shared: shared.clone(),
                control: control.clone(),
            },
        );

        tokio::spawn(async move {
            if let Err(e) = engine.run(&definition, shared.clone(), control).await {
                error!(execution = %spawned_id, error = %e, "Restored execution parked by engine fault");
                let mut execution = shared.write().await;
                execution.status = ExecutionStatus::FailedEngine;
            }
            let snapshot = shared.read().await.clone();
            if let Err(e) = checkpoints.save_state(&snapshot).await {
                error!(execution = %spawned_id, error = %e, "Final state write failed");
            }
        });

        info!(execution = %execution_id, "Execution restored from checkpoint");
        Ok(())
    }
}
