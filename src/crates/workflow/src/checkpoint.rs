//! Durable execution snapshots
//!
//! Checkpoints are taken on an interval, on explicit request, and
//! immediately after terminal transitions of tasks declared `durable`.
//! A checkpoint snapshots every task state plus the variable bindings;
//! restore replays the states verbatim and re-derives the ready set, with
//! in-flight tasks re-marked ready (at-least-once semantics).
//!
//! Layout under the state directory:
//! `workflows/<execution_id>/{definition.json, state.json, checkpoints/<id>.json}`.

use crate::definition::WorkflowDefinition;
use crate::state::WorkflowExecution;
use crate::{Result, WorkflowError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tooling::persistence::{get_typed, put_typed, KvStore};
use uuid::Uuid;

/// One durable snapshot of an execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Checkpoint id
    pub checkpoint_id: String,
    /// Execution the snapshot belongs to
    pub execution_id: String,
    /// When the snapshot was taken
    pub taken_at: DateTime<Utc>,
    /// Full execution snapshot (task states and variable bindings)
    pub execution: WorkflowExecution,
}

impl Checkpoint {
    /// Capture the current execution state
    pub fn capture(execution: &WorkflowExecution) -> Self {
        Self {
            checkpoint_id: Uuid::new_v4().to_string(),
            execution_id: execution.execution_id.clone(),
            taken_at: Utc::now(),
            execution: execution.clone(),
        }
    }
}

/// Checkpoint and definition persistence for executions
pub struct CheckpointStore {
    store: Arc<dyn KvStore>,
}

impl CheckpointStore {
    /// Create a store over a key-value backend
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    fn definition_key(execution_id: &str) -> String {
        format!("workflows/{}/definition.json", execution_id)
    }

    fn state_key(execution_id: &str) -> String {
        format!("workflows/{}/state.json", execution_id)
    }

    fn checkpoint_key(execution_id: &str, checkpoint_id: &str) -> String {
        format!("workflows/{}/checkpoints/{}.json", execution_id, checkpoint_id)
    }

    /// Persist the definition an execution runs against
    pub async fn save_definition(
        &self,
        execution_id: &str,
        definition: &WorkflowDefinition,
    ) -> Result<()> {
        put_typed(self.store.as_ref(), &Self::definition_key(execution_id), definition).await?;
        Ok(())
    }

    /// Load the definition for an execution
    pub async fn load_definition(&self, execution_id: &str) -> Result<WorkflowDefinition> {
        get_typed(self.store.as_ref(), &Self::definition_key(execution_id))
            .await?
            .ok_or_else(|| WorkflowError::NotFound(format!("definition for {}", execution_id)))
    }

    /// Persist the live execution state document
    pub async fn save_state(&self, execution: &WorkflowExecution) -> Result<()> {
        put_typed(self.store.as_ref(), &Self::state_key(&execution.execution_id), execution).await?;
        Ok(())
    }

    /// Write a checkpoint and update the live state document
    pub async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        put_typed(
            self.store.as_ref(),
            &Self::checkpoint_key(&checkpoint.execution_id, &checkpoint.checkpoint_id),
            checkpoint,
        )
        .await?;
        self.save_state(&checkpoint.execution).await
    }

    /// Load a specific checkpoint
    pub async fn load(&self, execution_id: &str, checkpoint_id: &str) -> Result<Checkpoint> {
        get_typed(self.store.as_ref(), &Self::checkpoint_key(execution_id, checkpoint_id))
            .await?
            .ok_or_else(|| {
                WorkflowError::NotFound(format!("checkpoint {} of {}", checkpoint_id, execution_id))
            })
    }

    /// Load the most recent checkpoint of an execution
    pub async fn load_latest(&self, execution_id: &str) -> Result<Checkpoint> {
        let prefix = format!("workflows/{}/checkpoints", execution_id);
        let keys = self.store.list(&prefix).await.map_err(WorkflowError::Tooling)?;

        let mut latest: Option<Checkpoint> = None;
        for key in keys {
            let Some(candidate) = get_typed::<Checkpoint>(self.store.as_ref(), &key).await? else {
                continue;
            };
            let newer = latest
                .as_ref()
                .map(|current| candidate.taken_at > current.taken_at)
                .unwrap_or(true);
            if newer {
                latest = Some(candidate);
            }
        }
        latest.ok_or_else(|| WorkflowError::NotFound(format!("checkpoints of {}", execution_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::TaskStatus;
    use serde_json::json;
    use tooling::persistence::MemoryStore;

    fn execution() -> WorkflowExecution {
        WorkflowExecution::new(
            "w1",
            ["a", "b"].into_iter().map(String::from),
            json!({"region": "eu-west"}),
        )
    }

    #[tokio::test]
    async fn test_checkpoint_roundtrip() {
        let store = CheckpointStore::new(Arc::new(MemoryStore::new()));
        let mut execution = execution();
        execution
            .task_states
            .get_mut("a")
            .unwrap()
            .transition("a", TaskStatus::Ready)
            .unwrap();

        let checkpoint = Checkpoint::capture(&execution);
        store.save(&checkpoint).await.unwrap();

        let loaded = store
            .load(&execution.execution_id, &checkpoint.checkpoint_id)
            .await
            .unwrap();
        assert_eq!(loaded.execution.task_states["a"].status, TaskStatus::Ready);
        assert_eq!(loaded.execution.inputs, json!({"region": "eu-west"}));
    }

    #[tokio::test]
    async fn test_latest_checkpoint_selected() {
        let store = CheckpointStore::new(Arc::new(MemoryStore::new()));
        let execution = execution();

        let first = Checkpoint::capture(&execution);
        store.save(&first).await.unwrap();

        let mut second = Checkpoint::capture(&execution);
        second.taken_at = first.taken_at + chrono::Duration::seconds(10);
        store.save(&second).await.unwrap();

        let latest = store.load_latest(&execution.execution_id).await.unwrap();
        assert_eq!(latest.checkpoint_id, second.checkpoint_id);
    }

    #[tokio::test]
    async fn test_missing_checkpoint() {
        let store = CheckpointStore::new(Arc::new(MemoryStore::new()));
        assert!(store.load_latest("ghost").await.is_err());
    }

    #[tokio::test]
    async fn test_definition_roundtrip() {
        let store = CheckpointStore::new(Arc::new(MemoryStore::new()));
        let definition = WorkflowDefinition::from_json(
            r#"{
                "id": "w1",
                "name": "n",
                "tasks": {"a": {"name": "a", "component": "telos", "action": "fetch"}}
            }"#,
        )
        .unwrap();

        store.save_definition("e1", &definition).await.unwrap();
        let loaded = store.load_definition("e1").await.unwrap();
        assert_eq!(loaded.id, "w1");
    }
}
