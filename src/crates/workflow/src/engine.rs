//! The DAG execution engine
//!
//! One scheduler loop per execution pulls from the ready set and
//! dispatches through a bounded worker pool. All task state transitions
//! happen on the loop, so they are totally ordered per execution;
//! executions share nothing with each other.
//!
//! Failure handling follows the task's `on_error`: `fail` halts with
//! drain semantics (running tasks finish, nothing new starts), `skip`
//! satisfies dependents anyway, and `compensate:<task>` schedules the
//! named compensating task.

use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::definition::{OnError, WorkflowDefinition};
use crate::dispatch::{DispatchError, TaskDispatcher, TaskInvocation};
use crate::retry::{run_with_retries, AttemptOutcome};
use crate::state::{ExecutionStatus, TaskStatus, WorkflowExecution};
use crate::substitution::substitute;
use crate::{Result, WorkflowError};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Notify, RwLock};
use tokio::task::{AbortHandle, JoinSet};
use tracing::{debug, error, info, warn};

/// Engine limits and behavior
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Worker pool size per execution
    pub max_concurrent_tasks: usize,
    /// Interval between automatic checkpoints
    pub checkpoint_interval: Duration,
    /// Deadline for a dispatch attempt when the task declares none
    pub default_task_deadline: Duration,
    /// Run compensating tasks when the execution is cancelled
    pub compensate_on_cancel: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 4,
            checkpoint_interval: Duration::from_secs(300),
            default_task_deadline: Duration::from_secs(30),
            compensate_on_cancel: false,
        }
    }
}

impl EngineConfig {
    /// Set the worker pool size
    pub fn with_max_concurrent_tasks(mut self, max: usize) -> Self {
        self.max_concurrent_tasks = max.max(1);
        self
    }

    /// Set the checkpoint interval
    pub fn with_checkpoint_interval(mut self, interval: Duration) -> Self {
        self.checkpoint_interval = interval;
        self
    }
}

/// Operator control over a running execution
#[derive(Debug, Default)]
pub struct ExecutionControl {
    paused: AtomicBool,
    cancelled: AtomicBool,
    checkpoint_requested: AtomicBool,
    signal: Notify,
}

impl ExecutionControl {
    /// Create a control handle
    pub fn new() -> Self {
        Self::default()
    }

    /// Suspend dispatch; running tasks drain unless marked
    /// `cancel_on_pause`
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        self.signal.notify_waiters();
    }

    /// Resume dispatch
    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.signal.notify_waiters();
    }

    /// Cancel the execution
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.signal.notify_waiters();
    }

    /// Ask for a checkpoint at the next loop iteration
    pub fn request_checkpoint(&self) {
        self.checkpoint_requested.store(true, Ordering::SeqCst);
        self.signal.notify_waiters();
    }

    /// Whether dispatch is suspended
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Whether the execution is cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn take_checkpoint_request(&self) -> bool {
        self.checkpoint_requested.swap(false, Ordering::SeqCst)
    }

    async fn signalled(&self) {
        self.signal.notified().await;
    }
}

// Applies the per-attempt deadline around any dispatcher.
struct DeadlineDispatcher {
    inner: Arc<dyn TaskDispatcher>,
}

#[async_trait]
impl TaskDispatcher for DeadlineDispatcher {
    async fn dispatch(&self, invocation: &TaskInvocation) -> std::result::Result<Value, DispatchError> {
        match tokio::time::timeout(invocation.deadline, self.inner.dispatch(invocation)).await {
            Ok(result) => result,
            Err(_) => Err(DispatchError::Transport(transport::TransportError::Timeout(
                invocation.deadline.as_millis() as u64,
            ))),
        }
    }
}

/// The workflow execution engine
pub struct WorkflowEngine {
    dispatcher: Arc<dyn TaskDispatcher>,
    config: EngineConfig,
    checkpoints: Option<Arc<CheckpointStore>>,
}

impl WorkflowEngine {
    /// Create an engine over a dispatcher
    pub fn new(dispatcher: Arc<dyn TaskDispatcher>) -> Self {
        Self {
            dispatcher,
            config: EngineConfig::default(),
            checkpoints: None,
        }
    }

    /// Override the configuration
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Attach a checkpoint store
    pub fn with_checkpoints(mut self, store: Arc<CheckpointStore>) -> Self {
        self.checkpoints = Some(store);
        self
    }

    /// Execute a workflow to completion
    pub async fn execute(&self, definition: &WorkflowDefinition, inputs: Value) -> Result<WorkflowExecution> {
        let control = Arc::new(ExecutionControl::new());
        self.execute_with_control(definition, inputs, control).await
    }

    /// Execute with an external control handle
    pub async fn execute_with_control(
        &self,
        definition: &WorkflowDefinition,
        inputs: Value,
        control: Arc<ExecutionControl>,
    ) -> Result<WorkflowExecution> {
        definition.validate()?;
        let execution = WorkflowExecution::new(&definition.id, definition.tasks.keys().cloned(), inputs);
        let shared = Arc::new(RwLock::new(execution));
        self.run(definition, shared.clone(), control).await?;
        let result = shared.read().await.clone();
        Ok(result)
    }

    /// Resume an execution restored from a checkpoint
    ///
    /// Tasks that were in flight at checkpoint time re-run (at-least-once
    /// semantics; side effects must be idempotent or externally deduped).
    pub async fn resume(
        &self,
        definition: &WorkflowDefinition,
        mut execution: WorkflowExecution,
        control: Arc<ExecutionControl>,
    ) -> Result<WorkflowExecution> {
        definition.validate()?;
        for (task_id, state) in execution.task_states.iter_mut() {
            if state.status == TaskStatus::Running {
                debug!(task = %task_id, "In-flight task at checkpoint; re-marking ready");
                state.transition(task_id, TaskStatus::Ready)?;
            }
        }
        execution.status = ExecutionStatus::Pending;
        execution.finished_at = None;

        let shared = Arc::new(RwLock::new(execution));
        self.run(definition, shared.clone(), control).await?;
        let result = shared.read().await.clone();
        Ok(result)
    }

    /// Drive an execution whose state lives in `shared`
    pub async fn run(
        &self,
        definition: &WorkflowDefinition,
        shared: Arc<RwLock<WorkflowExecution>>,
        control: Arc<ExecutionControl>,
    ) -> Result<()> {
        let execution_id = {
            let mut execution = shared.write().await;
            execution.status = ExecutionStatus::Running;
            if execution.started_at.is_none() {
                execution.started_at = Some(Utc::now());
            }
            execution.execution_id.clone()
        };
        info!(execution = %execution_id, workflow = %definition.id, "Execution started");

        let deadline_dispatcher: Arc<dyn TaskDispatcher> = Arc::new(DeadlineDispatcher {
            inner: self.dispatcher.clone(),
        });

        // Rebuild the output mirror from any restored state.
        let mut outputs: HashMap<String, Value> = {
            let execution = shared.read().await;
            execution
                .task_states
                .iter()
                .filter_map(|(id, state)| state.output.clone().map(|out| (id.clone(), out)))
                .collect()
        };

        self.derive_ready_set(definition, &shared).await?;

        let mut in_flight: JoinSet<(String, AttemptOutcome)> = JoinSet::new();
        let mut abort_handles: HashMap<String, AbortHandle> = HashMap::new();
        let mut draining = false;
        let mut was_paused = false;
        let mut last_checkpoint = Instant::now();

        loop {
            if control.is_cancelled() {
                self.finish_cancelled(definition, &shared, &mut in_flight).await?;
                self.take_checkpoint(&shared).await;
                return Ok(());
            }

            // Pause edge: abort running tasks that opted into it.
            if control.is_paused() && !was_paused {
                self.handle_pause(definition, &shared, &mut abort_handles).await?;
                let mut execution = shared.write().await;
                execution.status = ExecutionStatus::Paused;
            }
            if !control.is_paused() && was_paused {
                let mut execution = shared.write().await;
                execution.status = ExecutionStatus::Running;
            }
            was_paused = control.is_paused();

            if control.take_checkpoint_request() {
                self.take_checkpoint(&shared).await;
                last_checkpoint = Instant::now();
            }

            if !control.is_paused() && !draining {
                self.dispatch_ready(
                    definition,
                    &shared,
                    &deadline_dispatcher,
                    &mut in_flight,
                    &mut abort_handles,
                    &outputs,
                )
                .await?;
            }

            if in_flight.is_empty() {
                if control.is_paused() {
                    // Bounded wait so a resume between the check and the
                    // await cannot strand the loop.
                    let _ = tokio::time::timeout(Duration::from_millis(100), control.signalled()).await;
                    continue;
                }
                let ready_left = !shared.read().await.tasks_in(TaskStatus::Ready).is_empty();
                if draining || !ready_left {
                    break;
                }
                continue;
            }

            let checkpoint_sleep = self
                .config
                .checkpoint_interval
                .saturating_sub(last_checkpoint.elapsed());

            tokio::select! {
                joined = in_flight.join_next() => {
                    match joined {
                        Some(Ok((task_id, outcome))) => {
                            abort_handles.remove(&task_id);
                            self.handle_completion(
                                definition,
                                &shared,
                                &task_id,
                                outcome,
                                &mut outputs,
                                &mut draining,
                            )
                            .await?;
                        }
                        Some(Err(join_error)) => {
                            if join_error.is_cancelled() {
                                // Aborted by pause or cancel; state was
                                // already re-marked by the initiator.
                                continue;
                            }
                            error!(error = %join_error, "Worker panicked; parking execution");
                            let mut execution = shared.write().await;
                            execution.status = ExecutionStatus::FailedEngine;
                            execution.finished_at = Some(Utc::now());
                            drop(execution);
                            self.take_checkpoint(&shared).await;
                            return Err(WorkflowError::EngineFault(join_error.to_string()));
                        }
                        None => {}
                    }
                }
                _ = control.signalled() => {}
                _ = tokio::time::sleep(checkpoint_sleep), if self.checkpoints.is_some() => {
                    self.take_checkpoint(&shared).await;
                    last_checkpoint = Instant::now();
                }
            }
        }

        self.finalize(definition, &shared).await;
        self.take_checkpoint(&shared).await;
        Ok(())
    }

    /// Promote pending tasks whose dependencies are all satisfied
    async fn derive_ready_set(
        &self,
        definition: &WorkflowDefinition,
        shared: &Arc<RwLock<WorkflowExecution>>,
    ) -> Result<()> {
        let mut execution = shared.write().await;
        let satisfied: Vec<String> = definition
            .tasks
            .iter()
            .filter(|(task_id, task)| {
                execution
                    .task_states
                    .get(*task_id)
                    .map(|state| state.status == TaskStatus::Pending)
                    .unwrap_or(false)
                    && task.depends_on.iter().all(|dep| {
                        execution
                            .task_states
                            .get(dep)
                            .map(|state| state.status.satisfies_dependents())
                            .unwrap_or(false)
                    })
            })
            .map(|(task_id, _)| task_id.clone())
            .collect();

        for task_id in satisfied {
            let state = execution.task_states.get_mut(&task_id).expect("known task");
            state.transition(&task_id, TaskStatus::Ready)?;
        }
        Ok(())
    }

    /// Dispatch ready tasks up to the worker pool bound
    ///
    /// Order among ready tasks is priority descending, then task id; a
    /// throughput preference, not a correctness requirement.
    #[allow(clippy::too_many_arguments)]
    async fn dispatch_ready(
        &self,
        definition: &WorkflowDefinition,
        shared: &Arc<RwLock<WorkflowExecution>>,
        dispatcher: &Arc<dyn TaskDispatcher>,
        in_flight: &mut JoinSet<(String, AttemptOutcome)>,
        abort_handles: &mut HashMap<String, AbortHandle>,
        outputs: &HashMap<String, Value>,
    ) -> Result<()> {
        let (execution_id, inputs, mut ready): (String, Value, Vec<String>) = {
            let execution = shared.read().await;
            (
                execution.execution_id.clone(),
                execution.inputs.clone(),
                execution
                    .tasks_in(TaskStatus::Ready)
                    .into_iter()
                    .map(String::from)
                    .collect(),
            )
        };

        ready.sort_by(|a, b| {
            let pa = definition.tasks.get(a).map(|t| t.priority).unwrap_or(0);
            let pb = definition.tasks.get(b).map(|t| t.priority).unwrap_or(0);
            pb.cmp(&pa).then_with(|| a.cmp(b))
        });

        for task_id in ready {
            if in_flight.len() >= self.config.max_concurrent_tasks {
                break;
            }
            let task = definition
                .tasks
                .get(&task_id)
                .ok_or_else(|| WorkflowError::NotFound(task_id.clone()))?;

            let input = match substitute(&task.input, &inputs, outputs) {
                Ok(input) => input,
                Err(e) => {
                    // Unresolvable references fail the task without dispatch.
                    warn!(task = %task_id, error = %e, "Input substitution failed");
                    let mut execution = shared.write().await;
                    let state = execution.task_states.get_mut(&task_id).expect("known task");
                    state.transition(&task_id, TaskStatus::Running)?;
                    state.transition(&task_id, TaskStatus::Failed)?;
                    state.error = Some(e.to_string());
                    continue;
                }
            };

            {
                let mut execution = shared.write().await;
                let state = execution.task_states.get_mut(&task_id).expect("known task");
                state.transition(&task_id, TaskStatus::Running)?;
            }

            let invocation = TaskInvocation {
                execution_id: execution_id.clone(),
                task_id: task_id.clone(),
                component: task.component.clone(),
                action: task.action.clone(),
                input,
                deadline: task
                    .timeout_ms
                    .map(Duration::from_millis)
                    .unwrap_or(self.config.default_task_deadline),
            };
            let policy = task.retry_policy;
            let dispatcher = dispatcher.clone();
            let spawned_id = task_id.clone();

            debug!(task = %task_id, component = %invocation.component, "Dispatching task");
            let handle = in_flight.spawn(async move {
                let outcome = run_with_retries(dispatcher.as_ref(), &invocation, &policy).await;
                (spawned_id, outcome)
            });
            abort_handles.insert(task_id, handle);
        }
        Ok(())
    }

    /// Record a finished attempt loop and apply failure handling
    async fn handle_completion(
        &self,
        definition: &WorkflowDefinition,
        shared: &Arc<RwLock<WorkflowExecution>>,
        task_id: &str,
        outcome: AttemptOutcome,
        outputs: &mut HashMap<String, Value>,
        draining: &mut bool,
    ) -> Result<()> {
        let task = definition
            .tasks
            .get(task_id)
            .ok_or_else(|| WorkflowError::NotFound(task_id.to_string()))?;

        let mut newly_satisfied = false;
        let mut durable_transition = false;
        {
            let mut execution = shared.write().await;
            let state = execution.task_states.get_mut(task_id).expect("known task");
            if state.status != TaskStatus::Running {
                // Aborted during pause and already re-queued; discard.
                debug!(task = %task_id, status = %state.status, "Dropping stale completion");
                return Ok(());
            }
            state.attempts = state.attempts.saturating_add(outcome.attempts);

            match outcome.result {
                Ok(output) => {
                    state.transition(task_id, TaskStatus::Succeeded)?;
                    state.output = Some(output.clone());
                    outputs.insert(task_id.to_string(), output);
                    newly_satisfied = true;
                    info!(task = %task_id, attempts = state.attempts, "Task succeeded");
                }
                Err(e) => {
                    state.error = Some(e.to_string());
                    match &task.on_error {
                        OnError::Fail => {
                            state.transition(task_id, TaskStatus::Failed)?;
                            warn!(task = %task_id, error = %e, "Task failed; draining execution");
                            *draining = true;
                        }
                        OnError::Skip => {
                            state.transition(task_id, TaskStatus::Skipped)?;
                            warn!(task = %task_id, error = %e, "Task failed; skipped for dependents");
                            newly_satisfied = true;
                        }
                        OnError::Compensate(target) => {
                            state.transition(task_id, TaskStatus::Failed)?;
                            warn!(
                                task = %task_id,
                                compensation = %target,
                                error = %e,
                                "Task failed; scheduling compensation"
                            );
                            let target = target.clone();
                            let target_state =
                                execution.task_states.get_mut(&target).expect("validated");
                            if target_state.status == TaskStatus::Pending {
                                target_state.transition(&target, TaskStatus::Ready)?;
                            }

                            // A failed task never satisfies dependents, so
                            // anything pending downstream of it (other than
                            // the compensation path, which was just queued)
                            // can never run; cancel the whole subtree.
                            let mut stranded: Vec<String> = definition
                                .dependents_of(task_id)
                                .into_iter()
                                .map(String::from)
                                .collect();
                            while let Some(dependent) = stranded.pop() {
                                let dep_state = execution
                                    .task_states
                                    .get_mut(&dependent)
                                    .expect("known task");
                                if dep_state.status != TaskStatus::Pending {
                                    continue;
                                }
                                dep_state.transition(&dependent, TaskStatus::Cancelled)?;
                                warn!(
                                    task = %dependent,
                                    failed_dependency = %task_id,
                                    "Dependency failed under compensation; task cancelled"
                                );
                                stranded.extend(
                                    definition.dependents_of(&dependent).into_iter().map(String::from),
                                );
                            }
                        }
                    }
                }
            }
            durable_transition = durable_transition || task.durable;
        }

        // Promotion is independent of pause and drain; those only gate
        // dispatch, and the finalizer cancels whatever a drain strands.
        if newly_satisfied {
            self.promote_dependents(definition, shared, task_id).await?;
        }
        if durable_transition {
            self.take_checkpoint(shared).await;
        }
        Ok(())
    }

    /// Promote dependents of a newly satisfied task
    async fn promote_dependents(
        &self,
        definition: &WorkflowDefinition,
        shared: &Arc<RwLock<WorkflowExecution>>,
        task_id: &str,
    ) -> Result<()> {
        let dependents: Vec<String> = definition
            .dependents_of(task_id)
            .into_iter()
            .map(String::from)
            .collect();

        let mut execution = shared.write().await;
        for dependent in dependents {
            let satisfied = definition.tasks[&dependent].depends_on.iter().all(|dep| {
                execution
                    .task_states
                    .get(dep)
                    .map(|state| state.status.satisfies_dependents())
                    .unwrap_or(false)
            });
            if satisfied {
                let state = execution.task_states.get_mut(&dependent).expect("known task");
                if state.status == TaskStatus::Pending {
                    state.transition(&dependent, TaskStatus::Ready)?;
                }
            }
        }
        Ok(())
    }

    /// Abort running `cancel_on_pause` tasks and re-queue them
    async fn handle_pause(
        &self,
        definition: &WorkflowDefinition,
        shared: &Arc<RwLock<WorkflowExecution>>,
        abort_handles: &mut HashMap<String, AbortHandle>,
    ) -> Result<()> {
        let mut execution = shared.write().await;
        let running: Vec<String> = execution
            .tasks_in(TaskStatus::Running)
            .into_iter()
            .map(String::from)
            .collect();
        for task_id in running {
            let cancel = definition
                .tasks
                .get(&task_id)
                .map(|task| task.cancel_on_pause)
                .unwrap_or(false);
            if cancel {
                if let Some(handle) = abort_handles.remove(&task_id) {
                    handle.abort();
                }
                let state = execution.task_states.get_mut(&task_id).expect("known task");
                state.transition(&task_id, TaskStatus::Ready)?;
                debug!(task = %task_id, "Paused; in-flight attempt aborted and task re-queued");
            }
        }
        Ok(())
    }

    /// Cancel path: abort everything and mark non-terminal tasks cancelled
    ///
    /// Compensating tasks already scheduled by earlier failures do not run
    /// unless the engine was configured with `compensate_on_cancel`.
    async fn finish_cancelled(
        &self,
        definition: &WorkflowDefinition,
        shared: &Arc<RwLock<WorkflowExecution>>,
        in_flight: &mut JoinSet<(String, AttemptOutcome)>,
    ) -> Result<()> {
        in_flight.abort_all();
        while in_flight.join_next().await.is_some() {}

        if self.config.compensate_on_cancel {
            self.run_pending_compensations(definition, shared).await;
        }

        let mut execution = shared.write().await;
        let live: Vec<String> = execution
            .task_states
            .iter()
            .filter(|(_, state)| !state.status.is_terminal())
            .map(|(id, _)| id.clone())
            .collect();
        for task_id in live {
            let state = execution.task_states.get_mut(&task_id).expect("known task");
            state.transition(&task_id, TaskStatus::Cancelled)?;
        }
        execution.status = ExecutionStatus::Cancelled;
        execution.finished_at = Some(Utc::now());
        info!(execution = %execution.execution_id, "Execution cancelled");
        Ok(())
    }

    /// Run compensation tasks already scheduled by failures, serially
    async fn run_pending_compensations(
        &self,
        definition: &WorkflowDefinition,
        shared: &Arc<RwLock<WorkflowExecution>>,
    ) {
        let (execution_id, inputs, outputs, targets) = {
            let execution = shared.read().await;
            let targets: Vec<String> = execution
                .task_states
                .iter()
                .filter(|(task_id, state)| {
                    state.status == TaskStatus::Failed
                        && matches!(
                            definition.tasks.get(*task_id).map(|t| &t.on_error),
                            Some(OnError::Compensate(_))
                        )
                })
                .filter_map(|(task_id, _)| match &definition.tasks[task_id].on_error {
                    OnError::Compensate(target) => Some(target.clone()),
                    _ => None,
                })
                .collect();
            let outputs: HashMap<String, Value> = execution
                .task_states
                .iter()
                .filter_map(|(id, state)| state.output.clone().map(|out| (id.clone(), out)))
                .collect();
            (
                execution.execution_id.clone(),
                execution.inputs.clone(),
                outputs,
                targets,
            )
        };

        for target in targets {
            let runnable = {
                let execution = shared.read().await;
                execution
                    .task_states
                    .get(&target)
                    .map(|state| matches!(state.status, TaskStatus::Pending | TaskStatus::Ready))
                    .unwrap_or(false)
            };
            if !runnable {
                continue;
            }
            let Some(task) = definition.tasks.get(&target) else {
                continue;
            };
            let input = substitute(&task.input, &inputs, &outputs).unwrap_or_else(|_| task.input.clone());
            let invocation = TaskInvocation {
                execution_id: execution_id.clone(),
                task_id: target.clone(),
                component: task.component.clone(),
                action: task.action.clone(),
                input,
                deadline: task
                    .timeout_ms
                    .map(Duration::from_millis)
                    .unwrap_or(self.config.default_task_deadline),
            };
            let outcome = run_with_retries(self.dispatcher.as_ref(), &invocation, &task.retry_policy).await;

            let mut execution = shared.write().await;
            let state = execution.task_states.get_mut(&target).expect("checked above");
            if state.status == TaskStatus::Pending {
                let _ = state.transition(&target, TaskStatus::Ready);
            }
            let _ = state.transition(&target, TaskStatus::Running);
            state.attempts = state.attempts.saturating_add(outcome.attempts);
            match outcome.result {
                Ok(output) => {
                    let _ = state.transition(&target, TaskStatus::Succeeded);
                    state.output = Some(output);
                }
                Err(e) => {
                    state.error = Some(e.to_string());
                    let _ = state.transition(&target, TaskStatus::Failed);
                }
            }
        }
    }

    /// Compute the final status once nothing is ready or running
    async fn finalize(&self, definition: &WorkflowDefinition, shared: &Arc<RwLock<WorkflowExecution>>) {
        let mut execution = shared.write().await;

        // The loop only stops when nothing is ready or running, so a task
        // still live here (drained by a failure, or stranded behind an
        // unsatisfiable dependency) can never run; cancel it rather than
        // finish the execution with non-terminal tasks.
        if execution.has_live_tasks() {
            let leftovers: Vec<String> = execution
                .task_states
                .iter()
                .filter(|(_, state)| !state.status.is_terminal())
                .map(|(id, _)| id.clone())
                .collect();
            for task_id in leftovers {
                warn!(task = %task_id, "Task never became runnable; cancelled at finalize");
                let state = execution.task_states.get_mut(&task_id).expect("known task");
                let _ = state.transition(&task_id, TaskStatus::Cancelled);
            }
        }

        let fatally_failed = execution.task_states.iter().any(|(task_id, state)| {
            state.status == TaskStatus::Failed
                && matches!(
                    definition.tasks.get(task_id).map(|t| &t.on_error),
                    Some(OnError::Fail) | None
                )
        });

        execution.status = if fatally_failed {
            ExecutionStatus::Failed
        } else {
            ExecutionStatus::Succeeded
        };
        execution.finished_at = Some(Utc::now());
        info!(
            execution = %execution.execution_id,
            status = ?execution.status,
            "Execution finished"
        );
    }

    /// Take a checkpoint if a store is attached
    async fn take_checkpoint(&self, shared: &Arc<RwLock<WorkflowExecution>>) {
        let Some(store) = &self.checkpoints else {
            return;
        };
        let checkpoint = {
            let execution = shared.read().await;
            Checkpoint::capture(&execution)
        };
        let checkpoint_id = checkpoint.checkpoint_id.clone();
        match store.save(&checkpoint).await {
            Ok(()) => {
                let mut execution = shared.write().await;
                execution.checkpoints.push(checkpoint_id);
            }
            Err(e) => {
                // Persistence trouble is logged loudly but does not kill a
                // healthy execution.
                error!(error = %e, "Checkpoint write failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{RetryPolicy, TaskDef};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    /// Scripted dispatcher: maps task ids to sequences of results.
    pub struct ScriptedDispatcher {
        script: Mutex<HashMap<String, Vec<std::result::Result<Value, DispatchError>>>>,
        pub dispatched: Mutex<Vec<String>>,
    }

    impl ScriptedDispatcher {
        pub fn new() -> Self {
            Self {
                script: Mutex::new(HashMap::new()),
                dispatched: Mutex::new(Vec::new()),
            }
        }

        pub fn succeed(&self, task_id: &str, output: Value) {
            self.push(task_id, Ok(output));
        }

        pub fn fail_transport(&self, task_id: &str) {
            self.push(
                task_id,
                Err(DispatchError::Transport(transport::TransportError::Timeout(100))),
            );
        }

        pub fn fail_task(&self, task_id: &str) {
            self.push(
                task_id,
                Err(DispatchError::Task {
                    message: "component rejected".to_string(),
                    retryable: false,
                }),
            );
        }

        fn push(&self, task_id: &str, result: std::result::Result<Value, DispatchError>) {
            self.script
                .lock()
                .unwrap()
                .entry(task_id.to_string())
                .or_default()
                .push(result);
        }
    }

    #[async_trait]
    impl TaskDispatcher for ScriptedDispatcher {
        async fn dispatch(
            &self,
            invocation: &TaskInvocation,
        ) -> std::result::Result<Value, DispatchError> {
            self.dispatched.lock().unwrap().push(invocation.task_id.clone());
            let mut script = self.script.lock().unwrap();
            let queue = script.entry(invocation.task_id.clone()).or_default();
            if queue.is_empty() {
                Ok(json!({"default": true}))
            } else {
                queue.remove(0)
            }
        }
    }

    fn task(component: &str) -> TaskDef {
        TaskDef {
            name: component.to_string(),
            component: component.to_string(),
            action: "run".to_string(),
            input: Value::Null,
            depends_on: vec![],
            retry_policy: RetryPolicy {
                max_attempts: 3,
                base_delay_ms: 1,
                cap_delay_ms: 5,
            },
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
            name: "test".to_string(),
            version: "1".to_string(),
            parameters_schema: Default::default(),
            tasks: tasks
                .into_iter()
                .map(|(id, t)| (id.to_string(), t))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    #[tokio::test]
    async fn test_single_task_dispatches_once_and_terminates() {
        let dispatcher = Arc::new(ScriptedDispatcher::new());
        dispatcher.succeed("only", json!({"done": true}));

        let engine = WorkflowEngine::new(dispatcher.clone());
        let def = definition(vec![("only", task("telos"))]);
        let execution = engine.execute(&def, json!({})).await.unwrap();

        assert_eq!(execution.status, ExecutionStatus::Succeeded);
        assert_eq!(dispatcher.dispatched.lock().unwrap().len(), 1);
        assert_eq!(execution.task_states["only"].attempts, 1);
    }

    #[tokio::test]
    async fn test_dependency_and_retry_scenario() {
        // A succeeds; B times out once, then succeeds; final status
        // succeeded with B.attempts == 2.
        let dispatcher = Arc::new(ScriptedDispatcher::new());
        dispatcher.succeed("a", json!({"output": "X"}));
        dispatcher.fail_transport("b");
        dispatcher.succeed("b", json!({"output": "Y"}));

        let mut b = task("athena");
        b.depends_on = vec!["a".to_string()];
        b.input = json!({"data": "${tasks.a.output}"});
        let def = definition(vec![("a", task("telos")), ("b", b)]);

        let engine = WorkflowEngine::new(dispatcher.clone());
        let execution = engine.execute(&def, json!({})).await.unwrap();

        assert_eq!(execution.status, ExecutionStatus::Succeeded);
        assert_eq!(execution.task_states["b"].attempts, 2);
        assert_eq!(execution.task_states["b"].output, Some(json!({"output": "Y"})));
        // B dispatched only after A.
        let order = dispatcher.dispatched.lock().unwrap().clone();
        assert_eq!(order, vec!["a", "b", "b"]);
    }

    #[tokio::test]
    async fn test_fail_drains_execution() {
        let dispatcher = Arc::new(ScriptedDispatcher::new());
        dispatcher.fail_task("a");

        let mut b = task("athena");
        b.depends_on = vec!["a".to_string()];
        let def = definition(vec![("a", task("telos")), ("b", b)]);

        let engine = WorkflowEngine::new(dispatcher.clone());
        let execution = engine.execute(&def, json!({})).await.unwrap();

        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert_eq!(execution.task_states["a"].status, TaskStatus::Failed);
        // B never started and was cancelled by the drain.
        assert_eq!(execution.task_states["b"].status, TaskStatus::Cancelled);
        assert_eq!(dispatcher.dispatched.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_skip_satisfies_dependents() {
        let dispatcher = Arc::new(ScriptedDispatcher::new());
        dispatcher.fail_task("a");
        dispatcher.succeed("b", json!({"ok": 1}));

        let mut a = task("telos");
        a.on_error = OnError::Skip;
        let mut b = task("athena");
        b.depends_on = vec!["a".to_string()];
        let def = definition(vec![("a", a), ("b", b)]);

        let engine = WorkflowEngine::new(dispatcher);
        let execution = engine.execute(&def, json!({})).await.unwrap();

        assert_eq!(execution.status, ExecutionStatus::Succeeded);
        assert_eq!(execution.task_states["a"].status, TaskStatus::Skipped);
        assert_eq!(execution.task_states["b"].status, TaskStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_compensation_runs_on_failure() {
        let dispatcher = Arc::new(ScriptedDispatcher::new());
        dispatcher.fail_task("work");
        dispatcher.succeed("undo", json!({"compensated": true}));

        let mut work = task("telos");
        work.on_error = OnError::Compensate("undo".to_string());
        let mut undo = task("telos");
        // The compensation task only runs when scheduled.
        undo.depends_on = vec!["work".to_string()];
        let def = definition(vec![("work", work), ("undo", undo)]);

        let engine = WorkflowEngine::new(dispatcher.clone());
        let execution = engine.execute(&def, json!({})).await.unwrap();

        assert_eq!(execution.task_states["work"].status, TaskStatus::Failed);
        assert_eq!(execution.task_states["undo"].status, TaskStatus::Succeeded);
        // The failure was compensated, so the run is not a failure.
        assert_eq!(execution.status, ExecutionStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_compensation_cancels_stranded_dependents() {
        let dispatcher = Arc::new(ScriptedDispatcher::new());
        dispatcher.fail_task("work");
        dispatcher.succeed("undo", json!({"compensated": true}));

        let mut work = task("telos");
        work.on_error = OnError::Compensate("undo".to_string());
        let mut undo = task("telos");
        undo.depends_on = vec!["work".to_string()];
        // Depends on the compensated task without being its compensation
        // target; a failed dependency can never satisfy it.
        let mut report = task("athena");
        report.depends_on = vec!["work".to_string()];
        let mut notify = task("hermes");
        notify.depends_on = vec!["report".to_string()];
        let def = definition(vec![
            ("work", work),
            ("undo", undo),
            ("report", report),
            ("notify", notify),
        ]);

        let engine = WorkflowEngine::new(dispatcher.clone());
        let execution = engine.execute(&def, json!({})).await.unwrap();

        assert_eq!(execution.task_states["work"].status, TaskStatus::Failed);
        assert_eq!(execution.task_states["undo"].status, TaskStatus::Succeeded);
        // The stranded subtree is cancelled, not left pending forever.
        assert_eq!(execution.task_states["report"].status, TaskStatus::Cancelled);
        assert_eq!(execution.task_states["notify"].status, TaskStatus::Cancelled);
        assert!(!execution.has_live_tasks());
        assert_eq!(execution.status, ExecutionStatus::Succeeded);

        // Neither stranded task was ever dispatched.
        let order = dispatcher.dispatched.lock().unwrap().clone();
        assert!(!order.contains(&"report".to_string()));
        assert!(!order.contains(&"notify".to_string()));
    }

    #[tokio::test]
    async fn test_finalize_cancels_tasks_behind_failed_dependency() {
        // A substitution failure marks the task failed without draining;
        // its dependent must still end terminal, not pending.
        let dispatcher = Arc::new(ScriptedDispatcher::new());

        let mut broken = task("telos");
        broken.on_error = OnError::Skip;
        broken.input = json!("${parameters.missing}");
        let mut after = task("athena");
        after.depends_on = vec!["broken".to_string()];
        let def = definition(vec![("broken", broken), ("after", after)]);

        let engine = WorkflowEngine::new(dispatcher.clone());
        let execution = engine.execute(&def, json!({})).await.unwrap();

        assert_eq!(execution.task_states["broken"].status, TaskStatus::Failed);
        assert_eq!(execution.task_states["after"].status, TaskStatus::Cancelled);
        assert!(!execution.has_live_tasks());
        assert!(dispatcher.dispatched.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_parameter_substitution_in_dispatch() {
        struct CapturingDispatcher {
            seen: Mutex<Option<Value>>,
        }

        #[async_trait]
        impl TaskDispatcher for CapturingDispatcher {
            async fn dispatch(
                &self,
                invocation: &TaskInvocation,
            ) -> std::result::Result<Value, DispatchError> {
                *self.seen.lock().unwrap() = Some(invocation.input.clone());
                Ok(json!({}))
            }
        }

        let dispatcher = Arc::new(CapturingDispatcher {
            seen: Mutex::new(None),
        });
        let mut only = task("telos");
        only.input = json!({"region": "${parameters.region}"});
        let def = definition(vec![("only", only)]);

        let engine = WorkflowEngine::new(dispatcher.clone());
        engine.execute(&def, json!({"region": "eu-west"})).await.unwrap();

        assert_eq!(
            dispatcher.seen.lock().unwrap().clone().unwrap(),
            json!({"region": "eu-west"})
        );
    }

    #[tokio::test]
    async fn test_cancel_marks_tasks_cancelled() {
        struct SlowDispatcher;

        #[async_trait]
        impl TaskDispatcher for SlowDispatcher {
            async fn dispatch(
                &self,
                _: &TaskInvocation,
            ) -> std::result::Result<Value, DispatchError> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(json!({}))
            }
        }

        let def = definition(vec![("slow", task("telos"))]);
        let engine = Arc::new(WorkflowEngine::new(Arc::new(SlowDispatcher)));
        let control = Arc::new(ExecutionControl::new());

        let run = {
            let engine = engine.clone();
            let control = control.clone();
            let def = def.clone();
            tokio::spawn(async move { engine.execute_with_control(&def, json!({}), control).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        control.cancel();
        let execution = run.await.unwrap().unwrap();

        assert_eq!(execution.status, ExecutionStatus::Cancelled);
        assert_eq!(execution.task_states["slow"].status, TaskStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_priority_orders_dispatch() {
        let dispatcher = Arc::new(ScriptedDispatcher::new());

        let mut low = task("telos");
        low.priority = 1;
        let mut high = task("athena");
        high.priority = 9;
        let def = definition(vec![("low", low), ("high", high)]);

        // Pool of one forces strictly ordered dispatch.
        let engine = WorkflowEngine::new(dispatcher.clone())
            .with_config(EngineConfig::default().with_max_concurrent_tasks(1));
        engine.execute(&def, json!({})).await.unwrap();

        let order = dispatcher.dispatched.lock().unwrap().clone();
        assert_eq!(order, vec!["high", "low"]);
    }
}
