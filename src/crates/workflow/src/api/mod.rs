//! HTTP surface for the orchestrator
//!
//! Workflow definition and execution control, plus the standard
//! `POST /workflow` push endpoint that planning-stage components share.
//! Bodies use the uniform `{ok, data?, error?}` envelope.

use crate::definition::WorkflowDefinition;
use crate::push;
use crate::service::OrchestratorService;
use crate::WorkflowError;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use transport::envelope::{ApiResponse, ErrorBody};

/// Shared API state
#[derive(Clone)]
pub struct ApiState {
    /// The orchestrator behind the API
    pub service: Arc<OrchestratorService>,
    /// This component's id for `/workflow` dest matching
    pub component_id: String,
}

/// Build the orchestrator router
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/workflows", post(define))
        .route("/workflows/:id/launch", post(launch))
        .route("/executions/:id", get(status))
        .route("/executions/:id/pause", post(pause))
        .route("/executions/:id/resume", post(resume))
        .route("/executions/:id/cancel", post(cancel))
        .route("/executions/:id/checkpoint", post(checkpoint))
        .route("/executions/:id/restore", post(restore))
        .route("/workflow", post(workflow_push))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn status_for(error: &WorkflowError) -> StatusCode {
    match error {
        WorkflowError::InvalidDefinition(_)
        | WorkflowError::CyclicGraph(_)
        | WorkflowError::InvalidReference(_)
        | WorkflowError::TemplateError(_)
        | WorkflowError::InvalidTransition { .. }
        | WorkflowError::Serialization(_) => StatusCode::BAD_REQUEST,
        WorkflowError::NotFound(_) => StatusCode::NOT_FOUND,
        WorkflowError::TaskFailed { .. }
        | WorkflowError::EngineFault(_)
        | WorkflowError::Tooling(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(error: &WorkflowError) -> Response {
    let body = ApiResponse::err(ErrorBody::new(error.code(), error.to_string()));
    (status_for(error), Json(body)).into_response()
}

fn ok_response(data: Value) -> Response {
    Json(ApiResponse::ok(data)).into_response()
}

async fn define(State(state): State<ApiState>, Json(definition): Json<WorkflowDefinition>) -> Response {
    match state.service.define(definition).await {
        Ok(id) => ok_response(json!({"workflow_id": id})),
        Err(e) => error_response(&e),
    }
}

/// Body for launch
#[derive(Debug, Deserialize)]
struct LaunchRequest {
    #[serde(default)]
    parameters: Value,
}

async fn launch(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(request): Json<LaunchRequest>,
) -> Response {
    match state.service.launch(&id, request.parameters).await {
        Ok(execution_id) => ok_response(json!({"execution_id": execution_id})),
        Err(e) => error_response(&e),
    }
}

async fn status(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    match state.service.status(&id).await {
        Ok(execution) => {
            // Status, last error, and the failing task id surface together.
            let failing = execution
                .task_states
                .iter()
                .find_map(|(id, task)| task.error.clone().map(|error| (id.clone(), error)));
            let (failing_task, last_error) = match failing {
                Some((id, error)) => (Some(id), Some(error)),
                None => (None, None),
            };
            let summary = json!({
                "execution": execution,
                "last_error": last_error,
                "failing_task": failing_task,
            });
            ok_response(summary)
        }
        Err(e) => error_response(&e),
    }
}

async fn pause(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    match state.service.pause(&id).await {
        Ok(()) => ok_response(json!({"paused": id})),
        Err(e) => error_response(&e),
    }
}

async fn resume(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    match state.service.resume(&id).await {
        Ok(()) => ok_response(json!({"resumed": id})),
        Err(e) => error_response(&e),
    }
}

async fn cancel(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    match state.service.cancel(&id).await {
        Ok(()) => ok_response(json!({"cancelled": id})),
        Err(e) => error_response(&e),
    }
}

async fn checkpoint(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    match state.service.checkpoint(&id).await {
        Ok(()) => ok_response(json!({"checkpoint_requested": id})),
        Err(e) => error_response(&e),
    }
}

async fn restore(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    match state.service.restore(&id).await {
        Ok(()) => ok_response(json!({"restored": id})),
        Err(e) => error_response(&e),
    }
}

async fn workflow_push(State(state): State<ApiState>, Json(body): Json<Value>) -> Response {
    let Some(envelope) = push::parse_envelope(&body) else {
        return error_response(&WorkflowError::InvalidDefinition(
            "Malformed /workflow envelope".to_string(),
        ));
    };
    let response = push::handle_push(&state.component_id, &envelope);
    ok_response(json!(response))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_for(&WorkflowError::InvalidDefinition("x".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&WorkflowError::NotFound("x".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_for(&WorkflowError::EngineFault("x".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
