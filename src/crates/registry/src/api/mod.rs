//! HTTP surface for the service registry
//!
//! Endpoints per the wire contract: `POST /register`, `POST /unregister`,
//! `POST /heartbeat`, `GET /resolve`, `GET /components`, `GET /events`
//! (SSE). Bodies use the uniform `{ok, data?, error?}` envelope.
//!
//! Writes pass a bounded intake gate and reject with 503 `overloaded` when
//! it is saturated; heartbeats never reject and resolution never blocks on
//! writes in the queue.

mod handlers;

use crate::registry::ServiceRegistry;
use crate::RegistryError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tower_http::trace::TraceLayer;
use transport::envelope::{ApiResponse, ErrorBody};

/// Shared API state
#[derive(Clone)]
pub struct ApiState {
    /// The registry behind the API
    pub registry: Arc<ServiceRegistry>,
    /// Bounded intake gate for state-changing requests
    pub intake: Arc<Semaphore>,
}

impl ApiState {
    /// Create API state with the given intake bound
    pub fn new(registry: Arc<ServiceRegistry>, intake_limit: usize) -> Self {
        Self {
            registry,
            intake: Arc::new(Semaphore::new(intake_limit)),
        }
    }
}

/// Build the registry router
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/register", post(handlers::register))
        .route("/unregister", post(handlers::unregister))
        .route("/heartbeat", post(handlers::heartbeat))
        .route("/resolve", get(handlers::resolve))
        .route("/components", get(handlers::components))
        .route("/events", get(handlers::events))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Map a registry error onto its HTTP status
pub fn status_for(error: &RegistryError) -> StatusCode {
    match error {
        RegistryError::Invalid(_)
        | RegistryError::DependencyCycle(_)
        | RegistryError::Serialization(_) => StatusCode::BAD_REQUEST,
        RegistryError::NotFound(_)
        | RegistryError::Unknown(_)
        | RegistryError::NoFallbackAvailable(_) => StatusCode::NOT_FOUND,
        RegistryError::Conflict(_) => StatusCode::CONFLICT,
        RegistryError::Stale { .. } => StatusCode::GONE,
        RegistryError::Overloaded(_) => StatusCode::SERVICE_UNAVAILABLE,
        RegistryError::Transport(_) | RegistryError::Tooling(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Render a registry error as an enveloped response
pub fn error_response(error: &RegistryError) -> Response {
    let body = ApiResponse::err(ErrorBody::new(error.code(), error.to_string()));
    (status_for(error), Json(body)).into_response()
}
