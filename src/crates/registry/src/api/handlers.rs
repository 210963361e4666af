//! Request handlers for the registry API

use super::{error_response, ApiState};
use crate::component::ComponentDescriptor;
use crate::RegistryError;
use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json, Response};
use futures::Stream;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use transport::envelope::ApiResponse;
use uuid::Uuid;

/// Body for `POST /register`
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    /// Component descriptor
    pub component: ComponentDescriptor,
    /// Instance uuid for this incarnation
    pub instance_uuid: Uuid,
}

/// Body for `POST /unregister`
#[derive(Debug, Deserialize)]
pub struct UnregisterRequest {
    /// Component id
    pub id: String,
    /// Instance uuid being unregistered
    pub instance_uuid: Uuid,
}

/// Body for `POST /heartbeat`
#[derive(Debug, Deserialize)]
pub struct HeartbeatRequest {
    /// Component id
    pub id: String,
    /// Instance uuid the heartbeat belongs to
    pub instance_uuid: Uuid,
    /// Metric gauges
    #[serde(default)]
    pub metrics: HashMap<String, f64>,
}

/// Query for `GET /resolve`
#[derive(Debug, Deserialize)]
pub struct ResolveQuery {
    /// Component name to resolve
    pub name: Option<String>,
    /// Capability to resolve
    pub capability: Option<String>,
}

fn ok_response(data: serde_json::Value) -> Response {
    Json(ApiResponse::ok(data)).into_response()
}

pub(super) async fn register(
    State(state): State<ApiState>,
    Json(request): Json<RegisterRequest>,
) -> Response {
    // Registration is a write; it respects the intake bound.
    let Ok(_permit) = state.intake.try_acquire() else {
        return error_response(&RegistryError::Overloaded("registration intake full".to_string()));
    };

    match state.registry.register(request.component, request.instance_uuid).await {
        Ok(token) => ok_response(json!(token)),
        Err(e) => error_response(&e),
    }
}

pub(super) async fn unregister(
    State(state): State<ApiState>,
    Json(request): Json<UnregisterRequest>,
) -> Response {
    let Ok(_permit) = state.intake.try_acquire() else {
        return error_response(&RegistryError::Overloaded("unregistration intake full".to_string()));
    };

    match state.registry.unregister(&request.id, request.instance_uuid).await {
        Ok(()) => ok_response(json!({"unregistered": request.id})),
        Err(e) => error_response(&e),
    }
}

pub(super) async fn heartbeat(
    State(state): State<ApiState>,
    Json(request): Json<HeartbeatRequest>,
) -> Response {
    // Heartbeats never reject on load; no intake gate here.
    match state
        .registry
        .heartbeat(&request.id, request.instance_uuid, request.metrics)
        .await
    {
        Ok(directive) => ok_response(json!({"directive": directive})),
        Err(e) => error_response(&e),
    }
}

pub(super) async fn resolve(
    State(state): State<ApiState>,
    Query(query): Query<ResolveQuery>,
) -> Response {
    match (query.name, query.capability) {
        (Some(name), None) => match state.registry.resolve_name(&name).await {
            Ok(endpoints) => ok_response(json!({"endpoints": endpoints})),
            Err(e) => error_response(&e),
        },
        (None, Some(capability)) => match state.registry.resolve_capability(&capability).await {
            Ok(providers) => ok_response(json!({"providers": providers})),
            Err(e) => error_response(&e),
        },
        _ => error_response(&RegistryError::Invalid(
            "Exactly one of name= or capability= is required".to_string(),
        )),
    }
}

pub(super) async fn components(State(state): State<ApiState>) -> Response {
    let components = state.registry.components().await;
    ok_response(json!({"components": components}))
}

/// Query for `GET /events`
#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    /// Restrict the stream to one component's events
    pub component: Option<String>,
}

pub(super) async fn events(
    State(state): State<ApiState>,
    Query(query): Query<EventsQuery>,
) -> Sse<impl Stream<Item = std::result::Result<Event, axum::Error>>> {
    let receiver = state.registry.subscribe();
    let stream = BroadcastStream::new(receiver).filter_map(move |item| match item {
        Ok(event) => {
            if let Some(component) = &query.component {
                if event.component_id() != component {
                    return None;
                }
            }
            match serde_json::to_string(&event) {
                Ok(body) => Some(Ok(Event::default().data(body))),
                Err(_) => None,
            }
        }
        // A lagged subscriber skips missed events rather than erroring.
        Err(BroadcastStreamRecvError::Lagged(_)) => None,
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}
