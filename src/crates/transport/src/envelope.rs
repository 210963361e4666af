//! Wire envelopes
//!
//! Three shapes cover all inter-component traffic: the uniform
//! request/response body, the `/workflow` push envelope used by
//! planning-stage components, and the frames carried over framed-JSON
//! sockets.

use crate::{Result, TransportError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Structured error body carried in failed responses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable error code
    pub code: String,
    /// Human-readable message
    pub message: String,
    /// Optional structured details (failing selector, task id, uuid, ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ErrorBody {
    /// Create an error body
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    /// Attach structured details
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Uniform JSON response body: `{ok, data?, error?}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse {
    /// Whether the request succeeded
    pub ok: bool,
    /// Payload on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Error body on failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl ApiResponse {
    /// Successful response with a payload
    pub fn ok(data: Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    /// Failed response
    pub fn err(error: ErrorBody) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(error),
        }
    }

    /// Convert into the payload, mapping failures to `Remote` errors
    pub fn into_result(self) -> Result<Value> {
        if self.ok {
            Ok(self.data.unwrap_or(Value::Null))
        } else {
            let body = self
                .error
                .unwrap_or_else(|| ErrorBody::new("unknown", "peer reported failure without an error body"));
            Err(TransportError::Remote {
                code: body.code,
                message: body.message,
                details: body.details,
            })
        }
    }
}

/// Standard `/workflow` push envelope
///
/// A component receiving an envelope whose `dest` matches its own id
/// treats it as a "look for work" signal. Components never mutate another
/// component's payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowEnvelope {
    /// Per-component instruction map
    pub purpose: BTreeMap<String, String>,
    /// Component the envelope is addressed to
    pub dest: String,
    /// Sprint payload
    pub payload: Value,
}

impl WorkflowEnvelope {
    /// Create an envelope addressed to a component
    pub fn new(dest: impl Into<String>, payload: Value) -> Self {
        Self {
            purpose: BTreeMap::new(),
            dest: dest.into(),
            payload,
        }
    }

    /// Add an instruction for a component
    pub fn with_purpose(mut self, component: impl Into<String>, instruction: impl Into<String>) -> Self {
        self.purpose.insert(component.into(), instruction.into());
        self
    }
}

/// A frame on a framed-JSON socket
///
/// Control frames are `{type:"ping"}` / `{type:"pong"}`; everything else
/// is a data frame `{type, data}` dispatched on its tag.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Keepalive probe
    Ping,
    /// Keepalive response
    Pong,
    /// Tagged data frame
    Data {
        /// Frame tag, dispatched on by receivers
        kind: String,
        /// Frame payload
        data: Value,
    },
}

impl Frame {
    /// Build a data frame
    pub fn data(kind: impl Into<String>, data: Value) -> Self {
        Frame::Data {
            kind: kind.into(),
            data,
        }
    }

    /// Serialize to the wire object
    pub fn to_value(&self) -> Value {
        match self {
            Frame::Ping => serde_json::json!({"type": "ping"}),
            Frame::Pong => serde_json::json!({"type": "pong"}),
            Frame::Data { kind, data } => serde_json::json!({"type": kind, "data": data}),
        }
    }

    /// Parse from a wire object
    pub fn from_value(value: &Value) -> Result<Self> {
        let kind = value
            .get("type")
            .and_then(|v| v.as_str())
            .ok_or_else(|| TransportError::Protocol("Frame missing type tag".to_string()))?;

        Ok(match kind {
            "ping" => Frame::Ping,
            "pong" => Frame::Pong,
            other => Frame::Data {
                kind: other.to_string(),
                data: value.get("data").cloned().unwrap_or(Value::Null),
            },
        })
    }

    /// Serialize to wire text
    pub fn to_text(&self) -> String {
        self.to_value().to_string()
    }

    /// Parse from wire text
    pub fn from_text(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_value(&value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_response_roundtrip() {
        let resp = ApiResponse::ok(json!({"port": 8112}));
        let text = serde_json::to_string(&resp).unwrap();
        let parsed: ApiResponse = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.into_result().unwrap(), json!({"port": 8112}));
    }

    #[test]
    fn test_error_response_maps_to_remote() {
        let resp = ApiResponse::err(
            ErrorBody::new("not_found", "no such component").with_details(json!({"name": "apollo"})),
        );
        let err = resp.into_result().unwrap_err();
        match err {
            TransportError::Remote { code, details, .. } => {
                assert_eq!(code, "not_found");
                assert_eq!(details, Some(json!({"name": "apollo"})));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_error_without_body() {
        let resp = ApiResponse {
            ok: false,
            data: None,
            error: None,
        };
        assert!(matches!(
            resp.into_result(),
            Err(TransportError::Remote { code, .. }) if code == "unknown"
        ));
    }

    #[test]
    fn test_workflow_envelope_shape() {
        let env = WorkflowEnvelope::new("telos", json!({"sprint_name": "sprint-4", "status": "Planning"}))
            .with_purpose("telos", "refine requirements");

        let value = serde_json::to_value(&env).unwrap();
        assert_eq!(value["dest"], "telos");
        assert_eq!(value["purpose"]["telos"], "refine requirements");
        assert_eq!(value["payload"]["status"], "Planning");
    }

    #[test]
    fn test_control_frames() {
        assert_eq!(Frame::from_text(r#"{"type":"ping"}"#).unwrap(), Frame::Ping);
        assert_eq!(Frame::Pong.to_text(), r#"{"type":"pong"}"#);
    }

    #[test]
    fn test_data_frame_roundtrip() {
        let frame = Frame::data("message", json!({"body": "hello"}));
        let parsed = Frame::from_text(&frame.to_text()).unwrap();
        assert_eq!(parsed, frame);
    }

    #[test]
    fn test_untyped_frame_rejected() {
        assert!(Frame::from_text(r#"{"data": 1}"#).is_err());
    }
}
