//! The inter-component `/workflow` push protocol
//!
//! Every planning-stage component exposes `POST /workflow`. An envelope
//! whose `dest` matches the component's own id signals it to look for
//! work in its dashboard; anything else is acknowledged and ignored.
//! Components never mutate another component's payload.
//!
//! Sprints advance through a fixed status ladder:
//! `Planning → Ready-1:<next> → Ready-2:<next> → Ready-3:<next> →
//! Ready-Review → Building → Complete | Superseded`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use transport::envelope::WorkflowEnvelope;

/// Sprint status on the planning ladder
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SprintStatus {
    /// Initial planning
    Planning,
    /// First planning handoff, annotated with the next component
    Ready1(String),
    /// Second planning handoff
    Ready2(String),
    /// Third planning handoff
    Ready3(String),
    /// Awaiting review
    ReadyReview,
    /// Under construction
    Building,
    /// Finished
    Complete,
    /// Abandoned in favor of another sprint
    Superseded,
}

impl SprintStatus {
    /// Parse the wire form (`Planning`, `Ready-2:<next>`, ...)
    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "Planning" => return Some(Self::Planning),
            "Ready-Review" => return Some(Self::ReadyReview),
            "Building" => return Some(Self::Building),
            "Complete" => return Some(Self::Complete),
            "Superseded" => return Some(Self::Superseded),
            _ => {}
        }
        for (prefix, build) in [
            ("Ready-1:", Self::Ready1 as fn(String) -> Self),
            ("Ready-2:", Self::Ready2 as fn(String) -> Self),
            ("Ready-3:", Self::Ready3 as fn(String) -> Self),
        ] {
            if let Some(next) = text.strip_prefix(prefix) {
                if !next.is_empty() {
                    return Some(build(next.to_string()));
                }
            }
        }
        None
    }

    /// The status that follows when handing to `next`
    ///
    /// Terminal statuses return `None`; `Building` resolves outside the
    /// ladder (to `Complete` or `Superseded`) and also returns `None`.
    pub fn advance(&self, next: &str) -> Option<Self> {
        match self {
            Self::Planning => Some(Self::Ready1(next.to_string())),
            Self::Ready1(_) => Some(Self::Ready2(next.to_string())),
            Self::Ready2(_) => Some(Self::Ready3(next.to_string())),
            Self::Ready3(_) => Some(Self::ReadyReview),
            Self::ReadyReview => Some(Self::Building),
            Self::Building | Self::Complete | Self::Superseded => None,
        }
    }
}

impl std::fmt::Display for SprintStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Planning => write!(f, "Planning"),
            Self::Ready1(next) => write!(f, "Ready-1:{}", next),
            Self::Ready2(next) => write!(f, "Ready-2:{}", next),
            Self::Ready3(next) => write!(f, "Ready-3:{}", next),
            Self::ReadyReview => write!(f, "Ready-Review"),
            Self::Building => write!(f, "Building"),
            Self::Complete => write!(f, "Complete"),
            Self::Superseded => write!(f, "Superseded"),
        }
    }
}

/// Response to a `/workflow` push
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushResponse {
    /// Always true for a well-formed envelope
    pub ok: bool,
    /// `accepted` when `dest` matched, `ignored` otherwise
    pub disposition: String,
    /// Receiving component
    pub component: String,
}

/// Handle a `/workflow` envelope addressed to `component_id`
///
/// Accepting an envelope means "look for work"; the payload is never
/// mutated on behalf of another component.
pub fn handle_push(component_id: &str, envelope: &WorkflowEnvelope) -> PushResponse {
    let accepted = envelope.dest == component_id;
    PushResponse {
        ok: true,
        disposition: if accepted { "accepted" } else { "ignored" }.to_string(),
        component: component_id.to_string(),
    }
}

/// Build the push envelope that advances a sprint to its next component
pub fn advance_envelope(
    sprint_name: &str,
    status: &SprintStatus,
    dest: &str,
    instruction: &str,
) -> Option<(WorkflowEnvelope, SprintStatus)> {
    let next_status = status.advance(dest)?;
    let envelope = WorkflowEnvelope::new(
        dest,
        json!({
            "sprint_name": sprint_name,
            "status": next_status.to_string(),
        }),
    )
    .with_purpose(dest, instruction);
    Some((envelope, next_status))
}

/// Convenience: parse a `/workflow` body into an envelope
pub fn parse_envelope(body: &Value) -> Option<WorkflowEnvelope> {
    serde_json::from_value(body.clone()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip() {
        for text in [
            "Planning",
            "Ready-1:metis",
            "Ready-2:harmonia",
            "Ready-3:synthesis",
            "Ready-Review",
            "Building",
            "Complete",
            "Superseded",
        ] {
            let status = SprintStatus::parse(text).unwrap();
            assert_eq!(status.to_string(), text);
        }
        assert!(SprintStatus::parse("Ready-1:").is_none());
        assert!(SprintStatus::parse("Shipping").is_none());
    }

    #[test]
    fn test_ladder_advances_in_order() {
        let mut status = SprintStatus::Planning;
        let hops = ["metis", "harmonia", "synthesis", "review", "build"];
        let mut seen = Vec::new();
        for hop in hops {
            status = status.advance(hop).unwrap();
            seen.push(status.to_string());
        }
        assert_eq!(
            seen,
            vec![
                "Ready-1:metis",
                "Ready-2:harmonia",
                "Ready-3:synthesis",
                "Ready-Review",
                "Building",
            ]
        );
        assert!(status.advance("anything").is_none());
    }

    #[test]
    fn test_push_dest_matching() {
        let envelope = WorkflowEnvelope::new("telos", json!({"sprint_name": "sprint-4"}));

        let mine = handle_push("telos", &envelope);
        assert_eq!(mine.disposition, "accepted");

        let not_mine = handle_push("metis", &envelope);
        assert_eq!(not_mine.disposition, "ignored");
        assert!(not_mine.ok);
    }

    #[test]
    fn test_advance_envelope_carries_status_and_purpose() {
        let (envelope, next) = advance_envelope(
            "sprint-4",
            &SprintStatus::Planning,
            "metis",
            "refine the workflow design",
        )
        .unwrap();

        assert_eq!(envelope.dest, "metis");
        assert_eq!(envelope.payload["status"], "Ready-1:metis");
        assert_eq!(envelope.purpose["metis"], "refine the workflow design");
        assert_eq!(next, SprintStatus::Ready1("metis".to_string()));
    }
}
