//! Wire-level plumbing shared by tekton components
//!
//! All inter-component traffic is JSON over one of three shapes: HTTP
//! request/response, newline-delimited event streams, and framed-JSON
//! sockets. This crate owns the envelopes for those shapes, a deadline-
//! aware HTTP client, and the shared connection pool with bounded
//! per-target concurrency.

pub mod client;
pub mod envelope;
pub mod pool;
pub mod sse;
pub mod ws;

pub use client::{ClientConfig, HttpClient};
pub use envelope::{ApiResponse, ErrorBody, Frame, WorkflowEnvelope};
pub use pool::{ConnectionPool, PoolConfig};

use thiserror::Error;

/// Transport error taxonomy
///
/// Retry policies decide eligibility from the variant, never from message
/// text: `is_retryable` is the single source of truth.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The target endpoint could not be reached
    #[error("Target unavailable: {0}")]
    Unavailable(String),

    /// The per-call deadline elapsed
    #[error("Call timed out after {0} ms")]
    Timeout(u64),

    /// The target (or the local pool) refused new work
    #[error("Overloaded: {0}")]
    Overloaded(String),

    /// The connection dropped mid-exchange
    #[error("Connection reset: {0}")]
    ConnectionReset(String),

    /// The peer responded outside the agreed wire shape
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The peer returned a structured application error
    #[error("Remote error {code}: {message}")]
    Remote {
        /// Machine-readable error code from the error body
        code: String,
        /// Human-readable message
        message: String,
        /// Optional structured details
        details: Option<serde_json::Value>,
    },

    /// Serialization failure on either side of the wire
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TransportError {
    /// Whether a retry may succeed
    ///
    /// Only transport-class failures qualify; application errors returned
    /// by the peer are surfaced to the caller untouched.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransportError::Unavailable(_)
                | TransportError::Timeout(_)
                | TransportError::Overloaded(_)
                | TransportError::ConnectionReset(_)
        )
    }

    /// Stable wire code for this error
    pub fn code(&self) -> &str {
        match self {
            TransportError::Unavailable(_) => "unavailable",
            TransportError::Timeout(_) => "timeout",
            TransportError::Overloaded(_) => "overloaded",
            TransportError::ConnectionReset(_) => "connection-reset",
            TransportError::Protocol(_) => "protocol",
            TransportError::Remote { code, .. } => code,
            TransportError::Serialization(_) => "serialization",
        }
    }
}

/// Result type for transport operations
pub type Result<T> = std::result::Result<T, TransportError>;
