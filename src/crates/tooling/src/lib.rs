//! Shared utilities for the tekton workspace
//!
//! Every tekton component draws its ambient concerns from this crate:
//!
//! - `config` - the central `TektonConfig` accessor; the only place in the
//!   workspace that reads environment variables
//! - `logging` - one-shot tracing initialization for binaries
//! - `retry` - exponential backoff with jitter for transient failures
//! - `timeout` - deadline wrappers for outbound calls
//! - `persistence` - atomic-rename file persistence behind an opaque
//!   key-value interface
//! - `validation` - identifier and name validation shared by the registry
//!   and the shell

pub mod config;
pub mod logging;
pub mod persistence;
pub mod retry;
pub mod timeout;
pub mod validation;

use thiserror::Error;

/// Errors that can occur in the tooling crate
#[derive(Debug, Error)]
pub enum ToolingError {
    /// Configuration error (bad value, unparseable variable, missing root)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Validation failure
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Persistence failure
    #[error("Persistence failure: {0}")]
    Persistence(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for tooling operations
pub type Result<T> = std::result::Result<T, ToolingError>;
