//! `aish` - the unified CI registry and message shell
//!
//! One command interface routes messages to the right endpoint, honoring
//! per-CI forwarding rules and per-terminal mailboxes:
//!
//! ```text
//! aish <ci> "<message>"           route a message to a CI
//! aish forward <ci> <terminal>    manage the forwarding table
//! aish terma ...                  inter-terminal messaging
//! aish prompt <ci> "<msg>"        high-priority delivery
//! aish team-chat "<msg>"          broadcast to the greek chorus
//! aish sunset|sunrise <ci>        drive the memory core protocol
//! ```
//!
//! - `ci` - CI entries and kinds
//! - `forward` - the persistent forwarding table
//! - `inbox` - bounded per-terminal mailboxes
//! - `terminal` - in-process terminal sessions
//! - `registry` - CI name resolution
//! - `team_chat` - greek-chorus fan-out
//! - `shell` - command dispatch over all of the above
//! - `cli` - the clap surface
//! - `help` - static documentation path references

pub mod ci;
pub mod cli;
pub mod forward;
pub mod help;
pub mod inbox;
pub mod registry;
pub mod shell;
pub mod team_chat;
pub mod terminal;

pub use crate::ci::{CiEntry, CiKind};
pub use crate::forward::{ForwardRule, ForwardTable};
pub use crate::inbox::{InboxKind, InboxMessage, Mailbox};
pub use crate::registry::{CiRegistry, ResolvedTarget};
pub use crate::shell::MessageShell;
pub use crate::terminal::{TerminalRegistry, TerminalSession};

use thiserror::Error;

/// Errors surfaced by shell operations
#[derive(Debug, Error)]
pub enum AishError {
    /// No CI by that name
    #[error("Unknown CI: {0}")]
    UnknownCi(String),

    /// No terminal by that name or id
    #[error("Unknown terminal: {0}")]
    UnknownTerminal(String),

    /// A forward would point a CI at itself or close a loop
    #[error("Forwarding cycle: {0}")]
    ForwardingCycle(String),

    /// Piped input was empty
    #[error("No message on stdin")]
    StdinEmpty,

    /// Command line was malformed
    #[error("Usage error: {0}")]
    Usage(String),

    /// Service registry resolution failed
    #[error("Resolution failed: {0}")]
    Resolution(String),

    /// Transport failure, propagated
    #[error(transparent)]
    Transport(#[from] transport::TransportError),

    /// The target CI is asleep or its context is exhausted
    #[error(transparent)]
    Memory(#[from] memory::MemoryError),

    /// Persistence failure
    #[error(transparent)]
    Tooling(#[from] tooling::ToolingError),

    /// Serialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AishError {
    /// Process exit code for this error category
    pub fn exit_code(&self) -> i32 {
        match self {
            AishError::Usage(_) | AishError::StdinEmpty => 2,
            AishError::UnknownCi(_) | AishError::UnknownTerminal(_) | AishError::Resolution(_) => 3,
            AishError::Transport(_) => 4,
            AishError::ForwardingCycle(_) => 5,
            AishError::Memory(_) => 3,
            AishError::Tooling(_) | AishError::Serialization(_) => 4,
        }
    }

    /// Stable wire code for the error
    pub fn code(&self) -> &str {
        match self {
            AishError::UnknownCi(_) => "unknown-ci",
            AishError::UnknownTerminal(_) => "unknown-terminal",
            AishError::ForwardingCycle(_) => "forwarding-cycle",
            AishError::StdinEmpty => "stdin-empty",
            AishError::Usage(_) => "usage",
            AishError::Resolution(_) => "not_found",
            AishError::Transport(_) => "transport-failure",
            AishError::Memory(e) => e.code(),
            AishError::Tooling(_) => "persistence-failure",
            AishError::Serialization(_) => "invalid",
        }
    }
}

/// Result type for shell operations
pub type Result<T> = std::result::Result<T, AishError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(AishError::Usage("x".into()).exit_code(), 2);
        assert_eq!(AishError::UnknownCi("x".into()).exit_code(), 3);
        assert_eq!(
            AishError::Transport(transport::TransportError::Timeout(2000)).exit_code(),
            4
        );
        assert_eq!(AishError::ForwardingCycle("x".into()).exit_code(), 5);
    }

    #[test]
    fn test_codes() {
        assert_eq!(AishError::UnknownCi("x".into()).code(), "unknown-ci");
        assert_eq!(
            AishError::Memory(memory::MemoryError::CiAsleep("metis".into())).code(),
            "ci_asleep"
        );
    }
}
