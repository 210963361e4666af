//! Context and memory core for tekton CIs
//!
//! Gives every CI per-turn accounting against its model's token limit, a
//! curated memory injection bounded by a configurable budget, and the
//! sunset/sunrise protocol that drains and restores CI state when
//! exhaustion is imminent.
//!
//! - `item` - memory items and kinds
//! - `tokens` - insert-time token costing
//! - `catalog` - per-CI and global catalogs with decay sweeps
//! - `selection` - relevance scoring and budgeted packing
//! - `budget` - per-CI/model context accounting and thresholds
//! - `sunset` - the sunset/sunrise protocol engine
//! - `store` - catalog persistence
//! - `manager` - the facade the shell consults on every CI exchange

pub mod budget;
pub mod catalog;
pub mod item;
pub mod manager;
pub mod selection;
pub mod store;
pub mod sunset;
pub mod tokens;

pub use budget::{BudgetState, ContextBudget};
pub use catalog::MemoryCatalog;
pub use item::{MemoryItem, MemoryKind};
pub use manager::{MemoryManager, SunriseBundle, TurnDirective};
pub use selection::{Injection, SelectionContext};
pub use sunset::{SunsetConfig, SunsetState};

use thiserror::Error;

/// Errors surfaced by the context/memory core
#[derive(Debug, Error)]
pub enum MemoryError {
    /// A turn would breach the CI's hard context limit
    #[error("Context exhausted for {ci}: {current} of {limit} tokens used")]
    ContextExhausted {
        /// CI name
        ci: String,
        /// Current token count
        current: usize,
        /// Hard limit
        limit: usize,
    },

    /// An injection or accounting request exceeded its budget
    #[error("Budget exceeded: {0}")]
    BudgetExceeded(String),

    /// The CI is in sunset and cannot take normal turns
    #[error("CI {0} is asleep; issue a sunrise first")]
    CiAsleep(String),

    /// Sunrise was requested but no sunrise context was ever captured
    #[error("No sunrise context captured for {0}")]
    SunriseWithoutContext(String),

    /// The catalog is full and nothing is evictable
    #[error("Catalog full for {0}")]
    CatalogFull(String),

    /// Unknown CI
    #[error("Unknown CI: {0}")]
    UnknownCi(String),

    /// Persistence failure
    #[error(transparent)]
    Tooling(#[from] tooling::ToolingError),

    /// Serialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl MemoryError {
    /// Stable wire code for the error body
    pub fn code(&self) -> &'static str {
        match self {
            MemoryError::ContextExhausted { .. } => "context_exhausted",
            MemoryError::BudgetExceeded(_) => "budget_exceeded",
            MemoryError::CiAsleep(_) => "ci_asleep",
            MemoryError::SunriseWithoutContext(_) => "sunrise_without_context",
            MemoryError::CatalogFull(_) => "catalog_full",
            MemoryError::UnknownCi(_) => "unknown-ci",
            MemoryError::Tooling(_) => "persistence-failure",
            MemoryError::Serialization(_) => "invalid",
        }
    }
}

/// Result type for memory operations
pub type Result<T> = std::result::Result<T, MemoryError>;
