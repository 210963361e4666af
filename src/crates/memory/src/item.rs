//! Memory items

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What kind of memory an item records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    /// A decision that was taken
    Decision,
    /// An insight worth carrying forward
    Insight,
    /// Background context
    Context,
    /// An error and what was learned from it
    Error,
    /// A plan or intended course of action
    Plan,
}

impl std::fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Decision => "decision",
            Self::Insight => "insight",
            Self::Context => "context",
            Self::Error => "error",
            Self::Plan => "plan",
        };
        write!(f, "{}", name)
    }
}

/// A catalogued memory
///
/// Token costs are fixed at insert time against the target model's
/// tokenizer; expired items are elided from selection but retained until
/// the next sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryItem {
    /// Stable item id
    pub id: String,
    /// CI that produced the memory
    pub ci_source: String,
    /// Memory kind
    pub kind: MemoryKind,
    /// Short summary, usable in place of content when budget is tight
    pub summary: String,
    /// Full content
    pub content: String,
    /// Token cost of `content`, computed at insert
    pub tokens: usize,
    /// Token cost of `summary`, computed at insert
    pub summary_tokens: usize,
    /// Topic tags used for relevance matching
    pub tags: Vec<String>,
    /// Priority 0..10; higher survives eviction longer
    pub priority: u8,
    /// When the item was created
    pub created_at: DateTime<Utc>,
    /// When the item stops being selectable
    pub expires_at: Option<DateTime<Utc>>,
    /// Ids of related items
    pub references: Vec<String>,
    /// Per-catalog insertion sequence, used to break score ties
    #[serde(default)]
    pub seq: u64,
}

impl MemoryItem {
    /// Create an item; token costs are filled in by the catalog at insert
    pub fn new(
        ci_source: impl Into<String>,
        kind: MemoryKind,
        summary: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            ci_source: ci_source.into(),
            kind,
            summary: summary.into(),
            content: content.into(),
            tokens: 0,
            summary_tokens: 0,
            tags: Vec::new(),
            priority: 5,
            created_at: Utc::now(),
            expires_at: None,
            references: Vec::new(),
            seq: 0,
        }
    }

    /// Set topic tags
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Set priority, clamped to 0..10
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority.min(10);
        self
    }

    /// Set expiry
    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Link related items
    pub fn with_references(mut self, references: Vec<String>) -> Self {
        self.references = references;
        self
    }

    /// Whether the item is past its expiry at `now`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| now >= at).unwrap_or(false)
    }
}
