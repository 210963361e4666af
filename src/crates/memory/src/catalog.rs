//! Memory catalogs
//!
//! One catalog per CI plus a shared global scope. Catalogs are bounded;
//! when full, expired entries are evicted first (lowest priority, oldest
//! first), then non-permanent entries. A periodic decay sweep removes
//! expired items outright, sparing those at or above the permanent
//! priority.

use crate::item::MemoryItem;
use crate::tokens::TokenCoster;
use crate::{MemoryError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Catalog bounds and sweep policy
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CatalogPolicy {
    /// Maximum items held
    pub max_items: usize,
    /// Priority at or above which items survive expiry sweeps
    pub permanent_priority: u8,
}

impl Default for CatalogPolicy {
    fn default() -> Self {
        Self {
            max_items: 500,
            permanent_priority: 8,
        }
    }
}

/// A bounded, scored memory catalog for one scope
#[derive(Debug, Serialize, Deserialize)]
pub struct MemoryCatalog {
    /// Scope name: a CI name, or `global`
    pub scope: String,
    /// Catalog policy
    pub policy: CatalogPolicy,
    items: Vec<MemoryItem>,
    next_seq: u64,
}

impl MemoryCatalog {
    /// Create an empty catalog for a scope
    pub fn new(scope: impl Into<String>, policy: CatalogPolicy) -> Self {
        Self {
            scope: scope.into(),
            policy,
            items: Vec::new(),
            next_seq: 0,
        }
    }

    /// Number of items held (including expired-but-unswept)
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the catalog holds no items
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Insert an item, costing its content and summary
    ///
    /// Assigns the per-catalog sequence number used to break score ties.
    /// When the catalog is full, eviction tries expired entries first,
    /// then the lowest-priority non-permanent entry; if nothing is
    /// evictable the insert fails with `catalog_full`.
    pub fn insert(&mut self, mut item: MemoryItem, coster: &TokenCoster) -> Result<&MemoryItem> {
        if self.items.len() >= self.policy.max_items {
            self.evict_one(Utc::now())?;
        }

        item.tokens = coster.cost(&item.content);
        item.summary_tokens = coster.cost(&item.summary);
        item.seq = self.next_seq;
        self.next_seq += 1;
        self.items.push(item);
        Ok(self.items.last().expect("just pushed"))
    }

    fn evict_one(&mut self, now: DateTime<Utc>) -> Result<()> {
        // Expired first: lowest priority, then oldest.
        let expired = self
            .items
            .iter()
            .enumerate()
            .filter(|(_, item)| item.is_expired(now))
            .min_by_key(|(_, item)| (item.priority, item.created_at));
        if let Some((index, _)) = expired {
            self.items.remove(index);
            return Ok(());
        }

        // Then the lowest-priority non-permanent entry.
        let evictable = self
            .items
            .iter()
            .enumerate()
            .filter(|(_, item)| item.priority < self.policy.permanent_priority)
            .min_by_key(|(_, item)| (item.priority, item.created_at));
        match evictable {
            Some((index, _)) => {
                self.items.remove(index);
                Ok(())
            }
            None => Err(MemoryError::CatalogFull(self.scope.clone())),
        }
    }

    /// Remove expired items, sparing permanent-priority entries
    ///
    /// Returns how many items were removed.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.items.len();
        let permanent = self.policy.permanent_priority;
        self.items
            .retain(|item| !item.is_expired(now) || item.priority >= permanent);
        before - self.items.len()
    }

    /// Items eligible for selection at `now` (unexpired)
    pub fn selectable(&self, now: DateTime<Utc>) -> impl Iterator<Item = &MemoryItem> {
        self.items.iter().filter(move |item| !item.is_expired(now))
    }

    /// All items, including expired-but-unswept
    pub fn items(&self) -> &[MemoryItem] {
        &self.items
    }

    /// Items created strictly after `since` (the sunrise delta source)
    pub fn items_since(&self, since: DateTime<Utc>) -> Vec<&MemoryItem> {
        let mut items: Vec<&MemoryItem> = self
            .items
            .iter()
            .filter(|item| item.created_at > since)
            .collect();
        items.sort_by_key(|item| item.seq);
        items
    }

    /// Fetch an item by id
    pub fn get(&self, id: &str) -> Option<&MemoryItem> {
        self.items.iter().find(|item| item.id == id)
    }
}
