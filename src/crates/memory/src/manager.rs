//! The memory manager facade
//!
//! The shell consults this on every CI exchange: it gates turns against
//! the context budget and the sunset lifecycle, builds the bounded memory
//! injection, and accounts consumption afterwards. Catalog reads are
//! concurrent; all mutation funnels through one write boundary so catalog
//! sequence numbers and budget accounting stay totally ordered per CI.

use crate::budget::{BudgetState, BudgetThresholds, ContextBudget};
use crate::catalog::{CatalogPolicy, MemoryCatalog};
use crate::item::MemoryItem;
use crate::selection::{pack, Injection, SelectionContext};
use crate::store::{load_catalog, save_catalog};
use crate::sunset::{SunsetConfig, SunsetState, SunsetTracker, TurnGate, SUNSET_PROMPT};
use crate::tokens::TokenCoster;
use crate::{MemoryError, Result};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tooling::config::MemoryConfig;
use tooling::persistence::KvStore;
use tracing::{debug, info};

/// Scope name for the shared catalog
pub const GLOBAL_SCOPE: &str = "global";

/// What the caller should do for a CI's next outbound turn
#[derive(Debug, Clone)]
pub enum TurnDirective {
    /// Proceed normally, leading with the rendered injection
    Normal {
        /// The packed memory injection (possibly empty)
        injection: Injection,
    },
    /// Emit the sunset drain prompt instead of the user message
    Sunset {
        /// The system prompt to send
        prompt: String,
    },
}

/// Restored state handed back by a sunrise
#[derive(Debug, Clone)]
pub struct SunriseBundle {
    /// Captured sunrise context, injected as a leading system message
    pub context: String,
    /// Summaries of catalog items created while the CI slept
    pub delta: Vec<String>,
}

struct Inner {
    catalogs: HashMap<String, MemoryCatalog>,
    budgets: HashMap<String, ContextBudget>,
    sunset: SunsetTracker,
}

/// Context/memory core facade
pub struct MemoryManager {
    config: MemoryConfig,
    coster: TokenCoster,
    inner: RwLock<Inner>,
    store: Option<Arc<dyn KvStore>>,
}

impl MemoryManager {
    /// Create a manager with the given policy and sunset detection config
    pub fn new(config: MemoryConfig, coster: TokenCoster, sunset: SunsetConfig) -> Self {
        Self {
            config,
            coster,
            inner: RwLock::new(Inner {
                catalogs: HashMap::new(),
                budgets: HashMap::new(),
                sunset: SunsetTracker::new(sunset),
            }),
            store: None,
        }
    }

    /// Attach a persistence backend for catalogs
    pub fn with_store(mut self, store: Arc<dyn KvStore>) -> Self {
        self.store = Some(store);
        self
    }

    fn catalog_policy(&self) -> CatalogPolicy {
        CatalogPolicy {
            max_items: self.config.max_memories_per_ci,
            permanent_priority: self.config.permanent_priority,
        }
    }

    fn thresholds(&self) -> BudgetThresholds {
        BudgetThresholds {
            soft: 0.70,
            sunset: self.config.sunset_threshold,
            hard: self.config.hard_limit_threshold,
        }
    }

    /// Register a CI with its model and hard token limit
    pub async fn register_ci(&self, ci: &str, model: &str, hard_limit: usize) {
        let mut inner = self.inner.write().await;
        inner.budgets.insert(
            ci.to_string(),
            ContextBudget::new(ci, model, hard_limit).with_thresholds(self.thresholds()),
        );
        inner
            .catalogs
            .entry(ci.to_string())
            .or_insert_with(|| MemoryCatalog::new(ci, self.catalog_policy()));
        debug!(ci, model, hard_limit, "CI registered with memory core");
    }

    /// Load a previously persisted catalog for a scope
    pub async fn restore_catalog(&self, scope: &str) -> Result<bool> {
        let Some(store) = &self.store else {
            return Ok(false);
        };
        let Some(catalog) = load_catalog(store.as_ref(), scope).await? else {
            return Ok(false);
        };
        self.inner.write().await.catalogs.insert(scope.to_string(), catalog);
        Ok(true)
    }

    /// Append a memory to a CI's catalog (or the global scope)
    pub async fn record(&self, scope: &str, item: MemoryItem) -> Result<String> {
        let policy = self.catalog_policy();
        let mut inner = self.inner.write().await;
        let catalog = inner
            .catalogs
            .entry(scope.to_string())
            .or_insert_with(|| MemoryCatalog::new(scope, policy));
        let id = catalog.insert(item, &self.coster)?.id.clone();

        if let Some(store) = &self.store {
            save_catalog(store.as_ref(), catalog).await?;
        }
        Ok(id)
    }

    /// Build the bounded injection for a CI turn
    ///
    /// Candidates come from the CI's own catalog plus the global scope;
    /// the result never exceeds `max_injection_tokens`.
    pub async fn inject(&self, ci: &str, context_tags: Vec<String>) -> Injection {
        let inner = self.inner.read().await;
        let context = SelectionContext::new(ci, context_tags);

        let mut candidates: Vec<&MemoryItem> = Vec::new();
        if let Some(catalog) = inner.catalogs.get(ci) {
            candidates.extend(catalog.selectable(context.now));
        }
        if let Some(global) = inner.catalogs.get(GLOBAL_SCOPE) {
            candidates.extend(global.selectable(context.now));
        }

        pack(&candidates, &context, self.config.max_injection_tokens)
    }

    /// Gate and prepare a CI's next outbound turn
    ///
    /// Rejects with `context_exhausted` at the hard band and `ci_asleep`
    /// while the CI is in sunset; flags the CI for sunset at the sunset
    /// band and returns the drain prompt instead of a normal directive.
    pub async fn begin_turn(&self, ci: &str, context_tags: Vec<String>) -> Result<TurnDirective> {
        let sunset_due = {
            let mut inner = self.inner.write().await;
            let budget = inner
                .budgets
                .get(ci)
                .ok_or_else(|| MemoryError::UnknownCi(ci.to_string()))?;
            budget.check_turn_allowed()?;
            let due = budget.state() == BudgetState::SunsetDue;

            match inner.sunset.gate_turn(ci, due)? {
                TurnGate::EmitSunsetPrompt => {
                    return Ok(TurnDirective::Sunset {
                        prompt: SUNSET_PROMPT.to_string(),
                    })
                }
                TurnGate::Normal => {}
            }
            due
        };
        debug_assert!(!sunset_due);

        let injection = self.inject(ci, context_tags).await;
        Ok(TurnDirective::Normal { injection })
    }

    /// Account a completed turn and observe the response for sunset
    ///
    /// Returns the CI's lifecycle state afterwards. A completed sunset
    /// drains the budget: the context window is released wholesale.
    pub async fn complete_turn(
        &self,
        ci: &str,
        tokens_consumed: usize,
        response: &str,
    ) -> Result<SunsetState> {
        let mut inner = self.inner.write().await;
        let budget = inner
            .budgets
            .get_mut(ci)
            .ok_or_else(|| MemoryError::UnknownCi(ci.to_string()))?;
        budget.record_turn(tokens_consumed);

        let state = inner.sunset.observe_response(ci, response);
        if state == SunsetState::Sunset {
            let budget = inner.budgets.get_mut(ci).expect("checked above");
            budget.drain();
            info!(ci, "Context drained by sunset");
        }
        Ok(state)
    }

    /// Write a supervisor advisory flag; the CI sunsets on its next turn
    pub async fn advise_sunset(&self, ci: &str) {
        self.inner.write().await.sunset.set_advisory(ci);
    }

    /// Whether a CI is asleep
    pub async fn is_asleep(&self, ci: &str) -> bool {
        self.inner.read().await.sunset.is_asleep(ci)
    }

    /// Apply a sunrise
    ///
    /// Returns `None` when the CI was already awake (idempotent). The
    /// bundle leads with the captured context and carries a delta of
    /// catalog item summaries recorded while the CI slept.
    pub async fn sunrise(&self, ci: &str) -> Result<Option<SunriseBundle>> {
        let mut inner = self.inner.write().await;
        let Some(restore) = inner.sunset.sunrise(ci)? else {
            return Ok(None);
        };

        let mut delta = Vec::new();
        for scope in [ci, GLOBAL_SCOPE] {
            if let Some(catalog) = inner.catalogs.get(scope) {
                delta.extend(
                    catalog
                        .items_since(restore.sunset_at)
                        .into_iter()
                        .map(|item| item.summary.clone()),
                );
            }
        }

        Ok(Some(SunriseBundle {
            context: restore.context,
            delta,
        }))
    }

    /// Current budget record for a CI
    pub async fn budget(&self, ci: &str) -> Option<ContextBudget> {
        self.inner.read().await.budgets.get(ci).cloned()
    }

    /// Run a decay sweep over every catalog; returns items removed
    pub async fn sweep(&self) -> usize {
        let now = Utc::now();
        let mut inner = self.inner.write().await;
        let mut removed = 0;
        for catalog in inner.catalogs.values_mut() {
            removed += catalog.sweep(now);
        }
        if removed > 0 {
            info!(removed, "Memory decay sweep completed");
        }
        removed
    }

    /// Spawn the periodic decay sweep task
    pub fn spawn_sweeper(manager: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let interval = std::time::Duration::from_secs(manager.config.sweep_interval_sec.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The immediate first tick would sweep an empty catalog set.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                manager.sweep().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::MemoryKind;

    fn manager() -> MemoryManager {
        MemoryManager::new(
            MemoryConfig::default(),
            TokenCoster::fallback(),
            SunsetConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_normal_turn_with_injection() {
        let manager = manager();
        manager.register_ci("metis", "metis-large", 100_000).await;
        manager
            .record(
                "metis",
                MemoryItem::new("metis", MemoryKind::Decision, "chose plan A", "we chose plan A because ...")
                    .with_tags(vec!["planning".to_string()]),
            )
            .await
            .unwrap();

        match manager.begin_turn("metis", vec!["planning".to_string()]).await.unwrap() {
            TurnDirective::Normal { injection } => {
                assert_eq!(injection.items.len(), 1);
                assert!(injection.rendered.contains("plan A"));
            }
            other => panic!("unexpected directive: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_sunset_cycle_matches_protocol() {
        let manager = manager();
        manager.register_ci("metis", "metis-large", 100_000).await;

        // 82k of 100k used: past the 0.80 sunset band.
        manager.complete_turn("metis", 82_000, "normal answer").await.unwrap();

        match manager.begin_turn("metis", vec![]).await.unwrap() {
            TurnDirective::Sunset { prompt } => assert!(prompt.contains("SUNSET_PROTOCOL")),
            other => panic!("expected sunset directive, got {:?}", other),
        }

        // The drain response becomes sunrise context and the CI sleeps.
        let state = manager
            .complete_turn("metis", 500, "essential working state: sprint-4 planning")
            .await
            .unwrap();
        assert_eq!(state, SunsetState::Sunset);
        assert!(manager.is_asleep("metis").await);

        // Normal messages are rejected while asleep.
        assert!(matches!(
            manager.begin_turn("metis", vec![]).await,
            Err(MemoryError::CiAsleep(_))
        ));

        // Budget drained by the sunset.
        assert_eq!(manager.budget("metis").await.unwrap().current_tokens, 0);

        // Sunrise leads with the captured context.
        let bundle = manager.sunrise("metis").await.unwrap().unwrap();
        assert!(bundle.context.contains("sprint-4"));

        // And the CI takes normal turns again.
        assert!(matches!(
            manager.begin_turn("metis", vec![]).await.unwrap(),
            TurnDirective::Normal { .. }
        ));
    }

    #[tokio::test]
    async fn test_sunrise_delta_includes_items_recorded_while_asleep() {
        let manager = manager();
        manager.register_ci("metis", "metis-large", 100_000).await;
        manager.advise_sunset("metis").await;
        manager.begin_turn("metis", vec![]).await.unwrap();
        manager.complete_turn("metis", 100, "state summary").await.unwrap();

        manager
            .record(
                GLOBAL_SCOPE,
                MemoryItem::new("apollo", MemoryKind::Insight, "apollo shipped v2", "details"),
            )
            .await
            .unwrap();

        let bundle = manager.sunrise("metis").await.unwrap().unwrap();
        assert_eq!(bundle.delta, vec!["apollo shipped v2".to_string()]);
    }

    #[tokio::test]
    async fn test_hard_limit_rejects_turn() {
        let manager = manager();
        manager.register_ci("metis", "metis-large", 100_000).await;
        manager.complete_turn("metis", 96_000, "answer").await.unwrap();

        assert!(matches!(
            manager.begin_turn("metis", vec![]).await,
            Err(MemoryError::ContextExhausted { .. })
        ));
    }

    #[tokio::test]
    async fn test_unknown_ci() {
        let manager = manager();
        assert!(matches!(
            manager.begin_turn("ghost", vec![]).await,
            Err(MemoryError::UnknownCi(_))
        ));
    }

    #[tokio::test]
    async fn test_sunrise_on_awake_ci_is_noop() {
        let manager = manager();
        manager.register_ci("metis", "metis-large", 100_000).await;
        assert!(manager.sunrise("metis").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_injection_respects_budget_bound() {
        let mut config = MemoryConfig::default();
        config.max_injection_tokens = 20;
        let manager = MemoryManager::new(config, TokenCoster::fallback(), SunsetConfig::default());
        manager.register_ci("metis", "metis-large", 100_000).await;

        for n in 0..10 {
            manager
                .record(
                    "metis",
                    MemoryItem::new(
                        "metis",
                        MemoryKind::Context,
                        "short",
                        format!("a moderately long memory body number {} with several words", n),
                    ),
                )
                .await
                .unwrap();
        }

        let injection = manager.inject("metis", vec![]).await;
        assert!(injection.total_tokens <= 20);
    }
}
