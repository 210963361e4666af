//! Relevance scoring and budgeted packing
//!
//! On each outbound turn, candidates are scored for relevance and packed
//! greedily into the injection budget. An item whose full content does not
//! fit may ride along as its summary instead. Rendering is stable (score
//! descending, then id ascending) so identical inputs produce identical
//! prompts.

use crate::item::MemoryItem;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Half-life for the recency term, in hours (one week)
pub const RECENCY_HALF_LIFE_HOURS: f64 = 168.0;

/// Query context for a selection pass
#[derive(Debug, Clone)]
pub struct SelectionContext {
    /// CI the injection is for
    pub ci_name: String,
    /// Tags describing the current conversation
    pub context_tags: Vec<String>,
    /// Evaluation time
    pub now: DateTime<Utc>,
}

impl SelectionContext {
    /// Create a context evaluated now
    pub fn new(ci_name: impl Into<String>, context_tags: Vec<String>) -> Self {
        Self {
            ci_name: ci_name.into(),
            context_tags,
            now: Utc::now(),
        }
    }
}

/// Relevance score for an item against a query context
///
/// `0.3·recency + 0.4·tag_overlap + 0.2·affinity + 0.1·priority_norm`,
/// clamped to `[0, 1]`. Scores depend only on the item and the context, so
/// adding new items never changes existing scores.
pub fn score(item: &MemoryItem, context: &SelectionContext) -> f64 {
    let age_hours = (context.now - item.created_at).num_seconds().max(0) as f64 / 3600.0;
    let recency = (-age_hours / RECENCY_HALF_LIFE_HOURS).exp();

    let overlap = item
        .tags
        .iter()
        .filter(|tag| context.context_tags.contains(tag))
        .count() as f64;
    let tag_overlap = overlap / (item.tags.len().max(1) as f64);

    let affinity = if item.ci_source == context.ci_name { 1.0 } else { 0.0 };
    let priority_norm = item.priority as f64 / 10.0;

    (0.3 * recency + 0.4 * tag_overlap + 0.2 * affinity + 0.1 * priority_norm).clamp(0.0, 1.0)
}

/// One packed injection entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackedItem {
    /// Item id
    pub id: String,
    /// Text included in the injection (content or summary)
    pub text: String,
    /// Tokens charged against the budget
    pub tokens: usize,
    /// Whether the summary was substituted for the content
    pub summarized: bool,
    /// Relevance score at selection time
    pub score: f64,
}

/// A rendered memory injection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Injection {
    /// Packed entries in render order
    pub items: Vec<PackedItem>,
    /// Total tokens charged
    pub total_tokens: usize,
    /// The bracketed pre-prompt block
    pub rendered: String,
}

impl Injection {
    /// An empty injection
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            total_tokens: 0,
            rendered: String::new(),
        }
    }
}

/// Score candidates and pack them greedily into the token budget
///
/// Candidates are visited by score descending (sequence number breaks
/// ties). The full content is preferred; when it does not fit but the
/// summary does, the summary is substituted and only its tokens counted;
/// otherwise the item is skipped.
pub fn pack(candidates: &[&MemoryItem], context: &SelectionContext, budget: usize) -> Injection {
    let mut scored: Vec<(f64, &MemoryItem)> = candidates
        .iter()
        .map(|item| (score(item, context), *item))
        .collect();
    scored.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.1.seq.cmp(&b.1.seq))
    });

    let mut packed = Vec::new();
    let mut remaining = budget;
    for (item_score, item) in scored {
        if item.tokens <= remaining && item.tokens > 0 {
            remaining -= item.tokens;
            packed.push(PackedItem {
                id: item.id.clone(),
                text: item.content.clone(),
                tokens: item.tokens,
                summarized: false,
                score: item_score,
            });
        } else if item.summary_tokens <= remaining && item.summary_tokens > 0 {
            remaining -= item.summary_tokens;
            packed.push(PackedItem {
                id: item.id.clone(),
                text: item.summary.clone(),
                tokens: item.summary_tokens,
                summarized: true,
                score: item_score,
            });
        }
    }

    // Stable render order: score descending, then id ascending.
    packed.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });

    let total_tokens = packed.iter().map(|p| p.tokens).sum();
    let rendered = render(&packed);
    Injection {
        items: packed,
        total_tokens,
        rendered,
    }
}

/// Render packed items as the bracketed pre-prompt block
fn render(packed: &[PackedItem]) -> String {
    if packed.is_empty() {
        return String::new();
    }
    let mut out = String::from("[relevant memories]\n");
    for item in packed {
        out.push_str(&format!("- {}\n", item.text));
    }
    out.push_str("[end memories]");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::MemoryKind;
    use chrono::Duration;

    fn item(ci: &str, tokens: usize, summary_tokens: usize, priority: u8) -> MemoryItem {
        let mut item = MemoryItem::new(ci, MemoryKind::Insight, "summary text", "content text")
            .with_priority(priority);
        item.tokens = tokens;
        item.summary_tokens = summary_tokens;
        item
    }

    fn context(ci: &str) -> SelectionContext {
        SelectionContext::new(ci, vec!["planning".to_string()])
    }

    #[test]
    fn test_score_components() {
        let ctx = context("metis");

        // Fresh item from the same CI with full tag overlap scores high.
        let mut strong = item("metis", 10, 5, 10).with_tags(vec!["planning".to_string()]);
        strong.created_at = ctx.now;
        let s = score(&strong, &ctx);
        assert!((s - 1.0).abs() < 1e-9, "expected 1.0, got {}", s);

        // A year-old foreign item with no overlapping tags scores near zero.
        let mut weak = item("apollo", 10, 5, 0).with_tags(vec!["other".to_string()]);
        weak.created_at = ctx.now - Duration::days(365);
        assert!(score(&weak, &ctx) < 0.01);
    }

    #[test]
    fn test_score_untagged_item() {
        let ctx = context("metis");
        let mut untagged = item("metis", 10, 5, 5);
        untagged.created_at = ctx.now;
        // tag_overlap = 0/max(0,1) = 0; recency 1.0, affinity 1.0, prio 0.5
        let s = score(&untagged, &ctx);
        assert!((s - 0.55).abs() < 1e-9);
    }

    #[test]
    fn test_pack_budget_never_exceeded() {
        let ctx = context("metis");
        let items: Vec<MemoryItem> = (0..10).map(|_| {
            let mut i = item("metis", 40, 10, 5);
            i.created_at = ctx.now;
            i
        }).collect();
        let refs: Vec<&MemoryItem> = items.iter().collect();

        let injection = pack(&refs, &ctx, 100);
        assert!(injection.total_tokens <= 100);
    }

    #[test]
    fn test_pack_summary_substitution_scenario() {
        // Budget 100; scores fixed by priority spread. M1 full (60),
        // M2 summary (15), M3 skipped since 75+30 would breach.
        let ctx = context("metis");

        let mut m1 = item("metis", 60, 20, 10).with_tags(vec!["planning".to_string()]);
        m1.id = "m1".to_string();
        m1.created_at = ctx.now;
        let mut m2 = item("metis", 50, 15, 5).with_tags(vec!["planning".to_string()]);
        m2.id = "m2".to_string();
        m2.created_at = ctx.now - Duration::hours(100);
        let mut m3 = item("apollo", 30, 0, 3).with_tags(vec!["planning".to_string()]);
        m3.id = "m3".to_string();
        m3.created_at = ctx.now - Duration::hours(200);

        let items = vec![&m1, &m2, &m3];
        let injection = pack(&items, &ctx, 100);

        assert_eq!(injection.items.len(), 2);
        assert_eq!(injection.items[0].id, "m1");
        assert!(!injection.items[0].summarized);
        assert_eq!(injection.items[1].id, "m2");
        assert!(injection.items[1].summarized);
        assert_eq!(injection.total_tokens, 75);
    }

    #[test]
    fn test_pack_exact_fit_uses_full_content() {
        let ctx = context("metis");
        let mut m = item("metis", 100, 10, 5);
        m.created_at = ctx.now;
        let injection = pack(&[&m], &ctx, 100);
        assert!(!injection.items[0].summarized);
        assert_eq!(injection.total_tokens, 100);

        // One token over substitutes the summary.
        let mut over = item("metis", 101, 10, 5);
        over.created_at = ctx.now;
        let injection = pack(&[&over], &ctx, 100);
        assert!(injection.items[0].summarized);
        assert_eq!(injection.total_tokens, 10);
    }

    #[test]
    fn test_rendering_is_stable() {
        let ctx = context("metis");
        let mut a = item("metis", 10, 5, 5);
        a.id = "aaa".to_string();
        a.created_at = ctx.now;
        let mut b = item("metis", 10, 5, 5);
        b.id = "bbb".to_string();
        b.created_at = ctx.now;

        let first = pack(&[&a, &b], &ctx, 100);
        let second = pack(&[&b, &a], &ctx, 100);
        assert_eq!(first.rendered, second.rendered);
    }

    #[test]
    fn test_empty_candidates() {
        let injection = pack(&[], &context("metis"), 100);
        assert!(injection.items.is_empty());
        assert_eq!(injection.rendered, "");
    }
}
