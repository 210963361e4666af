//! Insert-time token costing
//!
//! Costs are computed once, when an item enters the catalog, against the
//! target model's tokenizer where one is available. The fallback is
//! deterministic (whitespace words × 1.3, rounded up) so that replays and
//! tests cost identically on any machine.

use tiktoken_rs::CoreBPE;

/// Token cost estimator for a target model
pub struct TokenCoster {
    model: String,
    bpe: Option<CoreBPE>,
}

impl TokenCoster {
    /// Create a coster for a model
    ///
    /// Models with a known tiktoken encoding use it; everything else uses
    /// the deterministic fallback.
    pub fn new(model: impl Into<String>) -> Self {
        let model = model.into();
        let bpe = if model.contains("gpt-4") || model.contains("gpt-3.5") {
            tiktoken_rs::cl100k_base().ok()
        } else {
            None
        };
        Self { model, bpe }
    }

    /// A coster that always uses the deterministic fallback
    pub fn fallback() -> Self {
        Self {
            model: "fallback".to_string(),
            bpe: None,
        }
    }

    /// The target model
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Cost a text in tokens
    pub fn cost(&self, text: &str) -> usize {
        match &self.bpe {
            Some(bpe) => bpe.encode_with_special_tokens(text).len(),
            None => Self::word_estimate(text),
        }
    }

    /// Deterministic word-based estimate: words × 1.3, rounded up
    fn word_estimate(text: &str) -> usize {
        let words = text.split_whitespace().count();
        (words as f64 * 1.3).ceil() as usize
    }
}
