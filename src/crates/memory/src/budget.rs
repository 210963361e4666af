//! Per-CI context accounting
//!
//! Each CI/model pair carries a running token count against the model's
//! hard limit. Thresholds partition usage into bands: soft (0.70), sunset
//! (0.80), and hard (0.95). Breaching hard is an error surfaced to the
//! caller; crossing sunset flags the CI for the sunset protocol before its
//! next outbound turn.

use crate::{MemoryError, Result};
use serde::{Deserialize, Serialize};

/// Usage thresholds as fractions of the hard limit
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BudgetThresholds {
    /// Soft warning band
    pub soft: f64,
    /// Sunset trigger band
    pub sunset: f64,
    /// Hard rejection band
    pub hard: f64,
}

impl Default for BudgetThresholds {
    fn default() -> Self {
        Self {
            soft: 0.70,
            sunset: 0.80,
            hard: 0.95,
        }
    }
}

/// Usage band a budget currently sits in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetState {
    /// Below the soft threshold
    Normal,
    /// At or above soft, below sunset
    Soft,
    /// At or above sunset, below hard; sunset is due
    SunsetDue,
    /// At or above hard; normal turns are rejected
    Exhausted,
}

/// Running context accounting for one CI/model pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextBudget {
    /// CI name
    pub ci_name: String,
    /// Model the limit belongs to
    pub model: String,
    /// Tokens currently held in context
    pub current_tokens: usize,
    /// Hard token limit for the model
    pub hard_limit: usize,
    /// Tokens consumed by the most recent turn
    pub last_turn_tokens: usize,
    /// Exponential moving average of per-turn consumption
    pub rolling_rate: f64,
    /// Thresholds in force
    pub thresholds: BudgetThresholds,
}

impl ContextBudget {
    /// Create a budget for a CI/model pair
    pub fn new(ci_name: impl Into<String>, model: impl Into<String>, hard_limit: usize) -> Self {
        Self {
            ci_name: ci_name.into(),
            model: model.into(),
            current_tokens: 0,
            hard_limit,
            last_turn_tokens: 0,
            rolling_rate: 0.0,
            thresholds: BudgetThresholds::default(),
        }
    }

    /// Override the thresholds
    pub fn with_thresholds(mut self, thresholds: BudgetThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Fraction of the hard limit in use
    pub fn usage_fraction(&self) -> f64 {
        if self.hard_limit == 0 {
            return 1.0;
        }
        self.current_tokens as f64 / self.hard_limit as f64
    }

    /// Which band the budget sits in
    pub fn state(&self) -> BudgetState {
        let usage = self.usage_fraction();
        if usage >= self.thresholds.hard {
            BudgetState::Exhausted
        } else if usage >= self.thresholds.sunset {
            BudgetState::SunsetDue
        } else if usage >= self.thresholds.soft {
            BudgetState::Soft
        } else {
            BudgetState::Normal
        }
    }

    /// Reject a turn when the hard band is breached
    pub fn check_turn_allowed(&self) -> Result<()> {
        if self.state() == BudgetState::Exhausted {
            return Err(MemoryError::ContextExhausted {
                ci: self.ci_name.clone(),
                current: self.current_tokens,
                limit: self.hard_limit,
            });
        }
        Ok(())
    }

    /// Account a completed turn
    pub fn record_turn(&mut self, tokens_consumed: usize) {
        self.current_tokens = self.current_tokens.saturating_add(tokens_consumed);
        self.last_turn_tokens = tokens_consumed;
        // EMA with alpha 0.3, enough history to smooth bursts.
        self.rolling_rate = if self.rolling_rate == 0.0 {
            tokens_consumed as f64
        } else {
            0.3 * tokens_consumed as f64 + 0.7 * self.rolling_rate
        };
    }

    /// Release tokens dropped through summarization or sunset
    pub fn release(&mut self, tokens_dropped: usize) {
        self.current_tokens = self.current_tokens.saturating_sub(tokens_dropped);
    }

    /// Drop all held context (sunset drains the window)
    pub fn drain(&mut self) {
        self.current_tokens = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_band_progression() {
        let mut budget = ContextBudget::new("metis", "metis-large", 100_000);
        assert_eq!(budget.state(), BudgetState::Normal);

        budget.record_turn(70_000);
        assert_eq!(budget.state(), BudgetState::Soft);

        budget.record_turn(12_000);
        assert_eq!(budget.state(), BudgetState::SunsetDue);

        budget.record_turn(13_000);
        assert_eq!(budget.state(), BudgetState::Exhausted);
        assert!(budget.check_turn_allowed().is_err());
    }

    #[test]
    fn test_sunset_boundary_inclusive() {
        let mut budget = ContextBudget::new("metis", "metis-large", 100_000);
        budget.record_turn(80_000);
        assert_eq!(budget.state(), BudgetState::SunsetDue);
    }

    #[test]
    fn test_release_and_drain() {
        let mut budget = ContextBudget::new("metis", "metis-large", 100_000);
        budget.record_turn(90_000);
        budget.release(30_000);
        assert_eq!(budget.current_tokens, 60_000);

        budget.drain();
        assert_eq!(budget.current_tokens, 0);
        assert_eq!(budget.state(), BudgetState::Normal);
    }

    #[test]
    fn test_rolling_rate_smooths() {
        let mut budget = ContextBudget::new("metis", "metis-large", 1_000_000);
        budget.record_turn(1000);
        assert!((budget.rolling_rate - 1000.0).abs() < f64::EPSILON);

        budget.record_turn(2000);
        assert!(budget.rolling_rate > 1000.0 && budget.rolling_rate < 2000.0);
    }

    #[test]
    fn test_zero_limit_is_exhausted() {
        let budget = ContextBudget::new("metis", "broken", 0);
        assert_eq!(budget.state(), BudgetState::Exhausted);
    }
}
