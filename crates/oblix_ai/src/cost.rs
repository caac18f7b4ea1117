//! Token estimation, request costing and the shared budget window.

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::model_registry::ModelPricing;
use crate::types::TokenUsage;

// ---------------------------------------------------------------------------
// Token estimation
// ---------------------------------------------------------------------------

/// Estimate token count as `ceil(words * 1.3)`.
///
/// Used whenever a backend does not report usage.
pub fn estimate_tokens(text: &str) -> u32 {
    let words = text.split_whitespace().count() as u64;
    // ceil(words * 13 / 10) in integer arithmetic
    let tokens = (words * 13).div_ceil(10);
    u32::try_from(tokens).unwrap_or(u32::MAX)
}

/// Estimated usage for a prompt/response pair.
pub fn estimate_usage(prompt: &str, response: &str) -> TokenUsage {
    TokenUsage::new(estimate_tokens(prompt), estimate_tokens(response))
}

// ---------------------------------------------------------------------------
// Cost calculation
// ---------------------------------------------------------------------------

/// Breakdown of a single request's cost in USD.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub input_cost: f64,
    pub output_cost: f64,
    pub total_cost: f64,
}

pub fn calculate_cost(pricing: &ModelPricing, usage: &TokenUsage) -> CostBreakdown {
    let input_cost = (usage.prompt_tokens as f64 / 1_000_000.0) * pricing.input_per_mtok;
    let output_cost = (usage.completion_tokens as f64 / 1_000_000.0) * pricing.output_per_mtok;
    CostBreakdown {
        input_cost,
        output_cost,
        total_cost: input_cost + output_cost,
    }
}

// ---------------------------------------------------------------------------
// Budget state
// ---------------------------------------------------------------------------

/// Point-in-time copy of the budget window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BudgetSnapshot {
    pub spent_usd: f64,
    /// `None` means unlimited.
    pub limit_usd: Option<f64>,
    pub reset_at: DateTime<Utc>,
}

impl BudgetSnapshot {
    /// Spend as a percentage of the limit. `None` when unlimited.
    pub fn usage_percent(&self) -> Option<f64> {
        let limit = self.limit_usd?;
        if limit <= 0.0 {
            // A zero budget is exhausted from the start.
            return Some(100.0);
        }
        Some(self.spent_usd / limit * 100.0)
    }
}

const MAX_WINDOW_HOURS: u64 = 24 * 366 * 10;

struct BudgetInner {
    spent_usd: f64,
    limit_usd: Option<f64>,
    window: TimeDelta,
    reset_at: DateTime<Utc>,
}

impl BudgetInner {
    /// Roll the window forward (possibly several periods) once it has passed.
    fn roll(&mut self, now: DateTime<Utc>) {
        if now < self.reset_at {
            return;
        }
        let previous = self.spent_usd;
        while self.reset_at <= now {
            self.reset_at += self.window;
        }
        self.spent_usd = 0.0;
        info!(previous_spend = previous, reset_at = %self.reset_at, "Budget window rolled over");
    }
}

/// Cumulative spend against an optional limit over a rolling window.
///
/// All access goes through [`record_spend`](Self::record_spend) and
/// [`snapshot`](Self::snapshot); both take the same lock, so concurrent
/// callers never lose an increment.
pub struct BudgetState {
    inner: Mutex<BudgetInner>,
}

impl BudgetState {
    /// A window of `window_hours` starting now, clamped to between one hour
    /// and ten years.
    pub fn new(limit_usd: Option<f64>, window_hours: u64) -> Self {
        Self::starting_at(limit_usd, window_hours, Utc::now())
    }

    pub fn starting_at(limit_usd: Option<f64>, window_hours: u64, start: DateTime<Utc>) -> Self {
        let window = TimeDelta::hours(window_hours.clamp(1, MAX_WINDOW_HOURS) as i64);
        Self {
            inner: Mutex::new(BudgetInner {
                spent_usd: 0.0,
                limit_usd,
                window,
                reset_at: start + window,
            }),
        }
    }

    pub fn record_spend(&self, amount_usd: f64) -> BudgetSnapshot {
        self.record_spend_at(amount_usd, Utc::now())
    }

    /// Add `amount_usd` to the current window. Negative amounts are ignored.
    pub fn record_spend_at(&self, amount_usd: f64, now: DateTime<Utc>) -> BudgetSnapshot {
        let mut inner = self.inner.lock();
        inner.roll(now);
        if amount_usd.is_finite() && amount_usd > 0.0 {
            inner.spent_usd += amount_usd;
            debug!(amount_usd, spent_usd = inner.spent_usd, "Spend recorded");
        }
        BudgetSnapshot {
            spent_usd: inner.spent_usd,
            limit_usd: inner.limit_usd,
            reset_at: inner.reset_at,
        }
    }

    pub fn snapshot(&self) -> BudgetSnapshot {
        self.snapshot_at(Utc::now())
    }

    pub fn snapshot_at(&self, now: DateTime<Utc>) -> BudgetSnapshot {
        let mut inner = self.inner.lock();
        inner.roll(now);
        BudgetSnapshot {
            spent_usd: inner.spent_usd,
            limit_usd: inner.limit_usd,
            reset_at: inner.reset_at,
        }
    }

    pub fn usage_percent(&self) -> Option<f64> {
        self.snapshot().usage_percent()
    }

    pub fn set_limit(&self, limit_usd: Option<f64>) {
        self.inner.lock().limit_usd = limit_usd;
    }

    /// Zero the spend and start a fresh window now.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.spent_usd = 0.0;
        inner.reset_at = Utc::now() + inner.window;
    }
}

impl std::fmt::Debug for BudgetState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("BudgetState")
            .field("spent_usd", &inner.spent_usd)
            .field("limit_usd", &inner.limit_usd)
            .field("reset_at", &inner.reset_at)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
