//! Budget agent. Guards the cloud tier against overspending the window.

use async_trait::async_trait;
use oblix_core::OblixConfig;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{AgentError, AgentReport, AgentState, SignalAgent};
use crate::cost::{BudgetSnapshot, BudgetState};
use crate::types::{ModelTier, RequestContext, Target};

/// Percentage bands of the limit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BudgetBands {
    pub constrained_pct: f64,
    pub critical_pct: f64,
}

impl Default for BudgetBands {
    fn default() -> Self {
        Self {
            constrained_pct: 70.0,
            critical_pct: 90.0,
        }
    }
}

impl From<&OblixConfig> for BudgetBands {
    fn from(config: &OblixConfig) -> Self {
        Self {
            constrained_pct: config.budget_constrained_pct,
            critical_pct: config.budget_critical_pct,
        }
    }
}

pub struct BudgetAgent {
    state: Arc<BudgetState>,
    bands: BudgetBands,
}

impl BudgetAgent {
    pub const NAME: &'static str = "budget";

    pub fn new(state: Arc<BudgetState>, bands: BudgetBands) -> Self {
        Self { state, bands }
    }

    pub fn evaluate(&self, snapshot: &BudgetSnapshot) -> AgentReport {
        let spent = snapshot.spent_usd;
        let (Some(limit), Some(pct)) = (snapshot.limit_usd, snapshot.usage_percent()) else {
            return AgentReport::new(
                Self::NAME,
                ModelTier::Cloud,
                AgentState::BudgetUnlimited,
                Target::Hybrid,
                format!("no limit set, ${spent:.2} spent"),
            )
            .with_metric("spent_usd", spent);
        };

        let summary = format!("${spent:.2} of ${limit:.2} ({pct:.0}%)");
        let report = if pct >= 100.0 {
            AgentReport::new(
                Self::NAME,
                ModelTier::Cloud,
                AgentState::BudgetExhausted,
                Target::Local,
                format!("budget exhausted: {summary}"),
            )
            .blocking()
        } else if pct >= self.bands.critical_pct {
            AgentReport::new(
                Self::NAME,
                ModelTier::Cloud,
                AgentState::BudgetCritical,
                Target::Local,
                format!("budget critical: {summary}"),
            )
        } else if pct >= self.bands.constrained_pct {
            AgentReport::new(
                Self::NAME,
                ModelTier::Cloud,
                AgentState::BudgetConstrained,
                Target::Hybrid,
                format!("budget constrained: {summary}"),
            )
        } else {
            AgentReport::new(
                Self::NAME,
                ModelTier::Cloud,
                AgentState::BudgetNominal,
                Target::Hybrid,
                summary,
            )
        };

        report
            .with_metric("spent_usd", spent)
            .with_metric("limit_usd", limit)
            .with_metric("usage_percent", pct)
    }
}

#[async_trait]
impl SignalAgent for BudgetAgent {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn initialize(&self) -> Result<(), AgentError> {
        let b = self.bands;
        if !(0.0..=100.0).contains(&b.constrained_pct)
            || !(0.0..=100.0).contains(&b.critical_pct)
            || b.constrained_pct > b.critical_pct
        {
            return Err(AgentError::InvalidConfig(format!(
                "budget bands out of order: constrained {}%, critical {}%",
                b.constrained_pct, b.critical_pct
            )));
        }
        Ok(())
    }

    async fn check(&self, _ctx: &RequestContext) -> AgentReport {
        self.evaluate(&self.state.snapshot())
    }
}
