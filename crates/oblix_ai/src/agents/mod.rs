//! Signal agents: independent checks that each produce a normalized
//! recommendation for the router.
//!
//! - **resource** watches CPU and memory pressure on this machine
//! - **connectivity** measures latency, packet loss and bandwidth
//! - **budget** compares cloud spend against the configured limit
//!
//! An agent only says `proceed = false` for a hard stop; softer preferences
//! are carried in `state` and `target`.

pub mod budget;
pub mod connectivity;
pub mod resource;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::types::{ModelTier, RequestContext, Target};

pub use budget::{BudgetAgent, BudgetBands};
pub use connectivity::{
    ConnectivityAgent, ConnectivityThresholds, NetworkProbe, NetworkSample, TcpNetworkProbe,
};
pub use resource::{ResourceAgent, ResourceProbe, ResourceSample, ResourceThresholds, SysinfoProbe};

// ---------------------------------------------------------------------------
// States
// ---------------------------------------------------------------------------

/// Enumerated state symbols reported by the built-in agents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    // resource
    Available,
    Constrained,
    Critical,
    ResourceExhausted,
    // connectivity
    Optimal,
    Degraded,
    Disconnected,
    // budget
    BudgetNominal,
    BudgetConstrained,
    BudgetCritical,
    BudgetExhausted,
    BudgetUnlimited,
    /// The agent could not take a measurement this round.
    Unknown,
}

impl AgentState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Constrained => "constrained",
            Self::Critical => "critical",
            Self::ResourceExhausted => "resource_exhausted",
            Self::Optimal => "optimal",
            Self::Degraded => "degraded",
            Self::Disconnected => "disconnected",
            Self::BudgetNominal => "budget_nominal",
            Self::BudgetConstrained => "budget_constrained",
            Self::BudgetCritical => "budget_critical",
            Self::BudgetExhausted => "budget_exhausted",
            Self::BudgetUnlimited => "budget_unlimited",
            Self::Unknown => "unknown",
        }
    }

    /// High-severity states whose target wins outright when that tier
    /// survives elimination.
    pub fn is_pinning(self) -> bool {
        matches!(
            self,
            Self::BudgetCritical
                | Self::BudgetExhausted
                | Self::ResourceExhausted
                | Self::Disconnected
        )
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// One agent's verdict for one request. Never mutated after it is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentReport {
    /// Name of the producing agent.
    pub agent: String,
    pub proceed: bool,
    pub state: AgentState,
    pub target: Target,
    /// Tier that `proceed = false` eliminates.
    pub guards: ModelTier,
    pub reason: String,
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
}

impl AgentReport {
    pub fn new(
        agent: impl Into<String>,
        guards: ModelTier,
        state: AgentState,
        target: Target,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            agent: agent.into(),
            proceed: true,
            state,
            target,
            guards,
            reason: reason.into(),
            metrics: BTreeMap::new(),
        }
    }

    /// Neutral report used when an agent cannot measure: no vote, no block.
    pub fn unknown(agent: impl Into<String>, guards: ModelTier, reason: impl Into<String>) -> Self {
        Self::new(agent, guards, AgentState::Unknown, Target::Hybrid, reason)
    }

    pub fn with_metric(mut self, key: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(key.into(), value);
        self
    }

    /// Mark this report as a hard stop for its guarded tier.
    pub fn blocking(mut self) -> Self {
        self.proceed = false;
        self
    }

    /// The tier this report eliminates, if it is a hard stop.
    pub fn eliminates(&self) -> Option<ModelTier> {
        (!self.proceed).then_some(self.guards)
    }
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Probe unavailable: {0}")]
    ProbeUnavailable(String),

    #[error("Invalid agent configuration: {0}")]
    InvalidConfig(String),
}

/// Capability shared by every signal agent.
#[async_trait]
pub trait SignalAgent: Send + Sync {
    /// Stable name, used in reports and logs.
    fn name(&self) -> &str;

    /// Called once when the agent is hooked. A failure leaves the agent
    /// inactive for the rest of the process.
    async fn initialize(&self) -> Result<(), AgentError> {
        Ok(())
    }

    /// Produce a fresh report for this request.
    async fn check(&self, ctx: &RequestContext) -> AgentReport;

    async fn shutdown(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pinning_states() {
        assert!(AgentState::BudgetCritical.is_pinning());
        assert!(AgentState::Disconnected.is_pinning());
        assert!(AgentState::ResourceExhausted.is_pinning());
        assert!(!AgentState::Critical.is_pinning());
        assert!(!AgentState::Degraded.is_pinning());
    }

    #[test]
    fn state_display_matches_serde() {
        for state in [
            AgentState::ResourceExhausted,
            AgentState::BudgetUnlimited,
            AgentState::Optimal,
        ] {
            let json = serde_json::to_string(&state).unwrap();
            assert_eq!(json, format!("\"{state}\""));
        }
    }

    #[test]
    fn blocking_report_eliminates_guarded_tier() {
        let report = AgentReport::new(
            "budget",
            ModelTier::Cloud,
            AgentState::BudgetExhausted,
            Target::Local,
            "spent everything",
        );
        assert!(report.eliminates().is_none());
        let report = report.blocking().with_metric("usage_percent", 101.0);
        assert_eq!(report.eliminates(), Some(ModelTier::Cloud));
        assert_eq!(report.metrics["usage_percent"], 101.0);
    }

    #[test]
    fn unknown_report_is_neutral() {
        let report = AgentReport::unknown("resource", ModelTier::Local, "probe failed");
        assert!(report.proceed);
        assert_eq!(report.target, Target::Hybrid);
        assert_eq!(report.state, AgentState::Unknown);
    }
}
