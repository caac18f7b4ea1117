//! Error taxonomy for routing and execution.
//!
//! Every error that reaches the caller carries a [`DecisionContext`] so the
//! reports and eliminated tiers behind a failure can be inspected.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::agents::AgentReport;
use crate::types::{ModelId, ModelTier};

/// The evidence a routing decision was (or would have been) based on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DecisionContext {
    pub reports: Vec<AgentReport>,
    pub eliminated: Vec<ModelTier>,
}

impl DecisionContext {
    pub fn new(reports: Vec<AgentReport>, eliminated: Vec<ModelTier>) -> Self {
        Self {
            reports,
            eliminated,
        }
    }
}

impl fmt::Display for DecisionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("reports=[")?;
        for (i, report) in self.reports.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(
                f,
                "{}:{}->{}{}",
                report.agent,
                report.state,
                report.target,
                if report.proceed { "" } else { " (blocked)" }
            )?;
        }
        f.write_str("] eliminated=[")?;
        for (i, tier) in self.eliminated.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{tier}")?;
        }
        f.write_str("]")
    }
}

/// One failed invocation attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedAttempt {
    pub model: ModelId,
    pub error: String,
}

impl fmt::Display for FailedAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.model, self.error)
    }
}

fn join_attempts(attempts: &[FailedAttempt]) -> String {
    attempts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", then ")
}

/// Errors surfaced by the registry, router, executor and client.
#[derive(Debug, thiserror::Error)]
pub enum RoutingError {
    #[error("Model already registered: {0}")]
    DuplicateModel(ModelId),

    #[error("Unknown model: {id}")]
    UnknownModel { id: String },

    #[error("No available model: {reason}; {context}")]
    NoAvailableModel {
        reason: String,
        context: DecisionContext,
    },

    #[error("Execution failed: {}; {context}", join_attempts(.attempts))]
    ExecutionFailed {
        attempts: Vec<FailedAttempt>,
        context: DecisionContext,
    },

    #[error("Request cancelled after {}ms; {context}", .timeout.as_millis())]
    RequestCancelled {
        timeout: Duration,
        context: DecisionContext,
    },
}

impl RoutingError {
    pub fn unknown_model(id: impl fmt::Display) -> Self {
        Self::UnknownModel { id: id.to_string() }
    }

    /// Decision context attached to this error, if any.
    pub fn context(&self) -> Option<&DecisionContext> {
        match self {
            Self::NoAvailableModel { context, .. }
            | Self::ExecutionFailed { context, .. }
            | Self::RequestCancelled { context, .. } => Some(context),
            Self::DuplicateModel(_) | Self::UnknownModel { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{AgentReport, AgentState};
    use crate::types::Target;

    fn blocked_report() -> AgentReport {
        AgentReport::new(
            "connectivity",
            ModelTier::Cloud,
            AgentState::Disconnected,
            Target::Local,
            "packet loss 12.0% exceeds 10.0%",
        )
        .blocking()
    }

    #[test]
    fn context_display_lists_reports_and_tiers() {
        let ctx = DecisionContext::new(vec![blocked_report()], vec![ModelTier::Cloud]);
        let text = ctx.to_string();
        assert!(text.contains("connectivity:disconnected->local (blocked)"));
        assert!(text.contains("eliminated=[cloud]"));
    }

    #[test]
    fn execution_failed_message_names_both_attempts() {
        let err = RoutingError::ExecutionFailed {
            attempts: vec![
                FailedAttempt {
                    model: ModelId::local("llama3.2"),
                    error: "Timeout".into(),
                },
                FailedAttempt {
                    model: ModelId::cloud("gpt-4o-mini"),
                    error: "Network error: refused".into(),
                },
            ],
            context: DecisionContext::default(),
        };
        let msg = err.to_string();
        assert!(msg.contains("local:llama3.2 (Timeout), then cloud:gpt-4o-mini"));
        assert!(err.context().is_some());
    }

    #[test]
    fn registry_errors_have_no_context() {
        let err = RoutingError::unknown_model("cloud:missing");
        assert_eq!(err.to_string(), "Unknown model: cloud:missing");
        assert!(err.context().is_none());
    }
}
