//! Executor
//!
//! Invokes the model a [`RoutingDecision`] selected under a bounded timeout.
//! On a timeout, a transport failure or a model that has been unregistered it
//! makes exactly one hop to the decision's fallback candidate and gives up
//! after that. Other backend errors fail the request straight away.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use oblix_core::OblixConfig;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::agents::AgentReport;
use crate::cost::{BudgetState, calculate_cost, estimate_usage};
use crate::error::{FailedAttempt, RoutingError};
use crate::model_registry::{ModelHandle, ModelRegistry};
use crate::providers::ProviderError;
use crate::types::{BackendOutput, InvokeParams, ModelId, ModelTier, TokenUsage};

use super::router::RoutingDecision;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Upper bound on a single backend invocation.
    pub invocation_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            invocation_timeout: Duration::from_secs(60),
        }
    }
}

impl From<&OblixConfig> for ExecutorConfig {
    fn from(config: &OblixConfig) -> Self {
        Self {
            invocation_timeout: Duration::from_secs(config.invocation_timeout_secs),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExecutionMetrics {
    /// Wall-clock time of the invocation that produced the response.
    pub latency_ms: u64,
    /// Wall-clock time of the whole execution, failed attempt included.
    pub total_ms: u64,
    pub usage: TokenUsage,
    /// True when the backend did not report usage and it was estimated.
    pub tokens_estimated: bool,
    pub cost_usd: f64,
}

/// What the caller gets back for one prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub response: String,
    /// The model that actually produced `response`.
    pub model: ModelId,
    pub tier: ModelTier,
    pub decision: RoutingDecision,
    pub metrics: ExecutionMetrics,
    pub used_fallback: bool,
    /// The primary attempt, when it failed and the fallback answered.
    pub failed_attempt: Option<FailedAttempt>,
}

impl ExecutionResult {
    /// Reports the decision was based on.
    pub fn reports(&self) -> &[AgentReport] {
        &self.decision.reports
    }
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// Cumulative counters across every execution.
#[derive(Debug, Default)]
pub struct ExecutionStats {
    requests: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    cancelled: AtomicU64,
    fallbacks: AtomicU64,
    local_responses: AtomicU64,
    cloud_responses: AtomicU64,
    total_latency_ms: AtomicU64,
    total_tokens: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionStatsSnapshot {
    pub requests: u64,
    pub successes: u64,
    pub failures: u64,
    /// Executions dropped by the caller's overall deadline.
    pub cancelled: u64,
    pub fallbacks: u64,
    pub local_responses: u64,
    pub cloud_responses: u64,
    pub total_latency_ms: u64,
    pub total_tokens: u64,
}

impl ExecutionStats {
    fn record_success(&self, result: &ExecutionResult) {
        self.successes.fetch_add(1, Ordering::Relaxed);
        if result.used_fallback {
            self.fallbacks.fetch_add(1, Ordering::Relaxed);
        }
        match result.tier {
            ModelTier::Local => self.local_responses.fetch_add(1, Ordering::Relaxed),
            ModelTier::Cloud => self.cloud_responses.fetch_add(1, Ordering::Relaxed),
        };
        self.total_latency_ms
            .fetch_add(result.metrics.latency_ms, Ordering::Relaxed);
        self.total_tokens
            .fetch_add(u64::from(result.metrics.usage.total_tokens), Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ExecutionStatsSnapshot {
        ExecutionStatsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
            local_responses: self.local_responses.load(Ordering::Relaxed),
            cloud_responses: self.cloud_responses.load(Ordering::Relaxed),
            total_latency_ms: self.total_latency_ms.load(Ordering::Relaxed),
            total_tokens: self.total_tokens.load(Ordering::Relaxed),
        }
    }
}

/// A failed invocation and whether it may hop to the fallback.
struct AttemptError {
    attempt: FailedAttempt,
    retryable: bool,
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

pub struct Executor {
    registry: Arc<ModelRegistry>,
    budget: Arc<BudgetState>,
    config: ExecutorConfig,
    stats: ExecutionStats,
}

impl Executor {
    pub fn new(registry: Arc<ModelRegistry>, budget: Arc<BudgetState>, config: ExecutorConfig) -> Self {
        Self {
            registry,
            budget,
            config,
            stats: ExecutionStats::default(),
        }
    }

    pub fn stats(&self) -> ExecutionStatsSnapshot {
        self.stats.snapshot()
    }

    /// Count an execution whose future was dropped before it finished.
    pub fn record_cancelled(&self) {
        self.stats.cancelled.fetch_add(1, Ordering::Relaxed);
    }

    async fn attempt(
        &self,
        id: &ModelId,
        prompt: &str,
        params: &InvokeParams,
    ) -> Result<(Arc<ModelHandle>, BackendOutput, Duration), AttemptError> {
        let failed = |error: String, retryable: bool| AttemptError {
            attempt: FailedAttempt {
                model: id.clone(),
                error,
            },
            retryable,
        };
        let handle = self
            .registry
            .get(id)
            .ok_or_else(|| failed("model is no longer registered".into(), true))?;

        let start = Instant::now();
        let result = tokio::time::timeout(self.config.invocation_timeout, handle.invoke(prompt, params))
            .await
            .unwrap_or(Err(ProviderError::Timeout));
        match result {
            Ok(output) => Ok((handle, output, start.elapsed())),
            Err(e) => Err(failed(e.to_string(), e.is_retryable())),
        }
    }

    /// Run the decision's model; on a retryable failure try the fallback once.
    pub async fn execute(
        &self,
        decision: RoutingDecision,
        prompt: &str,
        params: &InvokeParams,
    ) -> Result<ExecutionResult, RoutingError> {
        self.stats.requests.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();

        let mut failed_attempt = None;
        let outcome = match self.attempt(&decision.model, prompt, params).await {
            Ok(ok) => Ok(ok),
            Err(AttemptError { attempt: primary, retryable }) => {
                warn!(
                    model = %primary.model,
                    error = %primary.error,
                    retryable,
                    "Primary model failed"
                );
                let fallback = decision
                    .fallback
                    .as_ref()
                    .filter(|fb| retryable && **fb != decision.model);
                match fallback {
                    Some(fallback) => {
                        info!(from = %decision.model, to = %fallback, "Falling back");
                        let second = self.attempt(fallback, prompt, params).await;
                        failed_attempt = Some(primary.clone());
                        second.map_err(|e| vec![primary, e.attempt])
                    }
                    None => Err(vec![primary]),
                }
            }
        };

        let (handle, output, latency) = match outcome {
            Ok(ok) => ok,
            Err(attempts) => {
                self.stats.failures.fetch_add(1, Ordering::Relaxed);
                warn!(attempts = attempts.len(), "Execution failed");
                return Err(RoutingError::ExecutionFailed {
                    context: decision.context(),
                    attempts,
                });
            }
        };

        let (usage, tokens_estimated) = match output.usage {
            Some(usage) => (usage, false),
            None => (estimate_usage(prompt, &output.text), true),
        };
        let cost_usd = calculate_cost(&handle.pricing(), &usage).total_cost;
        if handle.tier() == ModelTier::Cloud && cost_usd > 0.0 {
            self.budget.record_spend(cost_usd);
        }

        let result = ExecutionResult {
            response: output.text,
            model: handle.id().clone(),
            tier: handle.tier(),
            used_fallback: failed_attempt.is_some(),
            failed_attempt,
            metrics: ExecutionMetrics {
                latency_ms: millis(latency),
                total_ms: millis(started.elapsed()),
                usage,
                tokens_estimated,
                cost_usd,
            },
            decision,
        };
        self.stats.record_success(&result);

        info!(
            model = %result.model,
            latency_ms = result.metrics.latency_ms,
            tokens = result.metrics.usage.total_tokens,
            estimated = tokens_estimated,
            cost_usd,
            fallback = result.used_fallback,
            "Execution complete"
        );
        Ok(result)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
