//! Router
//!
//! Consults every active signal agent concurrently, eliminates tiers that an
//! agent hard-stopped, picks the winning tier, then picks the best handle on
//! that tier for the prompt's complexity. An explicit model override skips
//! the agents entirely.

use std::cmp::Ordering as CmpOrdering;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::agents::{AgentReport, SignalAgent};
use crate::error::{DecisionContext, RoutingError};
use crate::model_registry::{ModelHandle, ModelRegistry, RegistrySnapshot};
use crate::types::{ModelId, ModelTier, RequestContext};

use super::complexity_classifier::{Complexity, ComplexityClassifier, ComplexityResult};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Per-request routing hints supplied by the caller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouteOverrides {
    /// Either `tier:name` or a bare name that is unique in the registry.
    pub model: Option<String>,
}

impl RouteOverrides {
    pub fn model(model: impl Into<String>) -> Self {
        Self {
            model: Some(model.into()),
        }
    }
}

/// Audit record of one routing decision. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub id: Uuid,
    /// The selected handle.
    pub model: ModelId,
    pub tier: ModelTier,
    /// Every report consulted, in agent registration order.
    pub reports: Vec<AgentReport>,
    pub eliminated: Vec<ModelTier>,
    pub complexity: ComplexityResult,
    /// True when the caller named the model explicitly.
    pub overridden: bool,
    /// Where the executor goes if the selected handle fails.
    pub fallback: Option<ModelId>,
    pub reasoning: String,
    pub timestamp: DateTime<Utc>,
}

impl RoutingDecision {
    pub fn context(&self) -> DecisionContext {
        DecisionContext::new(self.reports.clone(), self.eliminated.clone())
    }
}

/// Outcome of [`decide`]: everything in a decision except its identity.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub model: ModelId,
    pub tier: ModelTier,
    pub eliminated: Vec<ModelTier>,
    pub fallback: Option<ModelId>,
    pub reasoning: String,
}

// ---------------------------------------------------------------------------
// Decision logic (pure)
// ---------------------------------------------------------------------------

/// Order two handles for the given complexity; `Less` means preferred.
///
/// Complex prompts prefer higher quality, then lower cost. Simple prompts
/// prefer lower cost, then higher quality. Registration order breaks the
/// remaining ties, which callers get for free from a stable sort.
fn compare_handles(a: &ModelHandle, b: &ModelHandle, complexity: Complexity) -> CmpOrdering {
    let by_quality = b.quality().cmp(&a.quality());
    let by_cost = a.pricing().cost_rank().total_cmp(&b.pricing().cost_rank());
    match complexity {
        Complexity::Complex => by_quality.then(by_cost),
        Complexity::Simple => by_cost.then(by_quality),
    }
}

fn ranked<'a>(
    snapshot: &'a RegistrySnapshot,
    tier: ModelTier,
    complexity: Complexity,
) -> Vec<&'a Arc<ModelHandle>> {
    let mut handles: Vec<_> = snapshot.by_tier(tier).collect();
    handles.sort_by(|a, b| compare_handles(a, b, complexity));
    handles
}

/// Pick a tier and handle from a fixed set of reports.
///
/// Pure and deterministic: the same snapshot, reports and complexity always
/// produce the same selection.
pub fn decide(
    snapshot: &RegistrySnapshot,
    reports: &[AgentReport],
    complexity: &ComplexityResult,
) -> Result<Selection, RoutingError> {
    let context = || DecisionContext::new(reports.to_vec(), eliminated_tiers(reports));

    if snapshot.is_empty() {
        return Err(RoutingError::NoAvailableModel {
            reason: "registry is empty".into(),
            context: context(),
        });
    }

    let eliminated = eliminated_tiers(reports);
    let surviving: Vec<ModelTier> = ModelTier::ALL
        .into_iter()
        .filter(|t| !eliminated.contains(t))
        .collect();
    if surviving.is_empty() {
        return Err(RoutingError::NoAvailableModel {
            reason: "every tier was eliminated by agent hard stops".into(),
            context: context(),
        });
    }

    // 1. Winning tier: a surviving pin wins outright, otherwise tally votes.
    let pins: Vec<(&AgentReport, ModelTier)> = reports
        .iter()
        .filter(|r| r.state.is_pinning())
        .filter_map(|r| r.target.tier().map(|t| (r, t)))
        .filter(|(_, t)| surviving.contains(t))
        .collect();

    let (winner, mut reasoning) = if let Some(&(report, tier)) = pins
        .iter()
        .min_by_key(|(_, t)| *t)
    {
        (
            tier,
            format!("{tier} pinned by {}:{}", report.agent, report.state),
        )
    } else {
        let votes = |tier: ModelTier| {
            reports
                .iter()
                .filter(|r| r.target.tier() == Some(tier))
                .count()
        };
        let mut best = surviving[0];
        for &tier in &surviving[1..] {
            if votes(tier) > votes(best) {
                best = tier;
            }
        }
        let tally = surviving
            .iter()
            .map(|t| format!("{t}={}", votes(*t)))
            .collect::<Vec<_>>()
            .join(" ");
        (best, format!("{best} won vote ({tally})"))
    };

    // 2. Candidates on the winning tier, else local, else anything surviving.
    let mut tier = winner;
    let mut candidates = ranked(snapshot, tier, complexity.complexity);
    if candidates.is_empty() {
        let alternative = surviving
            .iter()
            .copied()
            .find(|t| *t != winner && snapshot.by_tier(*t).next().is_some());
        match alternative {
            Some(alt) => {
                reasoning.push_str(&format!("; no {winner} model registered, using {alt}"));
                tier = alt;
                candidates = ranked(snapshot, tier, complexity.complexity);
            }
            None => {
                return Err(RoutingError::NoAvailableModel {
                    reason: format!("no registered model on a surviving tier ({winner} won)"),
                    context: context(),
                });
            }
        }
    }

    let chosen = candidates[0].id().clone();
    reasoning.push_str(&format!(
        "; {} prompt -> {}",
        complexity.complexity,
        match complexity.complexity {
            Complexity::Complex => "highest quality",
            Complexity::Simple => "lowest cost",
        }
    ));

    // 3. Fallback: best on the other surviving tier, else next best here.
    let fallback = surviving
        .iter()
        .copied()
        .filter(|t| *t != tier)
        .find_map(|t| {
            ranked(snapshot, t, complexity.complexity)
                .first()
                .map(|h| h.id().clone())
        })
        .or_else(|| candidates.get(1).map(|h| h.id().clone()));

    Ok(Selection {
        model: chosen,
        tier,
        eliminated,
        fallback,
        reasoning,
    })
}

fn eliminated_tiers(reports: &[AgentReport]) -> Vec<ModelTier> {
    ModelTier::ALL
        .into_iter()
        .filter(|t| reports.iter().any(|r| r.eliminates() == Some(*t)))
        .collect()
}

/// Fallback for an explicit override: first registered handle on the other
/// tier, else the next registered handle on the same tier.
fn override_fallback(snapshot: &RegistrySnapshot, chosen: &ModelId) -> Option<ModelId> {
    snapshot
        .by_tier(chosen.tier.other())
        .next()
        .or_else(|| snapshot.iter().find(|h| h.id() != chosen && h.tier() == chosen.tier))
        .map(|h| h.id().clone())
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

struct AgentSlot {
    agent: Arc<dyn SignalAgent>,
    active: AtomicBool,
}

/// Status of one hooked agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentStatus {
    pub name: String,
    pub active: bool,
}

pub struct Router {
    registry: Arc<ModelRegistry>,
    agents: RwLock<Vec<Arc<AgentSlot>>>,
    classifier: ComplexityClassifier,
}

impl Router {
    pub fn new(registry: Arc<ModelRegistry>, classifier: ComplexityClassifier) -> Self {
        Self {
            registry,
            agents: RwLock::new(Vec::new()),
            classifier,
        }
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    pub fn classifier(&self) -> &ComplexityClassifier {
        &self.classifier
    }

    /// Initialize and hook an agent. Returns whether it is active; an agent
    /// that fails to initialize stays hooked but is never consulted.
    pub async fn hook_agent(&self, agent: Arc<dyn SignalAgent>) -> bool {
        let active = match agent.initialize().await {
            Ok(()) => {
                info!(agent = agent.name(), "Signal agent hooked");
                true
            }
            Err(e) => {
                warn!(agent = agent.name(), error = %e, "Signal agent failed to initialize, marking inactive");
                false
            }
        };
        self.agents.write().push(Arc::new(AgentSlot {
            agent,
            active: AtomicBool::new(active),
        }));
        active
    }

    pub fn agent_status(&self) -> Vec<AgentStatus> {
        self.agents
            .read()
            .iter()
            .map(|slot| AgentStatus {
                name: slot.agent.name().to_string(),
                active: slot.active.load(Ordering::Relaxed),
            })
            .collect()
    }

    fn active_agents(&self) -> Vec<Arc<AgentSlot>> {
        self.agents
            .read()
            .iter()
            .filter(|slot| slot.active.load(Ordering::Relaxed))
            .cloned()
            .collect()
    }

    /// Route one prompt to exactly one registered model.
    pub async fn route(
        &self,
        prompt: &str,
        overrides: &RouteOverrides,
    ) -> Result<RoutingDecision, RoutingError> {
        let complexity = self.classifier.classify(prompt);
        let snapshot = self.registry.list();

        if let Some(ref reference) = overrides.model {
            let handle = self.registry.resolve(reference)?;
            let model = handle.id().clone();
            info!(model = %model, "Explicit model override, agents skipped");
            return Ok(RoutingDecision {
                id: Uuid::new_v4(),
                fallback: override_fallback(&snapshot, &model),
                tier: model.tier,
                reasoning: format!("explicit override: {model}"),
                model,
                reports: Vec::new(),
                eliminated: Vec::new(),
                complexity,
                overridden: true,
                timestamp: Utc::now(),
            });
        }

        if snapshot.is_empty() {
            return Err(RoutingError::NoAvailableModel {
                reason: "registry is empty".into(),
                context: DecisionContext::default(),
            });
        }

        let ctx = RequestContext {
            prompt: prompt.to_string(),
            complexity,
        };
        let agents = self.active_agents();
        let reports: Vec<AgentReport> =
            futures::future::join_all(agents.iter().map(|slot| slot.agent.check(&ctx))).await;

        for report in &reports {
            debug!(
                agent = %report.agent,
                state = %report.state,
                target = %report.target,
                proceed = report.proceed,
                "Agent report"
            );
        }

        let selection = decide(&snapshot, &reports, &ctx.complexity)?;
        info!(
            model = %selection.model,
            tier = %selection.tier,
            fallback = ?selection.fallback.as_ref().map(ToString::to_string),
            reasoning = %selection.reasoning,
            "Routing decision"
        );

        Ok(RoutingDecision {
            id: Uuid::new_v4(),
            model: selection.model,
            tier: selection.tier,
            reports,
            eliminated: selection.eliminated,
            complexity: ctx.complexity,
            overridden: false,
            fallback: selection.fallback,
            reasoning: selection.reasoning,
            timestamp: Utc::now(),
        })
    }

    /// Shut down every hooked agent and unhook them.
    pub async fn shutdown_agents(&self) {
        let slots: Vec<_> = std::mem::take(&mut *self.agents.write());
        for slot in &slots {
            slot.agent.shutdown().await;
            slot.active.store(false, Ordering::Relaxed);
        }
        debug!(count = slots.len(), "Signal agents shut down");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{AgentError, AgentState};
    use crate::model_registry::ModelPricing;
    use crate::providers::{BackendKind, ModelBackend, ProviderError};
    use crate::types::{BackendOutput, InvokeParams, Target};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct Echo;

    #[async_trait]
    impl ModelBackend for Echo {
        fn kind(&self) -> BackendKind {
            BackendKind::Custom("echo".into())
        }

        async fn invoke(
            &self,
            _model: &str,
            prompt: &str,
            _params: &InvokeParams,
        ) -> Result<BackendOutput, ProviderError> {
            Ok(BackendOutput::text(prompt))
        }
    }

    /// Agent that returns a fixed report and counts calls.
    struct Scripted {
        report: AgentReport,
        fail_init: bool,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(report: AgentReport) -> Arc<Self> {
            Arc::new(Self {
                report,
                fail_init: false,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SignalAgent for Scripted {
        fn name(&self) -> &str {
            &self.report.agent
        }

        async fn initialize(&self) -> Result<(), AgentError> {
            if self.fail_init {
                Err(AgentError::ProbeUnavailable("scripted".into()))
            } else {
                Ok(())
            }
        }

        async fn check(&self, _ctx: &RequestContext) -> AgentReport {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.report.clone()
        }
    }

    fn handle(id: ModelId, quality: u8, cost: f64) -> ModelHandle {
        ModelHandle::new(id, Arc::new(Echo))
            .with_quality(quality)
            .with_pricing(ModelPricing::new(cost, cost))
    }

    fn registry() -> Arc<ModelRegistry> {
        let registry = Arc::new(ModelRegistry::new());
        registry
            .register(handle(ModelId::local("llama3.2"), 3, 0.0))
            .unwrap();
        registry
            .register(handle(ModelId::local("qwen2.5:14b"), 5, 0.0))
            .unwrap();
        registry
            .register(handle(ModelId::cloud("gpt-4o-mini"), 5, 0.4))
            .unwrap();
        registry
            .register(handle(ModelId::cloud("gpt-4o"), 8, 6.0))
            .unwrap();
        registry
    }

    fn report(agent: &str, guards: ModelTier, state: AgentState, target: Target) -> AgentReport {
        AgentReport::new(agent, guards, state, target, "test")
    }

    fn simple() -> ComplexityResult {
        ComplexityClassifier::default().classify("what is rust")
    }

    fn complex() -> ComplexityResult {
        ComplexityClassifier::default().classify("analyze the architecture step by step")
    }

    #[test]
    fn votes_pick_tier_and_simple_prefers_cheap() {
        let reports = vec![
            report("resource", ModelTier::Local, AgentState::Critical, Target::Cloud),
            report("connectivity", ModelTier::Cloud, AgentState::Optimal, Target::Cloud),
        ];
        let sel = decide(&registry().list(), &reports, &simple()).unwrap();
        assert_eq!(sel.tier, ModelTier::Cloud);
        assert_eq!(sel.model, ModelId::cloud("gpt-4o-mini"));
        // Both local models are free, so quality decides.
        assert_eq!(sel.fallback, Some(ModelId::local("qwen2.5:14b")));
    }

    #[test]
    fn complex_prefers_quality() {
        let reports = vec![report(
            "connectivity",
            ModelTier::Cloud,
            AgentState::Optimal,
            Target::Cloud,
        )];
        let sel = decide(&registry().list(), &reports, &complex()).unwrap();
        assert_eq!(sel.model, ModelId::cloud("gpt-4o"));
        // Complex fallback picks the best local model.
        assert_eq!(sel.fallback, Some(ModelId::local("qwen2.5:14b")));
    }

    #[test]
    fn tie_goes_to_local() {
        let reports = vec![
            report("resource", ModelTier::Local, AgentState::Available, Target::Local),
            report("connectivity", ModelTier::Cloud, AgentState::Optimal, Target::Cloud),
            report("budget", ModelTier::Cloud, AgentState::BudgetNominal, Target::Hybrid),
        ];
        let sel = decide(&registry().list(), &reports, &simple()).unwrap();
        assert_eq!(sel.tier, ModelTier::Local);
        assert!(sel.reasoning.contains("local=1 cloud=1"));
    }

    #[test]
    fn no_reports_defaults_to_local() {
        let sel = decide(&registry().list(), &[], &simple()).unwrap();
        assert_eq!(sel.tier, ModelTier::Local);
    }

    #[test]
    fn budget_critical_pins_local_over_votes() {
        let reports = vec![
            report("resource", ModelTier::Local, AgentState::Critical, Target::Cloud),
            report("connectivity", ModelTier::Cloud, AgentState::Optimal, Target::Cloud),
            report("budget", ModelTier::Cloud, AgentState::BudgetCritical, Target::Local),
        ];
        let sel = decide(&registry().list(), &reports, &simple()).unwrap();
        assert_eq!(sel.tier, ModelTier::Local);
        assert!(sel.reasoning.contains("pinned by budget:budget_critical"));
    }

    #[test]
    fn pin_on_eliminated_tier_is_ignored() {
        let reports = vec![
            report("resource", ModelTier::Local, AgentState::ResourceExhausted, Target::Cloud)
                .blocking(),
            report("budget", ModelTier::Cloud, AgentState::BudgetCritical, Target::Local),
        ];
        let sel = decide(&registry().list(), &reports, &simple()).unwrap();
        assert_eq!(sel.tier, ModelTier::Cloud);
        assert_eq!(sel.eliminated, vec![ModelTier::Local]);
        // Local is gone, so the fallback stays on cloud.
        assert_eq!(sel.fallback, Some(ModelId::cloud("gpt-4o")));
    }

    #[test]
    fn hard_stop_eliminates_tier() {
        let reports = vec![
            report("connectivity", ModelTier::Cloud, AgentState::Disconnected, Target::Local)
                .blocking(),
            report("resource", ModelTier::Local, AgentState::Critical, Target::Cloud),
        ];
        let sel = decide(&registry().list(), &reports, &complex()).unwrap();
        assert_eq!(sel.tier, ModelTier::Local);
        assert_eq!(sel.model, ModelId::local("qwen2.5:14b"));
        assert_eq!(sel.eliminated, vec![ModelTier::Cloud]);
        assert_eq!(sel.fallback, Some(ModelId::local("llama3.2")));
    }

    #[test]
    fn all_tiers_blocked_is_no_available_model() {
        let reports = vec![
            report("connectivity", ModelTier::Cloud, AgentState::Disconnected, Target::Local)
                .blocking(),
            report("resource", ModelTier::Local, AgentState::ResourceExhausted, Target::Cloud)
                .blocking(),
        ];
        let err = decide(&registry().list(), &reports, &simple()).unwrap_err();
        match err {
            RoutingError::NoAvailableModel { context, .. } => {
                assert_eq!(context.reports.len(), 2);
                assert_eq!(context.eliminated, vec![ModelTier::Local, ModelTier::Cloud]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn winning_tier_without_handles_falls_back_to_surviving_tier() {
        let registry = ModelRegistry::new();
        registry
            .register(handle(ModelId::cloud("gpt-4o-mini"), 5, 0.4))
            .unwrap();
        let reports = vec![report(
            "resource",
            ModelTier::Local,
            AgentState::Available,
            Target::Local,
        )];
        let sel = decide(&registry.list(), &reports, &simple()).unwrap();
        assert_eq!(sel.model, ModelId::cloud("gpt-4o-mini"));
        assert!(sel.fallback.is_none());
    }

    #[test]
    fn surviving_tier_without_handles_is_no_available_model() {
        let registry = ModelRegistry::new();
        registry
            .register(handle(ModelId::cloud("gpt-4o-mini"), 5, 0.4))
            .unwrap();
        let reports = vec![
            report("budget", ModelTier::Cloud, AgentState::BudgetExhausted, Target::Local)
                .blocking(),
        ];
        let err = decide(&registry.list(), &reports, &simple()).unwrap_err();
        assert!(matches!(err, RoutingError::NoAvailableModel { .. }));
    }

    #[test]
    fn equal_rank_breaks_ties_by_registration_order() {
        let registry = ModelRegistry::new();
        registry.register(handle(ModelId::local("b"), 3, 0.0)).unwrap();
        registry.register(handle(ModelId::local("a"), 3, 0.0)).unwrap();
        let sel = decide(&registry.list(), &[], &complex()).unwrap();
        assert_eq!(sel.model, ModelId::local("b"));
        assert_eq!(sel.fallback, Some(ModelId::local("a")));
    }

    #[test]
    fn decide_is_deterministic() {
        let snapshot = registry().list();
        let reports = vec![
            report("resource", ModelTier::Local, AgentState::Constrained, Target::Hybrid),
            report("connectivity", ModelTier::Cloud, AgentState::Degraded, Target::Local),
        ];
        let first = decide(&snapshot, &reports, &complex()).unwrap();
        for _ in 0..10 {
            assert_eq!(decide(&snapshot, &reports, &complex()).unwrap(), first);
        }
    }

    #[tokio::test]
    async fn empty_registry_fails() {
        let router = Router::new(Arc::new(ModelRegistry::new()), ComplexityClassifier::default());
        let err = router.route("hi", &RouteOverrides::default()).await.unwrap_err();
        match err {
            RoutingError::NoAvailableModel { reason, .. } => assert!(reason.contains("empty")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn override_skips_agents() {
        let router = Router::new(registry(), ComplexityClassifier::default());
        let agent = Scripted::new(report(
            "connectivity",
            ModelTier::Cloud,
            AgentState::Disconnected,
            Target::Local,
        ));
        router.hook_agent(agent.clone()).await;

        let decision = router
            .route("hi", &RouteOverrides::model("cloud:gpt-4o"))
            .await
            .unwrap();
        assert!(decision.overridden);
        assert_eq!(decision.model, ModelId::cloud("gpt-4o"));
        assert!(decision.reports.is_empty());
        assert_eq!(decision.fallback, Some(ModelId::local("llama3.2")));
        assert_eq!(agent.calls(), 0);
    }

    #[tokio::test]
    async fn override_by_bare_name() {
        let router = Router::new(registry(), ComplexityClassifier::default());
        let decision = router
            .route("hi", &RouteOverrides::model("llama3.2"))
            .await
            .unwrap();
        assert_eq!(decision.model, ModelId::local("llama3.2"));
        assert_eq!(decision.fallback, Some(ModelId::cloud("gpt-4o-mini")));
    }

    #[tokio::test]
    async fn unknown_override_fails() {
        let router = Router::new(registry(), ComplexityClassifier::default());
        let err = router
            .route("hi", &RouteOverrides::model("cloud:missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, RoutingError::UnknownModel { .. }));
    }

    #[tokio::test]
    async fn route_collects_reports_from_every_active_agent() {
        let router = Router::new(registry(), ComplexityClassifier::default());
        let a = Scripted::new(report("resource", ModelTier::Local, AgentState::Critical, Target::Cloud));
        let b = Scripted::new(report("connectivity", ModelTier::Cloud, AgentState::Optimal, Target::Cloud));
        assert!(router.hook_agent(a.clone()).await);
        assert!(router.hook_agent(b.clone()).await);

        let decision = router.route("what is rust", &RouteOverrides::default()).await.unwrap();
        assert_eq!(decision.reports.len(), 2);
        assert_eq!(decision.reports[0].agent, "resource");
        assert_eq!(decision.tier, ModelTier::Cloud);
        assert_eq!(a.calls(), 1);
        assert_eq!(b.calls(), 1);
    }

    #[tokio::test]
    async fn failed_init_agent_is_skipped() {
        let router = Router::new(registry(), ComplexityClassifier::default());
        let broken = Arc::new(Scripted {
            report: report("connectivity", ModelTier::Cloud, AgentState::Disconnected, Target::Local)
                .blocking(),
            fail_init: true,
            calls: AtomicUsize::new(0),
        });
        assert!(!router.hook_agent(broken.clone()).await);

        let decision = router.route("hi", &RouteOverrides::default()).await.unwrap();
        assert!(decision.reports.is_empty());
        assert!(decision.eliminated.is_empty());
        assert_eq!(broken.calls(), 0);
        assert_eq!(
            router.agent_status(),
            vec![AgentStatus {
                name: "connectivity".into(),
                active: false
            }]
        );
    }

    #[tokio::test]
    async fn repeated_routes_agree() {
        let router = Router::new(registry(), ComplexityClassifier::default());
        router
            .hook_agent(Scripted::new(report(
                "budget",
                ModelTier::Cloud,
                AgentState::BudgetConstrained,
                Target::Hybrid,
            )))
            .await;
        let prompt = "compare tokio and async-std";
        let first = router.route(prompt, &RouteOverrides::default()).await.unwrap();
        let second = router.route(prompt, &RouteOverrides::default()).await.unwrap();
        assert_eq!(first.model, second.model);
        assert_eq!(first.fallback, second.fallback);
        assert_eq!(first.reports, second.reports);
        assert_ne!(first.id, second.id);
    }

    #[tokio::test]
    async fn shutdown_unhooks_agents() {
        let router = Router::new(registry(), ComplexityClassifier::default());
        router
            .hook_agent(Scripted::new(report(
                "resource",
                ModelTier::Local,
                AgentState::Available,
                Target::Local,
            )))
            .await;
        router.shutdown_agents().await;
        assert!(router.agent_status().is_empty());
    }
}
