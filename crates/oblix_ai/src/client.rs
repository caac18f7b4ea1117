//! Oblix client: the caller-facing API.
//!
//! Owns the registry, router, executor and budget state, and exposes
//! `hook_model` / `hook_agent` / `execute` on top of them.

use std::sync::Arc;
use std::time::Duration;

use oblix_core::OblixConfig;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::agents::{
    BudgetAgent, BudgetBands, ConnectivityAgent, ConnectivityThresholds, ResourceAgent,
    ResourceThresholds, SignalAgent, TcpNetworkProbe,
};
use crate::cost::BudgetState;
use crate::error::{DecisionContext, RoutingError};
use crate::model_registry::{ModelHandle, ModelRegistry, known_cloud_model};
use crate::providers::{OllamaBackend, OpenAiCompatBackend};
use crate::routing::{
    AgentStatus, ComplexityClassifier, ExecutionResult, ExecutionStatsSnapshot, Executor,
    ExecutorConfig, RouteOverrides, Router, RoutingDecision,
};
use crate::types::{InvokeParams, ModelId};

/// Quality rank given to locally served models when nothing better is known.
const DEFAULT_LOCAL_QUALITY: u8 = 3;
/// Quality rank for cloud models missing from the known-model catalog.
const DEFAULT_CLOUD_QUALITY: u8 = 6;

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Per-call options for [`OblixClient::execute`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecuteOptions {
    /// Explicit model (`tier:name` or a unique bare name). Skips the agents.
    pub model: Option<String>,
    /// Overall deadline; defaults to the configured request timeout.
    pub timeout: Option<Duration>,
    #[serde(default)]
    pub params: InvokeParams,
}

impl ExecuteOptions {
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.params.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.params.temperature = Some(temperature);
        self
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.params.system_prompt = Some(system_prompt.into());
        self
    }
}

// ---------------------------------------------------------------------------
// OblixClient
// ---------------------------------------------------------------------------

pub struct OblixClient {
    config: OblixConfig,
    registry: Arc<ModelRegistry>,
    budget: Arc<BudgetState>,
    router: Router,
    executor: Executor,
}

impl OblixClient {
    pub fn new(config: OblixConfig) -> Self {
        let registry = Arc::new(ModelRegistry::new());
        let budget = Arc::new(BudgetState::new(
            config.budget_limit_usd,
            config.budget_window_hours,
        ));
        let router = Router::new(
            Arc::clone(&registry),
            ComplexityClassifier::new(config.complexity_token_threshold),
        );
        let executor = Executor::new(
            Arc::clone(&registry),
            Arc::clone(&budget),
            ExecutorConfig::from(&config),
        );
        info!(
            budget_limit_usd = ?config.budget_limit_usd,
            request_timeout_secs = config.request_timeout_secs,
            "Oblix client created"
        );

        Self {
            config,
            registry,
            budget,
            router,
            executor,
        }
    }

    pub fn config(&self) -> &OblixConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    /// Shared budget window; the budget agent and the executor both use it.
    pub fn budget(&self) -> &Arc<BudgetState> {
        &self.budget
    }

    pub fn stats(&self) -> ExecutionStatsSnapshot {
        self.executor.stats()
    }

    pub fn agent_status(&self) -> Vec<AgentStatus> {
        self.router.agent_status()
    }

    // -- Models ------------------------------------------------------------

    pub fn hook_model(&self, handle: ModelHandle) -> Result<(), RoutingError> {
        self.registry.register(handle)
    }

    pub fn unregister_model(&self, id: &ModelId) -> Result<(), RoutingError> {
        self.registry.unregister(id).map(|_| ())
    }

    /// Register every model listed in the config. Cloud models are skipped
    /// when no API key is available. Returns how many were registered.
    pub fn hook_configured_models(&self) -> Result<usize, RoutingError> {
        let mut count = 0;

        if !self.config.ollama_models.is_empty() {
            let backend = Arc::new(OllamaBackend::new(Some(self.config.ollama_url.clone())));
            for name in &self.config.ollama_models {
                self.hook_model(
                    ModelHandle::new(ModelId::local(name), backend.clone())
                        .with_quality(DEFAULT_LOCAL_QUALITY),
                )?;
                count += 1;
            }
        }

        if !self.config.openai_models.is_empty() {
            if let Some(ref key) = self.config.openai_api_key
                && !key.is_empty()
            {
                let backend = Arc::new(OpenAiCompatBackend::new(
                    self.config.openai_base_url.clone(),
                    Some(key.clone()),
                ));
                for name in &self.config.openai_models {
                    let mut handle = ModelHandle::new(ModelId::cloud(name), backend.clone())
                        .with_quality(DEFAULT_CLOUD_QUALITY);
                    if let Some((quality, pricing)) = known_cloud_model(name) {
                        handle = handle.with_quality(quality).with_pricing(pricing);
                    } else {
                        debug!(model = %name, "No pricing known, spend will not be tracked");
                    }
                    self.hook_model(handle)?;
                    count += 1;
                }
            } else {
                warn!(
                    models = self.config.openai_models.len(),
                    "Cloud models configured but no API key set, skipping"
                );
            }
        }

        Ok(count)
    }

    // -- Agents ------------------------------------------------------------

    /// Initialize and hook an agent. Returns whether it is active.
    pub async fn hook_agent(&self, agent: Arc<dyn SignalAgent>) -> bool {
        self.router.hook_agent(agent).await
    }

    /// Hook the resource, connectivity and budget agents configured from
    /// this client's config. Returns how many came up active.
    pub async fn hook_default_agents(&self) -> usize {
        let agents: [Arc<dyn SignalAgent>; 3] = [
            Arc::new(ResourceAgent::system(ResourceThresholds::from(&self.config))),
            Arc::new(ConnectivityAgent::new(
                Arc::new(TcpNetworkProbe::from_config(&self.config)),
                ConnectivityThresholds::from(&self.config),
            )),
            Arc::new(BudgetAgent::new(
                Arc::clone(&self.budget),
                BudgetBands::from(&self.config),
            )),
        ];

        let mut active = 0;
        for agent in agents {
            if self.hook_agent(agent).await {
                active += 1;
            }
        }
        active
    }

    // -- Requests ----------------------------------------------------------

    pub async fn route(
        &self,
        prompt: &str,
        overrides: &RouteOverrides,
    ) -> Result<RoutingDecision, RoutingError> {
        self.router.route(prompt, overrides).await
    }

    /// Route and execute one prompt under an overall deadline.
    ///
    /// When the deadline passes, whatever is in flight (agent checks or the
    /// invocation) is dropped and `RequestCancelled` is returned.
    pub async fn execute(
        &self,
        prompt: &str,
        options: ExecuteOptions,
    ) -> Result<ExecutionResult, RoutingError> {
        let timeout = options
            .timeout
            .unwrap_or(Duration::from_secs(self.config.request_timeout_secs));
        let overrides = RouteOverrides {
            model: options.model,
        };
        let params = options.params;
        let decided: Mutex<Option<DecisionContext>> = Mutex::new(None);

        let run = async {
            let decision = self.router.route(prompt, &overrides).await?;
            *decided.lock() = Some(decision.context());
            self.executor.execute(decision, prompt, &params).await
        };

        match tokio::time::timeout(timeout, run).await {
            Ok(result) => result,
            Err(_) => {
                // Reports from checks that never finished are discarded.
                let context = decided.lock().take();
                if context.is_some() {
                    self.executor.record_cancelled();
                }
                warn!(
                    timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    during_execution = context.is_some(),
                    "Request cancelled"
                );
                let context = context.unwrap_or_default();
                Err(RoutingError::RequestCancelled { timeout, context })
            }
        }
    }

    /// Shut down agents and release every model handle.
    pub async fn shutdown(&self) {
        self.router.shutdown_agents().await;
        self.registry.clear();
        info!("Oblix client shut down");
    }
}
