pub mod agents;
pub mod client;
pub mod cost;
pub mod error;
pub mod model_registry;
pub mod providers;
pub mod routing;
pub mod types;

// Re-export core types at crate root for convenience.
pub use agents::{
    AgentError, AgentReport, AgentState, BudgetAgent, ConnectivityAgent, ResourceAgent,
    SignalAgent,
};
pub use client::{ExecuteOptions, OblixClient};
pub use cost::{BudgetSnapshot, BudgetState, CostBreakdown};
pub use error::{DecisionContext, FailedAttempt, RoutingError};
pub use model_registry::{ModelHandle, ModelPricing, ModelRegistry, RegistrySnapshot};
pub use providers::{BackendKind, ModelBackend, OllamaBackend, OpenAiCompatBackend, ProviderError};
pub use routing::{
    Complexity, ComplexityClassifier, ComplexityResult, ExecutionMetrics, ExecutionResult,
    Executor, RouteOverrides, Router, RoutingDecision,
};
pub use types::*;
