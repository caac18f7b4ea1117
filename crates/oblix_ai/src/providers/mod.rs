//! Model backend trait and HTTP adapters.
//!
//! Every backend a [`ModelHandle`](crate::model_registry::ModelHandle) wraps
//! implements [`ModelBackend`].

pub mod ollama;
pub mod openai_compat;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::{BackendOutput, InvokeParams};

pub use ollama::OllamaBackend;
pub use openai_compat::OpenAiCompatBackend;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that any backend may return.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProviderError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limited")]
    RateLimit,

    #[error("Invalid API key")]
    InvalidKey,

    #[error("Timeout")]
    Timeout,

    #[error("Provider error: {0}")]
    Other(String),
}

impl ProviderError {
    /// Classify a `reqwest` transport failure.
    pub(crate) fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else {
            Self::Network(e.to_string())
        }
    }

    /// Timeouts and transport failures. The executor hops to its fallback
    /// only for these.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout | Self::Network(_))
    }
}

// ---------------------------------------------------------------------------
// Backend kinds
// ---------------------------------------------------------------------------

/// Closed set of backend families; `Custom` covers caller-supplied adapters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Ollama,
    OpenAiCompatible,
    Custom(String),
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ollama => f.write_str("ollama"),
            Self::OpenAiCompatible => f.write_str("openai_compatible"),
            Self::Custom(name) => write!(f, "custom:{name}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Unified invocation interface for local and cloud backends.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Which family this backend belongs to.
    fn kind(&self) -> BackendKind;

    /// Run one non-streaming completion for `model`.
    async fn invoke(
        &self,
        model: &str,
        prompt: &str,
        params: &InvokeParams,
    ) -> Result<BackendOutput, ProviderError>;
}
