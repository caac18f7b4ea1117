use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::routing::ComplexityResult;

// ---------------------------------------------------------------------------
// Tiers
// ---------------------------------------------------------------------------

/// Where a model runs. Local models have no per-call fee; cloud models are
/// metered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    Local,
    Cloud,
}

impl ModelTier {
    /// Both tiers, cheapest first. Tie-breaks iterate in this order.
    pub const ALL: [ModelTier; 2] = [ModelTier::Local, ModelTier::Cloud];

    /// The other tier.
    pub fn other(self) -> Self {
        match self {
            Self::Local => Self::Cloud,
            Self::Cloud => Self::Local,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Cloud => "cloud",
        }
    }
}

impl fmt::Display for ModelTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "cloud" => Ok(Self::Cloud),
            other => Err(format!("unknown tier `{other}`")),
        }
    }
}

/// A signal agent's recommendation: a definite tier, or no preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    Local,
    Cloud,
    Hybrid,
}

impl Target {
    /// The tier this target votes for, `None` for hybrid.
    pub fn tier(self) -> Option<ModelTier> {
        match self {
            Self::Local => Some(ModelTier::Local),
            Self::Cloud => Some(ModelTier::Cloud),
            Self::Hybrid => None,
        }
    }
}

impl From<ModelTier> for Target {
    fn from(tier: ModelTier) -> Self {
        match tier {
            ModelTier::Local => Self::Local,
            ModelTier::Cloud => Self::Cloud,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::Cloud => f.write_str("cloud"),
            Self::Hybrid => f.write_str("hybrid"),
        }
    }
}

// ---------------------------------------------------------------------------
// Model identifiers
// ---------------------------------------------------------------------------

/// Registry key for a model: tier plus backend-specific model name.
///
/// Renders as `tier:name`, e.g. `local:llama3.2` or `cloud:gpt-4o-mini`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModelId {
    pub tier: ModelTier,
    pub name: String,
}

impl ModelId {
    pub fn new(tier: ModelTier, name: impl Into<String>) -> Self {
        Self {
            tier,
            name: name.into(),
        }
    }

    pub fn local(name: impl Into<String>) -> Self {
        Self::new(ModelTier::Local, name)
    }

    pub fn cloud(name: impl Into<String>) -> Self {
        Self::new(ModelTier::Cloud, name)
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.tier, self.name)
    }
}

impl FromStr for ModelId {
    type Err = String;

    /// Parses the `tier:name` form. Names may themselves contain `:`
    /// (Ollama tags such as `llama3.2:3b`); only the first separator counts.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (tier, name) = s
            .split_once(':')
            .ok_or_else(|| format!("expected `tier:name`, got `{s}`"))?;
        if name.is_empty() {
            return Err(format!("empty model name in `{s}`"));
        }
        Ok(Self::new(tier.parse()?, name))
    }
}

// ---------------------------------------------------------------------------
// Invocation
// ---------------------------------------------------------------------------

/// Per-call generation parameters passed through to a backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvokeParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

/// Token usage statistics, either reported by a backend or estimated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// What a backend returns from a single invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendOutput {
    pub text: String,
    /// `None` when the backend does not report token counts.
    pub usage: Option<TokenUsage>,
}

impl BackendOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            usage: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Request context
// ---------------------------------------------------------------------------

/// Read-only view of the request handed to every signal agent.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub prompt: String,
    pub complexity: ComplexityResult,
}
