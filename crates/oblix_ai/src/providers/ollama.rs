//! Ollama backend -- local inference via the Ollama `/api/chat` endpoint.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{BackendKind, ModelBackend, ProviderError};
use crate::types::{BackendOutput, InvokeParams, TokenUsage};

pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

// ---------------------------------------------------------------------------
// Wire types (private)
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<OllamaOptions>,
}

#[derive(Debug, Serialize)]
struct OllamaMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: Option<OllamaResponseMessage>,
    eval_count: Option<u32>,
    prompt_eval_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct OllamaResponseMessage {
    content: String,
}

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

/// Ollama local model backend. One instance serves every model pulled into
/// the Ollama server.
pub struct OllamaBackend {
    base_url: String,
    client: reqwest::Client,
}

impl OllamaBackend {
    /// Defaults to `http://localhost:11434` when `None` is passed.
    pub fn new(base_url: Option<String>) -> Self {
        Self {
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_OLLAMA_URL.into())
                .trim_end_matches('/')
                .to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn build_body(&self, model: &str, prompt: &str, params: &InvokeParams) -> OllamaChatRequest {
        let mut messages = Vec::with_capacity(2);
        if let Some(ref sys) = params.system_prompt {
            messages.push(OllamaMessage {
                role: "system",
                content: sys.clone(),
            });
        }
        messages.push(OllamaMessage {
            role: "user",
            content: prompt.to_string(),
        });

        let options = (params.max_tokens.is_some() || params.temperature.is_some()).then(|| {
            OllamaOptions {
                num_predict: params.max_tokens,
                temperature: params.temperature,
            }
        });

        OllamaChatRequest {
            model: model.to_string(),
            messages,
            stream: false,
            options,
        }
    }
}

#[async_trait]
impl ModelBackend for OllamaBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Ollama
    }

    async fn invoke(
        &self,
        model: &str,
        prompt: &str,
        params: &InvokeParams,
    ) -> Result<BackendOutput, ProviderError> {
        let url = format!("{}/api/chat", self.base_url);
        let body = self.build_body(model, prompt, params);

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(ProviderError::from_reqwest)?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Other(format!(
                "Ollama API error: {status} - {text}"
            )));
        }

        let data: OllamaChatResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Other(format!("JSON parse error: {e}")))?;

        // Ollama omits eval counts for cached prompts; treat that as unreported.
        let usage = match (data.prompt_eval_count, data.eval_count) {
            (Some(p), Some(c)) => Some(TokenUsage::new(p, c)),
            _ => None,
        };
        debug!(model, ?usage, "Ollama completion received");

        Ok(BackendOutput {
            text: data.message.map(|m| m.content).unwrap_or_default(),
            usage,
        })
    }
}
