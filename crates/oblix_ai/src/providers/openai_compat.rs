//! OpenAI-compatible backend (`/v1/chat/completions`).
//!
//! Works against the hosted API as well as self-hosted servers that speak
//! the same protocol (vLLM, LM Studio, llama.cpp server).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{BackendKind, ModelBackend, ProviderError};
use crate::types::{BackendOutput, InvokeParams, TokenUsage};

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct CompletionRequest {
    model: String,
    messages: Vec<CompletionMessageOut>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct CompletionMessageOut {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
    usage: Option<CompletionUsage>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessageIn,
}

#[derive(Debug, Deserialize)]
struct CompletionMessageIn {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionUsage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
}

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

pub struct OpenAiCompatBackend {
    api_key: Option<String>,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAiCompatBackend {
    /// `base_url` is the server root, e.g. `https://api.openai.com`; the
    /// `/v1/chat/completions` path is appended. Pass `None` for servers that
    /// do not require a key.
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            api_key: api_key.filter(|k| !k.is_empty()),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn has_key(&self) -> bool {
        self.api_key.is_some()
    }

    fn endpoint(&self) -> String {
        if self.base_url.ends_with("/v1") {
            format!("{}/chat/completions", self.base_url)
        } else {
            format!("{}/v1/chat/completions", self.base_url)
        }
    }

    fn build_body(&self, model: &str, prompt: &str, params: &InvokeParams) -> CompletionRequest {
        let mut messages = Vec::with_capacity(2);
        if let Some(ref sys) = params.system_prompt {
            messages.push(CompletionMessageOut {
                role: "system",
                content: sys.clone(),
            });
        }
        messages.push(CompletionMessageOut {
            role: "user",
            content: prompt.to_string(),
        });

        CompletionRequest {
            model: model.to_string(),
            messages,
            stream: false,
            max_tokens: params.max_tokens,
            temperature: params.temperature,
        }
    }
}

fn parse_response(data: CompletionResponse) -> BackendOutput {
    let text = data
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .unwrap_or_default();
    let usage = data.usage.and_then(|u| match (u.prompt_tokens, u.completion_tokens) {
        (Some(p), Some(c)) => Some(TokenUsage::new(p, c)),
        _ => None,
    });
    BackendOutput { text, usage }
}

#[async_trait]
impl ModelBackend for OpenAiCompatBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::OpenAiCompatible
    }

    async fn invoke(
        &self,
        model: &str,
        prompt: &str,
        params: &InvokeParams,
    ) -> Result<BackendOutput, ProviderError> {
        let body = self.build_body(model, prompt, params);
        let mut req = self.client.post(self.endpoint()).json(&body);
        if let Some(ref key) = self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req.send().await.map_err(ProviderError::from_reqwest)?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(ProviderError::InvalidKey);
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderError::RateLimit);
        }
        if status == reqwest::StatusCode::REQUEST_TIMEOUT
            || status == reqwest::StatusCode::GATEWAY_TIMEOUT
        {
            return Err(ProviderError::Timeout);
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Other(format!("API error {status}: {text}")));
        }

        let data: CompletionResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Other(format!("JSON parse error: {e}")))?;
        Ok(parse_response(data))
    }
}
