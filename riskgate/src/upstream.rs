// riskgate/src/upstream.rs
//
// Upstream LLM provider seam. The core treats providers as a single
// complete() contract: one attempt, 60-second hard timeout, HTTP >= 400
// surfaced as a provider-tagged upstream failure. Retries belong to the
// caller.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::GatewayError;

const UPSTREAM_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role:    String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionParams {
    pub model:       String,
    pub max_tokens:  Option<u32>,
    pub temperature: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens:     u32,
    pub completion_tokens: u32,
    pub total_tokens:      u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Completion {
    pub text:  String,
    pub usage: Usage,
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(
        &self,
        messages: &[ChatMessage],
        params: &CompletionParams,
    ) -> Result<Completion, GatewayError>;
}

// ── OpenAI-compatible HTTP adapter ────────────────────────────────────────────

pub struct HttpLlmProvider {
    name:     String,
    base_url: String,
    api_key:  String,
    client:   reqwest::Client,
}

impl HttpLlmProvider {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Serialize)]
struct WireRequest<'a> {
    model:    &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

#[derive(Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Deserialize)]
struct WireChoice {
    message: ChatMessage,
}

#[async_trait]
impl LlmProvider for HttpLlmProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        params: &CompletionParams,
    ) -> Result<Completion, GatewayError> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let body = WireRequest {
            model: &params.model,
            messages,
            max_tokens: params.max_tokens,
            temperature: params.temperature,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .timeout(Duration::from_secs(UPSTREAM_TIMEOUT_SECS))
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::Upstream {
                provider: self.name.clone(),
                message: if e.is_timeout() { "request timed out".into() } else { e.to_string() },
            })?;

        let status = response.status();
        if status.as_u16() >= 400 {
            let detail = response.text().await.unwrap_or_default();
            return Err(GatewayError::Upstream {
                provider: self.name.clone(),
                message: format!("status {status}: {detail}"),
            });
        }

        let wire: WireResponse = response.json().await.map_err(|e| GatewayError::Upstream {
            provider: self.name.clone(),
            message: format!("malformed response: {e}"),
        })?;

        let text = wire
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| GatewayError::Upstream {
                provider: self.name.clone(),
                message: "response carried no choices".into(),
            })?;

        Ok(Completion { text, usage: wire.usage })
    }
}

// ── Offline provider ──────────────────────────────────────────────────────────

/// Deterministic offline provider for the tail/replay daemon modes: echoes
/// the last user message. Token counts are whitespace-token approximations.
pub struct EchoProvider;

#[async_trait]
impl LlmProvider for EchoProvider {
    fn name(&self) -> &str {
        "echo"
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        _params: &CompletionParams,
    ) -> Result<Completion, GatewayError> {
        let prompt = messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.clone())
            .unwrap_or_default();
        let prompt_tokens = messages.iter().map(|m| m.content.split_whitespace().count()).sum::<usize>() as u32;
        let completion_tokens = prompt.split_whitespace().count() as u32;
        Ok(Completion {
            text: format!("echo: {prompt}"),
            usage: Usage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
            },
        })
    }
}
