//! Model Invoker contract and the OpenAI-compatible HTTP implementation.
//!
//! Every strategy blocks only on this trait (and the retrieval index); the
//! production implementation talks to a `/chat/completions` endpoint with a
//! hard client-side timeout, so a stuck backend surfaces as an
//! `ExternalService` error instead of hanging the run.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::config::ModelEndpointConfig;
use crate::error::{EngineError, EngineResult};

/// Per-call generation settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationConfig {
    /// Caps generated length.
    pub max_tokens: u32,
    /// Generation randomness.
    pub temperature: f32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_tokens: 500,
            temperature: 0.7,
        }
    }
}

/// One completed generation.
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    /// The generated text.
    pub text: String,
    /// Tokens consumed by the call (prompt + completion).
    pub tokens: u64,
}

/// The engine's contract with the language model backend.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ModelInvoker: Send + Sync {
    /// Generate text for `context` under `config`.
    ///
    /// # Errors
    ///
    /// `ExternalService` on any transport, status, deadline, or
    /// malformed-reply failure. No retries happen at this layer.
    async fn generate(
        &self,
        context: &str,
        config: &GenerationConfig,
    ) -> EngineResult<Generation>;
}

// ── HTTP implementation ──────────────────────────────────────────────────────

const SERVICE_NAME: &str = "model_invoker";

#[derive(Debug, Deserialize)]
struct ChatCompletionReply {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    total_tokens: u64,
}

/// `ModelInvoker` backed by an OpenAI-compatible chat completions endpoint.
pub struct HttpModelInvoker {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl HttpModelInvoker {
    pub fn new(config: &ModelEndpointConfig) -> EngineResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| EngineError::external(SERVICE_NAME, e.to_string()))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        })
    }

    /// Rough token estimate for backends that omit usage accounting.
    fn estimate_tokens(context: &str, completion: &str) -> u64 {
        ((context.chars().count() + completion.chars().count()) / 4).max(1) as u64
    }
}

#[async_trait]
impl ModelInvoker for HttpModelInvoker {
    async fn generate(
        &self,
        context: &str,
        config: &GenerationConfig,
    ) -> EngineResult<Generation> {
        let body = json!({
            "model": self.model,
            "messages": [{"role": "user", "content": context}],
            "max_tokens": config.max_tokens,
            "temperature": config.temperature,
        });

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| EngineError::external(SERVICE_NAME, e.to_string()))?
            .error_for_status()
            .map_err(|e| EngineError::external(SERVICE_NAME, e.to_string()))?;

        let reply: ChatCompletionReply = response
            .json()
            .await
            .map_err(|e| EngineError::external(SERVICE_NAME, e.to_string()))?;

        let choice = reply.choices.into_iter().next().ok_or_else(|| {
            EngineError::external(SERVICE_NAME, "reply contained no choices")
        })?;

        let tokens = reply
            .usage
            .map(|u| u.total_tokens)
            .unwrap_or_else(|| Self::estimate_tokens(context, &choice.message.content));

        debug!(model = %self.model, tokens, "generation completed");

        Ok(Generation {
            text: choice.message.content,
            tokens,
        })
    }
}
