//! Engine runtime configuration with environment overrides.
//!
//! ## Precedence (highest to lowest)
//!
//! 1. Environment variable overrides (e.g. `CTXBENCH_MODEL_BASE_URL`)
//! 2. Values set on the structs by the embedding application
//! 3. Built-in defaults
//!
//! The embedding endpoint is optional: when `CTXBENCH_EMBEDDING_BASE_URL`
//! is unset, the retrieval index falls back to the deterministic local
//! embedder, which keeps the RAG protocol usable offline.

use std::env;

use serde::{Deserialize, Serialize};

/// Default OpenAI-compatible inference base URL.
const DEFAULT_MODEL_BASE_URL: &str = "http://localhost:8080/v1";
/// Default model name sent with every completion request.
const DEFAULT_MODEL: &str = "qwen2.5-7b-instruct";
/// Default hard deadline for one completion request, in seconds.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 300;
/// Default hard deadline for one embedding request, in seconds.
const DEFAULT_EMBEDDING_TIMEOUT_SECS: u64 = 60;
/// Default embedding model name.
const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
/// Vector width of the local fallback embedder.
const DEFAULT_EMBEDDING_DIMENSIONS: usize = 256;
/// Default cache entry lifetime, in seconds.
const DEFAULT_CACHE_TTL_SECS: u64 = 3600;
/// Default metrics history retention, in records.
const DEFAULT_METRICS_CAPACITY: usize = 10_000;

const ENV_MODEL_BASE_URL: &str = "CTXBENCH_MODEL_BASE_URL";
const ENV_MODEL_API_KEY: &str = "CTXBENCH_MODEL_API_KEY";
const ENV_MODEL: &str = "CTXBENCH_MODEL";
const ENV_REQUEST_TIMEOUT_SECS: &str = "CTXBENCH_REQUEST_TIMEOUT_SECS";
const ENV_EMBEDDING_BASE_URL: &str = "CTXBENCH_EMBEDDING_BASE_URL";
const ENV_EMBEDDING_API_KEY: &str = "CTXBENCH_EMBEDDING_API_KEY";
const ENV_EMBEDDING_MODEL: &str = "CTXBENCH_EMBEDDING_MODEL";
const ENV_CACHE_TTL_SECS: &str = "CTXBENCH_CACHE_TTL_SECS";
const ENV_METRICS_CAPACITY: &str = "CTXBENCH_METRICS_CAPACITY";

fn env_parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}

/// Configuration for the completion endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelEndpointConfig {
    /// Base URL of the OpenAI-compatible API (e.g. `http://localhost:8080/v1`).
    pub base_url: String,
    /// API key — most local servers accept any non-empty value.
    pub api_key: String,
    /// Model name sent with every request.
    pub model: String,
    /// Hard deadline for one request; exceeding it fails the call.
    pub request_timeout_secs: u64,
}

impl Default for ModelEndpointConfig {
    fn default() -> Self {
        Self {
            base_url: env::var(ENV_MODEL_BASE_URL)
                .unwrap_or_else(|_| DEFAULT_MODEL_BASE_URL.to_string()),
            api_key: env::var(ENV_MODEL_API_KEY).unwrap_or_else(|_| "local".to_string()),
            model: env::var(ENV_MODEL).unwrap_or_else(|_| DEFAULT_MODEL.to_string()),
            request_timeout_secs: env_parsed(ENV_REQUEST_TIMEOUT_SECS)
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }
}

/// Configuration for the embedding endpoint backing the retrieval index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Base URL of the embeddings API; `None` selects the local embedder.
    pub base_url: Option<String>,
    pub api_key: String,
    pub model: String,
    pub request_timeout_secs: u64,
    /// Vector width of the local fallback embedder.
    pub dimensions: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: env::var(ENV_EMBEDDING_BASE_URL).ok(),
            api_key: env::var(ENV_EMBEDDING_API_KEY).unwrap_or_else(|_| "local".to_string()),
            model: env::var(ENV_EMBEDDING_MODEL)
                .unwrap_or_else(|_| DEFAULT_EMBEDDING_MODEL.to_string()),
            request_timeout_secs: DEFAULT_EMBEDDING_TIMEOUT_SECS,
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub model: ModelEndpointConfig,
    pub embedding: EmbeddingConfig,
    /// Cache entry lifetime in seconds.
    pub cache_ttl_secs: u64,
    /// Metrics history retention in records (oldest evicted first).
    pub metrics_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model: ModelEndpointConfig::default(),
            embedding: EmbeddingConfig::default(),
            cache_ttl_secs: env_parsed(ENV_CACHE_TTL_SECS).unwrap_or(DEFAULT_CACHE_TTL_SECS),
            metrics_capacity: env_parsed(ENV_METRICS_CAPACITY)
                .unwrap_or(DEFAULT_METRICS_CAPACITY),
        }
    }
}

impl EngineConfig {
    /// Reject configurations that could never run.
    pub fn validate(&self) -> Result<(), String> {
        if self.model.base_url.is_empty() {
            return Err("model base_url must not be empty".into());
        }
        if self.model.model.is_empty() {
            return Err("model name must not be empty".into());
        }
        if self.model.request_timeout_secs == 0 {
            return Err("request_timeout_secs must be at least 1".into());
        }
        if self.cache_ttl_secs == 0 {
            return Err("cache_ttl_secs must be at least 1".into());
        }
        if self.metrics_capacity == 0 {
            return Err("metrics_capacity must be at least 1".into());
        }
        if self.embedding.dimensions == 0 {
            return Err("embedding dimensions must be at least 1".into());
        }
        Ok(())
    }
}
