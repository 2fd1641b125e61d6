//! Retrieval index contract, embedders, and the in-memory implementation.
//!
//! The index stores one embedded record per id and answers top-K similarity
//! queries over everything currently stored. Vectors are normalized at embed
//! time, so similarity is a plain dot product.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::RwLock;
use tracing::debug;

use crate::config::EmbeddingConfig;
use crate::error::{EngineError, EngineResult};

/// One fragment returned by a similarity query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedFragment {
    pub id: String,
    pub text: String,
    /// Cosine similarity against the query, in [-1, 1].
    pub score: f32,
}

/// The engine's contract with the retrieval backend.
///
/// The engine owns the lifecycle of entries it creates: every record stored
/// for a RAG run is deleted once the run finishes.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RetrievalIndex: Send + Sync {
    /// Store `text` as one embedded record under `id`, replacing any
    /// previous record with the same id.
    async fn store(&self, id: &str, text: &str) -> EngineResult<()>;

    /// Return the `top_k` most similar records to `query`, best first.
    async fn query(&self, query: &str, top_k: usize) -> EngineResult<Vec<RetrievedFragment>>;

    /// Remove the record stored under `id`. Removing an absent id is not an
    /// error.
    async fn delete(&self, id: &str) -> EngineResult<()>;

    /// Whether a record is currently stored under `id`.
    async fn contains(&self, id: &str) -> EngineResult<bool>;
}

/// Turns text into a normalized embedding vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> EngineResult<Vec<f32>>;
}

// ── Vector math ──────────────────────────────────────────────────────────────

/// Dot product over the shared prefix; inputs are expected normalized.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let len = a.len().min(b.len());
    a.iter().zip(b.iter()).take(len).map(|(x, y)| x * y).sum()
}

fn normalize_vector(vec: &mut [f32]) {
    let norm = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 {
        return;
    }
    for value in vec.iter_mut() {
        *value /= norm;
    }
}

// ── Deterministic local embedder ─────────────────────────────────────────────

/// Feature-hashing embedder: no model, no network, stable across runs.
///
/// Each whitespace-separated token is hashed into one of `dimensions`
/// buckets with a sign bit, then the vector is normalized. Good enough to
/// rank lexically overlapping texts, which is what offline development and
/// tests need.
pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> EngineResult<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dimensions];
        for token in text.split_whitespace() {
            let digest = blake3::hash(token.to_lowercase().as_bytes());
            let raw = u64::from_le_bytes(digest.as_bytes()[..8].try_into().expect("digest is 32 bytes"));
            let bucket = (raw % self.dimensions as u64) as usize;
            let sign = if raw & (1 << 63) == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        normalize_vector(&mut vector);
        Ok(vector)
    }
}

// ── HTTP embedder ────────────────────────────────────────────────────────────

const SERVICE_NAME: &str = "retrieval_index";

#[derive(Debug, Deserialize)]
struct EmbeddingReply {
    data: Vec<EmbeddingRow>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingRow {
    embedding: Vec<f32>,
}

/// `Embedder` backed by an OpenAI-compatible embeddings endpoint.
pub struct HttpEmbedder {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl HttpEmbedder {
    pub fn new(base_url: &str, config: &EmbeddingConfig) -> EngineResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| EngineError::external(SERVICE_NAME, e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> EngineResult<Vec<f32>> {
        let body = json!({"model": self.model, "input": [text]});

        let response = self
            .http
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| EngineError::external(SERVICE_NAME, e.to_string()))?
            .error_for_status()
            .map_err(|e| EngineError::external(SERVICE_NAME, e.to_string()))?;

        let reply: EmbeddingReply = response
            .json()
            .await
            .map_err(|e| EngineError::external(SERVICE_NAME, e.to_string()))?;

        let mut vector = reply
            .data
            .into_iter()
            .next()
            .map(|row| row.embedding)
            .ok_or_else(|| EngineError::external(SERVICE_NAME, "reply contained no embedding"))?;

        normalize_vector(&mut vector);
        Ok(vector)
    }
}

// ── In-memory index ──────────────────────────────────────────────────────────

struct StoredRecord {
    text: String,
    embedding: Vec<f32>,
}

/// Process-local `RetrievalIndex` over any `Embedder`.
pub struct InMemoryIndex {
    embedder: Box<dyn Embedder>,
    records: RwLock<HashMap<String, StoredRecord>>,
}

impl InMemoryIndex {
    pub fn new(embedder: Box<dyn Embedder>) -> Self {
        Self {
            embedder,
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Build the index from config: HTTP embedder when an endpoint is
    /// configured, deterministic local embedder otherwise.
    pub fn from_config(config: &EmbeddingConfig) -> EngineResult<Self> {
        let embedder: Box<dyn Embedder> = match &config.base_url {
            Some(base_url) => Box::new(HttpEmbedder::new(base_url, config)?),
            None => Box::new(HashEmbedder::new(config.dimensions)),
        };
        Ok(Self::new(embedder))
    }

    /// Number of records currently stored.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl RetrievalIndex for InMemoryIndex {
    async fn store(&self, id: &str, text: &str) -> EngineResult<()> {
        let embedding = self.embedder.embed(text).await?;
        self.records.write().await.insert(
            id.to_string(),
            StoredRecord {
                text: text.to_string(),
                embedding,
            },
        );
        debug!(id, "stored record in retrieval index");
        Ok(())
    }

    async fn query(&self, query: &str, top_k: usize) -> EngineResult<Vec<RetrievedFragment>> {
        let query_embedding = self.embedder.embed(query).await?;
        let records = self.records.read().await;

        let mut scored: Vec<RetrievedFragment> = records
            .iter()
            .map(|(id, record)| RetrievedFragment {
                id: id.clone(),
                text: record.text.clone(),
                score: cosine_similarity(&query_embedding, &record.embedding),
            })
            .collect();

        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn delete(&self, id: &str) -> EngineResult<()> {
        self.records.write().await.remove(id);
        debug!(id, "removed record from retrieval index");
        Ok(())
    }

    async fn contains(&self, id: &str) -> EngineResult<bool> {
        Ok(self.records.read().await.contains_key(id))
    }
}
