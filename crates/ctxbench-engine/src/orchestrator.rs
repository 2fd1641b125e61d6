//! Batch orchestration: run each requested protocol, isolate failures,
//! attach quality and metrics, assemble the batch result.
//!
//! Each protocol run walks `PENDING -> RUNNING -> {SUCCESS, FAILED}`; both
//! terminal states record metrics, and a failed run degrades to an
//! error-marked result instead of aborting its siblings. The batch result
//! always has one entry per requested protocol, in request order.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{info, warn};
use uuid::Uuid;

use crate::cache::ResultCache;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::invoker::{HttpModelInvoker, ModelInvoker};
use crate::metrics::{MetricsCollector, RunMetrics};
use crate::protocol::{validate_options, Protocol, ProtocolInput};
use crate::retrieval::{InMemoryIndex, RetrievalIndex};
use crate::scorer::{ModelQualityScorer, QualityScorer};
use crate::strategy::{
    ChainExecutor, RagExecutor, RawExecutor, StrategyExecutor, TreeExecutor,
};

/// Upper bound on prompt length, in characters.
pub const MAX_PROMPT_CHARS: usize = 10_000;
/// Upper bound on document length, in characters.
pub const MAX_DOCUMENT_CHARS: usize = 100_000;

/// Lifecycle of one protocol run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Pending,
    Running,
    Success,
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// One batch request: a prompt, a document, and the protocols to compare.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRequest {
    pub prompt: String,
    pub document: String,
    /// Optional reference to where the document came from.
    pub source: Option<String>,
    /// Protocols to run, in order.
    pub protocols: Vec<Protocol>,
    /// Per-protocol option maps; protocols without an entry use defaults.
    pub config: HashMap<Protocol, Map<String, Value>>,
}

impl BatchRequest {
    pub fn new(prompt: impl Into<String>, document: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            document: document.into(),
            source: None,
            protocols: Vec::new(),
            config: HashMap::new(),
        }
    }

    pub fn with_protocols(mut self, protocols: impl IntoIterator<Item = Protocol>) -> Self {
        self.protocols = protocols.into_iter().collect();
        self
    }

    pub fn with_config(mut self, protocol: Protocol, options: Map<String, Value>) -> Self {
        self.config.insert(protocol, options);
        self
    }

    /// Collect every violated surface constraint.
    pub fn violations(&self) -> Vec<String> {
        let mut violations = Vec::new();
        let prompt_chars = self.prompt.chars().count();
        if prompt_chars == 0 {
            violations.push("prompt must not be empty".to_string());
        } else if prompt_chars > MAX_PROMPT_CHARS {
            violations.push(format!(
                "prompt length {prompt_chars} exceeds {MAX_PROMPT_CHARS} characters"
            ));
        }

        let document_chars = self.document.chars().count();
        if document_chars == 0 {
            violations.push("document must not be empty".to_string());
        } else if document_chars > MAX_DOCUMENT_CHARS {
            violations.push(format!(
                "document length {document_chars} exceeds {MAX_DOCUMENT_CHARS} characters"
            ));
        }

        if self.protocols.is_empty() {
            violations.push("protocols must name at least one protocol".to_string());
        }
        violations
    }

    fn options_for(&self, protocol: Protocol) -> Map<String, Value> {
        self.config.get(&protocol).cloned().unwrap_or_default()
    }
}

/// Result of one protocol run within a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolResult {
    pub protocol: Protocol,
    pub response: String,
    pub metrics: RunMetrics,
    pub metadata: Map<String, Value>,
}

/// Result of a whole batch, one entry per requested protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResult {
    pub session_id: String,
    pub results: Vec<ProtocolResult>,
    pub total_latency_ms: u64,
}

/// Drives strategy executors over batch requests.
///
/// All services are explicit instances handed in at construction; the
/// orchestrator owns no global state.
pub struct Orchestrator {
    raw: RawExecutor,
    chain: ChainExecutor,
    tree: TreeExecutor,
    rag: RagExecutor,
    scorer: Arc<dyn QualityScorer>,
    metrics: Arc<MetricsCollector>,
}

impl Orchestrator {
    pub fn new(
        invoker: Arc<dyn ModelInvoker>,
        index: Arc<dyn RetrievalIndex>,
        scorer: Arc<dyn QualityScorer>,
        cache: Arc<ResultCache>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            raw: RawExecutor::new(invoker.clone(), cache.clone()),
            chain: ChainExecutor::new(invoker.clone(), cache.clone()),
            tree: TreeExecutor::new(invoker.clone(), cache.clone()),
            rag: RagExecutor::new(invoker, index, cache),
            scorer,
            metrics,
        }
    }

    /// Build the orchestrator and every service it depends on from config.
    pub fn from_config(config: &EngineConfig) -> EngineResult<Self> {
        config
            .validate()
            .map_err(EngineError::Configuration)?;

        let invoker: Arc<dyn ModelInvoker> = Arc::new(HttpModelInvoker::new(&config.model)?);
        let index: Arc<dyn RetrievalIndex> =
            Arc::new(InMemoryIndex::from_config(&config.embedding)?);
        let scorer: Arc<dyn QualityScorer> =
            Arc::new(ModelQualityScorer::new(invoker.clone()));
        let cache = Arc::new(ResultCache::new(std::time::Duration::from_secs(
            config.cache_ttl_secs,
        )));
        let metrics = Arc::new(MetricsCollector::with_capacity(config.metrics_capacity));

        Ok(Self::new(invoker, index, scorer, cache, metrics))
    }

    /// The metrics collector backing this orchestrator's runs.
    pub fn metrics(&self) -> Arc<MetricsCollector> {
        self.metrics.clone()
    }

    fn executor_for(&self, protocol: Protocol) -> &dyn StrategyExecutor {
        match protocol {
            Protocol::Raw => &self.raw,
            Protocol::Chain => &self.chain,
            Protocol::Tree => &self.tree,
            Protocol::Rag => &self.rag,
        }
    }

    /// Run every requested protocol and assemble the batch result.
    ///
    /// # Errors
    ///
    /// `Validation` for surface-constraint violations and `Configuration`
    /// for invalid per-protocol options — both rejected before anything
    /// executes. Executor failures never error the batch; they degrade the
    /// affected protocol's entry.
    pub async fn run_batch(&self, request: &BatchRequest) -> EngineResult<BatchResult> {
        let violations = request.violations();
        if !violations.is_empty() {
            return Err(EngineError::Validation(violations));
        }
        for protocol in &request.protocols {
            validate_options(*protocol, &request.options_for(*protocol))?;
        }

        let session_id = Uuid::new_v4().to_string();
        let batch_started = Instant::now();
        info!(
            session_id = %session_id,
            protocols = ?request.protocols,
            "batch started"
        );

        let mut results = Vec::with_capacity(request.protocols.len());
        for &protocol in &request.protocols {
            results.push(self.run_protocol(&session_id, protocol, request).await);
        }

        let total_latency_ms = batch_started.elapsed().as_millis() as u64;
        info!(session_id = %session_id, total_latency_ms, "batch completed");

        Ok(BatchResult {
            session_id,
            results,
            total_latency_ms,
        })
    }

    async fn run_protocol(
        &self,
        session_id: &str,
        protocol: Protocol,
        request: &BatchRequest,
    ) -> ProtocolResult {
        let mut input =
            ProtocolInput::new(request.prompt.clone(), request.document.clone())
                .with_options(request.options_for(protocol));
        if let Some(source) = &request.source {
            input = input.with_source(source.clone());
        }

        info!(session_id, protocol = %protocol, state = %RunState::Running, "protocol run started");
        let run_started = Instant::now();

        let result = match self.executor_for(protocol).execute(&input).await {
            Ok(output) => {
                let quality = self.scorer.score(&output.response, &request.prompt).await;
                let latency_ms = run_started.elapsed().as_millis() as u64;
                info!(
                    session_id,
                    protocol = %protocol,
                    state = %RunState::Success,
                    latency_ms,
                    tokens = output.tokens,
                    "protocol run completed"
                );

                let mut metadata = output.metadata;
                metadata.insert("state".into(), json!(RunState::Success));
                ProtocolResult {
                    protocol,
                    response: output.response,
                    metrics: RunMetrics {
                        tokens: output.tokens,
                        latency_ms,
                        quality,
                    },
                    metadata,
                }
            }
            Err(e) => {
                let latency_ms = run_started.elapsed().as_millis() as u64;
                warn!(
                    session_id,
                    protocol = %protocol,
                    state = %RunState::Failed,
                    latency_ms,
                    error = %e,
                    "protocol run failed"
                );

                let mut metadata = Map::new();
                metadata.insert("state".into(), json!(RunState::Failed));
                metadata.insert("error_class".into(), json!(e.failure_class().to_string()));
                ProtocolResult {
                    protocol,
                    response: format!("error: {e}"),
                    metrics: RunMetrics {
                        tokens: 0,
                        latency_ms,
                        quality: 0.0,
                    },
                    metadata,
                }
            }
        };

        self.metrics.record(protocol, result.metrics.clone());
        result
    }
}
