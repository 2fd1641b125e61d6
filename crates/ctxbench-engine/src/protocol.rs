//! Protocol identifiers, run input, and per-protocol configuration.
//!
//! Each protocol's configuration arrives as an open map of named options;
//! `from_options` applies the documented defaults, ignores unrecognized
//! keys, and rejects malformed or out-of-range values with a
//! `Configuration` error before anything executes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::{EngineError, EngineResult};

/// The closed set of context-feeding strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Full document in a single call.
    Raw,
    /// Overlapping sequential chunks, then one aggregation call.
    Chain,
    /// Disjoint parallel branches, then one aggregation call.
    Tree,
    /// Retrieval-augmented: embed, query, generate over top matches.
    Rag,
}

impl Protocol {
    /// Every protocol, in catalog order.
    pub const ALL: [Protocol; 4] = [
        Protocol::Raw,
        Protocol::Chain,
        Protocol::Tree,
        Protocol::Rag,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Chain => "chain",
            Self::Tree => "tree",
            Self::Rag => "rag",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "raw" => Ok(Self::Raw),
            "chain" => Ok(Self::Chain),
            "tree" => Ok(Self::Tree),
            "rag" => Ok(Self::Rag),
            other => Err(EngineError::Validation(vec![format!(
                "unknown protocol '{other}' (expected one of raw, chain, tree, rag)"
            )])),
        }
    }
}

/// Input to a single strategy run. Immutable once constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolInput {
    /// The caller's prompt.
    pub prompt: String,
    /// The document whose content is fed to the model.
    pub document: String,
    /// Optional reference to where the document came from.
    pub source: Option<String>,
    /// Open map of named options; resolved per protocol with defaults.
    pub options: Map<String, Value>,
}

impl ProtocolInput {
    pub fn new(prompt: impl Into<String>, document: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            document: document.into(),
            source: None,
            options: Map::new(),
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_options(mut self, options: Map<String, Value>) -> Self {
        self.options = options;
        self
    }
}

/// Raw output of one strategy run, prior to quality scoring and metrics.
///
/// This is the value memoized by the result cache, so a cache hit returns
/// it byte-identical to the original run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyOutput {
    pub response: String,
    pub tokens: u64,
    pub metadata: Map<String, Value>,
}

// ── Per-protocol configuration ───────────────────────────────────────────────

fn resolve<T: Default + for<'de> Deserialize<'de>>(
    protocol: Protocol,
    options: &Map<String, Value>,
) -> EngineResult<T> {
    if options.is_empty() {
        return Ok(T::default());
    }
    serde_json::from_value(Value::Object(options.clone())).map_err(|e| {
        EngineError::Configuration(format!("invalid {protocol} configuration: {e}"))
    })
}

/// Configuration for the Raw executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawConfig {
    /// Caps generated length.
    pub max_tokens: u32,
    /// Generation randomness.
    pub temperature: f32,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            max_tokens: 500,
            temperature: 0.7,
        }
    }
}

impl RawConfig {
    pub fn from_options(options: &Map<String, Value>) -> EngineResult<Self> {
        let config: Self = resolve(Protocol::Raw, options)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.max_tokens == 0 {
            return Err(EngineError::Configuration(
                "max_tokens must be at least 1".into(),
            ));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(EngineError::Configuration(format!(
                "temperature {} out of range [0, 2]",
                self.temperature
            )));
        }
        Ok(())
    }
}

/// Configuration for the Chain executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// Sequential window size in characters.
    pub chunk_size: usize,
    /// Overlap between consecutive windows in characters.
    pub overlap: usize,
    /// Caps generated length of each sub-call.
    pub max_tokens: u32,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            overlap: 100,
            max_tokens: 500,
        }
    }
}

impl ChainConfig {
    pub fn from_options(options: &Map<String, Value>) -> EngineResult<Self> {
        let config: Self = resolve(Protocol::Chain, options)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.chunk_size == 0 {
            return Err(EngineError::Configuration(
                "chunk_size must be at least 1".into(),
            ));
        }
        if self.chunk_size <= self.overlap {
            return Err(EngineError::Configuration(format!(
                "chunk_size ({}) must exceed overlap ({})",
                self.chunk_size, self.overlap
            )));
        }
        if self.max_tokens == 0 {
            return Err(EngineError::Configuration(
                "max_tokens must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// How the Tree executor's aggregation call is labeled.
///
/// The method name is forwarded verbatim to the aggregation prompt; no
/// client-side vote counting or weighting happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationMethod {
    Synthesis,
    Voting,
    Weighted,
}

impl fmt::Display for AggregationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Synthesis => write!(f, "synthesis"),
            Self::Voting => write!(f, "voting"),
            Self::Weighted => write!(f, "weighted"),
        }
    }
}

/// Configuration for the Tree executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeConfig {
    /// Number of parallel segments.
    pub branch_factor: usize,
    /// Accepted for compatibility; a single fan-out level is performed.
    pub max_depth: u32,
    /// Label passed through to the aggregation call.
    pub aggregation_method: AggregationMethod,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            branch_factor: 3,
            max_depth: 1,
            aggregation_method: AggregationMethod::Synthesis,
        }
    }
}

impl TreeConfig {
    pub fn from_options(options: &Map<String, Value>) -> EngineResult<Self> {
        let config: Self = resolve(Protocol::Tree, options)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.branch_factor == 0 {
            return Err(EngineError::Configuration(
                "branch_factor must be at least 1".into(),
            ));
        }
        if self.max_depth == 0 {
            return Err(EngineError::Configuration(
                "max_depth must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Configuration for the RAG executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    /// Number of fragments retrieved from the index.
    pub top_k: usize,
    /// Minimum similarity a fragment must score to be kept.
    pub similarity_threshold: f32,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            similarity_threshold: 0.7,
        }
    }
}

impl RagConfig {
    pub fn from_options(options: &Map<String, Value>) -> EngineResult<Self> {
        let config: Self = resolve(Protocol::Rag, options)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.top_k == 0 {
            return Err(EngineError::Configuration(
                "top_k must be at least 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(EngineError::Configuration(format!(
                "similarity_threshold {} out of range [0, 1]",
                self.similarity_threshold
            )));
        }
        Ok(())
    }
}

/// Resolve and validate `options` for `protocol`, discarding the result.
///
/// Lets the orchestrator reject a bad configuration before any protocol in
/// the batch executes.
pub fn validate_options(protocol: Protocol, options: &Map<String, Value>) -> EngineResult<()> {
    match protocol {
        Protocol::Raw => RawConfig::from_options(options).map(|_| ()),
        Protocol::Chain => ChainConfig::from_options(options).map(|_| ()),
        Protocol::Tree => TreeConfig::from_options(options).map(|_| ()),
        Protocol::Rag => RagConfig::from_options(options).map(|_| ()),
    }
}

// ── Catalog ──────────────────────────────────────────────────────────────────

/// One recognized configuration key of a protocol.
#[derive(Debug, Clone, Serialize)]
pub struct OptionInfo {
    pub key: &'static str,
    pub default: Value,
    pub description: &'static str,
}

/// Static description of one protocol for the catalog endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ProtocolInfo {
    pub name: &'static str,
    pub description: &'static str,
    pub options: Vec<OptionInfo>,
}

/// The static catalog of available protocols with their recognized options.
pub fn protocol_catalog() -> Vec<ProtocolInfo> {
    vec![
        ProtocolInfo {
            name: "raw",
            description: "Feed the full document and prompt to the model in a single call",
            options: vec![
                OptionInfo {
                    key: "max_tokens",
                    default: json!(500),
                    description: "caps generated length",
                },
                OptionInfo {
                    key: "temperature",
                    default: json!(0.7),
                    description: "generation randomness",
                },
            ],
        },
        ProtocolInfo {
            name: "chain",
            description: "Process overlapping sequential chunks in order, then aggregate",
            options: vec![
                OptionInfo {
                    key: "chunk_size",
                    default: json!(1000),
                    description: "sequential window size in characters",
                },
                OptionInfo {
                    key: "overlap",
                    default: json!(100),
                    description: "window overlap in characters",
                },
                OptionInfo {
                    key: "max_tokens",
                    default: json!(500),
                    description: "caps generated length per sub-call",
                },
            ],
        },
        ProtocolInfo {
            name: "tree",
            description: "Process disjoint branches concurrently, then aggregate",
            options: vec![
                OptionInfo {
                    key: "branch_factor",
                    default: json!(3),
                    description: "number of parallel segments",
                },
                OptionInfo {
                    key: "max_depth",
                    default: json!(1),
                    description: "fan-out depth (a single level is performed)",
                },
                OptionInfo {
                    key: "aggregation_method",
                    default: json!("synthesis"),
                    description: "label passed to the aggregation call (synthesis|voting|weighted)",
                },
            ],
        },
        ProtocolInfo {
            name: "rag",
            description: "Retrieve the most similar indexed fragments and generate over them",
            options: vec![
                OptionInfo {
                    key: "top_k",
                    default: json!(5),
                    description: "retrieved fragment count",
                },
                OptionInfo {
                    key: "similarity_threshold",
                    default: json!(0.7),
                    description: "minimum retained similarity",
                },
                OptionInfo {
                    key: "embedding_model",
                    default: Value::Null,
                    description: "embedding model of the backing index (service-level setting)",
                },
            ],
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn protocol_round_trips_through_str() {
        for protocol in Protocol::ALL {
            assert_eq!(protocol.as_str().parse::<Protocol>().unwrap(), protocol);
        }
    }

    #[test]
    fn unknown_protocol_is_a_validation_error() {
        let err = "mapreduce".parse::<Protocol>().unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("mapreduce"));
    }

    #[test]
    fn protocol_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Protocol::Rag).unwrap(), "\"rag\"");
        let parsed: Protocol = serde_json::from_str("\"chain\"").unwrap();
        assert_eq!(parsed, Protocol::Chain);
    }

    #[test]
    fn empty_options_yield_defaults() {
        let config = ChainConfig::from_options(&Map::new()).unwrap();
        assert_eq!(config, ChainConfig::default());
        assert_eq!(config.chunk_size, 1000);
        assert_eq!(config.overlap, 100);
    }

    #[test]
    fn options_override_single_field() {
        let config =
            ChainConfig::from_options(&options(&[("chunk_size", json!(200))])).unwrap();
        assert_eq!(config.chunk_size, 200);
        assert_eq!(config.overlap, 100);
    }

    #[test]
    fn unrecognized_keys_are_ignored() {
        let config =
            RawConfig::from_options(&options(&[("made_up_knob", json!(true))])).unwrap();
        assert_eq!(config, RawConfig::default());
    }

    #[test]
    fn chunk_size_not_exceeding_overlap_is_rejected() {
        let err = ChainConfig::from_options(&options(&[
            ("chunk_size", json!(100)),
            ("overlap", json!(100)),
        ]))
        .unwrap_err();
        assert!(matches!(err, EngineError::Configuration(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn zero_branch_factor_is_rejected() {
        let err =
            TreeConfig::from_options(&options(&[("branch_factor", json!(0))])).unwrap_err();
        assert!(matches!(err, EngineError::Configuration(_)));
    }

    #[test]
    fn wrong_typed_option_is_a_configuration_error() {
        let err =
            ChainConfig::from_options(&options(&[("chunk_size", json!("big"))])).unwrap_err();
        assert!(matches!(err, EngineError::Configuration(_)));
    }

    #[test]
    fn aggregation_method_parses_lowercase() {
        let config = TreeConfig::from_options(&options(&[(
            "aggregation_method",
            json!("weighted"),
        )]))
        .unwrap();
        assert_eq!(config.aggregation_method, AggregationMethod::Weighted);
        assert_eq!(config.aggregation_method.to_string(), "weighted");
    }

    #[test]
    fn similarity_threshold_out_of_range_is_rejected() {
        let err = RagConfig::from_options(&options(&[("similarity_threshold", json!(1.5))]))
            .unwrap_err();
        assert!(matches!(err, EngineError::Configuration(_)));
    }

    #[test]
    fn catalog_covers_every_protocol() {
        let catalog = protocol_catalog();
        assert_eq!(catalog.len(), Protocol::ALL.len());
        for (info, protocol) in catalog.iter().zip(Protocol::ALL) {
            assert_eq!(info.name, protocol.as_str());
            assert!(!info.options.is_empty());
        }
    }

    #[test]
    fn input_builder_sets_fields() {
        let input = ProtocolInput::new("summarize", "a document")
            .with_source("upload:demo.txt")
            .with_options(options(&[("top_k", json!(3))]));
        assert_eq!(input.prompt, "summarize");
        assert_eq!(input.source.as_deref(), Some("upload:demo.txt"));
        assert_eq!(input.options["top_k"], json!(3));
    }
}
