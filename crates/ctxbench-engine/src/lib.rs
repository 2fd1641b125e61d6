//! ctxbench engine — compare context-feeding protocols against an LLM.
//!
//! A caller submits a prompt plus a document and a set of "protocols"
//! (strategies for feeding the document to a language model); the engine
//! runs each strategy, scores the responses, and returns per-protocol
//! results with token, latency, and quality metrics.
//!
//! # Components
//!
//! - [`strategy`] — the four executors (raw, chain, tree, rag) behind one
//!   contract
//! - [`chunker`] — sequential-window and branch splitting shared by chain
//!   and tree
//! - [`invoker`] / [`retrieval`] — contracts for the two external
//!   collaborators, with OpenAI-compatible HTTP implementations
//! - [`cache`] — fingerprint-keyed memoization of strategy outputs
//! - [`scorer`] — secondary-call quality rating with clamping and defaults
//! - [`metrics`] — per-run records with aggregate and per-protocol
//!   summaries
//! - [`orchestrator`] — batch driver isolating per-protocol failures
//!
//! # Usage
//!
//! ```no_run
//! use ctxbench_engine::config::EngineConfig;
//! use ctxbench_engine::orchestrator::{BatchRequest, Orchestrator};
//! use ctxbench_engine::protocol::Protocol;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let orchestrator = Orchestrator::from_config(&EngineConfig::default())?;
//! let request = BatchRequest::new("Summarize", "... document text ...")
//!     .with_protocols([Protocol::Raw, Protocol::Chain]);
//! let batch = orchestrator.run_batch(&request).await?;
//! for result in &batch.results {
//!     println!("{}: {} tokens", result.protocol, result.metrics.tokens);
//! }
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod chunker;
pub mod config;
pub mod error;
pub mod invoker;
pub mod metrics;
pub mod orchestrator;
pub mod protocol;
pub mod retrieval;
pub mod scorer;
pub mod strategy;

pub use error::{EngineError, EngineResult, FailureClass};
pub use metrics::{MetricsCollector, MetricsSummary, RunMetrics};
pub use orchestrator::{BatchRequest, BatchResult, Orchestrator, ProtocolResult};
pub use protocol::{protocol_catalog, Protocol, ProtocolInput};
