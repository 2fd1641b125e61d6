//! Strategy executors: one contract, four context-feeding strategies.
//!
//! Every executor resolves its typed config, consults the result cache
//! under a fingerprint of (prompt, document, protocol, resolved config),
//! runs its strategy on a miss, and writes the output back. Cache problems
//! never fail a run; they degrade to a miss and a warning.

mod chain;
mod rag;
mod raw;
mod tree;

pub use chain::ChainExecutor;
pub use rag::RagExecutor;
pub use raw::RawExecutor;
pub use tree::TreeExecutor;

use std::future::Future;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use crate::cache::{fingerprint, ResultCache};
use crate::error::{EngineError, EngineResult};
use crate::protocol::{Protocol, ProtocolInput, StrategyOutput};

/// Common contract implemented by all four strategies.
#[async_trait]
pub trait StrategyExecutor: Send + Sync {
    /// Which protocol this executor implements.
    fn protocol(&self) -> Protocol;

    /// Run the strategy for `input`.
    ///
    /// # Errors
    ///
    /// `Configuration` for malformed or out-of-range options;
    /// `ExternalService` when the Model Invoker or Retrieval Index fails.
    /// No retries happen at this layer.
    async fn execute(&self, input: &ProtocolInput) -> EngineResult<StrategyOutput>;
}

/// Fingerprint for `input` under a resolved, serializable config.
pub(crate) fn cache_key<C: Serialize>(
    input: &ProtocolInput,
    protocol: Protocol,
    config: &C,
) -> EngineResult<String> {
    let config_json = serde_json::to_string(config)
        .map_err(|e| EngineError::Internal(anyhow::anyhow!("config serialization: {e}")))?;
    Ok(fingerprint(
        &input.prompt,
        &input.document,
        protocol,
        &config_json,
    ))
}

/// Cache-aside wrapper shared by every executor.
///
/// A hit returns the stored output verbatim; a cache failure on either side
/// is logged and the run proceeds as a miss.
pub(crate) async fn run_cached<F, Fut>(
    cache: &ResultCache,
    protocol: Protocol,
    key: &str,
    run: F,
) -> EngineResult<StrategyOutput>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = EngineResult<StrategyOutput>>,
{
    match cache.get(key) {
        Ok(Some(hit)) => {
            debug!(%protocol, key, "returning cached strategy output");
            return Ok(hit);
        }
        Ok(None) => {}
        Err(e) => warn!(%protocol, key, error = %e, "cache read failed, proceeding as a miss"),
    }

    let output = run().await?;

    if let Err(e) = cache.set(key, output.clone()) {
        warn!(%protocol, key, error = %e, "cache write failed, result not memoized");
    }
    Ok(output)
}
