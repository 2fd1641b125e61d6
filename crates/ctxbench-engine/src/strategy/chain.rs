//! Chain strategy: overlapping sequential chunks processed in document
//! order, then one aggregation call over the concatenated outputs.
//!
//! Chunk calls are independent of one another (no prior-chunk output is
//! fed forward) but are issued one at a time in order, which bounds memory
//! and keeps chunk-index labels deterministic in logs. A chunk failure
//! aborts the run; there is no partial aggregation.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map};
use tracing::debug;

use crate::cache::ResultCache;
use crate::chunker::split_sequential;
use crate::error::EngineResult;
use crate::invoker::{GenerationConfig, ModelInvoker};
use crate::protocol::{ChainConfig, Protocol, ProtocolInput, StrategyOutput};

use super::{cache_key, run_cached, StrategyExecutor};

pub struct ChainExecutor {
    invoker: Arc<dyn ModelInvoker>,
    cache: Arc<ResultCache>,
}

impl ChainExecutor {
    pub fn new(invoker: Arc<dyn ModelInvoker>, cache: Arc<ResultCache>) -> Self {
        Self { invoker, cache }
    }

    async fn run_chain(
        &self,
        input: &ProtocolInput,
        config: &ChainConfig,
    ) -> EngineResult<StrategyOutput> {
        let chunks = split_sequential(&input.document, config.chunk_size, config.overlap)?;
        let total = chunks.len();
        let generation_config = GenerationConfig {
            max_tokens: config.max_tokens,
            ..GenerationConfig::default()
        };

        let mut tokens = 0u64;
        let mut partials = Vec::with_capacity(total);
        for (index, chunk) in chunks.iter().enumerate() {
            let context = format!(
                "You are processing part {part} of {total} of a larger document. \
                Work only from this part.\n\nPart {part}/{total}:\n{chunk}\n\n\
                Prompt: {prompt}",
                part = index + 1,
                prompt = input.prompt,
            );
            let generation = self.invoker.generate(&context, &generation_config).await?;
            debug!(part = index + 1, total, tokens = generation.tokens, "chain chunk processed");
            tokens += generation.tokens;
            partials.push(generation.text);
        }

        let aggregation_context = format!(
            "Combine the partial results below into a single final answer \
            to the prompt.\n\nPartial results:\n{partials}\n\nPrompt: {prompt}",
            partials = partials.join("\n\n"),
            prompt = input.prompt,
        );
        let aggregation = self
            .invoker
            .generate(&aggregation_context, &generation_config)
            .await?;
        tokens += aggregation.tokens;

        let mut metadata = Map::new();
        metadata.insert("chunks".into(), json!(total));
        metadata.insert("model_calls".into(), json!(total + 1));
        metadata.insert("chunk_size".into(), json!(config.chunk_size));
        metadata.insert("overlap".into(), json!(config.overlap));

        Ok(StrategyOutput {
            response: aggregation.text,
            tokens,
            metadata,
        })
    }
}

#[async_trait]
impl StrategyExecutor for ChainExecutor {
    fn protocol(&self) -> Protocol {
        Protocol::Chain
    }

    async fn execute(&self, input: &ProtocolInput) -> EngineResult<StrategyOutput> {
        let config = ChainConfig::from_options(&input.options)?;
        let key = cache_key(input, Protocol::Chain, &config)?;

        run_cached(&self.cache, Protocol::Chain, &key, || {
            self.run_chain(input, &config)
        })
        .await
    }
}
