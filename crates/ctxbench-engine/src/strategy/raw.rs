//! Raw strategy: full document and prompt in a single generation call.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::cache::ResultCache;
use crate::error::EngineResult;
use crate::invoker::{GenerationConfig, ModelInvoker};
use crate::protocol::{Protocol, ProtocolInput, RawConfig, StrategyOutput};

use super::{cache_key, run_cached, StrategyExecutor};

pub struct RawExecutor {
    invoker: Arc<dyn ModelInvoker>,
    cache: Arc<ResultCache>,
}

impl RawExecutor {
    pub fn new(invoker: Arc<dyn ModelInvoker>, cache: Arc<ResultCache>) -> Self {
        Self { invoker, cache }
    }
}

#[async_trait]
impl StrategyExecutor for RawExecutor {
    fn protocol(&self) -> Protocol {
        Protocol::Raw
    }

    async fn execute(&self, input: &ProtocolInput) -> EngineResult<StrategyOutput> {
        let config = RawConfig::from_options(&input.options)?;
        let key = cache_key(input, Protocol::Raw, &config)?;

        run_cached(&self.cache, Protocol::Raw, &key, || async {
            let context = format!(
                "Answer the prompt using the document below.\n\n\
                Document:\n{document}\n\nPrompt: {prompt}",
                document = input.document,
                prompt = input.prompt,
            );
            let generation = self
                .invoker
                .generate(
                    &context,
                    &GenerationConfig {
                        max_tokens: config.max_tokens,
                        temperature: config.temperature,
                    },
                )
                .await?;

            debug!(tokens = generation.tokens, "raw strategy completed");

            let mut metadata = Map::new();
            metadata.insert("model_calls".into(), json!(1));
            metadata.insert("document_chars".into(), json!(input.document.chars().count()));

            Ok(StrategyOutput {
                response: generation.text,
                tokens: generation.tokens,
                metadata,
            })
        })
        .await
    }
}
