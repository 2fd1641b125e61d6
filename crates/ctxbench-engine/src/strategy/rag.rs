//! RAG strategy: store the document in the retrieval index, query it with
//! the prompt, generate over the surviving fragments, then clean up.
//!
//! The index is shared, so the record stored for a run is deleted once the
//! run finishes — on the success path and on every failure path after the
//! store. Skipping cleanup would grow the index without bound.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cache::ResultCache;
use crate::error::EngineResult;
use crate::invoker::{GenerationConfig, ModelInvoker};
use crate::protocol::{Protocol, ProtocolInput, RagConfig, StrategyOutput};
use crate::retrieval::RetrievalIndex;

use super::{cache_key, run_cached, StrategyExecutor};

pub struct RagExecutor {
    invoker: Arc<dyn ModelInvoker>,
    index: Arc<dyn RetrievalIndex>,
    cache: Arc<ResultCache>,
}

impl RagExecutor {
    pub fn new(
        invoker: Arc<dyn ModelInvoker>,
        index: Arc<dyn RetrievalIndex>,
        cache: Arc<ResultCache>,
    ) -> Self {
        Self {
            invoker,
            index,
            cache,
        }
    }

    /// Query, filter, and generate. The caller owns cleanup of `record_id`.
    async fn retrieve_and_generate(
        &self,
        input: &ProtocolInput,
        config: &RagConfig,
    ) -> EngineResult<StrategyOutput> {
        let fragments = self.index.query(&input.prompt, config.top_k).await?;
        let retrieved = fragments.len();

        let surviving: Vec<_> = fragments
            .into_iter()
            .filter(|fragment| fragment.score >= config.similarity_threshold)
            .collect();
        debug!(retrieved, surviving = surviving.len(), "retrieval filtered by similarity");

        let context_fragments = surviving
            .iter()
            .map(|fragment| fragment.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        let context = format!(
            "Answer the prompt using the retrieved context below.\n\n\
            Context:\n{context_fragments}\n\nPrompt: {prompt}",
            prompt = input.prompt,
        );
        let generation = self
            .invoker
            .generate(&context, &GenerationConfig::default())
            .await?;

        let mut metadata = Map::new();
        metadata.insert("fragments_retrieved".into(), json!(retrieved));
        metadata.insert("fragments_used".into(), json!(surviving.len()));
        metadata.insert("top_k".into(), json!(config.top_k));
        metadata.insert(
            "similarity_threshold".into(),
            json!(config.similarity_threshold),
        );

        Ok(StrategyOutput {
            response: generation.text,
            tokens: generation.tokens,
            metadata,
        })
    }

    async fn run_rag(
        &self,
        input: &ProtocolInput,
        config: &RagConfig,
    ) -> EngineResult<StrategyOutput> {
        let record_id = format!("run-{}", Uuid::new_v4());
        self.index.store(&record_id, &input.document).await?;

        let outcome = self.retrieve_and_generate(input, config).await;

        // Cleanup is unconditional: the record leaves the index whether the
        // generation succeeded or not. A cleanup failure after a produced
        // response is logged, not propagated.
        if let Err(e) = self.index.delete(&record_id).await {
            warn!(%record_id, error = %e, "failed to remove run record from retrieval index");
        }

        outcome
    }
}

#[async_trait]
impl StrategyExecutor for RagExecutor {
    fn protocol(&self) -> Protocol {
        Protocol::Rag
    }

    async fn execute(&self, input: &ProtocolInput) -> EngineResult<StrategyOutput> {
        let config = RagConfig::from_options(&input.options)?;
        let key = cache_key(input, Protocol::Rag, &config)?;

        run_cached(&self.cache, Protocol::Rag, &key, || {
            self.run_rag(input, &config)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::invoker::{Generation, MockModelInvoker};
    use crate::retrieval::{HashEmbedder, InMemoryIndex, MockRetrievalIndex, RetrievedFragment};
    use std::time::Duration;

    fn cache() -> Arc<ResultCache> {
        Arc::new(ResultCache::new(Duration::from_secs(60)))
    }

    fn generating_invoker() -> MockModelInvoker {
        let mut invoker = MockModelInvoker::new();
        invoker
            .expect_generate()
            .returning(|_, _| Ok(Generation { text: "answer".into(), tokens: 30 }));
        invoker
    }

    #[tokio::test]
    async fn run_record_is_removed_after_success() {
        let index = Arc::new(InMemoryIndex::new(Box::new(HashEmbedder::new(64))));
        let executor = RagExecutor::new(Arc::new(generating_invoker()), index.clone(), cache());

        let output = executor
            .execute(&ProtocolInput::new("rust lifetimes", "rust lifetimes explained at length"))
            .await
            .unwrap();

        assert_eq!(output.response, "answer");
        assert!(index.is_empty().await);
    }

    #[tokio::test]
    async fn run_record_is_removed_after_generation_failure() {
        let mut invoker = MockModelInvoker::new();
        invoker
            .expect_generate()
            .returning(|_, _| Err(EngineError::external("model_invoker", "backend down")));

        let index = Arc::new(InMemoryIndex::new(Box::new(HashEmbedder::new(64))));
        let executor = RagExecutor::new(Arc::new(invoker), index.clone(), cache());

        let err = executor
            .execute(&ProtocolInput::new("prompt", "document"))
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::ExternalService { .. }));
        assert!(index.is_empty().await);
    }

    #[tokio::test]
    async fn fragments_below_threshold_are_discarded() {
        let mut index = MockRetrievalIndex::new();
        index.expect_store().returning(|_, _| Ok(()));
        index.expect_delete().returning(|_| Ok(()));
        index.expect_query().returning(|_, _| {
            Ok(vec![
                RetrievedFragment { id: "a".into(), text: "strong match".into(), score: 0.9 },
                RetrievedFragment { id: "b".into(), text: "weak match".into(), score: 0.3 },
            ])
        });

        let mut invoker = MockModelInvoker::new();
        invoker
            .expect_generate()
            .withf(|context, _| context.contains("strong match") && !context.contains("weak match"))
            .times(1)
            .returning(|_, _| Ok(Generation { text: "answer".into(), tokens: 10 }));

        let executor = RagExecutor::new(Arc::new(invoker), Arc::new(index), cache());
        let output = executor
            .execute(&ProtocolInput::new("prompt", "document"))
            .await
            .unwrap();

        assert_eq!(output.metadata["fragments_retrieved"], json!(2));
        assert_eq!(output.metadata["fragments_used"], json!(1));
    }

    #[tokio::test]
    async fn store_failure_propagates_without_delete() {
        let mut index = MockRetrievalIndex::new();
        index
            .expect_store()
            .returning(|_, _| Err(EngineError::external("retrieval_index", "store down")));
        index.expect_delete().times(0);

        let executor =
            RagExecutor::new(Arc::new(generating_invoker()), Arc::new(index), cache());
        let err = executor
            .execute(&ProtocolInput::new("prompt", "document"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ExternalService { .. }));
    }

    #[tokio::test]
    async fn query_failure_still_cleans_up() {
        let mut index = MockRetrievalIndex::new();
        index.expect_store().returning(|_, _| Ok(()));
        index
            .expect_query()
            .returning(|_, _| Err(EngineError::external("retrieval_index", "query down")));
        index.expect_delete().times(1).returning(|_| Ok(()));

        let executor =
            RagExecutor::new(Arc::new(generating_invoker()), Arc::new(index), cache());
        assert!(executor
            .execute(&ProtocolInput::new("prompt", "document"))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn delete_failure_after_success_is_not_propagated() {
        let mut index = MockRetrievalIndex::new();
        index.expect_store().returning(|_, _| Ok(()));
        index.expect_query().returning(|_, _| Ok(vec![]));
        index
            .expect_delete()
            .returning(|_| Err(EngineError::external("retrieval_index", "delete down")));

        let executor =
            RagExecutor::new(Arc::new(generating_invoker()), Arc::new(index), cache());
        let output = executor
            .execute(&ProtocolInput::new("prompt", "document"))
            .await
            .unwrap();
        assert_eq!(output.metadata["fragments_used"], json!(0));
    }
}
