//! Tree strategy: disjoint branches dispatched concurrently, joined, then
//! combined by one aggregation call.
//!
//! Branch calls are independent and fan out on a `JoinSet`; the aggregation
//! call only runs after every branch has completed. One failed (or
//! panicked) branch fails the whole run — no partial aggregation over a
//! subset of branches.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map};
use tokio::task::JoinSet;
use tracing::debug;

use crate::cache::ResultCache;
use crate::chunker::split_branches;
use crate::error::{EngineError, EngineResult};
use crate::invoker::{GenerationConfig, ModelInvoker};
use crate::protocol::{Protocol, ProtocolInput, StrategyOutput, TreeConfig};

use super::{cache_key, run_cached, StrategyExecutor};

pub struct TreeExecutor {
    invoker: Arc<dyn ModelInvoker>,
    cache: Arc<ResultCache>,
}

impl TreeExecutor {
    pub fn new(invoker: Arc<dyn ModelInvoker>, cache: Arc<ResultCache>) -> Self {
        Self { invoker, cache }
    }

    /// Fan out one generation call per branch and join them all.
    ///
    /// Returns branch outputs in branch order.
    async fn execute_branches(
        &self,
        prompt: &str,
        branches: Vec<String>,
    ) -> EngineResult<Vec<(String, u64)>> {
        let total = branches.len();
        let prompt = Arc::new(prompt.to_string());
        let mut join_set = JoinSet::new();

        for (index, branch) in branches.into_iter().enumerate() {
            let invoker = self.invoker.clone();
            let prompt = prompt.clone();

            join_set.spawn(async move {
                let context = format!(
                    "You are processing branch {part} of {total} of a document \
                    split into independent segments. Work only from this \
                    segment.\n\nBranch {part}/{total}:\n{branch}\n\n\
                    Prompt: {prompt}",
                    part = index + 1,
                );
                let result = invoker
                    .generate(&context, &GenerationConfig::default())
                    .await;
                (index, result)
            });
        }

        let mut outputs: Vec<Option<(String, u64)>> = vec![None; total];
        while let Some(joined) = join_set.join_next().await {
            let (index, result) = joined.map_err(|e| {
                EngineError::external("model_invoker", format!("branch task panicked: {e}"))
            })?;
            let generation = result?;
            debug!(branch = index + 1, total, tokens = generation.tokens, "tree branch completed");
            outputs[index] = Some((generation.text, generation.tokens));
        }

        // Every slot is filled once all joins succeeded.
        Ok(outputs.into_iter().flatten().collect())
    }

    async fn run_tree(
        &self,
        input: &ProtocolInput,
        config: &TreeConfig,
    ) -> EngineResult<StrategyOutput> {
        let branches = split_branches(&input.document, config.branch_factor)?;
        let branch_count = branches.len();

        let branch_outputs = self.execute_branches(&input.prompt, branches).await?;
        let mut tokens: u64 = branch_outputs.iter().map(|(_, t)| t).sum();

        let candidates = branch_outputs
            .iter()
            .enumerate()
            .map(|(index, (text, _))| format!("=== Branch {} ===\n{}", index + 1, text))
            .collect::<Vec<_>>()
            .join("\n\n");

        let aggregation_context = format!(
            "Combine the branch results below into one final answer to the \
            prompt, using the '{method}' aggregation method.\n\n\
            {candidates}\n\nPrompt: {prompt}",
            method = config.aggregation_method,
            prompt = input.prompt,
        );
        let aggregation = self
            .invoker
            .generate(&aggregation_context, &GenerationConfig::default())
            .await?;
        tokens += aggregation.tokens;

        let mut metadata = Map::new();
        metadata.insert("branches".into(), json!(branch_count));
        metadata.insert("model_calls".into(), json!(branch_count + 1));
        metadata.insert(
            "aggregation_method".into(),
            json!(config.aggregation_method.to_string()),
        );

        Ok(StrategyOutput {
            response: aggregation.text,
            tokens,
            metadata,
        })
    }
}

#[async_trait]
impl StrategyExecutor for TreeExecutor {
    fn protocol(&self) -> Protocol {
        Protocol::Tree
    }

    async fn execute(&self, input: &ProtocolInput) -> EngineResult<StrategyOutput> {
        let config = TreeConfig::from_options(&input.options)?;
        let key = cache_key(input, Protocol::Tree, &config)?;

        run_cached(&self.cache, Protocol::Tree, &key, || {
            self.run_tree(input, &config)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoker::{Generation, MockModelInvoker};
    use std::time::Duration;

    fn executor(invoker: MockModelInvoker) -> TreeExecutor {
        TreeExecutor::new(
            Arc::new(invoker),
            Arc::new(ResultCache::new(Duration::from_secs(60))),
        )
    }

    fn tree_input(document_len: usize, branch_factor: usize) -> ProtocolInput {
        let mut options = Map::new();
        options.insert("branch_factor".into(), json!(branch_factor));
        ProtocolInput::new("Summarize", "B".repeat(document_len)).with_options(options)
    }

    #[tokio::test]
    async fn branches_are_joined_before_aggregation() {
        let mut invoker = MockModelInvoker::new();
        invoker
            .expect_generate()
            .withf(|context, _| context.contains("Branch"))
            .times(3)
            .returning(|context, _| {
                let text = if context.contains("Branch 1/3") {
                    "alpha"
                } else if context.contains("Branch 2/3") {
                    "beta"
                } else {
                    "gamma"
                };
                Ok(Generation { text: text.into(), tokens: 10 })
            });
        invoker
            .expect_generate()
            .withf(|context, _| {
                context.contains("Combine the branch results")
                    && context.contains("=== Branch 1 ===\nalpha")
                    && context.contains("=== Branch 2 ===\nbeta")
                    && context.contains("=== Branch 3 ===\ngamma")
            })
            .times(1)
            .returning(|_, _| Ok(Generation { text: "final".into(), tokens: 15 }));

        let output = executor(invoker).execute(&tree_input(300, 3)).await.unwrap();

        assert_eq!(output.response, "final");
        assert_eq!(output.tokens, 45);
        assert_eq!(output.metadata["branches"], json!(3));
        assert_eq!(output.metadata["model_calls"], json!(4));
        assert_eq!(output.metadata["aggregation_method"], json!("synthesis"));
    }

    #[tokio::test]
    async fn aggregation_method_label_is_forwarded_verbatim() {
        let mut invoker = MockModelInvoker::new();
        invoker
            .expect_generate()
            .withf(|context, _| context.contains("Branch"))
            .times(2)
            .returning(|_, _| Ok(Generation { text: "out".into(), tokens: 1 }));
        invoker
            .expect_generate()
            .withf(|context, _| context.contains("'voting' aggregation method"))
            .times(1)
            .returning(|_, _| Ok(Generation { text: "final".into(), tokens: 1 }));

        let mut options = Map::new();
        options.insert("branch_factor".into(), json!(2));
        options.insert("aggregation_method".into(), json!("voting"));
        let input = ProtocolInput::new("p", "D".repeat(100)).with_options(options);

        let output = executor(invoker).execute(&input).await.unwrap();
        assert_eq!(output.metadata["aggregation_method"], json!("voting"));
    }

    #[tokio::test]
    async fn one_failed_branch_fails_the_whole_run() {
        let mut invoker = MockModelInvoker::new();
        invoker.expect_generate().returning(|context, _| {
            if context.contains("Branch 2/3") {
                Err(EngineError::external("model_invoker", "backend down"))
            } else {
                Ok(Generation { text: "fine".into(), tokens: 1 })
            }
        });

        let err = executor(invoker).execute(&tree_input(300, 3)).await.unwrap_err();
        assert!(matches!(err, EngineError::ExternalService { .. }));
    }

    #[tokio::test]
    async fn short_document_yields_fewer_branches() {
        let mut invoker = MockModelInvoker::new();
        // 2-char document with branch_factor 5: two branches + aggregation.
        invoker
            .expect_generate()
            .times(3)
            .returning(|_, _| Ok(Generation { text: "x".into(), tokens: 1 }));

        let output = executor(invoker).execute(&tree_input(2, 5)).await.unwrap();
        assert_eq!(output.metadata["branches"], json!(2));
    }

    #[tokio::test]
    async fn zero_branch_factor_is_rejected_before_any_call() {
        let invoker = MockModelInvoker::new();
        let err = executor(invoker).execute(&tree_input(100, 0)).await.unwrap_err();
        assert!(matches!(err, EngineError::Configuration(_)));
    }
}
