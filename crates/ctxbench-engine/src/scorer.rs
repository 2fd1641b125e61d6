//! Quality scoring: a secondary model call rating a response against its
//! prompt on a 1–10 scale.
//!
//! Scoring is non-fatal by contract. Parse failures and invoker failures
//! are logged and replaced with the default score; out-of-range numbers are
//! clamped on both ends.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::error::{EngineError, EngineResult};
use crate::invoker::{GenerationConfig, ModelInvoker};

/// Score returned when the rating call fails or cannot be parsed.
pub const DEFAULT_QUALITY: f64 = 5.0;

/// Lower and upper bounds of the quality scale.
pub const QUALITY_RANGE: (f64, f64) = (1.0, 10.0);

/// Rates a response against the prompt that produced it.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QualityScorer: Send + Sync {
    /// Returns a score in [1, 10]. Never fails: scoring problems degrade to
    /// the default score.
    async fn score(&self, response: &str, prompt: &str) -> f64;
}

/// Model-backed scorer issuing a fixed-format rating prompt.
pub struct ModelQualityScorer {
    invoker: Arc<dyn ModelInvoker>,
}

impl ModelQualityScorer {
    pub fn new(invoker: Arc<dyn ModelInvoker>) -> Self {
        Self { invoker }
    }

    async fn try_score(&self, response: &str, prompt: &str) -> EngineResult<f64> {
        let rating_prompt = format!(
            "Rate how well the response below answers the prompt, on a scale \
            from 1 to 10.\n\nPrompt: {prompt}\n\nResponse:\n{response}\n\n\
            Reply with a single number from 1 to 10 and nothing else."
        );
        let config = GenerationConfig {
            max_tokens: 8,
            temperature: 0.0,
        };

        let generation = self.invoker.generate(&rating_prompt, &config).await?;
        parse_rating(&generation.text)
            .ok_or_else(|| EngineError::Scoring(format!("no numeric rating in {:?}", generation.text)))
    }
}

#[async_trait]
impl QualityScorer for ModelQualityScorer {
    async fn score(&self, response: &str, prompt: &str) -> f64 {
        match self.try_score(response, prompt).await {
            Ok(raw) => clamp_quality(raw),
            Err(e) => {
                warn!(class = %e.failure_class(), error = %e, "quality scoring failed, using default");
                DEFAULT_QUALITY
            }
        }
    }
}

/// Fixed-output scorer for deterministic runs and tests.
pub struct FixedQualityScorer(pub f64);

#[async_trait]
impl QualityScorer for FixedQualityScorer {
    async fn score(&self, _response: &str, _prompt: &str) -> f64 {
        clamp_quality(self.0)
    }
}

/// Clamp a raw score into the 1–10 quality scale.
pub fn clamp_quality(raw: f64) -> f64 {
    raw.clamp(QUALITY_RANGE.0, QUALITY_RANGE.1)
}

/// Extract the first numeric token from a model reply.
///
/// Tolerates prose around the number ("I'd say 8.5/10") by splitting on
/// anything that can't be part of a number.
fn parse_rating(raw: &str) -> Option<f64> {
    raw.split(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-'))
        .filter(|token| !token.is_empty())
        .find_map(|token| token.parse::<f64>().ok())
}
