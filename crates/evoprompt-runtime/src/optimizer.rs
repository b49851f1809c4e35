//! Prompt optimization from evaluation feedback

use std::sync::Arc;

use async_trait::async_trait;

use evoprompt_core::PromptRecord;
use evoprompt_llm::{LlmError, LlmProvider, LlmRequest};

const OPTIMIZER_SYSTEM: &str = "You are an expert prompt engineer. You rewrite prompts so \
     that the text they produce scores higher with the evaluator. Reply with the rewritten \
     prompt only, without commentary or quotation marks.";

/// Capability: rewrite a prompt given feedback and a score.
///
/// Always returns usable content; implementations fall back to the
/// prompt's current text rather than produce nothing.
#[async_trait]
pub trait PromptOptimizer: Send + Sync {
    async fn optimize(&self, prompt: &PromptRecord, feedback: &str, score: f64) -> String;
}

/// Configuration for LLM-backed optimization
#[derive(Debug, Clone)]
pub struct OptimizerConfig {
    pub model: Option<String>,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            model: None,
            temperature: 0.7,
            max_tokens: None,
        }
    }
}

/// Build the rewrite instruction for one prompt
pub fn optimization_instruction(prompt: &str, feedback: &str, score: f64) -> String {
    format!(
        "Improve the following prompt based on the evaluation of its output.\n\n\
         Current prompt:\n{prompt}\n\n\
         Score: {score:.2}\n\n\
         Feedback:\n{feedback}\n\n\
         Return only the improved prompt."
    )
}

/// Optimizer backed by an LLM provider
#[derive(Debug)]
pub struct LlmOptimizer<L: LlmProvider> {
    llm: Arc<L>,
    config: OptimizerConfig,
}

impl<L: LlmProvider> LlmOptimizer<L> {
    pub fn new(llm: Arc<L>, config: OptimizerConfig) -> Self {
        Self { llm, config }
    }

    async fn rewrite(&self, prompt: &str, feedback: &str, score: f64) -> Result<String, LlmError> {
        let mut request = LlmRequest::with_role(
            OPTIMIZER_SYSTEM,
            &optimization_instruction(prompt, feedback, score),
        )
        .temperature(self.config.temperature)
        .max_tokens(self.config.max_tokens);
        if let Some(model) = &self.config.model {
            request = request.model(model);
        }
        Ok(self.llm.complete(request).await?.content)
    }
}

#[async_trait]
impl<L: LlmProvider + 'static> PromptOptimizer for LlmOptimizer<L> {
    async fn optimize(&self, prompt: &PromptRecord, feedback: &str, score: f64) -> String {
        match self.rewrite(prompt.content(), feedback, score).await {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => {
                tracing::warn!(prompt_id = %prompt.id, "Optimizer returned empty text, keeping prompt");
                metrics::counter!("evoprompt_fallbacks_total", "stage" => "optimization")
                    .increment(1);
                prompt.content().to_string()
            }
            Err(e) => {
                tracing::warn!(prompt_id = %prompt.id, error = %e, "Optimization failed, keeping prompt");
                metrics::counter!("evoprompt_fallbacks_total", "stage" => "optimization")
                    .increment(1);
                prompt.content().to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evoprompt_llm::MockProvider;

    fn optimizer(llm: MockProvider) -> LlmOptimizer<MockProvider> {
        LlmOptimizer::new(Arc::new(llm), OptimizerConfig::default())
    }

    #[test]
    fn test_instruction_embeds_feedback_and_score() {
        let text = optimization_instruction("Write a haiku", "Too generic", 2.5);
        assert!(text.contains("Write a haiku"));
        assert!(text.contains("Too generic"));
        assert!(text.contains("2.50"));
    }

    #[tokio::test]
    async fn test_returns_rewrite_verbatim() {
        let prompt = PromptRecord::new("Write a haiku");
        let improved = optimizer(MockProvider::constant("  Write a haiku about rain.\n"))
            .optimize(&prompt, "vague", 2.0)
            .await;
        assert_eq!(improved, "  Write a haiku about rain.\n");
    }

    #[tokio::test]
    async fn test_failure_keeps_original() {
        let prompt = PromptRecord::new("Write a haiku");
        let improved = optimizer(MockProvider::failing("boom"))
            .optimize(&prompt, "vague", 2.0)
            .await;
        assert_eq!(improved, "Write a haiku");
    }

    #[tokio::test]
    async fn test_blank_output_keeps_original() {
        let prompt = PromptRecord::new("Write a haiku");
        for blank in ["", "   \n\t"] {
            let improved = optimizer(MockProvider::constant(blank))
                .optimize(&prompt, "vague", 2.0)
                .await;
            assert_eq!(improved, "Write a haiku");
        }
    }
}
