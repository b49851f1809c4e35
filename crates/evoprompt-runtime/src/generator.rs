//! Content generation - runs each prompt against an input

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use thiserror::Error;

use evoprompt_core::{PromptId, PromptRecord};
use evoprompt_llm::{LlmError, LlmProvider, LlmRequest};

/// Failure to produce content for one prompt
#[derive(Debug, Error)]
pub enum GenerationFailure {
    #[error("LLM call failed: {0}")]
    Llm(#[from] LlmError),
    #[error("{0}")]
    Strategy(String),
}

/// Capability: turn (prompt, input) into generated text
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    async fn generate(&self, prompt: &str, input: &str) -> Result<String, GenerationFailure>;
}

/// Configuration for LLM-backed generation
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// Model override (provider default when `None`)
    pub model: Option<String>,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            model: None,
            temperature: 0.7,
            max_tokens: None,
        }
    }
}

/// Generator that sends the prompt as the system message and the input as
/// the user message
pub struct LlmGenerator<L: LlmProvider> {
    llm: Arc<L>,
    config: GeneratorConfig,
}

impl<L: LlmProvider> LlmGenerator<L> {
    pub fn new(llm: Arc<L>, config: GeneratorConfig) -> Self {
        Self { llm, config }
    }
}

#[async_trait]
impl<L: LlmProvider + 'static> ContentGenerator for LlmGenerator<L> {
    async fn generate(&self, prompt: &str, input: &str) -> Result<String, GenerationFailure> {
        let mut request = LlmRequest::with_role(prompt, input)
            .temperature(self.config.temperature)
            .max_tokens(self.config.max_tokens);
        if let Some(model) = &self.config.model {
            request = request.model(model);
        }
        Ok(self.llm.complete(request).await?.content)
    }
}

/// Generator backed by a plain function of (prompt, input)
pub struct FnGenerator<F> {
    strategy: F,
}

impl<F> FnGenerator<F>
where
    F: Fn(&str, &str) -> String + Send + Sync,
{
    pub fn new(strategy: F) -> Self {
        Self { strategy }
    }
}

#[async_trait]
impl<F> ContentGenerator for FnGenerator<F>
where
    F: Fn(&str, &str) -> String + Send + Sync,
{
    async fn generate(&self, prompt: &str, input: &str) -> Result<String, GenerationFailure> {
        Ok((self.strategy)(prompt, input))
    }
}

/// Output produced for one lineage slot
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedOutput {
    pub prompt_id: PromptId,
    /// Generated text, or `"Error: <message>"` when generation failed
    pub content: String,
    pub failed: bool,
}

/// Run the generator once per prompt against the same input.
///
/// At most `concurrency` calls are in flight. Results are paired with their
/// prompt by id and returned in population order. A failing prompt yields an
/// error string instead of aborting the batch.
pub async fn generate_for_population<G>(
    generator: &G,
    population: &[PromptRecord],
    input: &str,
    concurrency: usize,
) -> Vec<GeneratedOutput>
where
    G: ContentGenerator + ?Sized,
{
    if population.is_empty() {
        return Vec::new();
    }

    let mut by_id: HashMap<PromptId, GeneratedOutput> = stream::iter(population)
        .map(|record| async move {
            let output = match generator.generate(record.content(), input).await {
                Ok(content) => GeneratedOutput {
                    prompt_id: record.id,
                    content,
                    failed: false,
                },
                Err(e) => {
                    tracing::warn!(prompt_id = %record.id, error = %e, "Generation failed");
                    metrics::counter!("evoprompt_fallbacks_total", "stage" => "generation")
                        .increment(1);
                    GeneratedOutput {
                        prompt_id: record.id,
                        content: format!("Error: {}", e),
                        failed: true,
                    }
                }
            };
            (record.id, output)
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    population
        .iter()
        .filter_map(|record| by_id.remove(&record.id))
        .collect()
}
