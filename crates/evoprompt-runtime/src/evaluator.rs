//! Evaluation of generated content
//!
//! [`LlmEvaluator`] owns its current evaluation template. The template has
//! two placeholders, `{input}` and `{content}`, which are filled in a single
//! pass before each call so text inside either value is never re-expanded.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use thiserror::Error;

use evoprompt_core::{EvaluationResult, PromptId, PromptRecord};
use evoprompt_llm::{LlmProvider, LlmRequest, ResponseFormat};

use crate::generator::GeneratedOutput;

pub const INPUT_PLACEHOLDER: &str = "{input}";
pub const CONTENT_PLACEHOLDER: &str = "{content}";

/// Template used until a caller installs another one
pub const DEFAULT_EVALUATION_PROMPT: &str = "Evaluate the content below, which was written in response to the given input.

Input:
{input}

Content:
{content}

Answer using exactly these lines:
Score: <number from 1 to 5>
Feedback: <specific, actionable critique>
Improved Output: <a better version of the content>
Summary: <one sentence verdict>";

const EVALUATOR_SYSTEM: &str =
    "You are a strict, consistent evaluator of generated text. Follow the requested format.";

const JSON_INSTRUCTION: &str = "Respond with a single JSON object with the keys \
     \"score\" (number), \"feedback\", \"improved_output\" and \"summary\" (strings).";

/// Structured evaluation errors that are not scores
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvaluationError {
    #[error("No rubric registered for target '{0}'")]
    UnknownTarget(String),
}

/// Capability: score generated content against its input.
///
/// `evaluate` is total: remote failures come back as
/// [`EvaluationResult::fallback`], never as an error.
#[async_trait]
pub trait Evaluator: Send + Sync {
    async fn evaluate(&self, content: &str, input: &str) -> EvaluationResult;

    /// Evaluate with the rubric registered for `target`
    async fn evaluate_for_target(
        &self,
        target: &str,
        _content: &str,
        _input: &str,
    ) -> Result<EvaluationResult, EvaluationError> {
        Err(EvaluationError::UnknownTarget(target.to_string()))
    }

    /// Current evaluation template, if this evaluator has one
    fn current_prompt(&self) -> Option<&str> {
        None
    }

    /// Replace the evaluation template
    fn set_current_prompt(&mut self, _template: &str) {}
}

/// Configuration for LLM-backed evaluation
#[derive(Debug, Clone)]
pub struct EvaluatorConfig {
    pub model: Option<String>,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub response_format: ResponseFormat,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            model: None,
            temperature: 0.2,
            max_tokens: None,
            response_format: ResponseFormat::Text,
        }
    }
}

/// Fill `{input}` and `{content}` in one left-to-right pass
pub fn render_template(template: &str, input: &str, content: &str) -> String {
    let mut rendered = String::with_capacity(template.len() + input.len() + content.len());
    let mut rest = template;

    while let Some(pos) = rest.find('{') {
        rendered.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        if let Some(after) = tail.strip_prefix(INPUT_PLACEHOLDER) {
            rendered.push_str(input);
            rest = after;
        } else if let Some(after) = tail.strip_prefix(CONTENT_PLACEHOLDER) {
            rendered.push_str(content);
            rest = after;
        } else {
            rendered.push('{');
            rest = &tail[1..];
        }
    }
    rendered.push_str(rest);
    rendered
}

/// Evaluator backed by an LLM provider
#[derive(Debug)]
pub struct LlmEvaluator<L: LlmProvider> {
    llm: Arc<L>,
    config: EvaluatorConfig,
    template: String,
    rubrics: HashMap<String, String>,
}

impl<L: LlmProvider> LlmEvaluator<L> {
    pub fn new(llm: Arc<L>, config: EvaluatorConfig) -> Self {
        Self {
            llm,
            config,
            template: DEFAULT_EVALUATION_PROMPT.to_string(),
            rubrics: HashMap::new(),
        }
    }

    pub fn with_template(mut self, template: &str) -> Self {
        self.template = template.to_string();
        self
    }

    /// Register the rubric used for records carrying `target`
    pub fn with_rubric(mut self, target: &str, rubric: &str) -> Self {
        self.rubrics.insert(target.to_string(), rubric.to_string());
        self
    }

    pub fn has_rubric(&self, target: &str) -> bool {
        self.rubrics.contains_key(target)
    }

    fn system_prompt(&self, rubric: Option<&str>) -> String {
        let mut system = EVALUATOR_SYSTEM.to_string();
        if let Some(rubric) = rubric {
            system.push_str("\n\nRubric:\n");
            system.push_str(rubric);
        }
        if self.config.response_format == ResponseFormat::JsonObject {
            system.push_str("\n\n");
            system.push_str(JSON_INSTRUCTION);
        }
        system
    }

    async fn dispatch(&self, rubric: Option<&str>, content: &str, input: &str) -> EvaluationResult {
        let mut request = LlmRequest::with_role(
            &self.system_prompt(rubric),
            &render_template(&self.template, input, content),
        )
        .temperature(self.config.temperature)
        .max_tokens(self.config.max_tokens)
        .response_format(self.config.response_format);
        if let Some(model) = &self.config.model {
            request = request.model(model);
        }

        match self.llm.complete(request).await {
            Ok(response) => {
                let result = EvaluationResult::from_response(&response.content);
                if result.is_fallback() {
                    tracing::warn!(provider = self.llm.name(), "Evaluator returned no usable text");
                    metrics::counter!("evoprompt_fallbacks_total", "stage" => "evaluation")
                        .increment(1);
                }
                result
            }
            Err(e) => {
                tracing::warn!(provider = self.llm.name(), error = %e, "Evaluation call failed");
                metrics::counter!("evoprompt_fallbacks_total", "stage" => "evaluation")
                    .increment(1);
                EvaluationResult::fallback(&e.to_string())
            }
        }
    }
}

#[async_trait]
impl<L: LlmProvider + 'static> Evaluator for LlmEvaluator<L> {
    async fn evaluate(&self, content: &str, input: &str) -> EvaluationResult {
        self.dispatch(None, content, input).await
    }

    async fn evaluate_for_target(
        &self,
        target: &str,
        content: &str,
        input: &str,
    ) -> Result<EvaluationResult, EvaluationError> {
        let rubric = self
            .rubrics
            .get(target)
            .ok_or_else(|| EvaluationError::UnknownTarget(target.to_string()))?;
        Ok(self.dispatch(Some(rubric), content, input).await)
    }

    fn current_prompt(&self) -> Option<&str> {
        Some(&self.template)
    }

    fn set_current_prompt(&mut self, template: &str) {
        self.template = template.to_string();
    }
}

/// Evaluate every generated output, at most `concurrency` at a time.
///
/// Results are keyed by prompt id. Records with a `target` go through
/// rubric-keyed evaluation; an unknown target is reported per slot.
pub async fn evaluate_outputs<E>(
    evaluator: &E,
    population: &[PromptRecord],
    outputs: &[GeneratedOutput],
    input: &str,
    concurrency: usize,
) -> HashMap<PromptId, Result<EvaluationResult, EvaluationError>>
where
    E: Evaluator + ?Sized,
{
    let targets: HashMap<PromptId, Option<&str>> = population
        .iter()
        .map(|record| (record.id, record.target.as_deref()))
        .collect();

    stream::iter(outputs)
        .filter_map(|output| {
            let target = targets.get(&output.prompt_id).copied();
            async move { target.map(|target| (output, target)) }
        })
        .map(|(output, target)| async move {
            let result = match target {
                Some(target) => {
                    evaluator
                        .evaluate_for_target(target, &output.content, input)
                        .await
                }
                None => Ok(evaluator.evaluate(&output.content, input).await),
            };
            (output.prompt_id, result)
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use evoprompt_core::FALLBACK_SCORE;
    use evoprompt_llm::MockProvider;

    #[test]
    fn test_render_template() {
        let rendered = render_template("In: {input} / Out: {content} {other}", "q", "a");
        assert_eq!(rendered, "In: q / Out: a {other}");
    }

    #[test]
    fn test_render_does_not_reexpand_values() {
        let rendered = render_template("{input}|{content}", "{content}", "{input}");
        assert_eq!(rendered, "{content}|{input}");
    }

    #[tokio::test]
    async fn test_substitutes_before_dispatch() {
        let llm = Arc::new(MockProvider::scripted(|req| {
            assert_eq!(req.user_prompt(), "Rate 'Leaves fall.' for 'autumn'");
            Ok("Score: 4\nFeedback: Short.".to_string())
        }));
        let evaluator = LlmEvaluator::new(llm, EvaluatorConfig::default())
            .with_template("Rate '{content}' for '{input}'");

        let result = evaluator.evaluate("Leaves fall.", "autumn").await;
        assert_eq!(result.score, 4.0);
        assert_eq!(result.feedback, "Short.");
    }

    #[tokio::test]
    async fn test_call_failure_falls_back() {
        let evaluator = LlmEvaluator::new(
            Arc::new(MockProvider::failing("upstream down")),
            EvaluatorConfig::default(),
        );
        let result = evaluator.evaluate("content", "input").await;
        assert_eq!(result.score, FALLBACK_SCORE);
        assert!(result.feedback.contains("Error"));
        assert!(result.improved_output.contains("Error"));
        assert!(result.summary.contains("Error"));
    }

    #[tokio::test]
    async fn test_template_can_be_swapped() {
        let llm = Arc::new(MockProvider::scripted(|req| {
            Ok(format!("Score: 2\nFeedback: {}", req.user_prompt()))
        }));
        let mut evaluator = LlmEvaluator::new(llm, EvaluatorConfig::default());
        assert_eq!(evaluator.current_prompt(), Some(DEFAULT_EVALUATION_PROMPT));

        evaluator.set_current_prompt("judge {content}");
        let result = evaluator.evaluate("this", "unused").await;
        assert_eq!(result.feedback, "judge this");
    }

    #[tokio::test]
    async fn test_rubric_keyed_evaluation() {
        let llm = Arc::new(MockProvider::scripted(|req| {
            let system = req.system_prompt().unwrap_or_default();
            let score = if system.contains("Rhymes") { "5" } else { "1" };
            Ok(format!("Score: {score}"))
        }));
        let evaluator = LlmEvaluator::new(llm, EvaluatorConfig::default())
            .with_rubric("poem", "Rhymes and scans.");

        let scored = evaluator
            .evaluate_for_target("poem", "roses are red", "write a poem")
            .await
            .unwrap();
        assert_eq!(scored.score, 5.0);

        let unknown = evaluator
            .evaluate_for_target("limerick", "x", "y")
            .await
            .unwrap_err();
        assert_eq!(unknown, EvaluationError::UnknownTarget("limerick".to_string()));
    }

    #[tokio::test]
    async fn test_json_mode_requests_json() {
        let llm = Arc::new(MockProvider::scripted(|req| {
            assert_eq!(req.response_format, ResponseFormat::JsonObject);
            assert!(req.system_prompt().unwrap_or_default().contains("JSON"));
            Ok(r#"{"score": 4.5, "feedback": "Tight."}"#.to_string())
        }));
        let config = EvaluatorConfig {
            response_format: ResponseFormat::JsonObject,
            ..Default::default()
        };
        let result = LlmEvaluator::new(llm, config).evaluate("c", "i").await;
        assert_eq!(result.score, 4.5);
        assert_eq!(result.feedback, "Tight.");
    }

    #[tokio::test]
    async fn test_evaluate_outputs_keys_by_id() {
        let llm = Arc::new(MockProvider::scripted(|req| {
            Ok(format!("Score: {}", req.user_prompt().len()))
        }));
        let evaluator =
            LlmEvaluator::new(llm, EvaluatorConfig::default()).with_template("{content}");

        let population = vec![
            PromptRecord::new("p1"),
            PromptRecord::new("p2").with_target("missing"),
        ];
        let outputs = vec![
            GeneratedOutput {
                prompt_id: population[0].id,
                content: "abc".to_string(),
                failed: false,
            },
            GeneratedOutput {
                prompt_id: population[1].id,
                content: "abcdef".to_string(),
                failed: false,
            },
        ];

        let results = evaluate_outputs(&evaluator, &population, &outputs, "in", 2).await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[&population[0].id].as_ref().unwrap().score, 3.0);
        assert!(results[&population[1].id].is_err());
    }
}
