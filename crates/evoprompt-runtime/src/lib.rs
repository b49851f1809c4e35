//! # evoprompt runtime
//!
//! Capability traits for the three collaborators of an optimization run and
//! the loop that drives them.
//!
//! | Capability | Trait | LLM-backed default |
//! |------------|-------|--------------------|
//! | Generate content | [`ContentGenerator`] | [`LlmGenerator`] |
//! | Score content | [`Evaluator`] | [`LlmEvaluator`] |
//! | Rewrite prompts | [`PromptOptimizer`] | [`LlmOptimizer`] |
//!
//! ```rust
//! use std::sync::Arc;
//! use evoprompt_core::PromptRecord;
//! use evoprompt_llm::MockProvider;
//! use evoprompt_runtime::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let llm = Arc::new(MockProvider::smart());
//! let outcome = optimize_prompts(
//!     vec![PromptRecord::new("Describe the product.")],
//!     &["A waterproof hiking boot".to_string()],
//!     3,
//!     None,
//!     LlmGenerator::new(llm.clone(), GeneratorConfig::default()),
//!     LlmEvaluator::new(llm.clone(), EvaluatorConfig::default()),
//!     LlmOptimizer::new(llm, OptimizerConfig::default()),
//! )
//! .await
//! .unwrap();
//! assert_eq!(outcome.generations_run, 3);
//! # }
//! ```

pub mod evaluator;
pub mod generator;
pub mod optimizer;
pub mod orchestrator;

pub use evaluator::{
    evaluate_outputs, render_template, EvaluationError, Evaluator, EvaluatorConfig, LlmEvaluator,
    DEFAULT_EVALUATION_PROMPT,
};
pub use generator::{
    generate_for_population, ContentGenerator, FnGenerator, GeneratedOutput, GenerationFailure,
    GeneratorConfig, LlmGenerator,
};
pub use optimizer::{optimization_instruction, LlmOptimizer, OptimizerConfig, PromptOptimizer};
pub use orchestrator::{
    optimize_prompts, population_from_store, GenerationReport, LoopConfig, LoopError, LoopOutcome,
    OptimizationLoop, StopReason,
};
