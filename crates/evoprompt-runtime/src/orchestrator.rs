//! Orchestrator - drives the generate / evaluate / optimize / track loop
//!
//! Each generation runs three parallel phases with a barrier between them.
//! Slots are paired by [`PromptId`], never by position, so calls may finish
//! in any order. Only the orchestrating task mutates the population, the
//! tracker and the evaluator template, and only after a phase has joined.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use evoprompt_core::{EvaluationResult, PerformanceTracker, PromptId, PromptRecord};
use evoprompt_persist::{AnnotationStore, NewAnnotation, PromptType, StorageError};

use crate::evaluator::{
    evaluate_outputs, EvaluationError, Evaluator, CONTENT_PLACEHOLDER, INPUT_PLACEHOLDER,
};
use crate::generator::{generate_for_population, ContentGenerator, GeneratedOutput};
use crate::optimizer::PromptOptimizer;

/// Errors returned to the caller of the loop.
///
/// Everything else is absorbed into fallback values along the way.
#[derive(Debug, Error)]
pub enum LoopError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Policy inputs for one optimization run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopConfig {
    /// Generation budget
    pub max_generations: u32,
    /// Stop once convergence reaches this value, in (0, 1]
    pub convergence_threshold: Option<f64>,
    /// Maximum in-flight calls per phase
    pub concurrency: usize,
    /// Number of the first generation
    pub start_generation: u32,
    /// Rewrite the evaluator template after every generation
    pub evolve_evaluator_prompt: bool,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_generations: 10,
            convergence_threshold: None,
            concurrency: 4,
            start_generation: 0,
            evolve_evaluator_prompt: false,
        }
    }
}

impl LoopConfig {
    pub fn validate(&self) -> Result<(), LoopError> {
        if self.concurrency == 0 {
            return Err(LoopError::InvalidConfig(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if let Some(threshold) = self.convergence_threshold {
            if !(threshold > 0.0 && threshold <= 1.0) {
                return Err(LoopError::InvalidConfig(format!(
                    "convergence threshold must be in (0, 1], got {}",
                    threshold
                )));
            }
        }
        if self
            .start_generation
            .checked_add(self.max_generations)
            .is_none()
        {
            return Err(LoopError::InvalidConfig(
                "generation counter would overflow".to_string(),
            ));
        }
        Ok(())
    }
}

/// Why the loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum StopReason {
    BudgetExhausted,
    Converged { convergence: f64 },
}

/// Per-generation bookkeeping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationReport {
    pub generation: u32,
    pub round_id: Uuid,
    /// Index into the input set used this round
    pub input_index: usize,
    /// Slots that went through optimization
    pub optimized: usize,
    /// Slots carried forward unchanged (structured evaluation error)
    pub skipped: usize,
    /// Slots that ran on a generator or evaluator fallback
    pub degraded: usize,
    pub convergence: f64,
}

/// Result of a completed run
#[derive(Debug, Clone)]
pub struct LoopOutcome {
    pub population: Vec<PromptRecord>,
    pub tracker: PerformanceTracker,
    pub generations_run: u32,
    pub stop_reason: StopReason,
    /// Final evaluator template, when it was evolved
    pub evaluator_prompt: Option<String>,
    pub reports: Vec<GenerationReport>,
}

/// The optimization loop over generator, evaluator and optimizer capabilities
pub struct OptimizationLoop<G, E, O> {
    generator: G,
    evaluator: E,
    optimizer: O,
    config: LoopConfig,
    store: Option<Arc<dyn AnnotationStore>>,
}

impl<G, E, O> OptimizationLoop<G, E, O>
where
    G: ContentGenerator,
    E: Evaluator,
    O: PromptOptimizer,
{
    pub fn new(generator: G, evaluator: E, optimizer: O, config: LoopConfig) -> Self {
        Self {
            generator,
            evaluator,
            optimizer,
            config,
            store: None,
        }
    }

    /// Store every generated output in `store`
    pub fn with_store(mut self, store: Arc<dyn AnnotationStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    pub fn evaluator(&self) -> &E {
        &self.evaluator
    }

    pub fn optimizer(&self) -> &O {
        &self.optimizer
    }

    /// Run until the budget is spent or convergence crosses the threshold.
    ///
    /// Round `n` uses `inputs[n % inputs.len()]`.
    pub async fn run(
        &mut self,
        population: Vec<PromptRecord>,
        inputs: &[String],
    ) -> Result<LoopOutcome, LoopError> {
        self.config.validate()?;
        if inputs.is_empty() {
            return Err(LoopError::InvalidConfig("input set is empty".to_string()));
        }
        let mut seen = HashSet::new();
        if let Some(duplicate) = population.iter().find(|record| !seen.insert(record.id)) {
            return Err(LoopError::InvalidConfig(format!(
                "duplicate prompt id {} in population",
                duplicate.id
            )));
        }

        let concurrency = self.config.concurrency;
        let mut population = population;
        let mut tracker = PerformanceTracker::new();
        let mut reports = Vec::new();
        let mut stop_reason = StopReason::BudgetExhausted;
        let mut generations_run = 0;
        let mut generation = self.config.start_generation;

        let mut evaluator_record = if self.config.evolve_evaluator_prompt {
            self.evaluator
                .current_prompt()
                .map(|template| PromptRecord::with_generation(template, generation))
        } else {
            None
        };

        info!(
            population = population.len(),
            inputs = inputs.len(),
            max_generations = self.config.max_generations,
            "Starting optimization loop"
        );

        for round in 0..self.config.max_generations {
            let input_index = round as usize % inputs.len();
            let input = inputs[input_index].as_str();
            let round_id = Uuid::new_v4();
            debug!(generation, %round_id, input_index, "Generating");

            let outputs =
                generate_for_population(&self.generator, &population, input, concurrency).await;

            debug!(generation, outputs = outputs.len(), "Evaluating");
            let evaluations =
                evaluate_outputs(&self.evaluator, &population, &outputs, input, concurrency).await;

            if let Some(store) = &self.store {
                let evaluator_prompt = match &evaluator_record {
                    Some(record) => Some((record.content(), record.generation())),
                    None => self
                        .evaluator
                        .current_prompt()
                        .map(|template| (template, self.config.start_generation)),
                };
                self.persist_outputs(
                    store.as_ref(),
                    &population,
                    &outputs,
                    evaluator_prompt,
                    input,
                    round_id,
                )
                .await;
            }

            debug!(generation, "Optimizing");
            let next = self.optimize_population(&population, &evaluations).await;

            let mut report = GenerationReport {
                generation,
                round_id,
                input_index,
                optimized: 0,
                skipped: 0,
                degraded: 0,
                convergence: 0.0,
            };
            for output in &outputs {
                match evaluations.get(&output.prompt_id) {
                    Some(Ok(result)) => {
                        report.optimized += 1;
                        if output.failed || result.is_fallback() {
                            report.degraded += 1;
                        }
                    }
                    Some(Err(_)) => report.skipped += 1,
                    None => {}
                }
            }

            // Skipped slots are carried forward but were not scored this round
            let scored: Vec<PromptRecord> = next
                .iter()
                .filter(|record| matches!(evaluations.get(&record.id), Some(Ok(_))))
                .cloned()
                .collect();
            if let Err(e) = tracker.record(generation, &scored) {
                warn!(generation, error = %e, "Tracker rejected generation");
            }

            if let Some(record) = evaluator_record.as_mut() {
                self.evolve_evaluator_prompt(record, &population, &evaluations)
                    .await;
            }

            population = next;
            generations_run += 1;
            report.convergence = tracker.convergence();
            metrics::counter!("evoprompt_generations_total").increment(1);
            metrics::gauge!("evoprompt_convergence").set(report.convergence);

            info!(
                generation,
                optimized = report.optimized,
                skipped = report.skipped,
                degraded = report.degraded,
                convergence = report.convergence,
                "Generation complete"
            );
            reports.push(report);

            if let Some(threshold) = self.config.convergence_threshold {
                let convergence = tracker.convergence();
                if convergence >= threshold {
                    info!(generation, convergence, threshold, "Converged");
                    stop_reason = StopReason::Converged { convergence };
                    break;
                }
            }
            generation += 1;
        }

        Ok(LoopOutcome {
            population,
            tracker,
            generations_run,
            stop_reason,
            evaluator_prompt: evaluator_record.map(|record| record.content().to_string()),
            reports,
        })
    }

    /// Build the next population, one child per evaluated slot
    async fn optimize_population(
        &self,
        population: &[PromptRecord],
        evaluations: &HashMap<PromptId, Result<EvaluationResult, EvaluationError>>,
    ) -> Vec<PromptRecord> {
        let mut children: HashMap<PromptId, PromptRecord> = stream::iter(population)
            .filter_map(|record| async move {
                match evaluations.get(&record.id) {
                    Some(Ok(result)) => Some((record, result)),
                    Some(Err(e)) => {
                        warn!(prompt_id = %record.id, error = %e, "Skipping slot this round");
                        metrics::counter!("evoprompt_fallbacks_total", "stage" => "skipped")
                            .increment(1);
                        None
                    }
                    None => None,
                }
            })
            .map(|(record, result)| async move {
                let content = self
                    .optimizer
                    .optimize(record, &result.feedback, result.score)
                    .await;
                (
                    record.id,
                    record.evolve(&content, result.score, &result.feedback),
                )
            })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        population
            .iter()
            .map(|record| children.remove(&record.id).unwrap_or_else(|| record.clone()))
            .collect()
    }

    /// Rewrite the evaluator template from this generation's feedback
    async fn evolve_evaluator_prompt(
        &mut self,
        record: &mut PromptRecord,
        population: &[PromptRecord],
        evaluations: &HashMap<PromptId, Result<EvaluationResult, EvaluationError>>,
    ) {
        let scored: Vec<&EvaluationResult> = population
            .iter()
            .filter_map(|slot| evaluations.get(&slot.id)?.as_ref().ok())
            .collect();
        if scored.is_empty() {
            return;
        }

        let mean = scored.iter().map(|r| r.score).sum::<f64>() / scored.len() as f64;
        let feedback = scored
            .iter()
            .map(|r| format!("- {}", r.feedback))
            .collect::<Vec<_>>()
            .join("\n");

        let candidate = self.optimizer.optimize(record, &feedback, mean).await;
        if !candidate.contains(INPUT_PLACEHOLDER) || !candidate.contains(CONTENT_PLACEHOLDER) {
            warn!("Rewritten evaluator prompt lost a placeholder, keeping current template");
            return;
        }

        *record = record.evolve(&candidate, mean, &feedback);
        self.evaluator.set_current_prompt(record.content());
        debug!(generation = record.generation(), "Installed evolved evaluator prompt");
    }

    async fn persist_outputs(
        &self,
        store: &dyn AnnotationStore,
        population: &[PromptRecord],
        outputs: &[GeneratedOutput],
        evaluator_prompt: Option<(&str, u32)>,
        input: &str,
        round_id: Uuid,
    ) {
        let prompts: HashMap<PromptId, &PromptRecord> =
            population.iter().map(|record| (record.id, record)).collect();

        for output in outputs {
            let Some(record) = prompts.get(&output.prompt_id) else {
                continue;
            };
            let stored = store
                .store_record(NewAnnotation {
                    input,
                    content: &output.content,
                    generator_prompt: record.content(),
                    evaluator_prompt: evaluator_prompt.map(|(text, _)| text),
                    evaluator_generation: evaluator_prompt.map_or(0, |(_, generation)| generation),
                    prompt_generation: record.generation(),
                    round_id,
                })
                .await;
            if stored.is_none() {
                warn!(store = store.name(), prompt_id = %record.id, "Output was not stored");
            }
        }
    }
}

/// Library entry point: run the loop with default settings for everything
/// but the budget and threshold
pub async fn optimize_prompts<G, E, O>(
    population: Vec<PromptRecord>,
    inputs: &[String],
    max_generations: u32,
    convergence_threshold: Option<f64>,
    generator: G,
    evaluator: E,
    optimizer: O,
) -> Result<LoopOutcome, LoopError>
where
    G: ContentGenerator,
    E: Evaluator,
    O: PromptOptimizer,
{
    let config = LoopConfig {
        max_generations,
        convergence_threshold,
        ..Default::default()
    };
    OptimizationLoop::new(generator, evaluator, optimizer, config)
        .run(population, inputs)
        .await
}

/// Rebuild a seed population from the latest stored generation of `prompt_type`
pub async fn population_from_store(
    store: &dyn AnnotationStore,
    prompt_type: PromptType,
) -> Result<Vec<PromptRecord>, StorageError> {
    let prompts = store.get_prompts_from_records(prompt_type).await?;
    let Some(latest) = prompts.iter().map(|p| p.generation).max() else {
        return Ok(Vec::new());
    };

    Ok(prompts
        .iter()
        .filter(|p| p.generation == latest)
        .map(|p| PromptRecord::with_generation(&p.content, p.generation))
        .collect())
}
