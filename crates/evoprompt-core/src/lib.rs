//! # evoprompt Core
//!
//! Core types for feedback-driven prompt evolution:
//! - [`PromptRecord`] — Prompt content, fitness and append-only lineage history
//! - [`EvaluationResult`] — Score and critique parsed from an evaluator response
//! - [`PerformanceTracker`] — Per-generation statistics and the convergence heuristic

pub mod evaluation;
pub mod prompt;
pub mod tracker;

pub use evaluation::{EvaluationResult, FALLBACK_SCORE};
pub use prompt::{truncate_chars, HistoryEntry, PromptId, PromptRecord};
pub use tracker::{
    convergence_from_means, GenerationSnapshot, LineageRecord, PerformanceMetrics,
    PerformanceTracker, PromptPreview, TrackerError,
};
