//! Per-generation performance tracking and the convergence heuristic
//!
//! The tracker keeps an append-only log of [`GenerationSnapshot`]s plus a
//! per-lineage audit trail keyed by [`PromptId`]. It is bookkeeping only:
//! every method is total and an empty population degrades to zeros.
//!
//! # Convergence
//!
//! [`convergence_from_means`] is a plateau heuristic, not a statistical test.
//! It looks at the mean scores of the last three generations: identical means
//! give 1.0, otherwise the average of the two consecutive deltas is mapped to
//! `max(0, 1 - |avg| * 10)`. Fewer than three generations give 0.0.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::prompt::{truncate_chars, PromptId, PromptRecord};

/// Characters of prompt content kept in a snapshot preview
pub const SNAPSHOT_PREVIEW_CHARS: usize = 100;
/// Characters of prompt content kept in a lineage record
pub const LINEAGE_PREVIEW_CHARS: usize = 50;
/// Number of trailing generations the convergence heuristic inspects
pub const CONVERGENCE_WINDOW: usize = 3;

#[derive(Debug, Error, PartialEq)]
pub enum TrackerError {
    #[error("generation {got} is not after the last recorded generation {last}")]
    NonMonotonicGeneration { last: u32, got: u32 },
}

/// A prompt as it looked when a snapshot was taken
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptPreview {
    pub id: PromptId,
    pub content: String,
    pub score: f64,
}

/// Aggregate statistics for one generation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationSnapshot {
    pub generation: u32,
    pub mean_score: f64,
    pub max_score: f64,
    pub min_score: f64,
    pub prompts: Vec<PromptPreview>,
    pub recorded_at: DateTime<Utc>,
}

impl GenerationSnapshot {
    fn from_prompts(generation: u32, prompts: &[PromptRecord]) -> Self {
        let (mean_score, max_score, min_score) = if prompts.is_empty() {
            (0.0, 0.0, 0.0)
        } else {
            let scores = prompts.iter().map(PromptRecord::score);
            let sum: f64 = scores.clone().sum();
            let max = scores.clone().fold(f64::NEG_INFINITY, f64::max);
            let min = scores.fold(f64::INFINITY, f64::min);
            (sum / prompts.len() as f64, max, min)
        };

        Self {
            generation,
            mean_score,
            max_score,
            min_score,
            prompts: prompts
                .iter()
                .map(|p| PromptPreview {
                    id: p.id,
                    content: p.preview(SNAPSHOT_PREVIEW_CHARS),
                    score: p.score(),
                })
                .collect(),
            recorded_at: Utc::now(),
        }
    }
}

/// Audit trail of one lineage across generations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineageRecord {
    /// Generation in which the lineage was first recorded
    pub first_generation: u32,
    /// Content preview from the first recording
    pub preview: String,
    /// Every generation the lineage appeared in
    pub generations: Vec<u32>,
    /// Score at each of those generations
    pub scores: Vec<f64>,
}

impl LineageRecord {
    pub fn best_score(&self) -> Option<f64> {
        self.scores.iter().copied().reduce(f64::max)
    }
}

/// Summary returned by [`PerformanceTracker::metrics`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PerformanceMetrics {
    /// Nothing has been recorded yet
    NoData,
    Available {
        current_generation: u32,
        /// Latest mean minus first mean
        score_improvement: f64,
        /// Highest max score over all snapshots
        best_score: f64,
        convergence: f64,
    },
}

impl PerformanceMetrics {
    pub fn convergence(&self) -> f64 {
        match self {
            Self::NoData => 0.0,
            Self::Available { convergence, .. } => *convergence,
        }
    }
}

/// Append-only log of generation snapshots with lineage bookkeeping
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerformanceTracker {
    snapshots: Vec<GenerationSnapshot>,
    lineages: HashMap<PromptId, LineageRecord>,
}

impl PerformanceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a generation under a caller-supplied number.
    ///
    /// The number is used verbatim but must be strictly greater than the
    /// last recorded one; past snapshots are never rewritten.
    pub fn record(
        &mut self,
        generation: u32,
        prompts: &[PromptRecord],
    ) -> Result<&GenerationSnapshot, TrackerError> {
        if let Some(last) = self.last_generation() {
            if generation <= last {
                return Err(TrackerError::NonMonotonicGeneration {
                    last,
                    got: generation,
                });
            }
        }
        Ok(self.push(generation, prompts))
    }

    /// Record a generation, deriving its number as `max + 1` (0 when empty)
    pub fn record_generation_from_evaluations(
        &mut self,
        prompts: &[PromptRecord],
    ) -> &GenerationSnapshot {
        let generation = self.last_generation().map_or(0, |g| g + 1);
        self.push(generation, prompts)
    }

    fn push(&mut self, generation: u32, prompts: &[PromptRecord]) -> &GenerationSnapshot {
        for prompt in prompts {
            let lineage = self
                .lineages
                .entry(prompt.id)
                .or_insert_with(|| LineageRecord {
                    first_generation: generation,
                    preview: prompt.preview(LINEAGE_PREVIEW_CHARS),
                    generations: Vec::new(),
                    scores: Vec::new(),
                });
            lineage.generations.push(generation);
            lineage.scores.push(prompt.score());
        }

        let snapshot = GenerationSnapshot::from_prompts(generation, prompts);
        tracing::debug!(
            generation,
            mean = snapshot.mean_score,
            max = snapshot.max_score,
            min = snapshot.min_score,
            population = prompts.len(),
            "Recorded generation snapshot"
        );
        self.snapshots.push(snapshot);
        &self.snapshots[self.snapshots.len() - 1]
    }

    /// Highest generation recorded so far
    pub fn last_generation(&self) -> Option<u32> {
        self.snapshots.iter().map(|s| s.generation).max()
    }

    pub fn snapshots(&self) -> &[GenerationSnapshot] {
        &self.snapshots
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Plateau heuristic over the last three mean scores
    pub fn convergence(&self) -> f64 {
        let means: Vec<f64> = self.snapshots.iter().map(|s| s.mean_score).collect();
        convergence_from_means(&means)
    }

    pub fn metrics(&self) -> PerformanceMetrics {
        let (Some(first), Some(latest)) = (self.snapshots.first(), self.snapshots.last()) else {
            return PerformanceMetrics::NoData;
        };

        let best_score = self
            .snapshots
            .iter()
            .map(|s| s.max_score)
            .fold(f64::NEG_INFINITY, f64::max);

        PerformanceMetrics::Available {
            current_generation: latest.generation,
            score_improvement: latest.mean_score - first.mean_score,
            best_score,
            convergence: self.convergence(),
        }
    }

    pub fn lineage(&self, id: &PromptId) -> Option<&LineageRecord> {
        self.lineages.get(id)
    }

    pub fn lineages(&self) -> impl Iterator<Item = (&PromptId, &LineageRecord)> {
        self.lineages.iter()
    }

    /// Lineage holding the single highest recorded score
    pub fn best_lineage(&self) -> Option<(PromptId, f64)> {
        self.lineages
            .iter()
            .filter_map(|(id, lineage)| lineage.best_score().map(|score| (*id, score)))
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
    }
}

/// Convergence in [0, 1] from a series of per-generation mean scores
pub fn convergence_from_means(means: &[f64]) -> f64 {
    if means.len() < CONVERGENCE_WINDOW {
        return 0.0;
    }
    let window = &means[means.len() - CONVERGENCE_WINDOW..];
    if window[0] == window[1] && window[1] == window[2] {
        return 1.0;
    }

    let average_delta = ((window[1] - window[0]) + (window[2] - window[1])) / 2.0;
    if !average_delta.is_finite() {
        return 0.0;
    }
    (1.0 - average_delta.abs() * 10.0).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn scored(content: &str, score: f64) -> PromptRecord {
        let mut record = PromptRecord::new(content);
        record.update(content, score, "");
        record
    }

    #[test]
    fn test_record_aggregates() {
        let mut tracker = PerformanceTracker::new();
        let prompts = vec![scored("a", 1.0), scored("b", 4.0), scored("c", 2.5)];
        let snapshot = tracker.record(0, &prompts).unwrap();

        assert_eq!(snapshot.generation, 0);
        assert_eq!(snapshot.mean_score, 2.5);
        assert_eq!(snapshot.max_score, 4.0);
        assert_eq!(snapshot.min_score, 1.0);
        assert_eq!(snapshot.prompts.len(), 3);
    }

    #[test]
    fn test_empty_population_records_zeros() {
        let mut tracker = PerformanceTracker::new();
        let snapshot = tracker.record(0, &[]).unwrap();
        assert_eq!(snapshot.mean_score, 0.0);
        assert_eq!(snapshot.max_score, 0.0);
        assert_eq!(snapshot.min_score, 0.0);
    }

    #[test]
    fn test_rejects_non_increasing_generation() {
        let mut tracker = PerformanceTracker::new();
        tracker.record(2, &[]).unwrap();
        let err = tracker.record(2, &[]).unwrap_err();
        assert_eq!(err, TrackerError::NonMonotonicGeneration { last: 2, got: 2 });
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_incremental_generation_numbers() {
        let mut tracker = PerformanceTracker::new();
        assert_eq!(tracker.record_generation_from_evaluations(&[]).generation, 0);
        tracker.record(5, &[]).unwrap();
        assert_eq!(tracker.record_generation_from_evaluations(&[]).generation, 6);
    }

    #[test]
    fn test_metrics_no_data() {
        let tracker = PerformanceTracker::new();
        assert_eq!(tracker.metrics(), PerformanceMetrics::NoData);
        let json = serde_json::to_value(tracker.metrics()).unwrap();
        assert_eq!(json["status"], "no_data");
    }

    #[test]
    fn test_metrics_available() {
        let mut tracker = PerformanceTracker::new();
        tracker.record(0, &[scored("a", 1.0), scored("b", 3.0)]).unwrap();
        tracker.record(1, &[scored("a", 4.5), scored("b", 3.5)]).unwrap();

        match tracker.metrics() {
            PerformanceMetrics::Available {
                current_generation,
                score_improvement,
                best_score,
                convergence,
            } => {
                assert_eq!(current_generation, 1);
                assert_eq!(score_improvement, 2.0);
                assert_eq!(best_score, 4.5);
                assert_eq!(convergence, 0.0);
            }
            PerformanceMetrics::NoData => panic!("expected metrics"),
        }
    }

    #[test]
    fn test_convergence_plateau() {
        assert_eq!(convergence_from_means(&[2.0, 2.0, 2.0]), 1.0);
        assert_eq!(convergence_from_means(&[0.0, 5.0, 2.0, 2.0, 2.0]), 1.0);
    }

    #[test]
    fn test_convergence_volatile() {
        assert_eq!(convergence_from_means(&[1.0, 3.0, 5.0]), 0.0);
    }

    #[test]
    fn test_convergence_small_delta() {
        let c = convergence_from_means(&[3.0, 3.02, 3.04]);
        assert!((c - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_convergence_insufficient_data() {
        assert_eq!(convergence_from_means(&[]), 0.0);
        assert_eq!(convergence_from_means(&[4.0, 4.0]), 0.0);
    }

    #[test]
    fn test_lineage_tracking() {
        let mut tracker = PerformanceTracker::new();
        let seed = PromptRecord::new("lineage seed");
        let gen0 = seed.evolve("v1", 2.0, "meh");
        let gen1 = gen0.evolve("v2", 4.0, "good");
        let other = scored("other", 3.0);

        tracker.record(0, &[gen0.clone(), other.clone()]).unwrap();
        tracker.record(1, &[gen1, other.clone()]).unwrap();

        let lineage = tracker.lineage(&seed.id).unwrap();
        assert_eq!(lineage.first_generation, 0);
        assert_eq!(lineage.preview, "v1");
        assert_eq!(lineage.generations, vec![0, 1]);
        assert_eq!(lineage.scores, vec![2.0, 4.0]);
        assert_eq!(tracker.best_lineage(), Some((seed.id, 4.0)));
    }

    proptest! {
        #[test]
        fn convergence_is_bounded(means in proptest::collection::vec(0.0f64..5.0, 0..10)) {
            let c = convergence_from_means(&means);
            prop_assert!((0.0..=1.0).contains(&c));
        }

        #[test]
        fn convergence_non_increasing_in_volatility(base in 0.0f64..5.0, small in 0.0f64..1.0, extra in 0.0f64..1.0) {
            let large = small + extra;
            let calm = convergence_from_means(&[base, base + small, base + 2.0 * small]);
            let wild = convergence_from_means(&[base, base + large, base + 2.0 * large]);
            prop_assert!(wild <= calm + 1e-12);
        }
    }
}
