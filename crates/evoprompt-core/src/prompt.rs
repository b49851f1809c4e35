//! Prompt records for evoprompt
//!
//! A [`PromptRecord`] is the unit of evolution: the current prompt text, the
//! latest score and feedback it earned, and an append-only history of every
//! state it has been in.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identifier for a lineage slot.
///
/// The id survives every update and is what trackers and stores key on.
pub type PromptId = Uuid;

/// A superseded state of a prompt record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Content before the update
    pub content: String,
    /// Score before the update
    pub score: f64,
    /// Feedback before the update
    pub feedback: String,
}

/// A prompt together with its fitness and lineage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptRecord {
    /// Lineage identifier (unchanged across updates)
    pub id: PromptId,
    /// Rubric key used for target-specific evaluation
    pub target: Option<String>,
    /// When this record (or child) was created
    pub created_at: DateTime<Utc>,
    content: String,
    score: f64,
    generation: u32,
    feedback: String,
    history: Vec<HistoryEntry>,
}

impl PromptRecord {
    /// Create a seed record at generation 0
    pub fn new(content: &str) -> Self {
        Self::with_generation(content, 0)
    }

    /// Create a seed record starting at an injected generation
    pub fn with_generation(content: &str, generation: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            target: None,
            created_at: Utc::now(),
            content: content.to_string(),
            score: 0.0,
            generation,
            feedback: String::new(),
            history: Vec::new(),
        }
    }

    /// Attach a rubric target
    pub fn with_target(mut self, target: &str) -> Self {
        self.target = Some(target.to_string());
        self
    }

    /// Use a caller-assigned identifier
    pub fn with_id(mut self, id: PromptId) -> Self {
        self.id = id;
        self
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn score(&self) -> f64 {
        self.score
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn feedback(&self) -> &str {
        &self.feedback
    }

    /// Superseded states, oldest first
    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    /// Snapshot the current state into history, then overwrite it.
    ///
    /// This is the only way a record's content, score or feedback changes.
    /// The generation is incremented by exactly one.
    pub fn update(&mut self, content: &str, score: f64, feedback: &str) {
        let previous = HistoryEntry {
            content: std::mem::replace(&mut self.content, content.to_string()),
            score: self.score,
            feedback: std::mem::replace(&mut self.feedback, feedback.to_string()),
        };
        self.history.push(previous);
        self.score = score;
        self.generation += 1;
    }

    /// Produce the next generation of this lineage without touching `self`
    pub fn evolve(&self, content: &str, score: f64, feedback: &str) -> Self {
        let mut child = self.clone();
        child.created_at = Utc::now();
        child.update(content, score, feedback);
        child
    }

    /// Truncated content for logs and snapshots
    pub fn preview(&self, max_chars: usize) -> String {
        truncate_chars(&self.content, max_chars)
    }
}

/// Truncate on a character boundary, appending `...` when shortened
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_new_record() {
        let record = PromptRecord::new("Write a haiku");
        assert_eq!(record.generation(), 0);
        assert_eq!(record.score(), 0.0);
        assert_eq!(record.feedback(), "");
        assert!(record.history().is_empty());
    }

    #[test]
    fn test_update_snapshots_previous_state() {
        let mut record = PromptRecord::new("v1");
        record.update("v2", 2.5, "too long");
        record.update("v3", 4.0, "better");

        assert_eq!(record.content(), "v3");
        assert_eq!(record.score(), 4.0);
        assert_eq!(record.feedback(), "better");
        assert_eq!(record.generation(), 2);
        assert_eq!(
            record.history(),
            &[
                HistoryEntry {
                    content: "v1".to_string(),
                    score: 0.0,
                    feedback: String::new()
                },
                HistoryEntry {
                    content: "v2".to_string(),
                    score: 2.5,
                    feedback: "too long".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_evolve_leaves_parent_untouched() {
        let parent = PromptRecord::new("parent").with_target("summary");
        let child = parent.evolve("child", 3.5, "ok");

        assert_eq!(parent.content(), "parent");
        assert_eq!(parent.generation(), 0);
        assert_eq!(child.id, parent.id);
        assert_eq!(child.target.as_deref(), Some("summary"));
        assert_eq!(child.generation(), 1);
        assert_eq!(child.history()[0].content, "parent");
    }

    #[test]
    fn test_injected_generation() {
        let mut record = PromptRecord::with_generation("resumed", 7);
        record.update("next", 1.0, "");
        assert_eq!(record.generation(), 8);
        assert_eq!(record.history().len(), 1);
    }

    #[test]
    fn test_truncate_chars_is_char_safe() {
        assert_eq!(truncate_chars("short", 10), "short");
        assert_eq!(truncate_chars("héllo wörld", 5), "héllo...");
    }

    proptest! {
        #[test]
        fn history_length_tracks_generation(
            updates in proptest::collection::vec((".{0,20}", 0.0f64..5.0, ".{0,20}"), 0..30)
        ) {
            let mut record = PromptRecord::new("seed");
            for (content, score, feedback) in &updates {
                let before = (record.content().to_string(), record.score(), record.feedback().to_string());
                record.update(content, *score, feedback);
                let last = record.history().last().cloned().unwrap();
                prop_assert_eq!((last.content, last.score, last.feedback), before);
            }
            prop_assert_eq!(record.history().len(), record.generation() as usize);
            prop_assert_eq!(record.generation() as usize, updates.len());
        }
    }
}
