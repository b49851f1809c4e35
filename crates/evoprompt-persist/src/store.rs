//! Annotation store trait, record types and the in-memory backend

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use uuid::Uuid;

/// Identifier of a stored generation output
pub type RecordId = Uuid;

/// Storage error types
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Which side of the loop a stored prompt belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptType {
    Generator,
    Evaluator,
}

impl PromptType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generator => "generator",
            Self::Evaluator => "evaluator",
        }
    }

    pub fn parse(value: &str) -> Result<Self, StorageError> {
        match value {
            "generator" => Ok(Self::Generator),
            "evaluator" => Ok(Self::Evaluator),
            other => Err(StorageError::Serialization(format!(
                "unknown prompt type '{}'",
                other
            ))),
        }
    }
}

/// Everything needed to store one generated output
#[derive(Debug, Clone, Copy)]
pub struct NewAnnotation<'a> {
    pub input: &'a str,
    pub content: &'a str,
    pub generator_prompt: &'a str,
    pub evaluator_prompt: Option<&'a str>,
    /// Generation of the evaluator prompt's own lineage
    pub evaluator_generation: u32,
    /// Generation of the generator prompt
    pub prompt_generation: u32,
    pub round_id: Uuid,
}

/// A prompt version referenced by at least one stored output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredPrompt {
    pub id: Uuid,
    pub prompt_type: PromptType,
    pub content: String,
    pub generation: u32,
}

/// A stored generation output with the prompts that produced it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationRecord {
    pub id: RecordId,
    pub round_id: Uuid,
    pub input: String,
    pub content: String,
    pub generator_prompt_id: Uuid,
    pub evaluator_prompt_id: Option<Uuid>,
    pub prompt_generation: u32,
    pub created_at: DateTime<Utc>,
}

/// Persistence collaborator for optimization runs.
///
/// `store_record` never fails outward: a backend error is logged and
/// reported as `None` so a flaky store cannot halt the loop.
#[async_trait]
pub trait AnnotationStore: Send + Sync + Debug {
    /// Get the backend name
    fn name(&self) -> &str;

    /// Store an output; `None` if the backend rejected it
    async fn store_record(&self, record: NewAnnotation<'_>) -> Option<RecordId>;

    /// Text of a stored prompt
    async fn get_prompt_text(&self, prompt_id: Uuid) -> Result<String, StorageError>;

    /// A stored output by id
    async fn get_output(&self, output_id: RecordId) -> Result<AnnotationRecord, StorageError>;

    /// Prompts of one type, ordered by generation then first appearance
    async fn get_prompts_from_records(
        &self,
        prompt_type: PromptType,
    ) -> Result<Vec<StoredPrompt>, StorageError>;
}

#[derive(Debug, Default)]
struct MemoryState {
    prompts: Vec<StoredPrompt>,
    records: Vec<AnnotationRecord>,
}

impl MemoryState {
    fn intern(&mut self, prompt_type: PromptType, content: &str, generation: u32) -> Uuid {
        if let Some(existing) = self.prompts.iter().find(|p| {
            p.prompt_type == prompt_type && p.content == content && p.generation == generation
        }) {
            return existing.id;
        }
        let id = Uuid::new_v4();
        self.prompts.push(StoredPrompt {
            id,
            prompt_type,
            content: content.to_string(),
            generation,
        });
        id
    }
}

/// In-memory annotation store (for testing)
#[derive(Debug, Default)]
pub struct MemoryAnnotationStore {
    state: tokio::sync::RwLock<MemoryState>,
}

impl MemoryAnnotationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored outputs
    pub async fn len(&self) -> usize {
        self.state.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl AnnotationStore for MemoryAnnotationStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn store_record(&self, record: NewAnnotation<'_>) -> Option<RecordId> {
        let mut state = self.state.write().await;
        let generator_prompt_id = state.intern(
            PromptType::Generator,
            record.generator_prompt,
            record.prompt_generation,
        );
        let evaluator_prompt_id = record
            .evaluator_prompt
            .map(|text| state.intern(PromptType::Evaluator, text, record.evaluator_generation));

        let id = Uuid::new_v4();
        state.records.push(AnnotationRecord {
            id,
            round_id: record.round_id,
            input: record.input.to_string(),
            content: record.content.to_string(),
            generator_prompt_id,
            evaluator_prompt_id,
            prompt_generation: record.prompt_generation,
            created_at: Utc::now(),
        });
        Some(id)
    }

    async fn get_prompt_text(&self, prompt_id: Uuid) -> Result<String, StorageError> {
        let state = self.state.read().await;
        state
            .prompts
            .iter()
            .find(|p| p.id == prompt_id)
            .map(|p| p.content.clone())
            .ok_or_else(|| StorageError::NotFound(format!("prompt {}", prompt_id)))
    }

    async fn get_output(&self, output_id: RecordId) -> Result<AnnotationRecord, StorageError> {
        let state = self.state.read().await;
        state
            .records
            .iter()
            .find(|r| r.id == output_id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("output {}", output_id)))
    }

    async fn get_prompts_from_records(
        &self,
        prompt_type: PromptType,
    ) -> Result<Vec<StoredPrompt>, StorageError> {
        let state = self.state.read().await;
        let mut prompts: Vec<StoredPrompt> = state
            .prompts
            .iter()
            .filter(|p| p.prompt_type == prompt_type)
            .cloned()
            .collect();
        // Stable sort keeps first-appearance order within a generation
        prompts.sort_by_key(|p| p.generation);
        Ok(prompts)
    }
}
