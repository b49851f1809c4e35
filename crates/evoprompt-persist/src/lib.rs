//! # evoprompt Persistence
//!
//! Storage for generated outputs and the prompt versions that produced them.
//!
//! Supports:
//! - In-memory (for testing)
//! - SQLite (default `sqlite` feature)

pub mod store;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use store::{
    AnnotationRecord, AnnotationStore, MemoryAnnotationStore, NewAnnotation, PromptType,
    RecordId, StorageError, StoredPrompt,
};
#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteAnnotationStore, SqliteConfig};
