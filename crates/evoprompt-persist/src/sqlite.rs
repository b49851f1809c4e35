//! SQLite annotation store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::str::FromStr;
use tracing::{info, warn};
use uuid::Uuid;

use crate::store::{
    AnnotationRecord, AnnotationStore, NewAnnotation, PromptType, RecordId, StorageError,
    StoredPrompt,
};

/// SQLite configuration options
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// Database URL (e.g., "sqlite:runs.db?mode=rwc" or "sqlite::memory:")
    pub url: String,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Enable WAL journal mode for better concurrency
    pub wal_mode: bool,
    /// Busy timeout in seconds
    pub busy_timeout_secs: u32,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:evoprompt.db?mode=rwc".to_string(),
            max_connections: 5,
            wal_mode: true,
            busy_timeout_secs: 30,
        }
    }
}

impl SqliteConfig {
    /// Create config for in-memory database (testing)
    pub fn memory() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
            // Each connection to :memory: is a separate database
            max_connections: 1,
            wal_mode: false,
            busy_timeout_secs: 5,
        }
    }
}

/// SQLite-backed annotation store
#[derive(Debug, Clone)]
pub struct SqliteAnnotationStore {
    pool: SqlitePool,
}

fn query_err(e: sqlx::Error) -> StorageError {
    StorageError::Query(e.to_string())
}

fn parse_uuid(value: &str) -> Result<Uuid, StorageError> {
    Uuid::parse_str(value).map_err(|e| StorageError::Serialization(e.to_string()))
}

impl SqliteAnnotationStore {
    /// Connect with default settings
    pub async fn new(url: &str) -> Result<Self, StorageError> {
        Self::new_with_config(SqliteConfig {
            url: url.to_string(),
            ..Default::default()
        })
        .await
    }

    /// Connect and run migrations
    pub async fn new_with_config(config: SqliteConfig) -> Result<Self, StorageError> {
        let mut options = SqliteConnectOptions::from_str(&config.url)
            .map_err(|e| StorageError::Connection(e.to_string()))?
            .pragma("foreign_keys", "ON")
            .pragma("busy_timeout", config.busy_timeout_secs.to_string());

        if config.wal_mode {
            options = options.pragma("journal_mode", "WAL");
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        info!(url = %config.url, wal = config.wal_mode, "Connected to SQLite");

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StorageError::Internal(format!("Migration failed: {}", e)))?;

        Ok(Self { pool })
    }

    /// Wrap an existing, already migrated pool
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn intern_prompt(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        prompt_type: PromptType,
        content: &str,
        generation: u32,
    ) -> Result<Uuid, StorageError> {
        sqlx::query(
            "INSERT INTO prompts (id, prompt_type, content, generation, created_at) \
             VALUES (?, ?, ?, ?, ?) \
             ON CONFLICT (prompt_type, content, generation) DO NOTHING",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(prompt_type.as_str())
        .bind(content)
        .bind(generation as i64)
        .bind(Utc::now())
        .execute(&mut **tx)
        .await
        .map_err(query_err)?;

        let row = sqlx::query(
            "SELECT id FROM prompts WHERE prompt_type = ? AND content = ? AND generation = ?",
        )
        .bind(prompt_type.as_str())
        .bind(content)
        .bind(generation as i64)
        .fetch_one(&mut **tx)
        .await
        .map_err(query_err)?;

        let id: String = row.try_get("id").map_err(query_err)?;
        parse_uuid(&id)
    }

    async fn try_store(&self, record: NewAnnotation<'_>) -> Result<RecordId, StorageError> {
        let mut tx = self.pool.begin().await.map_err(query_err)?;

        let generator_prompt_id = Self::intern_prompt(
            &mut tx,
            PromptType::Generator,
            record.generator_prompt,
            record.prompt_generation,
        )
        .await?;
        let evaluator_prompt_id = match record.evaluator_prompt {
            Some(text) => Some(
                Self::intern_prompt(&mut tx, PromptType::Evaluator, text, record.evaluator_generation)
                    .await?,
            ),
            None => None,
        };

        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO annotations \
             (id, round_id, input, content, generator_prompt_id, evaluator_prompt_id, prompt_generation, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(record.round_id.to_string())
        .bind(record.input)
        .bind(record.content)
        .bind(generator_prompt_id.to_string())
        .bind(evaluator_prompt_id.map(|id| id.to_string()))
        .bind(record.prompt_generation as i64)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await
        .map_err(query_err)?;

        tx.commit().await.map_err(query_err)?;
        Ok(id)
    }

    fn annotation_from_row(row: &SqliteRow) -> Result<AnnotationRecord, StorageError> {
        let id: String = row.try_get("id").map_err(query_err)?;
        let round_id: String = row.try_get("round_id").map_err(query_err)?;
        let generator_prompt_id: String = row.try_get("generator_prompt_id").map_err(query_err)?;
        let evaluator_prompt_id: Option<String> =
            row.try_get("evaluator_prompt_id").map_err(query_err)?;
        let prompt_generation: i64 = row.try_get("prompt_generation").map_err(query_err)?;
        let created_at: DateTime<Utc> = row.try_get("created_at").map_err(query_err)?;

        Ok(AnnotationRecord {
            id: parse_uuid(&id)?,
            round_id: parse_uuid(&round_id)?,
            input: row.try_get("input").map_err(query_err)?,
            content: row.try_get("content").map_err(query_err)?,
            generator_prompt_id: parse_uuid(&generator_prompt_id)?,
            evaluator_prompt_id: evaluator_prompt_id.as_deref().map(parse_uuid).transpose()?,
            prompt_generation: prompt_generation as u32,
            created_at,
        })
    }
}

#[async_trait]
impl AnnotationStore for SqliteAnnotationStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn store_record(&self, record: NewAnnotation<'_>) -> Option<RecordId> {
        match self.try_store(record).await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(error = %e, round_id = %record.round_id, "Failed to store annotation record");
                None
            }
        }
    }

    async fn get_prompt_text(&self, prompt_id: Uuid) -> Result<String, StorageError> {
        let row = sqlx::query("SELECT content FROM prompts WHERE id = ?")
            .bind(prompt_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(query_err)?
            .ok_or_else(|| StorageError::NotFound(format!("prompt {}", prompt_id)))?;
        row.try_get("content").map_err(query_err)
    }

    async fn get_output(&self, output_id: RecordId) -> Result<AnnotationRecord, StorageError> {
        let row = sqlx::query(
            "SELECT id, round_id, input, content, generator_prompt_id, evaluator_prompt_id, \
             prompt_generation, created_at FROM annotations WHERE id = ?",
        )
        .bind(output_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(query_err)?
        .ok_or_else(|| StorageError::NotFound(format!("output {}", output_id)))?;

        Self::annotation_from_row(&row)
    }

    async fn get_prompts_from_records(
        &self,
        prompt_type: PromptType,
    ) -> Result<Vec<StoredPrompt>, StorageError> {
        let rows = sqlx::query(
            "SELECT id, prompt_type, content, generation FROM prompts \
             WHERE prompt_type = ? ORDER BY generation ASC, rowid ASC",
        )
        .bind(prompt_type.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(query_err)?;

        rows.iter()
            .map(|row| {
                let id: String = row.try_get("id").map_err(query_err)?;
                let kind: String = row.try_get("prompt_type").map_err(query_err)?;
                let generation: i64 = row.try_get("generation").map_err(query_err)?;
                Ok(StoredPrompt {
                    id: parse_uuid(&id)?,
                    prompt_type: PromptType::parse(&kind)?,
                    content: row.try_get("content").map_err(query_err)?,
                    generation: generation as u32,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sqlite_store() {
        let store = SqliteAnnotationStore::new_with_config(SqliteConfig::memory())
            .await
            .unwrap();

        let round_id = Uuid::new_v4();
        let id = store
            .store_record(NewAnnotation {
                input: "Describe autumn",
                content: "Leaves fall.",
                generator_prompt: "Write vividly",
                evaluator_prompt: None,
                evaluator_generation: 0,
                prompt_generation: 2,
                round_id,
            })
            .await
            .unwrap();

        let record = store.get_output(id).await.unwrap();
        assert_eq!(record.round_id, round_id);
        assert_eq!(record.prompt_generation, 2);
        assert!(record.evaluator_prompt_id.is_none());
        assert_eq!(
            store.get_prompt_text(record.generator_prompt_id).await.unwrap(),
            "Write vividly"
        );
    }
}
