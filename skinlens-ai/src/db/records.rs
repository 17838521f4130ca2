//! Write-once persistence of canonical analysis records

use super::retry::retry_on_lock;
use crate::types::AnalysisRecord;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Longest a save waits out SQLite lock contention
const MAX_LOCK_WAIT: Duration = Duration::from_millis(5000);

#[derive(Debug, Error)]
pub enum StoreError {
    /// Records are write-once
    #[error("analysis record {0} already stored")]
    Duplicate(Uuid),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("record serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub(crate) fn is_locked(&self) -> bool {
        match self {
            StoreError::Database(err) => err.to_string().contains("database is locked"),
            _ => false,
        }
    }
}

/// Persistence boundary for canonical records
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Store a new record; an id that already exists is rejected
    async fn save(&self, record: &AnalysisRecord) -> Result<(), StoreError>;

    async fn fetch(&self, id: Uuid) -> Result<Option<AnalysisRecord>, StoreError>;
}

#[derive(Clone)]
pub struct SqliteRecordStore {
    pool: SqlitePool,
}

impl SqliteRecordStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Number of stored records
    pub async fn count(&self) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM analysis_records")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn save(&self, record: &AnalysisRecord) -> Result<(), StoreError> {
        // Prepare all data before touching the database
        let id = record.id.to_string();
        let tier = record.tier.as_str();
        let is_fallback = record.is_fallback as i64;
        let json = serde_json::to_string(record)?;
        let created_at = record.created_at.to_rfc3339();

        retry_on_lock("save_analysis_record", MAX_LOCK_WAIT, || async {
            sqlx::query(
                r#"
                INSERT INTO analysis_records (id, tier, is_fallback, record, created_at)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(&id)
            .bind(tier)
            .bind(is_fallback)
            .bind(&json)
            .bind(&created_at)
            .execute(&self.pool)
            .await
            .map_err(|err| match &err {
                sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                    StoreError::Duplicate(record.id)
                }
                _ => StoreError::Database(err),
            })?;
            Ok(())
        })
        .await?;

        tracing::debug!(record_id = %record.id, tier, "Persisted analysis record");
        Ok(())
    }

    async fn fetch(&self, id: Uuid) -> Result<Option<AnalysisRecord>, StoreError> {
        let row = sqlx::query("SELECT record FROM analysis_records WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let json: String = row.get("record");
                Ok(Some(serde_json::from_str(&json)?))
            }
            None => Ok(None),
        }
    }
}
