//! SQLite record of per-bucket aggregated size.

use super::size::SizeSink;
use crate::models::bucket::BucketRecord;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

const INIT_MIGRATION: &str = include_str!("../../migrations/0001_init.sql");

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("size {0} does not fit the metadata column")]
    SizeOutOfRange(u64),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type MetadataResult<T> = Result<T, MetadataError>;

#[derive(Clone, Debug)]
pub struct BucketMetadataStore {
    pub db: Arc<SqlitePool>,
}

impl BucketMetadataStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Apply the embedded schema. Statements are split on `;` and run in
    /// order; every statement is idempotent.
    pub async fn migrate(&self) -> MetadataResult<()> {
        let statements = migration_statements(INIT_MIGRATION);
        info!(count = statements.len(), "running migration statements");
        for stmt in statements {
            debug!(sql = stmt, "executing migration statement");
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(())
    }

    /// Cheap liveness probe used by the readiness check.
    pub async fn ping(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&*self.db).await?;
        Ok(())
    }

    pub async fn get(&self, bucket: &str) -> MetadataResult<Option<BucketRecord>> {
        let record = sqlx::query_as::<_, BucketRecord>(
            "SELECT id, name, size_bytes, updated_at FROM buckets WHERE name = ?",
        )
        .bind(bucket)
        .fetch_optional(&*self.db)
        .await?;
        Ok(record)
    }

    /// Last persisted size of `bucket`, if it was ever recorded.
    pub async fn get_size(&self, bucket: &str) -> MetadataResult<Option<u64>> {
        Ok(self
            .get(bucket)
            .await?
            .map(|record| u64::try_from(record.size_bytes).unwrap_or_default()))
    }

    /// Insert or overwrite the size of `bucket`.
    pub async fn upsert_size(&self, bucket: &str, size_bytes: u64) -> MetadataResult<()> {
        let stored =
            i64::try_from(size_bytes).map_err(|_| MetadataError::SizeOutOfRange(size_bytes))?;
        sqlx::query(
            "INSERT INTO buckets (id, name, size_bytes, updated_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(name) DO UPDATE
             SET size_bytes = excluded.size_bytes, updated_at = excluded.updated_at",
        )
        .bind(Uuid::new_v4())
        .bind(bucket)
        .bind(stored)
        .bind(Utc::now())
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    /// Drop the record of a removed bucket. Returns whether a row existed.
    pub async fn forget(&self, bucket: &str) -> MetadataResult<bool> {
        let result = sqlx::query("DELETE FROM buckets WHERE name = ?")
            .bind(bucket)
            .execute(&*self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl SizeSink for BucketMetadataStore {
    async fn record_size(&self, bucket: &str, size_bytes: u64) -> MetadataResult<()> {
        self.upsert_size(bucket, size_bytes).await
    }
}

fn migration_statements(sql: &str) -> Vec<&str> {
    sql.split(';')
        .map(str::trim)
        .filter(|stmt| {
            stmt.lines()
                .any(|line| !line.trim().is_empty() && !line.trim_start().starts_with("--"))
        })
        .collect()
}
