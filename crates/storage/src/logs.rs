//! Per-instance append-only log store.

use {
    async_trait::async_trait,
    sqlx::{Row, SqlitePool, sqlite::SqliteRow},
    wagate_common::{Result, unix_now_ms},
};

use crate::types::{InstanceLogRecord, LogLevel};

const DEFAULT_LIMIT: i64 = 200;

/// Persistent storage for instance log lines.
#[async_trait]
pub trait InstanceLogStore: Send + Sync {
    async fn append(&self, instance_id: &str, level: LogLevel, message: &str) -> Result<()>;
    /// Newest first.
    async fn list(
        &self,
        instance_id: &str,
        level: Option<LogLevel>,
        limit: Option<i64>,
    ) -> Result<Vec<InstanceLogRecord>>;
    async fn delete_older_than(&self, cutoff_ms: i64) -> Result<u64>;
}

/// sqlx-backed instance log store.
pub struct SqliteInstanceLogStore {
    pool: SqlitePool,
}

impl SqliteInstanceLogStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn row_to_record(row: &SqliteRow) -> Result<InstanceLogRecord> {
    let level: String = row.get("level");
    Ok(InstanceLogRecord {
        id: row.get("id"),
        instance_id: row.get("instance_id"),
        level: LogLevel::parse(&level)?,
        message: row.get("message"),
        created_at_ms: row.get("created_at_ms"),
    })
}

#[async_trait]
impl InstanceLogStore for SqliteInstanceLogStore {
    async fn append(&self, instance_id: &str, level: LogLevel, message: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO instance_logs (instance_id, level, message, created_at_ms)
             VALUES (?, ?, ?, ?)",
        )
        .bind(instance_id)
        .bind(level.as_str())
        .bind(message)
        .bind(unix_now_ms())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list(
        &self,
        instance_id: &str,
        level: Option<LogLevel>,
        limit: Option<i64>,
    ) -> Result<Vec<InstanceLogRecord>> {
        let level_scope = level.map(|l| l.as_str().to_string()).unwrap_or_default();
        let rows = sqlx::query(
            "SELECT * FROM instance_logs
             WHERE instance_id = ? AND (? = '' OR level = ?)
             ORDER BY id DESC LIMIT ?",
        )
        .bind(instance_id)
        .bind(&level_scope)
        .bind(&level_scope)
        .bind(limit.unwrap_or(DEFAULT_LIMIT))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_record).collect()
    }

    async fn delete_older_than(&self, cutoff_ms: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM instance_logs WHERE created_at_ms < ?")
            .bind(cutoff_ms)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
