//! Webhook subscription store.

use {
    async_trait::async_trait,
    sqlx::{Row, SqlitePool, sqlite::SqliteRow},
    wagate_common::{Error, Result},
};

use crate::types::WebhookRecord;

/// Persistent storage for webhook subscriptions.
#[async_trait]
pub trait WebhookStore: Send + Sync {
    async fn create(&self, record: &WebhookRecord) -> Result<()>;
    async fn find_by_id(&self, id: &str) -> Result<Option<WebhookRecord>>;
    async fn list_by_instance(&self, instance_id: &str) -> Result<Vec<WebhookRecord>>;
    /// Enabled subscriptions for one `(instance, event)` pair.
    async fn find_enabled(&self, instance_id: &str, event: &str) -> Result<Vec<WebhookRecord>>;
    async fn update(
        &self,
        id: &str,
        url: Option<&str>,
        event: Option<&str>,
        enabled: Option<bool>,
    ) -> Result<()>;
    async fn delete(&self, id: &str) -> Result<()>;
}

/// sqlx-backed webhook store.
pub struct SqliteWebhookStore {
    pool: SqlitePool,
}

impl SqliteWebhookStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn row_to_record(row: &SqliteRow) -> WebhookRecord {
    WebhookRecord {
        id: row.get("id"),
        instance_id: row.get("instance_id"),
        webhook_type: row.get("webhook_type"),
        event: row.get("event"),
        url: row.get("url"),
        enabled: row.get::<i64, _>("enabled") != 0,
        created_at_ms: row.get("created_at_ms"),
    }
}

#[async_trait]
impl WebhookStore for SqliteWebhookStore {
    async fn create(&self, record: &WebhookRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO webhooks (id, instance_id, webhook_type, event, url, enabled, created_at_ms)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(&record.instance_id)
        .bind(&record.webhook_type)
        .bind(&record.event)
        .bind(&record.url)
        .bind(record.enabled as i64)
        .bind(record.created_at_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<WebhookRecord>> {
        let row = sqlx::query("SELECT * FROM webhooks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_record))
    }

    async fn list_by_instance(&self, instance_id: &str) -> Result<Vec<WebhookRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM webhooks WHERE instance_id = ? ORDER BY created_at_ms",
        )
        .bind(instance_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_record).collect())
    }

    async fn find_enabled(&self, instance_id: &str, event: &str) -> Result<Vec<WebhookRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM webhooks
             WHERE instance_id = ? AND event = ? AND enabled = 1
             ORDER BY created_at_ms",
        )
        .bind(instance_id)
        .bind(event)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_record).collect())
    }

    async fn update(
        &self,
        id: &str,
        url: Option<&str>,
        event: Option<&str>,
        enabled: Option<bool>,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE webhooks SET
               url = COALESCE(?, url),
               event = COALESCE(?, event),
               enabled = COALESCE(?, enabled)
             WHERE id = ?",
        )
        .bind(url)
        .bind(event)
        .bind(enabled.map(|b| b as i64))
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found(format!("webhook {id}")));
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM webhooks WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found(format!("webhook {id}")));
        }
        Ok(())
    }
}
