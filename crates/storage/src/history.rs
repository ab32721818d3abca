//! Webhook delivery history store.

use {
    async_trait::async_trait,
    sqlx::{QueryBuilder, Row, Sqlite, SqlitePool, sqlite::SqliteRow},
    wagate_common::Result,
};

use crate::types::{HistoryFilter, HistoryStats, HistoryStatus, WebhookHistoryRecord};

const DEFAULT_LIMIT: i64 = 100;

/// Persistent storage for webhook delivery attempts.
#[async_trait]
pub trait WebhookHistoryStore: Send + Sync {
    async fn create(&self, record: &WebhookHistoryRecord) -> Result<()>;
    async fn find_by_id(&self, id: &str) -> Result<Option<WebhookHistoryRecord>>;
    /// Newest first.
    async fn list(&self, filter: &HistoryFilter) -> Result<Vec<WebhookHistoryRecord>>;
    async fn stats(&self, instance_id: Option<&str>) -> Result<HistoryStats>;
    async fn recent_failures(&self, limit: i64) -> Result<Vec<WebhookHistoryRecord>>;
    /// Retention: drop rows triggered before the cutoff. Returns the count.
    async fn delete_older_than(&self, cutoff_ms: i64) -> Result<u64>;
}

/// sqlx-backed history store.
pub struct SqliteWebhookHistoryStore {
    pool: SqlitePool,
}

impl SqliteWebhookHistoryStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn row_to_record(row: &SqliteRow) -> Result<WebhookHistoryRecord> {
    let status: String = row.get("status");
    let payload_raw: String = row.get("payload");
    let headers_raw: Option<String> = row.get("response_headers");
    Ok(WebhookHistoryRecord {
        id: row.get("id"),
        instance_id: row.get("instance_id"),
        webhook_id: row.get("webhook_id"),
        event: row.get("event"),
        payload: serde_json::from_str(&payload_raw)
            .unwrap_or(serde_json::Value::String(payload_raw)),
        status: HistoryStatus::parse(&status)?,
        http_status: row.get("http_status"),
        response_time_ms: row.get("response_time_ms"),
        response_headers: headers_raw.and_then(|raw| serde_json::from_str(&raw).ok()),
        response_body: row.get("response_body"),
        error_message: row.get("error_message"),
        retry_count: row.get("retry_count"),
        triggered_at_ms: row.get("triggered_at_ms"),
        completed_at_ms: row.get("completed_at_ms"),
    })
}

#[async_trait]
impl WebhookHistoryStore for SqliteWebhookHistoryStore {
    async fn create(&self, record: &WebhookHistoryRecord) -> Result<()> {
        let payload = serde_json::to_string(&record.payload)?;
        let headers = record
            .response_headers
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        sqlx::query(
            "INSERT INTO webhook_history
             (id, instance_id, webhook_id, event, payload, status, http_status,
              response_time_ms, response_headers, response_body, error_message,
              retry_count, triggered_at_ms, completed_at_ms)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(&record.instance_id)
        .bind(&record.webhook_id)
        .bind(&record.event)
        .bind(&payload)
        .bind(record.status.as_str())
        .bind(record.http_status)
        .bind(record.response_time_ms)
        .bind(&headers)
        .bind(&record.response_body)
        .bind(&record.error_message)
        .bind(record.retry_count)
        .bind(record.triggered_at_ms)
        .bind(record.completed_at_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<WebhookHistoryRecord>> {
        let row = sqlx::query("SELECT * FROM webhook_history WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_record).transpose()
    }

    async fn list(&self, filter: &HistoryFilter) -> Result<Vec<WebhookHistoryRecord>> {
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT * FROM webhook_history WHERE 1 = 1");
        if let Some(instance_id) = &filter.instance_id {
            builder.push(" AND instance_id = ");
            builder.push_bind(instance_id);
        }
        if let Some(webhook_id) = &filter.webhook_id {
            builder.push(" AND webhook_id = ");
            builder.push_bind(webhook_id);
        }
        if let Some(status) = filter.status {
            builder.push(" AND status = ");
            builder.push_bind(status.as_str());
        }
        if let Some(event) = &filter.event {
            builder.push(" AND event = ");
            builder.push_bind(event);
        }
        if let Some(since) = filter.since_ms {
            builder.push(" AND triggered_at_ms >= ");
            builder.push_bind(since);
        }
        if let Some(until) = filter.until_ms {
            builder.push(" AND triggered_at_ms <= ");
            builder.push_bind(until);
        }
        builder.push(" ORDER BY triggered_at_ms DESC LIMIT ");
        builder.push_bind(filter.limit.unwrap_or(DEFAULT_LIMIT));

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(row_to_record).collect()
    }

    async fn stats(&self, instance_id: Option<&str>) -> Result<HistoryStats> {
        let scope = instance_id.unwrap_or("");
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS n FROM webhook_history
             WHERE (? = '' OR instance_id = ?) GROUP BY status ORDER BY status",
        )
        .bind(scope)
        .bind(scope)
        .fetch_all(&self.pool)
        .await?;

        let mut stats = HistoryStats::default();
        for row in &rows {
            let status: String = row.get("status");
            let n: i64 = row.get("n");
            stats.total += n;
            match status.as_str() {
                "success" => stats.success = n,
                "failed" | "timeout" => stats.failed += n,
                _ => {},
            }
            stats.by_status.push((status, n));
        }

        let rows = sqlx::query(
            "SELECT event, COUNT(*) AS n FROM webhook_history
             WHERE (? = '' OR instance_id = ?) GROUP BY event ORDER BY event",
        )
        .bind(scope)
        .bind(scope)
        .fetch_all(&self.pool)
        .await?;
        stats.by_event = rows
            .iter()
            .map(|row| (row.get("event"), row.get("n")))
            .collect();

        let row = sqlx::query(
            "SELECT AVG(response_time_ms) AS avg_ms FROM webhook_history
             WHERE response_time_ms IS NOT NULL AND (? = '' OR instance_id = ?)",
        )
        .bind(scope)
        .bind(scope)
        .fetch_one(&self.pool)
        .await?;
        stats.avg_response_time_ms = row.get("avg_ms");

        Ok(stats)
    }

    async fn recent_failures(&self, limit: i64) -> Result<Vec<WebhookHistoryRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM webhook_history
             WHERE status IN ('failed', 'timeout')
             ORDER BY triggered_at_ms DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_record).collect()
    }

    async fn delete_older_than(&self, cutoff_ms: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM webhook_history WHERE triggered_at_ms < ?")
            .bind(cutoff_ms)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
