//! Message store.

use {
    async_trait::async_trait,
    sqlx::{QueryBuilder, Row, Sqlite, SqlitePool, sqlite::SqliteRow},
    wagate_common::{Error, Result},
};

use crate::types::{
    MessageDirection, MessageFilter, MessageRecord, MessageStats, MessageStatus,
};

const DEFAULT_LIMIT: i64 = 100;

/// Persistent storage for message rows.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn create(&self, record: &MessageRecord) -> Result<()>;
    async fn find_by_id(&self, id: &str) -> Result<Option<MessageRecord>>;
    /// Newest first.
    async fn find_by_instance(
        &self,
        instance_id: &str,
        filter: &MessageFilter,
    ) -> Result<Vec<MessageRecord>>;
    /// Messages exchanged with one contact, oldest first.
    async fn conversation(&self, instance_id: &str, contact_jid: &str)
    -> Result<Vec<MessageRecord>>;
    async fn update_status(&self, id: &str, status: MessageStatus) -> Result<()>;
    async fn stats(&self, instance_id: &str) -> Result<MessageStats>;
}

/// sqlx-backed message store.
pub struct SqliteMessageStore {
    pool: SqlitePool,
}

impl SqliteMessageStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn row_to_record(row: &SqliteRow) -> Result<MessageRecord> {
    let direction: String = row.get("direction");
    let kind: String = row.get("kind");
    let status: String = row.get("status");
    let content_raw: String = row.get("content");
    Ok(MessageRecord {
        id: row.get("id"),
        instance_id: row.get("instance_id"),
        direction: MessageDirection::parse(&direction)?,
        from_jid: row.get("from_jid"),
        to_jid: row.get("to_jid"),
        kind: crate::types::MessageKind::parse_lossy(&kind),
        content: serde_json::from_str(&content_raw)
            .unwrap_or(serde_json::Value::String(content_raw)),
        status: MessageStatus::parse(&status)?,
        sent_at_ms: row.get("sent_at_ms"),
        created_at_ms: row.get("created_at_ms"),
    })
}

#[async_trait]
impl MessageStore for SqliteMessageStore {
    async fn create(&self, record: &MessageRecord) -> Result<()> {
        let content = serde_json::to_string(&record.content)?;
        sqlx::query(
            "INSERT INTO messages
             (id, instance_id, direction, from_jid, to_jid, kind, content, status,
              sent_at_ms, created_at_ms)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(&record.instance_id)
        .bind(record.direction.as_str())
        .bind(&record.from_jid)
        .bind(&record.to_jid)
        .bind(record.kind.as_str())
        .bind(&content)
        .bind(record.status.as_str())
        .bind(record.sent_at_ms)
        .bind(record.created_at_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<MessageRecord>> {
        let row = sqlx::query("SELECT * FROM messages WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_record).transpose()
    }

    async fn find_by_instance(
        &self,
        instance_id: &str,
        filter: &MessageFilter,
    ) -> Result<Vec<MessageRecord>> {
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT * FROM messages WHERE instance_id = ");
        builder.push_bind(instance_id);
        if let Some(direction) = filter.direction {
            builder.push(" AND direction = ");
            builder.push_bind(direction.as_str());
        }
        builder.push(" ORDER BY created_at_ms DESC LIMIT ");
        builder.push_bind(filter.limit.unwrap_or(DEFAULT_LIMIT));

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(row_to_record).collect()
    }

    async fn conversation(
        &self,
        instance_id: &str,
        contact_jid: &str,
    ) -> Result<Vec<MessageRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM messages
             WHERE instance_id = ? AND (from_jid = ? OR to_jid = ?)
             ORDER BY created_at_ms ASC",
        )
        .bind(instance_id)
        .bind(contact_jid)
        .bind(contact_jid)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_record).collect()
    }

    async fn update_status(&self, id: &str, status: MessageStatus) -> Result<()> {
        let result = sqlx::query("UPDATE messages SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found(format!("message {id}")));
        }
        Ok(())
    }

    async fn stats(&self, instance_id: &str) -> Result<MessageStats> {
        let rows = sqlx::query(
            "SELECT direction, COUNT(*) AS n FROM messages
             WHERE instance_id = ? GROUP BY direction",
        )
        .bind(instance_id)
        .fetch_all(&self.pool)
        .await?;

        let mut stats = MessageStats::default();
        for row in &rows {
            let direction: String = row.get("direction");
            let n: i64 = row.get("n");
            match direction.as_str() {
                "incoming" => stats.incoming = n,
                "outgoing" => stats.outgoing = n,
                _ => {},
            }
        }

        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS n FROM messages
             WHERE instance_id = ? GROUP BY status ORDER BY status",
        )
        .bind(instance_id)
        .fetch_all(&self.pool)
        .await?;
        stats.by_status = rows
            .iter()
            .map(|row| (row.get("status"), row.get("n")))
            .collect();

        Ok(stats)
    }
}
