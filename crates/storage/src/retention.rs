//! Retention sweep: age-based cleanup across every gateway table plus the
//! credential directories of instances removed by the sweep.

use std::path::{Path, PathBuf};

use {
    sqlx::{Row, SqlitePool},
    tracing::{info, warn},
    wagate_common::Result,
};

/// Per-entity deletion counts from one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct RetentionReport {
    pub webhook_history: u64,
    pub instance_logs: u64,
    pub messages: u64,
    pub webhooks: u64,
    pub instances: u64,
    pub credential_dirs: u64,
}

/// Deletes rows strictly older than a cutoff, oldest entities first so that
/// cascade deletion of stale instances does not inflate the other counters.
pub struct RetentionSweeper {
    pool: SqlitePool,
    auth_root: PathBuf,
}

impl RetentionSweeper {
    pub fn new(pool: SqlitePool, auth_root: impl Into<PathBuf>) -> Self {
        Self {
            pool,
            auth_root: auth_root.into(),
        }
    }

    /// Run one sweep. Rows with a timestamp `< cutoff_ms` are removed;
    /// instances are removed when their whole row (by `updated_at_ms`) has
    /// aged out, together with their credential directory.
    pub async fn sweep(&self, cutoff_ms: i64) -> Result<RetentionReport> {
        let mut report = RetentionReport::default();

        report.webhook_history =
            sqlx::query("DELETE FROM webhook_history WHERE triggered_at_ms < ?")
                .bind(cutoff_ms)
                .execute(&self.pool)
                .await?
                .rows_affected();

        report.instance_logs = sqlx::query("DELETE FROM instance_logs WHERE created_at_ms < ?")
            .bind(cutoff_ms)
            .execute(&self.pool)
            .await?
            .rows_affected();

        report.messages = sqlx::query("DELETE FROM messages WHERE created_at_ms < ?")
            .bind(cutoff_ms)
            .execute(&self.pool)
            .await?
            .rows_affected();

        report.webhooks = sqlx::query("DELETE FROM webhooks WHERE created_at_ms < ?")
            .bind(cutoff_ms)
            .execute(&self.pool)
            .await?
            .rows_affected();

        // Stale instances last: collect phones first so the credential
        // directories can be removed after the cascade.
        let stale = sqlx::query("SELECT phone FROM instances WHERE updated_at_ms < ?")
            .bind(cutoff_ms)
            .fetch_all(&self.pool)
            .await?;
        let phones: Vec<String> = stale.iter().map(|row| row.get("phone")).collect();

        report.instances = sqlx::query("DELETE FROM instances WHERE updated_at_ms < ?")
            .bind(cutoff_ms)
            .execute(&self.pool)
            .await?
            .rows_affected();

        for phone in &phones {
            if remove_credentials(&self.auth_root, phone) {
                report.credential_dirs += 1;
            }
        }

        info!(
            cutoff_ms,
            history = report.webhook_history,
            logs = report.instance_logs,
            messages = report.messages,
            webhooks = report.webhooks,
            instances = report.instances,
            "retention sweep complete"
        );
        Ok(report)
    }
}

/// Remove one phone's credential directory. Returns true if it existed.
pub fn remove_credentials(auth_root: &Path, phone: &str) -> bool {
    let dir = auth_root.join(phone);
    if !dir.exists() {
        return false;
    }
    match std::fs::remove_dir_all(&dir) {
        Ok(()) => true,
        Err(e) => {
            warn!(phone, error = %e, "failed to remove credential directory");
            false
        },
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            InstanceStore as _, MessageStore as _, WebhookHistoryStore as _,
            test_support::*,
            types::{
                HistoryStatus, MessageDirection, MessageKind, MessageRecord, MessageStatus,
                WebhookHistoryRecord,
            },
        },
        serde_json::json,
    };

    async fn seed_message(pool: &SqlitePool, instance_id: &str, created_at_ms: i64) {
        crate::messages::SqliteMessageStore::new(pool.clone())
            .create(&MessageRecord {
                id: uuid::Uuid::new_v4().to_string(),
                instance_id: instance_id.into(),
                direction: MessageDirection::Incoming,
                from_jid: "peer@s.whatsapp.net".into(),
                to_jid: "me".into(),
                kind: MessageKind::Text,
                content: json!({"text": "hi"}),
                status: MessageStatus::Received,
                sent_at_ms: Some(created_at_ms),
                created_at_ms,
            })
            .await
            .unwrap();
    }

    async fn seed_history(pool: &SqlitePool, instance_id: &str, webhook_id: &str, at_ms: i64) {
        crate::history::SqliteWebhookHistoryStore::new(pool.clone())
            .create(&WebhookHistoryRecord {
                id: uuid::Uuid::new_v4().to_string(),
                instance_id: instance_id.into(),
                webhook_id: webhook_id.into(),
                event: "message.received".into(),
                payload: json!({}),
                status: HistoryStatus::Success,
                http_status: Some(200),
                response_time_ms: Some(5),
                response_headers: None,
                response_body: None,
                error_message: None,
                retry_count: 0,
                triggered_at_ms: at_ms,
                completed_at_ms: Some(at_ms + 5),
            })
            .await
            .unwrap();
    }

    async fn touch_instance(pool: &SqlitePool, phone: &str, updated_at_ms: i64) {
        sqlx::query("UPDATE instances SET updated_at_ms = ? WHERE phone = ?")
            .bind(updated_at_ms)
            .bind(phone)
            .execute(pool)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn sweep_deletes_strictly_older_rows_only() {
        let pool = memory_pool().await;
        let tmp = tempfile::tempdir().unwrap();
        let instance = seed_instance(&pool, "628111").await;
        let hook = seed_webhook(&pool, &instance.id, "message.received").await;

        let cutoff = 50_000;
        seed_message(&pool, &instance.id, cutoff - 1).await;
        seed_message(&pool, &instance.id, cutoff).await;
        seed_history(&pool, &instance.id, &hook.id, cutoff - 10).await;
        seed_history(&pool, &instance.id, &hook.id, cutoff + 10).await;
        // Instance itself is fresh and must survive.
        touch_instance(&pool, "628111", cutoff + 1).await;

        let sweeper = RetentionSweeper::new(pool.clone(), tmp.path());
        let report = sweeper.sweep(cutoff).await.unwrap();

        assert_eq!(report.messages, 1);
        assert_eq!(report.webhook_history, 1);
        assert_eq!(report.instances, 0);
        assert!(
            crate::instances::SqliteInstanceStore::new(pool)
                .find_by_phone("628111")
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn sweep_removes_stale_instances_and_credentials() {
        let pool = memory_pool().await;
        let tmp = tempfile::tempdir().unwrap();
        let instance = seed_instance(&pool, "628999").await;
        seed_message(&pool, &instance.id, 100).await;
        touch_instance(&pool, "628999", 100).await;

        let auth_dir = tmp.path().join("628999");
        std::fs::create_dir_all(&auth_dir).unwrap();
        std::fs::write(auth_dir.join("creds.json"), b"{}").unwrap();

        let sweeper = RetentionSweeper::new(pool.clone(), tmp.path());
        let report = sweeper.sweep(1_000_000).await.unwrap();

        assert_eq!(report.instances, 1);
        assert_eq!(report.credential_dirs, 1);
        assert!(!auth_dir.exists());
        // Message was deleted directly (counted), not left to cascade.
        assert_eq!(report.messages, 1);
    }

    #[tokio::test]
    async fn remove_credentials_is_noop_for_missing_dir() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(!remove_credentials(tmp.path(), "628000"));
    }
}
