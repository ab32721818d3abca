//! Instance store.

use std::collections::HashMap;

use {
    async_trait::async_trait,
    sqlx::{Row, SqlitePool, sqlite::SqliteRow},
    wagate_common::{Error, Result, unix_now_ms},
};

use crate::types::{InstanceRecord, InstanceStatus};

/// Persistent storage for instance rows.
#[async_trait]
pub trait InstanceStore: Send + Sync {
    async fn create(&self, record: &InstanceRecord) -> Result<()>;
    async fn find_by_id(&self, id: &str) -> Result<Option<InstanceRecord>>;
    async fn find_by_phone(&self, phone: &str) -> Result<Option<InstanceRecord>>;
    async fn list(&self) -> Result<Vec<InstanceRecord>>;
    /// Patch name/alias; absent fields are left untouched.
    async fn update_profile(
        &self,
        phone: &str,
        name: Option<&str>,
        alias: Option<&str>,
    ) -> Result<()>;
    async fn update_status(&self, phone: &str, status: InstanceStatus) -> Result<()>;
    async fn set_plugin_overrides(&self, phone: &str, overrides: &HashMap<String, bool>)
    -> Result<()>;
    /// Delete the row; related rows cascade.
    async fn delete(&self, phone: &str) -> Result<()>;
    async fn count_by_status(&self) -> Result<Vec<(String, i64)>>;
}

/// sqlx-backed instance store.
pub struct SqliteInstanceStore {
    pool: SqlitePool,
}

impl SqliteInstanceStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn row_to_record(row: &SqliteRow) -> Result<InstanceRecord> {
    let status: String = row.get("status");
    let overrides_raw: String = row.get("plugin_overrides");
    let plugin_overrides: HashMap<String, bool> =
        serde_json::from_str(&overrides_raw).unwrap_or_default();
    Ok(InstanceRecord {
        id: row.get("id"),
        phone: row.get("phone"),
        name: row.get("name"),
        alias: row.get("alias"),
        status: InstanceStatus::parse(&status)?,
        plugin_overrides,
        created_at_ms: row.get("created_at_ms"),
        updated_at_ms: row.get("updated_at_ms"),
    })
}

#[async_trait]
impl InstanceStore for SqliteInstanceStore {
    async fn create(&self, record: &InstanceRecord) -> Result<()> {
        let overrides = serde_json::to_string(&record.plugin_overrides)?;
        let result = sqlx::query(
            "INSERT OR IGNORE INTO instances
             (id, phone, name, alias, status, plugin_overrides, created_at_ms, updated_at_ms)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(&record.phone)
        .bind(&record.name)
        .bind(&record.alias)
        .bind(record.status.as_str())
        .bind(&overrides)
        .bind(record.created_at_ms)
        .bind(record.updated_at_ms)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::already_exists(&record.phone));
        }
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<InstanceRecord>> {
        let row = sqlx::query("SELECT * FROM instances WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_record).transpose()
    }

    async fn find_by_phone(&self, phone: &str) -> Result<Option<InstanceRecord>> {
        let row = sqlx::query("SELECT * FROM instances WHERE phone = ?")
            .bind(phone)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_record).transpose()
    }

    async fn list(&self) -> Result<Vec<InstanceRecord>> {
        let rows = sqlx::query("SELECT * FROM instances ORDER BY created_at_ms")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_record).collect()
    }

    async fn update_profile(
        &self,
        phone: &str,
        name: Option<&str>,
        alias: Option<&str>,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE instances SET
               name = COALESCE(?, name),
               alias = COALESCE(?, alias),
               updated_at_ms = ?
             WHERE phone = ?",
        )
        .bind(name)
        .bind(alias)
        .bind(unix_now_ms())
        .bind(phone)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found(format!("instance {phone}")));
        }
        Ok(())
    }

    async fn update_status(&self, phone: &str, status: InstanceStatus) -> Result<()> {
        let result = sqlx::query(
            "UPDATE instances SET status = ?, updated_at_ms = ? WHERE phone = ?",
        )
        .bind(status.as_str())
        .bind(unix_now_ms())
        .bind(phone)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found(format!("instance {phone}")));
        }
        Ok(())
    }

    async fn set_plugin_overrides(
        &self,
        phone: &str,
        overrides: &HashMap<String, bool>,
    ) -> Result<()> {
        let raw = serde_json::to_string(overrides)?;
        let result = sqlx::query(
            "UPDATE instances SET plugin_overrides = ?, updated_at_ms = ? WHERE phone = ?",
        )
        .bind(&raw)
        .bind(unix_now_ms())
        .bind(phone)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found(format!("instance {phone}")));
        }
        Ok(())
    }

    async fn delete(&self, phone: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM instances WHERE phone = ?")
            .bind(phone)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found(format!("instance {phone}")));
        }
        Ok(())
    }

    async fn count_by_status(&self) -> Result<Vec<(String, i64)>> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS n FROM instances GROUP BY status ORDER BY status",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|row| (row.get("status"), row.get("n")))
            .collect())
    }
}
