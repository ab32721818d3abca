//! SQLite-backed persistent store adapters.
//!
//! One narrow async trait per entity, each with a sqlx implementation over
//! a shared [`SqlitePool`]. Writes are single-document; cascade deletion is
//! enforced by the schema's foreign keys.

pub mod history;
pub mod instances;
pub mod logs;
pub mod messages;
pub mod retention;
pub mod types;
pub mod webhooks;

pub use {
    history::{SqliteWebhookHistoryStore, WebhookHistoryStore},
    instances::{InstanceStore, SqliteInstanceStore},
    logs::{InstanceLogStore, SqliteInstanceLogStore},
    messages::{MessageStore, SqliteMessageStore},
    retention::{RetentionReport, RetentionSweeper},
    webhooks::{SqliteWebhookStore, WebhookStore},
};

use {
    sqlx::{SqlitePool, sqlite::SqlitePoolOptions},
    wagate_common::Result,
};

/// Connect a pool and run migrations.
pub async fn connect(database_url: &str) -> Result<SqlitePool> {
    // An in-memory database exists per connection; cap the pool at one so
    // every caller sees the same schema.
    let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;
    run_migrations(&pool).await?;
    Ok(pool)
}

/// Run database migrations. Creates every gateway table; call once at
/// startup before constructing stores.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .set_ignore_missing(true)
        .run(pool)
        .await
        .map_err(|e| wagate_common::Error::internal(format!("migration failed: {e}")))?;
    Ok(())
}
