use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(&config.db).await?;
    ensure_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create all tables and indexes. Idempotent.
pub async fn ensure_schema(pool: &SqlitePool) -> Result<()> {
    // One journal record per source document, keyed by the reversible
    // base64 encoding of its path.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS status_log (
            id TEXT PRIMARY KEY,
            document_path TEXT NOT NULL,
            state TEXT NOT NULL,
            state_timestamp INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // User-supplied tag lists, kept separate so the cleanup reconciler can
    // purge them independently of the journal record.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS document_tags (
            doc_id TEXT PRIMARY KEY,
            tags_json TEXT NOT NULL DEFAULT '[]'
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Ordered status updates appended by every pipeline stage.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS status_updates (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            doc_id TEXT NOT NULL,
            message TEXT NOT NULL,
            class TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (doc_id) REFERENCES status_log(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Work queues. A message is deliverable once `visible_at` has passed
    // and no unexpired lease is held on it.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS queue_messages (
            id TEXT PRIMARY KEY,
            queue TEXT NOT NULL,
            body TEXT NOT NULL,
            visible_at INTEGER NOT NULL,
            leased_until INTEGER,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_status_log_state ON status_log(state)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_status_log_path ON status_log(document_path)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_status_updates_doc ON status_updates(doc_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_queue_visible ON queue_messages(queue, visible_at)")
        .execute(pool)
        .await?;

    Ok(())
}
