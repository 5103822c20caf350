//! SQLite-backed work queues.
//!
//! Queues are the only inter-stage communication channel. Delivery is
//! at-least-once: [`receive`] leases a message for the configured
//! visibility timeout, [`ack`] deletes it, and a message whose lease
//! expires without an ack becomes deliverable again. Stages are therefore
//! written to be idempotent on redelivery.
//!
//! [`send`] accepts a visibility delay so producers can schedule retries
//! (backoff) and spread bulk fan-out without sleeping.

use anyhow::Result;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::models::WorkMessage;

/// Lane for PDFs awaiting submission to the layout-analysis service.
pub const PDF_SUBMIT_QUEUE: &str = "pdf-submit";
/// Lane for submitted PDFs awaiting layout-analysis completion.
pub const PDF_POLLING_QUEUE: &str = "pdf-polling";
/// Lane for HTML, DOCX, and image uploads.
pub const NON_PDF_QUEUE: &str = "non-pdf";
/// Lane for chunked documents awaiting language/image enrichment.
pub const ENRICHMENT_QUEUE: &str = "enrichment";
/// Lane for enriched documents awaiting embedding + index upload.
pub const INDEXING_QUEUE: &str = "indexing";

pub const ALL_QUEUES: &[&str] = &[
    PDF_SUBMIT_QUEUE,
    PDF_POLLING_QUEUE,
    NON_PDF_QUEUE,
    ENRICHMENT_QUEUE,
    INDEXING_QUEUE,
];

/// A leased message. Must be [`ack`]ed once its work has committed.
#[derive(Debug, Clone)]
pub struct QueueMessage {
    pub id: String,
    pub queue: String,
    pub body: String,
}

impl QueueMessage {
    pub fn work(&self) -> Result<WorkMessage> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

/// Enqueue a raw message body, visible after `visibility_delay_secs`.
pub async fn send(
    pool: &SqlitePool,
    queue: &str,
    body: &str,
    visibility_delay_secs: i64,
) -> Result<()> {
    let now = chrono::Utc::now().timestamp();
    sqlx::query(
        r#"
        INSERT INTO queue_messages (id, queue, body, visible_at, leased_until, created_at)
        VALUES (?, ?, ?, ?, NULL, ?)
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(queue)
    .bind(body)
    .bind(now + visibility_delay_secs.max(0))
    .bind(now)
    .execute(pool)
    .await?;
    Ok(())
}

/// Enqueue a [`WorkMessage`].
pub async fn send_work(
    pool: &SqlitePool,
    queue: &str,
    message: &WorkMessage,
    visibility_delay_secs: i64,
) -> Result<()> {
    send(pool, queue, &serde_json::to_string(message)?, visibility_delay_secs).await
}

/// Lease the next deliverable message on a queue, if any.
///
/// The message stays invisible to other consumers until
/// `visibility_timeout_secs` elapses or it is acked.
pub async fn receive(
    pool: &SqlitePool,
    queue: &str,
    visibility_timeout_secs: i64,
) -> Result<Option<QueueMessage>> {
    let now = chrono::Utc::now().timestamp();
    let row = sqlx::query(
        r#"
        UPDATE queue_messages
        SET leased_until = ?
        WHERE id = (
            SELECT id FROM queue_messages
            WHERE queue = ?
              AND visible_at <= ?
              AND (leased_until IS NULL OR leased_until <= ?)
            ORDER BY visible_at, created_at
            LIMIT 1
        )
        RETURNING id, queue, body
        "#,
    )
    .bind(now + visibility_timeout_secs)
    .bind(queue)
    .bind(now)
    .bind(now)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| QueueMessage {
        id: r.get("id"),
        queue: r.get("queue"),
        body: r.get("body"),
    }))
}

/// Delete a settled message.
pub async fn ack(pool: &SqlitePool, message_id: &str) -> Result<()> {
    sqlx::query("DELETE FROM queue_messages WHERE id = ?")
        .bind(message_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Number of messages on a queue, delivered or not.
pub async fn depth(pool: &SqlitePool, queue: &str) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM queue_messages WHERE queue = ?")
        .bind(queue)
        .fetch_one(pool)
        .await?;
    Ok(count)
}
