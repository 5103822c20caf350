//! Per-document status journal.
//!
//! Every pipeline stage appends to this journal; monitoring UIs query it.
//! Records are keyed by [`encode_document_id`], a reversible URL-safe base64
//! encoding of the document path — a pure function, so upserts from any
//! stage land on the same record without coordination.
//!
//! Writes are read-modify-write upserts with last-writer-wins semantics.
//! That is acceptable here because each stage is the sole writer for a
//! document while it holds its queue message, and stages are chained.

use anyhow::{Context, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::{Row, SqlitePool};

use crate::models::{DocState, StatusClass};

/// Deterministic, reversible document id: URL-safe base64 of the path.
pub fn encode_document_id(path: &str) -> String {
    URL_SAFE_NO_PAD.encode(path.as_bytes())
}

/// Recover the document path from an encoded id.
pub fn decode_document_id(id: &str) -> Result<String> {
    let bytes = URL_SAFE_NO_PAD
        .decode(id.as_bytes())
        .with_context(|| format!("Invalid document id: {id}"))?;
    String::from_utf8(bytes).context("Document id does not decode to UTF-8")
}

/// One appended journal entry.
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub message: String,
    pub class: StatusClass,
    pub created_at: DateTime<Utc>,
}

/// One document's journal record.
#[derive(Debug, Clone)]
pub struct StatusRecord {
    pub id: String,
    pub document_path: String,
    pub state: DocState,
    /// When `state` last actually changed (not last activity).
    pub state_timestamp: DateTime<Utc>,
    pub tags: Vec<String>,
    pub updates: Vec<StatusUpdate>,
}

/// Read mode for journal queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// Info and Error updates only.
    Terse,
    /// All updates including Debug (retry/backoff audit trail).
    Verbose,
}

/// Filters for [`query`]. All set fields must match.
#[derive(Debug, Clone, Default)]
pub struct StatusQuery {
    pub id: Option<String>,
    pub state: Option<DocState>,
    /// Only records with activity within the last N hours.
    pub within_hours: Option<i64>,
    pub path_prefix: Option<String>,
    pub tag: Option<String>,
}

/// Append one status update, creating or updating the journal record.
///
/// `fresh_start` deletes any prior record (and its updates) first — used by
/// the upload dispatcher so a re-uploaded document starts a clean history.
/// The record's `state_timestamp` is stamped only when the state actually
/// changes, letting callers distinguish "last state change" from "last
/// activity".
pub async fn upsert(
    pool: &SqlitePool,
    path: &str,
    message: &str,
    class: StatusClass,
    state: DocState,
    fresh_start: bool,
) -> Result<()> {
    let id = encode_document_id(path);
    let now = chrono::Utc::now().timestamp();

    if fresh_start {
        sqlx::query("DELETE FROM status_updates WHERE doc_id = ?")
            .bind(&id)
            .execute(pool)
            .await?;
        sqlx::query("DELETE FROM status_log WHERE id = ?")
            .bind(&id)
            .execute(pool)
            .await?;
    }

    let existing: Option<String> = sqlx::query_scalar("SELECT state FROM status_log WHERE id = ?")
        .bind(&id)
        .fetch_optional(pool)
        .await?;

    match existing {
        None => {
            sqlx::query(
                r#"
                INSERT INTO status_log (id, document_path, state, state_timestamp)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(&id)
            .bind(path)
            .bind(state.as_str())
            .bind(now)
            .execute(pool)
            .await?;
        }
        Some(prior) if prior != state.as_str() => {
            sqlx::query("UPDATE status_log SET state = ?, state_timestamp = ? WHERE id = ?")
                .bind(state.as_str())
                .bind(now)
                .bind(&id)
                .execute(pool)
                .await?;
        }
        Some(_) => {} // unchanged state keeps its original timestamp
    }

    sqlx::query(
        "INSERT INTO status_updates (doc_id, message, class, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(message)
    .bind(class.as_str())
    .bind(now)
    .execute(pool)
    .await?;

    Ok(())
}

/// Replace the tag list for a document.
pub async fn upsert_tags(pool: &SqlitePool, path: &str, tags: &[String]) -> Result<()> {
    let id = encode_document_id(path);
    sqlx::query(
        r#"
        INSERT INTO document_tags (doc_id, tags_json) VALUES (?, ?)
        ON CONFLICT(doc_id) DO UPDATE SET tags_json = excluded.tags_json
        "#,
    )
    .bind(&id)
    .bind(serde_json::to_string(tags)?)
    .execute(pool)
    .await?;
    Ok(())
}

/// Delete a document's tag record. Deleting an absent record is a non-error.
pub async fn delete_tags(pool: &SqlitePool, path: &str) -> Result<()> {
    sqlx::query("DELETE FROM document_tags WHERE doc_id = ?")
        .bind(encode_document_id(path))
        .execute(pool)
        .await?;
    Ok(())
}

/// Fetch a single record by document path, if present.
pub async fn get(pool: &SqlitePool, path: &str, mode: ReadMode) -> Result<Option<StatusRecord>> {
    let filter = StatusQuery {
        id: Some(encode_document_id(path)),
        ..Default::default()
    };
    Ok(query(pool, &filter, mode).await?.into_iter().next())
}

/// Query journal records matching all set filters.
///
/// Exact-match filters (id, state, path prefix) are pushed into the SQL
/// query; tag membership and the activity window need the tag JSON and the
/// update rows, so they are applied after the fetch.
pub async fn query(
    pool: &SqlitePool,
    filter: &StatusQuery,
    mode: ReadMode,
) -> Result<Vec<StatusRecord>> {
    let mut sql = String::from(
        r#"
        SELECT s.id, s.document_path, s.state, s.state_timestamp,
               COALESCE(t.tags_json, '[]') AS tags_json
        FROM status_log s
        LEFT JOIN document_tags t ON t.doc_id = s.id
        WHERE 1 = 1
        "#,
    );
    if filter.id.is_some() {
        sql.push_str(" AND s.id = ?");
    }
    if filter.state.is_some() {
        sql.push_str(" AND s.state = ?");
    }
    if filter.path_prefix.is_some() {
        sql.push_str(" AND s.document_path LIKE ? ESCAPE '\\'");
    }
    sql.push_str(" ORDER BY s.document_path");

    let mut q = sqlx::query(&sql);
    if let Some(id) = &filter.id {
        q = q.bind(id);
    }
    if let Some(state) = filter.state {
        q = q.bind(state.as_str());
    }
    if let Some(prefix) = &filter.path_prefix {
        q = q.bind(like_prefix_pattern(prefix));
    }
    let rows = q.fetch_all(pool).await?;

    let cutoff = filter
        .within_hours
        .map(|h| chrono::Utc::now().timestamp() - h * 3600);

    let mut records = Vec::new();
    for row in rows {
        let id: String = row.get("id");
        let document_path: String = row.get("document_path");
        let state_str: String = row.get("state");
        let state = DocState::parse(&state_str)
            .ok_or_else(|| anyhow::anyhow!("Unknown state in journal: {state_str}"))?;
        let tags: Vec<String> = serde_json::from_str(row.get::<String, _>("tags_json").as_str())
            .unwrap_or_default();

        if let Some(tag) = &filter.tag {
            if !tags.contains(tag) {
                continue;
            }
        }

        let updates = fetch_updates(pool, &id, mode).await?;

        if let Some(cutoff) = cutoff {
            let last_activity = updates
                .last()
                .map(|u| u.created_at.timestamp())
                .unwrap_or_else(|| row.get::<i64, _>("state_timestamp"));
            if last_activity < cutoff {
                continue;
            }
        }

        records.push(StatusRecord {
            id,
            document_path,
            state,
            state_timestamp: Utc
                .timestamp_opt(row.get::<i64, _>("state_timestamp"), 0)
                .unwrap(),
            tags,
            updates,
        });
    }

    Ok(records)
}

/// Turn a literal path prefix into a LIKE pattern, escaping the LIKE
/// metacharacters so a prefix like `q4_reports/` matches only itself.
fn like_prefix_pattern(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

async fn fetch_updates(
    pool: &SqlitePool,
    doc_id: &str,
    mode: ReadMode,
) -> Result<Vec<StatusUpdate>> {
    let rows = sqlx::query(
        r#"
        SELECT message, class, created_at FROM status_updates
        WHERE doc_id = ?
        ORDER BY id
        "#,
    )
    .bind(doc_id)
    .fetch_all(pool)
    .await?;

    let mut updates = Vec::new();
    for row in rows {
        let class_str: String = row.get("class");
        let class = StatusClass::parse(&class_str)
            .ok_or_else(|| anyhow::anyhow!("Unknown status class: {class_str}"))?;
        if mode == ReadMode::Terse && class == StatusClass::Debug {
            continue;
        }
        updates.push(StatusUpdate {
            message: row.get("message"),
            class,
            created_at: Utc.timestamp_opt(row.get::<i64, _>("created_at"), 0).unwrap(),
        });
    }
    Ok(updates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        migrate::ensure_schema(&pool).await.unwrap();
        pool
    }

    #[test]
    fn test_document_id_reversible() {
        for path in ["docs/report.pdf", "a/b/c with spaces.docx", "ünïcode.html"] {
            let id = encode_document_id(path);
            assert!(!id.contains('/'), "id must be path-safe: {id}");
            assert_eq!(decode_document_id(&id).unwrap(), path);
        }
    }

    #[test]
    fn test_distinct_paths_get_distinct_ids() {
        assert_ne!(
            encode_document_id("docs/a.pdf"),
            encode_document_id("docs/b.pdf")
        );
    }

    #[tokio::test]
    async fn test_upsert_appends_and_tracks_state() {
        let pool = test_pool().await;
        upsert(&pool, "a.pdf", "received", StatusClass::Info, DocState::Uploaded, true)
            .await
            .unwrap();
        upsert(&pool, "a.pdf", "queued", StatusClass::Info, DocState::Queued, false)
            .await
            .unwrap();

        let record = get(&pool, "a.pdf", ReadMode::Verbose).await.unwrap().unwrap();
        assert_eq!(record.state, DocState::Queued);
        assert_eq!(record.updates.len(), 2);
        assert_eq!(record.updates[0].message, "received");
    }

    #[tokio::test]
    async fn test_fresh_start_clears_history() {
        let pool = test_pool().await;
        upsert(&pool, "a.pdf", "old run", StatusClass::Info, DocState::Error, true)
            .await
            .unwrap();
        upsert(&pool, "a.pdf", "new upload", StatusClass::Info, DocState::Uploaded, true)
            .await
            .unwrap();

        let record = get(&pool, "a.pdf", ReadMode::Verbose).await.unwrap().unwrap();
        assert_eq!(record.updates.len(), 1);
        assert_eq!(record.updates[0].message, "new upload");
        assert_eq!(record.state, DocState::Uploaded);
    }

    #[tokio::test]
    async fn test_terse_mode_hides_debug_entries() {
        let pool = test_pool().await;
        upsert(&pool, "a.pdf", "up", StatusClass::Info, DocState::Processing, true)
            .await
            .unwrap();
        upsert(&pool, "a.pdf", "retry 1", StatusClass::Debug, DocState::Processing, false)
            .await
            .unwrap();

        let terse = get(&pool, "a.pdf", ReadMode::Terse).await.unwrap().unwrap();
        assert_eq!(terse.updates.len(), 1);
        let verbose = get(&pool, "a.pdf", ReadMode::Verbose).await.unwrap().unwrap();
        assert_eq!(verbose.updates.len(), 2);
    }

    #[tokio::test]
    async fn test_query_by_state_and_prefix_and_tag() {
        let pool = test_pool().await;
        upsert(&pool, "docs/a.pdf", "m", StatusClass::Info, DocState::Complete, true)
            .await
            .unwrap();
        upsert(&pool, "docs/b.pdf", "m", StatusClass::Info, DocState::Error, true)
            .await
            .unwrap();
        upsert(&pool, "misc/c.pdf", "m", StatusClass::Info, DocState::Complete, true)
            .await
            .unwrap();
        upsert_tags(&pool, "docs/a.pdf", &["finance".to_string()]).await.unwrap();

        let by_state = query(
            &pool,
            &StatusQuery { state: Some(DocState::Complete), ..Default::default() },
            ReadMode::Terse,
        )
        .await
        .unwrap();
        assert_eq!(by_state.len(), 2);

        let by_prefix = query(
            &pool,
            &StatusQuery { path_prefix: Some("docs/".to_string()), ..Default::default() },
            ReadMode::Terse,
        )
        .await
        .unwrap();
        assert_eq!(by_prefix.len(), 2);

        let by_tag = query(
            &pool,
            &StatusQuery { tag: Some("finance".to_string()), ..Default::default() },
            ReadMode::Terse,
        )
        .await
        .unwrap();
        assert_eq!(by_tag.len(), 1);
        assert_eq!(by_tag[0].document_path, "docs/a.pdf");
    }

    #[tokio::test]
    async fn test_query_within_hours_excludes_stale_records() {
        let pool = test_pool().await;
        upsert(&pool, "docs/stale.pdf", "m", StatusClass::Info, DocState::Complete, true)
            .await
            .unwrap();
        upsert(&pool, "docs/recent.pdf", "m", StatusClass::Info, DocState::Complete, true)
            .await
            .unwrap();

        // Backdate one document's record and updates two days.
        let two_days_ago = chrono::Utc::now().timestamp() - 48 * 3600;
        let stale_id = encode_document_id("docs/stale.pdf");
        sqlx::query("UPDATE status_log SET state_timestamp = ? WHERE id = ?")
            .bind(two_days_ago)
            .bind(&stale_id)
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("UPDATE status_updates SET created_at = ? WHERE doc_id = ?")
            .bind(two_days_ago)
            .bind(&stale_id)
            .execute(&pool)
            .await
            .unwrap();

        let windowed = query(
            &pool,
            &StatusQuery { within_hours: Some(24), ..Default::default() },
            ReadMode::Terse,
        )
        .await
        .unwrap();
        assert_eq!(windowed.len(), 1);
        assert_eq!(windowed[0].document_path, "docs/recent.pdf");

        let unwindowed = query(&pool, &StatusQuery::default(), ReadMode::Terse)
            .await
            .unwrap();
        assert_eq!(unwindowed.len(), 2);
    }

    #[tokio::test]
    async fn test_prefix_metacharacters_match_literally() {
        let pool = test_pool().await;
        upsert(&pool, "q4_reports/a.pdf", "m", StatusClass::Info, DocState::Complete, true)
            .await
            .unwrap();
        upsert(&pool, "q4xreports/b.pdf", "m", StatusClass::Info, DocState::Complete, true)
            .await
            .unwrap();

        let matched = query(
            &pool,
            &StatusQuery { path_prefix: Some("q4_".to_string()), ..Default::default() },
            ReadMode::Terse,
        )
        .await
        .unwrap();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].document_path, "q4_reports/a.pdf");
    }

    #[tokio::test]
    async fn test_upsert_last_writer_wins() {
        // Two stages writing the same record interleave as plain upserts;
        // the final state is simply the last write, with no lost updates.
        let pool = test_pool().await;
        upsert(&pool, "a.pdf", "stage one", StatusClass::Info, DocState::Processing, true)
            .await
            .unwrap();
        upsert(&pool, "a.pdf", "stage two", StatusClass::Info, DocState::Indexing, false)
            .await
            .unwrap();
        upsert(&pool, "a.pdf", "stage one again", StatusClass::Info, DocState::Indexing, false)
            .await
            .unwrap();

        let record = get(&pool, "a.pdf", ReadMode::Verbose).await.unwrap().unwrap();
        assert_eq!(record.state, DocState::Indexing);
        assert_eq!(record.updates.len(), 3);
    }

    #[tokio::test]
    async fn test_delete_tags_idempotent() {
        let pool = test_pool().await;
        upsert_tags(&pool, "a.pdf", &["x".to_string()]).await.unwrap();
        delete_tags(&pool, "a.pdf").await.unwrap();
        delete_tags(&pool, "a.pdf").await.unwrap();
    }
}
