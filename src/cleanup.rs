//! Cleanup reconciler for soft-deleted documents.
//!
//! Deleting a document is a storage-side action: the upload blob gets a
//! soft-delete marker, and this reconciler later makes the rest of the
//! system agree. For every marked upload it removes the search index
//! documents, the chunk blobs, the document-map artifact, the tag record,
//! and finally the upload blob itself, then journals the document as
//! `Deleted`.
//!
//! Every step is idempotent, so a run that dies halfway is simply
//! finished by the next one. One failing document does not stop the
//! sweep.

use anyhow::Result;
use sqlx::SqlitePool;
use tracing::warn;

use crate::blob::BlobStore;
use crate::chunker::chunk_blob_prefix;
use crate::config::Config;
use crate::models::{DocState, StatusClass};
use crate::search_index::SearchClient;
use crate::status::{self, encode_document_id};

/// Artifact blob holding a document's map, written at mapping time.
pub fn map_artifact_name(file_name: &str) -> String {
    format!("{file_name}.map.json")
}

#[derive(Debug, Default)]
pub struct CleanupSummary {
    pub documents_removed: usize,
    pub chunks_deleted: usize,
    pub index_documents_deleted: usize,
    pub failures: usize,
}

/// Sweep the upload container and reconcile every soft-deleted document.
pub async fn run_cleanup(
    pool: &SqlitePool,
    store: &BlobStore,
    config: &Config,
    search: Option<&SearchClient>,
) -> Result<CleanupSummary> {
    let mut summary = CleanupSummary::default();

    let marked: Vec<String> = store
        .list(&config.storage.upload_container, "", true)?
        .into_iter()
        .filter(|entry| entry.soft_deleted)
        .map(|entry| entry.name)
        .collect();

    for name in marked {
        match cleanup_document(pool, store, config, search, &name).await {
            Ok((chunks, index_docs)) => {
                summary.documents_removed += 1;
                summary.chunks_deleted += chunks;
                summary.index_documents_deleted += index_docs;
            }
            Err(e) => {
                warn!(document = %name, error = %format!("{e:#}"), "cleanup failed; will retry next sweep");
                summary.failures += 1;
            }
        }
    }

    Ok(summary)
}

async fn cleanup_document(
    pool: &SqlitePool,
    store: &BlobStore,
    config: &Config,
    search: Option<&SearchClient>,
    name: &str,
) -> Result<(usize, usize)> {
    status::upsert(
        pool,
        name,
        "Removing document and derived data",
        StatusClass::Info,
        DocState::Deleting,
        false,
    )
    .await?;

    let chunk_names: Vec<String> = store
        .list(&config.storage.chunk_container, &chunk_blob_prefix(name), true)?
        .into_iter()
        .map(|entry| entry.name)
        .collect();

    // Index keys are derived from chunk blob names, so the index can be
    // purged from the storage listing alone.
    let mut index_docs = 0;
    if let Some(search) = search {
        let ids: Vec<String> = chunk_names.iter().map(|n| encode_document_id(n)).collect();
        if !ids.is_empty() {
            search
                .delete_documents(&ids)
                .await
                .map_err(|e| anyhow::anyhow!("index delete failed: {e}"))?;
            index_docs = ids.len();
        }
    }

    for batch in chunk_names.chunks(store.delete_batch_max()) {
        store.delete_batch(&config.storage.chunk_container, batch)?;
    }

    store.delete_batch(
        &config.storage.artifact_container,
        &[map_artifact_name(name)],
    )?;
    store.delete_batch(&config.storage.upload_container, &[name.to_string()])?;

    // The tag record may never have existed; deleting it is a no-op then.
    status::delete_tags(pool, name).await?;

    status::upsert(
        pool,
        name,
        &format!("Deleted document and {} chunks", chunk_names.len()),
        StatusClass::Info,
        DocState::Deleted,
        false,
    )
    .await?;

    Ok((chunk_names.len(), index_docs))
}
