//! Indexing stage: load a document's enriched chunks, embed them, and
//! upload them to the search index.
//!
//! Both halves are optional. With embedding disabled the documents are
//! uploaded without vectors (keyword search only); with no search endpoint
//! the stage is a counted no-op so the rest of the pipeline can run
//! locally end to end.

use crate::blob::BlobStore;
use crate::chunker::chunk_blob_prefix;
use crate::config::EmbeddingConfig;
use crate::embedding::{embed_texts, EmbeddingProvider};
use crate::error::StageError;
use crate::models::Chunk;
use crate::search_index::{document_from_chunk, SearchClient, SearchDocument};

/// Load every chunk blob of one document, in index order.
pub fn load_chunks(
    store: &BlobStore,
    container: &str,
    file_name: &str,
) -> Result<Vec<Chunk>, StageError> {
    let entries = store.list(container, &chunk_blob_prefix(file_name), false)?;
    let mut chunks = Vec::with_capacity(entries.len());
    for entry in entries {
        let bytes = store.get(container, &entry.name)?;
        let chunk: Chunk = serde_json::from_slice(&bytes)
            .map_err(|e| StageError::terminal(format!("corrupt chunk blob {}: {e}", entry.name)))?;
        chunks.push(chunk);
    }
    chunks.sort_by_key(|c| c.chunk_index);
    Ok(chunks)
}

/// Embed and upload one document's chunk set. Returns how many index
/// documents were written.
pub async fn index_document(
    store: &BlobStore,
    chunk_container: &str,
    search: Option<&SearchClient>,
    provider: &dyn EmbeddingProvider,
    embedding_config: &EmbeddingConfig,
    file_name: &str,
) -> Result<usize, StageError> {
    let chunks = load_chunks(store, chunk_container, file_name)?;
    if chunks.is_empty() {
        return Err(StageError::terminal(format!(
            "no chunks found for {file_name}; was the document mapped?"
        )));
    }

    let embeddings = if embedding_config.is_enabled() {
        let mut all = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(embedding_config.batch_size.max(1)) {
            // Embed the translated text when present so the vectors live in
            // the same language space as queries.
            let texts: Vec<String> = batch
                .iter()
                .map(|c| {
                    c.translated_content
                        .clone()
                        .unwrap_or_else(|| c.content.clone())
                })
                .collect();
            // The provider already retries throttling internally; whatever
            // reaches here is document-fatal.
            let vectors = embed_texts(provider, embedding_config, &texts)
                .await
                .map_err(|e| StageError::terminal(format!("embedding failed: {e:#}")))?;
            if vectors.len() != batch.len() {
                return Err(StageError::terminal(format!(
                    "embedding count mismatch: {} texts, {} vectors",
                    batch.len(),
                    vectors.len()
                )));
            }
            all.extend(vectors.into_iter().map(Some));
        }
        all
    } else {
        vec![None; chunks.len()]
    };

    let documents: Vec<SearchDocument> = chunks
        .iter()
        .zip(embeddings)
        .map(|(chunk, embedding)| document_from_chunk(chunk, embedding))
        .collect();

    if let Some(search) = search {
        search.upload_documents(&documents).await?;
    }
    Ok(documents.len())
}
