//! Search index client.
//!
//! Uploads enriched chunks (and their embedding vectors) as index
//! documents and deletes them again when a source document is removed.
//! Document keys are the reversible base64 encoding of the chunk's blob
//! name, so the cleanup reconciler can derive every key for a document
//! from a storage listing alone, without querying the index.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::SearchConfig;
use crate::error::{classify_status, transport_error, StageError};
use crate::models::{Chunk, FileClass};
use crate::status::encode_document_id;

pub struct SearchClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    index: String,
    upload_batch_size: usize,
}

/// One document in the search index, mirroring the chunk fields the
/// retrieval side queries on.
#[derive(Debug, Clone, Serialize)]
pub struct SearchDocument {
    /// Reversible key: base64 of the chunk blob name.
    pub id: String,
    pub file_name: String,
    pub file_uri: String,
    pub chunk_index: usize,
    pub token_count: usize,
    pub content: String,
    pub title: String,
    pub section: String,
    pub pages: Vec<u32>,
    pub processed_at: DateTime<Utc>,
    pub file_class: FileClass,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub translated_content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub translated_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub translated_section: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

#[derive(Debug, Deserialize)]
struct IndexResponse {
    value: Vec<IndexResult>,
}

#[derive(Debug, Deserialize)]
struct IndexResult {
    key: String,
    succeeded: bool,
}

/// Build the index document for one enriched chunk.
pub fn document_from_chunk(chunk: &Chunk, embedding: Option<Vec<f32>>) -> SearchDocument {
    let blob_name = crate::chunker::chunk_blob_name(&chunk.file_name, chunk.chunk_index);
    SearchDocument {
        id: encode_document_id(&blob_name),
        file_name: chunk.file_name.clone(),
        file_uri: chunk.file_uri.clone(),
        chunk_index: chunk.chunk_index,
        token_count: chunk.token_count,
        content: chunk.content.clone(),
        title: chunk.title.clone(),
        section: chunk.section.clone(),
        pages: chunk.pages.clone(),
        processed_at: chunk.processed_at,
        file_class: chunk.file_class,
        language: chunk.language.clone(),
        translated_content: chunk.translated_content.clone(),
        translated_title: chunk.translated_title.clone(),
        translated_section: chunk.translated_section.clone(),
        embedding,
    }
}

impl SearchClient {
    pub fn new(config: &SearchConfig) -> anyhow::Result<Option<Self>> {
        let Some(endpoint) = &config.endpoint else {
            return Ok(None);
        };
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Some(Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            index: config.index.clone(),
            upload_batch_size: config.upload_batch_size,
        }))
    }

    /// Upload documents in batches of at most `upload_batch_size`.
    pub async fn upload_documents(&self, documents: &[SearchDocument]) -> Result<(), StageError> {
        for batch in documents.chunks(self.upload_batch_size.max(1)) {
            let values: Vec<serde_json::Value> = batch
                .iter()
                .map(|d| {
                    let mut v = serde_json::to_value(d).unwrap_or_default();
                    v["@action"] = serde_json::Value::from("mergeOrUpload");
                    v
                })
                .collect();
            self.post_actions(&values, "index upload").await?;
        }
        Ok(())
    }

    /// Delete documents by key. Missing keys are reported succeeded by the
    /// service, so deletes are idempotent.
    pub async fn delete_documents(&self, ids: &[String]) -> Result<(), StageError> {
        for batch in ids.chunks(self.upload_batch_size.max(1)) {
            let values: Vec<serde_json::Value> = batch
                .iter()
                .map(|id| serde_json::json!({ "@action": "delete", "id": id }))
                .collect();
            self.post_actions(&values, "index delete").await?;
        }
        Ok(())
    }

    async fn post_actions(
        &self,
        values: &[serde_json::Value],
        operation: &str,
    ) -> Result<(), StageError> {
        let mut request = self
            .http
            .post(format!("{}/indexes/{}/docs/index", self.endpoint, self.index))
            .json(&serde_json::json!({ "value": values }));
        if let Some(key) = &self.api_key {
            request = request.header("api-key", key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| transport_error(operation, e))?;
        if !response.status().is_success() {
            return Err(classify_status(response.status(), operation));
        }

        let body: IndexResponse = response
            .json()
            .await
            .map_err(|e| StageError::terminal(format!("malformed {operation} response: {e}")))?;
        let failed: Vec<String> = body
            .value
            .into_iter()
            .filter(|r| !r.succeeded)
            .map(|r| r.key)
            .collect();
        if !failed.is_empty() {
            return Err(StageError::terminal(format!(
                "{operation}: {} documents rejected: {}",
                failed.len(),
                failed.join(", ")
            )));
        }
        Ok(())
    }
}
