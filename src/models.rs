//! Core data models used throughout chunkmill.
//!
//! These types represent the queue messages, document structure, and chunks
//! that flow through the ingestion pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Processing state of one source document, as recorded in the status journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocState {
    Uploaded,
    Processing,
    Queued,
    Indexing,
    Skipped,
    Complete,
    Error,
    Throttled,
    Deleting,
    Deleted,
}

impl DocState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocState::Uploaded => "Uploaded",
            DocState::Processing => "Processing",
            DocState::Queued => "Queued",
            DocState::Indexing => "Indexing",
            DocState::Skipped => "Skipped",
            DocState::Complete => "Complete",
            DocState::Error => "Error",
            DocState::Throttled => "Throttled",
            DocState::Deleting => "Deleting",
            DocState::Deleted => "Deleted",
        }
    }

    pub fn parse(s: &str) -> Option<DocState> {
        Some(match s {
            "Uploaded" => DocState::Uploaded,
            "Processing" => DocState::Processing,
            "Queued" => DocState::Queued,
            "Indexing" => DocState::Indexing,
            "Skipped" => DocState::Skipped,
            "Complete" => DocState::Complete,
            "Error" => DocState::Error,
            "Throttled" => DocState::Throttled,
            "Deleting" => DocState::Deleting,
            "Deleted" => DocState::Deleted,
            _ => return None,
        })
    }
}

/// Classification of one status journal update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusClass {
    Debug,
    Info,
    Error,
}

impl StatusClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusClass::Debug => "Debug",
            StatusClass::Info => "Info",
            StatusClass::Error => "Error",
        }
    }

    pub fn parse(s: &str) -> Option<StatusClass> {
        Some(match s {
            "Debug" => StatusClass::Debug,
            "Info" => StatusClass::Info,
            "Error" => StatusClass::Error,
            _ => return None,
        })
    }
}

/// Payload passed between queue stages.
///
/// Messages are immutable once enqueued: a retry constructs a new message
/// with the relevant counter incremented rather than mutating in place, so
/// every message fully describes its own retry history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkMessage {
    /// Blob name relative to the upload container (the document's natural key).
    pub blob_name: String,
    /// Full URI of the blob in storage.
    pub blob_uri: String,
    /// Attempt counter for the layout-submission lane.
    #[serde(default)]
    pub submit_queued_count: u32,
    /// Attempt counter for the layout-polling lane.
    #[serde(default)]
    pub polling_queue_count: u32,
    /// Attempt counter for the enrichment lane.
    #[serde(default)]
    pub enrich_queued_count: u32,
    /// Correlation id returned by the layout-analysis service on submit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_id: Option<String>,
}

impl WorkMessage {
    pub fn new(blob_name: &str, blob_uri: &str) -> Self {
        Self {
            blob_name: blob_name.to_string(),
            blob_uri: blob_uri.to_string(),
            submit_queued_count: 0,
            polling_queue_count: 0,
            enrich_queued_count: 0,
            result_id: None,
        }
    }

    /// New message for a submit-lane retry, counter incremented.
    pub fn resubmit(&self) -> Self {
        let mut next = self.clone();
        next.submit_queued_count = self.submit_queued_count + 1;
        next
    }

    /// New message handing off to the polling lane with the service's
    /// correlation id and a fresh attempt counter.
    pub fn into_polling(&self, result_id: &str) -> Self {
        let mut next = self.clone();
        next.result_id = Some(result_id.to_string());
        next.polling_queue_count = 1;
        next
    }

    /// New message for a polling-lane retry, counter incremented.
    pub fn repoll(&self) -> Self {
        let mut next = self.clone();
        next.polling_queue_count = self.polling_queue_count + 1;
        next
    }

    /// New message for an enrichment-lane retry, counter incremented.
    pub fn re_enrich(&self) -> Self {
        let mut next = self.clone();
        next.enrich_queued_count = self.enrich_queued_count + 1;
        next
    }
}

/// Kind of one classified structural unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElementKind {
    Text,
    Table,
}

/// One paragraph- or table-level unit within a [`DocumentMap`].
///
/// `title` and `section` are last-seen values: they persist across
/// subsequent elements until superseded by a new title or section heading.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructureElement {
    /// Plain text, or generated HTML for tables.
    pub text: String,
    pub kind: ElementKind,
    /// Nearest preceding title text ("" before any title is seen).
    pub title: String,
    /// Nearest preceding section-heading text ("" before any is seen).
    pub section: String,
    /// 1-based page number (always 1 for HTML input).
    pub page: u32,
    /// Character offset range in the source content string.
    pub start: usize,
    pub end: usize,
}

/// Structured intermediate representation of one document, prior to chunking.
///
/// Invariant: elements are non-overlapping and collectively cover all
/// textual content that survived classification — header, footer, page
/// number, and footnote spans are dropped during mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentMap {
    /// Full extracted text content as one flat string.
    pub content: String,
    pub elements: Vec<StructureElement>,
}

/// File class recorded on each chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileClass {
    Text,
    Image,
}

/// A size-bounded, metadata-tagged unit of retrievable content.
///
/// Persisted as one JSON blob per chunk at
/// `{source_directory}/{source_filename}/{index}.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Source document path (relative to the upload container).
    pub file_name: String,
    /// Full URI of the source document.
    pub file_uri: String,
    /// Sequential index within the document's chunk set.
    pub chunk_index: usize,
    /// Accumulated token count of `content`.
    pub token_count: usize,
    /// Concatenated element text.
    pub content: String,
    /// Page numbers covered, deduplicated across consecutive elements.
    pub pages: Vec<u32>,
    pub title: String,
    pub section: String,
    pub processed_at: DateTime<Utc>,
    pub file_class: FileClass,
    /// Detected source language, set by the enrichment stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    // Translations live alongside the untouched originals; source fields
    // are never overwritten.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translated_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translated_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translated_section: Option<String>,
}
