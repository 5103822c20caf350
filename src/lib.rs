//! # Chunkmill
//!
//! A queue-driven document ingestion and chunking pipeline — the content
//! side of a retrieval-augmented application.
//!
//! Uploaded documents are dispatched by file type into processing lanes,
//! converted into a structural map (via an asynchronous layout-analysis
//! service for PDFs, or markup parsing for HTML and DOCX), packed into
//! size-bounded chunks, enriched with language detection, translation,
//! and image analysis, and finally embedded and uploaded to a search
//! index. Every stage appends to a per-document status journal, and a
//! cleanup reconciler removes all derived data for soft-deleted uploads.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────┐   ┌────────────────────┐   ┌──────────────┐
//! │ Uploads │──▶│ Dispatch (by ext)  │──▶│ SQLite queues │
//! └─────────┘   └────────────────────┘   └──────┬───────┘
//!                                               │
//!      pdf-submit ── pdf-polling ── non-pdf ────┤
//!                                               ▼
//!               ┌──────────┐   ┌────────────┐   ┌──────────┐
//!               │ Mapping  │──▶│ Chunking   │──▶│ Enrich   │
//!               └──────────┘   └────────────┘   └────┬─────┘
//!                                                    ▼
//!                                          ┌──────────────────┐
//!                                          │ Embed + index    │
//!                                          └──────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`dispatch`] | Extension routing for uploads |
//! | [`layout`] | Layout-analysis service client |
//! | [`docmap`] | Span classification into document maps |
//! | [`docx`] | DOCX to HTML conversion |
//! | [`chunker`] | Size-bounded chunk assembly |
//! | [`enrich`] | Language detection, translation, image analysis |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`search_index`] | Search index upload/delete client |
//! | [`indexer`] | Embed-and-upload stage |
//! | [`status`] | Append-only per-document status journal |
//! | [`cleanup`] | Soft-delete reconciler |
//! | [`queue`] | SQLite-backed work queues |
//! | [`blob`] | Local-filesystem blob store |
//! | [`worker`] | Queue worker and lane handlers |

pub mod backoff;
pub mod blob;
pub mod chunker;
pub mod cleanup;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod docmap;
pub mod docx;
pub mod embedding;
pub mod enrich;
pub mod error;
pub mod indexer;
pub mod layout;
pub mod migrate;
pub mod models;
pub mod queue;
pub mod search_index;
pub mod status;
pub mod worker;
