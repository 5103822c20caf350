//! Queue worker: drains the processing lanes and settles every message.
//!
//! Each lane maps to one handler. A handler returning `Ok` acks the
//! message; a retryable [`StageError`] requeues a successor message with
//! jittered backoff (bounded by the lane's attempt counter); a terminal
//! error journals the document as `Error` and acks. The top of the loop
//! guarantees that no document ever fails silently: every settled message
//! leaves a trace in the status journal or the queue.

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use tracing::{debug, warn};

use crate::backoff::retry_backoff;
use crate::blob::BlobStore;
use crate::chunker::{write_chunks, Chunker};
use crate::cleanup::map_artifact_name;
use crate::config::Config;
use crate::dispatch::{is_docx, is_image};
use crate::docmap::{build_html_map, build_pdf_map};
use crate::docx::docx_to_html;
use crate::embedding::{create_provider, EmbeddingProvider};
use crate::enrich::{image_content, Enricher};
use crate::error::StageError;
use crate::indexer;
use crate::layout::{LayoutClient, PollStatus};
use crate::models::{Chunk, DocState, DocumentMap, FileClass, StatusClass, WorkMessage};
use crate::queue::{
    self, QueueMessage, ALL_QUEUES, ENRICHMENT_QUEUE, INDEXING_QUEUE, NON_PDF_QUEUE,
    PDF_POLLING_QUEUE, PDF_SUBMIT_QUEUE,
};
use crate::search_index::SearchClient;
use crate::status;

pub struct Worker {
    pool: SqlitePool,
    store: BlobStore,
    config: Config,
    layout: LayoutClient,
    chunker: Chunker,
    enricher: Enricher,
    search: Option<SearchClient>,
    provider: Box<dyn EmbeddingProvider>,
}

/// How a retryable failure was resolved.
enum RetryPlan {
    /// A successor message was enqueued with backoff; ack the original.
    Requeued,
    /// The lane's attempt cap is spent; treat as terminal.
    Exhausted,
    /// Lane has no attempt counter; leave the lease to expire and redeliver.
    LeaveLeased,
}

impl Worker {
    pub fn new(config: Config, pool: SqlitePool) -> Result<Self> {
        let store = BlobStore::from_config(&config.storage);
        let layout = LayoutClient::new(&config.layout)?;
        let chunker = Chunker::new(&config.chunking)?;
        let enricher = Enricher::new(&config.translation, &config.vision)?;
        let search = SearchClient::new(&config.search)?;
        let provider = create_provider(&config.embedding)?;
        Ok(Self {
            pool,
            store,
            config,
            layout,
            chunker,
            enricher,
            search,
            provider,
        })
    }

    /// Settle every currently-visible message across all lanes. Messages
    /// whose visibility delay has not elapsed are left for a later pass.
    pub async fn run_once(&self) -> Result<usize> {
        let mut settled = 0;
        loop {
            let mut progressed = false;
            for queue_name in ALL_QUEUES {
                while let Some(message) = queue::receive(
                    &self.pool,
                    queue_name,
                    self.config.queue.visibility_timeout_secs,
                )
                .await?
                {
                    self.settle(message).await?;
                    settled += 1;
                    progressed = true;
                }
            }
            if !progressed {
                break;
            }
        }
        Ok(settled)
    }

    async fn settle(&self, message: QueueMessage) -> Result<()> {
        let work = match message.work() {
            Ok(work) => work,
            Err(e) => {
                // Undecodable body: nothing to journal it under, drop it.
                warn!(queue = %message.queue, error = %format!("{e:#}"), "dropping malformed queue message");
                return queue::ack(&self.pool, &message.id).await;
            }
        };
        debug!(queue = %message.queue, document = %work.blob_name, "processing message");

        let outcome = match message.queue.as_str() {
            PDF_SUBMIT_QUEUE => self.handle_submit(&work).await,
            PDF_POLLING_QUEUE => self.handle_poll(&work).await,
            NON_PDF_QUEUE => self.handle_non_pdf(&work).await,
            ENRICHMENT_QUEUE => self.handle_enrich(&work).await,
            INDEXING_QUEUE => self.handle_indexing(&work).await,
            other => Err(StageError::terminal(format!("message on unknown queue {other:?}"))),
        };

        match outcome {
            Ok(()) => queue::ack(&self.pool, &message.id).await,
            Err(err) if err.is_retryable() => {
                match self.schedule_retry(&message.queue, &work, &err).await? {
                    RetryPlan::Requeued => queue::ack(&self.pool, &message.id).await,
                    RetryPlan::Exhausted => {
                        self.fail(&work.blob_name, &format!("Retries exhausted: {err}"))
                            .await?;
                        queue::ack(&self.pool, &message.id).await
                    }
                    RetryPlan::LeaveLeased => Ok(()),
                }
            }
            Err(err) => {
                self.fail(&work.blob_name, &err.to_string()).await?;
                queue::ack(&self.pool, &message.id).await
            }
        }
    }

    /// Requeue a retryable failure on its own lane, honoring the lane's
    /// attempt counter and backoff factor.
    async fn schedule_retry(
        &self,
        queue_name: &str,
        work: &WorkMessage,
        err: &StageError,
    ) -> Result<RetryPlan> {
        let (successor, attempt, cap, factor) = match queue_name {
            PDF_SUBMIT_QUEUE => (
                work.resubmit(),
                work.submit_queued_count + 1,
                self.config.layout.max_submit_retries,
                self.config.layout.backoff_factor_secs,
            ),
            PDF_POLLING_QUEUE => (
                work.repoll(),
                work.polling_queue_count + 1,
                self.config.layout.max_poll_retries,
                self.config.layout.backoff_factor_secs,
            ),
            ENRICHMENT_QUEUE => (
                work.re_enrich(),
                work.enrich_queued_count + 1,
                self.config.translation.max_retries,
                self.config.translation.backoff_factor_secs,
            ),
            _ => return Ok(RetryPlan::LeaveLeased),
        };

        if attempt > cap {
            return Ok(RetryPlan::Exhausted);
        }

        let delay = retry_backoff(factor, attempt);
        let state = if matches!(err, StageError::Throttled(_)) {
            DocState::Throttled
        } else {
            DocState::Processing
        };
        status::upsert(
            &self.pool,
            &work.blob_name,
            &format!("Attempt {attempt} requeued, retrying in {delay}s: {err}"),
            StatusClass::Debug,
            state,
            false,
        )
        .await?;
        queue::send_work(&self.pool, queue_name, &successor, delay).await?;
        Ok(RetryPlan::Requeued)
    }

    async fn fail(&self, blob_name: &str, message: &str) -> Result<()> {
        status::upsert(
            &self.pool,
            blob_name,
            message,
            StatusClass::Error,
            DocState::Error,
            false,
        )
        .await
    }

    // ── Lane handlers ──────────────────────────────────────────────────

    async fn handle_submit(&self, work: &WorkMessage) -> Result<(), StageError> {
        let url = self
            .store
            .signed_url(&self.config.storage.upload_container, &work.blob_name)?;
        let result_id = self.layout.submit(&url).await?;

        status::upsert(
            &self.pool,
            &work.blob_name,
            &format!("Layout analysis accepted ({result_id})"),
            StatusClass::Info,
            DocState::Processing,
            false,
        )
        .await?;
        queue::send_work(
            &self.pool,
            PDF_POLLING_QUEUE,
            &work.into_polling(&result_id),
            self.config.layout.poll_head_start_secs,
        )
        .await?;
        Ok(())
    }

    async fn handle_poll(&self, work: &WorkMessage) -> Result<(), StageError> {
        let Some(result_id) = &work.result_id else {
            return Err(StageError::terminal(
                "polling message carries no analysis result id",
            ));
        };

        match self.layout.poll(result_id).await? {
            PollStatus::Running => {
                let attempt = work.polling_queue_count.max(1);
                if attempt >= self.config.layout.max_poll_retries {
                    return Err(StageError::terminal(format!(
                        "layout analysis did not complete after {attempt} polls"
                    )));
                }
                let delay = retry_backoff(self.config.layout.backoff_factor_secs, attempt);
                status::upsert(
                    &self.pool,
                    &work.blob_name,
                    &format!("Analysis still running (poll {attempt}), next poll in {delay}s"),
                    StatusClass::Debug,
                    DocState::Processing,
                    false,
                )
                .await?;
                queue::send_work(&self.pool, PDF_POLLING_QUEUE, &work.repoll(), delay).await?;
                Ok(())
            }
            PollStatus::Succeeded(result) => {
                let map = build_pdf_map(&result);
                self.finish_mapping(work, map).await
            }
        }
    }

    async fn handle_non_pdf(&self, work: &WorkMessage) -> Result<(), StageError> {
        if is_image(&work.blob_name) {
            // Images have no structure to map; enrichment builds their
            // single synthetic chunk from vision output.
            status::upsert(
                &self.pool,
                &work.blob_name,
                "Image routed to enrichment",
                StatusClass::Info,
                DocState::Processing,
                false,
            )
            .await?;
            queue::send_work(
                &self.pool,
                ENRICHMENT_QUEUE,
                &WorkMessage::new(&work.blob_name, &work.blob_uri),
                0,
            )
            .await?;
            return Ok(());
        }

        let bytes = self
            .store
            .get(&self.config.storage.upload_container, &work.blob_name)?;
        let html = if is_docx(&work.blob_name) {
            docx_to_html(&bytes)?
        } else {
            String::from_utf8_lossy(&bytes).into_owned()
        };
        let map = build_html_map(&html);
        self.finish_mapping(work, map).await
    }

    /// Shared tail of both mapping paths: persist the map artifact, build
    /// and write the chunk set, and hand off to enrichment.
    async fn finish_mapping(
        &self,
        work: &WorkMessage,
        map: DocumentMap,
    ) -> Result<(), StageError> {
        let artifact = serde_json::to_vec(&map)
            .map_err(|e| StageError::terminal(format!("failed to serialize document map: {e}")))?;
        self.store.put(
            &self.config.storage.artifact_container,
            &map_artifact_name(&work.blob_name),
            &artifact,
        )?;

        let chunks = self.chunker.build(&map, &work.blob_name, &work.blob_uri);
        if chunks.is_empty() {
            return Err(StageError::terminal(
                "document produced no indexable content",
            ));
        }
        let written = write_chunks(&self.store, &self.config.storage.chunk_container, &chunks)?;

        status::upsert(
            &self.pool,
            &work.blob_name,
            &format!("Mapped {} elements into {written} chunks", map.elements.len()),
            StatusClass::Info,
            DocState::Processing,
            false,
        )
        .await?;
        queue::send_work(
            &self.pool,
            ENRICHMENT_QUEUE,
            &WorkMessage::new(&work.blob_name, &work.blob_uri),
            0,
        )
        .await?;
        Ok(())
    }

    async fn handle_enrich(&self, work: &WorkMessage) -> Result<(), StageError> {
        if is_image(&work.blob_name) {
            self.enrich_image(work).await?;
        } else {
            let mut chunks = indexer::load_chunks(
                &self.store,
                &self.config.storage.chunk_container,
                &work.blob_name,
            )?;
            if chunks.is_empty() {
                return Err(StageError::terminal(format!(
                    "no chunks found for {}; was the document mapped?",
                    work.blob_name
                )));
            }
            for chunk in &mut chunks {
                self.enricher.enrich_chunk(chunk).await?;
            }
            write_chunks(&self.store, &self.config.storage.chunk_container, &chunks)?;
            status::upsert(
                &self.pool,
                &work.blob_name,
                &format!("Enriched {} chunks", chunks.len()),
                StatusClass::Info,
                DocState::Processing,
                false,
            )
            .await?;
        }

        queue::send_work(
            &self.pool,
            INDEXING_QUEUE,
            &WorkMessage::new(&work.blob_name, &work.blob_uri),
            0,
        )
        .await?;
        Ok(())
    }

    async fn enrich_image(&self, work: &WorkMessage) -> Result<(), StageError> {
        let url = self
            .store
            .signed_url(&self.config.storage.upload_container, &work.blob_name)?;
        let analysis = self.enricher.analyze_image(&url).await?;
        let content = image_content(&analysis);
        if content.is_empty() {
            return Err(StageError::terminal(
                "vision analysis produced no description",
            ));
        }

        let mut chunk = Chunk {
            file_name: work.blob_name.clone(),
            file_uri: work.blob_uri.clone(),
            chunk_index: 0,
            token_count: self.chunker.token_count(&content),
            content,
            pages: vec![1],
            title: analysis.caption.clone().unwrap_or_default(),
            section: String::new(),
            processed_at: chrono::Utc::now(),
            file_class: FileClass::Image,
            language: None,
            translated_content: None,
            translated_title: None,
            translated_section: None,
        };
        // Caption and OCR text get the same language treatment as prose.
        self.enricher.enrich_chunk(&mut chunk).await?;
        write_chunks(&self.store, &self.config.storage.chunk_container, &[chunk])?;

        status::upsert(
            &self.pool,
            &work.blob_name,
            "Image analyzed into one chunk",
            StatusClass::Info,
            DocState::Processing,
            false,
        )
        .await?;
        Ok(())
    }

    async fn handle_indexing(&self, work: &WorkMessage) -> Result<(), StageError> {
        status::upsert(
            &self.pool,
            &work.blob_name,
            "Indexing chunks",
            StatusClass::Info,
            DocState::Indexing,
            false,
        )
        .await?;

        let count = indexer::index_document(
            &self.store,
            &self.config.storage.chunk_container,
            self.search.as_ref(),
            self.provider.as_ref(),
            &self.config.embedding,
            &work.blob_name,
        )
        .await?;

        status::upsert(
            &self.pool,
            &work.blob_name,
            &format!("Processing complete: {count} chunks indexed"),
            StatusClass::Info,
            DocState::Complete,
            false,
        )
        .await?;
        Ok(())
    }
}

/// Build a worker from config, connecting the database first.
pub async fn connect_worker(config: Config) -> Result<Worker> {
    let pool = crate::db::connect(&config.db)
        .await
        .context("Failed to open work database")?;
    Worker::new(config, pool)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::*;
    use crate::migrate;
    use crate::status::ReadMode;
    use httpmock::prelude::*;
    use sqlx::sqlite::SqlitePoolOptions;
    use tempfile::TempDir;

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        migrate::ensure_schema(&pool).await.unwrap();
        pool
    }

    fn test_config(root: &std::path::Path, layout_url: &str) -> Config {
        Config {
            db: DbConfig {
                path: "/tmp/unused.sqlite".into(),
            },
            storage: StorageConfig {
                root: root.to_path_buf(),
                upload_container: "uploads".to_string(),
                chunk_container: "chunks".to_string(),
                artifact_container: "artifacts".to_string(),
                signing_key: "k".to_string(),
                signed_url_ttl_secs: 3600,
                delete_batch_max: 256,
            },
            queue: QueueConfig::default(),
            chunking: ChunkingConfig {
                target_tokens: 10_000,
                real_word_threshold: 0.1,
                dictionary_path: None,
            },
            dispatch: DispatchConfig {
                min_delay_secs: 0,
                max_delay_secs: 0,
            },
            layout: LayoutConfig {
                endpoint: layout_url.to_string(),
                api_key: None,
                poll_head_start_secs: 0,
                backoff_factor_secs: 1,
                max_submit_retries: 2,
                max_poll_retries: 3,
                timeout_secs: 5,
            },
            translation: TranslationConfig {
                backoff_factor_secs: 1,
                max_retries: 1,
                ..Default::default()
            },
            vision: Default::default(),
            embedding: Default::default(),
            search: Default::default(),
        }
    }

    async fn worker_with(root: &TempDir, layout_url: &str) -> Worker {
        let pool = test_pool().await;
        Worker::new(test_config(root.path(), layout_url), pool).unwrap()
    }

    /// Extract the delay from an "Analysis still running (poll N), next poll
    /// in Ns" journal entry.
    fn poll_delay_secs(message: &str) -> i64 {
        message
            .rsplit_once("next poll in ")
            .and_then(|(_, rest)| rest.strip_suffix('s'))
            .and_then(|secs| secs.parse().ok())
            .unwrap_or_else(|| panic!("unparseable backoff entry: {message}"))
    }

    #[tokio::test]
    async fn test_html_upload_flows_to_complete() {
        let tmp = TempDir::new().unwrap();
        let worker = worker_with(&tmp, "http://localhost:0").await;

        worker
            .store
            .put(
                "uploads",
                "pages/guide.html",
                b"<html><body><h1>Guide</h1><p>This is the body text of the page.</p></body></html>",
            )
            .unwrap();
        let uri = worker.store.uri("uploads", "pages/guide.html");
        crate::dispatch::dispatch_document(&worker.pool, &worker.config, "pages/guide.html", &uri)
            .await
            .unwrap();

        let settled = worker.run_once().await.unwrap();
        // non-pdf, enrichment, indexing
        assert_eq!(settled, 3);

        let record = status::get(&worker.pool, "pages/guide.html", ReadMode::Verbose)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.state, DocState::Complete);

        let chunks = indexer::load_chunks(&worker.store, "chunks", "pages/guide.html").unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].title, "Guide");
        assert!(worker.store.exists("artifacts", "pages/guide.html.map.json"));
    }

    #[tokio::test]
    async fn test_pdf_polls_with_backoff_then_chunks() {
        let tmp = TempDir::new().unwrap();
        let server = MockServer::start_async().await;
        let worker = worker_with(&tmp, &server.base_url()).await;

        worker.store.put("uploads", "docs/r.pdf", b"%PDF-").unwrap();
        let uri = worker.store.uri("uploads", "docs/r.pdf");
        queue::send_work(
            &worker.pool,
            PDF_SUBMIT_QUEUE,
            &WorkMessage::new("docs/r.pdf", &uri),
            0,
        )
        .await
        .unwrap();

        let submit = server
            .mock_async(|when, then| {
                when.method(POST).path("/analyze");
                then.status(202).header(
                    "operation-location",
                    format!("{}/analyzeResults/op-7", server.base_url()),
                );
            })
            .await;
        let mut running = server
            .mock_async(|when, then| {
                when.method(GET).path("/analyzeResults/op-7");
                then.status(200)
                    .json_body(serde_json::json!({ "status": "running" }));
            })
            .await;

        // Pass 1: submit + first poll (head start is 0), which sees
        // "running" and requeues with backoff — exactly 1s at factor 1.
        worker.run_once().await.unwrap();
        submit.assert_async().await;
        running.assert_async().await;

        // Pass 2 after the 1s backoff: still running, requeues again with
        // a larger delay (2-4s for attempt 2).
        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
        worker.run_once().await.unwrap();
        running.assert_hits_async(2).await;

        let record = status::get(&worker.pool, "docs/r.pdf", ReadMode::Verbose)
            .await
            .unwrap()
            .unwrap();
        let delays: Vec<i64> = record
            .updates
            .iter()
            .filter(|u| u.class == StatusClass::Debug && u.message.contains("still running"))
            .map(|u| poll_delay_secs(&u.message))
            .collect();
        assert_eq!(delays.len(), 2, "expected one entry per running poll");
        assert!(
            delays[1] > delays[0],
            "backoff must grow between polls: {delays:?}"
        );

        // Flip the service to succeeded and wait out the second backoff.
        running.delete_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/analyzeResults/op-7");
                then.status(200).json_body(serde_json::json!({
                    "status": "succeeded",
                    "analyzeResult": {
                        "content": "The quarterly report is now available to all teams.",
                        "paragraphs": [
                            { "span": { "offset": 0, "length": 51 }, "page": 1 }
                        ]
                    }
                }));
            })
            .await;
        tokio::time::sleep(std::time::Duration::from_millis(4100)).await;
        worker.run_once().await.unwrap();

        let record = status::get(&worker.pool, "docs/r.pdf", ReadMode::Terse)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.state, DocState::Complete);
        let chunks = indexer::load_chunks(&worker.store, "chunks", "docs/r.pdf").unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].pages, vec![1]);
    }

    #[tokio::test]
    async fn test_submit_throttle_requeues_then_exhausts() {
        let tmp = TempDir::new().unwrap();
        let server = MockServer::start_async().await;
        let worker = worker_with(&tmp, &server.base_url()).await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/analyze");
                then.status(429);
            })
            .await;

        worker.store.put("uploads", "a.pdf", b"%PDF-").unwrap();
        queue::send_work(
            &worker.pool,
            PDF_SUBMIT_QUEUE,
            &WorkMessage::new("a.pdf", "u"),
            0,
        )
        .await
        .unwrap();

        // Attempt 1 and 2 requeue (cap is 2); each backoff is 1s at
        // factor 1 for attempt 1, up to 4s for attempt 2.
        worker.run_once().await.unwrap();
        let record = status::get(&worker.pool, "a.pdf", ReadMode::Verbose)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.state, DocState::Throttled);

        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
        worker.run_once().await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(4100)).await;

        // Attempt 3 exceeds the cap: terminal.
        worker.run_once().await.unwrap();
        let record = status::get(&worker.pool, "a.pdf", ReadMode::Verbose)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.state, DocState::Error);
        assert!(record
            .updates
            .iter()
            .any(|u| u.message.contains("Retries exhausted")));
        assert_eq!(queue::depth(&worker.pool, PDF_SUBMIT_QUEUE).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_enrichment_throttle_increments_counter_then_terminal() {
        let tmp = TempDir::new().unwrap();
        let server = MockServer::start_async().await;
        let pool = test_pool().await;
        let mut config = test_config(tmp.path(), "http://localhost:0");
        config.translation.endpoint = Some(server.base_url());
        let worker = Worker::new(config, pool).unwrap();

        server
            .mock_async(|when, then| {
                when.method(POST).path("/detect");
                then.status(429);
            })
            .await;

        // A chunk set must already exist for the enrichment stage.
        let map = DocumentMap {
            content: "Some real text for the chunk.".to_string(),
            elements: vec![crate::models::StructureElement {
                text: "Some real text for the chunk.".to_string(),
                kind: crate::models::ElementKind::Text,
                title: String::new(),
                section: String::new(),
                page: 1,
                start: 0,
                end: 28,
            }],
        };
        let chunks = worker.chunker.build(&map, "a.html", "u");
        write_chunks(&worker.store, "chunks", &chunks).unwrap();

        queue::send_work(
            &worker.pool,
            ENRICHMENT_QUEUE,
            &WorkMessage::new("a.html", "u"),
            0,
        )
        .await
        .unwrap();

        // First throttle requeues with enrich_queued_count = 1.
        worker.run_once().await.unwrap();
        let requeued = queue::receive(&worker.pool, ENRICHMENT_QUEUE, 0).await;
        // Backoff is 1s at factor 1; not visible yet.
        assert!(requeued.unwrap().is_none());

        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
        // Second throttle: attempt 2 exceeds max_retries = 1, terminal.
        worker.run_once().await.unwrap();

        let record = status::get(&worker.pool, "a.html", ReadMode::Verbose)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.state, DocState::Error);
        assert!(record
            .updates
            .iter()
            .any(|u| u.class == StatusClass::Debug && u.message.contains("Attempt 1")));
    }

    #[tokio::test]
    async fn test_image_gets_synthetic_chunk_from_vision() {
        let tmp = TempDir::new().unwrap();
        let server = MockServer::start_async().await;
        let pool = test_pool().await;
        let mut config = test_config(tmp.path(), "http://localhost:0");
        config.vision.endpoint = Some(server.base_url());
        let worker = Worker::new(config, pool).unwrap();

        server
            .mock_async(|when, then| {
                when.method(POST).path("/analyze");
                then.status(200).json_body(serde_json::json!({
                    "caption": "an office floor plan",
                    "tags": ["floorplan"],
                    "text": "Exit"
                }));
            })
            .await;

        worker.store.put("uploads", "plans/floor.png", b"\x89PNG").unwrap();
        let uri = worker.store.uri("uploads", "plans/floor.png");
        crate::dispatch::dispatch_document(&worker.pool, &worker.config, "plans/floor.png", &uri)
            .await
            .unwrap();
        worker.run_once().await.unwrap();

        let chunks = indexer::load_chunks(&worker.store, "chunks", "plans/floor.png").unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].file_class, FileClass::Image);
        assert_eq!(chunks[0].title, "an office floor plan");
        assert!(chunks[0].content.contains("Exit"));

        let record = status::get(&worker.pool, "plans/floor.png", ReadMode::Terse)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.state, DocState::Complete);
    }

    #[tokio::test]
    async fn test_malformed_message_is_dropped() {
        let tmp = TempDir::new().unwrap();
        let worker = worker_with(&tmp, "http://localhost:0").await;
        queue::send(&worker.pool, NON_PDF_QUEUE, "not json", 0)
            .await
            .unwrap();
        assert_eq!(worker.run_once().await.unwrap(), 1);
        assert_eq!(queue::depth(&worker.pool, NON_PDF_QUEUE).await.unwrap(), 0);
    }
}
