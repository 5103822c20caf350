//! Upload dispatch: route a newly uploaded blob to its processing lane.
//!
//! Routing is by file extension alone. PDFs go to the layout-submission
//! lane, HTML, DOCX, and images to the non-PDF lane, and everything else
//! is recorded as `Skipped` without producing any queue message. The
//! enqueue carries a small randomized visibility delay so a bulk upload
//! of thousands of files does not hit the downstream services as one
//! spike.
//!
//! Dispatch never propagates an error to its caller: any failure is
//! written to the document's status journal and the document parks in
//! `Error` until resubmitted.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::backoff::dispatch_delay;
use crate::config::Config;
use crate::models::{DocState, StatusClass, WorkMessage};
use crate::queue::{self, NON_PDF_QUEUE, PDF_SUBMIT_QUEUE};
use crate::status;

/// Processing lane chosen for an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    PdfSubmit,
    NonPdf,
    Unsupported,
}

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp", "tif", "tiff", "webp"];

fn extension(blob_name: &str) -> String {
    blob_name
        .rsplit('/')
        .next()
        .unwrap_or(blob_name)
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default()
}

/// Route an upload by its file extension.
pub fn classify(blob_name: &str) -> Route {
    match extension(blob_name).as_str() {
        "pdf" => Route::PdfSubmit,
        "htm" | "html" | "docx" => Route::NonPdf,
        ext if IMAGE_EXTENSIONS.contains(&ext) => Route::NonPdf,
        _ => Route::Unsupported,
    }
}

pub fn is_image(blob_name: &str) -> bool {
    IMAGE_EXTENSIONS.contains(&extension(blob_name).as_str())
}

pub fn is_html(blob_name: &str) -> bool {
    matches!(extension(blob_name).as_str(), "htm" | "html")
}

pub fn is_docx(blob_name: &str) -> bool {
    extension(blob_name) == "docx"
}

/// Dispatch one uploaded document. Returns the state it landed in.
///
/// Starts the document's journal over (`fresh_start`), walks it through
/// `Uploaded` → `Processing` → `Queued` (or `Skipped`), and enqueues at
/// most one work message.
pub async fn dispatch_document(
    pool: &SqlitePool,
    config: &Config,
    blob_name: &str,
    blob_uri: &str,
) -> Result<DocState> {
    match try_dispatch(pool, config, blob_name, blob_uri).await {
        Ok(state) => Ok(state),
        Err(e) => {
            // Record the failure instead of raising; the journal is the
            // contract with operators.
            status::upsert(
                pool,
                blob_name,
                &format!("Dispatch failed: {e:#}"),
                StatusClass::Error,
                DocState::Error,
                false,
            )
            .await?;
            Ok(DocState::Error)
        }
    }
}

async fn try_dispatch(
    pool: &SqlitePool,
    config: &Config,
    blob_name: &str,
    blob_uri: &str,
) -> Result<DocState> {
    status::upsert(
        pool,
        blob_name,
        "File uploaded",
        StatusClass::Info,
        DocState::Uploaded,
        true,
    )
    .await?;
    status::upsert(
        pool,
        blob_name,
        "Dispatching by file type",
        StatusClass::Info,
        DocState::Processing,
        false,
    )
    .await?;

    let queue_name = match classify(blob_name) {
        Route::PdfSubmit => PDF_SUBMIT_QUEUE,
        Route::NonPdf => NON_PDF_QUEUE,
        Route::Unsupported => {
            let ext = extension(blob_name);
            status::upsert(
                pool,
                blob_name,
                &format!("Unexpected file type: .{ext}"),
                StatusClass::Error,
                DocState::Skipped,
                false,
            )
            .await?;
            return Ok(DocState::Skipped);
        }
    };

    let delay = dispatch_delay(config.dispatch.min_delay_secs, config.dispatch.max_delay_secs);
    let message = WorkMessage::new(blob_name, blob_uri);
    queue::send_work(pool, queue_name, &message, delay).await?;

    status::upsert(
        pool,
        blob_name,
        &format!("Queued for processing on {queue_name}"),
        StatusClass::Info,
        DocState::Queued,
        false,
    )
    .await?;
    Ok(DocState::Queued)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        ChunkingConfig, Config, DbConfig, DispatchConfig, LayoutConfig, QueueConfig,
        StorageConfig,
    };
    use crate::migrate;
    use crate::status::ReadMode;
    use sqlx::sqlite::SqlitePoolOptions;

    fn test_config() -> Config {
        Config {
            db: DbConfig {
                path: "/tmp/unused.sqlite".into(),
            },
            storage: StorageConfig {
                root: "/tmp/unused".into(),
                upload_container: "uploads".to_string(),
                chunk_container: "chunks".to_string(),
                artifact_container: "artifacts".to_string(),
                signing_key: "k".to_string(),
                signed_url_ttl_secs: 3600,
                delete_batch_max: 256,
            },
            queue: QueueConfig::default(),
            chunking: ChunkingConfig {
                target_tokens: 750,
                real_word_threshold: 0.1,
                dictionary_path: None,
            },
            // Zero delay so tests can receive immediately.
            dispatch: DispatchConfig {
                min_delay_secs: 0,
                max_delay_secs: 0,
            },
            layout: LayoutConfig {
                endpoint: "http://localhost:0".to_string(),
                api_key: None,
                poll_head_start_secs: 60,
                backoff_factor_secs: 30,
                max_submit_retries: 10,
                max_poll_retries: 10,
                timeout_secs: 5,
            },
            translation: Default::default(),
            vision: Default::default(),
            embedding: Default::default(),
            search: Default::default(),
        }
    }

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
    fn test_classify_by_extension() {
        assert_eq!(classify("docs/a.pdf"), Route::PdfSubmit);
        assert_eq!(classify("docs/A.PDF"), Route::PdfSubmit);
        assert_eq!(classify("a.html"), Route::NonPdf);
        assert_eq!(classify("a.htm"), Route::NonPdf);
        assert_eq!(classify("a.docx"), Route::NonPdf);
        assert_eq!(classify("photo.JPG"), Route::NonPdf);
        assert_eq!(classify("archive.zip"), Route::Unsupported);
        assert_eq!(classify("no_extension"), Route::Unsupported);
    }

    #[test]
    fn test_file_class_helpers() {
        assert!(is_image("scans/page.png"));
        assert!(!is_image("scans/page.pdf"));
        assert!(is_html("index.htm"));
        assert!(is_docx("report.docx"));
    }

    #[tokio::test]
    async fn test_pdf_routes_to_submit_lane() {
        let pool = test_pool().await;
        let config = test_config();

        let state = dispatch_document(&pool, &config, "docs/a.pdf", "file:///u/docs/a.pdf")
            .await
            .unwrap();
        assert_eq!(state, DocState::Queued);

        let msg = queue::receive(&pool, PDF_SUBMIT_QUEUE, 300)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(msg.work().unwrap().blob_name, "docs/a.pdf");
        assert_eq!(queue::depth(&pool, NON_PDF_QUEUE).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unsupported_extension_skips_without_messages() {
        let pool = test_pool().await;
        let config = test_config();

        let state = dispatch_document(&pool, &config, "archive.zip", "file:///u/archive.zip")
            .await
            .unwrap();
        assert_eq!(state, DocState::Skipped);

        for q in crate::queue::ALL_QUEUES {
            assert_eq!(queue::depth(&pool, q).await.unwrap(), 0);
        }

        let record = status::get(&pool, "archive.zip", ReadMode::Verbose)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.state, DocState::Skipped);
        let last = record.updates.last().unwrap();
        assert_eq!(last.class, StatusClass::Error);
        assert!(last.message.contains(".zip"));
    }

    #[tokio::test]
    async fn test_redispatch_restarts_history() {
        let pool = test_pool().await;
        let config = test_config();

        dispatch_document(&pool, &config, "docs/a.pdf", "u").await.unwrap();
        dispatch_document(&pool, &config, "docs/a.pdf", "u").await.unwrap();

        let record = status::get(&pool, "docs/a.pdf", ReadMode::Verbose)
            .await
            .unwrap()
            .unwrap();
        // Fresh start: only the second run's three updates remain.
        assert_eq!(record.updates.len(), 3);
        assert_eq!(record.state, DocState::Queued);
    }
}
