//! # Chunkmill CLI (`mill`)
//!
//! The `mill` binary drives the ingestion pipeline end to end: database
//! initialization, document upload and dispatch, queue work, status
//! queries, soft deletion, and cleanup reconciliation.
//!
//! ## Usage
//!
//! ```bash
//! mill --config ./config/mill.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `mill init` | Create the SQLite database and run schema migrations |
//! | `mill upload <path>` | Store a document and dispatch it for processing |
//! | `mill work` | Drain the work queues |
//! | `mill status [path]` | Show document processing status |
//! | `mill delete <name>` | Soft-delete an uploaded document |
//! | `mill cleanup` | Remove all derived data for soft-deleted documents |
//! | `mill queues` | Show per-lane queue depths |
//!
//! ## Examples
//!
//! ```bash
//! # Initialize the database
//! mill init --config ./config/mill.toml
//!
//! # Upload a document under a nested name with tags
//! mill upload ./report.pdf --name finance/2026/report.pdf --tags finance,q2
//!
//! # Process everything currently queued
//! mill work --passes 10 --sleep-secs 2
//!
//! # Inspect one document, including the retry audit trail
//! mill status finance/2026/report.pdf --verbose
//!
//! # Remove a document and everything derived from it
//! mill delete finance/2026/report.pdf
//! mill cleanup
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use chunkmill::blob::BlobStore;
use chunkmill::cleanup::run_cleanup;
use chunkmill::config::{self, Config};
use chunkmill::dispatch::dispatch_document;
use chunkmill::models::DocState;
use chunkmill::search_index::SearchClient;
use chunkmill::status::{self, ReadMode, StatusQuery};
use chunkmill::{db, migrate, queue, worker};

/// Chunkmill — a queue-driven document ingestion and chunking pipeline.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/mill.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "mill",
    about = "Chunkmill — a queue-driven document ingestion and chunking pipeline",
    version,
    long_about = "Chunkmill ingests uploaded documents (PDF, HTML, DOCX, images), maps their \
    structure, packs them into size-bounded chunks, enriches them with language detection, \
    translation, and image analysis, and uploads them to a search index. Processing is driven \
    by durable work queues with jittered retry backoff, and every document keeps an append-only \
    status journal."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/mill.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables
    /// (status_log, status_updates, document_tags, queue_messages).
    /// This command is idempotent — running it multiple times is safe.
    Init,

    /// Upload a document and dispatch it for processing.
    ///
    /// Copies the file into the upload container, restarts the document's
    /// status journal, and enqueues it on the lane matching its file
    /// extension. Unsupported extensions are journaled as `Skipped`.
    Upload {
        /// Local file to upload.
        path: PathBuf,

        /// Blob name to store it under (may contain `/` separators).
        /// Defaults to the file's name.
        #[arg(long)]
        name: Option<String>,

        /// Comma-separated tags to attach to the document.
        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,
    },

    /// Drain the work queues.
    ///
    /// Each pass settles every currently-visible message across all lanes;
    /// messages waiting out a retry backoff become visible on a later pass.
    Work {
        /// Number of passes to run.
        #[arg(long, default_value_t = 1)]
        passes: u32,

        /// Seconds to sleep between passes.
        #[arg(long, default_value_t = 1)]
        sleep_secs: u64,
    },

    /// Show document processing status.
    ///
    /// With a path, prints that document's full journal. Without one,
    /// lists all matching documents.
    Status {
        /// Document path (blob name) to inspect.
        path: Option<String>,

        /// Include Debug updates (the retry/backoff audit trail).
        #[arg(long)]
        verbose: bool,

        /// Filter by state (e.g. Complete, Error, Skipped).
        #[arg(long)]
        state: Option<String>,

        /// Only documents with activity in the last N hours.
        #[arg(long)]
        within_hours: Option<i64>,

        /// Only documents whose path starts with this prefix.
        #[arg(long)]
        prefix: Option<String>,

        /// Only documents carrying this tag.
        #[arg(long)]
        tag: Option<String>,
    },

    /// Soft-delete an uploaded document.
    ///
    /// Marks the upload for deletion; `mill cleanup` later removes its
    /// chunks, index documents, artifacts, and tags.
    Delete {
        /// Blob name of the upload to delete.
        name: String,
    },

    /// Reconcile soft-deleted documents.
    ///
    /// Removes search index documents, chunk blobs, map artifacts, tag
    /// records, and finally the upload blobs themselves for every
    /// soft-deleted document. Safe to re-run; failures are retried on the
    /// next sweep.
    Cleanup,

    /// Show per-lane queue depths.
    Queues,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Upload { path, name, tags } => {
            run_upload(&cfg, &path, name, tags).await?;
        }
        Commands::Work { passes, sleep_secs } => {
            let worker = worker::connect_worker(cfg).await?;
            let mut total = 0;
            for pass in 1..=passes {
                let settled = worker.run_once().await?;
                total += settled;
                if pass < passes {
                    tokio::time::sleep(std::time::Duration::from_secs(sleep_secs)).await;
                }
            }
            println!("Settled {total} messages over {passes} passes.");
        }
        Commands::Status {
            path,
            verbose,
            state,
            within_hours,
            prefix,
            tag,
        } => {
            run_status(&cfg, path, verbose, state, within_hours, prefix, tag).await?;
        }
        Commands::Delete { name } => {
            let store = BlobStore::from_config(&cfg.storage);
            store.soft_delete(&cfg.storage.upload_container, &name)?;
            println!("Marked {name} for deletion. Run `mill cleanup` to reconcile.");
        }
        Commands::Cleanup => {
            let pool = db::connect(&cfg.db).await?;
            let store = BlobStore::from_config(&cfg.storage);
            let search = SearchClient::new(&cfg.search)?;
            let summary = run_cleanup(&pool, &store, &cfg, search.as_ref()).await?;
            println!(
                "Removed {} documents ({} chunks, {} index documents); {} failures.",
                summary.documents_removed,
                summary.chunks_deleted,
                summary.index_documents_deleted,
                summary.failures
            );
        }
        Commands::Queues => {
            let pool = db::connect(&cfg.db).await?;
            for queue_name in queue::ALL_QUEUES {
                let depth = queue::depth(&pool, queue_name).await?;
                println!("{queue_name:<12} {depth}");
            }
        }
    }

    Ok(())
}

async fn run_upload(
    cfg: &Config,
    path: &std::path::Path,
    name: Option<String>,
    tags: Vec<String>,
) -> Result<()> {
    let blob_name = match name {
        Some(name) => name,
        None => path
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .context("Upload path has no usable file name; pass --name")?,
    };

    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let store = BlobStore::from_config(&cfg.storage);
    store.put(&cfg.storage.upload_container, &blob_name, &bytes)?;

    let pool = db::connect(&cfg.db).await?;
    if !tags.is_empty() {
        status::upsert_tags(&pool, &blob_name, &tags).await?;
    }
    let uri = store.uri(&cfg.storage.upload_container, &blob_name);
    let state = dispatch_document(&pool, cfg, &blob_name, &uri).await?;

    println!("Uploaded {blob_name} ({} bytes): {}", bytes.len(), state.as_str());
    Ok(())
}

async fn run_status(
    cfg: &Config,
    path: Option<String>,
    verbose: bool,
    state: Option<String>,
    within_hours: Option<i64>,
    prefix: Option<String>,
    tag: Option<String>,
) -> Result<()> {
    let pool = db::connect(&cfg.db).await?;
    let mode = if verbose {
        ReadMode::Verbose
    } else {
        ReadMode::Terse
    };

    let state = match state {
        Some(s) => match DocState::parse(&s) {
            Some(state) => Some(state),
            None => bail!("Unknown state: {s}"),
        },
        None => None,
    };

    let filter = StatusQuery {
        id: path.as_deref().map(status::encode_document_id),
        state,
        within_hours,
        path_prefix: prefix,
        tag,
    };
    let records = status::query(&pool, &filter, mode).await?;

    if records.is_empty() {
        println!("No matching documents.");
        return Ok(());
    }

    for record in records {
        println!(
            "{}  [{}]  since {}",
            record.document_path,
            record.state.as_str(),
            record.state_timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
        );
        if !record.tags.is_empty() {
            println!("  tags: {}", record.tags.join(", "));
        }
        for update in &record.updates {
            println!(
                "  {}  {:<5}  {}",
                update.created_at.format("%Y-%m-%d %H:%M:%S"),
                update.class.as_str(),
                update.message
            );
        }
    }
    Ok(())
}
