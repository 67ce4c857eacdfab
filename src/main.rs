//! # Ingestor
//!
//! A content ingestion, entity extraction, and search engine: detects content type, chunks text,
//! extracts entities via a pluggable AI back end, stores everything in SQLite, and exposes
//! keyword search, batch ingestion, and job tracking via a CLI and an HTTP server.
//!
//! ## Architecture
//!
//! ```text
//! raw bytes → ContentProcessor (detect + chunk + extract) → SQLite → CLI / HTTP
//! ```
//!
//! ## Modules
//!
//! - [`config`] — TOML configuration parsing and validation
//! - [`models`] — Core data types: `Content`, `Chunk`, `Entity`, `Job`, `JobItem`
//! - [`storage`] — SQLite persistence: content, chunks, entities, mentions, FTS5
//! - [`processor`] — single-item ingest orchestration
//! - [`batch`] — worker-pool batch ingestion with dynamic concurrency
//! - [`jobs`] — durable job/item status tracking
//! - [`search`] — keyword search with score normalization
//! - [`get`] — content retrieval by ID
//! - [`server`] — HTTP server (Axum)
//! - [`migrate`] — database schema migrations

mod ai_client;
mod batch;
mod cache;
mod chunk;
mod config;
mod content_type;
mod db;
mod entity_normalize;
mod errors;
mod extractors;
mod get;
mod jobs;
mod migrate;
mod models;
mod processor;
mod search;
mod server;
mod storage;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use ai_client::{AiExtractor, HttpAiExtractor, UnavailableAiExtractor};
use batch::{BatchEngine, BatchEventSink, BatchItem, BatchOptions, CancellationToken};
use chunk::ChunkStrategy;
use extractors::EntityExtractorRegistry;
use jobs::JobRegistry;
use models::{JobItemStatus, JobStatus, JobType};
use processor::{ContentProcessor, ProcessOptions};
use storage::StorageEngine;

#[derive(Parser)]
#[command(
    name = "ingestor",
    about = "Content ingestion, entity extraction, and search engine",
    version
)]
struct Cli {
    /// Path to configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema
    Init,

    /// Ingest a single file
    Ingest {
        /// Path to the file to ingest
        path: PathBuf,

        /// Override detected content type
        #[arg(long)]
        content_type: Option<String>,

        /// Title metadata
        #[arg(long)]
        title: Option<String>,

        /// Source tag (e.g. "upload", "crawler")
        #[arg(long)]
        source: Option<String>,

        /// Chunking strategy: size, paragraph, sentence, or token
        #[arg(long)]
        strategy: Option<String>,

        /// Restrict extraction to these entity types (comma-separated)
        #[arg(long, value_delimiter = ',')]
        entity_types: Option<Vec<String>>,

        /// Extra context passed to extractors (e.g. video tag derivation)
        #[arg(long)]
        context: Option<String>,
    },

    /// Ingest every file in a directory as a batch, tracked as a durable job
    Batch {
        /// Directory to walk
        dir: PathBuf,

        /// Maximum concurrent workers
        #[arg(long)]
        concurrency: Option<usize>,

        /// Scale worker count with observed CPU/memory load
        #[arg(long)]
        dynamic: bool,

        /// Stop the whole batch on the first item failure
        #[arg(long)]
        fail_fast: bool,
    },

    /// Search indexed content
    Search {
        /// Search query
        query: String,

        /// Filter by content type (e.g. "text/plain")
        #[arg(long)]
        content_type: Option<String>,

        /// Maximum number of results
        #[arg(long)]
        limit: Option<i64>,
    },

    /// Retrieve content by ID
    Get {
        /// Content ID (UUID)
        id: String,
    },

    /// Inspect ingestion jobs
    Jobs {
        /// Filter by status: pending, running, completed, failed, cancelled
        #[arg(long)]
        status: Option<String>,

        /// Maximum number of jobs to list
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },

    /// Show one job and its items
    Job {
        /// Job ID
        id: String,
    },

    /// Cancel a running job
    Cancel {
        /// Job ID
        id: String,
    },

    /// Start the HTTP server
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(cli.config.as_deref())?;

    let filter = EnvFilter::try_new(&cfg.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if cfg.logging.format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest {
            path,
            content_type,
            title,
            source,
            strategy,
            entity_types,
            context,
        } => {
            let bytes = std::fs::read(&path)?;
            let storage = Arc::new(StorageEngine::open(&cfg).await?);
            let processor = build_processor(storage.clone(), &cfg);
            let opts = ProcessOptions {
                content_type,
                title,
                source,
                file_path: path.to_str().map(|s| s.to_string()),
                strategy: strategy.map(|s| ChunkStrategy::parse(&s)),
                entity_types,
                context,
                ..Default::default()
            };
            let result = processor.process_content(&bytes, opts).await;
            storage.close().await;
            if !result.success {
                anyhow::bail!(result.error.unwrap_or_else(|| "ingestion failed".to_string()));
            }
            println!(
                "Ingested {} ({} chunks, {} entities){}",
                result.content_id,
                result.chunks,
                result.entity_ids.len(),
                if result.deduplicated { " [deduplicated]" } else { "" }
            );
        }
        Commands::Batch {
            dir,
            concurrency,
            dynamic,
            fail_fast,
        } => {
            run_batch(&cfg, &dir, concurrency, dynamic, fail_fast).await?;
        }
        Commands::Search {
            query,
            content_type,
            limit,
        } => {
            search::run_search(&cfg, &query, content_type, limit.unwrap_or(12)).await?;
        }
        Commands::Get { id } => {
            get::run_get(&cfg, &id).await?;
        }
        Commands::Jobs { status, limit } => {
            let storage = StorageEngine::open(&cfg).await?;
            let registry = JobRegistry::new(storage.pool().clone());
            let status = status.as_deref().and_then(JobStatus::parse);
            let jobs = registry.list_jobs(status, limit).await?;
            storage.close().await;
            if jobs.is_empty() {
                println!("No jobs.");
            }
            for job in jobs {
                println!(
                    "{}  {:<12} {:<16} {}/{} done",
                    job.id,
                    job.status.as_str(),
                    job.job_type.as_str(),
                    job.progress.completed + job.progress.failed + job.progress.skipped,
                    job.progress.total
                );
            }
        }
        Commands::Job { id } => {
            let storage = StorageEngine::open(&cfg).await?;
            let registry = JobRegistry::new(storage.pool().clone());
            let job = registry.get_job(&id).await?;
            let Some(job) = job else {
                storage.close().await;
                anyhow::bail!("job '{}' not found", id);
            };
            let items = registry.list_items(&id).await?;
            storage.close().await;
            println!("job {} [{}] {}", job.id, job.job_type.as_str(), job.status.as_str());
            println!(
                "  total={} completed={} failed={} processing={} pending={} skipped={}",
                job.progress.total,
                job.progress.completed,
                job.progress.failed,
                job.progress.processing,
                job.progress.pending,
                job.progress.skipped
            );
            for item in items {
                println!("  [{}] {} -> {}", item.status.as_str(), item.input_ref, item.id);
            }
        }
        Commands::Cancel { id } => {
            let storage = StorageEngine::open(&cfg).await?;
            let registry = JobRegistry::new(storage.pool().clone());
            registry.cancel_job(&id).await?;
            storage.close().await;
            println!("Job {} cancelled.", id);
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}

fn build_processor(storage: Arc<StorageEngine>, cfg: &config::Config) -> ContentProcessor {
    let extractor: Box<dyn AiExtractor> = if cfg.ai.is_configured() {
        Box::new(HttpAiExtractor::new(cfg.ai.clone()))
    } else {
        tracing::warn!("AI extraction endpoint not configured; entity extraction is disabled");
        Box::new(UnavailableAiExtractor)
    };
    let extractors = Arc::new(EntityExtractorRegistry::new(extractor, cfg.extraction.clone()));
    ContentProcessor::new(storage, extractors, cfg.clone())
}

async fn run_batch(
    cfg: &config::Config,
    dir: &PathBuf,
    concurrency: Option<usize>,
    dynamic: bool,
    fail_fast: bool,
) -> anyhow::Result<()> {
    let mut paths = Vec::new();
    for entry in walkdir::WalkDir::new(dir).into_iter().filter_map(|e| e.ok()) {
        if entry.file_type().is_file() {
            paths.push(entry.path().to_path_buf());
        }
    }
    if paths.is_empty() {
        println!("No files found under {}.", dir.display());
        return Ok(());
    }

    let storage = Arc::new(StorageEngine::open(cfg).await?);
    let registry = JobRegistry::new(storage.pool().clone());
    let processor = Arc::new(build_processor(storage.clone(), cfg));

    let item_refs: Vec<String> = paths.iter().map(|p| p.display().to_string()).collect();
    let job = registry
        .create_job(JobType::FolderImport, &item_refs, &serde_json::json!({}), None)
        .await?;
    registry.start_job(&job.id).await?;
    let job_items = registry.list_items(&job.id).await?;

    let mut batch_items = Vec::with_capacity(paths.len());
    for (path, job_item) in paths.iter().zip(job_items.iter()) {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to read file, skipping");
                continue;
            }
        };
        batch_items.push(BatchItem {
            id: job_item.id.clone(),
            bytes,
            priority: 0,
            options: ProcessOptions {
                source: Some("batch-import".to_string()),
                file_path: path.to_str().map(|s| s.to_string()),
                ..Default::default()
            },
        });
    }

    let opts = BatchOptions {
        max_concurrency: concurrency.unwrap_or(cfg.batch.max_concurrency),
        dynamic_concurrency: dynamic || cfg.batch.dynamic_concurrency,
        continue_on_error: !fail_fast && cfg.batch.continue_on_error,
        timeout_ms: cfg.batch.timeout_ms,
    };

    let result = BatchEngine::process_batch(
        processor,
        batch_items,
        opts,
        BatchEventSink::default(),
        CancellationToken::new(),
    )
    .await;

    for item_result in &result.items {
        let (to, result_ref, error) = match item_result.status {
            batch::BatchItemStatus::Completed => {
                (JobItemStatus::Completed, item_result.content_id.as_deref(), None)
            }
            batch::BatchItemStatus::Failed => (JobItemStatus::Failed, None, item_result.error.as_deref()),
            batch::BatchItemStatus::Cancelled => (JobItemStatus::Cancelled, None, None),
        };
        if let Err(e) = registry
            .update_item_status(&job.id, &item_result.id, JobItemStatus::Pending, to, result_ref, error)
            .await
        {
            tracing::warn!(item = %item_result.id, error = %e, "failed to persist item status");
        }
    }

    if result.cancelled {
        registry.cancel_job(&job.id).await?;
    } else if result.failed > 0 && result.successful == 0 {
        registry.fail_job(&job.id).await?;
    } else {
        registry.complete_job(&job.id).await?;
    }

    storage.close().await;

    println!(
        "Batch {} complete: {}/{} succeeded, {} failed, {} ms (job {})",
        result.batch_id, result.successful, result.processed, result.failed, result.total_time_ms, job.id
    );

    Ok(())
}
