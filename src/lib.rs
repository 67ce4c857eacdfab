//! # Ingestor
//!
//! **A content ingestion, entity extraction, and search engine.**
//!
//! Ingestor takes heterogeneous raw content (plain text, documents, code, images, video
//! metadata), detects its type, splits it into overlapping chunks, extracts named entities via a
//! pluggable AI back end, and stores everything in SQLite for keyword search and retrieval by ID.
//! A worker-pool batch engine processes many items concurrently with priority scheduling,
//! optional load-adaptive concurrency, and cooperative cancellation, while a job registry gives
//! batches and folder imports durable, resumable progress tracking.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌────────────────┐   ┌──────────────┐   ┌──────────┐
//! │ raw bytes │──▶│ ContentProcessor│──▶│   SQLite      │──▶│  CLI /   │
//! │           │   │ detect+chunk+  │   │ content+chunks │   │  HTTP    │
//! │           │   │ extract        │   │ +entities+FTS5 │   │          │
//! └───────────┘   └────────────────┘   └──────────────┘   └──────────┘
//!        ▲                 ▲
//!        │                 │
//!   ┌────┴─────┐     ┌─────┴──────┐
//!   │ BatchEngine│   │ JobRegistry │
//!   │ worker pool│   │ durable state│
//!   └───────────┘     └────────────┘
//! ```
//!
//! ## Data Flow
//!
//! 1. [`processor::ContentProcessor`] detects the content type ([`content_type`]), deduplicates
//!    by hash, and splits text into chunks ([`chunk`]).
//! 2. Each chunk is run through the [`extractors`] registry, which dispatches to a type-specific
//!    extractor (text, code, document, image, video) backed by an [`ai_client::AiExtractor`].
//! 3. Extracted entities are normalized and deduplicated ([`entity_normalize`]), cached
//!    ([`cache`]), and persisted alongside content and chunks via [`storage::StorageEngine`].
//! 4. Content is indexed in SQLite FTS5 for keyword [`search`].
//! 5. [`batch::BatchEngine`] fans a list of items out across a worker pool, reporting progress
//!    and resource-usage events; [`jobs::JobRegistry`] gives batches and folder imports durable
//!    status tracking across restarts.
//! 6. Results are exposed via the **CLI** (`ingestor`) and the **HTTP server** ([`server`]).
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`models`] | Core data types: `Content`, `Chunk`, `Entity`, `Job`, `JobItem` |
//! | [`errors`] | Typed error taxonomy (`IngestError`/`ErrorKind`) |
//! | [`content_type`] | MIME/extension-based content-type detection |
//! | [`chunk`] | Paragraph/sentence/fixed-size chunking strategies |
//! | [`entity_normalize`] | Entity name normalization, filtering, and merge/dedup |
//! | [`cache`] | In-memory LRU cache of recently seen entities |
//! | [`ai_client`] | `AiExtractor` trait, HTTP-backed implementation, retry/backoff |
//! | [`extractors`] | Per-content-type entity extractors, including binary document decoding (PDF, DOCX, PPTX, XLSX) |
//! | [`storage`] | SQLite persistence: content, chunks, entities, mentions, relationships, FTS5 |
//! | [`processor`] | `ContentProcessor`: single-item ingest orchestration |
//! | [`batch`] | `BatchEngine`: worker pool, dynamic concurrency, progress events |
//! | [`jobs`] | `JobRegistry`: durable job/item status and progress tracking |
//! | [`search`] | Keyword search (FTS5/BM25) with score normalization |
//! | [`get`] | Content retrieval by ID, including chunks and entity mentions |
//! | [`server`] | HTTP server (Axum) with CORS |
//! | [`db`] | SQLite connection pool with WAL mode |
//! | [`migrate`] | Database schema migrations (idempotent) |
//!
//! ## Configuration
//!
//! Ingestor is configured via a TOML file (default: `config/ingestor.toml`). See [`config`] for
//! all available options and [`config::load_config`] for validation rules.

pub mod ai_client;
pub mod batch;
pub mod cache;
pub mod chunk;
pub mod config;
pub mod content_type;
pub mod db;
pub mod entity_normalize;
pub mod errors;
pub mod extractors;
pub mod get;
pub mod jobs;
pub mod migrate;
pub mod models;
pub mod processor;
pub mod search;
pub mod server;
pub mod storage;
