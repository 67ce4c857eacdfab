//! HTTP surface over the ingestion pipeline.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/content` | Ingest one item (base64 body), returns `ContentProcessingResult` |
//! | `POST` | `/batch` | Create a batch ingest job, returns `202` with the job id |
//! | `POST` | `/batch/:id/cancel` | Request early termination of a running batch |
//! | `GET`  | `/content/:id` | Retrieve content, its chunks, and linked entity mentions |
//! | `GET`  | `/search` | Keyword search over ingested content |
//! | `GET`  | `/jobs` | List jobs, optionally filtered by status |
//! | `GET`  | `/jobs/:id` | Retrieve one job and its items |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser-based and cross-origin
//! tool integrations.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::Engine;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};

use crate::ai_client::{AiExtractor, HttpAiExtractor, UnavailableAiExtractor};
use crate::batch::{BatchEngine, BatchEventSink, BatchItem, BatchOptions, CancellationToken};
use crate::chunk::ChunkStrategy;
use crate::config::Config;
use crate::errors::ErrorKind;
use crate::extractors::EntityExtractorRegistry;
use crate::get::{get_content_with_entities, ContentResponse};
use crate::jobs::JobRegistry;
use crate::models::{Job, JobItem};
use crate::processor::{ContentProcessingResult, ContentProcessor, ProcessOptions};
use crate::search::{search_content, SearchResultItem};
use crate::storage::StorageEngine;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    storage: Arc<StorageEngine>,
    processor: Arc<ContentProcessor>,
    jobs: Arc<JobRegistry>,
    /// Cancellation tokens for batches currently in flight, keyed by batch ID.
    active_batches: Arc<Mutex<HashMap<String, CancellationToken>>>,
}

/// Starts the HTTP server. Binds to `[server].bind` and runs until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();

    let storage = Arc::new(StorageEngine::open(config).await?);
    let extractor: Box<dyn AiExtractor> = if config.ai.is_configured() {
        Box::new(HttpAiExtractor::new(config.ai.clone()))
    } else {
        tracing::warn!("AI extraction endpoint not configured; entity extraction is disabled");
        Box::new(UnavailableAiExtractor)
    };
    let extractors = Arc::new(EntityExtractorRegistry::new(extractor, config.extraction.clone()));
    let processor = Arc::new(ContentProcessor::new(storage.clone(), extractors, config.clone()));
    let jobs = Arc::new(JobRegistry::new(storage.pool().clone()));

    let state = AppState {
        config: Arc::new(config.clone()),
        storage,
        processor,
        jobs,
        active_batches: Arc::new(Mutex::new(HashMap::new())),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/content", post(handle_ingest))
        .route("/content/{id}", get(handle_get))
        .route("/batch", post(handle_batch))
        .route("/batch/{id}/cancel", post(handle_cancel_batch))
        .route("/search", get(handle_search))
        .route("/jobs", get(handle_list_jobs))
        .route("/jobs/{id}", get(handle_get_job))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state);

    tracing::info!(bind = %bind_addr, "HTTP server listening");

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn internal_error(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

impl From<anyhow::Error> for AppError {
    fn from(e: anyhow::Error) -> Self {
        if let Some(ingest_err) = e.downcast_ref::<crate::errors::IngestError>() {
            if ingest_err.kind() == ErrorKind::NotFound {
                return not_found(e.to_string());
            }
            if ingest_err.kind() == ErrorKind::Validation {
                return bad_request(e.to_string());
            }
        }
        internal_error(e.to_string())
    }
}

// ============ POST /content ============

#[derive(Deserialize)]
struct IngestRequest {
    /// Base64-encoded raw content bytes.
    data: String,
    content_type: Option<String>,
    title: Option<String>,
    description: Option<String>,
    source: Option<String>,
    file_path: Option<String>,
    strategy: Option<String>,
    max_chunk_size: Option<usize>,
    chunk_overlap: Option<usize>,
    entity_types: Option<Vec<String>>,
    context: Option<String>,
    language: Option<String>,
}

async fn handle_ingest(
    State(state): State<AppState>,
    Json(req): Json<IngestRequest>,
) -> Result<Json<ContentProcessingResult>, AppError> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(&req.data)
        .map_err(|e| bad_request(format!("invalid base64 payload: {}", e)))?;

    let opts = ProcessOptions {
        content_type: req.content_type,
        title: req.title,
        description: req.description,
        source: req.source,
        file_path: req.file_path,
        strategy: req.strategy.map(|s| ChunkStrategy::parse(&s)),
        max_chunk_size: req.max_chunk_size,
        chunk_overlap: req.chunk_overlap,
        entity_types: req.entity_types,
        context: req.context,
        language: req.language,
    };

    let result = state.processor.process_content(&bytes, opts).await;
    if !result.success {
        return Err(internal_error(result.error.unwrap_or_else(|| "ingestion failed".to_string())));
    }
    Ok(Json(result))
}

// ============ GET /content/:id ============

async fn handle_get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ContentResponse>, AppError> {
    let content = get_content_with_entities(&state.storage, &id)
        .await
        .map_err(|e| {
            let msg = e.to_string();
            if msg.contains("not found") {
                not_found(msg)
            } else {
                internal_error(msg)
            }
        })?;
    Ok(Json(content))
}

// ============ POST /batch ============

#[derive(Deserialize)]
struct BatchItemRequest {
    id: String,
    data: String,
    priority: Option<i64>,
    content_type: Option<String>,
    source: Option<String>,
}

#[derive(Deserialize)]
struct BatchRequest {
    items: Vec<BatchItemRequest>,
    #[serde(default)]
    max_concurrency: Option<usize>,
    #[serde(default)]
    dynamic_concurrency: Option<bool>,
    #[serde(default)]
    continue_on_error: Option<bool>,
    #[serde(default)]
    timeout_ms: Option<u64>,
}

#[derive(Serialize)]
struct BatchAcceptedResponse {
    job_id: String,
}

/// Decodes the request, creates a job, and spawns the actual batch run in the background,
/// returning the job id immediately per the "202 Accepted with job id" contract.
async fn handle_batch(
    State(state): State<AppState>,
    Json(req): Json<BatchRequest>,
) -> Result<(StatusCode, Json<BatchAcceptedResponse>), AppError> {
    if req.items.is_empty() {
        return Err(bad_request("items must not be empty"));
    }

    let mut items = Vec::with_capacity(req.items.len());
    let item_refs: Vec<String> = req.items.iter().map(|i| i.id.clone()).collect();
    for item in req.items {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(&item.data)
            .map_err(|e| bad_request(format!("invalid base64 payload for item '{}': {}", item.id, e)))?;
        items.push(BatchItem {
            id: item.id,
            bytes,
            priority: item.priority.unwrap_or(0),
            options: ProcessOptions {
                content_type: item.content_type,
                source: item.source,
                ..Default::default()
            },
        });
    }

    let batch_config = &state.config.batch;
    let opts = BatchOptions {
        max_concurrency: req.max_concurrency.unwrap_or(batch_config.max_concurrency),
        dynamic_concurrency: req.dynamic_concurrency.unwrap_or(batch_config.dynamic_concurrency),
        continue_on_error: req.continue_on_error.unwrap_or(batch_config.continue_on_error),
        timeout_ms: req.timeout_ms.unwrap_or(batch_config.timeout_ms),
    };

    let job = state
        .jobs
        .create_job(crate::models::JobType::ContentAnalysis, &item_refs, &serde_json::json!({}), None)
        .await
        .map_err(|e| internal_error(e.to_string()))?;
    state
        .jobs
        .start_job(&job.id)
        .await
        .map_err(|e| internal_error(e.to_string()))?;

    let cancellation = CancellationToken::new();
    state.active_batches.lock().await.insert(job.id.clone(), cancellation.clone());

    let processor = state.processor.clone();
    let jobs = state.jobs.clone();
    let active_batches = state.active_batches.clone();
    let job_id = job.id.clone();
    let job_items = state
        .jobs
        .list_items(&job.id)
        .await
        .map_err(|e| internal_error(e.to_string()))?;

    tokio::spawn(async move {
        let result = BatchEngine::process_batch(processor, items, opts, BatchEventSink::default(), cancellation).await;
        for item_result in &result.items {
            // `item_result.id` is the caller-supplied item id, stored as the job item's `input_ref`.
            let Some(job_item) = job_items.iter().find(|ji| ji.input_ref == item_result.id) else {
                continue;
            };
            let to = match item_result.status {
                crate::batch::BatchItemStatus::Completed => crate::models::JobItemStatus::Completed,
                crate::batch::BatchItemStatus::Failed => crate::models::JobItemStatus::Failed,
                crate::batch::BatchItemStatus::Cancelled => crate::models::JobItemStatus::Cancelled,
            };
            let _ = jobs
                .update_item_status(
                    &job_id,
                    &job_item.id,
                    crate::models::JobItemStatus::Pending,
                    to,
                    item_result.content_id.as_deref(),
                    item_result.error.as_deref(),
                )
                .await;
        }
        let outcome = if result.cancelled {
            jobs.cancel_job(&job_id).await
        } else if result.failed > 0 && result.successful == 0 {
            jobs.fail_job(&job_id).await
        } else {
            jobs.complete_job(&job_id).await
        };
        if let Err(e) = outcome {
            tracing::warn!(job_id = %job_id, error = %e, "failed to finalize job status");
        }
        active_batches.lock().await.remove(&job_id);
    });

    Ok((StatusCode::ACCEPTED, Json(BatchAcceptedResponse { job_id: job.id })))
}

// ============ POST /batch/:id/cancel ============

#[derive(Serialize)]
struct CancelResponse {
    cancelled: bool,
}

async fn handle_cancel_batch(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CancelResponse>, AppError> {
    let batches = state.active_batches.lock().await;
    match batches.get(&id) {
        Some(token) => {
            token.cancel();
            Ok(Json(CancelResponse { cancelled: true }))
        }
        None => Err(not_found(format!("no active batch with id '{}'", id))),
    }
}

// ============ GET /search ============

#[derive(Deserialize)]
struct SearchParams {
    q: String,
    content_type: Option<String>,
    limit: Option<i64>,
}

#[derive(Serialize)]
struct SearchResponse {
    results: Vec<SearchResultItem>,
}

async fn handle_search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, AppError> {
    if params.q.trim().is_empty() {
        return Err(bad_request("q must not be empty"));
    }
    let results = search_content(&state.storage, &params.q, params.content_type.as_deref(), params.limit.unwrap_or(12))
        .await
        .map_err(AppError::from)?;
    Ok(Json(SearchResponse { results }))
}

// ============ GET /jobs ============

#[derive(Deserialize)]
struct ListJobsParams {
    status: Option<String>,
    limit: Option<i64>,
}

#[derive(Serialize)]
struct JobsResponse {
    jobs: Vec<Job>,
}

async fn handle_list_jobs(
    State(state): State<AppState>,
    Query(params): Query<ListJobsParams>,
) -> Result<Json<JobsResponse>, AppError> {
    let status = match params.status.as_deref() {
        Some(s) => Some(crate::models::JobStatus::parse(s).ok_or_else(|| bad_request("unrecognized job status"))?),
        None => None,
    };
    let jobs = state
        .jobs
        .list_jobs(status, params.limit.unwrap_or(50))
        .await
        .map_err(|e| internal_error(e.to_string()))?;
    Ok(Json(JobsResponse { jobs }))
}

// ============ GET /jobs/:id ============

#[derive(Serialize)]
struct JobDetailResponse {
    job: Job,
    items: Vec<JobItem>,
}

async fn handle_get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobDetailResponse>, AppError> {
    let job = state
        .jobs
        .get_job(&id)
        .await
        .map_err(|e| internal_error(e.to_string()))?
        .ok_or_else(|| not_found(format!("job '{}' not found", id)))?;
    let items = state
        .jobs
        .list_items(&id)
        .await
        .map_err(|e| internal_error(e.to_string()))?;
    Ok(Json(JobDetailResponse { job, items }))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
