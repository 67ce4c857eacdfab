//! `ContentProcessor` (C4): content-type detection, chunking, and single-item orchestration.
//!
//! The per-item flow (hash dedup short-circuit → transaction → insert content+chunks → extract
//! and link entities → commit) is adapted from the donor's `ingest::run_sync` per-item loop
//! (`upsert_document` + `replace_chunks` inside one transaction), generalized from "document
//! replace" semantics to "new content creation with dedup" since this spec's content is
//! immutable once stored.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::chunk::{chunk_text, ChunkStrategy};
use crate::config::Config;
use crate::content_type::detect_content_type;
use crate::entity_normalize::normalize_name;
use crate::errors::{ErrorContext, IngestError, Result};
use crate::extractors::{EntityExtractorRegistry, ExtractionOptions};
use crate::storage::StorageEngine;

#[derive(Debug, Clone)]
pub struct ProcessOptions {
    pub content_type: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub source: Option<String>,
    pub file_path: Option<String>,
    pub strategy: Option<ChunkStrategy>,
    pub max_chunk_size: Option<usize>,
    pub chunk_overlap: Option<usize>,
    /// Restricts extraction to these entity type names (extractor-specific parsing); `None`
    /// means "whatever each extractor's default entity set is."
    pub entity_types: Option<Vec<String>>,
    /// Free-form hint passed through to extractors, e.g. a video extractor's tag-derivation
    /// input or extra context folded into an AI prompt.
    pub context: Option<String>,
    pub language: Option<String>,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            content_type: None,
            title: None,
            description: None,
            source: None,
            file_path: None,
            strategy: None,
            max_chunk_size: None,
            chunk_overlap: None,
            entity_types: None,
            context: None,
            language: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ContentProcessingResult {
    pub content_id: String,
    pub content_type: String,
    pub chunks: usize,
    pub entity_ids: Vec<String>,
    pub success: bool,
    pub deduplicated: bool,
    pub error: Option<String>,
}

pub struct ContentProcessor {
    storage: Arc<StorageEngine>,
    extractors: Arc<EntityExtractorRegistry>,
    config: Config,
}

impl ContentProcessor {
    pub fn new(storage: Arc<StorageEngine>, extractors: Arc<EntityExtractorRegistry>, config: Config) -> Self {
        Self {
            storage,
            extractors,
            config,
        }
    }

    /// Processes one raw byte payload end-to-end. `opts.file_path`, if given, is only used as a
    /// hint for content-type detection and chunk-type dispatch — it need not exist on disk.
    pub async fn process_content(&self, bytes: &[u8], opts: ProcessOptions) -> ContentProcessingResult {
        let content_type = opts
            .content_type
            .clone()
            .unwrap_or_else(|| detect_content_type(bytes, opts.file_path.as_deref()));

        let hash = StorageEngine::hash_bytes(bytes);

        match self.storage.find_content_by_hash(opts.source.as_deref(), &hash).await {
            Ok(Some(existing)) => {
                return ContentProcessingResult {
                    content_id: existing.id,
                    content_type,
                    chunks: 0,
                    entity_ids: Vec::new(),
                    success: true,
                    deduplicated: true,
                    error: None,
                };
            }
            Ok(None) => {}
            Err(e) => {
                return failure(content_type, e);
            }
        }

        let text = match self.decode_text(bytes, &content_type) {
            Ok(text) => text,
            Err(e) => return failure(content_type, e),
        };

        let (content_id, chunk_texts) = match self
            .insert_content_and_chunks(bytes, &text, &content_type, &hash, &opts)
            .await
        {
            Ok(r) => r,
            Err(e) => return failure(content_type, e),
        };

        let extraction_opts = ExtractionOptions {
            entity_types: opts.entity_types.clone(),
            context: opts.context.clone(),
            language: opts.language.clone(),
        };

        let mut entity_ids = Vec::new();
        for (index, chunk_text) in chunk_texts.iter().enumerate() {
            let result = self
                .extractors
                .extract(chunk_text, &content_type, &extraction_opts)
                .await;

            if !result.success {
                tracing::warn!(
                    content_id = %content_id,
                    chunk_index = index,
                    error = ?result.error,
                    "entity extraction fell back or failed for chunk"
                );
            }

            let mut chunk_entity_ids = Vec::new();
            for extracted in &result.entities {
                let normalized = normalize_name(&extracted.name, extracted.entity_type);
                match self
                    .storage
                    .store_entity_with_alias(&extracted.name, &normalized, extracted.entity_type, extracted)
                    .await
                {
                    Ok(entity_id) => {
                        for mention in &extracted.mentions {
                            if let Err(e) = self
                                .storage
                                .link_entity_to_content(&entity_id, &content_id, &content_type, mention)
                                .await
                            {
                                tracing::warn!(content_id = %content_id, error = %e, "failed to link entity mention");
                            }
                        }
                        chunk_entity_ids.push(entity_id);
                    }
                    Err(e) => {
                        tracing::warn!(content_id = %content_id, error = %e, "failed to store entity");
                    }
                }
            }

            // Entities pulled from the same chunk co-occur in that chunk's text.
            if let Some((first, rest)) = chunk_entity_ids.split_first() {
                for other in rest {
                    if let Err(e) = self
                        .storage
                        .store_relationship(first, other, "co_occurs_with", 1.0)
                        .await
                    {
                        tracing::warn!(content_id = %content_id, error = %e, "failed to store entity relationship");
                    }
                }
            }
            entity_ids.extend(chunk_entity_ids);
        }

        ContentProcessingResult {
            content_id,
            content_type,
            chunks: chunk_texts.len(),
            entity_ids,
            success: true,
            deduplicated: false,
            error: None,
        }
    }

    fn decode_text(&self, bytes: &[u8], content_type: &str) -> Result<String> {
        if crate::content_type::is_document_type(content_type) {
            return crate::extractors::document::decode_document_bytes(bytes, content_type);
        }
        if crate::content_type::is_image_type(content_type) || crate::content_type::is_video_type(content_type) {
            // Image/video extractors derive entities from metadata, not chunked text.
            return Ok(String::new());
        }
        Ok(String::from_utf8_lossy(bytes).to_string())
    }

    async fn insert_content_and_chunks(
        &self,
        bytes: &[u8],
        text: &str,
        content_type: &str,
        hash: &str,
        opts: &ProcessOptions,
    ) -> Result<(String, Vec<String>)> {
        let strategy = opts.strategy.unwrap_or_else(|| ChunkStrategy::parse(&self.config.chunking.strategy));
        let max_chunk_size = opts.max_chunk_size.unwrap_or(self.config.chunking.max_chunk_size);
        let overlap = opts.chunk_overlap.unwrap_or_else(|| self.config.chunking.overlap());

        let spans = if self.config.chunking.enabled {
            chunk_text(text, max_chunk_size, overlap, strategy)
        } else {
            if text.is_empty() {
                Vec::new()
            } else {
                vec![crate::chunk::ChunkSpan {
                    index: 0,
                    text: text.to_string(),
                }]
            }
        };

        let mut tx = self.storage.begin().await?;
        let content_id = Uuid::new_v4().to_string();
        let now = Utc::now().timestamp();

        sqlx::query(
            "INSERT INTO content (id, content_type, title, description, source, file_path, hash, \
             size, metadata_json, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, '{}', ?, ?)",
        )
        .bind(&content_id)
        .bind(content_type)
        .bind(&opts.title)
        .bind(&opts.description)
        .bind(&opts.source)
        .bind(&opts.file_path)
        .bind(hash)
        .bind(bytes.len() as i64)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| IngestError::from(e).with_context(ErrorContext::with_content(&content_id)))?;

        let mut chunk_texts = Vec::with_capacity(spans.len());
        for span in &spans {
            let chunk_id = Uuid::new_v4().to_string();
            sqlx::query(
                "INSERT INTO chunks (id, content_id, chunk_index, text, metadata_json, created_at) \
                 VALUES (?, ?, ?, ?, '{}', ?)",
            )
            .bind(&chunk_id)
            .bind(&content_id)
            .bind(span.index)
            .bind(&span.text)
            .bind(now)
            .execute(&mut *tx)
            .await?;
            chunk_texts.push(span.text.clone());
        }

        tx.commit().await.map_err(IngestError::from)?;

        Ok((content_id, chunk_texts))
    }
}

fn failure(content_type: String, error: IngestError) -> ContentProcessingResult {
    ContentProcessingResult {
        content_id: String::new(),
        content_type,
        chunks: 0,
        entity_ids: Vec::new(),
        success: false,
        deduplicated: false,
        error: Some(error.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai_client::UnavailableAiExtractor;
    use crate::config::{Config, ExtractionConfig};

    async fn test_processor() -> ContentProcessor {
        let mut config = Config::default();
        config.storage.dir = std::env::temp_dir().join(format!("ingestor-test-{}", Uuid::new_v4()));
        config.database_name = "test".to_string();
        let storage = Arc::new(StorageEngine::open(&config).await.unwrap());
        let extractors = Arc::new(EntityExtractorRegistry::new(
            Box::new(UnavailableAiExtractor),
            ExtractionConfig::default(),
        ));
        ContentProcessor::new(storage, extractors, config)
    }

    #[tokio::test]
    async fn processes_plain_text_and_extracts_entities() {
        let processor = test_processor().await;
        let result = processor
            .process_content(
                b"John Doe works at Acme Corp in New York.",
                ProcessOptions {
                    content_type: Some("text/plain".to_string()),
                    ..Default::default()
                },
            )
            .await;
        assert!(result.success);
        assert!(!result.deduplicated);
        assert_eq!(result.chunks, 1);
        assert!(!result.entity_ids.is_empty());
    }

    #[tokio::test]
    async fn deduplicates_identical_content() {
        let processor = test_processor().await;
        let opts = ProcessOptions {
            content_type: Some("text/plain".to_string()),
            source: Some("test".to_string()),
            ..Default::default()
        };
        let first = processor.process_content(b"same bytes", opts.clone()).await;
        let second = processor.process_content(b"same bytes", opts).await;
        assert!(first.success && second.success);
        assert!(!first.deduplicated);
        assert!(second.deduplicated);
        assert_eq!(first.content_id, second.content_id);
    }

    #[tokio::test]
    async fn empty_content_produces_zero_chunks() {
        let processor = test_processor().await;
        let result = processor
            .process_content(
                b"",
                ProcessOptions {
                    content_type: Some("text/plain".to_string()),
                    ..Default::default()
                },
            )
            .await;
        assert!(result.success);
        assert_eq!(result.chunks, 0);
    }
}
