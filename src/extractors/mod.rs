//! `EntityExtractorRegistry` and the `Extractor` capability.
//!
//! The pattern→handler registration shape is adapted from the donor's `ConnectorRegistry`/
//! `ToolRegistry` in `traits.rs` (a `Vec` of boxed trait objects searched linearly), generalized
//! from exact-name lookup to the spec's exact→category-wildcard→generic fallback chain.

pub mod code;
pub mod document;
pub mod generic;
pub mod image;
pub mod text;
pub mod video;

use async_trait::async_trait;
use std::time::Instant;

use crate::ai_client::AiExtractor;
use crate::config::ExtractionConfig;
use crate::entity_normalize::{filter_entities, merge_entities, FilterOptions};
use crate::models::{EntityType, ExtractedEntity};

#[derive(Debug, Clone, Default)]
pub struct ExtractionOptions {
    pub entity_types: Option<Vec<String>>,
    pub context: Option<String>,
    pub language: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ExtractionStats {
    pub processing_time_ms: u64,
    pub entity_count: usize,
}

#[derive(Debug, Clone)]
pub struct ExtractionResult {
    pub entities: Vec<ExtractedEntity>,
    pub success: bool,
    pub error: Option<String>,
    pub stats: ExtractionStats,
}

/// Capability every per-content-type pipeline implements: combine an AI call with a rule-based
/// fallback, then hand raw candidates back for the shared normalize/merge/filter pass.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// A label for this extractor, used only for logging/diagnostics.
    fn name(&self) -> &'static str;

    /// Exact content types this extractor claims ahead of any category wildcard (e.g. the code
    /// extractor claims `text/x-rust`, `text/javascript`, ... before the text extractor's
    /// `text/*` wildcard gets a chance).
    fn exact_types(&self) -> &'static [&'static str] {
        &[]
    }

    /// Category wildcard this extractor falls back to when no exact type matched (e.g. `"text"`
    /// for `text/*`, or `None` for an extractor with no wildcard claim).
    fn category(&self) -> Option<&'static str> {
        None
    }

    /// Returns unmerged, unfiltered candidate entities. Never returns `Err` for ordinary
    /// extraction failures — those are reported via `ExtractionResult::success = false` by the
    /// registry wrapper; `Err` is reserved for truly exceptional conditions (e.g. content unreadable).
    async fn extract_raw(
        &self,
        content: &str,
        ai: &dyn AiExtractor,
        opts: &ExtractionOptions,
    ) -> crate::errors::Result<Vec<ExtractedEntity>>;
}

pub struct EntityExtractorRegistry {
    extractors: Vec<Box<dyn Extractor>>,
    ai: Box<dyn AiExtractor>,
    extraction_config: ExtractionConfig,
}

impl EntityExtractorRegistry {
    pub fn new(ai: Box<dyn AiExtractor>, extraction_config: ExtractionConfig) -> Self {
        let extractors: Vec<Box<dyn Extractor>> = vec![
            Box::new(text::TextExtractor),
            Box::new(code::CodeExtractor),
            Box::new(document::DocumentExtractor),
            Box::new(image::ImageExtractor),
            Box::new(video::VideoExtractor),
            Box::new(generic::GenericExtractor),
        ];
        Self {
            extractors,
            ai,
            extraction_config,
        }
    }

    /// Exact match → category wildcard (`text/*`) → generic fallback (the last-registered
    /// extractor with no exact types and no category, i.e. `GenericExtractor`).
    fn find(&self, content_type: &str) -> &dyn Extractor {
        if let Some(e) = self
            .extractors
            .iter()
            .find(|e| e.exact_types().contains(&content_type))
        {
            return e.as_ref();
        }
        let category = content_type.split('/').next().unwrap_or("");
        if let Some(e) = self.extractors.iter().find(|e| e.category() == Some(category)) {
            return e.as_ref();
        }
        self.extractors
            .last()
            .expect("at least the generic fallback extractor must be registered")
            .as_ref()
    }

    pub async fn extract(
        &self,
        content: &str,
        content_type: &str,
        opts: &ExtractionOptions,
    ) -> ExtractionResult {
        let started = Instant::now();

        if content.trim().is_empty() {
            return ExtractionResult {
                entities: Vec::new(),
                success: false,
                error: Some("empty-content".to_string()),
                stats: ExtractionStats {
                    processing_time_ms: started.elapsed().as_millis() as u64,
                    entity_count: 0,
                },
            };
        }

        let extractor = self.find(content_type);
        let raw = extractor.extract_raw(content, self.ai.as_ref(), opts).await;

        let (entities, success, error) = match raw {
            Ok(entities) => (entities, true, None),
            Err(e) => (Vec::new(), false, Some(e.to_string())),
        };

        let merged = merge_entities(entities);
        let allowed_types = opts
            .entity_types
            .as_ref()
            .or(self.extraction_config.allowed_types.as_ref())
            .map(|types| types.iter().map(|t| EntityType::parse_lenient(t)).collect());
        let filtered = filter_entities(
            merged,
            &FilterOptions {
                confidence_threshold: self.extraction_config.confidence_threshold,
                max_entities: self.extraction_config.max_entities,
                allowed_types,
            },
        );

        ExtractionResult {
            stats: ExtractionStats {
                processing_time_ms: started.elapsed().as_millis() as u64,
                entity_count: filtered.len(),
            },
            entities: filtered,
            success,
            error,
        }
    }
}
