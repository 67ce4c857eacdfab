//! Image extractor: AI `image` template only. No rule-based fallback exists for images — an
//! AI miss is reported as an empty, successful result per the spec.

use async_trait::async_trait;

use crate::ai_client::{AiExtractor, ExtractOptions, PromptTemplate};
use crate::errors::Result;
use crate::extractors::{Extractor, ExtractionOptions};
use crate::models::ExtractedEntity;

pub struct ImageExtractor;

#[async_trait]
impl Extractor for ImageExtractor {
    fn name(&self) -> &'static str {
        "image"
    }

    fn category(&self) -> Option<&'static str> {
        Some("image")
    }

    async fn extract_raw(
        &self,
        content: &str,
        ai: &dyn AiExtractor,
        opts: &ExtractionOptions,
    ) -> Result<Vec<ExtractedEntity>> {
        let ai_opts = ExtractOptions {
            context: opts.context.clone(),
            entity_types: opts.entity_types.clone(),
            ..Default::default()
        };
        match ai.analyze(content, PromptTemplate::Image, &ai_opts).await {
            Ok(entities) => Ok(entities),
            Err(_) => Ok(Vec::new()),
        }
    }
}
