//! Fallback extractor for any content type with no dedicated pipeline: AI `generic` template
//! plus the same regex sweep the text extractor uses.

use async_trait::async_trait;

use crate::ai_client::{AiExtractor, ExtractOptions, PromptTemplate};
use crate::errors::Result;
use crate::extractors::text::regex_entity_sweep;
use crate::extractors::{Extractor, ExtractionOptions};
use crate::models::ExtractedEntity;

pub struct GenericExtractor;

#[async_trait]
impl Extractor for GenericExtractor {
    fn name(&self) -> &'static str {
        "generic"
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
        match ai.analyze(content, PromptTemplate::Generic, &ai_opts).await {
            Ok(entities) if !entities.is_empty() => Ok(entities),
            _ => Ok(regex_entity_sweep(content)),
        }
    }
}
