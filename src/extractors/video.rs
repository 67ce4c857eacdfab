//! Video extractor: no AI template, entities derive only from embedded metadata (tags/keywords
//! passed in via `ExtractionOptions::context` as a JSON-ish string by the processor).

use async_trait::async_trait;

use crate::ai_client::AiExtractor;
use crate::errors::Result;
use crate::extractors::{Extractor, ExtractionOptions};
use crate::models::{EntityType, ExtractedEntity, ExtractedMention};

pub struct VideoExtractor;

#[async_trait]
impl Extractor for VideoExtractor {
    fn name(&self) -> &'static str {
        "video"
    }

    fn category(&self) -> Option<&'static str> {
        Some("video")
    }

    async fn extract_raw(
        &self,
        _content: &str,
        _ai: &dyn AiExtractor,
        opts: &ExtractionOptions,
    ) -> Result<Vec<ExtractedEntity>> {
        let Some(context) = &opts.context else {
            return Ok(Vec::new());
        };

        let entities = context
            .split(',')
            .map(|tag| tag.trim())
            .filter(|tag| !tag.is_empty())
            .map(|tag| ExtractedEntity {
                name: tag.to_string(),
                entity_type: EntityType::Other,
                description: None,
                mentions: vec![ExtractedMention {
                    context: context.clone(),
                    position: 0,
                    relevance: 0.6,
                }],
            })
            .collect();

        Ok(entities)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai_client::UnavailableAiExtractor;

    #[tokio::test]
    async fn derives_entities_from_tag_metadata() {
        let extractor = VideoExtractor;
        let opts = ExtractionOptions {
            context: Some("keynote, product launch".to_string()),
            ..Default::default()
        };
        let entities = extractor
            .extract_raw("", &UnavailableAiExtractor, &opts)
            .await
            .unwrap();
        assert_eq!(entities.len(), 2);
    }

    #[tokio::test]
    async fn no_metadata_yields_empty() {
        let extractor = VideoExtractor;
        let entities = extractor
            .extract_raw("", &UnavailableAiExtractor, &ExtractionOptions::default())
            .await
            .unwrap();
        assert!(entities.is_empty());
    }
}
