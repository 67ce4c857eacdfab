//! Plain-text extractor: AI `text_entities`/`text_entities_custom` templates with a regex
//! rule-based fallback (capitalized-bigram → person, corporate suffix → organization, date
//! patterns → date).

use async_trait::async_trait;
use regex::Regex;
use std::sync::OnceLock;

use crate::ai_client::{AiExtractor, ExtractOptions, PromptTemplate};
use crate::errors::Result;
use crate::extractors::{Extractor, ExtractionOptions};
use crate::models::{EntityType, ExtractedEntity, ExtractedMention};

pub struct TextExtractor;

fn person_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b([A-Z][a-z]+ [A-Z][a-z]+)\b").unwrap())
}

fn org_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b([A-Z][\w&.,' ]{2,40}?(?:Inc|Corp|LLC|Ltd|Company|Association)\.?)\b").unwrap()
    })
}

fn date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(\d{1,2}/\d{1,2}/\d{4}|\d{4}-\d{2}-\d{2})\b").unwrap())
}

const CONTEXT_RADIUS: usize = 40;

fn context_around(text: &str, start: usize, end: usize) -> String {
    let lo = start.saturating_sub(CONTEXT_RADIUS);
    let hi = (end + CONTEXT_RADIUS).min(text.len());
    let mut lo = lo;
    while lo < text.len() && !text.is_char_boundary(lo) {
        lo += 1;
    }
    let mut hi = hi;
    while hi > 0 && !text.is_char_boundary(hi) {
        hi -= 1;
    }
    text[lo..hi].trim().to_string()
}

/// Regex sweep used both as TextExtractor's fallback and by CodeExtractor/GenericExtractor for
/// the parts of their own fallback that are just "find dates and obvious orgs".
pub fn regex_entity_sweep(text: &str) -> Vec<ExtractedEntity> {
    let mut entities = Vec::new();

    for caps in person_re().captures_iter(text) {
        let m = caps.get(1).unwrap();
        entities.push(ExtractedEntity {
            name: m.as_str().to_string(),
            entity_type: EntityType::Person,
            description: None,
            mentions: vec![ExtractedMention {
                context: context_around(text, m.start(), m.end()),
                position: m.start() as i64,
                relevance: 0.55,
            }],
        });
    }

    for caps in org_re().captures_iter(text) {
        let m = caps.get(1).unwrap();
        entities.push(ExtractedEntity {
            name: m.as_str().trim_end_matches('.').to_string(),
            entity_type: EntityType::Organization,
            description: None,
            mentions: vec![ExtractedMention {
                context: context_around(text, m.start(), m.end()),
                position: m.start() as i64,
                relevance: 0.6,
            }],
        });
    }

    for caps in date_re().captures_iter(text) {
        let m = caps.get(1).unwrap();
        entities.push(ExtractedEntity {
            name: m.as_str().to_string(),
            entity_type: EntityType::Date,
            description: None,
            mentions: vec![ExtractedMention {
                context: context_around(text, m.start(), m.end()),
                position: m.start() as i64,
                relevance: 0.65,
            }],
        });
    }

    entities
}

#[async_trait]
impl Extractor for TextExtractor {
    fn name(&self) -> &'static str {
        "text"
    }

    fn category(&self) -> Option<&'static str> {
        Some("text")
    }

    async fn extract_raw(
        &self,
        content: &str,
        ai: &dyn AiExtractor,
        opts: &ExtractionOptions,
    ) -> Result<Vec<ExtractedEntity>> {
        let template = if opts.entity_types.is_some() {
            PromptTemplate::TextEntitiesCustom
        } else {
            PromptTemplate::TextEntities
        };

        let ai_opts = ExtractOptions {
            entity_types: opts.entity_types.clone(),
            context: opts.context.clone(),
            language: opts.language.clone(),
            ..Default::default()
        };

        match ai.analyze(content, template, &ai_opts).await {
            Ok(entities) if !entities.is_empty() => Ok(entities),
            _ => Ok(regex_entity_sweep(content)),
        }
    }
}
