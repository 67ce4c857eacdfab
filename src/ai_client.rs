//! `AIExtractionClient`: abstract call to an external entity-extraction service.
//!
//! The retry/backoff shape is adapted from the donor's `embedding::embed_openai` loop (attempt
//! counter, capped exponential delay, retry only on transient HTTP/network errors) but rebased
//! on the spec's parameters: base 500ms, ±20% jitter, 3 attempts, capped at the configured
//! per-call timeout.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::AiConfig;
use crate::errors::{IngestError, Result};
use crate::models::{ExtractedEntity, ExtractedMention, EntityType};

/// Named prompt templates the extractors select by content type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptTemplate {
    EntityExtraction,
    TextEntities,
    TextEntitiesCustom,
    Code,
    Image,
    Pdf,
    Generic,
}

impl PromptTemplate {
    pub fn name(&self) -> &'static str {
        match self {
            PromptTemplate::EntityExtraction => "entity_extraction",
            PromptTemplate::TextEntities => "text_entities",
            PromptTemplate::TextEntitiesCustom => "text_entities_custom",
            PromptTemplate::Code => "code",
            PromptTemplate::Image => "image",
            PromptTemplate::Pdf => "pdf",
            PromptTemplate::Generic => "generic",
        }
    }

    fn system_prompt(&self, opts: &ExtractOptions) -> String {
        let base = match self {
            PromptTemplate::EntityExtraction | PromptTemplate::TextEntities => {
                "Extract named entities (person, organization, location, date, product, technology, event) from the following text."
            }
            PromptTemplate::TextEntitiesCustom => {
                "Extract named entities of the requested types only from the following text."
            }
            PromptTemplate::Code => {
                "Extract named symbols (classes, functions, modules, imported packages) from the following source code, tagged as technology entities."
            }
            PromptTemplate::Image => "Describe and extract named entities visible in the following image.",
            PromptTemplate::Pdf => "Extract named entities from the following document text.",
            PromptTemplate::Generic => "Extract any named entities from the following content.",
        };
        let mut prompt = base.to_string();
        if let Some(types) = &opts.entity_types {
            prompt.push_str(&format!(" Restrict to these types: {}.", types.join(", ")));
        }
        if let Some(lang) = &opts.language {
            prompt.push_str(&format!(" The content is written in {}.", lang));
        }
        if let Some(ctx) = &opts.context {
            prompt.push_str(&format!(" Additional context: {}.", ctx));
        }
        prompt.push_str(" Respond with a JSON object: {\"entities\": [{\"name\", \"type\", \"description\", \"mentions\": [{\"context\", \"position\", \"relevance\"}]}]}.");
        prompt
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExtractOptions {
    pub content_type: Option<String>,
    pub entity_types: Option<Vec<String>>,
    pub context: Option<String>,
    pub language: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AiResponseEntity {
    name: String,
    #[serde(rename = "type")]
    entity_type: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    mentions: Vec<AiResponseMention>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AiResponseMention {
    context: String,
    #[serde(default)]
    position: i64,
    #[serde(default = "default_relevance")]
    relevance: f64,
}

fn default_relevance() -> f64 {
    0.7
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AiResponseBody {
    entities: Vec<AiResponseEntity>,
}

/// Abstract entity-extraction capability. A real HTTP-backed client and a fixture/mock client
/// for tests both implement this trait, so extractors never depend on the transport.
#[async_trait]
pub trait AiExtractor: Send + Sync {
    async fn analyze(
        &self,
        text: &str,
        template: PromptTemplate,
        opts: &ExtractOptions,
    ) -> Result<Vec<ExtractedEntity>>;
}

pub struct HttpAiExtractor {
    client: reqwest::Client,
    config: AiConfig,
}

impl HttpAiExtractor {
    pub fn new(config: AiConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client, config }
    }

    fn credential(&self) -> Result<String> {
        std::env::var(&self.config.credential_env)
            .map_err(|_| IngestError::validation("missing AI extraction credentials"))
    }

    fn backoff_delay(attempt: u32) -> Duration {
        let base_ms: u64 = 500;
        let exp = base_ms.saturating_mul(1u64 << attempt.min(5));
        let jitter_frac = rand::thread_rng().gen_range(-0.2..=0.2);
        let jittered = (exp as f64) * (1.0 + jitter_frac);
        Duration::from_millis(jittered.max(0.0) as u64)
    }
}

#[async_trait]
impl AiExtractor for HttpAiExtractor {
    async fn analyze(
        &self,
        text: &str,
        template: PromptTemplate,
        opts: &ExtractOptions,
    ) -> Result<Vec<ExtractedEntity>> {
        let endpoint = self
            .config
            .endpoint
            .clone()
            .ok_or_else(|| IngestError::validation("AI extraction endpoint is not configured"))?;
        let credential = self.credential()?;
        let prompt = template.system_prompt(opts);

        let body = serde_json::json!({
            "model": self.config.model,
            "prompt": prompt,
            "input": text,
            "max_tokens": opts.max_tokens,
            "temperature": opts.temperature,
        });

        let max_attempts = self.config.retries.max(1);
        let mut last_err = None;

        for attempt in 0..max_attempts {
            if attempt > 0 {
                tokio::time::sleep(Self::backoff_delay(attempt - 1)).await;
            }

            let response = self
                .client
                .post(&endpoint)
                .bearer_auth(&credential)
                .json(&body)
                .send()
                .await;

            match response {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let parsed: AiResponseBody = resp
                            .json()
                            .await
                            .map_err(|e| IngestError::corruption(format!("malformed AI response: {e}")))?;
                        return Ok(parsed.entities.into_iter().map(into_extracted).collect());
                    }
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(IngestError::transient(format!(
                            "AI extraction service returned {status}"
                        )));
                        continue;
                    }
                    return Err(IngestError::upstream(format!(
                        "AI extraction service returned {status}"
                    )));
                }
                Err(e) if e.is_timeout() || e.is_connect() => {
                    last_err = Some(IngestError::transient(format!("AI extraction request failed: {e}")));
                    continue;
                }
                Err(e) => {
                    return Err(IngestError::upstream(format!("AI extraction request failed: {e}")));
                }
            }
        }

        Err(last_err.unwrap_or_else(|| IngestError::upstream("AI extraction failed after retries")))
    }
}

fn into_extracted(e: AiResponseEntity) -> ExtractedEntity {
    ExtractedEntity {
        name: e.name,
        entity_type: EntityType::parse_lenient(&e.entity_type),
        description: e.description,
        mentions: e
            .mentions
            .into_iter()
            .map(|m| ExtractedMention {
                context: m.context,
                position: m.position,
                relevance: m.relevance.clamp(0.0, 1.0),
            })
            .collect(),
    }
}

/// Fixture client used by extractors' unit tests and by production code when no AI endpoint is
/// configured (extractors detect this and fall straight to the rule-based path).
pub struct UnavailableAiExtractor;

#[async_trait]
impl AiExtractor for UnavailableAiExtractor {
    async fn analyze(
        &self,
        _text: &str,
        _template: PromptTemplate,
        _opts: &ExtractOptions,
    ) -> Result<Vec<ExtractedEntity>> {
        Err(IngestError::validation("AI extraction is not configured"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_delay_grows_and_stays_jittered() {
        let d0 = HttpAiExtractor::backoff_delay(0);
        let d1 = HttpAiExtractor::backoff_delay(1);
        assert!(d0.as_millis() >= 400 && d0.as_millis() <= 600);
        assert!(d1.as_millis() >= 800 && d1.as_millis() <= 1200);
    }

    #[tokio::test]
    async fn unavailable_extractor_errors_as_validation() {
        let client = UnavailableAiExtractor;
        let err = client
            .analyze("hi", PromptTemplate::Generic, &ExtractOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::errors::ErrorKind::Validation);
    }
}
