//! Source-code extractor: AI `code` template (with a language guessed from extension/content
//! heuristics) plus a regex rule fallback for class/function/import declarations.

use async_trait::async_trait;
use regex::Regex;
use std::sync::OnceLock;

use crate::ai_client::{AiExtractor, ExtractOptions, PromptTemplate};
use crate::errors::Result;
use crate::extractors::{Extractor, ExtractionOptions};
use crate::models::{EntityType, ExtractedEntity, ExtractedMention};

pub struct CodeExtractor;

fn class_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\bclass\s+([A-Za-z_][A-Za-z0-9_]*)").unwrap())
}

fn function_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(?:function|def|fn)\s+([A-Za-z_][A-Za-z0-9_]*)").unwrap())
}

fn const_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\bconst\s+([A-Z][A-Z0-9_]*)\s*=").unwrap())
}

fn import_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"import\s+.*?\s+from\s+['"]([^'"]+)['"]"#).unwrap())
}

/// Guesses a language name from content heuristics when no file extension is available.
pub fn guess_language(content: &str) -> Option<&'static str> {
    if content.contains("def ") && content.contains("self") {
        Some("python")
    } else if content.contains("public class") || content.contains("interface ") {
        Some("java")
    } else if content.contains("import ") && content.contains(" from ") {
        Some("javascript")
    } else if content.contains("fn ") && content.contains("->") {
        Some("rust")
    } else {
        None
    }
}

fn rule_based_sweep(code: &str) -> Vec<ExtractedEntity> {
    let mut entities = Vec::new();
    let push = |entities: &mut Vec<ExtractedEntity>, name: &str, pos: usize| {
        entities.push(ExtractedEntity {
            name: name.to_string(),
            entity_type: EntityType::Technology,
            description: None,
            mentions: vec![ExtractedMention {
                context: name.to_string(),
                position: pos as i64,
                relevance: 0.6,
            }],
        });
    };

    for caps in class_re().captures_iter(code) {
        let m = caps.get(1).unwrap();
        push(&mut entities, m.as_str(), m.start());
    }
    for caps in function_re().captures_iter(code) {
        let m = caps.get(1).unwrap();
        push(&mut entities, m.as_str(), m.start());
    }
    for caps in const_re().captures_iter(code) {
        let m = caps.get(1).unwrap();
        push(&mut entities, m.as_str(), m.start());
    }
    for caps in import_re().captures_iter(code) {
        let m = caps.get(1).unwrap();
        push(&mut entities, m.as_str(), m.start());
    }

    entities
}

#[async_trait]
impl Extractor for CodeExtractor {
    fn name(&self) -> &'static str {
        "code"
    }

    fn exact_types(&self) -> &'static [&'static str] {
        &[
            "text/x-rust",
            "text/x-python",
            "text/javascript",
            "text/typescript",
            "text/x-go",
            "text/x-java",
            "text/x-c",
            "text/x-c++",
        ]
    }

    async fn extract_raw(
        &self,
        content: &str,
        ai: &dyn AiExtractor,
        opts: &ExtractionOptions,
    ) -> Result<Vec<ExtractedEntity>> {
        let language = opts
            .language
            .clone()
            .or_else(|| guess_language(content).map(|l| l.to_string()));

        let ai_opts = ExtractOptions {
            language,
            context: opts.context.clone(),
            entity_types: opts.entity_types.clone(),
            ..Default::default()
        };

        match ai.analyze(content, PromptTemplate::Code, &ai_opts).await {
            Ok(entities) if !entities.is_empty() => Ok(entities),
            _ => Ok(rule_based_sweep(content)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_class_and_function_declarations() {
        let code = "class Widget {}\n\nfunction build() {}\n\nconst MAX_SIZE = 10;";
        let entities = rule_based_sweep(code);
        assert!(entities.iter().any(|e| e.name == "Widget"));
        assert!(entities.iter().any(|e| e.name == "build"));
        assert!(entities.iter().any(|e| e.name == "MAX_SIZE"));
    }

    #[test]
    fn guesses_python_from_content() {
        assert_eq!(guess_language("def foo(self):\n    pass"), Some("python"));
    }
}
