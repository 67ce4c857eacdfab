//! Shared normalization, merge, and filter logic applied by every extractor before entities are
//! returned to `ContentProcessor`. Kept as free functions (not a trait) since every content-type
//! pipeline applies the exact same rules, per the spec's "Common concerns" section.

use chrono::NaiveDate;
use regex::Regex;
use std::sync::OnceLock;

use crate::models::{EntityType, ExtractedEntity};

/// Collapses internal whitespace and strips surrounding quotes.
fn clean_whitespace(s: &str) -> String {
    let trimmed = s.trim().trim_matches(|c| c == '"' || c == '\'');
    trimmed.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn date_mdy_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d{1,2})/(\d{1,2})/(\d{4})$").unwrap())
}

fn date_ymd_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d{4})-(\d{2})-(\d{2})$").unwrap())
}

/// Normalizes a raw entity name according to its type, producing the key used for dedup.
pub fn normalize_name(name: &str, entity_type: EntityType) -> String {
    let cleaned = clean_whitespace(name);
    match entity_type {
        EntityType::Person | EntityType::Location => title_case_with_lowercase_articles(&cleaned),
        EntityType::Organization => cleaned,
        EntityType::Date => normalize_date(&cleaned).unwrap_or(cleaned),
        _ => cleaned,
    }
}

fn title_case_with_lowercase_articles(s: &str) -> String {
    const ARTICLES: &[&str] = &["a", "an", "the", "of", "de", "van", "von"];
    s.split_whitespace()
        .enumerate()
        .map(|(i, word)| {
            let lower = word.to_lowercase();
            if i > 0 && ARTICLES.contains(&lower.as_str()) {
                lower
            } else {
                let mut chars = lower.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                    None => String::new(),
                }
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn normalize_date(s: &str) -> Option<String> {
    if let Some(caps) = date_mdy_re().captures(s) {
        let month: u32 = caps[1].parse().ok()?;
        let day: u32 = caps[2].parse().ok()?;
        let year: i32 = caps[3].parse().ok()?;
        let date = NaiveDate::from_ymd_opt(year, month, day)?;
        return Some(date.format("%Y-%m-%d").to_string());
    }
    if date_ymd_re().is_match(s) {
        return Some(s.to_string());
    }
    None
}

/// Merges entities that share `(type, normalized_name)`: mentions concatenate, the longer
/// description wins.
pub fn merge_entities(entities: Vec<ExtractedEntity>) -> Vec<ExtractedEntity> {
    use std::collections::HashMap;
    let mut merged: HashMap<(EntityType, String), ExtractedEntity> = HashMap::new();

    for entity in entities {
        let normalized = normalize_name(&entity.name, entity.entity_type);
        let key = (entity.entity_type, normalized);
        match merged.get_mut(&key) {
            Some(existing) => {
                existing.mentions.extend(entity.mentions);
                let better_desc = match (&existing.description, &entity.description) {
                    (Some(a), Some(b)) if b.len() > a.len() => Some(b.clone()),
                    (None, Some(b)) => Some(b.clone()),
                    (existing_desc, _) => existing_desc.clone(),
                };
                existing.description = better_desc;
            }
            None => {
                merged.insert(key, entity);
            }
        }
    }

    merged.into_values().collect()
}

#[derive(Debug, Clone, Default)]
pub struct FilterOptions {
    pub confidence_threshold: f64,
    pub max_entities: usize,
    pub allowed_types: Option<Vec<EntityType>>,
}

/// Applies `confidenceThreshold`, `allowedTypes`, and `maxEntities` in that order, matching the
/// spec's "Filter" step.
pub fn filter_entities(mut entities: Vec<ExtractedEntity>, opts: &FilterOptions) -> Vec<ExtractedEntity> {
    entities.retain(|e| {
        let max_relevance = e.mentions.iter().map(|m| m.relevance).fold(0.0, f64::max);
        max_relevance >= opts.confidence_threshold
    });

    if let Some(allowed) = &opts.allowed_types {
        entities.retain(|e| allowed.contains(&e.entity_type));
    }

    entities.sort_by(|a, b| {
        let score_a = a.mentions.iter().map(|m| m.relevance).fold(0.0, f64::max);
        let score_b = b.mentions.iter().map(|m| m.relevance).fold(0.0, f64::max);
        score_b.partial_cmp(&score_a).unwrap_or(std::cmp::Ordering::Equal)
    });
    entities.truncate(opts.max_entities);
    entities
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ExtractedMention;

    fn mention(relevance: f64) -> ExtractedMention {
        ExtractedMention {
            context: "ctx".to_string(),
            position: 0,
            relevance,
        }
    }

    #[test]
    fn normalizes_person_name_to_title_case() {
        assert_eq!(normalize_name("  john   DOE ", EntityType::Person), "John Doe");
    }

    #[test]
    fn normalizes_date_from_mdy() {
        assert_eq!(normalize_date("07/04/2024").unwrap(), "2024-07-04");
    }

    #[test]
    fn merges_duplicate_entities_and_keeps_longer_description() {
        let entities = vec![
            ExtractedEntity {
                name: "Acme Corp".to_string(),
                entity_type: EntityType::Organization,
                description: Some("short".to_string()),
                mentions: vec![mention(0.6)],
            },
            ExtractedEntity {
                name: "Acme Corp".to_string(),
                entity_type: EntityType::Organization,
                description: Some("a longer description here".to_string()),
                mentions: vec![mention(0.9)],
            },
        ];
        let merged = merge_entities(entities);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].mentions.len(), 2);
        assert_eq!(merged[0].description.as_deref(), Some("a longer description here"));
    }

    #[test]
    fn filter_drops_entities_below_threshold() {
        let entities = vec![
            ExtractedEntity {
                name: "Low".to_string(),
                entity_type: EntityType::Other,
                description: None,
                mentions: vec![mention(0.2)],
            },
            ExtractedEntity {
                name: "High".to_string(),
                entity_type: EntityType::Other,
                description: None,
                mentions: vec![mention(0.9)],
            },
        ];
        let filtered = filter_entities(
            entities,
            &FilterOptions {
                confidence_threshold: 0.5,
                max_entities: 50,
                allowed_types: None,
            },
        );
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].name, "High");
    }

    #[test]
    fn filter_caps_at_max_entities() {
        let entities: Vec<_> = (0..10)
            .map(|i| ExtractedEntity {
                name: format!("E{i}"),
                entity_type: EntityType::Other,
                description: None,
                mentions: vec![mention(0.9)],
            })
            .collect();
        let filtered = filter_entities(
            entities,
            &FilterOptions {
                confidence_threshold: 0.0,
                max_entities: 3,
                allowed_types: None,
            },
        );
        assert_eq!(filtered.len(), 3);
    }
}
