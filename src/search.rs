//! Keyword search over ingested content via SQLite FTS5 (BM25 scoring).
//!
//! Semantic/hybrid modes from the donor are dropped — this pipeline has no embedding backend —
//! but the donor's min-max score normalization is kept so relevance is reported on a stable
//! `[0.0, 1.0]` scale regardless of BM25's raw (unbounded, negative) range.

use anyhow::Result;
use serde::Serialize;

use crate::config::Config;
use crate::storage::StorageEngine;

#[derive(Debug, Clone, Serialize)]
pub struct SearchResultItem {
    pub id: String,
    pub score: f64,
    pub title: Option<String>,
    pub content_type: String,
    pub source: Option<String>,
    pub updated_at: String,
    pub snippet: String,
}

/// Core search function returning structured results, shared by the CLI and `GET /search`.
/// An empty query returns an empty result set rather than an error.
pub async fn search_content(
    storage: &StorageEngine,
    query: &str,
    content_type_filter: Option<&str>,
    limit: i64,
) -> Result<Vec<SearchResultItem>> {
    if query.trim().is_empty() {
        return Ok(Vec::new());
    }

    let candidates = storage.search_content_fts(query, limit.max(1) * 4).await?;
    if candidates.is_empty() {
        return Ok(Vec::new());
    }

    let normalized = normalize_scores(&candidates);

    let mut results: Vec<SearchResultItem> = normalized
        .into_iter()
        .filter(|((content, _, _), _)| {
            content_type_filter
                .map(|ct| content.content_type == ct)
                .unwrap_or(true)
        })
        .map(|((content, snippet, _raw), score)| SearchResultItem {
            id: content.id.clone(),
            score,
            title: content.title.clone(),
            content_type: content.content_type.clone(),
            source: content.source.clone(),
            updated_at: content.updated_at.to_rfc3339(),
            snippet: snippet.clone(),
        })
        .collect();

    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.updated_at.cmp(&a.updated_at))
            .then_with(|| a.id.cmp(&b.id))
    });
    results.truncate(limit.max(0) as usize);

    Ok(results)
}

/// CLI entry point — opens its own storage engine and prints results to stdout.
pub async fn run_search(config: &Config, query: &str, content_type: Option<String>, limit: i64) -> Result<()> {
    let storage = StorageEngine::open(config).await?;
    let results = search_content(&storage, query, content_type.as_deref(), limit).await?;
    storage.close().await;

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, result) in results.iter().enumerate() {
        let title_display = result.title.as_deref().unwrap_or("(untitled)");
        println!("{}. [{:.2}] {} / {}", i + 1, result.score, result.content_type, title_display);
        println!("    updated: {}", result.updated_at);
        if let Some(ref source) = result.source {
            println!("    source: {}", source);
        }
        println!("    excerpt: \"{}\"", result.snippet.replace('\n', " ").trim());
        println!("    id: {}", result.id);
        println!();
    }

    Ok(())
}

/// Min-max normalize raw BM25 ranks (already negated to positive scores by the storage layer) to
/// `[0.0, 1.0]`. A single-candidate or all-equal set normalizes to `1.0`.
fn normalize_scores(
    candidates: &[(crate::models::Content, String, f64)],
) -> Vec<(&(crate::models::Content, String, f64), f64)> {
    let s_min = candidates.iter().map(|(_, _, s)| *s).fold(f64::INFINITY, f64::min);
    let s_max = candidates.iter().map(|(_, _, s)| *s).fold(f64::NEG_INFINITY, f64::max);

    candidates
        .iter()
        .map(|c| {
            let norm = if (s_max - s_min).abs() < f64::EPSILON {
                1.0
            } else {
                (c.2 - s_min) / (s_max - s_min)
            };
            (c, norm)
        })
        .collect()
}
