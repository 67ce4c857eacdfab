//! Content retrieval by ID: content metadata, its chunks, and linked entity mentions.
//!
//! Generalizes the donor's `get_document` (single-table fetch) to the richer content/chunk/
//! entity graph; used by both `ingestor get` (CLI) and `GET /content/:id` (HTTP).

use anyhow::Result;
use serde::Serialize;

use crate::config::Config;
use crate::storage::StorageEngine;

#[derive(Debug, Clone, Serialize)]
pub struct ChunkResponse {
    pub index: i64,
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct EntityMentionResponse {
    pub entity_id: String,
    pub name: String,
    pub entity_type: String,
    pub relevance: f64,
    pub context: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContentResponse {
    pub id: String,
    pub content_type: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub source: Option<String>,
    pub file_path: Option<String>,
    pub hash: String,
    pub size: i64,
    pub created_at: String,
    pub updated_at: String,
    pub metadata: serde_json::Value,
    pub chunks: Vec<ChunkResponse>,
    pub entities: Vec<EntityMentionResponse>,
}

/// Core fetch used by both the CLI and the HTTP surface.
pub async fn get_content_with_entities(storage: &StorageEngine, id: &str) -> Result<ContentResponse> {
    let content = storage
        .get_content(id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("content not found: {}", id))?;

    let chunks = storage
        .get_chunks(id)
        .await?
        .into_iter()
        .map(|c| ChunkResponse {
            index: c.chunk_index,
            text: c.text,
        })
        .collect();

    let mentions = storage.get_mentions_for_content(id).await?;
    let mut entities = Vec::with_capacity(mentions.len());
    for mention in mentions {
        if let Some(entity) = storage.get_entity(&mention.entity_id).await? {
            entities.push(EntityMentionResponse {
                entity_id: entity.id,
                name: entity.name,
                entity_type: entity.entity_type.as_str().to_string(),
                relevance: mention.relevance,
                context: mention.context,
            });
        }
    }

    Ok(ContentResponse {
        id: content.id,
        content_type: content.content_type,
        title: content.title,
        description: content.description,
        source: content.source,
        file_path: content.file_path,
        hash: content.hash,
        size: content.size,
        created_at: content.created_at.to_rfc3339(),
        updated_at: content.updated_at.to_rfc3339(),
        metadata: content.metadata,
        chunks,
        entities,
    })
}

/// CLI entry point — opens its own storage engine and prints to stdout.
pub async fn run_get(config: &Config, id: &str) -> Result<()> {
    let storage = StorageEngine::open(config).await?;
    let content = match get_content_with_entities(&storage, id).await {
        Ok(c) => c,
        Err(e) => {
            storage.close().await;
            return Err(e);
        }
    };

    println!("--- Content ---");
    println!("id:           {}", content.id);
    println!("title:        {}", content.title.as_deref().unwrap_or("(untitled)"));
    println!("content_type: {}", content.content_type);
    if let Some(ref source) = content.source {
        println!("source:       {}", source);
    }
    println!("size:         {} bytes", content.size);
    println!("created_at:   {}", content.created_at);
    println!("updated_at:   {}", content.updated_at);
    println!();

    println!("--- Chunks ({}) ---", content.chunks.len());
    for chunk in &content.chunks {
        println!("[chunk {}]", chunk.index);
        println!("{}", chunk.text);
        println!();
    }

    println!("--- Entities ({}) ---", content.entities.len());
    for entity in &content.entities {
        println!(
            "{} ({}) relevance={:.2} — \"{}\"",
            entity.name,
            entity.entity_type,
            entity.relevance,
            entity.context.replace('\n', " ").trim()
        );
    }

    storage.close().await;
    Ok(())
}
