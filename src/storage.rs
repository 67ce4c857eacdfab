//! `StorageEngine`: schema-aware wrapper around the SQLite pool providing the transactional
//! content/chunk/entity operations the rest of the pipeline builds on, plus the entity cache.

use std::sync::Mutex;

use chrono::Utc;
use sha2::{Digest, Sha256};
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use uuid::Uuid;

use crate::cache::{CacheConfig, EntityCache};
use crate::config::Config;
use crate::errors::{ErrorContext, IngestError, Result};
use crate::models::{
    Content, ContentChunk, Entity, EntityMention, EntityRelationship, EntityType, ExtractedEntity,
};

pub struct StorageEngine {
    pool: SqlitePool,
    cache: Mutex<EntityCache>,
}

impl StorageEngine {
    pub async fn open(config: &Config) -> anyhow::Result<Self> {
        let pool = crate::db::connect(config).await?;
        crate::migrate::run_migrations_on(&pool).await?;
        let cache_config = CacheConfig {
            max_size: config.storage.cache.max_size,
            ttl: std::time::Duration::from_millis(config.storage.cache.ttl_ms),
            auto_prune: config.storage.cache.auto_prune,
        };
        Ok(Self {
            pool,
            cache: Mutex::new(EntityCache::new(cache_config)),
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// SHA-256 of the raw bytes, used both for the content `hash` column and for dedup.
    pub fn hash_bytes(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex_encode(&hasher.finalize())
    }

    /// Looks up an existing content row by `(source, hash)`. Returns `None` when no row
    /// matches, which is the processor's cue to insert a new one rather than dedup.
    pub async fn find_content_by_hash(
        &self,
        source: Option<&str>,
        hash: &str,
    ) -> Result<Option<Content>> {
        let row = sqlx::query(
            "SELECT id, content_type, title, description, source, file_path, hash, size, \
             metadata_json, created_at, updated_at FROM content WHERE hash = ? AND source IS ?",
        )
        .bind(hash)
        .bind(source)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(row_to_content))
    }

    /// Inserts a new content row. Caller is responsible for having checked dedup first; a
    /// unique-constraint violation here surfaces as `ErrorKind::Conflict`.
    pub async fn store_content(
        &self,
        content_type: &str,
        title: Option<&str>,
        description: Option<&str>,
        source: Option<&str>,
        file_path: Option<&str>,
        hash: &str,
        size: i64,
        metadata: &serde_json::Value,
    ) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().timestamp();
        sqlx::query(
            "INSERT INTO content (id, content_type, title, description, source, file_path, \
             hash, size, metadata_json, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(content_type)
        .bind(title)
        .bind(description)
        .bind(source)
        .bind(file_path)
        .bind(hash)
        .bind(size)
        .bind(metadata.to_string())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| IngestError::from(e).with_context(ErrorContext::with_content(&id)))?;
        Ok(id)
    }

    pub async fn store_chunk(
        &self,
        content_id: &str,
        chunk_index: i64,
        text: &str,
        metadata: &serde_json::Value,
    ) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().timestamp();
        sqlx::query(
            "INSERT INTO chunks (id, content_id, chunk_index, text, metadata_json, created_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(content_id)
        .bind(chunk_index)
        .bind(text)
        .bind(metadata.to_string())
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| IngestError::from(e).with_context(ErrorContext::with_content(content_id)))?;
        Ok(id)
    }

    /// Idempotent entity upsert: checks the cache, then `(normalized_name, type)` uniqueness,
    /// and returns the existing id on conflict rather than erroring. A longer description never
    /// loses to a shorter one.
    pub async fn store_entity(
        &self,
        name: &str,
        normalized_name: &str,
        entity_type: EntityType,
        description: Option<&str>,
    ) -> Result<String> {
        // A cached id only tells us the entity exists, not its current description, so it can
        // only short-circuit when there is no incoming description to compare against — any
        // update decision must go through the row fetch below.
        if description.is_none() {
            if let Some(id) = self
                .cache
                .lock()
                .unwrap()
                .lookup_id(normalized_name, entity_type)
            {
                return Ok(id);
            }
        }

        if let Some(existing) = self
            .get_entity_by_name_and_type(normalized_name, entity_type)
            .await?
        {
            if let Some(new_desc) = description {
                let keep_new = existing
                    .description
                    .as_ref()
                    .map(|d| new_desc.len() > d.len())
                    .unwrap_or(true);
                if keep_new {
                    sqlx::query("UPDATE entities SET description = ?, updated_at = ? WHERE id = ?")
                        .bind(new_desc)
                        .bind(Utc::now().timestamp())
                        .bind(&existing.id)
                        .execute(&self.pool)
                        .await?;
                    self.cache
                        .lock()
                        .unwrap()
                        .invalidate(&existing.id, normalized_name, entity_type);
                    return Ok(existing.id);
                }
            }
            self.cache.lock().unwrap().insert(existing.clone());
            return Ok(existing.id);
        }

        let id = Uuid::new_v4().to_string();
        let now = Utc::now().timestamp();
        let insert_result = sqlx::query(
            "INSERT INTO entities (id, name, normalized_name, entity_type, description, \
             metadata_json, created_at, updated_at) VALUES (?, ?, ?, ?, ?, '{}', ?, ?)",
        )
        .bind(&id)
        .bind(name)
        .bind(normalized_name)
        .bind(entity_type.as_str())
        .bind(description)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await;

        match insert_result {
            Ok(_) => {
                if let Some(entity) = self.get_entity(&id).await? {
                    self.cache.lock().unwrap().insert(entity);
                }
                Ok(id)
            }
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                // Lost a race with a concurrent writer; fetch the row that won.
                match self
                    .get_entity_by_name_and_type(normalized_name, entity_type)
                    .await?
                {
                    Some(existing) => Ok(existing.id),
                    None => Err(IngestError::conflict(format!(
                        "entity '{}' reported a conflict but no row was found",
                        normalized_name
                    ))),
                }
            }
            Err(e) => Err(IngestError::from(e)),
        }
    }

    pub async fn get_entity(&self, id: &str) -> Result<Option<Entity>> {
        if let Some(entity) = self.cache.lock().unwrap().lookup_entity(id) {
            return Ok(Some(entity));
        }
        let row = sqlx::query(
            "SELECT id, name, normalized_name, entity_type, description, metadata_json, \
             created_at, updated_at FROM entities WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        let entity = row.map(row_to_entity);
        if let Some(ref e) = entity {
            self.cache.lock().unwrap().insert(e.clone());
        }
        Ok(entity)
    }

    pub async fn get_entity_by_name_and_type(
        &self,
        normalized_name: &str,
        entity_type: EntityType,
    ) -> Result<Option<Entity>> {
        let row = sqlx::query(
            "SELECT id, name, normalized_name, entity_type, description, metadata_json, \
             created_at, updated_at FROM entities WHERE normalized_name = ? AND entity_type = ?",
        )
        .bind(normalized_name)
        .bind(entity_type.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(row_to_entity))
    }

    pub async fn link_entity_to_content(
        &self,
        entity_id: &str,
        content_id: &str,
        content_type: &str,
        mention: &crate::models::ExtractedMention,
    ) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().timestamp();
        sqlx::query(
            "INSERT INTO entity_mentions (id, entity_id, content_id, content_type, relevance, \
             context, position, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(entity_id)
        .bind(content_id)
        .bind(content_type)
        .bind(mention.relevance)
        .bind(&mention.context)
        .bind(mention.position)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    pub async fn get_content(&self, id: &str) -> Result<Option<Content>> {
        let row = sqlx::query(
            "SELECT id, content_type, title, description, source, file_path, hash, size, \
             metadata_json, created_at, updated_at FROM content WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(row_to_content))
    }

    pub async fn get_chunks(&self, content_id: &str) -> Result<Vec<ContentChunk>> {
        let rows = sqlx::query(
            "SELECT id, content_id, chunk_index, text, metadata_json, created_at FROM chunks \
             WHERE content_id = ? ORDER BY chunk_index ASC",
        )
        .bind(content_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(row_to_chunk).collect())
    }

    pub async fn get_mentions_for_content(&self, content_id: &str) -> Result<Vec<EntityMention>> {
        let rows = sqlx::query(
            "SELECT id, entity_id, content_id, content_type, relevance, context, position, \
             created_at FROM entity_mentions WHERE content_id = ? ORDER BY position ASC",
        )
        .bind(content_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(row_to_mention).collect())
    }

    pub async fn search_content_fts(
        &self,
        query: &str,
        limit: i64,
    ) -> Result<Vec<(Content, String, f64)>> {
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.content_type, c.title, c.description, c.source, c.file_path, c.hash,
                   c.size, c.metadata_json, c.created_at, c.updated_at,
                   snippet(content_fts, 4, '>>>', '<<<', '...', 32) AS snippet,
                   bm25(content_fts) AS rank
            FROM content_fts
            JOIN content c ON c.id = content_fts.content_id
            WHERE content_fts MATCH ?
            GROUP BY c.id
            ORDER BY rank ASC
            LIMIT ?
            "#,
        )
        .bind(query)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let snippet: String = row.get("snippet");
                let rank: f64 = row.get("rank");
                (row_to_content(row), snippet, -rank)
            })
            .collect())
    }

    pub async fn begin(&self) -> Result<sqlx::Transaction<'_, sqlx::Sqlite>> {
        Ok(self.pool.begin().await?)
    }

    pub async fn store_entity_with_alias(
        &self,
        name: &str,
        normalized_name: &str,
        entity_type: EntityType,
        extracted: &ExtractedEntity,
    ) -> Result<String> {
        let id = self
            .store_entity(name, normalized_name, entity_type, extracted.description.as_deref())
            .await?;
        if extracted.name != name {
            let exists: bool = sqlx::query_scalar(
                "SELECT COUNT(*) > 0 FROM entity_aliases WHERE entity_id = ? AND alias = ?",
            )
            .bind(&id)
            .bind(&extracted.name)
            .fetch_one(&self.pool)
            .await?;
            if !exists {
                sqlx::query(
                    "INSERT INTO entity_aliases (id, entity_id, alias, confidence) VALUES (?, ?, ?, ?)",
                )
                .bind(Uuid::new_v4().to_string())
                .bind(&id)
                .bind(&extracted.name)
                .bind(0.8_f64)
                .execute(&self.pool)
                .await?;
            }
        }
        Ok(id)
    }

    /// Lists content rows, most recently updated first, optionally filtered by content type.
    pub async fn list_content(
        &self,
        content_type: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Content>> {
        let rows = sqlx::query(
            "SELECT id, content_type, title, description, source, file_path, hash, size, \
             metadata_json, created_at, updated_at FROM content \
             WHERE content_type = ? OR ? IS NULL \
             ORDER BY updated_at DESC LIMIT ? OFFSET ?",
        )
        .bind(content_type)
        .bind(content_type)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(row_to_content).collect())
    }

    /// Lists entities, most recently updated first, optionally filtered by entity type.
    pub async fn list_entities(
        &self,
        entity_type: Option<EntityType>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Entity>> {
        let entity_type = entity_type.map(|t| t.as_str());
        let rows = sqlx::query(
            "SELECT id, name, normalized_name, entity_type, description, metadata_json, \
             created_at, updated_at FROM entities \
             WHERE entity_type = ? OR ? IS NULL \
             ORDER BY updated_at DESC LIMIT ? OFFSET ?",
        )
        .bind(entity_type)
        .bind(entity_type)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(row_to_entity).collect())
    }

    /// Content rows an entity is mentioned in, deduplicated, most recently updated first.
    pub async fn get_entity_content(&self, entity_id: &str) -> Result<Vec<Content>> {
        let rows = sqlx::query(
            "SELECT DISTINCT c.id, c.content_type, c.title, c.description, c.source, \
             c.file_path, c.hash, c.size, c.metadata_json, c.created_at, c.updated_at \
             FROM content c \
             JOIN entity_mentions m ON m.content_id = c.id \
             WHERE m.entity_id = ? ORDER BY c.updated_at DESC",
        )
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(row_to_content).collect())
    }

    /// Records a relationship between two entities, ignoring self-relations and duplicate
    /// `(source, target, type)` triples rather than erroring on either.
    pub async fn store_relationship(
        &self,
        source_entity_id: &str,
        target_entity_id: &str,
        relationship_type: &str,
        strength: f64,
    ) -> Result<()> {
        if source_entity_id == target_entity_id {
            return Ok(());
        }
        sqlx::query(
            "INSERT OR IGNORE INTO entity_relationships \
             (id, source_entity_id, target_entity_id, relationship_type, strength) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(source_entity_id)
        .bind(target_entity_id)
        .bind(relationship_type)
        .bind(strength)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Entities related to `id`, optionally narrowed to one relationship type. Looks both
    /// directions since relationships like `co_occurs_with` are symmetric in meaning even though
    /// the row is stored once with a fixed source/target.
    pub async fn get_related_entities(
        &self,
        id: &str,
        relationship_type: Option<&str>,
    ) -> Result<Vec<(EntityRelationship, Entity)>> {
        let rows = sqlx::query(
            "SELECT r.id AS rel_id, r.source_entity_id, r.target_entity_id, \
             r.relationship_type, r.strength, \
             e.id, e.name, e.normalized_name, e.entity_type, e.description, e.metadata_json, \
             e.created_at, e.updated_at \
             FROM entity_relationships r \
             JOIN entities e \
               ON e.id = CASE WHEN r.source_entity_id = ? THEN r.target_entity_id \
                              ELSE r.source_entity_id END \
             WHERE (r.source_entity_id = ? OR r.target_entity_id = ?) \
               AND (r.relationship_type = ? OR ? IS NULL)",
        )
        .bind(id)
        .bind(id)
        .bind(id)
        .bind(relationship_type)
        .bind(relationship_type)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let relationship = EntityRelationship {
                    id: row.get("rel_id"),
                    source_entity_id: row.get("source_entity_id"),
                    target_entity_id: row.get("target_entity_id"),
                    relationship_type: row.get("relationship_type"),
                    strength: row.get("strength"),
                };
                (relationship, row_to_entity(row))
            })
            .collect())
    }
}

fn row_to_content(row: sqlx::sqlite::SqliteRow) -> Content {
    let created_at: i64 = row.get("created_at");
    let updated_at: i64 = row.get("updated_at");
    let metadata_json: String = row.get("metadata_json");
    Content {
        id: row.get("id"),
        content_type: row.get("content_type"),
        title: row.get("title"),
        description: row.get("description"),
        source: row.get("source"),
        file_path: row.get("file_path"),
        hash: row.get("hash"),
        size: row.get("size"),
        metadata: serde_json::from_str(&metadata_json).unwrap_or(serde_json::json!({})),
        created_at: chrono::DateTime::from_timestamp(created_at, 0).unwrap_or_default(),
        updated_at: chrono::DateTime::from_timestamp(updated_at, 0).unwrap_or_default(),
    }
}

fn row_to_chunk(row: sqlx::sqlite::SqliteRow) -> ContentChunk {
    let created_at: i64 = row.get("created_at");
    let metadata_json: String = row.get("metadata_json");
    ContentChunk {
        id: row.get("id"),
        content_id: row.get("content_id"),
        chunk_index: row.get("chunk_index"),
        text: row.get("text"),
        metadata: serde_json::from_str(&metadata_json).unwrap_or(serde_json::json!({})),
        created_at: chrono::DateTime::from_timestamp(created_at, 0).unwrap_or_default(),
    }
}

fn row_to_entity(row: sqlx::sqlite::SqliteRow) -> Entity {
    let created_at: i64 = row.get("created_at");
    let updated_at: i64 = row.get("updated_at");
    let metadata_json: String = row.get("metadata_json");
    let entity_type: String = row.get("entity_type");
    Entity {
        id: row.get("id"),
        name: row.get("name"),
        normalized_name: row.get("normalized_name"),
        entity_type: EntityType::parse_lenient(&entity_type),
        description: row.get("description"),
        metadata: serde_json::from_str(&metadata_json).unwrap_or(serde_json::json!({})),
        created_at: chrono::DateTime::from_timestamp(created_at, 0).unwrap_or_default(),
        updated_at: chrono::DateTime::from_timestamp(updated_at, 0).unwrap_or_default(),
    }
}

fn row_to_mention(row: sqlx::sqlite::SqliteRow) -> EntityMention {
    let created_at: i64 = row.get("created_at");
    EntityMention {
        id: row.get("id"),
        entity_id: row.get("entity_id"),
        content_id: row.get("content_id"),
        content_type: row.get("content_type"),
        relevance: row.get("relevance"),
        context: row.get("context"),
        position: row.get("position"),
        created_at: chrono::DateTime::from_timestamp(created_at, 0).unwrap_or_default(),
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_engine() -> StorageEngine {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        crate::migrate::run_migrations_on(&pool).await.unwrap();
        let cache = EntityCache::new(CacheConfig::default());
        StorageEngine {
            pool,
            cache: Mutex::new(cache),
        }
    }

    #[tokio::test]
    async fn store_entity_is_idempotent() {
        let engine = test_engine().await;
        let id1 = engine
            .store_entity("John Doe", "john doe", EntityType::Person, Some("a person"))
            .await
            .unwrap();
        let id2 = engine
            .store_entity("John Doe", "john doe", EntityType::Person, None)
            .await
            .unwrap();
        assert_eq!(id1, id2);
    }

    #[tokio::test]
    async fn store_entity_keeps_longer_description() {
        let engine = test_engine().await;
        let id = engine
            .store_entity("Acme", "acme", EntityType::Organization, Some("short"))
            .await
            .unwrap();
        engine
            .store_entity("Acme", "acme", EntityType::Organization, Some("a much longer description"))
            .await
            .unwrap();
        let entity = engine.get_entity(&id).await.unwrap().unwrap();
        assert_eq!(entity.description.as_deref(), Some("a much longer description"));
    }

    #[tokio::test]
    async fn content_dedup_by_source_and_hash() {
        let engine = test_engine().await;
        let hash = StorageEngine::hash_bytes(b"hello world");
        let id = engine
            .store_content("text/plain", None, None, Some("fs"), None, &hash, 11, &serde_json::json!({}))
            .await
            .unwrap();
        let found = engine.find_content_by_hash(Some("fs"), &hash).await.unwrap();
        assert_eq!(found.unwrap().id, id);
    }

    #[tokio::test]
    async fn fts_search_finds_inserted_chunk() {
        let engine = test_engine().await;
        let hash = StorageEngine::hash_bytes(b"Acme Corp announcement");
        let content_id = engine
            .store_content("text/plain", None, None, None, None, &hash, 10, &serde_json::json!({}))
            .await
            .unwrap();
        engine
            .store_chunk(&content_id, 0, "Acme Corp announcement", &serde_json::json!({}))
            .await
            .unwrap();
        let results = engine.search_content_fts("Acme", 10).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0.id, content_id);
    }

    #[tokio::test]
    async fn list_entities_filters_by_type() {
        let engine = test_engine().await;
        engine
            .store_entity("John Doe", "john doe", EntityType::Person, None)
            .await
            .unwrap();
        engine
            .store_entity("Acme", "acme", EntityType::Organization, None)
            .await
            .unwrap();
        let people = engine
            .list_entities(Some(EntityType::Person), 10, 0)
            .await
            .unwrap();
        assert_eq!(people.len(), 1);
        assert_eq!(people[0].normalized_name, "john doe");
        let all = engine.list_entities(None, 10, 0).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn store_relationship_is_idempotent_and_skips_self_relations() {
        let engine = test_engine().await;
        let john = engine
            .store_entity("John Doe", "john doe", EntityType::Person, None)
            .await
            .unwrap();
        let acme = engine
            .store_entity("Acme", "acme", EntityType::Organization, None)
            .await
            .unwrap();
        engine
            .store_relationship(&john, &acme, "co_occurs_with", 1.0)
            .await
            .unwrap();
        engine
            .store_relationship(&john, &acme, "co_occurs_with", 1.0)
            .await
            .unwrap();
        engine
            .store_relationship(&john, &john, "co_occurs_with", 1.0)
            .await
            .unwrap();

        let related = engine.get_related_entities(&john, None).await.unwrap();
        assert_eq!(related.len(), 1);
        assert_eq!(related[0].1.id, acme);

        let related_from_target = engine.get_related_entities(&acme, None).await.unwrap();
        assert_eq!(related_from_target.len(), 1);
        assert_eq!(related_from_target[0].1.id, john);

        let filtered = engine
            .get_related_entities(&john, Some("mentions"))
            .await
            .unwrap();
        assert!(filtered.is_empty());
    }

    #[tokio::test]
    async fn get_entity_content_returns_mentioning_content() {
        let engine = test_engine().await;
        let content_id = engine
            .store_content("text/plain", None, None, None, None, "h1", 4, &serde_json::json!({}))
            .await
            .unwrap();
        let entity_id = engine
            .store_entity("John Doe", "john doe", EntityType::Person, None)
            .await
            .unwrap();
        let mention = crate::models::ExtractedMention {
            context: "John Doe said hi".to_string(),
            position: 0,
            relevance: 0.9,
        };
        engine
            .link_entity_to_content(&entity_id, &content_id, "text/plain", &mention)
            .await
            .unwrap();

        let contents = engine.get_entity_content(&entity_id).await.unwrap();
        assert_eq!(contents.len(), 1);
        assert_eq!(contents[0].id, content_id);
    }
}
