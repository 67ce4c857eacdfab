//! Database schema migrations.
//!
//! Creates all required tables (content, chunks, entities, mentions, aliases, relationships,
//! jobs, job_items, content_fts, db_metadata) and ensures idempotent execution. Run via
//! `ingestor init` or automatically on first connect by the storage engine.

use anyhow::Result;
use sqlx::sqlite::SqlitePool;

use crate::config::Config;
use crate::db;

const SCHEMA_VERSION: &str = "1.0";

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    run_migrations_on(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Separated from `run_migrations` so tests and the storage engine can pass in an
/// already-open pool (e.g. an in-memory database) instead of reconnecting.
pub async fn run_migrations_on(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS content (
            id TEXT PRIMARY KEY,
            content_type TEXT NOT NULL,
            title TEXT,
            description TEXT,
            source TEXT,
            file_path TEXT,
            hash TEXT NOT NULL,
            size INTEGER NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            UNIQUE(source, hash)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id TEXT PRIMARY KEY,
            content_id TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            text TEXT NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            created_at INTEGER NOT NULL,
            UNIQUE(content_id, chunk_index),
            FOREIGN KEY (content_id) REFERENCES content(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS entities (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            normalized_name TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            description TEXT,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            UNIQUE(normalized_name, entity_type)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS entity_mentions (
            id TEXT PRIMARY KEY,
            entity_id TEXT NOT NULL,
            content_id TEXT NOT NULL,
            content_type TEXT NOT NULL,
            relevance REAL NOT NULL,
            context TEXT NOT NULL,
            position INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (entity_id) REFERENCES entities(id) ON DELETE CASCADE,
            FOREIGN KEY (content_id) REFERENCES content(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS entity_aliases (
            id TEXT PRIMARY KEY,
            entity_id TEXT NOT NULL,
            alias TEXT NOT NULL,
            confidence REAL NOT NULL,
            FOREIGN KEY (entity_id) REFERENCES entities(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS entity_relationships (
            id TEXT PRIMARY KEY,
            source_entity_id TEXT NOT NULL,
            target_entity_id TEXT NOT NULL,
            relationship_type TEXT NOT NULL,
            strength REAL NOT NULL,
            UNIQUE(source_entity_id, target_entity_id, relationship_type),
            FOREIGN KEY (source_entity_id) REFERENCES entities(id) ON DELETE CASCADE,
            FOREIGN KEY (target_entity_id) REFERENCES entities(id) ON DELETE CASCADE,
            CHECK (source_entity_id != target_entity_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS search_cache (
            search_hash TEXT PRIMARY KEY,
            query TEXT NOT NULL,
            params_json TEXT NOT NULL,
            results_json TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            expires_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            id TEXT PRIMARY KEY,
            job_type TEXT NOT NULL,
            status TEXT NOT NULL,
            total INTEGER NOT NULL DEFAULT 0,
            completed INTEGER NOT NULL DEFAULT 0,
            failed INTEGER NOT NULL DEFAULT 0,
            processing INTEGER NOT NULL DEFAULT 0,
            pending INTEGER NOT NULL DEFAULT 0,
            skipped INTEGER NOT NULL DEFAULT 0,
            options_json TEXT NOT NULL DEFAULT '{}',
            created_by TEXT,
            created_at INTEGER NOT NULL,
            started_at INTEGER,
            finished_at INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS job_items (
            id TEXT PRIMARY KEY,
            job_id TEXT NOT NULL,
            status TEXT NOT NULL,
            input_ref TEXT NOT NULL,
            result_ref TEXT,
            error_message TEXT,
            started_at INTEGER,
            finished_at INTEGER,
            FOREIGN KEY (job_id) REFERENCES jobs(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS db_metadata (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // FTS5 CREATE VIRTUAL TABLE isn't naturally idempotent; check first.
    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='content_fts'",
    )
    .fetch_one(pool)
    .await?;

    if !fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE content_fts USING fts5(
                chunk_id UNINDEXED,
                content_id UNINDEXED,
                title,
                description,
                text
            )
            "#,
        )
        .execute(pool)
        .await?;

        // Mirror chunk writes into content_fts.
        sqlx::query(
            r#"
            CREATE TRIGGER chunks_ai AFTER INSERT ON chunks BEGIN
                INSERT INTO content_fts(rowid, chunk_id, content_id, title, description, text)
                SELECT new.rowid, new.id, new.content_id,
                       (SELECT title FROM content WHERE id = new.content_id),
                       (SELECT description FROM content WHERE id = new.content_id),
                       new.text;
            END
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TRIGGER chunks_ad AFTER DELETE ON chunks BEGIN
                INSERT INTO content_fts(content_fts, rowid, chunk_id, content_id, title, description, text)
                VALUES ('delete', old.rowid, old.id, old.content_id, '', '', old.text);
            END
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TRIGGER chunks_au AFTER UPDATE ON chunks BEGIN
                INSERT INTO content_fts(content_fts, rowid, chunk_id, content_id, title, description, text)
                VALUES ('delete', old.rowid, old.id, old.content_id, '', '', old.text);
                INSERT INTO content_fts(rowid, chunk_id, content_id, title, description, text)
                SELECT new.rowid, new.id, new.content_id,
                       (SELECT title FROM content WHERE id = new.content_id),
                       (SELECT description FROM content WHERE id = new.content_id),
                       new.text;
            END
            "#,
        )
        .execute(pool)
        .await?;

        // Mirror content title/description updates into every chunk's FTS row.
        sqlx::query(
            r#"
            CREATE TRIGGER content_au AFTER UPDATE OF title, description ON content BEGIN
                INSERT INTO content_fts(content_fts, rowid, chunk_id, content_id, title, description, text)
                SELECT content_fts, chunks.rowid, chunks.id, chunks.content_id, '', '', chunks.text
                FROM chunks, (SELECT 'delete' AS content_fts) AS d
                WHERE chunks.content_id = new.id;
                INSERT INTO content_fts(rowid, chunk_id, content_id, title, description, text)
                SELECT rowid, id, content_id, new.title, new.description, text
                FROM chunks WHERE content_id = new.id;
            END
            "#,
        )
        .execute(pool)
        .await?;
    }

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_content_id ON chunks(content_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_content_source ON content(source)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_content_updated_at ON content(updated_at DESC)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_mentions_content_id ON entity_mentions(content_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_mentions_entity_id ON entity_mentions(entity_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_job_items_job_id ON job_items(job_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status)")
        .execute(pool)
        .await?;

    let metadata_exists: bool =
        sqlx::query_scalar("SELECT COUNT(*) > 0 FROM db_metadata WHERE key = 'schema_version'")
            .fetch_one(pool)
            .await?;
    if !metadata_exists {
        let now = chrono::Utc::now().timestamp();
        sqlx::query("INSERT INTO db_metadata (key, value) VALUES ('schema_version', ?)")
            .bind(SCHEMA_VERSION)
            .execute(pool)
            .await?;
        sqlx::query("INSERT INTO db_metadata (key, value) VALUES ('created_at', ?)")
            .bind(now.to_string())
            .execute(pool)
            .await?;
        sqlx::query("INSERT INTO db_metadata (key, value) VALUES ('ingestor_version', ?)")
            .bind(env!("CARGO_PKG_VERSION"))
            .execute(pool)
            .await?;
    }

    Ok(())
}
