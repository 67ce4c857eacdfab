//! SQLite connection lifecycle.

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use std::str::FromStr;

use crate::config::Config;

/// Opens (creating if missing) the database at `config.storage.dir/databases/<name>.db`, with
/// WAL journaling and foreign keys enforced, matching the durability profile the storage engine
/// assumes for its transactional batch writes.
pub async fn connect(config: &Config) -> Result<SqlitePool> {
    let db_path = config.database_path();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    Ok(pool)
}
