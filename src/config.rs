//! Configuration parsing and validation.
//!
//! The ingestor is configured via a TOML file (default: `config/ingestor.toml`). The config
//! defines the persisted-state root, chunking parameters, extraction tuning, batch/concurrency
//! settings, the AI extraction back end, and ambient logging.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Name of the database file under `storage.dir/databases/`, without extension.
    #[serde(default = "default_database_name")]
    pub database_name: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            chunking: ChunkingConfig::default(),
            extraction: ExtractionConfig::default(),
            batch: BatchConfig::default(),
            ai: AiConfig::default(),
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
            database_name: default_database_name(),
        }
    }
}

fn default_database_name() -> String {
    "default".to_string()
}

impl Config {
    pub fn database_path(&self) -> PathBuf {
        self.storage.dir.join("databases").join(format!("{}.db", self.database_name))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Persisted-state root. Defaults to `~/.ingestor`.
    #[serde(default = "default_storage_dir")]
    pub dir: PathBuf,
    #[serde(default)]
    pub cache: CacheSettings,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: default_storage_dir(),
            cache: CacheSettings::default(),
        }
    }
}

fn default_storage_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".ingestor")
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheSettings {
    #[serde(default = "default_cache_max_size")]
    pub max_size: usize,
    #[serde(default = "default_cache_ttl_ms")]
    pub ttl_ms: u64,
    #[serde(default = "default_true")]
    pub auto_prune: bool,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_size: default_cache_max_size(),
            ttl_ms: default_cache_ttl_ms(),
            auto_prune: true,
        }
    }
}

fn default_cache_max_size() -> usize {
    1000
}
fn default_cache_ttl_ms() -> u64 {
    30 * 60 * 1000
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_chunk_strategy")]
    pub strategy: String,
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: usize,
    #[serde(default)]
    pub chunk_overlap: Option<usize>,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            strategy: default_chunk_strategy(),
            max_chunk_size: default_max_chunk_size(),
            chunk_overlap: None,
        }
    }
}

fn default_chunk_strategy() -> String {
    "paragraph".to_string()
}
fn default_max_chunk_size() -> usize {
    4 * 1024 * 1024
}

impl ChunkingConfig {
    /// `max(256, 10% of max_chunk_size)` when not explicitly configured.
    pub fn overlap(&self) -> usize {
        self.chunk_overlap
            .unwrap_or_else(|| (self.max_chunk_size / 10).max(256))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractionConfig {
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    #[serde(default = "default_max_entities")]
    pub max_entities: usize,
    #[serde(default)]
    pub allowed_types: Option<Vec<String>>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
            max_entities: default_max_entities(),
            allowed_types: None,
        }
    }
}

fn default_confidence_threshold() -> f64 {
    0.5
}
fn default_max_entities() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct BatchConfig {
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default)]
    pub dynamic_concurrency: bool,
    #[serde(default = "default_true")]
    pub continue_on_error: bool,
    #[serde(default = "default_true")]
    pub prioritize_items: bool,
    #[serde(default = "default_item_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            dynamic_concurrency: false,
            continue_on_error: true,
            prioritize_items: true,
            timeout_ms: default_item_timeout_ms(),
        }
    }
}

fn default_max_concurrency() -> usize {
    4
}
fn default_item_timeout_ms() -> u64 {
    60_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct AiConfig {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_ai_credential_env")]
    pub credential_env: String,
    #[serde(default = "default_ai_model")]
    pub model: String,
    #[serde(default = "default_ai_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_ai_retries")]
    pub retries: u32,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            credential_env: default_ai_credential_env(),
            model: default_ai_model(),
            timeout_ms: default_ai_timeout_ms(),
            retries: default_ai_retries(),
        }
    }
}

fn default_ai_credential_env() -> String {
    "INGESTOR_AI_API_KEY".to_string()
}
fn default_ai_model() -> String {
    "entity-extractor-v1".to_string()
}
fn default_ai_timeout_ms() -> u64 {
    30_000
}
fn default_ai_retries() -> u32 {
    3
}

impl AiConfig {
    pub fn is_configured(&self) -> bool {
        self.endpoint.is_some() && std::env::var(&self.credential_env).is_ok()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: default_bind() }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8420".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "text".to_string()
}

fn default_true() -> bool {
    true
}

/// Reads and validates a config file. Falls back to all-defaults when `path` is `None`.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let config: Config = match path {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            toml::from_str(&content).with_context(|| "Failed to parse config file")?
        }
        None => Config::default(),
    };

    if config.chunking.max_chunk_size == 0 {
        anyhow::bail!("chunking.max_chunk_size must be > 0");
    }
    match config.chunking.strategy.as_str() {
        "size" | "paragraph" | "sentence" | "token" => {}
        other => anyhow::bail!(
            "Unknown chunking strategy: '{}'. Must be size, paragraph, sentence, or token.",
            other
        ),
    }

    if !(0.0..=1.0).contains(&config.extraction.confidence_threshold) {
        anyhow::bail!("extraction.confidence_threshold must be in [0.0, 1.0]");
    }
    if config.extraction.max_entities == 0 {
        anyhow::bail!("extraction.max_entities must be > 0");
    }

    if config.batch.max_concurrency == 0 {
        anyhow::bail!("batch.max_concurrency must be > 0");
    }
    if config.batch.timeout_ms == 0 {
        anyhow::bail!("batch.timeout_ms must be > 0");
    }

    if config.ai.retries > 10 {
        anyhow::bail!("ai.retries must be <= 10");
    }

    match config.logging.format.as_str() {
        "text" | "json" => {}
        other => anyhow::bail!("Unknown logging format: '{}'. Must be text or json.", other),
    }

    Ok(config)
}
