//! Core data types shared across storage, extraction, processing and batching.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The canonical entity categories the extractors and normalizer recognize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Person,
    Organization,
    Location,
    Date,
    Product,
    Technology,
    Event,
    Other,
}

impl EntityType {
    /// Folds an unrecognized type name to `Other` rather than rejecting it outright.
    pub fn parse_lenient(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "person" => EntityType::Person,
            "organization" | "org" => EntityType::Organization,
            "location" | "place" => EntityType::Location,
            "date" | "time" => EntityType::Date,
            "product" => EntityType::Product,
            "technology" | "tech" => EntityType::Technology,
            "event" => EntityType::Event,
            _ => EntityType::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Person => "person",
            EntityType::Organization => "organization",
            EntityType::Location => "location",
            EntityType::Date => "date",
            EntityType::Product => "product",
            EntityType::Technology => "technology",
            EntityType::Event => "event",
            EntityType::Other => "other",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Content {
    pub id: String,
    pub content_type: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub source: Option<String>,
    pub file_path: Option<String>,
    pub hash: String,
    pub size: i64,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentChunk {
    pub id: String,
    pub content_id: String,
    pub chunk_index: i64,
    pub text: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub name: String,
    pub normalized_name: String,
    pub entity_type: EntityType,
    pub description: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityMention {
    pub id: String,
    pub entity_id: String,
    pub content_id: String,
    pub content_type: String,
    pub relevance: f64,
    pub context: String,
    pub position: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityAlias {
    pub id: String,
    pub entity_id: String,
    pub alias: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityRelationship {
    pub id: String,
    pub source_entity_id: String,
    pub target_entity_id: String,
    pub relationship_type: String,
    pub strength: f64,
}

/// One candidate entity as produced by an extractor, before it is persisted. Carries at least
/// one mention; `storage::link_entity_to_content` fans these out into `EntityMention` rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedEntity {
    pub name: String,
    pub entity_type: EntityType,
    pub description: Option<String>,
    pub mentions: Vec<ExtractedMention>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedMention {
    pub context: String,
    pub position: i64,
    pub relevance: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    FolderImport,
    UrlCrawl,
    EntityExtraction,
    Reprocess,
    ContentAnalysis,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::FolderImport => "folder-import",
            JobType::UrlCrawl => "url-crawl",
            JobType::EntityExtraction => "entity-extraction",
            JobType::Reprocess => "reprocess",
            JobType::ContentAnalysis => "content-analysis",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "folder-import" => Some(JobType::FolderImport),
            "url-crawl" => Some(JobType::UrlCrawl),
            "entity-extraction" => Some(JobType::EntityExtraction),
            "reprocess" => Some(JobType::Reprocess),
            "content-analysis" => Some(JobType::ContentAnalysis),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "running" => Some(JobStatus::Running),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "cancelled" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobItemStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
    Skipped,
}

impl JobItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobItemStatus::Pending => "pending",
            JobItemStatus::Processing => "processing",
            JobItemStatus::Completed => "completed",
            JobItemStatus::Failed => "failed",
            JobItemStatus::Cancelled => "cancelled",
            JobItemStatus::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobProgress {
    pub total: i64,
    pub completed: i64,
    pub failed: i64,
    pub processing: i64,
    pub pending: i64,
    pub skipped: i64,
}

impl JobProgress {
    pub fn percentage(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        let done = self.completed + self.failed + self.skipped;
        (done as f64 / self.total as f64) * 100.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub job_type: JobType,
    pub status: JobStatus,
    pub progress: JobProgress,
    pub options: serde_json::Value,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobItem {
    pub id: String,
    pub job_id: String,
    pub status: JobItemStatus,
    pub input_ref: String,
    pub result_ref: Option<String>,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}
