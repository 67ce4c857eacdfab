//! `JobRegistry` (C6): durable `Job`/`JobItem` records atop the storage pool.
//!
//! Grounded in the donor's checkpoint persistence in `ingest.rs` (`get_checkpoint`/
//! `set_checkpoint`, a small key-value row updated transactionally alongside the work it
//! tracks), generalized from a single checkpoint row per connector to a full job/item table pair
//! with status transitions and atomic progress counters.

use chrono::Utc;
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use uuid::Uuid;

use crate::errors::{ErrorContext, IngestError, Result};
use crate::models::{Job, JobItem, JobItemStatus, JobProgress, JobStatus, JobType};

pub struct JobRegistry {
    pool: SqlitePool,
}

impl JobRegistry {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Creates a job in `pending` status with `total` items pre-registered as `pending` items.
    pub async fn create_job(
        &self,
        job_type: JobType,
        item_refs: &[String],
        options: &serde_json::Value,
        created_by: Option<&str>,
    ) -> Result<Job> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().timestamp();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(IngestError::from)?;

        sqlx::query(
            "INSERT INTO jobs (id, job_type, status, total, completed, failed, processing, \
             pending, skipped, options_json, created_by, created_at, started_at, finished_at) \
             VALUES (?, ?, 'pending', ?, 0, 0, 0, ?, 0, ?, ?, ?, NULL, NULL)",
        )
        .bind(&id)
        .bind(job_type.as_str())
        .bind(item_refs.len() as i64)
        .bind(item_refs.len() as i64)
        .bind(options.to_string())
        .bind(created_by)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| IngestError::from(e).with_context(ErrorContext::with_job(&id)))?;

        for item_ref in item_refs {
            sqlx::query(
                "INSERT INTO job_items (id, job_id, status, input_ref, result_ref, \
                 error_message, started_at, finished_at) VALUES (?, ?, 'pending', ?, NULL, NULL, NULL, NULL)",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(&id)
            .bind(item_ref)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await.map_err(IngestError::from)?;

        self.get_job(&id)
            .await?
            .ok_or_else(|| IngestError::fatal("job vanished immediately after creation"))
    }

    pub async fn start_job(&self, job_id: &str) -> Result<()> {
        self.transition(job_id, JobStatus::Running, true, false).await
    }

    pub async fn complete_job(&self, job_id: &str) -> Result<()> {
        self.transition(job_id, JobStatus::Completed, false, true).await
    }

    pub async fn fail_job(&self, job_id: &str) -> Result<()> {
        self.transition(job_id, JobStatus::Failed, false, true).await
    }

    pub async fn cancel_job(&self, job_id: &str) -> Result<()> {
        self.transition(job_id, JobStatus::Cancelled, false, true).await
    }

    async fn transition(
        &self,
        job_id: &str,
        status: JobStatus,
        set_started: bool,
        set_finished: bool,
    ) -> Result<()> {
        let now = Utc::now().timestamp();
        let result = if set_started {
            sqlx::query("UPDATE jobs SET status = ?, started_at = ? WHERE id = ?")
                .bind(status.as_str())
                .bind(now)
                .bind(job_id)
                .execute(&self.pool)
                .await
        } else if set_finished {
            sqlx::query("UPDATE jobs SET status = ?, finished_at = ? WHERE id = ?")
                .bind(status.as_str())
                .bind(now)
                .bind(job_id)
                .execute(&self.pool)
                .await
        } else {
            sqlx::query("UPDATE jobs SET status = ? WHERE id = ?")
                .bind(status.as_str())
                .bind(job_id)
                .execute(&self.pool)
                .await
        }
        .map_err(|e| IngestError::from(e).with_context(ErrorContext::with_job(job_id)))?;

        if result.rows_affected() == 0 {
            return Err(IngestError::not_found(format!("job '{}' not found", job_id)));
        }
        Ok(())
    }

    /// Updates one item's status and the job's progress counters atomically in one transaction,
    /// per the spec's "progress counters are updated atomically together with item status".
    pub async fn update_item_status(
        &self,
        job_id: &str,
        item_id: &str,
        from: JobItemStatus,
        to: JobItemStatus,
        result_ref: Option<&str>,
        error_message: Option<&str>,
    ) -> Result<()> {
        let now = Utc::now().timestamp();
        let mut tx = self.pool.begin().await.map_err(IngestError::from)?;

        let updated = sqlx::query(
            "UPDATE job_items SET status = ?, result_ref = ?, error_message = ?, \
             started_at = CASE WHEN ? = 'processing' THEN ? ELSE started_at END, \
             finished_at = CASE WHEN ? IN ('completed','failed','cancelled','skipped') THEN ? ELSE finished_at END \
             WHERE id = ? AND job_id = ?",
        )
        .bind(to.as_str())
        .bind(result_ref)
        .bind(error_message)
        .bind(to.as_str())
        .bind(now)
        .bind(to.as_str())
        .bind(now)
        .bind(item_id)
        .bind(job_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| IngestError::from(e).with_context(ErrorContext::with_item(item_id)))?;

        if updated.rows_affected() == 0 {
            return Err(IngestError::not_found(format!("job item '{}' not found", item_id)));
        }

        let from_column = progress_column(from);
        let to_column = progress_column(to);
        if from_column != to_column {
            sqlx::query(&format!(
                "UPDATE jobs SET {from_column} = {from_column} - 1, {to_column} = {to_column} + 1 WHERE id = ?"
            ))
            .bind(job_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await.map_err(IngestError::from)?;
        Ok(())
    }

    pub async fn get_job(&self, id: &str) -> Result<Option<Job>> {
        let row = sqlx::query(
            "SELECT id, job_type, status, total, completed, failed, processing, pending, \
             skipped, options_json, created_by, created_at, started_at, finished_at FROM jobs \
             WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(row_to_job))
    }

    pub async fn list_jobs(&self, status: Option<JobStatus>, limit: i64) -> Result<Vec<Job>> {
        let rows = match status {
            Some(status) => {
                sqlx::query(
                    "SELECT id, job_type, status, total, completed, failed, processing, pending, \
                     skipped, options_json, created_by, created_at, started_at, finished_at FROM jobs \
                     WHERE status = ? ORDER BY created_at DESC LIMIT ?",
                )
                .bind(status.as_str())
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT id, job_type, status, total, completed, failed, processing, pending, \
                     skipped, options_json, created_by, created_at, started_at, finished_at FROM jobs \
                     ORDER BY created_at DESC LIMIT ?",
                )
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(rows.into_iter().map(row_to_job).collect())
    }

    pub async fn list_items(&self, job_id: &str) -> Result<Vec<JobItem>> {
        let rows = sqlx::query(
            "SELECT id, job_id, status, input_ref, result_ref, error_message, started_at, \
             finished_at FROM job_items WHERE job_id = ? ORDER BY rowid ASC",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(row_to_job_item).collect())
    }
}

fn progress_column(status: JobItemStatus) -> &'static str {
    match status {
        JobItemStatus::Pending => "pending",
        JobItemStatus::Processing => "processing",
        JobItemStatus::Completed => "completed",
        JobItemStatus::Failed => "failed",
        JobItemStatus::Cancelled => "skipped",
        JobItemStatus::Skipped => "skipped",
    }
}

fn row_to_job(row: sqlx::sqlite::SqliteRow) -> Job {
    let status: String = row.get("status");
    let job_type: String = row.get("job_type");
    let created_at: i64 = row.get("created_at");
    let started_at: Option<i64> = row.get("started_at");
    let finished_at: Option<i64> = row.get("finished_at");
    let options_json: String = row.get("options_json");

    Job {
        id: row.get("id"),
        job_type: JobType::parse(&job_type).unwrap_or(JobType::EntityExtraction),
        status: JobStatus::parse(&status).unwrap_or(JobStatus::Failed),
        progress: JobProgress {
            total: row.get("total"),
            completed: row.get("completed"),
            failed: row.get("failed"),
            processing: row.get("processing"),
            pending: row.get("pending"),
            skipped: row.get("skipped"),
        },
        options: serde_json::from_str(&options_json).unwrap_or(serde_json::json!({})),
        created_by: row.get("created_by"),
        created_at: chrono::DateTime::from_timestamp(created_at, 0).unwrap_or_default(),
        started_at: started_at.and_then(|t| chrono::DateTime::from_timestamp(t, 0)),
        finished_at: finished_at.and_then(|t| chrono::DateTime::from_timestamp(t, 0)),
    }
}

fn row_to_job_item(row: sqlx::sqlite::SqliteRow) -> JobItem {
    let status: String = row.get("status");
    let started_at: Option<i64> = row.get("started_at");
    let finished_at: Option<i64> = row.get("finished_at");
    JobItem {
        id: row.get("id"),
        job_id: row.get("job_id"),
        status: parse_item_status(&status),
        input_ref: row.get("input_ref"),
        result_ref: row.get("result_ref"),
        error_message: row.get("error_message"),
        started_at: started_at.and_then(|t| chrono::DateTime::from_timestamp(t, 0)),
        finished_at: finished_at.and_then(|t| chrono::DateTime::from_timestamp(t, 0)),
    }
}

fn parse_item_status(s: &str) -> JobItemStatus {
    match s {
        "pending" => JobItemStatus::Pending,
        "processing" => JobItemStatus::Processing,
        "completed" => JobItemStatus::Completed,
        "failed" => JobItemStatus::Failed,
        "cancelled" => JobItemStatus::Cancelled,
        _ => JobItemStatus::Skipped,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_registry() -> JobRegistry {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        crate::migrate::run_migrations_on(&pool).await.unwrap();
        JobRegistry::new(pool)
    }

    #[tokio::test]
    async fn create_job_registers_pending_items() {
        let registry = test_registry().await;
        let job = registry
            .create_job(
                JobType::FolderImport,
                &["a.txt".to_string(), "b.txt".to_string()],
                &serde_json::json!({}),
                None,
            )
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.progress.total, 2);
        assert_eq!(job.progress.pending, 2);

        let items = registry.list_items(&job.id).await.unwrap();
        assert_eq!(items.len(), 2);
        assert!(items.iter().all(|i| i.status == JobItemStatus::Pending));
    }

    #[tokio::test]
    async fn transitions_update_status_and_timestamps() {
        let registry = test_registry().await;
        let job = registry
            .create_job(JobType::EntityExtraction, &["x".to_string()], &serde_json::json!({}), None)
            .await
            .unwrap();
        registry.start_job(&job.id).await.unwrap();
        let running = registry.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(running.status, JobStatus::Running);
        assert!(running.started_at.is_some());

        registry.complete_job(&job.id).await.unwrap();
        let done = registry.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert!(done.finished_at.is_some());
    }

    #[tokio::test]
    async fn update_item_status_moves_progress_counters() {
        let registry = test_registry().await;
        let job = registry
            .create_job(JobType::EntityExtraction, &["x".to_string()], &serde_json::json!({}), None)
            .await
            .unwrap();
        let item = &registry.list_items(&job.id).await.unwrap()[0];

        registry
            .update_item_status(&job.id, &item.id, JobItemStatus::Pending, JobItemStatus::Processing, None, None)
            .await
            .unwrap();
        let mid = registry.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(mid.progress.pending, 0);
        assert_eq!(mid.progress.processing, 1);

        registry
            .update_item_status(
                &job.id,
                &item.id,
                JobItemStatus::Processing,
                JobItemStatus::Completed,
                Some("content-1"),
                None,
            )
            .await
            .unwrap();
        let done = registry.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(done.progress.processing, 0);
        assert_eq!(done.progress.completed, 1);
    }

    #[tokio::test]
    async fn unknown_job_returns_not_found() {
        let registry = test_registry().await;
        let err = registry.start_job("missing").await.unwrap_err();
        assert_eq!(err.kind(), crate::errors::ErrorKind::NotFound);
    }
}
