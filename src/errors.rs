//! Typed error taxonomy for the ingestion pipeline.
//!
//! The CLI and HTTP surfaces still speak `anyhow::Result` at the outermost layer, matching the
//! teacher's style, but every fallible operation inside the core returns an [`IngestError`] so
//! batch and job code can branch on [`ErrorKind`] (retry transient, surface validation, roll up
//! corruption) instead of pattern-matching error strings.

use std::fmt;

/// Coarse classification of an [`IngestError`], used by callers to decide whether to retry,
/// continue a batch, or abort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input; never retried.
    Validation,
    /// Referenced row does not exist.
    NotFound,
    /// Unique-constraint violation the caller should resolve to the existing row.
    Conflict,
    /// Network, timeout, or "database busy" — safe to retry.
    Transient,
    /// The AI extraction back end failed or returned something unusable.
    Upstream,
    /// Malformed data that indicates a bug or tampering; not retriable.
    Corruption,
    /// Unrecoverable; the process should stop.
    Fatal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Transient => "transient",
            ErrorKind::Upstream => "upstream",
            ErrorKind::Corruption => "corruption",
            ErrorKind::Fatal => "fatal",
        };
        f.write_str(s)
    }
}

/// Extra identifiers attached to an error for observability, not used for control flow.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    pub item_id: Option<String>,
    pub content_id: Option<String>,
    pub job_id: Option<String>,
}

impl ErrorContext {
    pub fn with_content(content_id: impl Into<String>) -> Self {
        Self {
            content_id: Some(content_id.into()),
            ..Default::default()
        }
    }

    pub fn with_item(item_id: impl Into<String>) -> Self {
        Self {
            item_id: Some(item_id.into()),
            ..Default::default()
        }
    }

    pub fn with_job(job_id: impl Into<String>) -> Self {
        Self {
            job_id: Some(job_id.into()),
            ..Default::default()
        }
    }
}

/// The error type returned by every fallible operation in the core (storage, extraction,
/// processing, batching, jobs).
#[derive(Debug, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct IngestError {
    kind: ErrorKind,
    message: String,
    context: ErrorContext,
    #[source]
    cause: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl IngestError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            context: ErrorContext::default(),
            cause: None,
        }
    }

    pub fn with_context(mut self, context: ErrorContext) -> Self {
        self.context = context;
        self
    }

    pub fn with_cause(
        mut self,
        cause: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn context(&self) -> &ErrorContext {
        &self.context
    }

    pub fn is_retriable(&self) -> bool {
        matches!(self.kind, ErrorKind::Transient)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Upstream, message)
    }

    pub fn corruption(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Corruption, message)
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Fatal, message)
    }
}

impl From<sqlx::Error> for IngestError {
    fn from(e: sqlx::Error) -> Self {
        let kind = match &e {
            sqlx::Error::RowNotFound => ErrorKind::NotFound,
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => ErrorKind::Conflict,
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => ErrorKind::Transient,
            _ => ErrorKind::Fatal,
        };
        IngestError::new(kind, e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;
