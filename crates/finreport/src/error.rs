use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FinreportError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Provider error: {0}")]
    Provider(#[from] crate::provider::ProviderError),

    #[error("Worker error: {0}")]
    Worker(#[from] JobError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },

    #[error("Secret not found: environment variable '{0}' is not set")]
    SecretNotFound(String),
}

/// Errors raised by the live document store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Report not found: {0}")]
    ReportNotFound(String),

    #[error("Section not found: {0}")]
    SectionNotFound(String),

    #[error("Thread not found: {0}")]
    ThreadNotFound(String),

    #[error("Report already exists: {0}")]
    Duplicate(String),

    #[error("Ordering invariant violated for report {report_id}: {detail}")]
    OrderingViolation { report_id: String, detail: String },

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Errors from background jobs.
#[derive(Error, Debug)]
pub enum JobError {
    #[error("Work queue is full")]
    QueueFull,

    #[error("Work queue is shut down")]
    ChannelClosed,

    #[error("Job failed: {0}")]
    Failed(String),

    #[error("Job failed with a transient error: {0}")]
    Transient(String),
}

impl JobError {
    /// Whether the job should be attempted again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, JobError::Transient(_))
    }
}

impl From<crate::db::DatabaseError> for JobError {
    fn from(err: crate::db::DatabaseError) -> Self {
        // SQLite busy/locked and poisoned locks clear up on their own; schema errors don't.
        match &err {
            crate::db::DatabaseError::LockPoisoned | crate::db::DatabaseError::Sqlite(_) => {
                JobError::Transient(err.to_string())
            }
            _ => JobError::Failed(err.to_string()),
        }
    }
}

impl From<StoreError> for JobError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(msg) => JobError::Transient(msg),
            other => JobError::Failed(other.to_string()),
        }
    }
}

/// Request/response error surface for report and section operations.
///
/// Every variant except `Internal` is raised before any side effect.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// HTTP-equivalent status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::Validation(_) => 400,
            ApiError::Forbidden(_) => 403,
            ApiError::NotFound(_) => 404,
            ApiError::Internal(_) => 500,
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ReportNotFound(id) => ApiError::NotFound(format!("report {}", id)),
            StoreError::SectionNotFound(id) => ApiError::NotFound(format!("section {}", id)),
            StoreError::ThreadNotFound(id) => ApiError::NotFound(format!("thread {}", id)),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<crate::db::DatabaseError> for ApiError {
    fn from(err: crate::db::DatabaseError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, FinreportError>;
