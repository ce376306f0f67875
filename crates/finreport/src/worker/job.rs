use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::JobError;

/// Work deferred out of the request that caused it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum BackgroundJob {
    /// Mirror a live report into the durable store, then extract entities.
    #[serde(rename_all = "camelCase")]
    SyncReport { report_id: String },
    /// Recompute derived statistics for one entity.
    #[serde(rename_all = "camelCase")]
    RefreshEntity { entity_id: String },
}

impl BackgroundJob {
    pub fn name(&self) -> &'static str {
        match self {
            BackgroundJob::SyncReport { .. } => "sync_report",
            BackgroundJob::RefreshEntity { .. } => "refresh_entity",
        }
    }

    /// Id of the report or entity the job is about.
    pub fn subject(&self) -> &str {
        match self {
            BackgroundJob::SyncReport { report_id } => report_id,
            BackgroundJob::RefreshEntity { entity_id } => entity_id,
        }
    }
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &BackgroundJob) -> Result<(), JobError>;
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    Queued,
    Started,
    Retrying,
    Succeeded,
    Failed,
}

impl std::fmt::Display for JobPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobPhase::Queued => write!(f, "Queued"),
            JobPhase::Started => write!(f, "Started"),
            JobPhase::Retrying => write!(f, "Retrying"),
            JobPhase::Succeeded => write!(f, "Succeeded"),
            JobPhase::Failed => write!(f, "Failed"),
        }
    }
}

/// Lifecycle notification for a background job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEvent {
    pub job_id: String,
    pub job: BackgroundJob,
    pub phase: JobPhase,
    /// 1-based attempt number; 0 while queued.
    pub attempt: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl JobEvent {
    pub fn new(job_id: &str, job: &BackgroundJob, phase: JobPhase, attempt: u32) -> Self {
        Self {
            job_id: job_id.to_string(),
            job: job.clone(),
            phase,
            attempt,
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_serialization_is_tagged() {
        let job = BackgroundJob::SyncReport {
            report_id: "r1".to_string(),
        };
        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["kind"], "syncReport");
        assert_eq!(json["reportId"], "r1");
    }

    #[test]
    fn test_event_error_is_optional() {
        let job = BackgroundJob::RefreshEntity {
            entity_id: "e1".to_string(),
        };
        let event = JobEvent::new("j1", &job, JobPhase::Queued, 0);
        let json = serde_json::to_value(&event).unwrap();
        assert!(json.get("error").is_none());

        let failed = JobEvent::new("j1", &job, JobPhase::Failed, 3).with_error("boom");
        assert_eq!(failed.error.as_deref(), Some("boom"));
        assert_eq!(job.subject(), "e1");
    }
}
