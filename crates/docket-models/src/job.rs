//! Job definitions for background processing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::{DocumentId, JobId, LeaseId, ProjectId};

/// Attempts allowed when a job is created without an explicit limit.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Type of job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// Pull text and chunks out of an uploaded file
    Extract,
    /// Run AI analysis over extracted text
    Analyze,
    /// Transcribe an audio or video upload
    Transcribe,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Extract => "extract",
            JobType::Analyze => "analyze",
            JobType::Transcribe => "transcribe",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("Unknown variant: {0}")]
pub struct UnknownVariant(pub String);

impl FromStr for JobType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "extract" => Ok(JobType::Extract),
            "analyze" => Ok(JobType::Analyze),
            "transcribe" => Ok(JobType::Transcribe),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

/// Job state in the store.
///
/// Allowed transitions:
/// - `pending -> processing` (claim)
/// - `processing -> complete` (success)
/// - `processing -> failed` (attempts exhausted or permanent failure)
/// - `processing -> pending` (failure with attempts remaining)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Pending,
    Processing,
    Complete,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Complete => "complete",
            JobStatus::Failed => "failed",
        }
    }

    /// Check if this is a terminal state (no more updates expected).
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Complete | JobStatus::Failed)
    }

    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Complete)
                | (JobStatus::Processing, JobStatus::Failed)
                | (JobStatus::Processing, JobStatus::Pending)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "complete" => Ok(JobStatus::Complete),
            "failed" => Ok(JobStatus::Failed),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

/// A job row as stored in the shared job store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub project_id: ProjectId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_id: Option<DocumentId>,
    pub job_type: JobType,
    /// Higher runs first
    pub priority: i32,
    pub status: JobStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Case-perspective options for analysis jobs
    #[serde(default)]
    pub options: serde_json::Value,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Current claim; set while processing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_id: Option<LeaseId>,
}

impl Job {
    /// Status a failure of the current attempt leads to.
    pub fn failure_outcome(&self) -> JobStatus {
        if self.attempts + 1 < self.max_attempts {
            JobStatus::Pending
        } else {
            JobStatus::Failed
        }
    }

    /// Whether this job has attempts left after the current one fails.
    pub fn has_attempts_remaining(&self) -> bool {
        self.failure_outcome() == JobStatus::Pending
    }
}

/// A job about to be inserted by an ingestion trigger.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub project_id: ProjectId,
    pub document_id: Option<DocumentId>,
    pub job_type: JobType,
    pub priority: i32,
    pub max_attempts: u32,
    pub options: serde_json::Value,
}

impl NewJob {
    pub fn new(project_id: ProjectId, job_type: JobType) -> Self {
        Self {
            project_id,
            document_id: None,
            job_type,
            priority: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            options: serde_json::Value::Null,
        }
    }

    /// Link the job to a document.
    pub fn for_document(mut self, document_id: DocumentId) -> Self {
        self.document_id = Some(document_id);
        self
    }

    /// Set priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Set the attempt limit (at least one attempt is always made).
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Set analysis options.
    pub fn with_options(mut self, options: serde_json::Value) -> Self {
        self.options = options;
        self
    }

    /// Materialize into a pending job row.
    pub fn into_job(self, created_at: DateTime<Utc>) -> Job {
        Job {
            id: JobId::new(),
            project_id: self.project_id,
            document_id: self.document_id,
            job_type: self.job_type,
            priority: self.priority,
            status: JobStatus::Pending,
            attempts: 0,
            max_attempts: self.max_attempts,
            error_message: None,
            options: self.options,
            created_at,
            started_at: None,
            completed_at: None,
            lease_id: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions() {
        use JobStatus::*;

        assert!(Pending.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Complete));
        assert!(Processing.can_transition_to(Failed));
        assert!(Processing.can_transition_to(Pending));

        assert!(!Processing.can_transition_to(Processing));
        assert!(!Pending.can_transition_to(Complete));
        assert!(!Complete.can_transition_to(Pending));
        assert!(!Failed.can_transition_to(Processing));
    }

    #[test]
    fn test_failure_outcome_respects_max_attempts() {
        let mut job = NewJob::new(ProjectId::new(), JobType::Analyze)
            .with_max_attempts(3)
            .into_job(Utc::now());

        assert_eq!(job.failure_outcome(), JobStatus::Pending);
        job.attempts = 1;
        assert_eq!(job.failure_outcome(), JobStatus::Pending);
        job.attempts = 2;
        assert_eq!(job.failure_outcome(), JobStatus::Failed);
    }

    #[test]
    fn test_job_type_parsing() {
        assert_eq!("transcribe".parse::<JobType>().unwrap(), JobType::Transcribe);
        assert!("render".parse::<JobType>().is_err());
        assert_eq!(
            serde_json::to_string(&JobType::Extract).unwrap(),
            "\"extract\""
        );
    }

    #[test]
    fn test_max_attempts_floor() {
        let job = NewJob::new(ProjectId::new(), JobType::Extract).with_max_attempts(0);
        assert_eq!(job.max_attempts, 1);
    }
}
