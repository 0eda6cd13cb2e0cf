//! Conversion job records and their state machine.
//!
//! ```text
//! Queued ──▶ Running ──▶ Succeeded
//!               │
//!               └──────▶ Failed
//! ```
//!
//! Terminal states are final. A job is failed directly from `Queued` only
//! when it is cancelled before a worker picks it up.

use crate::error::{ErrorKind, ServiceError};
use crate::path::ResourcePath;
use crate::pipeline::Stage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub type JobId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }

    fn can_become(self, next: JobState) -> bool {
        matches!(
            (self, next),
            (JobState::Queued, JobState::Running)
                | (JobState::Queued, JobState::Failed)
                | (JobState::Running, JobState::Succeeded)
                | (JobState::Running, JobState::Failed)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Why a job failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobFailure {
    pub kind: ErrorKind,
    pub stage: Option<Stage>,
    pub message: String,
}

impl From<&ServiceError> for JobFailure {
    fn from(err: &ServiceError) -> Self {
        Self {
            kind: err.kind(),
            stage: err.stage(),
            message: err.to_string(),
        }
    }
}

/// One admitted conversion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionJob {
    pub id: JobId,
    pub input: ResourcePath,
    pub output: ResourcePath,
    pub state: JobState,
    /// Markdown of a succeeded job. Not part of the `/jobs` listing.
    #[serde(skip)]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobFailure>,
    pub submitted_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl ConversionJob {
    pub fn new(input: ResourcePath, output: ResourcePath) -> Self {
        Self {
            id: Uuid::new_v4(),
            input,
            output,
            state: JobState::Queued,
            result: None,
            error: None,
            submitted_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    fn transition(&mut self, next: JobState) -> Result<(), ServiceError> {
        if !self.state.can_become(next) {
            return Err(ServiceError::Internal(format!(
                "job {}: invalid transition {} → {}",
                self.id, self.state, next
            )));
        }
        self.state = next;
        Ok(())
    }

    pub fn start(&mut self) -> Result<(), ServiceError> {
        self.transition(JobState::Running)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    pub fn succeed(&mut self, markdown: String) -> Result<(), ServiceError> {
        self.transition(JobState::Succeeded)?;
        self.result = Some(markdown);
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    pub fn fail(&mut self, err: &ServiceError) -> Result<(), ServiceError> {
        self.transition(JobState::Failed)?;
        self.error = Some(JobFailure::from(err));
        self.completed_at = Some(Utc::now());
        Ok(())
    }
}
