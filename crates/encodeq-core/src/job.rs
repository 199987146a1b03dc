//! Job records and their lifecycle.

use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::naming::TOKEN_WIDTH;
use crate::{Error, JobId, Result};

/// Longest file name most filesystems accept, in bytes.
const NAME_MAX: usize = 255;
/// Longest accepted client file name, in bytes. The storage name prefixes it
/// with a token and must still fit in `NAME_MAX`.
pub const MAX_FILENAME_LEN: usize = NAME_MAX - TOKEN_WIDTH;
/// Longest accepted submitter identity, in bytes.
pub const MAX_SUBMITTER_LEN: usize = 256;

/// Lifecycle state of a job.
///
/// Jobs only move forward: `Queued -> Running -> Completed | Failed`. The one
/// backward edge, `Running -> Queued`, is taken by crash recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[display("queued")]
    Queued,
    #[display("running")]
    Running,
    #[display("completed")]
    Completed,
    #[display("failed")]
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Queued or running jobs own their storage name.
    pub fn is_live(&self) -> bool {
        !self.is_terminal()
    }
}

/// A unit of submitted work tracked by the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Sequence id assigned at enqueue.
    pub id: JobId,
    /// Client-supplied file name. Untrusted beyond [`Submission::validate`].
    pub original_name: String,
    /// Server-assigned name for the job's input and output artifacts.
    pub storage_name: String,
    /// Opaque submitter identity, passed through untouched.
    pub submitter: String,
    pub created_at: DateTime<Utc>,
    pub status: JobStatus,
    /// Opaque side-channel data; never interpreted by the queue.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    /// Number of times the job has been claimed by a worker.
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Failure reason for jobs in [`JobStatus::Failed`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Job {
    /// Build a queued job from a validated submission.
    pub fn queued(id: JobId, storage_name: String, new_job: NewJob, now: DateTime<Utc>) -> Self {
        Self {
            id,
            original_name: new_job.original_name,
            storage_name,
            submitter: new_job.submitter,
            created_at: now,
            status: JobStatus::Queued,
            metadata: new_job.metadata,
            attempts: 0,
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    /// `Queued -> Running`.
    pub fn start(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.expect_status(JobStatus::Queued, JobStatus::Running)?;
        self.status = JobStatus::Running;
        self.attempts += 1;
        self.started_at = Some(now);
        Ok(())
    }

    /// `Running -> Completed`.
    pub fn complete(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.expect_status(JobStatus::Running, JobStatus::Completed)?;
        self.status = JobStatus::Completed;
        self.finished_at = Some(now);
        Ok(())
    }

    /// `Running -> Failed`.
    pub fn fail(&mut self, reason: impl Into<String>, now: DateTime<Utc>) -> Result<()> {
        self.expect_status(JobStatus::Running, JobStatus::Failed)?;
        self.status = JobStatus::Failed;
        self.finished_at = Some(now);
        self.error = Some(reason.into());
        Ok(())
    }

    /// `Running -> Queued`, for jobs whose worker went away mid-execution.
    pub fn requeue(&mut self) -> Result<()> {
        self.expect_status(JobStatus::Running, JobStatus::Queued)?;
        self.status = JobStatus::Queued;
        self.started_at = None;
        Ok(())
    }

    fn expect_status(&self, from: JobStatus, to: JobStatus) -> Result<()> {
        if self.status == from {
            Ok(())
        } else {
            Err(Error::Conflict(format!(
                "job {} cannot move from {} to {}",
                self.id, self.status, to
            )))
        }
    }
}

/// A validated job that has not been handed to the store yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewJob {
    pub original_name: String,
    pub submitter: String,
    pub metadata: Option<serde_json::Value>,
}

/// Raw submission as received from a client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Submission {
    pub filename: String,
    pub submitter_id: String,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

impl Submission {
    pub fn new(filename: impl Into<String>, submitter_id: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            submitter_id: submitter_id.into(),
            metadata: None,
        }
    }

    /// Check the required fields and turn the submission into a [`NewJob`].
    ///
    /// The file name ends up inside a filesystem path, so anything that could
    /// escape the incoming directory is rejected.
    pub fn validate(self) -> Result<NewJob> {
        validate_filename(&self.filename)?;

        if self.submitter_id.trim().is_empty() {
            return Err(Error::InvalidInput("submitter id is required".to_string()));
        }
        if self.submitter_id.len() > MAX_SUBMITTER_LEN {
            return Err(Error::InvalidInput(format!(
                "submitter id exceeds {} bytes",
                MAX_SUBMITTER_LEN
            )));
        }

        Ok(NewJob {
            original_name: self.filename,
            submitter: self.submitter_id,
            metadata: self.metadata,
        })
    }
}

fn validate_filename(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidInput("filename is required".to_string()));
    }
    if name.len() > MAX_FILENAME_LEN {
        return Err(Error::InvalidInput(format!(
            "filename exceeds {} bytes",
            MAX_FILENAME_LEN
        )));
    }
    if name == "." || name == ".." {
        return Err(Error::InvalidInput(format!("invalid filename: {name}")));
    }
    if name.contains(['/', '\\', '\0']) {
        return Err(Error::InvalidInput(format!(
            "filename must not contain path separators: {name:?}"
        )));
    }
    Ok(())
}
