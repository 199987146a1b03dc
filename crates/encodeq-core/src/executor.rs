//! Executor trait and execution types.
//!
//! An executor runs the external processing step for one job: it reads the
//! job's input artifact and writes its output artifact. The queue only routes
//! paths to it and looks at the outcome.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{Job, JobId, Result};

/// Specification for one execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSpec {
    /// Job being executed.
    pub job_id: JobId,
    /// Input artifact, under the incoming directory.
    pub input: PathBuf,
    /// Output artifact, under the outgoing directory.
    pub output: PathBuf,
    /// Maximum execution time; the process is killed when it runs over.
    pub timeout: Option<Duration>,
}

impl ExecutionSpec {
    /// Derive the input and output paths for a job from its storage name.
    pub fn for_job(
        job: &Job,
        incoming_dir: &Path,
        outgoing_dir: &Path,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            job_id: job.id,
            input: incoming_dir.join(&job.storage_name),
            output: outgoing_dir.join(&job.storage_name),
            timeout,
        }
    }
}

/// How an execution ended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ExecutionOutcome {
    /// The process exited with status zero.
    Succeeded {
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    },
    /// The process exited non-zero or was terminated by a signal.
    Failed {
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        exit_code: Option<i32>,
        message: String,
    },
    /// The process exceeded its timeout and was killed.
    TimedOut {
        started_at: DateTime<Utc>,
        killed_at: DateTime<Utc>,
        timeout: Duration,
    },
}

impl ExecutionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Succeeded { .. })
    }

    /// Reason string recorded on a failed job, `None` on success.
    pub fn failure_reason(&self) -> Option<String> {
        match self {
            ExecutionOutcome::Succeeded { .. } => None,
            ExecutionOutcome::Failed {
                exit_code, message, ..
            } => Some(match exit_code {
                Some(code) => format!("exited with status {}: {}", code, message),
                None => format!("terminated by signal: {}", message),
            }),
            ExecutionOutcome::TimedOut { timeout, .. } => Some(format!(
                "timed out after {}s and was killed",
                timeout.as_secs()
            )),
        }
    }
}

/// Trait for execution backends.
///
/// `run` returns `Err` only when the process could not be started at all.
/// Any process that ran, however it ended, is reported as an
/// [`ExecutionOutcome`].
#[async_trait]
pub trait Executor: Send + Sync {
    /// Name of this executor.
    fn name(&self) -> &'static str;

    /// Run the external step to completion.
    async fn run(&self, spec: &ExecutionSpec) -> Result<ExecutionOutcome>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{JobStatus, Submission};

    #[test]
    fn test_spec_paths_use_storage_name() {
        let new_job = Submission::new("clip.mp4", "w1").validate().unwrap();
        let job = Job::queued(
            JobId::new(3),
            "123456789clip.mp4".to_string(),
            new_job,
            Utc::now(),
        );
        assert_eq!(job.status, JobStatus::Queued);

        let spec = ExecutionSpec::for_job(
            &job,
            Path::new("/data/in"),
            Path::new("/data/out"),
            Some(Duration::from_secs(60)),
        );
        assert_eq!(spec.job_id, JobId::new(3));
        assert_eq!(spec.input, PathBuf::from("/data/in/123456789clip.mp4"));
        assert_eq!(spec.output, PathBuf::from("/data/out/123456789clip.mp4"));
    }

    #[test]
    fn test_failure_reasons() {
        let now = Utc::now();
        let ok = ExecutionOutcome::Succeeded {
            started_at: now,
            finished_at: now,
        };
        assert!(ok.is_success());
        assert!(ok.failure_reason().is_none());

        let failed = ExecutionOutcome::Failed {
            started_at: now,
            finished_at: now,
            exit_code: Some(2),
            message: "no such file".to_string(),
        };
        assert_eq!(
            failed.failure_reason().unwrap(),
            "exited with status 2: no such file"
        );

        let timed_out = ExecutionOutcome::TimedOut {
            started_at: now,
            killed_at: now,
            timeout: Duration::from_secs(30),
        };
        assert!(!timed_out.is_success());
        assert!(timed_out.failure_reason().unwrap().contains("30s"));
    }
}
