//! Filesystem implementation of [`JobStore`].
//!
//! Each job lives in `<queue-dir>/jobs/<id>.json`. Every transition rewrites
//! the record with an atomic replace and is durable before the call returns.
//! The in-memory index is only updated after the write succeeded, so a failed
//! write leaves the store exactly as it was.
//!
//! `<queue-dir>/sequence` records the next id once finished records have been
//! purged, so ids are never handed out twice.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use encodeq_core::{Job, JobId, JobStatus, NameGenerator, NewJob};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::fs::{TMP_SUFFIX, create_atomic, sync_dir, write_atomic};
use crate::store::{JobStore, RecoveryReport};
use crate::{StoreError, StoreResult};

const JOBS_DIR: &str = "jobs";
const RECORD_SUFFIX: &str = ".json";
const SEQUENCE_FILE: &str = "sequence";

/// How many storage names are tried before giving up on an enqueue.
pub const MAX_NAME_ATTEMPTS: usize = 16;

/// Contents of the sequence file.
#[derive(Debug, Serialize, Deserialize)]
struct SequenceMark {
    next_id: JobId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Opened,
    Ready,
    Closed,
}

#[derive(Debug)]
struct State {
    phase: Phase,
    next_id: JobId,
    jobs: BTreeMap<JobId, Job>,
    queued: BTreeSet<JobId>,
    /// Storage names owned by queued or running jobs.
    live_names: HashSet<String>,
}

impl State {
    fn empty() -> Self {
        Self {
            phase: Phase::Opened,
            next_id: JobId::FIRST,
            jobs: BTreeMap::new(),
            queued: BTreeSet::new(),
            live_names: HashSet::new(),
        }
    }

    fn ensure_ready(&self) -> StoreResult<()> {
        match self.phase {
            Phase::Ready => Ok(()),
            Phase::Opened => Err(StoreError::NotRecovered),
            Phase::Closed => Err(StoreError::Closed),
        }
    }
}

/// Durable job queue backed by a directory of JSON records.
pub struct FileJobStore {
    queue_dir: PathBuf,
    jobs_dir: PathBuf,
    names: Arc<NameGenerator>,
    state: Mutex<State>,
    closed: AtomicBool,
}

impl FileJobStore {
    /// Open a store rooted at `queue_dir`. Nothing is read until [`JobStore::recover`].
    pub fn new(queue_dir: impl AsRef<Path>, names: Arc<NameGenerator>) -> Self {
        Self {
            queue_dir: queue_dir.as_ref().to_path_buf(),
            jobs_dir: queue_dir.as_ref().join(JOBS_DIR),
            names,
            state: Mutex::new(State::empty()),
            closed: AtomicBool::new(false),
        }
    }

    /// Directory holding the job records.
    pub fn jobs_dir(&self) -> &Path {
        &self.jobs_dir
    }

    fn record_name(id: JobId) -> String {
        format!("{:020}{}", id.get(), RECORD_SUFFIX)
    }

    async fn persist(&self, job: &Job) -> StoreResult<()> {
        let bytes = serde_json::to_vec_pretty(job)
            .map_err(|e| StoreError::unavailable(format!("encode job {}", job.id), e))?;
        write_atomic(&self.jobs_dir, &Self::record_name(job.id), &bytes)
            .await
            .map_err(|e| StoreError::unavailable(format!("write job {}", job.id), e))
    }

    /// Write the record of a job that has no record yet. On failure no
    /// record is left behind.
    async fn persist_new(&self, job: &Job) -> StoreResult<()> {
        let bytes = serde_json::to_vec_pretty(job)
            .map_err(|e| StoreError::unavailable(format!("encode job {}", job.id), e))?;
        create_atomic(&self.jobs_dir, &Self::record_name(job.id), &bytes)
            .await
            .map_err(|e| StoreError::unavailable(format!("write job {}", job.id), e))
    }

    async fn store_sequence(&self, next_id: JobId) -> StoreResult<()> {
        let bytes = serde_json::to_vec(&SequenceMark { next_id })
            .map_err(|e| StoreError::unavailable("encode sequence", e))?;
        write_atomic(&self.queue_dir, SEQUENCE_FILE, &bytes)
            .await
            .map_err(|e| StoreError::unavailable("write sequence", e))
    }

    async fn load_sequence(&self) -> StoreResult<Option<JobId>> {
        let path = self.queue_dir.join(SEQUENCE_FILE);
        let tmp_path = self.queue_dir.join(format!("{SEQUENCE_FILE}{TMP_SUFFIX}"));
        match tokio::fs::remove_file(&tmp_path).await {
            Ok(()) => debug!(path = %tmp_path.display(), "Removed leftover temporary sequence"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(StoreError::unavailable(format!("remove {}", tmp_path.display()), e)),
        }

        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::unavailable(format!("read {}", path.display()), e)),
        };
        let mark: SequenceMark = serde_json::from_slice(&bytes).map_err(|e| StoreError::Corrupt {
            path: path.clone(),
            message: e.to_string(),
        })?;
        Ok(Some(mark.next_id))
    }

    async fn load_record(path: &Path) -> StoreResult<Job> {
        let corrupt = |message: String| StoreError::Corrupt {
            path: path.to_path_buf(),
            message,
        };

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| StoreError::unavailable(format!("read {}", path.display()), e))?;
        let job: Job = serde_json::from_slice(&bytes).map_err(|e| corrupt(e.to_string()))?;

        let expected = Self::record_name(job.id);
        if path.file_name().and_then(|n| n.to_str()) != Some(expected.as_str()) {
            return Err(corrupt(format!("record holds job {}", job.id)));
        }
        Ok(job)
    }

    async fn finish<F>(&self, id: JobId, transition: F) -> StoreResult<Job>
    where
        F: FnOnce(&mut Job) -> encodeq_core::Result<()> + Send,
    {
        let mut state = self.state.lock().await;
        state.ensure_ready()?;

        let current = match state.jobs.get(&id) {
            Some(job) if job.status == JobStatus::Running => job,
            _ => {
                warn!(job_id = %id, "Finalize called for a job that is not running");
                return Err(StoreError::UnknownJob(id));
            }
        };

        let mut updated = current.clone();
        transition(&mut updated).map_err(|_| StoreError::UnknownJob(id))?;
        self.persist(&updated).await?;

        state.live_names.remove(&updated.storage_name);
        state.jobs.insert(id, updated.clone());
        Ok(updated)
    }
}

#[async_trait]
impl JobStore for FileJobStore {
    async fn recover(&self) -> StoreResult<RecoveryReport> {
        let mut state = self.state.lock().await;
        if state.phase == Phase::Closed {
            return Err(StoreError::Closed);
        }

        tokio::fs::create_dir_all(&self.jobs_dir)
            .await
            .map_err(|e| StoreError::unavailable(format!("create {}", self.jobs_dir.display()), e))?;

        let mut entries = tokio::fs::read_dir(&self.jobs_dir)
            .await
            .map_err(|e| StoreError::unavailable(format!("list {}", self.jobs_dir.display()), e))?;

        let mut loaded = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::unavailable(format!("list {}", self.jobs_dir.display()), e))?
        {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name.ends_with(TMP_SUFFIX) {
                // An interrupted write; the previous record (if any) is still intact.
                debug!(path = %path.display(), "Removing leftover temporary record");
                tokio::fs::remove_file(&path)
                    .await
                    .map_err(|e| StoreError::unavailable(format!("remove {}", path.display()), e))?;
            } else if name.ends_with(RECORD_SUFFIX) {
                loaded.push(Self::load_record(&path).await?);
            }
        }

        let mark = self.load_sequence().await?;

        let mut fresh = State::empty();
        let mut requeued = Vec::new();
        let (mut completed, mut failed) = (0, 0);

        loaded.sort_by_key(|job| job.id);
        for mut job in loaded {
            if job.status == JobStatus::Running {
                job.requeue().map_err(|e| StoreError::Unavailable(e.to_string()))?;
                self.persist(&job).await?;
                warn!(job_id = %job.id, attempts = job.attempts, "Requeued job interrupted by a restart");
                requeued.push(job.id);
            }

            match job.status {
                JobStatus::Queued | JobStatus::Running => {
                    fresh.queued.insert(job.id);
                }
                JobStatus::Completed => completed += 1,
                JobStatus::Failed => failed += 1,
            }

            if job.status.is_live() && !fresh.live_names.insert(job.storage_name.clone()) {
                return Err(StoreError::Corrupt {
                    path: self.jobs_dir.join(Self::record_name(job.id)),
                    message: format!("storage name {} is used by another live job", job.storage_name),
                });
            }

            fresh.next_id = fresh.next_id.max(job.id.next());
            fresh.jobs.insert(job.id, job);
        }

        if let Some(mark) = mark {
            fresh.next_id = fresh.next_id.max(mark);
        }
        fresh.phase = Phase::Ready;
        let report = RecoveryReport {
            queued: fresh.queued.len(),
            requeued,
            completed,
            failed,
            next_id: fresh.next_id,
        };
        *state = fresh;

        info!(
            queued = report.queued,
            requeued = report.requeued.len(),
            completed = report.completed,
            failed = report.failed,
            next_id = %report.next_id,
            "Recovered job store"
        );
        Ok(report)
    }

    async fn enqueue(&self, new_job: NewJob) -> StoreResult<Job> {
        let mut state = self.state.lock().await;
        state.ensure_ready()?;

        let mut storage_name = None;
        for attempt in 1..=MAX_NAME_ATTEMPTS {
            let candidate = self.names.storage_name(&new_job.original_name);
            if !state.live_names.contains(&candidate) {
                storage_name = Some(candidate);
                break;
            }
            debug!(candidate = %candidate, attempt, "Storage name already in use, retrying");
        }
        let storage_name = storage_name.ok_or_else(|| {
            StoreError::Unavailable(format!(
                "no free storage name for {} after {} attempts",
                new_job.original_name, MAX_NAME_ATTEMPTS
            ))
        })?;

        let id = state.next_id;
        let job = Job::queued(id, storage_name, new_job, Utc::now());
        self.persist_new(&job).await?;

        state.next_id = id.next();
        state.queued.insert(id);
        state.live_names.insert(job.storage_name.clone());
        state.jobs.insert(id, job.clone());

        info!(job_id = %id, storage_name = %job.storage_name, submitter = %job.submitter, "Enqueued job");
        Ok(job)
    }

    async fn dequeue(&self) -> StoreResult<Option<Job>> {
        let mut state = self.state.lock().await;
        state.ensure_ready()?;

        let Some(id) = state.queued.first().copied() else {
            return Ok(None);
        };
        let Some(current) = state.jobs.get(&id) else {
            return Err(StoreError::Unavailable(format!(
                "queued job {} has no record",
                id
            )));
        };

        let mut claimed = current.clone();
        claimed
            .start(Utc::now())
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        self.persist(&claimed).await?;

        state.queued.remove(&id);
        state.jobs.insert(id, claimed.clone());

        debug!(job_id = %id, attempts = claimed.attempts, "Dequeued job");
        Ok(Some(claimed))
    }

    async fn complete(&self, id: JobId) -> StoreResult<Job> {
        let job = self.finish(id, |job| job.complete(Utc::now())).await?;
        info!(job_id = %id, "Job completed");
        Ok(job)
    }

    async fn fail(&self, id: JobId, reason: &str) -> StoreResult<Job> {
        let reason = reason.to_string();
        let job = self
            .finish(id, move |job| job.fail(reason, Utc::now()))
            .await?;
        warn!(job_id = %id, reason = job.error.as_deref().unwrap_or_default(), "Job failed");
        Ok(job)
    }

    async fn get(&self, id: JobId) -> StoreResult<Job> {
        let state = self.state.lock().await;
        state.ensure_ready()?;
        state.jobs.get(&id).cloned().ok_or(StoreError::NotFound(id))
    }

    async fn list(&self) -> StoreResult<Vec<Job>> {
        let state = self.state.lock().await;
        state.ensure_ready()?;
        Ok(state.jobs.values().cloned().collect())
    }

    async fn purge_finished(&self, cutoff: DateTime<Utc>) -> StoreResult<usize> {
        let mut state = self.state.lock().await;
        state.ensure_ready()?;

        let expired: Vec<JobId> = state
            .jobs
            .values()
            .filter(|job| job.status.is_terminal())
            .filter(|job| job.finished_at.is_some_and(|at| at < cutoff))
            .map(|job| job.id)
            .collect();

        if !expired.is_empty() {
            // Ids of the purged records must stay taken after a restart.
            self.store_sequence(state.next_id).await?;
        }

        for id in &expired {
            let path = self.jobs_dir.join(Self::record_name(*id));
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(StoreError::unavailable(format!("remove {}", path.display()), e)),
            }
            state.jobs.remove(id);
        }

        if !expired.is_empty() {
            sync_dir(&self.jobs_dir)
                .await
                .map_err(|e| StoreError::unavailable("sync job directory", e))?;
            info!(purged = expired.len(), "Purged finished jobs");
        }
        Ok(expired.len())
    }

    async fn close(&self) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        if state.phase == Phase::Closed {
            return Err(StoreError::Closed);
        }

        let flushed = if state.phase == Phase::Ready {
            sync_dir(&self.jobs_dir)
                .await
                .map_err(|e| StoreError::unavailable("sync job directory", e))
        } else {
            Ok(())
        };

        state.phase = Phase::Closed;
        state.jobs.clear();
        state.queued.clear();
        state.live_names.clear();
        self.closed.store(true, Ordering::SeqCst);

        info!("Job store closed");
        flushed
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
