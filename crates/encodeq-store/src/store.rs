//! Job store trait and implementations.

pub mod file;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use encodeq_core::{Job, JobId, NewJob};
use serde::Serialize;

use crate::StoreResult;

pub use file::FileJobStore;

/// What [`JobStore::recover`] found on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    /// Jobs waiting to run, including the requeued ones.
    pub queued: usize,
    /// Jobs that were running when the previous process stopped.
    pub requeued: Vec<JobId>,
    pub completed: usize,
    pub failed: usize,
    /// Id the next enqueued job will receive.
    pub next_id: JobId,
}

/// The single source of truth for job existence, order and status.
///
/// Every mutation is serialized inside the store; callers can share one
/// instance between request handlers and worker loops.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Reload every job from durable storage.
    ///
    /// Must run once before any other operation. Jobs found `Running` are put
    /// back to `Queued`.
    async fn recover(&self) -> StoreResult<RecoveryReport>;

    /// Durably record a new job as `Queued`.
    ///
    /// Assigns the id, the storage name and the creation time; the returned
    /// record is what was persisted.
    async fn enqueue(&self, job: NewJob) -> StoreResult<Job>;

    /// Claim the oldest queued job, moving it to `Running`.
    ///
    /// Returns `None` when nothing is queued.
    async fn dequeue(&self) -> StoreResult<Option<Job>>;

    /// `Running -> Completed`. Fails with `UnknownJob` for any other state.
    async fn complete(&self, id: JobId) -> StoreResult<Job>;

    /// `Running -> Failed`. Fails with `UnknownJob` for any other state.
    async fn fail(&self, id: JobId, reason: &str) -> StoreResult<Job>;

    async fn get(&self, id: JobId) -> StoreResult<Job>;

    /// All known jobs in submission order.
    async fn list(&self) -> StoreResult<Vec<Job>>;

    /// Delete finished jobs whose `finished_at` is before `cutoff`.
    async fn purge_finished(&self, cutoff: DateTime<Utc>) -> StoreResult<usize>;

    /// Flush and release the backing medium. Later calls fail with `Closed`.
    async fn close(&self) -> StoreResult<()>;

    fn is_closed(&self) -> bool;
}
