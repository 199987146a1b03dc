//! Worker that processes jobs from the queue.

use crate::dispatcher::DispatchSettings;
use encodeq_core::executor::{ExecutionSpec, Executor};
use encodeq_core::Job;
use encodeq_store::{JobStore, StoreError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, watch};
use tokio::time::sleep;
use tracing::{error, info, warn};

/// Back-off after the store reported an error on dequeue.
const ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// A worker that claims and executes jobs, one at a time.
pub struct Worker {
    id: String,
    store: Arc<dyn JobStore>,
    executor: Arc<dyn Executor>,
    settings: Arc<DispatchSettings>,
    wake: Arc<Notify>,
    shutdown: watch::Receiver<bool>,
}

impl Worker {
    pub fn new(
        id: impl Into<String>,
        store: Arc<dyn JobStore>,
        executor: Arc<dyn Executor>,
        settings: Arc<DispatchSettings>,
        wake: Arc<Notify>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            id: id.into(),
            store,
            executor,
            settings,
            wake,
            shutdown,
        }
    }

    /// Run the worker loop until shutdown is signalled or the store closes.
    pub async fn run(mut self) {
        info!(worker_id = %self.id, executor = self.executor.name(), "Starting worker");

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            match self.store.dequeue().await {
                Ok(Some(job)) => {
                    info!(worker_id = %self.id, job_id = %job.id, storage_name = %job.storage_name, "Claimed job");
                    self.process(job).await;
                }
                Ok(None) => {
                    // No jobs available, wait for a wake-up or the next poll
                    if !self.idle(self.settings.poll_interval).await {
                        break;
                    }
                }
                Err(StoreError::Closed) => {
                    info!(worker_id = %self.id, "Store closed");
                    break;
                }
                Err(e) => {
                    warn!(worker_id = %self.id, error = %e, "Failed to claim job");
                    if !self.idle(ERROR_BACKOFF).await {
                        break;
                    }
                }
            }
        }

        info!(worker_id = %self.id, "Worker stopped");
    }

    /// Wait for a wake-up, the end of `period` or shutdown. Returns `false`
    /// when the worker should stop.
    async fn idle(&mut self, period: Duration) -> bool {
        let changed = tokio::select! {
            _ = self.wake.notified() => return true,
            _ = sleep(period) => return true,
            changed = self.shutdown.changed() => changed,
        };
        changed.is_ok() && !*self.shutdown.borrow()
    }

    /// Execute one claimed job and record its terminal state.
    ///
    /// Nothing that goes wrong inside the execution escapes this call: errors,
    /// panics and overruns all end as a `Fail` on the job.
    pub async fn process(&self, job: Job) {
        let id = job.id;

        let verdict = match self.stage_input(&job).await {
            Ok(()) => self.execute(&job).await,
            Err(e) => Err(format!("failed to stage input: {}", e)),
        };

        let result = match verdict {
            Ok(()) => self.store.complete(id).await,
            Err(reason) => self.store.fail(id, &reason).await,
        };

        match result {
            Ok(job) => {
                info!(worker_id = %self.id, job_id = %id, status = %job.status, "Finished job")
            }
            Err(e @ StoreError::UnknownJob(_)) => {
                error!(worker_id = %self.id, job_id = %id, error = %e, "Job was finalized elsewhere")
            }
            Err(e) => {
                error!(worker_id = %self.id, job_id = %id, error = %e, "Failed to record job outcome")
            }
        }
    }

    /// Move an upload still under its client name to the job's storage name.
    async fn stage_input(&self, job: &Job) -> std::io::Result<()> {
        let staged = self.settings.incoming_dir.join(&job.storage_name);
        if tokio::fs::try_exists(&staged).await? {
            return Ok(());
        }

        let original = self.settings.incoming_dir.join(&job.original_name);
        if tokio::fs::try_exists(&original).await? {
            tokio::fs::rename(&original, &staged).await?;
            info!(job_id = %job.id, from = %original.display(), to = %staged.display(), "Staged input");
        }
        Ok(())
    }

    async fn execute(&self, job: &Job) -> Result<(), String> {
        let spec = ExecutionSpec::for_job(
            job,
            &self.settings.incoming_dir,
            &self.settings.outgoing_dir,
            self.settings.job_timeout,
        );

        let executor = self.executor.clone();
        let mut handle = tokio::spawn(async move { executor.run(&spec).await });

        let joined = match self.settings.job_timeout {
            Some(limit) => {
                let deadline = limit + self.settings.watchdog_grace;
                match tokio::time::timeout(deadline, &mut handle).await {
                    Ok(joined) => joined,
                    Err(_) => {
                        // Dropping the executor future kills its process.
                        handle.abort();
                        warn!(job_id = %job.id, "Executor overran its timeout, aborted");
                        return Err(format!(
                            "timed out after {}s and was aborted",
                            limit.as_secs()
                        ));
                    }
                }
            }
            None => handle.await,
        };

        match joined {
            Ok(Ok(outcome)) => match outcome.failure_reason() {
                None => Ok(()),
                Some(reason) => Err(reason),
            },
            Ok(Err(e)) => Err(e.to_string()),
            Err(e) if e.is_panic() => {
                error!(job_id = %job.id, "Executor panicked");
                Err("executor panicked".to_string())
            }
            Err(_) => Err("execution was cancelled".to_string()),
        }
    }
}
