//! Dispatcher - runs the worker pool and the retention sweep.

use crate::worker::Worker;
use chrono::Utc;
use encodeq_config::ServiceConfig;
use encodeq_core::executor::Executor;
use encodeq_store::{JobStore, StoreError};
use futures::future::join_all;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

const DEFAULT_WATCHDOG_GRACE: Duration = Duration::from_secs(5);

/// Runtime settings for the dispatcher and its workers.
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    /// Number of concurrent worker loops.
    pub workers: usize,
    /// Longest an idle worker waits before polling again.
    pub poll_interval: Duration,
    pub incoming_dir: PathBuf,
    pub outgoing_dir: PathBuf,
    /// Per-job limit handed to the executor.
    pub job_timeout: Option<Duration>,
    /// Extra time given to the executor past `job_timeout` before the worker
    /// gives up on it.
    pub watchdog_grace: Duration,
    /// `(max_age, sweep_interval)` for purging finished jobs.
    pub retention: Option<(Duration, Duration)>,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            workers: 1,
            poll_interval: Duration::from_secs(1),
            incoming_dir: PathBuf::from("videos/in"),
            outgoing_dir: PathBuf::from("videos/out"),
            job_timeout: None,
            watchdog_grace: DEFAULT_WATCHDOG_GRACE,
            retention: None,
        }
    }
}

impl From<&ServiceConfig> for DispatchSettings {
    fn from(config: &ServiceConfig) -> Self {
        Self {
            workers: config.dispatcher.workers.max(1),
            poll_interval: config.dispatcher.poll_interval,
            incoming_dir: config.paths.incoming_dir.clone(),
            outgoing_dir: config.paths.outgoing_dir.clone(),
            job_timeout: Some(config.execution.timeout),
            watchdog_grace: DEFAULT_WATCHDOG_GRACE,
            retention: config
                .retention
                .as_ref()
                .map(|r| (r.max_age, r.sweep_interval)),
        }
    }
}

/// Cloneable handle used by the ingress side to wake idle workers.
#[derive(Clone)]
pub struct DispatchHandle {
    wake: Arc<Notify>,
}

impl DispatchHandle {
    /// Tell one idle worker that a job was enqueued.
    pub fn wake(&self) {
        self.wake.notify_one();
    }
}

/// A running pool of workers draining a [`JobStore`].
pub struct Dispatcher {
    wake: Arc<Notify>,
    shutdown: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
    janitor: Option<JoinHandle<()>>,
}

impl Dispatcher {
    /// Spawn the workers. The store must already be recovered.
    pub fn start(
        store: Arc<dyn JobStore>,
        executor: Arc<dyn Executor>,
        settings: DispatchSettings,
    ) -> Self {
        let settings = Arc::new(settings);
        let wake = Arc::new(Notify::new());
        let (shutdown, shutdown_rx) = watch::channel(false);

        let workers = (0..settings.workers.max(1))
            .map(|n| {
                let worker = Worker::new(
                    format!("worker-{}", n),
                    store.clone(),
                    executor.clone(),
                    settings.clone(),
                    wake.clone(),
                    shutdown_rx.clone(),
                );
                tokio::spawn(worker.run())
            })
            .collect::<Vec<_>>();

        let janitor = settings.retention.map(|(max_age, sweep_interval)| {
            tokio::spawn(sweep_loop(
                store.clone(),
                max_age,
                sweep_interval,
                shutdown_rx.clone(),
            ))
        });

        info!(
            workers = workers.len(),
            retention = janitor.is_some(),
            "Dispatcher started"
        );

        Self {
            wake,
            shutdown,
            workers,
            janitor,
        }
    }

    pub fn handle(&self) -> DispatchHandle {
        DispatchHandle {
            wake: self.wake.clone(),
        }
    }

    /// Stop claiming new jobs and wait for in-flight ones.
    ///
    /// Workers still busy after `grace` are aborted; their jobs stay
    /// `Running` on disk and are requeued by the next recovery.
    pub async fn shutdown(self, grace: Duration) {
        info!("Stopping dispatcher");
        let _ = self.shutdown.send(true);
        self.wake.notify_waiters();

        if let Some(janitor) = self.janitor {
            janitor.abort();
        }

        let aborts = self
            .workers
            .iter()
            .map(|w| w.abort_handle())
            .collect::<Vec<_>>();

        if tokio::time::timeout(grace, join_all(self.workers))
            .await
            .is_err()
        {
            warn!(
                grace_secs = grace.as_secs(),
                "Workers still busy after grace period, aborting"
            );
            for abort in aborts {
                abort.abort();
            }
        }

        info!("Dispatcher stopped");
    }
}

/// Periodically purge finished jobs older than `max_age`.
async fn sweep_loop(
    store: Arc<dyn JobStore>,
    max_age: Duration,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }

        let Some(cutoff) = chrono::Duration::from_std(max_age)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
        else {
            warn!(max_age_secs = max_age.as_secs(), "Retention age out of range, sweep disabled");
            break;
        };

        match store.purge_finished(cutoff).await {
            Ok(0) => {}
            Ok(purged) => info!(purged, "Purged finished jobs"),
            Err(StoreError::Closed) => break,
            Err(e) => error!(error = %e, "Failed to purge finished jobs"),
        }
    }
}
