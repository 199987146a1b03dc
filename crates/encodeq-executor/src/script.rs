//! Script executor implementation.
//!
//! Runs `<interpreter> <script> <input> <output>` for every job and waits for
//! it to exit. Output is logged line by line; the tail of stderr becomes the
//! failure message.
//!
//! On unix the script leads its own process group. Whatever it started is
//! killed with it, on timeout and after it exits.

use async_trait::async_trait;
use chrono::Utc;
use encodeq_core::executor::{ExecutionOutcome, ExecutionSpec, Executor};
use encodeq_core::{Error, Result};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, info, warn};

/// Stderr lines kept for the failure message.
const DEFAULT_STDERR_TAIL: usize = 20;

/// Executor that hands each job to an external script.
#[derive(Debug, Clone)]
pub struct ScriptExecutor {
    interpreter: PathBuf,
    script: PathBuf,
    stderr_tail: usize,
}

impl ScriptExecutor {
    pub fn new(interpreter: impl Into<PathBuf>, script: impl Into<PathBuf>) -> Self {
        Self {
            interpreter: interpreter.into(),
            script: script.into(),
            stderr_tail: DEFAULT_STDERR_TAIL,
        }
    }

    /// Keep at most `lines` stderr lines for failure messages.
    pub fn with_stderr_tail(mut self, lines: usize) -> Self {
        self.stderr_tail = lines;
        self
    }

    pub fn interpreter(&self) -> &Path {
        &self.interpreter
    }

    pub fn script(&self) -> &Path {
        &self.script
    }

    fn command(&self, spec: &ExecutionSpec) -> Command {
        let mut cmd = Command::new(&self.interpreter);
        cmd.arg(&self.script)
            .arg(&spec.input)
            .arg(&spec.output)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);
        cmd
    }
}

/// Kill every process left in the group led by `pid`.
#[cfg(unix)]
fn kill_process_group(job_id: encodeq_core::JobId, pid: Option<u32>) {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Some(pid) = pid else {
        return;
    };
    match killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => warn!(job_id = %job_id, pid, error = %e, "Failed to kill process group"),
    }
}

#[cfg(not(unix))]
fn kill_process_group(_job_id: encodeq_core::JobId, _pid: Option<u32>) {}

/// The script's process group, killed when the run ends or is cancelled.
struct ProcessGroup {
    job_id: encodeq_core::JobId,
    pid: Option<u32>,
}

impl ProcessGroup {
    fn kill(&self) {
        kill_process_group(self.job_id, self.pid);
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

#[async_trait]
impl Executor for ScriptExecutor {
    fn name(&self) -> &'static str {
        "script"
    }

    async fn run(&self, spec: &ExecutionSpec) -> Result<ExecutionOutcome> {
        let job_id = spec.job_id;
        info!(
            job_id = %job_id,
            interpreter = %self.interpreter.display(),
            script = %self.script.display(),
            input = %spec.input.display(),
            output = %spec.output.display(),
            "Starting script"
        );

        let started_at = Utc::now();
        let mut child = self.command(spec).spawn().map_err(|e| {
            Error::ExecutionFailed(format!(
                "failed to start {}: {}",
                self.interpreter.display(),
                e
            ))
        })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let stdout_task = tokio::spawn(async move {
            if let Some(stdout) = stdout {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(job_id = %job_id, stream = "stdout", "{}", line);
                }
            }
        });

        let tail_len = self.stderr_tail;
        let stderr_task = tokio::spawn(async move {
            let mut tail = VecDeque::with_capacity(tail_len);
            if let Some(stderr) = stderr {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(job_id = %job_id, stream = "stderr", "{}", line);
                    if tail_len > 0 {
                        if tail.len() == tail_len {
                            tail.pop_front();
                        }
                        tail.push_back(line);
                    }
                }
            }
            tail
        });

        let group = ProcessGroup {
            job_id,
            pid: child.id(),
        };
        let deadline = spec.timeout.map(|limit| Instant::now() + limit);

        let waited = match (spec.timeout, deadline) {
            (Some(limit), Some(deadline)) => match timeout_at(deadline, child.wait()).await {
                Ok(waited) => waited,
                Err(_) => {
                    warn!(job_id = %job_id, timeout_secs = limit.as_secs(), "Script timed out, killing process group");
                    group.kill();
                    if let Err(e) = child.kill().await {
                        warn!(job_id = %job_id, error = %e, "Failed to kill timed out script");
                    }
                    stdout_task.abort();
                    stderr_task.abort();
                    return Ok(ExecutionOutcome::TimedOut {
                        started_at,
                        killed_at: Utc::now(),
                        timeout: limit,
                    });
                }
            },
            _ => child.wait().await,
        };

        // Background processes the script left behind would keep the pipes open.
        group.kill();

        let status = waited
            .map_err(|e| Error::ExecutionFailed(format!("failed to wait for script: {}", e)))?;

        let aborts = [stdout_task.abort_handle(), stderr_task.abort_handle()];
        let drain = async {
            let _ = stdout_task.await;
            stderr_task.await.unwrap_or_default()
        };
        let tail = match deadline {
            Some(deadline) => match timeout_at(deadline, drain).await {
                Ok(tail) => tail,
                Err(_) => {
                    warn!(job_id = %job_id, "Script output still open at the deadline, dropping it");
                    for abort in aborts {
                        abort.abort();
                    }
                    VecDeque::new()
                }
            },
            None => drain.await,
        };
        let finished_at = Utc::now();

        if status.success() {
            info!(job_id = %job_id, "Script finished");
            return Ok(ExecutionOutcome::Succeeded {
                started_at,
                finished_at,
            });
        }

        let message = if tail.is_empty() {
            "no output on stderr".to_string()
        } else {
            Vec::from(tail).join("\n")
        };
        warn!(job_id = %job_id, exit_code = ?status.code(), "Script failed");
        Ok(ExecutionOutcome::Failed {
            started_at,
            finished_at,
            exit_code: status.code(),
            message,
        })
    }
}
