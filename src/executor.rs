use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tonic::Status;

use crate::config::TRANSCODER_BINARY;
use crate::error::{GatewayError, Result};
use crate::metrics::WorkerMetrics;
use crate::proto::{CommandResponse, StreamSource};
use crate::validator::ValidatedCommand;

/// Channel the engine feeds response chunks into; the receiving end is the
/// gRPC response stream.
pub type ChunkSender = mpsc::Sender<std::result::Result<CommandResponse, Status>>;

struct InFlightProcess {
    binary: String,
    pid: Option<u32>,
    cancel: CancellationToken,
}

/// Registry of every live child process, keyed by execution id.
///
/// Each execution registers itself for exactly the lifetime of its child and
/// owns that child exclusively; the registry only holds enough to let
/// shutdown signal every in-flight execution without probing task state.
pub struct ProcessRegistry {
    next_id: AtomicU64,
    entries: Mutex<HashMap<u64, InFlightProcess>>,
}

impl ProcessRegistry {
    fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, InFlightProcess>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn insert(&self, binary: &str, pid: Option<u32>, cancel: CancellationToken) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().insert(
            id,
            InFlightProcess {
                binary: binary.to_string(),
                pid,
                cancel,
            },
        );
        id
    }

    fn remove(&self, id: u64) {
        self.lock().remove(&id);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Cancel every in-flight execution. The owning task kills its child and
    /// deregisters; entries still present afterwards are executions that have
    /// not yet observed the signal.
    pub fn terminate_all(&self) {
        for process in self.lock().values() {
            tracing::info!(
                binary = %process.binary,
                pid = ?process.pid,
                "Signalling in-flight process for termination"
            );
            process.cancel.cancel();
        }
    }
}

/// Removes the registry entry on drop, so deregistration happens on every
/// exit path of an execution.
struct RegistrySlot {
    registry: Arc<ProcessRegistry>,
    id: u64,
}

impl Drop for RegistrySlot {
    fn drop(&mut self) {
        self.registry.remove(self.id);
    }
}

/// Fully captured result of a non-streaming run, used by the health check.
#[derive(Debug)]
pub struct CapturedRun {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// Spawns allow-listed commands through a shell and drains their output.
///
/// Every execution owns its child process exclusively. Output is streamed
/// line by line as it is produced: stdout and stderr are drained by two
/// independent producers, so lines within one stream stay ordered while no
/// ordering holds between the two.
pub struct CommandExecutor {
    metrics: Arc<WorkerMetrics>,
    registry: Arc<ProcessRegistry>,
    /// Command lines referencing this path are health-check traffic and are
    /// excluded from the in-flight gauge.
    health_fixture: String,
}

impl CommandExecutor {
    pub fn new(metrics: Arc<WorkerMetrics>, health_fixture: &Path) -> Self {
        Self {
            metrics,
            registry: Arc::new(ProcessRegistry::new()),
            health_fixture: health_fixture.to_string_lossy().into_owned(),
        }
    }

    pub fn registry(&self) -> Arc<ProcessRegistry> {
        self.registry.clone()
    }

    /// Run a validated command, streaming each output line into `tx` as soon
    /// as it is read, then a single terminal exit-code chunk.
    ///
    /// Cancellation (or the caller going away) terminates the child process
    /// before returning; no chunks are sent after that point. The gauge
    /// guard and registry entry are released on every exit path.
    pub async fn execute_streaming(
        &self,
        command: ValidatedCommand,
        tx: ChunkSender,
        cancel: CancellationToken,
    ) {
        self.metrics.record_invocation(&command.binary);

        let _in_flight = (command.binary == TRANSCODER_BINARY
            && !command.command_line.contains(&self.health_fixture))
        .then(|| self.metrics.track_transcode());

        let mut child = match Command::new("sh")
            .arg("-c")
            .arg(&command.command_line)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                tracing::error!(
                    binary = %command.binary,
                    error = %e,
                    "Failed to spawn process"
                );
                let _ = tx
                    .send(Err(Status::internal(format!(
                        "Failed to spawn process: {}",
                        e
                    ))))
                    .await;
                return;
            }
        };

        let _slot = RegistrySlot {
            registry: self.registry.clone(),
            id: self
                .registry
                .insert(&command.binary, child.id(), cancel.clone()),
        };

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            let _ = tx
                .send(Err(Status::internal("Child process pipes unavailable")))
                .await;
            let _ = child.kill().await;
            return;
        };

        let stdout_task = tokio::spawn(stream_lines(stdout, StreamSource::Stdout, tx.clone()));
        let stderr_task = tokio::spawn(stream_lines(stderr, StreamSource::Stderr, tx.clone()));
        let stdout_abort = stdout_task.abort_handle();
        let stderr_abort = stderr_task.abort_handle();

        let drained = tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(binary = %command.binary, "Execution cancelled, terminating child process");
                false
            }
            _ = tx.closed() => {
                tracing::info!(binary = %command.binary, "Caller disconnected, terminating child process");
                false
            }
            _ = async {
                let _ = stdout_task.await;
                let _ = stderr_task.await;
            } => true,
        };

        if !drained {
            stdout_abort.abort();
            stderr_abort.abort();
            if let Err(e) = child.kill().await {
                tracing::warn!(binary = %command.binary, error = %e, "Failed to kill child process");
            }
            return;
        }

        match child.wait().await {
            Ok(status) => {
                let exit_code = status.code().unwrap_or(-1);
                tracing::info!(binary = %command.binary, exit_code, "Command completed");
                let _ = tx
                    .send(Ok(CommandResponse {
                        output: String::new(),
                        stream: StreamSource::ExitCode as i32,
                        exit_code,
                    }))
                    .await;
            }
            Err(e) => {
                tracing::error!(binary = %command.binary, error = %e, "Failed to reap child process");
                let _ = tx
                    .send(Err(Status::internal(format!(
                        "Failed to reap child process: {}",
                        e
                    ))))
                    .await;
            }
        }
    }

    /// Run a raw command line to completion and capture its full output.
    ///
    /// This is the health-check primitive: same shell execution path as
    /// streaming, but buffered. On cancellation the in-flight future is
    /// dropped, which kills the child via `kill_on_drop`.
    pub async fn run_captured(
        &self,
        command_line: &str,
        cancel: &CancellationToken,
    ) -> Result<CapturedRun> {
        let child = Command::new("sh")
            .arg("-c")
            .arg(command_line)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let output = tokio::select! {
            _ = cancel.cancelled() => return Err(GatewayError::Cancelled),
            output = child.wait_with_output() => output?,
        };

        Ok(CapturedRun {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }
}

async fn stream_lines<R>(reader: R, source: StreamSource, tx: ChunkSender)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let chunk = CommandResponse {
            output: line,
            stream: source as i32,
            exit_code: 0,
        };
        if tx.send(Ok(chunk)).await.is_err() {
            // Receiver dropped; the select in execute_streaming handles the
            // child.
            break;
        }
    }
}
