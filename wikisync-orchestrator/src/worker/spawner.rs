//! Spawning isolated worker processes
//!
//! [`WorkerSpawner`] is the seam between the lifecycle manager and the
//! operating system. [`ProcessSpawner`] launches the configured worker
//! program as a child process: stdout lines are decoded into
//! [`WorkerMessage`]s, and every stdout/stderr line is appended to the
//! per-workspace log file.

use super::protocol::{WorkerCommand, WorkerEvent, WorkerInit, WorkerMessage, WORKER_DATA_ENV};
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, Command};
use tokio::sync::{mpsc, Mutex, Notify};
use tracing::{debug, error, info, trace, warn};
use wikisync_core::{Error, Result, WorkerCommandConfig};

/// Time allowed for output readers to drain after the process exited
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Control side of a spawned worker
#[async_trait]
pub trait WorkerControl: Send + Sync {
    async fn send(&self, command: WorkerCommand) -> Result<()>;

    /// Terminate the worker without waiting for it to cooperate
    async fn kill(&self) -> Result<()>;

    fn pid(&self) -> Option<u32>;
}

/// A worker right after spawn: its event stream and its control handle
pub struct SpawnedWorker {
    pub events: mpsc::UnboundedReceiver<WorkerEvent>,
    pub control: Arc<dyn WorkerControl>,
}

/// Launches workers for workspaces
#[async_trait]
pub trait WorkerSpawner: Send + Sync {
    /// Spawn a worker, refreshing the log file at `log_path`
    async fn spawn(&self, init: &WorkerInit, log_path: &Path) -> Result<SpawnedWorker>;
}

/// Spawns the configured worker program as a child process
#[derive(Debug, Clone)]
pub struct ProcessSpawner {
    command: WorkerCommandConfig,
}

impl ProcessSpawner {
    pub fn new(command: WorkerCommandConfig) -> Self {
        Self { command }
    }
}

#[async_trait]
impl WorkerSpawner for ProcessSpawner {
    async fn spawn(&self, init: &WorkerInit, log_path: &Path) -> Result<SpawnedWorker> {
        let root_path = init.root_path.clone();

        if let Some(parent) = log_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::io("Failed to create worker log directory", parent, e))?;
        }
        // File::create truncates, so each spawn starts a fresh log
        let log_file = File::create(log_path)
            .await
            .map_err(|e| Error::io("Failed to refresh worker log", log_path, e))?;
        let log_file = Arc::new(Mutex::new(log_file));

        let worker_data = serde_json::to_string(init)?;
        let mut cmd = Command::new(&self.command.program);
        cmd.args(&self.command.args)
            .env(WORKER_DATA_ENV, &worker_data)
            .current_dir(&init.root_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        trace!(
            "Worker command for {}: {} {:?}",
            root_path.display(),
            self.command.program,
            self.command.args
        );

        let mut child = cmd.spawn().map_err(|e| {
            error!(
                "Failed to spawn worker '{}' for {}: {}",
                self.command.program,
                root_path.display(),
                e
            );
            Error::worker_start(
                &root_path,
                format!("failed to spawn '{}': {}", self.command.program, e),
            )
        })?;

        let pid = child.id();
        info!(
            "Worker for {} spawned with PID {:?}, logging to {}",
            root_path.display(),
            pid,
            log_path.display()
        );

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::worker_start(&root_path, "failed to capture worker stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::worker_start(&root_path, "failed to capture worker stderr"))?;
        let stdin = child.stdin.take();

        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let stdout_task = tokio::spawn(capture_output(
            stdout,
            log_file.clone(),
            Some(event_tx.clone()),
        ));
        let stderr_task = tokio::spawn(capture_output(stderr, log_file, None));

        let kill_signal = Arc::new(Notify::new());
        let exit_kill_signal = kill_signal.clone();
        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                _ = exit_kill_signal.notified() => {
                    if let Err(e) = child.start_kill() {
                        warn!("Failed to signal worker {:?}: {}", pid, e);
                    }
                    child.wait().await
                }
            };

            // let queued messages reach the manager before the exit does
            for task in [stdout_task, stderr_task] {
                if tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, task).await.is_err() {
                    debug!("Worker {:?} output did not drain in time", pid);
                }
            }

            let event = match status {
                Ok(status) => WorkerEvent::Exited(status.code()),
                Err(e) => WorkerEvent::Error(format!("failed to wait for worker: {}", e)),
            };
            let _ = event_tx.send(event);
        });

        Ok(SpawnedWorker {
            events: event_rx,
            control: Arc::new(ProcessControl {
                pid,
                stdin: Mutex::new(stdin),
                kill_signal,
            }),
        })
    }
}

/// Copy a worker stream into its log, forwarding decoded messages
///
/// Output is read as raw bytes: invalid UTF-8 is logged verbatim and
/// decoded lossily, and only EOF or an I/O error stops the reader.
async fn capture_output<R>(
    stream: R,
    log_file: Arc<Mutex<File>>,
    messages: Option<mpsc::UnboundedSender<WorkerEvent>>,
) where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut line = Vec::new();

    loop {
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break, // EOF
            Ok(_) => {}
            Err(e) => {
                warn!("Failed to read worker output: {}", e);
                break;
            }
        }

        {
            let mut file = log_file.lock().await;
            if let Err(e) = file.write_all(&line).await {
                debug!("Failed to write worker log line: {}", e);
            }
        }

        if let Some(sender) = &messages {
            if let Some(message) = WorkerMessage::decode(&String::from_utf8_lossy(&line)) {
                // the manager may be gone; keep draining so the worker never sees a closed pipe
                let _ = sender.send(WorkerEvent::Message(message));
            }
        }

        line.clear();
    }

    let _ = log_file.lock().await.flush().await;
}

struct ProcessControl {
    pid: Option<u32>,
    stdin: Mutex<Option<ChildStdin>>,
    kill_signal: Arc<Notify>,
}

#[async_trait]
impl WorkerControl for ProcessControl {
    async fn send(&self, command: WorkerCommand) -> Result<()> {
        let mut guard = self.stdin.lock().await;
        let stdin = guard
            .as_mut()
            .ok_or_else(|| Error::Internal("worker stdin is closed".to_string()))?;
        let mut line = command.encode();
        line.push('\n');
        stdin.write_all(line.as_bytes()).await?;
        stdin.flush().await?;
        Ok(())
    }

    async fn kill(&self) -> Result<()> {
        // closing stdin lets a well-behaved worker notice as well
        self.stdin.lock().await.take();
        self.kill_signal.notify_one();
        Ok(())
    }

    fn pid(&self) -> Option<u32> {
        self.pid
    }
}
