//! Worker lifecycle management
//!
//! The [`WorkerManager`] owns the worker handle registry, keyed by
//! workspace root path. It starts one worker per workspace, resolves the
//! start once the worker sends its first message, and stops workers with a
//! bounded exit handshake that escalates to a forced kill.

use super::protocol::{WorkerCommand, WorkerEvent, WorkerInit, WorkerMessage};
use super::spawner::{WorkerControl, WorkerSpawner};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch, RwLock};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use wikisync_core::services::{Confirmation, MissingFolderChoice, ViewService, WorkspaceRegistry};
use wikisync_core::workspace::validate_root_path;
use wikisync_core::{Error, MetadataUpdate, OrchestratorConfig, Result, Workspace};

/// Observable state of a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum WorkerStatus {
    /// Spawned, no message received yet
    Starting,
    /// First message received
    Ready,
    /// Process ended; `code` is `None` when it was killed by a signal
    Exited { code: Option<i32> },
}

impl WorkerStatus {
    pub fn is_exited(&self) -> bool {
        matches!(self, WorkerStatus::Exited { .. })
    }
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerStatus::Starting => write!(f, "starting"),
            WorkerStatus::Ready => write!(f, "ready"),
            WorkerStatus::Exited { code: Some(code) } => write!(f, "exited ({})", code),
            WorkerStatus::Exited { code: None } => write!(f, "killed"),
        }
    }
}

/// Registry entry for one live or recently exited worker
struct WorkerHandle {
    workspace_id: String,
    pid: Option<u32>,
    started_at: DateTime<Utc>,
    /// Distinguishes this spawn from a later restart at the same root
    generation: Uuid,
    control: Arc<dyn WorkerControl>,
    status: watch::Receiver<WorkerStatus>,
    stop_requested: Arc<AtomicBool>,
}

/// Snapshot of a registered worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerInfo {
    pub workspace_id: String,
    pub root_path: PathBuf,
    pub pid: Option<u32>,
    pub started_at: DateTime<Utc>,
    pub status: WorkerStatus,
}

/// Result of stopping every registered worker
#[derive(Debug, Default)]
pub struct StopReport {
    /// Every root a stop was attempted for
    pub attempted: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, Error)>,
}

impl StopReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

type HandleMap = Arc<RwLock<HashMap<PathBuf, WorkerHandle>>>;

/// Roots with a `start` in progress
type StartingSet = Arc<Mutex<HashSet<PathBuf>>>;

/// Claim on a root for the duration of one `start`, released on drop
struct StartReservation {
    starting: StartingSet,
    root_path: PathBuf,
}

impl Drop for StartReservation {
    fn drop(&mut self) {
        self.starting.lock().remove(&self.root_path);
    }
}

/// Starts, monitors and stops per-workspace worker processes
pub struct WorkerManager {
    handles: HandleMap,
    starting: StartingSet,
    spawner: Arc<dyn WorkerSpawner>,
    registry: Arc<dyn WorkspaceRegistry>,
    views: Arc<dyn ViewService>,
    confirmation: Arc<dyn Confirmation>,
    config: OrchestratorConfig,
}

impl WorkerManager {
    pub fn new(
        spawner: Arc<dyn WorkerSpawner>,
        registry: Arc<dyn WorkspaceRegistry>,
        views: Arc<dyn ViewService>,
        confirmation: Arc<dyn Confirmation>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            handles: Arc::new(RwLock::new(HashMap::new())),
            starting: Arc::new(Mutex::new(HashSet::new())),
            spawner,
            registry,
            views,
            confirmation,
            config,
        }
    }

    /// Start the worker for `workspace` and wait until it is ready
    ///
    /// Resolves after the first worker message plus the readiness grace,
    /// with the workspace no longer marked as loading and views refreshed.
    pub async fn start(&self, workspace: &Workspace) -> Result<()> {
        let root_path = workspace.root_path.clone();

        if let Err(e) = validate_root_path(&root_path) {
            error!(workspace_id = %workspace.id, "Refusing to start worker: {}", e);
            self.confirmation
                .show_error("Invalid workspace path", &e.to_string())
                .await;
            return Err(e);
        }

        if !tokio::fs::try_exists(&root_path).await.unwrap_or(false) {
            return Err(self.handle_missing_folder(workspace).await);
        }

        // held until the handle is registered or the start fails
        let _reservation = self.reserve_start(&root_path).await?;

        self.set_loading(&workspace.id, true).await;

        let init = WorkerInit {
            root_path: root_path.clone(),
            display_name: workspace.name.clone(),
            port: workspace.port,
        };
        let log_path = self
            .config
            .log_directory
            .join(format!("{}.log", workspace.log_file_stem()));

        info!(
            workspace_id = %workspace.id,
            root_path = %root_path.display(),
            "Starting worker"
        );
        let spawned = match self.spawner.spawn(&init, &log_path).await {
            Ok(spawned) => spawned,
            Err(e) => {
                self.set_loading(&workspace.id, false).await;
                return Err(e);
            }
        };

        let generation = Uuid::new_v4();
        let (status_tx, status_rx) = watch::channel(WorkerStatus::Starting);
        let (ready_tx, ready_rx) = oneshot::channel();
        let stop_requested = Arc::new(AtomicBool::new(false));
        let control = spawned.control;

        self.handles.write().await.insert(
            root_path.clone(),
            WorkerHandle {
                workspace_id: workspace.id.clone(),
                pid: control.pid(),
                started_at: Utc::now(),
                generation,
                control: control.clone(),
                status: status_rx,
                stop_requested: stop_requested.clone(),
            },
        );

        tokio::spawn(pump_events(EventPump {
            events: spawned.events,
            status: status_tx,
            ready: Some(ready_tx),
            handles: self.handles.clone(),
            root_path: root_path.clone(),
            workspace_id: workspace.id.clone(),
            generation,
            stop_requested,
        }));

        let readiness = ready_rx.await.unwrap_or_else(|_| {
            Err(Error::worker_start(
                &root_path,
                "worker event stream closed before readiness",
            ))
        });

        if let Err(e) = readiness {
            error!(
                workspace_id = %workspace.id,
                "Worker failed before readiness: {}", e
            );
            remove_handle(&self.handles, &root_path, generation).await;
            if let Err(kill_error) = control.kill().await {
                debug!("Failed to kill worker after failed start: {}", kill_error);
            }
            self.set_loading(&workspace.id, false).await;
            return Err(e);
        }

        tokio::time::sleep(self.config.readiness_grace).await;
        self.set_loading(&workspace.id, false).await;
        self.views.refresh_all().await;
        info!(
            workspace_id = %workspace.id,
            root_path = %root_path.display(),
            "Worker ready"
        );
        Ok(())
    }

    /// Stop the worker serving `root_path`
    ///
    /// Stopping a root without a worker, or whose worker already exited,
    /// succeeds without doing anything.
    pub async fn stop(&self, root_path: &Path) -> Result<()> {
        let (workspace_id, control, mut status, stop_requested, generation) = {
            let handles = self.handles.read().await;
            match handles.get(root_path) {
                Some(handle) => (
                    handle.workspace_id.clone(),
                    handle.control.clone(),
                    handle.status.clone(),
                    handle.stop_requested.clone(),
                    handle.generation,
                ),
                None => {
                    warn!(
                        root_path = %root_path.display(),
                        "No worker registered, nothing to stop"
                    );
                    return Ok(());
                }
            }
        };

        if status.borrow().is_exited() {
            debug!(root_path = %root_path.display(), "Worker already exited");
            return Ok(());
        }

        stop_requested.store(true, Ordering::SeqCst);
        info!(workspace_id = %workspace_id, root_path = %root_path.display(), "Stopping worker");

        let graceful = async {
            control.send(WorkerCommand::Exit).await?;
            status
                .wait_for(|status| status.is_exited())
                .await
                .map_err(|_| Error::Internal("worker status channel closed".to_string()))?;
            Ok::<(), Error>(())
        };

        match timeout(self.config.stop_timeout, graceful).await {
            Ok(Ok(())) => {
                debug!(root_path = %root_path.display(), "Worker acknowledged exit");
                tokio::time::sleep(self.config.stop_settle).await;
            }
            outcome => {
                let reason = match outcome {
                    Ok(Err(e)) => e.to_string(),
                    _ => format!("no exit after {:?}", self.config.stop_timeout),
                };
                warn!(
                    workspace_id = %workspace_id,
                    root_path = %root_path.display(),
                    "Graceful worker stop failed ({}), forcing termination", reason
                );
                control.kill().await?;
            }
        }

        self.set_loading(&workspace_id, false).await;
        if self.config.remove_handle_on_stop {
            remove_handle(&self.handles, root_path, generation).await;
        }
        Ok(())
    }

    /// Stop every registered worker concurrently
    ///
    /// A failing stop never prevents the others from being attempted.
    pub async fn stop_all(&self) -> StopReport {
        let roots: Vec<PathBuf> = self.handles.read().await.keys().cloned().collect();
        info!("Stopping {} worker(s)", roots.len());

        let results = join_all(roots.iter().map(|root| async move {
            let result = self.stop(root).await;
            (root.clone(), result)
        }))
        .await;

        tokio::time::sleep(self.config.stop_all_settle).await;

        let mut report = StopReport {
            attempted: roots,
            failed: Vec::new(),
        };
        for (root, result) in results {
            if let Err(e) = result {
                error!(root_path = %root.display(), "Failed to stop worker: {}", e);
                report.failed.push((root, e));
            }
        }
        report
    }

    /// Whether a worker for `root_path` is registered and has not exited
    pub async fn is_running(&self, root_path: &Path) -> bool {
        self.handles
            .read()
            .await
            .get(root_path)
            .map(|handle| !handle.status.borrow().is_exited())
            .unwrap_or(false)
    }

    /// Whether any handle, live or exited, is registered for `root_path`
    pub async fn has_handle(&self, root_path: &Path) -> bool {
        self.handles.read().await.contains_key(root_path)
    }

    pub async fn worker_info(&self, root_path: &Path) -> Option<WorkerInfo> {
        self.handles
            .read()
            .await
            .get(root_path)
            .map(|handle| handle.info(root_path))
    }

    pub async fn workers(&self) -> Vec<WorkerInfo> {
        self.handles
            .read()
            .await
            .iter()
            .map(|(root, handle)| handle.info(root))
            .collect()
    }

    /// Claim `root_path` for a start, failing if a worker is live or starting
    async fn reserve_start(&self, root_path: &Path) -> Result<StartReservation> {
        let handles = self.handles.read().await;
        let live = handles
            .get(root_path)
            .is_some_and(|existing| !existing.status.borrow().is_exited());
        let mut starting = self.starting.lock();
        if live || !starting.insert(root_path.to_path_buf()) {
            return Err(Error::already_exists(
                "worker",
                root_path.display().to_string(),
            ));
        }
        Ok(StartReservation {
            starting: self.starting.clone(),
            root_path: root_path.to_path_buf(),
        })
    }

    async fn handle_missing_folder(&self, workspace: &Workspace) -> Error {
        let missing = Error::WorkspacePathMissing {
            path: workspace.root_path.clone(),
        };
        error!(workspace_id = %workspace.id, "{}", missing);

        match self.confirmation.missing_workspace_folder(workspace).await {
            MissingFolderChoice::RemoveWorkspace => {
                info!(workspace_id = %workspace.id, "Removing view of workspace with missing folder");
                if let Err(e) = self.views.remove_workspace_view(&workspace.id).await {
                    error!(workspace_id = %workspace.id, "Failed to remove workspace view: {}", e);
                }
            }
            MissingFolderChoice::Ignore => {
                debug!(workspace_id = %workspace.id, "Missing workspace folder ignored");
            }
        }
        missing
    }

    async fn set_loading(&self, workspace_id: &str, loading: bool) {
        if let Err(e) = self
            .registry
            .update_metadata(workspace_id, MetadataUpdate::Loading(loading))
            .await
        {
            // the record may already be gone while a removal is in progress
            debug!(workspace_id, "Could not update loading flag: {}", e);
        }
    }
}

impl WorkerHandle {
    fn info(&self, root_path: &Path) -> WorkerInfo {
        WorkerInfo {
            workspace_id: self.workspace_id.clone(),
            root_path: root_path.to_path_buf(),
            pid: self.pid,
            started_at: self.started_at,
            status: *self.status.borrow(),
        }
    }
}

async fn remove_handle(handles: &HandleMap, root_path: &Path, generation: Uuid) {
    let mut handles = handles.write().await;
    if handles
        .get(root_path)
        .is_some_and(|handle| handle.generation == generation)
    {
        handles.remove(root_path);
        debug!(root_path = %root_path.display(), "Worker handle removed");
    }
}

struct EventPump {
    events: mpsc::UnboundedReceiver<WorkerEvent>,
    status: watch::Sender<WorkerStatus>,
    ready: Option<oneshot::Sender<Result<()>>>,
    handles: HandleMap,
    root_path: PathBuf,
    workspace_id: String,
    generation: Uuid,
    stop_requested: Arc<AtomicBool>,
}

impl EventPump {
    fn resolve(&mut self, result: Result<()>) {
        if let Some(ready) = self.ready.take() {
            if result.is_ok() {
                self.status.send_replace(WorkerStatus::Ready);
            }
            let _ = ready.send(result);
        }
    }
}

/// Route worker events until the process exits
async fn pump_events(mut pump: EventPump) {
    while let Some(event) = pump.events.recv().await {
        match event {
            WorkerEvent::Message(message) => {
                // the first message of any kind signals readiness
                pump.resolve(Ok(()));
                log_message(&pump.workspace_id, &message);
            }
            WorkerEvent::Error(message) => {
                if pump.ready.is_some() {
                    let error = Error::worker_start(&pump.root_path, message);
                    pump.resolve(Err(error));
                } else {
                    error!(workspace_id = %pump.workspace_id, "Worker error: {}", message);
                }
            }
            WorkerEvent::Exited(code) => {
                pump.status.send_replace(WorkerStatus::Exited { code });
                if pump.ready.is_some() {
                    let message = match code {
                        Some(code) => format!("worker exited with code {} before readiness", code),
                        None => "worker was killed before readiness".to_string(),
                    };
                    let error = Error::worker_start(&pump.root_path, message);
                    pump.resolve(Err(error));
                    return;
                }

                if pump.stop_requested.load(Ordering::SeqCst) {
                    debug!(workspace_id = %pump.workspace_id, "Worker exited on request");
                } else if code == Some(0) {
                    info!(workspace_id = %pump.workspace_id, "Worker exited on its own");
                } else {
                    warn!(
                        workspace_id = %pump.workspace_id,
                        root_path = %pump.root_path.display(),
                        "Worker exited unexpectedly with {:?}", code
                    );
                    remove_handle(&pump.handles, &pump.root_path, pump.generation).await;
                }
                return;
            }
        }
    }

    // the spawner dropped the stream without reporting an exit
    pump.status.send_replace(WorkerStatus::Exited { code: None });
    let error = Error::worker_start(&pump.root_path, "worker event stream closed");
    pump.resolve(Err(error));
}

fn log_message(workspace_id: &str, message: &WorkerMessage) {
    match message {
        WorkerMessage::Started => info!(workspace_id, "Worker started"),
        WorkerMessage::Progress { message, handler } => {
            info!(workspace_id, handler = %handler, "{}", message)
        }
        WorkerMessage::Log { message } => info!(workspace_id, "{}", message),
        WorkerMessage::Exit { code } => {
            info!(workspace_id, notice = true, "Worker announced exit with code {}", code)
        }
    }
}
