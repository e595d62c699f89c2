//! Shared fakes for orchestrator integration tests
//!
//! Every collaborator trait has an in-memory fake that records what the
//! orchestrator asked of it, plus a [`Harness`] wiring them together
//! around a temporary directory.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::{mpsc, Notify};

use wikisync_core::services::{
    Confirmation, MissingFolderChoice, NetworkProbe, Notifier, Preferences, RemovalChoice,
    VersionControl, VersionControlInit, ViewService, WorkspaceRegistry,
};
use wikisync_core::{
    Error, GitUserInfo, JsonFileRegistry, MetadataUpdate, NewWorkspaceConfig, OrchestratorConfig,
    Result, StorageMode, Workspace,
};
use wikisync_orchestrator::worker::{
    SpawnedWorker, WorkerCommand, WorkerControl, WorkerEvent, WorkerInit, WorkerMessage,
    WorkerSpawner,
};
use wikisync_orchestrator::{Collaborators, CreationRequest, FolderSource, Orchestrator};

/// How a fake worker behaves once spawned
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerBehavior {
    /// Sends `started`, exits cleanly on the exit command
    ReadyImmediately,
    /// Reports an error before any message
    FailBeforeReady(String),
    /// Exits with a code before any message
    ExitBeforeReady(i32),
    /// Sends `started`, then crashes with a code
    CrashAfterReady(i32),
    /// Sends `started`, ignores the exit command and refuses to be killed
    Unstoppable,
}

pub struct FakeControl {
    events: mpsc::UnboundedSender<WorkerEvent>,
    behavior: WorkerBehavior,
    pub commands: Mutex<Vec<WorkerCommand>>,
    pub kills: AtomicUsize,
}

#[async_trait]
impl WorkerControl for FakeControl {
    async fn send(&self, command: WorkerCommand) -> Result<()> {
        self.commands.lock().unwrap().push(command);
        if self.behavior != WorkerBehavior::Unstoppable {
            let _ = self.events.send(WorkerEvent::Exited(Some(0)));
        }
        Ok(())
    }

    async fn kill(&self) -> Result<()> {
        self.kills.fetch_add(1, Ordering::SeqCst);
        if self.behavior == WorkerBehavior::Unstoppable {
            return Err(Error::Internal("kill refused".to_string()));
        }
        let _ = self.events.send(WorkerEvent::Exited(None));
        Ok(())
    }

    fn pid(&self) -> Option<u32> {
        Some(4242)
    }
}

#[derive(Default)]
pub struct FakeSpawner {
    behaviors: Mutex<HashMap<PathBuf, WorkerBehavior>>,
    pub spawned: Mutex<Vec<(WorkerInit, PathBuf)>>,
    pub controls: Mutex<Vec<Arc<FakeControl>>>,
    /// Time each spawn takes before returning
    pub spawn_delay: Mutex<Option<Duration>>,
}

impl FakeSpawner {
    pub fn set_behavior(&self, root: &Path, behavior: WorkerBehavior) {
        self.behaviors
            .lock()
            .unwrap()
            .insert(root.to_path_buf(), behavior);
    }

    pub fn delay_spawns(&self, delay: Duration) {
        *self.spawn_delay.lock().unwrap() = Some(delay);
    }

    pub fn spawn_count(&self) -> usize {
        self.spawned.lock().unwrap().len()
    }

    pub fn spawn_count_for(&self, root: &Path) -> usize {
        self.spawned
            .lock()
            .unwrap()
            .iter()
            .filter(|(init, _)| init.root_path == root)
            .count()
    }

    pub fn last_control(&self) -> Arc<FakeControl> {
        self.controls.lock().unwrap().last().cloned().unwrap()
    }
}

#[async_trait]
impl WorkerSpawner for FakeSpawner {
    async fn spawn(&self, init: &WorkerInit, log_path: &Path) -> Result<SpawnedWorker> {
        let delay = *self.spawn_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let behavior = self
            .behaviors
            .lock()
            .unwrap()
            .get(&init.root_path)
            .cloned()
            .unwrap_or(WorkerBehavior::ReadyImmediately);
        self.spawned
            .lock()
            .unwrap()
            .push((init.clone(), log_path.to_path_buf()));

        let (tx, rx) = mpsc::unbounded_channel();
        match &behavior {
            WorkerBehavior::ReadyImmediately | WorkerBehavior::Unstoppable => {
                tx.send(WorkerEvent::Message(WorkerMessage::Started)).unwrap();
            }
            WorkerBehavior::FailBeforeReady(message) => {
                tx.send(WorkerEvent::Error(message.clone())).unwrap();
            }
            WorkerBehavior::ExitBeforeReady(code) => {
                tx.send(WorkerEvent::Exited(Some(*code))).unwrap();
            }
            WorkerBehavior::CrashAfterReady(code) => {
                tx.send(WorkerEvent::Message(WorkerMessage::Started)).unwrap();
                let crash = tx.clone();
                let code = *code;
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    let _ = crash.send(WorkerEvent::Exited(Some(code)));
                });
            }
        }

        let control = Arc::new(FakeControl {
            events: tx,
            behavior,
            commands: Mutex::new(Vec::new()),
            kills: AtomicUsize::new(0),
        });
        self.controls.lock().unwrap().push(control.clone());
        Ok(SpawnedWorker {
            events: rx,
            control,
        })
    }
}

/// Calls observed by [`FakeVcs`]
#[derive(Debug, Clone, PartialEq)]
pub enum VcsCall {
    Initialize { path: PathBuf, synced: bool },
    Clone { remote_url: String, path: PathBuf },
    CommitAndSync { path: PathBuf },
    SyncIfNeeded { path: PathBuf },
    SetBranch { path: PathBuf, branch: String },
}

#[derive(Default)]
pub struct FakeVcs {
    pub calls: Mutex<Vec<VcsCall>>,
    pub existing_repos: Mutex<HashSet<PathBuf>>,
    pub fail_initialize: AtomicBool,
    /// Swapped for a real directory when initialization fails, to break rollback
    pub clobber_on_failed_init: Mutex<Option<PathBuf>>,
    pub fail_branch: AtomicBool,
    pub fail_commit_and_sync: AtomicBool,
    pub fail_sync_for: Mutex<HashSet<PathBuf>>,
    /// When set, commit-and-sync waits for a notification before settling
    pub sync_gate: Mutex<Option<Arc<Notify>>>,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl FakeVcs {
    pub fn calls(&self) -> Vec<VcsCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn commit_and_sync_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, VcsCall::CommitAndSync { .. }))
            .count()
    }

    pub fn sync_if_needed_paths(&self) -> Vec<PathBuf> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                VcsCall::SyncIfNeeded { path } => Some(path),
                _ => None,
            })
            .collect()
    }

    pub fn gate_syncs(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.sync_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    fn record(&self, call: VcsCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl VersionControl for FakeVcs {
    async fn has_version_control(&self, path: &Path) -> Result<bool> {
        Ok(self.existing_repos.lock().unwrap().contains(path))
    }

    async fn initialize(&self, path: &Path, init: VersionControlInit<'_>) -> Result<()> {
        self.record(VcsCall::Initialize {
            path: path.to_path_buf(),
            synced: matches!(init, VersionControlInit::Synced { .. }),
        });
        if self.fail_initialize.load(Ordering::SeqCst) {
            let clobber = self.clobber_on_failed_init.lock().unwrap().take();
            if let Some(link) = clobber {
                std::fs::remove_file(&link)?;
                std::fs::create_dir_all(link.join("real"))?;
            }
            return Err(Error::version_control("init exploded"));
        }
        Ok(())
    }

    async fn clone_repository(
        &self,
        remote_url: &str,
        path: &Path,
        _user_info: &GitUserInfo,
    ) -> Result<()> {
        self.record(VcsCall::Clone {
            remote_url: remote_url.to_string(),
            path: path.to_path_buf(),
        });
        tokio::fs::create_dir_all(path.join("tiddlers")).await?;
        self.existing_repos
            .lock()
            .unwrap()
            .insert(path.to_path_buf());
        Ok(())
    }

    async fn debounced_commit_and_sync(
        &self,
        path: &Path,
        _remote_url: &str,
        _user_info: &GitUserInfo,
    ) -> Result<()> {
        self.record(VcsCall::CommitAndSync {
            path: path.to_path_buf(),
        });
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        let gate = self.sync_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if self.fail_commit_and_sync.load(Ordering::SeqCst) {
            return Err(Error::version_control("push rejected"));
        }
        Ok(())
    }

    async fn sync_if_needed(
        &self,
        workspace: &Workspace,
        _user_info: Option<&GitUserInfo>,
    ) -> Result<()> {
        self.record(VcsCall::SyncIfNeeded {
            path: workspace.root_path.clone(),
        });
        if self.fail_sync_for.lock().unwrap().contains(&workspace.root_path) {
            return Err(Error::version_control("remote unreachable"));
        }
        Ok(())
    }

    async fn set_branch_preference(&self, path: &Path, branch: &str) -> Result<()> {
        self.record(VcsCall::SetBranch {
            path: path.to_path_buf(),
            branch: branch.to_string(),
        });
        if self.fail_branch.load(Ordering::SeqCst) {
            return Err(Error::version_control("no such branch"));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeViews {
    pub refreshes: AtomicUsize,
    pub removed: Mutex<Vec<String>>,
    pub activated: Mutex<Vec<String>>,
    pub fail_remove: AtomicBool,
}

#[async_trait]
impl ViewService for FakeViews {
    async fn refresh_all(&self) {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
    }

    async fn remove_workspace_view(&self, workspace_id: &str) -> Result<()> {
        if self.fail_remove.load(Ordering::SeqCst) {
            return Err(Error::Internal("view is busy".to_string()));
        }
        self.removed.lock().unwrap().push(workspace_id.to_string());
        Ok(())
    }

    async fn set_active_workspace_view(&self, workspace_id: &str) -> Result<()> {
        self.activated
            .lock()
            .unwrap()
            .push(workspace_id.to_string());
        Ok(())
    }
}

pub struct FakeConfirmation {
    pub removal: Mutex<RemovalChoice>,
    pub missing_folder: Mutex<MissingFolderChoice>,
    pub removal_prompts: AtomicUsize,
    pub missing_prompts: AtomicUsize,
    pub errors: Mutex<Vec<(String, String)>>,
}

impl Default for FakeConfirmation {
    fn default() -> Self {
        Self {
            removal: Mutex::new(RemovalChoice::RemoveRecord),
            missing_folder: Mutex::new(MissingFolderChoice::Ignore),
            removal_prompts: AtomicUsize::new(0),
            missing_prompts: AtomicUsize::new(0),
            errors: Mutex::new(Vec::new()),
        }
    }
}

impl FakeConfirmation {
    pub fn answer_removal(&self, choice: RemovalChoice) {
        *self.removal.lock().unwrap() = choice;
    }

    pub fn answer_missing_folder(&self, choice: MissingFolderChoice) {
        *self.missing_folder.lock().unwrap() = choice;
    }
}

#[async_trait]
impl Confirmation for FakeConfirmation {
    async fn confirm_removal(&self, _workspace: &Workspace) -> RemovalChoice {
        self.removal_prompts.fetch_add(1, Ordering::SeqCst);
        *self.removal.lock().unwrap()
    }

    async fn missing_workspace_folder(&self, _workspace: &Workspace) -> MissingFolderChoice {
        self.missing_prompts.fetch_add(1, Ordering::SeqCst);
        *self.missing_folder.lock().unwrap()
    }

    async fn show_error(&self, title: &str, message: &str) {
        self.errors
            .lock()
            .unwrap()
            .push((title.to_string(), message.to_string()));
    }
}

#[derive(Default)]
pub struct FakeNotifier {
    pub notified: Mutex<Vec<String>>,
    pub fail: AtomicBool,
}

#[async_trait]
impl Notifier for FakeNotifier {
    async fn notify(&self, title: &str) -> Result<()> {
        self.notified.lock().unwrap().push(title.to_string());
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Internal("no notification daemon".to_string()));
        }
        Ok(())
    }
}

/// In-memory registry whose writes can be made to fail
pub struct FakeRegistry {
    inner: JsonFileRegistry,
    pub fail_create: AtomicBool,
    pub fail_active: AtomicBool,
}

impl Default for FakeRegistry {
    fn default() -> Self {
        Self {
            inner: JsonFileRegistry::in_memory(),
            fail_create: AtomicBool::new(false),
            fail_active: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl WorkspaceRegistry for FakeRegistry {
    async fn create(&self, config: NewWorkspaceConfig) -> Result<Workspace> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(Error::Internal("registry file is read-only".to_string()));
        }
        self.inner.create(config).await
    }

    async fn get(&self, id: &str) -> Result<Option<Workspace>> {
        self.inner.get(id).await
    }

    async fn get_by_root(&self, root_path: &Path) -> Result<Option<Workspace>> {
        self.inner.get_by_root(root_path).await
    }

    async fn update_metadata(&self, id: &str, update: MetadataUpdate) -> Result<Workspace> {
        self.inner.update_metadata(id, update).await
    }

    async fn remove(&self, id: &str) -> Result<()> {
        self.inner.remove(id).await
    }

    async fn list(&self) -> Result<Vec<Workspace>> {
        self.inner.list().await
    }

    async fn active(&self) -> Result<Option<Workspace>> {
        if self.fail_active.load(Ordering::SeqCst) {
            return Err(Error::Internal("registry is locked".to_string()));
        }
        self.inner.active().await
    }

    async fn set_active(&self, id: Option<&str>) -> Result<()> {
        self.inner.set_active(id).await
    }
}

pub struct FakeNetwork {
    pub online: AtomicBool,
}

impl Default for FakeNetwork {
    fn default() -> Self {
        Self {
            online: AtomicBool::new(true),
        }
    }
}

#[async_trait]
impl NetworkProbe for FakeNetwork {
    async fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct FakePreferences {
    pub user_info: Mutex<Option<GitUserInfo>>,
    pub branch: Mutex<Option<String>>,
}

#[async_trait]
impl Preferences for FakePreferences {
    async fn user_info(&self) -> Option<GitUserInfo> {
        self.user_info.lock().unwrap().clone()
    }

    async fn branch_preference(&self, _storage: StorageMode) -> Option<String> {
        self.branch.lock().unwrap().clone()
    }
}

pub fn test_user() -> GitUserInfo {
    GitUserInfo::new("alice", "token-123")
}

/// Short intervals so tests settle quickly
pub fn test_config(temp: &TempDir) -> OrchestratorConfig {
    OrchestratorConfig {
        readiness_grace: Duration::from_millis(10),
        stop_timeout: Duration::from_millis(300),
        stop_settle: Duration::from_millis(5),
        stop_all_settle: Duration::from_millis(5),
        sync_debounce: Duration::from_millis(100),
        log_directory: temp.path().join("logs"),
        ..Default::default()
    }
}

/// An orchestrator wired to fakes around a temporary directory
pub struct Harness {
    pub temp: TempDir,
    pub registry: Arc<FakeRegistry>,
    pub spawner: Arc<FakeSpawner>,
    pub vcs: Arc<FakeVcs>,
    pub views: Arc<FakeViews>,
    pub confirmation: Arc<FakeConfirmation>,
    pub notifier: Arc<FakeNotifier>,
    pub network: Arc<FakeNetwork>,
    pub preferences: Arc<FakePreferences>,
    pub orchestrator: Orchestrator,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(adjust: impl FnOnce(&mut OrchestratorConfig)) -> Self {
        let temp = TempDir::new().unwrap();
        let mut config = test_config(&temp);
        adjust(&mut config);

        let registry = Arc::new(FakeRegistry::default());
        let spawner = Arc::new(FakeSpawner::default());
        let vcs = Arc::new(FakeVcs::default());
        let views = Arc::new(FakeViews::default());
        let confirmation = Arc::new(FakeConfirmation::default());
        let notifier = Arc::new(FakeNotifier::default());
        let network = Arc::new(FakeNetwork::default());
        let preferences = Arc::new(FakePreferences::default());

        let collaborators = Collaborators {
            registry: registry.clone(),
            vcs: vcs.clone(),
            preferences: preferences.clone(),
            views: views.clone(),
            confirmation: confirmation.clone(),
            notifier: notifier.clone(),
            network: network.clone(),
            spawner: spawner.clone(),
        };
        let orchestrator = Orchestrator::new(collaborators, config).unwrap();

        Self {
            temp,
            registry,
            spawner,
            vcs,
            views,
            confirmation,
            notifier,
            network,
            preferences,
            orchestrator,
        }
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.temp.path().join(relative)
    }

    pub fn sign_in(&self) {
        *self.preferences.user_info.lock().unwrap() = Some(test_user());
    }

    /// Create a local main workspace scaffolded under the temp directory
    pub async fn create_main(&self, folder: &str) -> Workspace {
        self.orchestrator
            .create_workspace(CreationRequest {
                config: NewWorkspaceConfig::local_main(self.path(folder), 5212),
                source: FolderSource::Scaffold,
                start: false,
            })
            .await
            .unwrap()
    }

    /// Create a local sub-workspace of `main` with an optional tag
    pub async fn create_sub(&self, main: &Workspace, folder: &str, tag: Option<&str>) -> Workspace {
        self.orchestrator
            .create_workspace(CreationRequest {
                config: NewWorkspaceConfig::local_sub(
                    self.path(folder),
                    main.id.clone(),
                    tag.map(str::to_string),
                ),
                source: FolderSource::CreateSub,
                start: false,
            })
            .await
            .unwrap()
    }

    pub async fn record(&self, id: &str) -> Option<Workspace> {
        self.registry.get(id).await.unwrap()
    }
}
