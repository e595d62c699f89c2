//! The orchestrator value
//!
//! [`Orchestrator`] owns the worker manager, the watch coordinator, the
//! sync locks and the transaction machinery, and is handed to every
//! caller explicitly. Collaborators come in through [`Collaborators`].

use crate::content_index::{MembershipChange, SubWorkspaceIndex};
use crate::layout::WorkspaceLayout;
use crate::removal::{RemovalOutcome, WorkspaceRemoval};
use crate::shutdown::{ShutdownReport, ShutdownSyncCoordinator};
use crate::sync_lock::SyncLocks;
use crate::transaction::{RollbackCleanup, WorkspaceTransactions};
use crate::watch::WatchCoordinator;
use crate::worker::{StopReport, WorkerManager, WorkerSpawner};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use wikisync_core::services::{
    Confirmation, NetworkProbe, Notifier, Preferences, RemovalChoice, VersionControl,
    ViewService, WorkspaceRegistry,
};
use wikisync_core::workspace::require_sync_credentials;
use wikisync_core::{
    Error, GitUserInfo, NewWorkspaceConfig, OrchestratorConfig, Result, Workspace,
};

/// Stale story list files removed before a worker starts
const STORY_LIST_FILES: &[&str] = &["$__StoryList", "$__StoryList.tid"];

/// External capabilities the orchestrator is built from
#[derive(Clone)]
pub struct Collaborators {
    pub registry: Arc<dyn WorkspaceRegistry>,
    pub vcs: Arc<dyn VersionControl>,
    pub preferences: Arc<dyn Preferences>,
    pub views: Arc<dyn ViewService>,
    pub confirmation: Arc<dyn Confirmation>,
    pub notifier: Arc<dyn Notifier>,
    pub network: Arc<dyn NetworkProbe>,
    pub spawner: Arc<dyn WorkerSpawner>,
}

/// Where the folder of a new workspace comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FolderSource {
    /// Copy the configured template into a new folder
    Scaffold,
    /// Clone the remote into a new folder
    Clone,
    /// Create an empty sub-workspace folder
    CreateSub,
    /// Import an existing main workspace folder
    ExistingMain,
    /// Import an existing sub-workspace folder
    ExistingSub,
}

impl FolderSource {
    fn is_for_sub_workspace(&self) -> bool {
        matches!(self, FolderSource::CreateSub | FolderSource::ExistingSub)
    }

    fn creates_folder(&self) -> bool {
        !matches!(self, FolderSource::ExistingMain | FolderSource::ExistingSub)
    }
}

/// A complete request to create a workspace
#[derive(Debug, Clone)]
pub struct CreationRequest {
    pub config: NewWorkspaceConfig,
    pub source: FolderSource,
    /// Start the worker (and watcher) once the workspace exists
    pub start: bool,
}

pub struct Orchestrator {
    config: OrchestratorConfig,
    layout: WorkspaceLayout,
    registry: Arc<dyn WorkspaceRegistry>,
    vcs: Arc<dyn VersionControl>,
    preferences: Arc<dyn Preferences>,
    workers: Arc<WorkerManager>,
    watches: Arc<WatchCoordinator>,
    transactions: WorkspaceTransactions,
    removal: WorkspaceRemoval,
    shutdown_sync: Arc<ShutdownSyncCoordinator>,
    /// When each main workspace was last started by a startup flow
    recent_starts: Mutex<HashMap<PathBuf, Instant>>,
}

impl Orchestrator {
    pub fn new(collaborators: Collaborators, config: OrchestratorConfig) -> Result<Self> {
        config.validate()?;
        let layout = WorkspaceLayout::new(&config);
        let Collaborators {
            registry,
            vcs,
            preferences,
            views,
            confirmation,
            notifier,
            network,
            spawner,
        } = collaborators;

        let workers = Arc::new(WorkerManager::new(
            spawner,
            registry.clone(),
            views.clone(),
            confirmation.clone(),
            config.clone(),
        ));
        let sync_locks = SyncLocks::new();
        let watches = Arc::new(WatchCoordinator::new(
            vcs.clone(),
            sync_locks.clone(),
            config.sync_debounce,
        ));
        let transactions = WorkspaceTransactions::new(
            registry.clone(),
            vcs.clone(),
            preferences.clone(),
            layout.clone(),
        );
        let removal = WorkspaceRemoval::new(
            registry.clone(),
            workers.clone(),
            watches.clone(),
            views,
            confirmation,
            layout.clone(),
        );
        let shutdown_sync = Arc::new(ShutdownSyncCoordinator::new(
            registry.clone(),
            vcs.clone(),
            preferences.clone(),
            network,
            notifier,
            sync_locks,
        ));

        Ok(Self {
            config,
            layout,
            registry,
            vcs,
            preferences,
            workers,
            watches,
            transactions,
            removal,
            shutdown_sync,
            recent_starts: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn layout(&self) -> &WorkspaceLayout {
        &self.layout
    }

    pub fn registry(&self) -> &Arc<dyn WorkspaceRegistry> {
        &self.registry
    }

    pub fn workers(&self) -> &Arc<WorkerManager> {
        &self.workers
    }

    pub fn watches(&self) -> &Arc<WatchCoordinator> {
        &self.watches
    }

    pub fn shutdown_sync(&self) -> &Arc<ShutdownSyncCoordinator> {
        &self.shutdown_sync
    }

    /// Prepare the folder, run the creation transaction and record membership
    pub async fn create_workspace(&self, request: CreationRequest) -> Result<Workspace> {
        let CreationRequest {
            config,
            source,
            start,
        } = request;
        config.validate()?;

        if source.is_for_sub_workspace() != config.is_sub_workspace {
            return Err(Error::validation(format!(
                "{:?} does not apply to a {} workspace",
                source,
                if config.is_sub_workspace { "sub" } else { "main" }
            )));
        }

        let user_info = self.preferences.user_info().await;
        if config.storage.is_synced() || source == FolderSource::Clone {
            require_sync_credentials(config.remote_url.as_deref(), user_info.as_ref())?;
        }

        let main = match &config.main_workspace_id {
            Some(main_id) if config.is_sub_workspace => Some(
                self.registry
                    .get(main_id)
                    .await?
                    .filter(Workspace::is_main)
                    .ok_or_else(|| {
                        Error::validation(format!("Main workspace {} does not exist", main_id))
                    })?,
            ),
            _ => None,
        };

        let root_path = config.root_path.clone();
        if self.registry.get_by_root(&root_path).await?.is_some() {
            return Err(Error::already_exists(
                "workspace",
                root_path.display().to_string(),
            ));
        }
        self.prepare_folder(&config, source, user_info.as_ref())
            .await?;

        if let Some(main) = &main {
            if let Err(cause) = self.layout.link_sub_workspace(&main.root_path, &root_path).await {
                if !source.creates_folder() {
                    return Err(cause);
                }
                return Err(self.discard_created_folder(&root_path, cause).await);
            }
        }

        let cleanup = if source.creates_folder() {
            RollbackCleanup::DeleteCreatedTree
        } else {
            RollbackCleanup::KeepExistingTree
        };
        let workspace = self
            .transactions
            .create_workspace_transaction(config, user_info.as_ref(), cleanup)
            .await?;

        if let (Some(main), Some(tag), Some(folder)) =
            (&main, &workspace.tag_name, workspace.folder_name())
        {
            let index = SubWorkspaceIndex::for_main(&self.layout, &main.root_path);
            let change = MembershipChange::Added {
                tag: tag.clone(),
                folder,
            };
            if let Err(e) = index.apply(&change).await {
                error!(workspace_id = %workspace.id, "Failed to record sub-workspace tag: {}", e);
            }
        }

        info!(
            workspace_id = %workspace.id,
            root_path = %workspace.root_path.display(),
            notice = true,
            "Workspace created"
        );

        if start {
            self.startup_workspace(&workspace).await?;
        }
        Ok(workspace)
    }

    async fn prepare_folder(
        &self,
        config: &NewWorkspaceConfig,
        source: FolderSource,
        user_info: Option<&GitUserInfo>,
    ) -> Result<()> {
        let root_path = &config.root_path;
        if !source.creates_folder() {
            return self
                .layout
                .ensure_workspace_exists(root_path, !config.is_sub_workspace)
                .await;
        }

        let (parent, folder) = split_root(root_path)?;
        match source {
            FolderSource::Scaffold => {
                self.layout.scaffold_from_template(parent, &folder).await?;
            }
            FolderSource::CreateSub => {
                self.layout.create_folder(parent, &folder).await?;
            }
            FolderSource::Clone => {
                let (remote_url, user_info) =
                    require_sync_credentials(config.remote_url.as_deref(), user_info)?;
                self.layout.create_folder(parent, &folder).await?;
                if let Err(e) = self
                    .vcs
                    .clone_repository(remote_url, root_path, user_info)
                    .await
                {
                    return Err(self.discard_created_folder(root_path, e).await);
                }
            }
            FolderSource::ExistingMain | FolderSource::ExistingSub => {}
        }
        Ok(())
    }

    /// Delete a folder created for a workspace that was never recorded
    ///
    /// Returns `cause` unchanged, or `RollbackFailed` if the folder stays.
    async fn discard_created_folder(&self, root_path: &Path, cause: Error) -> Error {
        match self.layout.remove_tree(root_path).await {
            Ok(()) => cause,
            Err(e) => {
                error!(
                    root_path = %root_path.display(),
                    "Failed to delete folder after '{}': {}", cause, e
                );
                Error::RollbackFailed {
                    message: format!("{}; delete workspace folder: {}", cause, e),
                }
            }
        }
    }

    /// Bring a workspace up: worker for a main workspace, watcher when synced
    pub async fn startup_workspace(&self, workspace: &Workspace) -> Result<()> {
        let user_info = self.preferences.user_info().await;
        if workspace.is_main() {
            return self.start_main(workspace, user_info.as_ref()).await;
        }

        if let (true, Some(remote_url), Some(info)) = (
            workspace.is_synced(),
            workspace.remote_url.as_deref(),
            user_info.as_ref(),
        ) {
            self.watches
                .watch(&workspace.root_path, remote_url, info, None)
                .await?;
        }

        let Some(main_id) = &workspace.main_workspace_id else {
            return Ok(());
        };
        let Some(main) = self.registry.get(main_id).await? else {
            warn!(workspace_id = %workspace.id, "Main workspace {} not found", main_id);
            return Ok(());
        };
        if self.started_recently(&main.root_path) {
            debug!(
                workspace_id = %main.id,
                "Main workspace started recently, not restarting it"
            );
            return Ok(());
        }

        info!(workspace_id = %main.id, "Restarting main workspace to pick up sub-workspace");
        if self.watches.is_watching(&main.root_path).await {
            self.watches.stop_watch(&main.root_path).await;
        }
        self.workers.stop(&main.root_path).await?;
        self.start_main(&main, user_info.as_ref()).await
    }

    async fn start_main(&self, main: &Workspace, user_info: Option<&GitUserInfo>) -> Result<()> {
        self.remove_stale_story_list(main).await;
        self.recent_starts
            .lock()
            .insert(main.root_path.clone(), Instant::now());
        self.workers.start(main).await?;

        if let (true, Some(remote_url), Some(info)) =
            (main.is_synced(), main.remote_url.as_deref(), user_info)
        {
            let content = self.layout.content_path(&main.root_path);
            self.watches
                .watch(&main.root_path, remote_url, info, Some(&content))
                .await?;
        }
        Ok(())
    }

    fn started_recently(&self, root_path: &Path) -> bool {
        self.recent_starts
            .lock()
            .get(root_path)
            .is_some_and(|started| started.elapsed() < self.config.startup_restart_cooldown)
    }

    async fn remove_stale_story_list(&self, workspace: &Workspace) {
        let content = self.layout.content_path(&workspace.root_path);
        for name in STORY_LIST_FILES {
            let path = content.join(name);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => debug!("Removed stale {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => debug!("Could not remove {}: {}", path.display(), e),
            }
        }
    }

    /// Start every workspace that is not hibernated, main workspaces first
    pub async fn start_all(&self) -> Vec<(String, Error)> {
        let workspaces = match self.registry.list().await {
            Ok(workspaces) => workspaces,
            Err(e) => {
                error!("Failed to list workspaces: {}", e);
                return Vec::new();
            }
        };
        let (mains, subs): (Vec<Workspace>, Vec<Workspace>) = workspaces
            .into_iter()
            .filter(|workspace| !workspace.hibernated)
            .partition(Workspace::is_main);

        let mut failures = Vec::new();
        for workspace in mains.iter().chain(subs.iter()) {
            if let Err(e) = self.startup_workspace(workspace).await {
                error!(workspace_id = %workspace.id, "Failed to start workspace: {}", e);
                failures.push((workspace.id.clone(), e));
            }
        }
        info!(
            started = mains.len() + subs.len() - failures.len(),
            failed = failures.len(),
            "Workspace startup finished"
        );
        failures
    }

    /// Ask for confirmation and remove a workspace
    pub async fn remove_workspace(&self, id: &str) -> Result<RemovalOutcome> {
        self.removal.remove_workspace(id).await
    }

    /// Remove a workspace with an already made choice
    pub async fn remove_workspace_with_choice(
        &self,
        id: &str,
        choice: RemovalChoice,
    ) -> Result<RemovalOutcome> {
        self.removal.remove_with_choice(id, choice).await
    }

    /// Link an existing sub-workspace into its main workspace again
    pub async fn link_sub_workspace(&self, sub: &Workspace) -> Result<PathBuf> {
        let main = self.main_of(sub).await?;
        self.layout
            .link_sub_workspace(&main.root_path, &sub.root_path)
            .await
    }

    /// Remove the link of a sub-workspace from its main workspace
    pub async fn unlink_sub_workspace(&self, sub: &Workspace) -> Result<()> {
        let main = self.main_of(sub).await?;
        let folder = sub
            .folder_name()
            .ok_or_else(|| Error::validation("Sub-workspace has no folder name"))?;
        self.layout
            .unlink_sub_workspace(&main.root_path, &folder)
            .await
    }

    async fn main_of(&self, sub: &Workspace) -> Result<Workspace> {
        let main_id = sub
            .main_workspace_id
            .as_deref()
            .ok_or_else(|| Error::validation("Workspace is not a sub-workspace"))?;
        self.registry
            .get(main_id)
            .await?
            .ok_or_else(|| Error::not_found("workspace", main_id))
    }

    /// Drain pending syncs; never fails
    pub async fn sync_before_shutdown(&self) -> ShutdownReport {
        self.shutdown_sync.sync_before_shutdown().await
    }

    /// Close every watcher, let syncs in flight settle, then stop every worker
    pub async fn shutdown(&self) -> StopReport {
        self.watches.stop_all_watches().await;
        let locks = self.watches.sync_locks();
        if locks.held_count() > 0 {
            info!("Waiting for {} sync(s) in flight", locks.held_count());
            locks.wait_idle().await;
        }
        self.workers.stop_all().await
    }
}

fn split_root(root_path: &Path) -> Result<(&Path, String)> {
    match (root_path.parent(), root_path.file_name()) {
        (Some(parent), Some(folder)) => Ok((parent, folder.to_string_lossy().to_string())),
        _ => Err(Error::InvalidWorkspacePath {
            path: root_path.display().to_string(),
        }),
    }
}
