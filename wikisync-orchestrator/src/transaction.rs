//! Transactional workspace creation
//!
//! Creation runs a fixed sequence of steps anchored on the registry
//! record. Any failure once the folder is prepared rolls back: the record
//! is removed if it exists, the previous active workspace restored, and
//! the created tree (main) or link (sub) deleted.

use crate::layout::WorkspaceLayout;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use wikisync_core::services::{Preferences, VersionControl, VersionControlInit, WorkspaceRegistry};
use wikisync_core::workspace::require_sync_credentials;
use wikisync_core::{Error, GitUserInfo, NewWorkspaceConfig, Result, StorageMode, Workspace};

/// Progress of one creation transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreationStage {
    Requested,
    WorkspaceRecordCreated,
    ActiveWorkspaceSet,
    VersionControlChecked,
    VersionControlInitialized,
    VersionControlSkipped,
    Committed,
    RollingBack,
    Failed,
}

impl std::fmt::Display for CreationStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CreationStage::Requested => "requested",
            CreationStage::WorkspaceRecordCreated => "workspace record created",
            CreationStage::ActiveWorkspaceSet => "active workspace set",
            CreationStage::VersionControlChecked => "version control checked",
            CreationStage::VersionControlInitialized => "version control initialized",
            CreationStage::VersionControlSkipped => "version control skipped",
            CreationStage::Committed => "committed",
            CreationStage::RollingBack => "rolling back",
            CreationStage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// What a rollback may do to the workspace folder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackCleanup {
    /// The folder was created for this workspace and goes with it
    DeleteCreatedTree,
    /// The folder was imported and must survive a failed creation
    KeepExistingTree,
}

/// Folder state a rollback has to undo
struct PreparedFolder {
    root_path: PathBuf,
    main_workspace_id: Option<String>,
    is_sub_workspace: bool,
    cleanup: RollbackCleanup,
}

impl PreparedFolder {
    fn new(config: &NewWorkspaceConfig, cleanup: RollbackCleanup) -> Self {
        Self {
            root_path: config.root_path.clone(),
            main_workspace_id: config.main_workspace_id.clone(),
            is_sub_workspace: config.is_sub_workspace,
            cleanup,
        }
    }
}

/// Runs creation transactions against the registry and version control
pub struct WorkspaceTransactions {
    registry: Arc<dyn WorkspaceRegistry>,
    vcs: Arc<dyn VersionControl>,
    preferences: Arc<dyn Preferences>,
    layout: WorkspaceLayout,
}

impl WorkspaceTransactions {
    pub fn new(
        registry: Arc<dyn WorkspaceRegistry>,
        vcs: Arc<dyn VersionControl>,
        preferences: Arc<dyn Preferences>,
        layout: WorkspaceLayout,
    ) -> Self {
        Self {
            registry,
            vcs,
            preferences,
            layout,
        }
    }

    /// Create a workspace record and initialize its version control
    ///
    /// Request and credential problems fail before anything is written.
    /// Any later failure, including one creating the record, cleans up the
    /// prepared folder and returns `TransactionFailed`, or `RollbackFailed`
    /// when cleaning up did not succeed either.
    pub async fn create_workspace_transaction(
        &self,
        config: NewWorkspaceConfig,
        user_info: Option<&GitUserInfo>,
        cleanup: RollbackCleanup,
    ) -> Result<Workspace> {
        config.validate()?;
        if config.storage.is_synced() {
            require_sync_credentials(config.remote_url.as_deref(), user_info)?;
        }

        let mut stage = CreationStage::Requested;
        info!(
            root_path = %config.root_path.display(),
            storage = %config.storage,
            "Creating workspace"
        );

        let folder = PreparedFolder::new(&config, cleanup);
        let previous_active = match self.registry.active().await {
            Ok(active) => active.map(|workspace| workspace.id),
            Err(cause) => return Err(self.abandon(&folder, cause).await),
        };
        let workspace = match self.registry.create(config).await {
            Ok(workspace) => workspace,
            Err(cause) => return Err(self.abandon(&folder, cause).await),
        };
        advance(&mut stage, CreationStage::WorkspaceRecordCreated, &workspace);

        match self.run_steps(&workspace, user_info, &mut stage).await {
            Ok(()) => {
                advance(&mut stage, CreationStage::Committed, &workspace);
                let stored = self.registry.get(&workspace.id).await?;
                Ok(stored.unwrap_or(workspace))
            }
            Err(cause) => {
                error!(
                    workspace_id = %workspace.id,
                    "Workspace creation failed at stage '{}': {}", stage, cause
                );
                advance(&mut stage, CreationStage::RollingBack, &workspace);
                let result = self
                    .rollback(&workspace, previous_active.as_deref(), &folder)
                    .await;
                advance(&mut stage, CreationStage::Failed, &workspace);
                Err(transaction_error(cause, result))
            }
        }
    }

    /// Clean up a prepared folder when no record could be created
    async fn abandon(&self, folder: &PreparedFolder, cause: Error) -> Error {
        error!(
            root_path = %folder.root_path.display(),
            "Workspace record could not be created: {}", cause
        );
        let mut failures = Vec::new();
        self.clean_up_folder(folder, &mut failures).await;
        transaction_error(cause, report_cleanup(&folder.root_path, failures))
    }

    async fn run_steps(
        &self,
        workspace: &Workspace,
        user_info: Option<&GitUserInfo>,
        stage: &mut CreationStage,
    ) -> Result<()> {
        self.registry.set_active(Some(&workspace.id)).await?;
        advance(stage, CreationStage::ActiveWorkspaceSet, workspace);

        let has_version_control = self.vcs.has_version_control(&workspace.root_path).await?;
        advance(stage, CreationStage::VersionControlChecked, workspace);
        if has_version_control {
            info!(
                workspace_id = %workspace.id,
                "Folder already under version control, skipping initialization"
            );
            advance(stage, CreationStage::VersionControlSkipped, workspace);
            return Ok(());
        }

        match workspace.storage {
            StorageMode::Synced => {
                let (remote_url, user_info) =
                    require_sync_credentials(workspace.remote_url.as_deref(), user_info)?;
                self.vcs
                    .initialize(
                        &workspace.root_path,
                        VersionControlInit::Synced {
                            is_main: workspace.is_main(),
                            remote_url,
                            user_info,
                        },
                    )
                    .await?;
                self.apply_branch_preference(workspace, user_info).await;
            }
            StorageMode::Local => {
                self.vcs
                    .initialize(&workspace.root_path, VersionControlInit::Local)
                    .await?;
            }
        }
        advance(stage, CreationStage::VersionControlInitialized, workspace);
        Ok(())
    }

    async fn apply_branch_preference(&self, workspace: &Workspace, user_info: &GitUserInfo) {
        let branch = match self.preferences.branch_preference(workspace.storage).await {
            Some(branch) => branch,
            None => match &user_info.branch {
                Some(branch) => branch.clone(),
                None => return,
            },
        };
        if let Err(e) = self
            .vcs
            .set_branch_preference(&workspace.root_path, &branch)
            .await
        {
            warn!(
                workspace_id = %workspace.id,
                "Failed to apply branch preference '{}': {}", branch, e
            );
        }
    }

    /// Undo a partial creation, returning the cleanup failure if any
    async fn rollback(
        &self,
        workspace: &Workspace,
        previous_active: Option<&str>,
        folder: &PreparedFolder,
    ) -> std::result::Result<(), String> {
        let mut failures = Vec::new();

        if let Err(e) = self.registry.remove(&workspace.id).await {
            failures.push(format!("remove workspace record: {}", e));
        }
        if let Err(e) = self.registry.set_active(previous_active).await {
            warn!("Failed to restore previous active workspace: {}", e);
        }
        self.clean_up_folder(folder, &mut failures).await;

        let result = report_cleanup(&workspace.root_path, failures);
        if result.is_ok() {
            info!(workspace_id = %workspace.id, "Workspace creation rolled back");
        }
        result
    }

    /// Remove the link of a sub-workspace, or the created tree of a main
    async fn clean_up_folder(&self, folder: &PreparedFolder, failures: &mut Vec<String>) {
        if folder.is_sub_workspace {
            let main_root = match &folder.main_workspace_id {
                Some(main_id) => match self.registry.get(main_id).await {
                    Ok(main) => main.map(|main| main.root_path),
                    Err(e) => {
                        failures.push(format!("look up main workspace {}: {}", main_id, e));
                        return;
                    }
                },
                None => None,
            };
            let folder_name = folder
                .root_path
                .file_name()
                .map(|name| name.to_string_lossy().to_string());
            match (main_root, folder_name) {
                (Some(main_root), Some(folder_name)) => {
                    if let Err(e) = self
                        .layout
                        .unlink_sub_workspace(&main_root, &folder_name)
                        .await
                    {
                        failures.push(format!("remove sub-workspace link: {}", e));
                    }
                }
                _ => failures.push("locate sub-workspace link".to_string()),
            }
        } else if folder.cleanup == RollbackCleanup::DeleteCreatedTree {
            if let Err(e) = self.layout.remove_tree(&folder.root_path).await {
                failures.push(format!("delete workspace folder: {}", e));
            }
        } else {
            debug!("Keeping imported folder {}", folder.root_path.display());
        }
    }
}

fn report_cleanup(
    root_path: &Path,
    failures: Vec<String>,
) -> std::result::Result<(), String> {
    if failures.is_empty() {
        return Ok(());
    }
    let message = failures.join("; ");
    error!(
        root_path = %root_path.display(),
        "Rollback incomplete, manual cleanup required: {}", message
    );
    Err(message)
}

fn transaction_error(cause: Error, cleanup: std::result::Result<(), String>) -> Error {
    match cleanup {
        Ok(()) => Error::TransactionFailed {
            message: cause.to_string(),
        },
        Err(message) => Error::RollbackFailed { message },
    }
}

fn advance(stage: &mut CreationStage, next: CreationStage, workspace: &Workspace) {
    debug!(workspace_id = %workspace.id, from = %stage, to = %next, "Creation stage");
    *stage = next;
}
