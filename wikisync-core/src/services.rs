//! Collaborator traits
//!
//! The orchestrator never reaches for ambient singletons; every external
//! capability it needs is one of these traits, injected at construction.

use crate::workspace::{GitUserInfo, MetadataUpdate, NewWorkspaceConfig, StorageMode, Workspace};
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Persistent set of workspace records and the active-workspace pointer
#[async_trait]
pub trait WorkspaceRegistry: Send + Sync {
    /// Create and persist a new record
    async fn create(&self, config: NewWorkspaceConfig) -> Result<Workspace>;

    async fn get(&self, id: &str) -> Result<Option<Workspace>>;

    async fn get_by_root(&self, root_path: &Path) -> Result<Option<Workspace>>;

    /// Apply a metadata change and return the updated record
    async fn update_metadata(&self, id: &str, update: MetadataUpdate) -> Result<Workspace>;

    async fn remove(&self, id: &str) -> Result<()>;

    /// All records in creation order
    async fn list(&self) -> Result<Vec<Workspace>>;

    async fn active(&self) -> Result<Option<Workspace>>;

    /// Point the active workspace at `id`, or clear it
    async fn set_active(&self, id: Option<&str>) -> Result<()>;

    /// Sub-workspaces linked into the main workspace `main_id`
    async fn sub_workspaces(&self, main_id: &str) -> Result<Vec<Workspace>> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|workspace| workspace.main_workspace_id.as_deref() == Some(main_id))
            .collect())
    }

    async fn first(&self) -> Result<Option<Workspace>> {
        Ok(self.list().await?.into_iter().next())
    }
}

/// How a fresh repository should be initialized
#[derive(Debug, Clone, PartialEq)]
pub enum VersionControlInit<'a> {
    /// History only, no remote
    Local,
    /// History plus an `origin` remote pushed with `user_info`
    Synced {
        is_main: bool,
        remote_url: &'a str,
        user_info: &'a GitUserInfo,
    },
}

/// Version control as an opaque capability
#[async_trait]
pub trait VersionControl: Send + Sync {
    async fn has_version_control(&self, path: &Path) -> Result<bool>;

    async fn initialize(&self, path: &Path, init: VersionControlInit<'_>) -> Result<()>;

    async fn clone_repository(
        &self,
        remote_url: &str,
        path: &Path,
        user_info: &GitUserInfo,
    ) -> Result<()>;

    /// Commit pending changes and sync them with the remote
    async fn debounced_commit_and_sync(
        &self,
        path: &Path,
        remote_url: &str,
        user_info: &GitUserInfo,
    ) -> Result<()>;

    /// Sync only if there is something to push or pull
    async fn sync_if_needed(
        &self,
        workspace: &Workspace,
        user_info: Option<&GitUserInfo>,
    ) -> Result<()>;

    async fn set_branch_preference(&self, path: &Path, branch: &str) -> Result<()>;
}

/// Stored user preferences the orchestrator consults
#[async_trait]
pub trait Preferences: Send + Sync {
    /// Credentials for synced workspaces, if the user signed in
    async fn user_info(&self) -> Option<GitUserInfo>;

    /// Branch the user picked for a storage mode
    async fn branch_preference(&self, storage: StorageMode) -> Option<String>;
}

/// Presentation layer hooks
#[async_trait]
pub trait ViewService: Send + Sync {
    /// Ask every open view to reload
    async fn refresh_all(&self);

    async fn remove_workspace_view(&self, workspace_id: &str) -> Result<()>;

    async fn set_active_workspace_view(&self, workspace_id: &str) -> Result<()>;
}

/// Outcome of the removal confirmation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemovalChoice {
    Cancel,
    RemoveRecord,
    RemoveRecordAndFiles,
}

impl RemovalChoice {
    pub fn deletes_files(&self) -> bool {
        matches!(self, RemovalChoice::RemoveRecordAndFiles)
    }
}

/// Outcome of the missing-folder prompt raised by a worker start
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MissingFolderChoice {
    RemoveWorkspace,
    Ignore,
}

/// Interactive prompts for destructive operations and fatal path errors
#[async_trait]
pub trait Confirmation: Send + Sync {
    async fn confirm_removal(&self, workspace: &Workspace) -> RemovalChoice;

    async fn missing_workspace_folder(&self, workspace: &Workspace) -> MissingFolderChoice;

    /// Show a message that needs no answer
    async fn show_error(&self, title: &str, message: &str);
}

/// Fire-and-forget user notifications
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, title: &str) -> Result<()>;
}

/// Network reachability
#[async_trait]
pub trait NetworkProbe: Send + Sync {
    async fn is_online(&self) -> bool;
}
