//! Workspace removal
//!
//! Removal stops the worker and watcher, detaches a sub-workspace from
//! its main workspace, removes sub-workspaces of a main workspace first,
//! and finally drops the view binding and the registry record.

use crate::content_index::{MembershipChange, SubWorkspaceIndex};
use crate::layout::WorkspaceLayout;
use crate::watch::WatchCoordinator;
use crate::worker::WorkerManager;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use wikisync_core::services::{Confirmation, RemovalChoice, ViewService, WorkspaceRegistry};
use wikisync_core::{Error, Result, Workspace};

/// How a removal ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalOutcome {
    /// The user cancelled, nothing changed
    Cancelled,
    Removed,
    /// Dropping the view, the record or the active pointer failed; logged
    Incomplete,
}

pub struct WorkspaceRemoval {
    registry: Arc<dyn WorkspaceRegistry>,
    workers: Arc<WorkerManager>,
    watches: Arc<WatchCoordinator>,
    views: Arc<dyn ViewService>,
    confirmation: Arc<dyn Confirmation>,
    layout: WorkspaceLayout,
}

impl WorkspaceRemoval {
    pub fn new(
        registry: Arc<dyn WorkspaceRegistry>,
        workers: Arc<WorkerManager>,
        watches: Arc<WatchCoordinator>,
        views: Arc<dyn ViewService>,
        confirmation: Arc<dyn Confirmation>,
        layout: WorkspaceLayout,
    ) -> Self {
        Self {
            registry,
            workers,
            watches,
            views,
            confirmation,
            layout,
        }
    }

    /// Ask for confirmation, then remove the workspace `id`
    pub async fn remove_workspace(&self, id: &str) -> Result<RemovalOutcome> {
        let workspace = self.lookup(id).await?;
        let choice = self.confirmation.confirm_removal(&workspace).await;
        if choice == RemovalChoice::Cancel {
            info!(workspace_id = %id, "Workspace removal cancelled");
            return Ok(RemovalOutcome::Cancelled);
        }
        self.remove_with_choice(id, choice).await
    }

    /// Remove without prompting; sub-workspaces of a main inherit `choice`
    ///
    /// When the active workspace is among those removed, the first
    /// remaining workspace becomes active once the whole removal is done.
    pub async fn remove_with_choice(
        &self,
        id: &str,
        choice: RemovalChoice,
    ) -> Result<RemovalOutcome> {
        if choice == RemovalChoice::Cancel {
            return Ok(RemovalOutcome::Cancelled);
        }
        let workspace = self.lookup(id).await?;
        let active_removed = match self.registry.active().await {
            Ok(Some(active)) => {
                active.id == workspace.id
                    || active.main_workspace_id.as_deref() == Some(workspace.id.as_str())
            }
            Ok(None) => false,
            Err(e) => {
                warn!("Failed to read active workspace: {}", e);
                false
            }
        };

        let outcome = self.remove_recursive(workspace, choice).await?;

        // a record that survived an incomplete removal keeps the active pointer
        if active_removed && matches!(self.registry.active().await, Ok(None)) {
            if let Err(e) = self.activate_first_remaining().await {
                error!("Failed to switch active workspace: {}", e);
                return Ok(RemovalOutcome::Incomplete);
            }
        }
        Ok(outcome)
    }

    fn remove_recursive(
        &self,
        workspace: Workspace,
        choice: RemovalChoice,
    ) -> BoxFuture<'_, Result<RemovalOutcome>> {
        async move {
            info!(
                workspace_id = %workspace.id,
                root_path = %workspace.root_path.display(),
                delete_files = choice.deletes_files(),
                "Removing workspace"
            );

            if let Err(e) = self.workers.stop(&workspace.root_path).await {
                error!(workspace_id = %workspace.id, "Failed to stop worker: {}", e);
            }
            if self.watches.is_watching(&workspace.root_path).await {
                self.watches.stop_watch(&workspace.root_path).await;
            }

            if workspace.is_sub_workspace {
                self.detach_sub_workspace(&workspace).await;
            } else {
                for sub in self.sub_workspaces_of(&workspace).await {
                    let sub_id = sub.id.clone();
                    match self.remove_recursive(sub, choice).await {
                        Ok(outcome) => {
                            debug!(workspace_id = %sub_id, ?outcome, "Sub-workspace removed")
                        }
                        Err(e) => error!(
                            workspace_id = %sub_id,
                            "Failed to remove sub-workspace: {}", e
                        ),
                    }
                }
            }

            if choice.deletes_files() {
                if let Err(e) = self.layout.remove_tree(&workspace.root_path).await {
                    error!(workspace_id = %workspace.id, "Failed to delete files: {}", e);
                }
            }

            if let Err(e) = self.views.remove_workspace_view(&workspace.id).await {
                error!(workspace_id = %workspace.id, "Failed to remove workspace view: {}", e);
                return Ok(RemovalOutcome::Incomplete);
            }
            if let Err(e) = self.registry.remove(&workspace.id).await {
                error!(workspace_id = %workspace.id, "Failed to remove workspace record: {}", e);
                return Ok(RemovalOutcome::Incomplete);
            }

            info!(workspace_id = %workspace.id, "Workspace removed");
            Ok(RemovalOutcome::Removed)
        }
        .boxed()
    }

    async fn lookup(&self, id: &str) -> Result<Workspace> {
        self.registry
            .get(id)
            .await?
            .ok_or_else(|| Error::not_found("workspace", id))
    }

    async fn sub_workspaces_of(&self, main: &Workspace) -> Vec<Workspace> {
        match self.registry.sub_workspaces(&main.id).await {
            Ok(subs) => subs,
            Err(e) => {
                error!(workspace_id = %main.id, "Failed to list sub-workspaces: {}", e);
                Vec::new()
            }
        }
    }

    async fn detach_sub_workspace(&self, sub: &Workspace) {
        let main = match &sub.main_workspace_id {
            Some(main_id) => self.registry.get(main_id).await.ok().flatten(),
            None => None,
        };
        let (Some(main), Some(folder)) = (main, sub.folder_name()) else {
            warn!(workspace_id = %sub.id, "Main workspace not found, no link to remove");
            return;
        };

        if let Err(e) = self.layout.unlink_sub_workspace(&main.root_path, &folder).await {
            error!(workspace_id = %sub.id, "Failed to remove sub-workspace link: {}", e);
        }
        let index = SubWorkspaceIndex::for_main(&self.layout, &main.root_path);
        if let Err(e) = index.apply(&MembershipChange::Removed { folder }).await {
            error!(workspace_id = %sub.id, "Failed to update sub-workspace index: {}", e);
        }
    }

    async fn activate_first_remaining(&self) -> Result<()> {
        match self.registry.first().await? {
            Some(next) => {
                self.registry.set_active(Some(&next.id)).await?;
                self.views.set_active_workspace_view(&next.id).await?;
                info!(workspace_id = %next.id, "Switched active workspace");
            }
            None => {
                self.registry.set_active(None).await?;
                info!("No workspaces left to activate");
            }
        }
        Ok(())
    }
}
