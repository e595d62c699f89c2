//! JSON-file workspace registry
//!
//! Records are kept in memory and, when a path is configured, written back
//! to a pretty-printed `registry.json` after every mutation.

use crate::services::WorkspaceRegistry;
use crate::workspace::{MetadataUpdate, NewWorkspaceConfig, Workspace};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// On-disk shape of the registry file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrySnapshot {
    pub workspaces: Vec<Workspace>,
    pub active_workspace_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Default for RegistrySnapshot {
    fn default() -> Self {
        Self {
            workspaces: Vec::new(),
            active_workspace_id: None,
            updated_at: Utc::now(),
        }
    }
}

/// Workspace registry backed by a JSON file, or by memory only
#[derive(Debug)]
pub struct JsonFileRegistry {
    path: Option<PathBuf>,
    state: RwLock<RegistrySnapshot>,
}

impl JsonFileRegistry {
    /// Registry that never touches the disk
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: RwLock::new(RegistrySnapshot::default()),
        }
    }

    /// Load the registry at `path`, starting empty if the file does not exist yet
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let snapshot = if fs::try_exists(&path).await.unwrap_or(false) {
            let content = fs::read_to_string(&path)
                .await
                .map_err(|e| Error::io("Failed to read registry", &path, e))?;
            serde_json::from_str(&content).map_err(|e| {
                Error::Serialization(format!(
                    "Failed to parse registry {}: {}",
                    path.display(),
                    e
                ))
            })?
        } else {
            debug!("Registry {} not found, starting empty", path.display());
            RegistrySnapshot::default()
        };
        info!(
            "Loaded {} workspace(s) from {}",
            snapshot.workspaces.len(),
            path.display()
        );
        Ok(Self {
            path: Some(path),
            state: RwLock::new(snapshot),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    async fn save(&self, snapshot: &RegistrySnapshot) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::io("Failed to create registry directory", parent, e))?;
        }
        let content = serde_json::to_string_pretty(snapshot)?;
        fs::write(path, content)
            .await
            .map_err(|e| Error::io("Failed to write registry", path, e))
    }
}

#[async_trait]
impl WorkspaceRegistry for JsonFileRegistry {
    async fn create(&self, config: NewWorkspaceConfig) -> Result<Workspace> {
        config.validate()?;
        let mut state = self.state.write().await;

        if state
            .workspaces
            .iter()
            .any(|existing| existing.root_path == config.root_path)
        {
            return Err(Error::already_exists(
                "workspace",
                config.root_path.display().to_string(),
            ));
        }
        if let Some(main_id) = &config.main_workspace_id {
            let main_exists = state
                .workspaces
                .iter()
                .any(|existing| &existing.id == main_id && existing.is_main());
            if !main_exists {
                return Err(Error::validation(format!(
                    "Main workspace {} does not exist",
                    main_id
                )));
            }
        }

        let workspace = Workspace::from_config(config);
        state.workspaces.push(workspace.clone());
        state.updated_at = Utc::now();
        self.save(&state).await?;
        info!(
            workspace_id = %workspace.id,
            root_path = %workspace.root_path.display(),
            "Workspace record created"
        );
        Ok(workspace)
    }

    async fn get(&self, id: &str) -> Result<Option<Workspace>> {
        let state = self.state.read().await;
        Ok(state.workspaces.iter().find(|w| w.id == id).cloned())
    }

    async fn get_by_root(&self, root_path: &Path) -> Result<Option<Workspace>> {
        let state = self.state.read().await;
        Ok(state
            .workspaces
            .iter()
            .find(|w| w.root_path == root_path)
            .cloned())
    }

    async fn update_metadata(&self, id: &str, update: MetadataUpdate) -> Result<Workspace> {
        let mut state = self.state.write().await;
        let workspace = state
            .workspaces
            .iter_mut()
            .find(|w| w.id == id)
            .ok_or_else(|| Error::not_found("workspace", id))?;
        workspace.apply(&update);
        let updated = workspace.clone();
        state.updated_at = Utc::now();
        self.save(&state).await?;
        Ok(updated)
    }

    async fn remove(&self, id: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let before = state.workspaces.len();
        state.workspaces.retain(|w| w.id != id);
        if state.workspaces.len() == before {
            return Err(Error::not_found("workspace", id));
        }
        if state.active_workspace_id.as_deref() == Some(id) {
            state.active_workspace_id = None;
        }
        state.updated_at = Utc::now();
        self.save(&state).await?;
        info!(workspace_id = %id, "Workspace record removed");
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Workspace>> {
        Ok(self.state.read().await.workspaces.clone())
    }

    async fn active(&self) -> Result<Option<Workspace>> {
        let state = self.state.read().await;
        Ok(state
            .active_workspace_id
            .as_ref()
            .and_then(|id| state.workspaces.iter().find(|w| &w.id == id))
            .cloned())
    }

    async fn set_active(&self, id: Option<&str>) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(id) = id {
            if !state.workspaces.iter().any(|w| w.id == id) {
                return Err(Error::not_found("workspace", id));
            }
        }
        state.active_workspace_id = id.map(str::to_string);
        state.updated_at = Utc::now();
        self.save(&state).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_create_and_query() {
        let registry = JsonFileRegistry::in_memory();
        let main = registry
            .create(NewWorkspaceConfig::local_main("/w/main", 5212))
            .await
            .unwrap();
        let sub = registry
            .create(NewWorkspaceConfig::local_sub(
                "/w/sub",
                main.id.clone(),
                Some("project-x".to_string()),
            ))
            .await
            .unwrap();

        assert_eq!(registry.list().await.unwrap().len(), 2);
        assert_eq!(
            registry.get_by_root(Path::new("/w/sub")).await.unwrap(),
            Some(sub.clone())
        );
        let subs = registry.sub_workspaces(&main.id).await.unwrap();
        assert_eq!(subs, vec![sub]);
        assert_eq!(registry.first().await.unwrap().unwrap().id, main.id);
    }

    #[tokio::test]
    async fn test_duplicate_root_rejected() {
        let registry = JsonFileRegistry::in_memory();
        registry
            .create(NewWorkspaceConfig::local_main("/w/main", 5212))
            .await
            .unwrap();
        let result = registry
            .create(NewWorkspaceConfig::local_main("/w/main", 5213))
            .await;
        assert!(matches!(result, Err(Error::AlreadyExists { .. })));
    }

    #[tokio::test]
    async fn test_sub_workspace_needs_existing_main() {
        let registry = JsonFileRegistry::in_memory();
        let result = registry
            .create(NewWorkspaceConfig::local_sub("/w/sub", "missing", None))
            .await;
        assert!(matches!(result, Err(Error::Validation { .. })));
    }

    #[tokio::test]
    async fn test_removing_active_clears_pointer() {
        let registry = JsonFileRegistry::in_memory();
        let main = registry
            .create(NewWorkspaceConfig::local_main("/w/main", 5212))
            .await
            .unwrap();
        registry.set_active(Some(&main.id)).await.unwrap();
        assert_eq!(registry.active().await.unwrap().unwrap().id, main.id);

        registry.remove(&main.id).await.unwrap();
        assert!(registry.active().await.unwrap().is_none());
        assert!(registry.remove(&main.id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_update_metadata() {
        let registry = JsonFileRegistry::in_memory();
        let main = registry
            .create(NewWorkspaceConfig::local_main("/w/main", 5212))
            .await
            .unwrap();
        let updated = registry
            .update_metadata(&main.id, MetadataUpdate::Loading(true))
            .await
            .unwrap();
        assert!(updated.is_loading);
        assert!(registry.get(&main.id).await.unwrap().unwrap().is_loading);
    }

    #[tokio::test]
    async fn test_persists_to_disk() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("state").join("registry.json");

        let registry = JsonFileRegistry::open(&path).await.unwrap();
        let main = registry
            .create(NewWorkspaceConfig::local_main("/w/main", 5212))
            .await
            .unwrap();
        registry.set_active(Some(&main.id)).await.unwrap();
        drop(registry);

        let reopened = JsonFileRegistry::open(&path).await.unwrap();
        assert_eq!(reopened.list().await.unwrap(), vec![main.clone()]);
        assert_eq!(reopened.active().await.unwrap().unwrap().id, main.id);
    }
}
