//! Workspace domain model
//!
//! A workspace is a directory tree served by one worker process and,
//! when synced, mirrored to a remote git origin. Sub-workspaces expose
//! their tree inside a main workspace through a directory link.

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Where a workspace keeps its history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
    /// Git history only, no remote
    Local,
    /// Pushed to and pulled from a remote origin
    Synced,
}

impl StorageMode {
    pub fn is_synced(&self) -> bool {
        matches!(self, StorageMode::Synced)
    }
}

impl std::fmt::Display for StorageMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageMode::Local => write!(f, "local"),
            StorageMode::Synced => write!(f, "synced"),
        }
    }
}

/// A managed workspace record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workspace {
    pub id: String,
    /// Human readable name, passed to the worker as its display name
    pub name: String,
    /// Absolute root of the workspace tree
    pub root_path: PathBuf,
    /// Port of the network-facing worker, if any
    pub port: Option<u16>,
    pub is_sub_workspace: bool,
    /// Identifier of the main workspace a sub-workspace is linked into
    pub main_workspace_id: Option<String>,
    /// Tag routed into this sub-workspace by the main workspace
    pub tag_name: Option<String>,
    pub remote_url: Option<String>,
    pub storage: StorageMode,
    pub hibernated: bool,
    pub read_only: bool,
    /// Set while the worker is starting, cleared on readiness or stop
    pub is_loading: bool,
    pub created_at: DateTime<Utc>,
}

impl Workspace {
    /// Build a record from a creation request, assigning a fresh identifier
    pub fn from_config(config: NewWorkspaceConfig) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: config.name,
            root_path: config.root_path,
            port: config.port,
            is_sub_workspace: config.is_sub_workspace,
            main_workspace_id: config.main_workspace_id,
            tag_name: config.tag_name,
            remote_url: config.remote_url,
            storage: config.storage,
            hibernated: false,
            read_only: config.read_only,
            is_loading: false,
            created_at: Utc::now(),
        }
    }

    pub fn is_main(&self) -> bool {
        !self.is_sub_workspace
    }

    pub fn is_synced(&self) -> bool {
        self.storage.is_synced()
    }

    /// Whether the shutdown drain should push this workspace
    pub fn should_sync_on_shutdown(&self) -> bool {
        self.is_synced() && !self.hibernated && !self.read_only
    }

    /// Last path component, used as the link name inside a main workspace
    pub fn folder_name(&self) -> Option<String> {
        self.root_path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
    }

    /// File stem of the per-workspace worker log
    pub fn log_file_stem(&self) -> String {
        sanitize_log_name(&self.root_path.to_string_lossy())
    }

    /// Apply a metadata change in place
    pub fn apply(&mut self, update: &MetadataUpdate) {
        match update {
            MetadataUpdate::Loading(loading) => self.is_loading = *loading,
            MetadataUpdate::Hibernated(hibernated) => self.hibernated = *hibernated,
            MetadataUpdate::ReadOnly(read_only) => self.read_only = *read_only,
            MetadataUpdate::TagName(tag) => self.tag_name = tag.clone(),
        }
    }
}

/// Replace path separators so a path can serve as a flat file name
pub fn sanitize_log_name(name: &str) -> String {
    name.replace(['/', '\\'], "_")
}

/// Validate a root path the way a worker start requires it
pub fn validate_root_path(path: &Path) -> Result<()> {
    if path.as_os_str().is_empty() || !path.is_absolute() {
        return Err(Error::InvalidWorkspacePath {
            path: path.display().to_string(),
        });
    }
    Ok(())
}

/// A single metadata change on an existing record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "field", content = "value")]
pub enum MetadataUpdate {
    Loading(bool),
    Hibernated(bool),
    ReadOnly(bool),
    TagName(Option<String>),
}

/// Input for a workspace creation transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewWorkspaceConfig {
    pub name: String,
    pub root_path: PathBuf,
    pub port: Option<u16>,
    pub is_sub_workspace: bool,
    pub main_workspace_id: Option<String>,
    pub tag_name: Option<String>,
    pub remote_url: Option<String>,
    pub storage: StorageMode,
    pub read_only: bool,
}

impl NewWorkspaceConfig {
    /// A local main workspace rooted at `root_path`
    pub fn local_main<P: Into<PathBuf>>(root_path: P, port: u16) -> Self {
        let root_path = root_path.into();
        Self {
            name: display_name_for(&root_path),
            root_path,
            port: Some(port),
            is_sub_workspace: false,
            main_workspace_id: None,
            tag_name: None,
            remote_url: None,
            storage: StorageMode::Local,
            read_only: false,
        }
    }

    /// A local sub-workspace linked into `main_workspace_id`
    pub fn local_sub<P: Into<PathBuf>>(
        root_path: P,
        main_workspace_id: impl Into<String>,
        tag_name: Option<String>,
    ) -> Self {
        let root_path = root_path.into();
        Self {
            name: display_name_for(&root_path),
            root_path,
            port: None,
            is_sub_workspace: true,
            main_workspace_id: Some(main_workspace_id.into()),
            tag_name,
            remote_url: None,
            storage: StorageMode::Local,
            read_only: false,
        }
    }

    /// Turn this request into a synced one pointing at `remote_url`
    pub fn synced(mut self, remote_url: impl Into<String>) -> Self {
        self.storage = StorageMode::Synced;
        self.remote_url = Some(remote_url.into());
        self
    }

    /// Check the fields that do not depend on other records
    pub fn validate(&self) -> Result<()> {
        validate_root_path(&self.root_path)?;
        if self.name.trim().is_empty() {
            return Err(Error::validation("Workspace name cannot be empty"));
        }
        if self.is_sub_workspace && self.main_workspace_id.is_none() {
            return Err(Error::validation(
                "A sub-workspace must name the main workspace it links into",
            ));
        }
        Ok(())
    }
}

fn display_name_for(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

/// Credentials used to push to and pull from a remote origin
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitUserInfo {
    pub git_user_name: String,
    pub email: Option<String>,
    pub access_token: String,
    pub branch: Option<String>,
}

impl std::fmt::Debug for GitUserInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitUserInfo")
            .field("git_user_name", &self.git_user_name)
            .field("email", &self.email)
            .field("access_token", &"<redacted>")
            .field("branch", &self.branch)
            .finish()
    }
}

impl GitUserInfo {
    pub fn new(git_user_name: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            git_user_name: git_user_name.into(),
            email: None,
            access_token: access_token.into(),
            branch: None,
        }
    }
}

/// Check that a synced workspace has everything a sync needs, naming the first missing field
pub fn require_sync_credentials<'a>(
    remote_url: Option<&'a str>,
    user_info: Option<&'a GitUserInfo>,
) -> Result<(&'a str, &'a GitUserInfo)> {
    let remote_url = match remote_url.map(str::trim) {
        Some(url) if !url.is_empty() => url,
        _ => return Err(Error::no_git_user_info("remote url")),
    };
    let user_info = user_info.ok_or_else(|| Error::no_git_user_info("git user info"))?;
    if user_info.git_user_name.trim().is_empty() {
        return Err(Error::no_git_user_info("git user name"));
    }
    if user_info.access_token.trim().is_empty() {
        return Err(Error::no_git_user_info("access token"));
    }
    Ok((remote_url, user_info))
}
