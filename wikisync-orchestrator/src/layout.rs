//! On-disk workspace layout
//!
//! Folder preparation for new workspaces and the directory links that
//! expose a sub-workspace inside its main workspace at
//! `<main root>/<link folder>/<sub folder name>`.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;
use wikisync_core::{Error, OrchestratorConfig, Result};

/// Paths and folder operations derived from the orchestrator configuration
#[derive(Debug, Clone)]
pub struct WorkspaceLayout {
    content_folder: PathBuf,
    link_folder: PathBuf,
    template_path: Option<PathBuf>,
}

impl WorkspaceLayout {
    pub fn new(config: &OrchestratorConfig) -> Self {
        Self {
            content_folder: config.content_folder.clone(),
            link_folder: config.link_folder.clone(),
            template_path: config.template_path.clone(),
        }
    }

    /// Content folder of a workspace, the tree a main workspace watches
    pub fn content_path(&self, root_path: &Path) -> PathBuf {
        root_path.join(&self.content_folder)
    }

    pub fn content_folder(&self) -> &Path {
        &self.content_folder
    }

    /// Link folder relative to the workspace root
    pub fn link_folder(&self) -> &Path {
        &self.link_folder
    }

    /// Where the link for sub folder `folder_name` lives inside `main_root`
    pub fn link_path(&self, main_root: &Path, folder_name: &str) -> PathBuf {
        main_root.join(&self.link_folder).join(folder_name)
    }

    /// Link `sub_root` into `main_root`, replacing whatever is at the link path
    pub async fn link_sub_workspace(&self, main_root: &Path, sub_root: &Path) -> Result<PathBuf> {
        let folder_name = folder_name(sub_root)?;
        let link = self.link_path(main_root, &folder_name);

        clear_best_effort(&link).await;

        if let Some(parent) = link.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::link_creation(&link, sub_root, e))?;
        }
        create_dir_link(sub_root, &link)
            .await
            .map_err(|e| Error::link_creation(&link, sub_root, e))?;

        info!(
            "Linked sub-workspace {} into {}",
            sub_root.display(),
            link.display()
        );
        Ok(link)
    }

    /// Remove the link for `folder_name` from `main_root`
    ///
    /// A missing link is fine. A real directory at the link path is left
    /// alone, since it holds content rather than a link.
    pub async fn unlink_sub_workspace(&self, main_root: &Path, folder_name: &str) -> Result<()> {
        let link = self.link_path(main_root, folder_name);
        let metadata = match tokio::fs::symlink_metadata(&link).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No sub-workspace link at {}", link.display());
                return Ok(());
            }
            Err(e) => return Err(Error::io("Failed to inspect link", &link, e)),
        };

        if !metadata.file_type().is_symlink() {
            return Err(Error::validation(format!(
                "{} is not a directory link",
                link.display()
            )));
        }
        remove_link(&link)
            .await
            .map_err(|e| Error::io("Failed to remove link", &link, e))?;
        info!("Removed sub-workspace link {}", link.display());
        Ok(())
    }

    /// Delete a workspace tree; an already missing tree is fine
    pub async fn remove_tree(&self, path: &Path) -> Result<()> {
        match tokio::fs::remove_dir_all(path).await {
            Ok(()) => {
                info!("Deleted {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::io("Failed to delete", path, e)),
        }
    }

    /// Create `<parent>/<folder>` from the template, or empty with a content folder
    pub async fn scaffold_from_template(&self, parent: &Path, folder: &str) -> Result<PathBuf> {
        let target = self.new_folder_target(parent, folder).await?;

        match &self.template_path {
            Some(template) => {
                let template = template.clone();
                let destination = target.clone();
                tokio::task::spawn_blocking(move || copy_tree(&template, &destination))
                    .await
                    .map_err(|e| Error::Internal(format!("template copy task failed: {}", e)))??;
                info!("Scaffolded {} from template", target.display());
            }
            None => {
                let content = self.content_path(&target);
                tokio::fs::create_dir_all(&content)
                    .await
                    .map_err(|e| Error::io("Failed to create workspace folder", &content, e))?;
                info!("Created empty workspace {}", target.display());
            }
        }
        Ok(target)
    }

    /// Create an empty `<parent>/<folder>`
    pub async fn create_folder(&self, parent: &Path, folder: &str) -> Result<PathBuf> {
        let target = self.new_folder_target(parent, folder).await?;
        tokio::fs::create_dir(&target)
            .await
            .map_err(|e| Error::io("Failed to create workspace folder", &target, e))?;
        debug!("Created workspace folder {}", target.display());
        Ok(target)
    }

    /// Check that an existing folder can be imported as a workspace
    pub async fn ensure_workspace_exists(&self, root_path: &Path, is_main: bool) -> Result<()> {
        if !tokio::fs::try_exists(root_path).await.unwrap_or(false) {
            return Err(Error::validation(format!(
                "Workspace folder {} does not exist",
                root_path.display()
            )));
        }
        if is_main {
            let content = self.content_path(root_path);
            if !tokio::fs::try_exists(&content).await.unwrap_or(false) {
                return Err(Error::validation(format!(
                    "{} has no {} folder, it does not look like a main workspace",
                    root_path.display(),
                    self.content_folder.display()
                )));
            }
        }
        Ok(())
    }

    async fn new_folder_target(&self, parent: &Path, folder: &str) -> Result<PathBuf> {
        if folder.trim().is_empty() || folder.contains(['/', '\\']) {
            return Err(Error::validation(format!(
                "'{}' is not a valid folder name",
                folder
            )));
        }
        if !tokio::fs::try_exists(parent).await.unwrap_or(false) {
            return Err(Error::validation(format!(
                "Parent folder {} does not exist",
                parent.display()
            )));
        }
        let target = parent.join(folder);
        if tokio::fs::try_exists(&target).await.unwrap_or(false) {
            return Err(Error::validation(format!(
                "{} already exists",
                target.display()
            )));
        }
        Ok(target)
    }
}

fn folder_name(path: &Path) -> Result<String> {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .ok_or_else(|| Error::validation(format!("{} has no folder name", path.display())))
}

/// Remove whatever sits at `path`, ignoring failures
///
/// A real directory is deleted with its contents and logged as a warning.
async fn clear_best_effort(path: &Path) {
    let Ok(metadata) = tokio::fs::symlink_metadata(path).await else {
        return;
    };
    let result = if metadata.is_dir() {
        warn!(
            path = %path.display(),
            "Deleting real directory at link path {} to replace it with a link",
            path.display()
        );
        tokio::fs::remove_dir_all(path).await
    } else {
        remove_link(path).await
    };
    if let Err(e) = result {
        warn!(path = %path.display(), "Failed to clear {}: {}", path.display(), e);
    }
}

#[cfg(unix)]
async fn create_dir_link(target: &Path, link: &Path) -> std::io::Result<()> {
    tokio::fs::symlink(target, link).await
}

#[cfg(windows)]
async fn create_dir_link(target: &Path, link: &Path) -> std::io::Result<()> {
    tokio::fs::symlink_dir(target, link).await
}

#[cfg(unix)]
async fn remove_link(link: &Path) -> std::io::Result<()> {
    tokio::fs::remove_file(link).await
}

#[cfg(windows)]
async fn remove_link(link: &Path) -> std::io::Result<()> {
    // directory symlinks are removed as directories on Windows
    match tokio::fs::remove_dir(link).await {
        Ok(()) => Ok(()),
        Err(_) => tokio::fs::remove_file(link).await,
    }
}

/// Copy a template tree, skipping its version control metadata
fn copy_tree(source: &Path, destination: &Path) -> Result<()> {
    if !source.is_dir() {
        return Err(Error::configuration(format!(
            "Template {} is not a directory",
            source.display()
        )));
    }

    let entries = WalkDir::new(source)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| entry.file_name() != ".git");
    for entry in entries {
        let entry = entry.map_err(|e| Error::io("Failed to read template", source, e))?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| Error::Internal(e.to_string()))?;
        let target = destination.join(relative);

        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)
                .map_err(|e| Error::io("Failed to create", &target, e))?;
        } else if entry.file_type().is_file() {
            std::fs::copy(entry.path(), &target)
                .map_err(|e| Error::io("Failed to copy", &target, e))?;
        } else {
            warn!("Skipping template entry {}", entry.path().display());
        }
    }
    Ok(())
}
