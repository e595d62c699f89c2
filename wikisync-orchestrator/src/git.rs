//! Version control through the `git` command line
//!
//! Credentials are never stored in the repository config: remote
//! operations that need them pass an authenticated URL on the command
//! line instead of `origin`.

use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, trace};
use url::Url;
use wikisync_core::services::{VersionControl, VersionControlInit};
use wikisync_core::{Error, GitUserInfo, Result, Workspace};

const FALLBACK_USER_NAME: &str = "wikisync";
const FALLBACK_USER_EMAIL: &str = "wikisync@localhost";

/// [`VersionControl`] backed by the `git` executable
#[derive(Debug, Clone)]
pub struct GitCli {
    program: String,
    link_folder: PathBuf,
}

impl GitCli {
    /// `link_folder` is kept out of main workspace history
    pub fn new(link_folder: impl Into<PathBuf>) -> Self {
        Self {
            program: "git".to_string(),
            link_folder: link_folder.into(),
        }
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    async fn git(&self, cwd: &Path, args: &[&str]) -> Result<String> {
        trace!("git {:?} in {}", redact_args(args), cwd.display());
        let output = Command::new(&self.program)
            .args(args)
            .current_dir(cwd)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| Error::version_control(format!("failed to run {}: {}", self.program, e)))?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(Error::version_control(format!(
                "git {} failed in {}: {}",
                args.first().copied().unwrap_or_default(),
                cwd.display(),
                stderr.trim()
            )))
        }
    }

    /// Commit everything pending, returning whether a commit was made
    async fn commit_pending(&self, path: &Path, user_info: Option<&GitUserInfo>) -> Result<bool> {
        if self.git(path, &["status", "--porcelain"]).await?.is_empty() {
            return Ok(false);
        }
        self.git(path, &["add", "-A"]).await?;
        let message = format!("Wiki updated by wikisync at {}", Utc::now().to_rfc3339());
        self.commit(path, user_info, &["-m", &message]).await?;
        debug!("Committed pending changes in {}", path.display());
        Ok(true)
    }

    async fn commit(
        &self,
        path: &Path,
        user_info: Option<&GitUserInfo>,
        extra: &[&str],
    ) -> Result<()> {
        let (name, email) = identity(user_info);
        let name_config = format!("user.name={}", name);
        let email_config = format!("user.email={}", email);
        let mut args = vec![
            "-c",
            name_config.as_str(),
            "-c",
            email_config.as_str(),
            "commit",
        ];
        args.extend_from_slice(extra);
        self.git(path, &args).await?;
        Ok(())
    }

    /// Stage everything and record the first commit, even for an empty tree
    async fn initial_commit(&self, path: &Path, user_info: Option<&GitUserInfo>) -> Result<()> {
        self.git(path, &["add", "-A"]).await?;
        self.commit(path, user_info, &["--allow-empty", "-m", "Initial commit"])
            .await
    }

    async fn current_branch(&self, path: &Path) -> Result<String> {
        self.git(path, &["rev-parse", "--abbrev-ref", "HEAD"]).await
    }

    async fn pull_and_push(
        &self,
        path: &Path,
        remote: &str,
        branch: &str,
        user_info: &GitUserInfo,
    ) -> Result<()> {
        let (name, email) = identity(Some(user_info));
        let name_config = format!("user.name={}", name);
        let email_config = format!("user.email={}", email);
        self.git(
            path,
            &[
                "-c",
                &name_config,
                "-c",
                &email_config,
                "pull",
                "--rebase",
                remote,
                branch,
            ],
        )
        .await?;
        self.git(path, &["push", remote, &format!("HEAD:{}", branch)])
            .await?;
        Ok(())
    }

    async fn ignore_link_folder(&self, path: &Path) -> Result<()> {
        let entry = format!("/{}/", self.link_folder.to_string_lossy().replace('\\', "/"));
        let gitignore = path.join(".gitignore");
        let existing = match tokio::fs::read_to_string(&gitignore).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(Error::io("Failed to read", &gitignore, e)),
        };
        if existing.lines().any(|line| line.trim() == entry) {
            return Ok(());
        }
        let mut content = existing;
        if !content.is_empty() && !content.ends_with('\n') {
            content.push('\n');
        }
        content.push_str(&entry);
        content.push('\n');
        tokio::fs::write(&gitignore, content)
            .await
            .map_err(|e| Error::io("Failed to write", &gitignore, e))
    }
}

#[async_trait]
impl VersionControl for GitCli {
    async fn has_version_control(&self, path: &Path) -> Result<bool> {
        Ok(tokio::fs::try_exists(path.join(".git"))
            .await
            .unwrap_or(false))
    }

    async fn initialize(&self, path: &Path, init: VersionControlInit<'_>) -> Result<()> {
        info!("Initializing git repository in {}", path.display());
        self.git(path, &["init"]).await?;

        match init {
            VersionControlInit::Local => {
                self.initial_commit(path, None).await?;
            }
            VersionControlInit::Synced {
                is_main,
                remote_url,
                user_info,
            } => {
                if is_main {
                    self.ignore_link_folder(path).await?;
                }
                self.initial_commit(path, Some(user_info)).await?;
                self.git(path, &["remote", "add", "origin", remote_url]).await?;

                let authenticated = authenticated_url(remote_url, user_info)?;
                let branch = self.current_branch(path).await?;
                self.git(path, &["push", &authenticated, &format!("HEAD:{}", branch)])
                    .await?;
                info!("Pushed initial history of {} to origin", path.display());
            }
        }
        Ok(())
    }

    async fn clone_repository(
        &self,
        remote_url: &str,
        path: &Path,
        user_info: &GitUserInfo,
    ) -> Result<()> {
        let parent = path
            .parent()
            .ok_or_else(|| Error::validation(format!("{} has no parent", path.display())))?;
        let authenticated = authenticated_url(remote_url, user_info)?;
        let target = path.to_string_lossy().to_string();
        info!("Cloning {} into {}", remote_url, path.display());
        self.git(parent, &["clone", &authenticated, &target]).await?;
        // keep the token out of .git/config
        self.git(path, &["remote", "set-url", "origin", remote_url])
            .await?;
        Ok(())
    }

    async fn debounced_commit_and_sync(
        &self,
        path: &Path,
        remote_url: &str,
        user_info: &GitUserInfo,
    ) -> Result<()> {
        self.commit_pending(path, Some(user_info)).await?;
        let authenticated = authenticated_url(remote_url, user_info)?;
        let branch = self.current_branch(path).await?;
        self.pull_and_push(path, &authenticated, &branch, user_info)
            .await?;
        info!("Synced {} with origin", path.display());
        Ok(())
    }

    async fn sync_if_needed(
        &self,
        workspace: &Workspace,
        user_info: Option<&GitUserInfo>,
    ) -> Result<()> {
        let (Some(remote_url), Some(user_info)) = (workspace.remote_url.as_deref(), user_info)
        else {
            debug!(workspace_id = %workspace.id, "No remote or credentials, nothing to sync");
            return Ok(());
        };
        let path = &workspace.root_path;
        let committed = self.commit_pending(path, Some(user_info)).await?;

        let authenticated = authenticated_url(remote_url, user_info)?;
        let branch = self.current_branch(path).await?;
        self.git(path, &["fetch", &authenticated, &branch]).await?;
        let counts = self
            .git(path, &["rev-list", "--left-right", "--count", "HEAD...FETCH_HEAD"])
            .await?;
        let diverged = counts.split_whitespace().any(|count| count != "0");

        if committed || diverged {
            self.pull_and_push(path, &authenticated, &branch, user_info)
            .await?;
            info!(workspace_id = %workspace.id, "Synced with origin");
        } else {
            debug!(workspace_id = %workspace.id, "Already in sync with origin");
        }
        Ok(())
    }

    async fn set_branch_preference(&self, path: &Path, branch: &str) -> Result<()> {
        self.git(path, &["branch", "-M", branch]).await?;
        info!("Switched {} to branch {}", path.display(), branch);
        Ok(())
    }
}

fn identity(user_info: Option<&GitUserInfo>) -> (String, String) {
    match user_info {
        Some(info) => (
            info.git_user_name.clone(),
            info.email
                .clone()
                .unwrap_or_else(|| format!("{}@users.noreply.github.com", info.git_user_name)),
        ),
        None => (FALLBACK_USER_NAME.to_string(), FALLBACK_USER_EMAIL.to_string()),
    }
}

/// Embed credentials into an http(s) remote; other schemes are returned unchanged
pub fn authenticated_url(remote_url: &str, user_info: &GitUserInfo) -> Result<String> {
    let mut url = match Url::parse(remote_url) {
        Ok(url) => url,
        // scp-like ssh remotes are not URLs
        Err(_) => return Ok(remote_url.to_string()),
    };
    if !matches!(url.scheme(), "http" | "https") {
        return Ok(remote_url.to_string());
    }
    url.set_username(&user_info.git_user_name)
        .and_then(|()| url.set_password(Some(&user_info.access_token)))
        .map_err(|()| Error::validation(format!("Cannot add credentials to {}", remote_url)))?;
    Ok(url.to_string())
}

fn redact_args(args: &[&str]) -> Vec<String> {
    args.iter()
        .map(|arg| match Url::parse(arg) {
            Ok(mut url) if url.password().is_some() => {
                let _ = url.set_password(Some("***"));
                url.to_string()
            }
            _ => arg.to_string(),
        })
        .collect()
}
