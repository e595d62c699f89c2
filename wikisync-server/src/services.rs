//! Runtime collaborators for the command-line host
//!
//! There is no window to refresh and nobody to ask, so views and prompts
//! log what they would have shown and answer from configuration.

use async_trait::async_trait;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, error, info, warn};
use wikisync_core::services::{
    Confirmation, MissingFolderChoice, NetworkProbe, Notifier, Preferences, RemovalChoice,
    ViewService,
};
use wikisync_core::{GitUserInfo, Result, StorageMode, Workspace};

/// Online if a TCP connection to `addr` opens within the timeout
pub struct TcpProbe {
    addr: String,
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
        }
    }
}

#[async_trait]
impl NetworkProbe for TcpProbe {
    async fn is_online(&self) -> bool {
        match tokio::time::timeout(self.timeout, TcpStream::connect(&self.addr)).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                debug!("Network probe to {} failed: {}", self.addr, e);
                false
            }
            Err(_) => {
                debug!("Network probe to {} timed out", self.addr);
                false
            }
        }
    }
}

pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, title: &str) -> Result<()> {
        info!(notice = true, "{}", title);
        Ok(())
    }
}

pub struct LogViews;

#[async_trait]
impl ViewService for LogViews {
    async fn refresh_all(&self) {
        debug!("Views refreshed");
    }

    async fn remove_workspace_view(&self, workspace_id: &str) -> Result<()> {
        info!(workspace_id, "Workspace view removed");
        Ok(())
    }

    async fn set_active_workspace_view(&self, workspace_id: &str) -> Result<()> {
        info!(workspace_id, "Workspace view activated");
        Ok(())
    }
}

/// Confirmation that answers every prompt with a preset choice
pub struct PresetConfirmation {
    removal: RemovalChoice,
    missing_folder: MissingFolderChoice,
}

impl PresetConfirmation {
    pub fn new(removal: RemovalChoice, missing_folder: MissingFolderChoice) -> Self {
        Self {
            removal,
            missing_folder,
        }
    }
}

#[async_trait]
impl Confirmation for PresetConfirmation {
    async fn confirm_removal(&self, workspace: &Workspace) -> RemovalChoice {
        info!(
            workspace_id = %workspace.id,
            choice = ?self.removal,
            "Removal confirmed from command line"
        );
        self.removal
    }

    async fn missing_workspace_folder(&self, workspace: &Workspace) -> MissingFolderChoice {
        warn!(
            workspace_id = %workspace.id,
            root_path = %workspace.root_path.display(),
            choice = ?self.missing_folder,
            "Workspace folder is missing"
        );
        self.missing_folder
    }

    async fn show_error(&self, title: &str, message: &str) {
        error!("{}: {}", title, message);
    }
}

/// Preferences read once from configuration
pub struct ConfigPreferences {
    user_info: Option<GitUserInfo>,
}

impl ConfigPreferences {
    pub fn new(user_info: Option<GitUserInfo>) -> Self {
        Self { user_info }
    }
}

#[async_trait]
impl Preferences for ConfigPreferences {
    async fn user_info(&self) -> Option<GitUserInfo> {
        self.user_info.clone()
    }

    async fn branch_preference(&self, storage: StorageMode) -> Option<String> {
        match storage {
            StorageMode::Synced => self.user_info.as_ref().and_then(|u| u.branch.clone()),
            StorageMode::Local => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_listening_address_is_online() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let probe = TcpProbe::new(addr.to_string(), Duration::from_secs(1));
        assert!(probe.is_online().await);
    }

    #[tokio::test]
    async fn test_closed_port_is_offline() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let probe = TcpProbe::new(addr.to_string(), Duration::from_secs(1));
        assert!(!probe.is_online().await);
    }

    #[tokio::test]
    async fn test_branch_preference_only_for_synced() {
        let mut user = GitUserInfo::new("alice", "token-123");
        user.branch = Some("main".to_string());
        let preferences = ConfigPreferences::new(Some(user));
        assert_eq!(
            preferences.branch_preference(StorageMode::Synced).await,
            Some("main".to_string())
        );
        assert_eq!(preferences.branch_preference(StorageMode::Local).await, None);
        assert!(ConfigPreferences::new(None).user_info().await.is_none());
    }
}
