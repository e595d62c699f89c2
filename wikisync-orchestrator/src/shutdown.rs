//! Draining synced workspaces before the process exits
//!
//! [`ShutdownSyncCoordinator::sync_before_shutdown`] never fails: every
//! per-workspace sync is settled independently and problems are logged,
//! so the caller can always go on to terminate. Each sync holds the
//! workspace's sync lock, queuing behind a watch-triggered sync in flight.

use crate::sync_lock::SyncLocks;
use futures::future::join_all;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use wikisync_core::services::{NetworkProbe, Notifier, Preferences, VersionControl, WorkspaceRegistry};
use wikisync_core::{Result, Workspace};

/// Outcome of a shutdown drain
#[derive(Debug, Default)]
pub struct ShutdownReport {
    /// The drain was skipped because the network was unreachable
    pub offline: bool,
    /// Roots a sync was attempted for
    pub attempted: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
}

pub struct ShutdownSyncCoordinator {
    registry: Arc<dyn WorkspaceRegistry>,
    vcs: Arc<dyn VersionControl>,
    preferences: Arc<dyn Preferences>,
    network: Arc<dyn NetworkProbe>,
    notifier: Arc<dyn Notifier>,
    locks: Arc<SyncLocks>,
}

impl ShutdownSyncCoordinator {
    pub fn new(
        registry: Arc<dyn WorkspaceRegistry>,
        vcs: Arc<dyn VersionControl>,
        preferences: Arc<dyn Preferences>,
        network: Arc<dyn NetworkProbe>,
        notifier: Arc<dyn Notifier>,
        locks: Arc<SyncLocks>,
    ) -> Self {
        Self {
            registry,
            vcs,
            preferences,
            network,
            notifier,
            locks,
        }
    }

    /// Sync every eligible workspace, waiting for all of them to settle
    pub async fn sync_before_shutdown(&self) -> ShutdownReport {
        if !self.network.is_online().await {
            info!("Offline, skipping sync before shutdown");
            return ShutdownReport {
                offline: true,
                ..Default::default()
            };
        }

        match self.drain().await {
            Ok(report) => report,
            Err(e) => {
                error!("Failed to collect workspaces to sync before shutdown: {}", e);
                ShutdownReport::default()
            }
        }
    }

    async fn drain(&self) -> Result<ShutdownReport> {
        let eligible: Vec<Workspace> = self
            .registry
            .list()
            .await?
            .into_iter()
            .filter(Workspace::should_sync_on_shutdown)
            .collect();
        let mut report = ShutdownReport {
            attempted: eligible.iter().map(|w| w.root_path.clone()).collect(),
            ..Default::default()
        };
        if eligible.is_empty() {
            info!("No synced workspaces to drain before shutdown");
            return Ok(report);
        }

        info!("Syncing {} workspace(s) before shutdown", eligible.len());
        let user_info = self.preferences.user_info().await;

        let notify = async {
            if let Err(e) = self.notifier.notify("Syncing workspaces before quit").await {
                warn!("Failed to show shutdown notification: {}", e);
            }
        };
        let syncs = join_all(eligible.iter().map(|workspace| {
            let user_info = user_info.as_ref();
            async move {
                let _guard = self.locks.acquire(&workspace.root_path).await;
                let result = self.vcs.sync_if_needed(workspace, user_info).await;
                (workspace, result)
            }
        }));
        let ((), results) = tokio::join!(notify, syncs);

        for (workspace, result) in results {
            if let Err(e) = result {
                error!(
                    workspace_id = %workspace.id,
                    root_path = %workspace.root_path.display(),
                    "Sync before shutdown failed: {}", e
                );
                report
                    .failed
                    .push((workspace.root_path.clone(), e.to_string()));
            }
        }
        info!(
            failed = report.failed.len(),
            "Sync before shutdown finished"
        );
        Ok(report)
    }

    /// Drain on SIGTERM, then always run `quit`
    #[cfg(unix)]
    pub fn register_signal_handler<F>(
        self: Arc<Self>,
        quit: F,
    ) -> Result<Option<tokio::task::JoinHandle<()>>>
    where
        F: FnOnce() + Send + 'static,
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = signal(SignalKind::terminate())?;
        Ok(Some(tokio::spawn(async move {
            if terminate.recv().await.is_some() {
                info!("Received SIGTERM, syncing before quit");
                // the report is logged inside; quitting is unconditional
                let _ = self.sync_before_shutdown().await;
            }
            quit();
        })))
    }

    /// No shutdown signal is reliably delivered on this platform
    #[cfg(not(unix))]
    pub fn register_signal_handler<F>(
        self: Arc<Self>,
        _quit: F,
    ) -> Result<Option<tokio::task::JoinHandle<()>>>
    where
        F: FnOnce() + Send + 'static,
    {
        info!("Shutdown sync signal is not supported on this platform");
        Ok(None)
    }
}
