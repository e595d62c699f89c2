//! File watch coordinator
//!
//! One watcher per workspace root. Filesystem events that survive the
//! ignore list restart a debounce window; when the window passes quietly
//! a commit-and-sync is dispatched, unless one is already running for
//! that workspace.

use super::ignore::IgnoreList;
use crate::debounce::Debouncer;
use crate::sync_lock::SyncLocks;
use futures::future::join_all;
use notify::event::ModifyKind;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use wikisync_core::services::VersionControl;
use wikisync_core::{Error, GitUserInfo, Result};

/// Dispatches a sync for one workspace, gated by its sync lock
#[derive(Clone)]
pub struct SyncTrigger {
    locks: Arc<SyncLocks>,
    vcs: Arc<dyn VersionControl>,
    root_path: PathBuf,
    remote_url: String,
    user_info: GitUserInfo,
}

impl SyncTrigger {
    pub fn new(
        locks: Arc<SyncLocks>,
        vcs: Arc<dyn VersionControl>,
        root_path: PathBuf,
        remote_url: String,
        user_info: GitUserInfo,
    ) -> Self {
        Self {
            locks,
            vcs,
            root_path,
            remote_url,
            user_info,
        }
    }

    /// Start a sync for a change at `changed`
    ///
    /// Returns the running sync, or `None` when one is already in flight
    /// for this workspace. Must be called within a tokio runtime.
    pub fn fire(&self, changed: &Path) -> Option<JoinHandle<()>> {
        let Some(guard) = self.locks.try_acquire(&self.root_path) else {
            info!(
                root_path = %self.root_path.display(),
                "{} changed, but a sync is already running, skipping",
                changed.display()
            );
            return None;
        };

        info!(root_path = %self.root_path.display(), "{} changed", changed.display());
        let vcs = self.vcs.clone();
        let remote_url = self.remote_url.clone();
        let user_info = self.user_info.clone();
        Some(tokio::spawn(async move {
            // the guard lives until the sync settles, success or failure
            let guard = guard;
            let root_path = guard.root_path();
            match vcs
                .debounced_commit_and_sync(root_path, &remote_url, &user_info)
                .await
            {
                Ok(()) => debug!(root_path = %root_path.display(), "Sync finished"),
                Err(e) => error!(root_path = %root_path.display(), "Sync failed: {}", e),
            }
        }))
    }
}

struct WatcherHandle {
    tree_root: PathBuf,
    watcher: RecommendedWatcher,
    pump: JoinHandle<()>,
}

/// Owns every active watcher, keyed by workspace root path
pub struct WatchCoordinator {
    watchers: Mutex<HashMap<PathBuf, WatcherHandle>>,
    locks: Arc<SyncLocks>,
    vcs: Arc<dyn VersionControl>,
    debounce: Duration,
}

impl WatchCoordinator {
    pub fn new(vcs: Arc<dyn VersionControl>, locks: Arc<SyncLocks>, debounce: Duration) -> Self {
        Self {
            watchers: Mutex::new(HashMap::new()),
            locks,
            vcs,
            debounce,
        }
    }

    /// Watch `tree_root` (default: `root_path`) and sync `root_path` on change
    ///
    /// Resolves once the watcher is installed. A missing tree is logged
    /// and otherwise ignored.
    pub async fn watch(
        &self,
        root_path: &Path,
        remote_url: &str,
        user_info: &GitUserInfo,
        tree_root: Option<&Path>,
    ) -> Result<()> {
        let tree_root = tree_root.unwrap_or(root_path).to_path_buf();
        if !tokio::fs::try_exists(&tree_root).await.unwrap_or(false) {
            error!(
                root_path = %root_path.display(),
                "Folder {} does not exist, not watching it",
                tree_root.display()
            );
            return Ok(());
        }

        if self.watchers.lock().await.contains_key(root_path) {
            info!(root_path = %root_path.display(), "Replacing existing watcher");
            self.stop_watch(root_path).await;
        }

        let ignores = IgnoreList::load(root_path).await;
        let trigger = SyncTrigger::new(
            self.locks.clone(),
            self.vcs.clone(),
            root_path.to_path_buf(),
            remote_url.to_string(),
            user_info.clone(),
        );

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let handler_root = root_path.to_path_buf();
        let config = Config::default().with_follow_symlinks(false);
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    let _ = event_tx.send(event);
                }
                Err(e) => warn!(root_path = %handler_root.display(), "Watch error: {}", e),
            },
            config,
        )
        .map_err(|e| Error::io("Failed to create watcher", &tree_root, e))?;

        // registering a recursive watch walks the tree, keep it off the runtime threads
        let watch_root = tree_root.clone();
        let watcher = tokio::task::spawn_blocking(move || {
            watcher
                .watch(&watch_root, RecursiveMode::Recursive)
                .map(|()| watcher)
        })
        .await
        .map_err(|e| Error::Internal(format!("watch setup task failed: {}", e)))?
        .map_err(|e| Error::io("Failed to watch", &tree_root, e))?;

        let pump = tokio::spawn(pump_events(
            event_rx,
            ignores,
            root_path.to_path_buf(),
            tree_root.clone(),
            Debouncer::spawn(self.debounce, move |changed: PathBuf| {
                trigger.fire(&changed);
            }),
        ));

        self.watchers.lock().await.insert(
            root_path.to_path_buf(),
            WatcherHandle {
                tree_root: tree_root.clone(),
                watcher,
                pump,
            },
        );
        info!(
            root_path = %root_path.display(),
            remote_url,
            "Watching {} for changes",
            tree_root.display()
        );
        Ok(())
    }

    /// Close the watcher for `root_path`, warning if there is none
    pub async fn stop_watch(&self, root_path: &Path) {
        let handle = self.watchers.lock().await.remove(root_path);
        match handle {
            Some(handle) => {
                close(handle).await;
                info!(root_path = %root_path.display(), "Watcher stopped");
            }
            None => warn!(root_path = %root_path.display(), "No watcher registered"),
        }
    }

    /// Close every watcher concurrently
    pub async fn stop_all_watches(&self) {
        let handles: Vec<(PathBuf, WatcherHandle)> =
            self.watchers.lock().await.drain().collect();
        let count = handles.len();
        join_all(handles.into_iter().map(|(root, handle)| async move {
            close(handle).await;
            debug!(root_path = %root.display(), "Watcher stopped");
        }))
        .await;
        info!("All {} watcher(s) stopped", count);
    }

    pub async fn is_watching(&self, root_path: &Path) -> bool {
        self.watchers.lock().await.contains_key(root_path)
    }

    /// Tree watched on behalf of `root_path`
    pub async fn watched_tree(&self, root_path: &Path) -> Option<PathBuf> {
        self.watchers
            .lock()
            .await
            .get(root_path)
            .map(|handle| handle.tree_root.clone())
    }

    pub fn sync_locks(&self) -> &Arc<SyncLocks> {
        &self.locks
    }
}

async fn close(handle: WatcherHandle) {
    handle.pump.abort();
    let watcher = handle.watcher;
    // dropping a watcher joins its event thread
    if let Err(e) = tokio::task::spawn_blocking(move || drop(watcher)).await {
        warn!("Failed to close watcher: {}", e);
    }
}

/// Whether an event reports an added, changed or deleted path
fn is_content_change(event: &Event) -> bool {
    match event.kind {
        EventKind::Create(_) | EventKind::Remove(_) => true,
        EventKind::Modify(ModifyKind::Metadata(_)) => false,
        EventKind::Modify(_) => true,
        _ => false,
    }
}

async fn pump_events(
    mut events: mpsc::UnboundedReceiver<Event>,
    ignores: IgnoreList,
    root_path: PathBuf,
    tree_root: PathBuf,
    debouncer: Debouncer<PathBuf>,
) {
    while let Some(event) = events.recv().await {
        if !is_content_change(&event) {
            continue;
        }
        for path in event.paths {
            let base = if path.starts_with(&root_path) {
                &root_path
            } else {
                &tree_root
            };
            if ignores.is_ignored_under(base, &path) {
                continue;
            }
            debug!(root_path = %root_path.display(), "Change observed at {}", path.display());
            debouncer.trigger(path);
        }
    }
}
