//! Per-workspace single-flight lock for sync operations
//!
//! Watch-triggered syncs use [`SyncLocks::try_acquire`] and skip their
//! sync when the lock is held. Shutdown uses [`SyncLocks::acquire`] and
//! queues behind the sync in flight. Holding a [`SyncGuard`] is what
//! holds the lock, so it is released on every exit path of the guarded work.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::trace;

/// Set of workspace roots with a sync in flight
#[derive(Debug, Default)]
pub struct SyncLocks {
    held: Mutex<HashSet<PathBuf>>,
    released: Notify,
}

impl SyncLocks {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Take the lock for `root_path`, or `None` if a sync is already running
    pub fn try_acquire(self: &Arc<Self>, root_path: &Path) -> Option<SyncGuard> {
        let mut held = self.held.lock();
        if !held.insert(root_path.to_path_buf()) {
            return None;
        }
        trace!(root_path = %root_path.display(), "Sync lock acquired");
        Some(SyncGuard {
            locks: Arc::clone(self),
            root_path: root_path.to_path_buf(),
        })
    }

    /// Take the lock for `root_path`, waiting for a running sync to finish
    pub async fn acquire(self: &Arc<Self>, root_path: &Path) -> SyncGuard {
        loop {
            let released = self.released.notified();
            tokio::pin!(released);
            // register before checking so a release in between is not missed
            released.as_mut().enable();
            if let Some(guard) = self.try_acquire(root_path) {
                return guard;
            }
            trace!(root_path = %root_path.display(), "Waiting for running sync");
            released.await;
        }
    }

    /// Wait until no root holds the lock
    pub async fn wait_idle(&self) {
        loop {
            let released = self.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();
            if self.held.lock().is_empty() {
                return;
            }
            released.await;
        }
    }

    pub fn is_held(&self, root_path: &Path) -> bool {
        self.held.lock().contains(root_path)
    }

    pub fn held_count(&self) -> usize {
        self.held.lock().len()
    }
}

/// Proof of holding the sync lock for one root; releases it on drop
#[derive(Debug)]
pub struct SyncGuard {
    locks: Arc<SyncLocks>,
    root_path: PathBuf,
}

impl SyncGuard {
    pub fn root_path(&self) -> &Path {
        &self.root_path
    }
}

impl Drop for SyncGuard {
    fn drop(&mut self) {
        self.locks.held.lock().remove(&self.root_path);
        self.locks.released.notify_waiters();
        trace!(root_path = %self.root_path.display(), "Sync lock released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_second_acquire_is_rejected_until_release() {
        let locks = SyncLocks::new();
        let root = Path::new("/w/main");

        let guard = locks.try_acquire(root).unwrap();
        assert!(locks.is_held(root));
        assert!(locks.try_acquire(root).is_none());

        drop(guard);
        assert!(!locks.is_held(root));
        assert!(locks.try_acquire(root).is_some());
    }

    #[test]
    fn test_roots_are_independent() {
        let locks = SyncLocks::new();
        let _main = locks.try_acquire(Path::new("/w/main")).unwrap();
        let _other = locks.try_acquire(Path::new("/w/other")).unwrap();
        assert_eq!(locks.held_count(), 2);
    }

    #[tokio::test]
    async fn test_acquire_waits_for_running_sync() {
        let locks = SyncLocks::new();
        let root = PathBuf::from("/w/main");
        let guard = locks.try_acquire(&root).unwrap();

        let waiter = {
            let locks = locks.clone();
            let root = root.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire(&root).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(!locks.is_held(&root));
    }

    #[tokio::test]
    async fn test_wait_idle_returns_once_every_lock_is_released() {
        let locks = SyncLocks::new();
        locks.wait_idle().await;

        let main = locks.try_acquire(Path::new("/w/main")).unwrap();
        let other = locks.try_acquire(Path::new("/w/other")).unwrap();
        let idle = {
            let locks = locks.clone();
            tokio::spawn(async move { locks.wait_idle().await })
        };

        drop(main);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!idle.is_finished());

        drop(other);
        tokio::time::timeout(Duration::from_secs(1), idle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_lock_released_when_guarded_task_fails() {
        let locks = SyncLocks::new();
        let root = PathBuf::from("/w/main");
        let guard = locks.try_acquire(&root).unwrap();

        let task = tokio::spawn(async move {
            let _guard = guard;
            Err::<(), &str>("push rejected")
        });
        assert!(task.await.unwrap().is_err());
        assert!(!locks.is_held(&root));
    }
}
