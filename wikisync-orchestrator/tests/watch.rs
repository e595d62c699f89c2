//! File watch and sync lock integration tests

mod common;

use common::{test_user, Harness};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use wikisync_orchestrator::watch::SyncTrigger;

const REMOTE: &str = "https://example.com/alice/wiki.git";

/// Long enough for the 100 ms test debounce window to pass
const SETTLE: Duration = Duration::from_millis(500);

async fn watch(harness: &Harness, root: &Path) {
    harness
        .orchestrator
        .watches()
        .watch(root, REMOTE, &test_user(), None)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_burst_of_changes_triggers_one_sync() {
    let harness = Harness::new();
    let root = harness.path("wiki");
    std::fs::create_dir_all(&root).unwrap();
    watch(&harness, &root).await;

    for index in 0..5 {
        std::fs::write(root.join(format!("{}.tid", index)), "text").unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    tokio::time::sleep(SETTLE).await;

    assert_eq!(harness.vcs.commit_and_sync_count(), 1);
    assert!(!harness
        .orchestrator
        .watches()
        .sync_locks()
        .is_held(&root));
    harness.orchestrator.watches().stop_all_watches().await;
}

#[tokio::test]
async fn test_existing_files_do_not_trigger_sync() {
    let harness = Harness::new();
    let root = harness.path("wiki");
    std::fs::create_dir_all(&root).unwrap();
    std::fs::write(root.join("old.tid"), "text").unwrap();

    watch(&harness, &root).await;
    tokio::time::sleep(SETTLE).await;

    assert_eq!(harness.vcs.commit_and_sync_count(), 0);
    harness.orchestrator.watches().stop_watch(&root).await;
}

#[tokio::test]
async fn test_ignored_paths_do_not_trigger_sync() {
    let harness = Harness::new();
    let root = harness.path("wiki");
    std::fs::create_dir_all(root.join(".git")).unwrap();
    std::fs::create_dir_all(root.join("output")).unwrap();
    std::fs::create_dir_all(root.join("tiddlers")).unwrap();
    std::fs::write(root.join(".gitignore"), "*.bak\n").unwrap();
    watch(&harness, &root).await;

    std::fs::write(root.join(".git").join("index"), "x").unwrap();
    std::fs::write(root.join("output").join("index.html"), "x").unwrap();
    std::fs::write(root.join("tiddlers").join("$__StoryList_1.tid"), "x").unwrap();
    std::fs::write(root.join("tiddlers").join("draft.bak"), "x").unwrap();
    tokio::time::sleep(SETTLE).await;

    assert_eq!(harness.vcs.commit_and_sync_count(), 0);
    harness.orchestrator.watches().stop_watch(&root).await;
}

#[tokio::test]
async fn test_changes_during_sync_are_skipped() {
    let harness = Harness::new();
    let root = harness.path("wiki");
    std::fs::create_dir_all(&root).unwrap();
    let gate = harness.vcs.gate_syncs();
    watch(&harness, &root).await;
    let locks = harness.orchestrator.watches().sync_locks().clone();

    std::fs::write(root.join("first.tid"), "text").unwrap();
    tokio::time::sleep(SETTLE).await;
    assert_eq!(harness.vcs.commit_and_sync_count(), 1);
    assert!(locks.is_held(&root));

    std::fs::write(root.join("second.tid"), "text").unwrap();
    tokio::time::sleep(SETTLE).await;
    assert_eq!(harness.vcs.commit_and_sync_count(), 1);

    gate.notify_one();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!locks.is_held(&root));
    assert_eq!(harness.vcs.max_in_flight.load(Ordering::SeqCst), 1);
    harness.orchestrator.watches().stop_watch(&root).await;
}

#[tokio::test]
async fn test_lock_cleared_after_failed_sync() {
    let harness = Harness::new();
    let root = harness.path("wiki");
    harness.vcs.fail_commit_and_sync.store(true, Ordering::SeqCst);
    let locks = harness.orchestrator.watches().sync_locks().clone();
    let trigger = SyncTrigger::new(
        locks.clone(),
        harness.vcs.clone(),
        root.clone(),
        REMOTE.to_string(),
        test_user(),
    );

    let running = trigger.fire(&root.join("a.tid")).unwrap();
    running.await.unwrap();

    assert!(!locks.is_held(&root));
    assert_eq!(harness.vcs.commit_and_sync_count(), 1);
}

#[tokio::test]
async fn test_trigger_rejects_reentry_while_held() {
    let harness = Harness::new();
    let root = harness.path("wiki");
    let gate = harness.vcs.gate_syncs();
    let locks = harness.orchestrator.watches().sync_locks().clone();
    let trigger = SyncTrigger::new(
        locks.clone(),
        harness.vcs.clone(),
        root.clone(),
        REMOTE.to_string(),
        test_user(),
    );

    let running = trigger.fire(&root.join("a.tid")).unwrap();
    assert!(trigger.fire(&root.join("b.tid")).is_none());

    gate.notify_one();
    running.await.unwrap();
    assert!(!locks.is_held(&root));
    assert!(trigger.fire(&root.join("c.tid")).is_some());
    gate.notify_one();
}

#[cfg(unix)]
#[tokio::test]
async fn test_shutdown_waits_for_sync_in_flight() {
    let harness = Harness::new();
    let root = harness.path("wiki");
    let gate = harness.vcs.gate_syncs();
    let locks = harness.orchestrator.watches().sync_locks().clone();
    let trigger = SyncTrigger::new(
        locks.clone(),
        harness.vcs.clone(),
        root.clone(),
        REMOTE.to_string(),
        test_user(),
    );
    let running = trigger.fire(&root.join("a.tid")).unwrap();

    let released = AtomicBool::new(false);
    let shutdown = async {
        harness.orchestrator.shutdown().await;
        released.load(Ordering::SeqCst)
    };
    let release = async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(harness.vcs.in_flight.load(Ordering::SeqCst), 1);
        released.store(true, Ordering::SeqCst);
        gate.notify_one();
    };
    let (finished_after_release, ()) = tokio::join!(shutdown, release);

    assert!(finished_after_release);
    running.await.unwrap();
    assert!(!locks.is_held(&root));
    assert_eq!(harness.vcs.in_flight.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_symlinked_trees_are_not_followed() {
    let harness = Harness::new();
    let root = harness.path("main");
    let outside = harness.path("outside");
    std::fs::create_dir_all(&root).unwrap();
    std::fs::create_dir_all(&outside).unwrap();
    std::os::unix::fs::symlink(&outside, root.join("linked")).unwrap();
    watch(&harness, &root).await;

    std::fs::write(outside.join("through-link.tid"), "text").unwrap();
    tokio::time::sleep(SETTLE).await;

    assert_eq!(harness.vcs.commit_and_sync_count(), 0);
    harness.orchestrator.watches().stop_watch(&root).await;
}

#[tokio::test]
async fn test_missing_tree_is_tolerated() {
    let harness = Harness::new();
    let root = harness.path("absent");

    watch(&harness, &root).await;

    assert!(!harness.orchestrator.watches().is_watching(&root).await);
}

#[tokio::test]
async fn test_stop_watches() {
    let harness = Harness::new();
    let first = harness.path("first");
    let second = harness.path("second");
    std::fs::create_dir_all(&first).unwrap();
    std::fs::create_dir_all(&second).unwrap();
    watch(&harness, &first).await;
    watch(&harness, &second).await;
    let watches = harness.orchestrator.watches();

    watches.stop_watch(&first).await;
    assert!(!watches.is_watching(&first).await);
    // stopping again only warns
    watches.stop_watch(&first).await;

    watches.stop_all_watches().await;
    assert!(!watches.is_watching(&second).await);

    std::fs::write(second.join("late.tid"), "text").unwrap();
    tokio::time::sleep(SETTLE).await;
    assert_eq!(harness.vcs.commit_and_sync_count(), 0);
}
