//! Workspace process and sync orchestration
//!
//! Runs one worker process per workspace, turns bursts of file changes
//! into single commit-and-sync operations guarded by a per-workspace
//! lock, and creates and removes workspaces transactionally.
//!
//! Everything hangs off an [`Orchestrator`] value built from injected
//! [`Collaborators`]:
//!
//! ```no_run
//! # use wikisync_orchestrator::{Collaborators, Orchestrator};
//! # async fn run(collaborators: Collaborators) -> wikisync_core::Result<()> {
//! let orchestrator = Orchestrator::new(collaborators, Default::default())?;
//! orchestrator.start_all().await;
//! // ... serve until asked to quit
//! orchestrator.sync_before_shutdown().await;
//! orchestrator.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod content_index;
pub mod debounce;
pub mod git;
pub mod layout;
pub mod orchestrator;
pub mod removal;
pub mod shutdown;
pub mod sync_lock;
pub mod transaction;
pub mod watch;
pub mod worker;

pub use content_index::{MembershipChange, SubWorkspaceIndex};
pub use git::GitCli;
pub use layout::WorkspaceLayout;
pub use orchestrator::{Collaborators, CreationRequest, FolderSource, Orchestrator};
pub use removal::RemovalOutcome;
pub use shutdown::{ShutdownReport, ShutdownSyncCoordinator};
pub use sync_lock::{SyncGuard, SyncLocks};
pub use transaction::{CreationStage, RollbackCleanup, WorkspaceTransactions};
pub use watch::{IgnoreList, WatchCoordinator};
pub use worker::{ProcessSpawner, StopReport, WorkerManager, WorkerStatus};
