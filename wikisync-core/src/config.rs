//! Orchestrator configuration
//!
//! Every interval the orchestrator waits on lives here so tests and
//! deployments can tune them. Durations are stored as milliseconds.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Tunables for workers, watchers and the workspace layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Wait after the first worker message before declaring readiness
    #[serde(with = "millis")]
    pub readiness_grace: Duration,
    /// Bound on the graceful exit handshake before a forced kill
    #[serde(with = "millis")]
    pub stop_timeout: Duration,
    /// Pause after a worker acknowledged its exit
    #[serde(with = "millis")]
    pub stop_settle: Duration,
    /// Extra pause after all workers stopped
    #[serde(with = "millis")]
    pub stop_all_settle: Duration,
    /// Quiet window that collapses a burst of file changes into one sync
    #[serde(with = "millis")]
    pub sync_debounce: Duration,
    /// A main workspace started this recently is not restarted by a sub-workspace startup
    #[serde(with = "millis")]
    pub startup_restart_cooldown: Duration,
    /// Folder, relative to a workspace root, holding the served content
    pub content_folder: PathBuf,
    /// Folder, relative to a main workspace root, holding sub-workspace links
    pub link_folder: PathBuf,
    /// Directory receiving one log file per worker
    pub log_directory: PathBuf,
    /// Drop the worker handle after a successful stop instead of keeping it
    pub remove_handle_on_stop: bool,
    /// Template copied when scaffolding a new main workspace
    pub template_path: Option<PathBuf>,
    /// Worker entry point
    pub worker: WorkerCommandConfig,
}

/// Program and arguments used to launch a workspace worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerCommandConfig {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl Default for WorkerCommandConfig {
    fn default() -> Self {
        Self {
            program: "wikisync-worker".to_string(),
            args: Vec::new(),
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            readiness_grace: Duration::from_millis(100),
            stop_timeout: Duration::from_secs(10),
            stop_settle: Duration::from_millis(100),
            stop_all_settle: Duration::from_millis(100),
            sync_debounce: Duration::from_secs(1),
            startup_restart_cooldown: Duration::from_secs(5),
            content_folder: PathBuf::from("tiddlers"),
            link_folder: PathBuf::from("tiddlers").join("subwiki"),
            log_directory: PathBuf::from("logs"),
            remove_handle_on_stop: false,
            template_path: None,
            worker: WorkerCommandConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Reject values that would make the orchestrator misbehave
    pub fn validate(&self) -> Result<()> {
        if self.stop_timeout.is_zero() {
            return Err(Error::configuration("stop_timeout must be greater than zero"));
        }
        if self.sync_debounce.is_zero() {
            return Err(Error::configuration("sync_debounce must be greater than zero"));
        }
        if self.link_folder.is_absolute() || self.content_folder.is_absolute() {
            return Err(Error::configuration(
                "content_folder and link_folder must be relative to the workspace root",
            ));
        }
        if self.worker.program.trim().is_empty() {
            return Err(Error::configuration("worker.program cannot be empty"));
        }
        Ok(())
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
