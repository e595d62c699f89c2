//! Messages exchanged with a worker process
//!
//! Workers speak line-delimited JSON. Anything on stdout that does not
//! decode as a [`WorkerMessage`] is plain output and only goes to the log.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::PathBuf;

/// Environment variable carrying the JSON-encoded [`WorkerInit`]
pub const WORKER_DATA_ENV: &str = "WIKISYNC_WORKER_DATA";

/// Initialization data handed to a freshly spawned worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerInit {
    pub root_path: PathBuf,
    pub display_name: String,
    pub port: Option<u16>,
}

/// Message sent by a worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WorkerMessage {
    Started,
    Progress { message: String, handler: String },
    Log { message: String },
    Exit { code: i32 },
}

impl WorkerMessage {
    /// Decode one output line, returning `None` for plain output
    pub fn decode(line: &str) -> Option<Self> {
        let trimmed = line.trim();
        if !trimmed.starts_with('{') {
            return None;
        }
        serde_json::from_str(trimmed).ok()
    }
}

/// Command sent to a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerCommand {
    Exit,
}

impl WorkerCommand {
    /// Wire form, one line without the trailing newline
    pub fn encode(&self) -> String {
        match self {
            WorkerCommand::Exit => json!({ "type": "command", "message": "exit" }).to_string(),
        }
    }
}

/// Everything the lifecycle manager can observe about a running worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    Message(WorkerMessage),
    /// The worker reported a fatal error
    Error(String),
    /// The process ended; `None` when it was killed by a signal
    Exited(Option<i32>),
}
