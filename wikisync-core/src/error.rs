//! Error types for workspace orchestration

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Core error type shared by every orchestration component
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Invalid workspace path: '{path}' must be a non-empty absolute path")]
    InvalidWorkspacePath { path: String },

    #[error("Workspace folder does not exist: {}", path.display())]
    WorkspacePathMissing { path: PathBuf },

    #[error("Worker failed to start for {}: {message}", root_path.display())]
    WorkerStart { root_path: PathBuf, message: String },

    #[error("Synced workspace is missing git user info: {missing} is not set")]
    SyncedWikiNoGitUserInfo { missing: String },

    #[error("Workspace creation failed: {message}")]
    TransactionFailed { message: String },

    #[error("Workspace creation rollback failed, manual cleanup required: {message}")]
    RollbackFailed { message: String },

    #[error("Failed to link {} to {}: {cause}", target.display(), link.display())]
    LinkCreation {
        link: PathBuf,
        target: PathBuf,
        cause: String,
    },

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Resource already exists: {resource} {id}")]
    AlreadyExists { resource: String, id: String },

    #[error("IO error: {message}")]
    Io { message: String },

    #[error("Version control error: {message}")]
    VersionControl { message: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error class used to decide how far a failure may travel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Surfaced immediately, nothing was changed
    Validation,
    /// Logged and skipped
    Tolerated,
    /// Triggers or results from a creation rollback
    Transactional,
    /// Propagated to the caller without crashing the host
    FatalToFeature,
    /// Logged, never escalated
    BestEffort,
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io {
            message: err.to_string(),
        }
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Internal(err.to_string())
    }
}

impl Error {
    /// Create a validation error with a formatted message
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a not found error for a specific entity type and ID
    pub fn not_found<S1: Into<String>, S2: Into<String>>(entity_type: S1, id: S2) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    pub fn already_exists<S1: Into<String>, S2: Into<String>>(resource: S1, id: S2) -> Self {
        Self::AlreadyExists {
            resource: resource.into(),
            id: id.into(),
        }
    }

    /// Wrap an IO failure with the operation and path it concerned
    pub fn io<S: Into<String>>(context: S, path: &Path, err: impl std::fmt::Display) -> Self {
        Self::Io {
            message: format!("{} {}: {}", context.into(), path.display(), err),
        }
    }

    pub fn version_control<S: Into<String>>(message: S) -> Self {
        Self::VersionControl {
            message: message.into(),
        }
    }

    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn worker_start<S: Into<String>>(root_path: &Path, message: S) -> Self {
        Self::WorkerStart {
            root_path: root_path.to_path_buf(),
            message: message.into(),
        }
    }

    pub fn no_git_user_info<S: Into<String>>(missing: S) -> Self {
        Self::SyncedWikiNoGitUserInfo {
            missing: missing.into(),
        }
    }

    pub fn link_creation(link: &Path, target: &Path, cause: impl std::fmt::Display) -> Self {
        Self::LinkCreation {
            link: link.to_path_buf(),
            target: target.to_path_buf(),
            cause: cause.to_string(),
        }
    }

    /// Check if this error is a validation error
    pub fn is_validation(&self) -> bool {
        matches!(self.category(), ErrorCategory::Validation)
    }

    /// Check if this error is a not found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    /// Check if this error leaves on-disk state that needs manual repair
    pub fn needs_manual_cleanup(&self) -> bool {
        matches!(self, Error::RollbackFailed { .. })
    }

    /// Get the error class for propagation decisions and logging
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::InvalidWorkspacePath { .. }
            | Error::WorkspacePathMissing { .. }
            | Error::SyncedWikiNoGitUserInfo { .. }
            | Error::Validation { .. }
            | Error::AlreadyExists { .. }
            | Error::Configuration { .. } => ErrorCategory::Validation,
            Error::NotFound { .. } => ErrorCategory::Tolerated,
            Error::TransactionFailed { .. } | Error::RollbackFailed { .. } => {
                ErrorCategory::Transactional
            }
            Error::WorkerStart { .. } | Error::LinkCreation { .. } => {
                ErrorCategory::FatalToFeature
            }
            Error::Io { .. }
            | Error::VersionControl { .. }
            | Error::Serialization(_)
            | Error::Internal(_) => ErrorCategory::BestEffort,
        }
    }
}

/// Convenience result type for core operations
pub type Result<T> = std::result::Result<T, Error>;
