//! Core domain model and collaborator traits for wikisync
//!
//! This crate holds the workspace record, the error taxonomy shared by
//! every orchestration component, the orchestrator configuration, and the
//! traits through which the orchestrator reaches its external
//! collaborators (registry, version control, prompts, views).

pub mod config;
pub mod error;
pub mod registry;
pub mod services;
pub mod workspace;

pub use config::{OrchestratorConfig, WorkerCommandConfig};
pub use error::{Error, ErrorCategory, Result};
pub use registry::JsonFileRegistry;
pub use workspace::{GitUserInfo, MetadataUpdate, NewWorkspaceConfig, StorageMode, Workspace};
