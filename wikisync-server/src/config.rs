//! Configuration management for the binary

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use wikisync_core::services::{MissingFolderChoice, RemovalChoice};
use wikisync_core::{GitUserInfo, OrchestratorConfig};

/// Binary configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub registry_path: PathBuf,
    pub orchestrator: OrchestratorConfig,
    pub logging: LoggingConfig,
    pub network: NetworkConfig,
    pub prompts: PromptConfig,
    pub git_user: Option<GitUserConfig>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    /// `json` or `pretty`
    pub format: String,
    pub directory: PathBuf,
}

/// Reachability probe used before the shutdown sync
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub probe_addr: String,
    pub timeout_ms: u64,
}

/// Answers given to prompts when running unattended
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptConfig {
    pub on_missing_folder: MissingFolderChoice,
}

/// Credentials for synced workspaces
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitUserConfig {
    pub user_name: String,
    pub email: Option<String>,
    pub access_token: String,
    pub branch: Option<String>,
}

impl From<GitUserConfig> for GitUserInfo {
    fn from(config: GitUserConfig) -> Self {
        GitUserInfo {
            git_user_name: config.user_name,
            email: config.email,
            access_token: config.access_token,
            branch: config.branch,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            registry_path: PathBuf::from(".wikisync/registry.json"),
            orchestrator: OrchestratorConfig {
                log_directory: PathBuf::from(".wikisync/logs/workers"),
                ..Default::default()
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
                directory: PathBuf::from(".wikisync/logs"),
            },
            network: NetworkConfig {
                probe_addr: "github.com:443".to_string(),
                timeout_ms: 3000,
            },
            prompts: PromptConfig {
                on_missing_folder: MissingFolderChoice::Ignore,
            },
            git_user: None,
        }
    }
}

impl ServerConfig {
    /// Load configuration from `config/` files and the environment
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from(Path::new("config"))
    }

    /// Load configuration with `default` and `local` files looked up in `dir`
    pub fn load_from(dir: &Path) -> Result<Self, config::ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::from(dir.join("default")).required(false))
            .add_source(config::File::from(dir.join("local")).required(false))
            .add_source(
                config::Environment::with_prefix("WIKISYNC")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .set_default("registry_path", ".wikisync/registry.json")?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            .set_default("logging.directory", ".wikisync/logs")?
            .set_default("network.probe_addr", "github.com:443")?
            .set_default("network.timeout_ms", 3000)?
            .set_default("prompts.on_missing_folder", "Ignore")?
            .build()?;

        settings.try_deserialize()
    }

    pub fn user_info(&self) -> Option<GitUserInfo> {
        self.git_user.clone().map(GitUserInfo::from)
    }

    /// Answer used by `remove` when the user did not pass `--delete`
    pub fn removal_choice(delete_files: bool) -> RemovalChoice {
        if delete_files {
            RemovalChoice::RemoveRecordAndFiles
        } else {
            RemovalChoice::RemoveRecord
        }
    }
}
