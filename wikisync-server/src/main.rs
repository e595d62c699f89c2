use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};
use wikisync_core::services::WorkspaceRegistry;
use wikisync_core::{JsonFileRegistry, NewWorkspaceConfig};
use wikisync_orchestrator::{
    Collaborators, CreationRequest, FolderSource, GitCli, Orchestrator, ProcessSpawner,
    RemovalOutcome,
};

mod config;
mod services;

use crate::config::ServerConfig;
use crate::services::{ConfigPreferences, LogNotifier, LogViews, PresetConfirmation, TcpProbe};

#[derive(Parser)]
#[command(name = "wikisync")]
#[command(about = "Runs workspace workers and keeps synced workspaces in step with their remotes")]
struct Args {
    /// Workspace registry file, overriding the configured one
    #[arg(long, global = true)]
    registry_path: Option<PathBuf>,

    /// Log level, overriding the configured one
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start every workspace and run until interrupted
    Run,
    /// List registered workspaces
    List,
    /// Create a workspace
    Create {
        /// Absolute path of the workspace folder
        path: PathBuf,

        /// Port served by the worker of a main workspace
        #[arg(long, default_value = "5212")]
        port: u16,

        /// Create a sub-workspace linked into this main workspace
        #[arg(long, value_name = "MAIN_ID")]
        sub_of: Option<String>,

        /// Tag routed into the sub-workspace
        #[arg(long, requires = "sub_of")]
        tag: Option<String>,

        /// Remote origin of a synced workspace
        #[arg(long)]
        remote: Option<String>,

        /// Where the folder comes from
        #[arg(long, value_enum, default_value_t = Source::New)]
        from: Source,
    },
    /// Remove a workspace
    Remove {
        id: String,

        /// Also delete the workspace folder
        #[arg(long)]
        delete: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Source {
    /// Scaffold a main workspace or create an empty sub-workspace
    New,
    /// Clone the remote
    Clone,
    /// Import a folder that already exists
    Existing,
}

impl Source {
    fn folder_source(self, is_sub: bool) -> FolderSource {
        match (self, is_sub) {
            (Source::New, false) => FolderSource::Scaffold,
            (Source::New, true) => FolderSource::CreateSub,
            (Source::Clone, _) => FolderSource::Clone,
            (Source::Existing, false) => FolderSource::ExistingMain,
            (Source::Existing, true) => FolderSource::ExistingSub,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = ServerConfig::load().context("Failed to load configuration")?;
    if let Some(path) = args.registry_path.clone() {
        config.registry_path = path;
    }
    if let Some(level) = args.log_level.clone() {
        config.logging.level = level;
    }

    // Initialize tracing with both console and file logging
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    std::fs::create_dir_all(&config.logging.directory)?;
    let file_appender = tracing_appender::rolling::daily(&config.logging.directory, "wikisync.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let json = config.logging.format == "json";
    tracing_subscriber::registry()
        .with(json.then(|| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_filter(env_filter.clone())
        }))
        .with((!json).then(|| tracing_subscriber::fmt::layer().with_filter(env_filter.clone())))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(env_filter),
        )
        .init();

    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("Registry: {}", config.registry_path.display());

    let delete_files = matches!(args.command, Command::Remove { delete: true, .. });
    let orchestrator = build_orchestrator(&config, delete_files).await?;

    match args.command {
        Command::Run => run(orchestrator).await,
        Command::List => list(&orchestrator).await,
        Command::Create {
            path,
            port,
            sub_of,
            tag,
            remote,
            from,
        } => {
            let is_sub = sub_of.is_some();
            let mut workspace_config = match sub_of {
                Some(main_id) => NewWorkspaceConfig::local_sub(path, main_id, tag),
                None => NewWorkspaceConfig::local_main(path, port),
            };
            if let Some(remote) = remote {
                workspace_config = workspace_config.synced(remote);
            }
            let workspace = orchestrator
                .create_workspace(CreationRequest {
                    config: workspace_config,
                    source: from.folder_source(is_sub),
                    start: false,
                })
                .await?;
            println!("{}", workspace.id);
            Ok(())
        }
        Command::Remove { id, .. } => match orchestrator.remove_workspace(&id).await? {
            RemovalOutcome::Removed => Ok(()),
            RemovalOutcome::Cancelled => {
                info!("Removal cancelled");
                Ok(())
            }
            RemovalOutcome::Incomplete => {
                anyhow::bail!("Workspace {} was only partially removed", id)
            }
        },
    }
}

async fn build_orchestrator(config: &ServerConfig, delete_files: bool) -> Result<Orchestrator> {
    let registry = JsonFileRegistry::open(&config.registry_path).await?;
    let collaborators = Collaborators {
        registry: Arc::new(registry),
        vcs: Arc::new(GitCli::new(config.orchestrator.link_folder.clone())),
        preferences: Arc::new(ConfigPreferences::new(config.user_info())),
        views: Arc::new(LogViews),
        confirmation: Arc::new(PresetConfirmation::new(
            ServerConfig::removal_choice(delete_files),
            config.prompts.on_missing_folder,
        )),
        notifier: Arc::new(LogNotifier),
        network: Arc::new(TcpProbe::new(
            config.network.probe_addr.clone(),
            Duration::from_millis(config.network.timeout_ms),
        )),
        spawner: Arc::new(ProcessSpawner::new(config.orchestrator.worker.clone())),
    };
    Ok(Orchestrator::new(collaborators, config.orchestrator.clone())?)
}

async fn run(orchestrator: Orchestrator) -> Result<()> {
    let failures = orchestrator.start_all().await;
    for (id, e) in &failures {
        warn!(workspace_id = %id, "Workspace did not start: {}", e);
    }

    // SIGTERM drains inside the handler; Ctrl-C drains below
    let (quit_tx, quit_rx) = tokio::sync::oneshot::channel::<()>();
    let signal_task = orchestrator
        .shutdown_sync()
        .clone()
        .register_signal_handler(move || {
            let _ = quit_tx.send(());
        })?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("Received Ctrl-C, shutting down");
            if !cfg!(windows) {
                orchestrator.sync_before_shutdown().await;
            }
        }
        Ok(()) = quit_rx => {
            info!("Shutdown sync finished, shutting down");
        }
    }
    if let Some(task) = signal_task {
        task.abort();
    }

    let report = orchestrator.shutdown().await;
    if !report.is_clean() {
        for (root_path, e) in &report.failed {
            error!(root_path = %root_path.display(), "Worker did not stop: {}", e);
        }
    }
    info!(attempted = report.attempted.len(), "Shutdown complete");
    Ok(())
}

async fn list(orchestrator: &Orchestrator) -> Result<()> {
    let active = orchestrator.registry().active().await?.map(|w| w.id);
    for workspace in orchestrator.registry().list().await? {
        let marker = if active.as_deref() == Some(workspace.id.as_str()) {
            "*"
        } else {
            " "
        };
        let kind = if workspace.is_sub_workspace { "sub" } else { "main" };
        println!(
            "{} {}  {:<4} {:<6} {}{}",
            marker,
            workspace.id,
            kind,
            workspace.storage.to_string(),
            workspace.root_path.display(),
            if workspace.hibernated { "  (hibernated)" } else { "" }
        );
    }
    Ok(())
}
