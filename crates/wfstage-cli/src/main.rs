use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, fmt};
use wfstage_pipeline::{Orchestrator, StageConfig, WorkflowDescription};
use wfstage_secrets::{CredentialStore, EnvCredentialStore, FileCredentialStore};

#[derive(Parser)]
#[command(name = "wfstage", about = "wfstage: resolve and stage workflows for execution")]
struct Cli {
    /// Configuration file (default: ~/.wfstage/config.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print where a workflow's source lives, without fetching it
    Resolve {
        /// Workflow description (JSON, or TOML by extension)
        #[arg(long)]
        workflow: PathBuf,
    },
    /// Fetch the workflow, its engine, containers and inputs
    Stage {
        /// Workflow description (JSON, or TOML by extension)
        #[arg(long)]
        workflow: PathBuf,

        /// Credentials file with one table per security context
        #[arg(long)]
        credentials: Option<PathBuf>,

        /// Leave the run's working directory in place afterwards
        #[arg(long)]
        keep_workdir: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so the JSON report on stdout stays clean
    if cli.log_json {
        fmt()
            .json()
            .with_env_filter(EnvFilter::from_env("WFSTAGE_LOG"))
            .with_writer(std::io::stderr)
            .init();
    } else {
        fmt()
            .with_env_filter(EnvFilter::from_env("WFSTAGE_LOG"))
            .with_writer(std::io::stderr)
            .init();
    }

    let config = StageConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Commands::Resolve { workflow } => resolve(config, &workflow).await,
        Commands::Stage {
            workflow,
            credentials,
            keep_workdir,
        } => stage(config, &workflow, credentials.as_deref(), keep_workdir).await,
    }
}

async fn resolve(config: StageConfig, workflow: &Path) -> Result<()> {
    let description = read_description(workflow)?;
    let mut orch = Orchestrator::new(description, config).await?;

    let watcher = cancel_on_ctrl_c(orch.cancellation_token());
    let source = orch.resolve().await;
    watcher.abort();
    orch.finish().await?;

    let source = source.context("Workflow resolution failed")?;
    println!("{}", serde_json::to_string_pretty(&source)?);
    Ok(())
}

async fn stage(
    mut config: StageConfig,
    workflow: &Path,
    credentials: Option<&Path>,
    keep_workdir: bool,
) -> Result<()> {
    let description = read_description(workflow)?;
    config.work.keep |= keep_workdir;

    let credentials: Arc<dyn CredentialStore> = match credentials {
        Some(path) => Arc::new(
            FileCredentialStore::load(path)
                .await
                .with_context(|| format!("Failed to load credentials from {}", path.display()))?,
        ),
        None => Arc::new(EnvCredentialStore::new()),
    };

    let mut orch = Orchestrator::new(description, config)
        .await?
        .with_credentials(credentials);
    tracing::info!(run_id = %orch.workspace().run_id(), "Starting staging run");

    let watcher = cancel_on_ctrl_c(orch.cancellation_token());
    let staged = orch.stage().await;
    watcher.abort();
    orch.finish().await?;

    let staged = staged.context("Staging failed")?;
    println!("{}", serde_json::to_string_pretty(&staged)?);
    Ok(())
}

fn read_description(path: &Path) -> Result<WorkflowDescription> {
    WorkflowDescription::from_file(path)
        .with_context(|| format!("Failed to read workflow description {}", path.display()))
}

/// Cancel the run's in-flight step on the first Ctrl-C.
fn cancel_on_ctrl_c(token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling run");
            token.cancel();
        }
    })
}
