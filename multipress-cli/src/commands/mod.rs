//! Commands module
//!
//! Defines all CLI commands and their handlers. Every provisioning command is
//! a pipeline of labelled steps run by the engine.

mod backup;
mod deploy;
mod doctor;
mod down;
pub mod init;
mod replicate;

pub use init::InitArgs;

use anyhow::{Context, Result};
use clap::Subcommand;
use multipress_core::Identifier;
use multipress_engine::{
    ConfigStore, CsvLedger, Phase, Pipeline, PipelineRun, RunContext, RunSummary, SharedState,
    StepResult, StoreError, Targets, YamlConfigStore,
};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use crate::config::Config;
use crate::console::ConsoleReporter;
use crate::docker::{ContainerRuntime, DockerCli};

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Create a new project configuration
    Init(InitArgs),
    /// Deploy the shared services and the model site
    Deploy {
        /// TLS issuer used by caddy when it is first configured
        #[arg(long, default_value = "internal", value_parser = ["internal", "acme"])]
        tls_issuer: String,
    },
    /// Replicate the model site onto new instances
    Replicate {
        /// Number of instances to create
        #[arg(value_parser = clap::value_parser!(u64).range(1..))]
        count: u64,
    },
    /// Back up every instance into a dated directory
    Backup,
    /// Stop every deployed service
    Down,
    /// Check that the host has every requirement
    Doctor,
}

/// Handle a CLI command
pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Init(args) => init::handle_init(args, config).await,
        Commands::Deploy { tls_issuer } => deploy::handle_deploy(&tls_issuer, config).await,
        Commands::Replicate { count } => replicate::handle_replicate(count as usize, config).await,
        Commands::Backup => backup::handle_backup(config).await,
        Commands::Down => down::handle_down(config).await,
        Commands::Doctor => doctor::handle_doctor(config).await,
    }
}

/// Collaborators available to every step
pub struct Host {
    pub runtime: Arc<dyn ContainerRuntime>,
    pub workdir: PathBuf,
}

impl Host {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, workdir: impl Into<PathBuf>) -> Self {
        Self {
            runtime,
            workdir: workdir.into(),
        }
    }

    /// Host backed by the docker command line, after checking docker works
    async fn docker(config: &Config) -> Result<Arc<Self>> {
        let docker = DockerCli::new(&config.workdir);
        docker.check_available().await?;
        Ok(Arc::new(Self::new(Arc::new(docker), &config.workdir)))
    }

    /// Resolves a project-relative path
    pub fn path(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.workdir.join(relative)
    }
}

/// Declares a once-phase running `step` with the host
pub(crate) fn once<F, Fut>(host: &Arc<Host>, label: &str, step: F) -> Phase
where
    F: Fn(Arc<Host>, RunContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = StepResult> + Send + 'static,
{
    let host = Arc::clone(host);
    Phase::once_fn(label, move |ctx| step(Arc::clone(&host), ctx))
}

/// Declares a fan-out phase running `step` with the host for each identifier
pub(crate) fn per<F, Fut>(host: &Arc<Host>, label: &str, step: F) -> Phase
where
    F: Fn(Arc<Host>, RunContext, Identifier) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = StepResult> + Send + 'static,
{
    let host = Arc::clone(host);
    Phase::per_identifier_fn(label, move |ctx, id| step(Arc::clone(&host), ctx, id))
}

/// Loads the configuration record and wires it to its stores
pub(crate) fn open_state(config: &Config) -> Result<Arc<SharedState>> {
    let store = YamlConfigStore::new(config.config_file());
    let record = match store.load() {
        Ok(record) => record,
        Err(StoreError::NotFound(path)) => anyhow::bail!(
            "{} not found, run 'multipress init' first",
            path.display()
        ),
        Err(e) => return Err(e.into()),
    };
    record
        .validate()
        .with_context(|| format!("Invalid configuration in {}", store.path().display()))?;

    Ok(Arc::new(SharedState::new(
        record,
        Arc::new(store),
        Arc::new(CsvLedger::new(config.ledger_file())),
    )))
}

/// Runs `pipeline` over `targets` with console reporting
///
/// With `--json` the summary is also printed on stdout.
pub(crate) async fn run_pipeline(
    config: &Config,
    state: Arc<SharedState>,
    pipeline: Pipeline,
    targets: Targets,
) -> Result<RunSummary> {
    let reporter = Arc::new(ConsoleReporter::new(config.json));
    let run = PipelineRun::new(pipeline, state, reporter, config.engine.clone());
    info!("Run {} started", run.context().run_id());

    let summary = run.execute(targets).await?;

    if config.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }
    Ok(summary)
}
