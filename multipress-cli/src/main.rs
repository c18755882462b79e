//! Multipress CLI
//!
//! Provisions a WordPress model site and replicates it onto isolated
//! instances, each step driven through the multipress engine.

mod commands;
mod compose;
mod config;
mod console;
mod database;
mod docker;
mod fsutil;

use anyhow::Result;
use clap::Parser;
use colored::*;
use commands::{Commands, handle_command};
use config::Config;
use multipress_engine::{EngineConfig, FailurePolicy};
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "multipress")]
#[command(about = "Multi-site WordPress provisioning", long_about = None)]
struct Cli {
    /// Configuration record
    #[arg(long, global = true, env = "MULTIPRESS_CONFIG", default_value = "multipress.yaml")]
    config: PathBuf,

    /// Credential ledger
    #[arg(
        long,
        global = true,
        env = "MULTIPRESS_LEDGER",
        default_value = "instance-credentials.csv"
    )]
    ledger: PathBuf,

    /// Project directory
    #[arg(short = 'C', long, global = true, env = "MULTIPRESS_WORKDIR", default_value = ".")]
    workdir: PathBuf,

    /// Maximum number of instances processed concurrently
    #[arg(long, global = true)]
    max_parallel: Option<usize>,

    /// What to do when an instance fails: abort or continue
    #[arg(long, global = true)]
    on_failure: Option<FailurePolicy>,

    /// Print the run summary as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

fn build_config(cli: &Cli) -> Result<Config> {
    let mut engine = EngineConfig::from_env()?;
    if cli.max_parallel.is_some() {
        engine = engine.with_max_parallel(cli.max_parallel);
    }
    if let Some(policy) = cli.on_failure {
        engine = engine.with_failure_policy(policy);
    }
    engine.validate()?;

    Ok(Config {
        config_path: cli.config.clone(),
        ledger_path: cli.ledger.clone(),
        workdir: cli.workdir.clone(),
        engine,
        json: cli.json,
    })
}

#[tokio::main]
async fn main() {
    // Logs stay quiet unless RUST_LOG asks for them; the console reporter owns the terminal
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "multipress_cli=warn,multipress_engine=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let result = match build_config(&cli) {
        Ok(config) => {
            debug!("Loaded configuration: {:?}", config);
            handle_command(cli.command, &config).await
        }
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}
