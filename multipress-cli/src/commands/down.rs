//! Down command
//!
//! Stops every service of the project by bringing down each
//! `compose.*.yaml` manifest of the working directory concurrently.

use anyhow::{Context, Result};
use multipress_engine::{Pipeline, RunContext, StepResult, StepStatus, Targets};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;

use super::{Host, once, open_state, run_pipeline};
use crate::config::Config;

pub async fn handle_down(config: &Config) -> Result<()> {
    let host = Host::docker(config).await?;
    let state = open_state(config)?;

    run_pipeline(config, state, pipeline(&host), Targets::Fixed(Vec::new())).await?;
    Ok(())
}

fn pipeline(host: &Arc<Host>) -> Pipeline {
    Pipeline::new("Shutdown").pre(once(host, "Stop all containers", stop_all))
}

/// Compose manifests of the working directory, sorted by name
fn compose_files(host: &Host) -> Result<Vec<PathBuf>> {
    let workdir = host
        .workdir
        .to_str()
        .with_context(|| format!("{} is not valid UTF-8", host.workdir.display()))?;
    let pattern = format!("{}/compose.*.yaml", glob::Pattern::escape(workdir));

    let mut files = glob::glob(&pattern)
        .with_context(|| format!("Invalid pattern {}", pattern))?
        .collect::<Result<Vec<_>, _>>()
        .context("Failed to list compose files")?;
    files.sort();
    Ok(files)
}

async fn stop_all(host: Arc<Host>, _ctx: RunContext) -> StepResult {
    let files = compose_files(&host)?;
    if files.is_empty() {
        return Ok(StepStatus::skip("No compose files found"));
    }

    let handles: Vec<(PathBuf, JoinHandle<Result<String>>)> = files
        .into_iter()
        .map(|file| {
            let host = Arc::clone(&host);
            let path = file.clone();
            (file, tokio::spawn(async move { host.runtime.compose_down(&path).await }))
        })
        .collect();

    let mut errors = Vec::new();
    for (file, handle) in handles {
        match handle.await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => errors.push(format!("{:#}", e)),
            Err(e) => errors.push(format!("{}: task failed: {}", file.display(), e)),
        }
    }

    if !errors.is_empty() {
        anyhow::bail!(errors.join("; "));
    }
    Ok(StepStatus::Done)
}
