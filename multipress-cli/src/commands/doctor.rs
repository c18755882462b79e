//! Doctor command
//!
//! Checks that the host can run multipress: a Debian-like distribution,
//! docker, and the docker compose plugin. Nothing is installed; every missing
//! requirement is reported with the package that provides it.

use anyhow::{Context, Result};
use colored::*;
use multipress_core::Config as Record;
use multipress_engine::{
    MemoryConfigStore, MemoryLedger, Phase, Pipeline, RunContext, SharedState, StepResult,
    StepStatus, Targets,
};
use std::path::PathBuf;
use std::sync::Arc;

use super::{Host, once, run_pipeline};
use crate::config::Config;
use crate::docker::DockerCli;

const OS_RELEASE: &str = "/etc/os-release";

/// Distributions the sites are provisioned on
const SUPPORTED_DISTRIBUTIONS: [&str; 2] = ["debian", "ubuntu"];

pub async fn handle_doctor(config: &Config) -> Result<()> {
    let host = Arc::new(Host::new(Arc::new(DockerCli::new(".")), "."));

    // Checks never touch a project, they run against a throwaway record
    let record = Record::new("localhost", 0, 0);
    let state = Arc::new(SharedState::new(
        record.clone(),
        Arc::new(MemoryConfigStore::new(record)),
        Arc::new(MemoryLedger::new()),
    ));

    run_pipeline(
        config,
        state,
        pipeline(&host, PathBuf::from(OS_RELEASE)),
        Targets::Fixed(Vec::new()),
    )
    .await?;

    if !config.json {
        println!("{}", "✓ System is ready for multipress".green().bold());
    }
    Ok(())
}

fn pipeline(host: &Arc<Host>, os_release: PathBuf) -> Pipeline {
    Pipeline::new("Doctor")
        .pre(Phase::once_fn("Check operating system", move |_ctx| {
            check_os(os_release.clone())
        }))
        .pre(once(host, "Check docker", check_docker))
        .pre(once(host, "Check docker compose", check_compose))
}

/// Values of `ID` and `ID_LIKE` in an os-release file
fn distribution_ids(os_release: &str) -> Vec<String> {
    os_release
        .lines()
        .filter_map(|line| {
            line.strip_prefix("ID=")
                .or_else(|| line.strip_prefix("ID_LIKE="))
        })
        .flat_map(|value| {
            value
                .trim()
                .trim_matches('"')
                .split_whitespace()
                .map(str::to_lowercase)
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Other distributions are not refused, the check is only advisory there
async fn check_os(os_release: PathBuf) -> StepResult {
    let content = tokio::fs::read_to_string(&os_release)
        .await
        .with_context(|| format!("Failed to read {}", os_release.display()))?;

    let ids = distribution_ids(&content);
    if ids
        .iter()
        .any(|id| SUPPORTED_DISTRIBUTIONS.contains(&id.as_str()))
    {
        return Ok(StepStatus::Done);
    }

    Ok(StepStatus::skip(format!(
        "Unsupported distribution '{}', expected Debian or Ubuntu",
        ids.first().map(String::as_str).unwrap_or("unknown")
    )))
}

async fn check_docker(host: Arc<Host>, _ctx: RunContext) -> StepResult {
    host.runtime
        .version()
        .await
        .context("Docker is required, install docker-ce and docker-ce-cli")?;
    Ok(StepStatus::Done)
}

async fn check_compose(host: Arc<Host>, _ctx: RunContext) -> StepResult {
    let version = host
        .runtime
        .compose_version()
        .await
        .context("Docker compose is required, install docker-compose-plugin")?;

    if !version.to_lowercase().contains("version") {
        anyhow::bail!("Unexpected 'docker compose version' output: {}", version);
    }
    Ok(StepStatus::Done)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing::{Fixture, bare_fixture};
    use multipress_engine::{EngineError, OutcomeKind};
    use std::fs;

    const UBUNTU: &str = "NAME=\"Ubuntu\"\nID=ubuntu\nID_LIKE=debian\nVERSION_ID=\"24.04\"\n";
    const FEDORA: &str = "NAME=\"Fedora Linux\"\nID=fedora\nVERSION_ID=40\n";

    fn with_os_release(content: &str) -> (Fixture, PathBuf) {
        let fx = bare_fixture();
        let path = fx.path("os-release");
        fs::write(&path, content).unwrap();
        (fx, path)
    }

    #[test]
    fn test_distribution_ids() {
        assert_eq!(distribution_ids(UBUNTU), vec!["ubuntu", "debian"]);
        assert_eq!(
            distribution_ids("ID=\"linuxmint\"\nID_LIKE=\"ubuntu debian\"\n"),
            vec!["linuxmint", "ubuntu", "debian"]
        );
        assert!(distribution_ids("NAME=Unknown\n").is_empty());
    }

    #[tokio::test]
    async fn test_ready_host_passes_every_check() {
        let (fx, os_release) = with_os_release(UBUNTU);

        let summary = fx
            .run(pipeline(&fx.host, os_release), Targets::Fixed(Vec::new()))
            .await
            .unwrap();

        assert_eq!(summary.steps.len(), 3);
        assert_eq!(summary.count(OutcomeKind::Success), 3);
    }

    #[tokio::test]
    async fn test_other_distribution_is_advisory() {
        let (fx, os_release) = with_os_release(FEDORA);

        let summary = fx
            .run(pipeline(&fx.host, os_release), Targets::Fixed(Vec::new()))
            .await
            .unwrap();

        assert_eq!(summary.steps[0].status, OutcomeKind::Skip);
        assert!(summary.steps[0].detail.as_deref().unwrap().contains("fedora"));
        assert_eq!(summary.count(OutcomeKind::Success), 2);
    }

    #[tokio::test]
    async fn test_missing_compose_fails() {
        let (fx, os_release) = with_os_release(UBUNTU);
        fx.runtime.missing.lock().unwrap().insert("compose");

        let err = fx
            .run(pipeline(&fx.host, os_release), Targets::Fixed(Vec::new()))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            EngineError::PhaseFailed { ref phase, .. } if phase == "Check docker compose"
        ));
        let chain = format!("{:#}", anyhow::Error::from(err));
        assert!(chain.contains("docker-compose-plugin"));
    }

    #[tokio::test]
    async fn test_missing_docker_stops_before_compose() {
        let (fx, os_release) = with_os_release(UBUNTU);
        fx.runtime.missing.lock().unwrap().insert("docker");

        let err = fx
            .run(pipeline(&fx.host, os_release), Targets::Fixed(Vec::new()))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            EngineError::PhaseFailed { ref phase, .. } if phase == "Check docker"
        ));
    }
}
