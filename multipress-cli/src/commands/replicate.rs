//! Replicate command
//!
//! Clones the model site onto `count` new instances. The model database is
//! dumped once, then every instance is registered, gets a copy of the model
//! volume and its own database, and is deployed behind the proxy, all
//! instances in parallel.

use anyhow::{Context, Result};
use colored::*;
use multipress_core::{CredentialRow, CredentialsConfig, Identifier, InstancesConfig};
use multipress_engine::{
    Phase, Pipeline, RunContext, RunSummary, StepResult, StepStatus, Targets,
};
use std::sync::Arc;

use super::{Host, once, open_state, per, run_pipeline};
use crate::compose::{ComposeFile, compose_filename};
use crate::config::Config;
use crate::console::{separator, terminal_width};
use crate::database;
use crate::docker::ExecRequest;
use crate::fsutil::copy_tree;

/// Model database dump shared by every new instance
const DUMP_FILE: &str = "model_dump.sql";

pub async fn handle_replicate(count: usize, config: &Config) -> Result<()> {
    let host = Host::docker(config).await?;
    let state = open_state(config)?;

    let summary = run_pipeline(
        config,
        Arc::clone(&state),
        pipeline(&host),
        Targets::Allocate(count),
    )
    .await?;

    if !config.json {
        let record = state.snapshot().await;
        print_access(&record, &summary);
    }
    Ok(())
}

fn pipeline(host: &Arc<Host>) -> Pipeline {
    Pipeline::new("Replication")
        .pre(Phase::once_fn(
            "Initialize instances configuration",
            initialize_instances,
        ))
        .pre(once(host, "Dump model database", dump_model_database))
        .pre(Phase::once_fn("Create credentials ledger", create_ledger))
        .per_identifier(Phase::per_identifier_fn(
            "Configure instance",
            configure_instance,
        ))
        .per_identifier(per(host, "Clone model volume", clone_model_volume))
        .per_identifier(per(host, "Bootstrap database", bootstrap_database))
        .per_identifier(per(host, "Deploy instance", deploy_instance))
        .per_identifier(per(host, "Override site URLs", override_site_urls))
        .post(once(host, "Delete model dump", delete_model_dump))
}

fn print_access(record: &multipress_core::Config, summary: &RunSummary) {
    let width = terminal_width();
    println!("{}", separator("Replication finished", '═', width).bold());
    for identifier in &summary.identifiers {
        if let Ok(credentials) = record.credentials(identifier) {
            println!("URL: {}/wp-admin/", record.instance_url(identifier));
            println!("Username: {}", credentials.username);
            println!("Password: {}", credentials.password);
            println!("{}", separator("", '─', width));
        }
    }
    if !summary.failed.is_empty() {
        let failed: Vec<&str> = summary.failed.iter().map(Identifier::as_str).collect();
        println!("{} {}", "Failed:".red().bold(), failed.join(", "));
    }
}

async fn initialize_instances(ctx: RunContext) -> StepResult {
    if ctx.state().read(|record| record.instances.is_some()).await {
        return Ok(StepStatus::skip("Configuration already defined"));
    }
    ctx.state()
        .update(|record| record.instances = Some(InstancesConfig::new_default()))
        .await?;
    Ok(StepStatus::Done)
}

async fn dump_model_database(host: Arc<Host>, ctx: RunContext) -> StepResult {
    let record = ctx.config().await;
    let model = record.model.as_ref().context("model is not deployed")?;

    let dump = database::dump(host.runtime.as_ref(), &record, &model.credentials.dbname).await?;

    let path = host.path(DUMP_FILE);
    tokio::fs::write(&path, dump)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(StepStatus::Done)
}

async fn create_ledger(ctx: RunContext) -> StepResult {
    if ctx.state().initialize_ledger(&CredentialRow::header()).await? {
        Ok(StepStatus::Done)
    } else {
        Ok(StepStatus::skip("Ledger already exists"))
    }
}

/// Registers fresh credentials for the instance and records them in the ledger
async fn configure_instance(ctx: RunContext, identifier: Identifier) -> StepResult {
    let row = ctx
        .state()
        .update(|record| {
            let credentials = CredentialsConfig::new_for_instance(record, &identifier);
            let row = CredentialRow::new(record, &identifier, &credentials);
            record
                .instances
                .get_or_insert_with(InstancesConfig::new_default)
                .credentials
                .insert(identifier.clone(), credentials);
            row
        })
        .await?;

    ctx.state().append_ledger(row.into_fields()).await?;
    Ok(StepStatus::Done)
}

async fn clone_model_volume(
    host: Arc<Host>,
    ctx: RunContext,
    identifier: Identifier,
) -> StepResult {
    let record = ctx.config().await;
    let target = host.path(record.instance_volume_path(&identifier));

    if target.exists() {
        return Ok(StepStatus::skip(format!(
            "{} already exists",
            record.instance_volume_path(&identifier).display()
        )));
    }

    copy_tree(
        &host.path(record.model_volume_path()),
        &target,
        record.uid,
        record.gid,
    )
    .await?;
    Ok(StepStatus::Done)
}

/// Creates the instance database from the model dump and rewrites its site URLs
async fn bootstrap_database(
    host: Arc<Host>,
    ctx: RunContext,
    identifier: Identifier,
) -> StepResult {
    let record = ctx.config().await;
    let credentials = record.credentials(&identifier)?;
    let runtime = host.runtime.as_ref();

    database::execute(
        runtime,
        &record,
        None,
        &database::bootstrap_statements(credentials),
    )
    .await?;

    let path = host.path(DUMP_FILE);
    let dump = tokio::fs::read(&path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    database::import(runtime, &record, &credentials.dbname, dump).await?;

    database::execute(
        runtime,
        &record,
        Some(&credentials.dbname),
        &database::site_override_statements(&record.instance_url(&identifier), credentials),
    )
    .await?;
    Ok(StepStatus::Done)
}

async fn deploy_instance(host: Arc<Host>, ctx: RunContext, identifier: Identifier) -> StepResult {
    let record = ctx.config().await;
    let file = ComposeFile::instance(&record, &identifier)?;
    let path = file
        .write(&host.workdir, &compose_filename(identifier.as_str()))
        .await?;

    host.runtime.compose_up(&path).await?;
    Ok(StepStatus::Done)
}

/// Replaces the model URL left in posts and options by the instance URL
async fn override_site_urls(
    host: Arc<Host>,
    ctx: RunContext,
    identifier: Identifier,
) -> StepResult {
    let record = ctx.config().await;
    let command = format!(
        "wp search-replace '{}' '{}'",
        record.model_url(),
        record.instance_url(&identifier)
    );

    host.runtime
        .exec(
            &record.instance_container_name(&identifier),
            ExecRequest::shell(command).user(record.owner()),
        )
        .await
        .context("Error overriding WordPress URLs")?;
    Ok(StepStatus::Done)
}

async fn delete_model_dump(host: Arc<Host>, _ctx: RunContext) -> StepResult {
    let path = host.path(DUMP_FILE);
    if !path.exists() {
        return Ok(StepStatus::skip("Model dump not found"));
    }

    tokio::fs::remove_file(&path)
        .await
        .with_context(|| format!("Failed to remove {}", path.display()))?;
    Ok(StepStatus::Done)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing::{Fixture, fixture};
    use multipress_engine::{EngineError, OutcomeKind};
    use std::fs;

    fn with_model_volume() -> Fixture {
        let fx = fixture();
        fs::create_dir_all(fx.path("volumes/model/wp-content")).unwrap();
        fs::write(fx.path("volumes/model/index.php"), "<?php").unwrap();
        fx
    }

    #[tokio::test]
    async fn test_replicate_two_instances() {
        let fx = with_model_volume();

        let summary = fx
            .run(pipeline(&fx.host), Targets::Allocate(2))
            .await
            .unwrap();

        let ids = vec![Identifier::from("user1"), Identifier::from("user2")];
        assert_eq!(summary.identifiers, ids);
        assert_eq!(summary.count(OutcomeKind::Fail), 0);
        // three pre, five per instance, one post
        assert_eq!(summary.steps.len(), 3 + 5 * 2 + 1);

        let saved = fx.store.saved().unwrap();
        assert_eq!(saved.instance_identifiers(), ids);

        let rows = fx.ledger.rows();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0], CredentialRow::header());
        let urls: Vec<&str> = rows[1..].iter().map(|row| row[0].as_str()).collect();
        assert!(urls.contains(&"https://user1.example.org"));
        assert!(urls.contains(&"https://user2.example.org"));

        for id in ["user1", "user2"] {
            assert!(fx.path(&format!("volumes/{}/index.php", id)).is_file());
            assert!(fx.path(&format!("compose.{}.yaml", id)).is_file());
        }
        assert!(!fx.path(DUMP_FILE).exists());

        let calls = fx.runtime.calls();
        assert_eq!(calls[0], "exec multipress-mysql mysqldump -u root model");
        assert!(calls.contains(&"exec multipress-mysql mysql -u root user2".to_string()));
        let search_replace = "exec multipress-user1 bash -c wp search-replace \
                              'https://model.example.org' 'https://user1.example.org'";
        assert!(calls.iter().any(|call| call == search_replace));
    }

    #[tokio::test]
    async fn test_new_identifiers_follow_existing_ones() {
        let fx = with_model_volume();
        fx.register("user7").await;

        let summary = fx
            .run(pipeline(&fx.host), Targets::Allocate(1))
            .await
            .unwrap();

        assert_eq!(summary.identifiers, vec![Identifier::from("user8")]);
        assert_eq!(
            summary.steps[0].status,
            OutcomeKind::Skip,
            "instances section already existed"
        );
    }

    #[tokio::test]
    async fn test_failing_instance_aborts_before_cleanup() {
        let fx = with_model_volume();
        fx.runtime
            .broken
            .lock()
            .unwrap()
            .insert("multipress-user2".to_string());

        let err = fx
            .run(pipeline(&fx.host), Targets::Allocate(3))
            .await
            .unwrap_err();

        match &err {
            EngineError::FanOutFailed { phase, .. } => assert_eq!(phase, "Override site URLs"),
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(err.failed_identifiers(), vec![&Identifier::from("user2")]);

        // Siblings were registered and deployed, the post-phase never ran
        assert_eq!(fx.store.saved().unwrap().instance_identifiers().len(), 3);
        assert!(fx.path("compose.user3.yaml").is_file());
        assert!(fx.path(DUMP_FILE).exists());
    }

    #[tokio::test]
    async fn test_failed_clone_is_repaired_on_rerun() {
        let fx = fixture();

        let err = fx
            .run(pipeline(&fx.host), Targets::Allocate(1))
            .await
            .unwrap_err();
        assert_eq!(err.failed_identifiers(), vec![&Identifier::from("user1")]);
        assert!(!fx.path("volumes/user1").exists());

        fs::create_dir_all(fx.path("volumes/model")).unwrap();
        fs::write(fx.path("volumes/model/index.php"), "<?php").unwrap();

        let clone_only = Pipeline::new("Clone")
            .per_identifier(per(&fx.host, "Clone model volume", clone_model_volume));
        let summary = fx
            .run(clone_only, Targets::Fixed(vec![Identifier::from("user1")]))
            .await
            .unwrap();

        assert_eq!(summary.count(OutcomeKind::Success), 1);
        assert!(fx.path("volumes/user1/index.php").is_file());
    }

    #[tokio::test]
    async fn test_existing_volume_is_kept() {
        let fx = with_model_volume();
        fs::create_dir_all(fx.path("volumes/user1")).unwrap();
        fs::write(fx.path("volumes/user1/custom.php"), "keep").unwrap();

        let summary = fx
            .run(pipeline(&fx.host), Targets::Allocate(1))
            .await
            .unwrap();

        let clone = summary
            .steps
            .iter()
            .find(|step| step.phase == "Clone model volume")
            .unwrap();
        assert_eq!(clone.status, OutcomeKind::Skip);
        assert!(!fx.path("volumes/user1/index.php").exists());
    }
}
