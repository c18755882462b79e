//! Backup command
//!
//! Archives every registered instance into `backups/<stamp>/<id>.tar.gz`
//! (database dump, site sources and compose manifest) and serves the backups
//! directory over HTTPS.

use anyhow::{Context, Result};
use colored::*;
use multipress_core::{Config as Record, Identifier};
use multipress_engine::{Pipeline, RunContext, StepResult, StepStatus, Targets};
use std::path::PathBuf;
use std::sync::Arc;

use super::{Host, once, open_state, per, run_pipeline};
use crate::compose::{ComposeFile, compose_filename};
use crate::config::Config;
use crate::console::{separator, terminal_width};
use crate::database;
use crate::fsutil::{archive, copy_file, copy_tree, ensure_dir, remove_dir};

pub async fn handle_backup(config: &Config) -> Result<()> {
    let host = Host::docker(config).await?;
    let state = open_state(config)?;

    let summary = run_pipeline(
        config,
        Arc::clone(&state),
        pipeline(&host),
        Targets::Existing,
    )
    .await?;

    if !config.json {
        let record = state.snapshot().await;
        let width = terminal_width();
        println!("{}", separator("Backup finished", '═', width).bold());
        println!("URL: {}/{}", record.backups_url(), summary.stamp());
    }
    Ok(())
}

fn pipeline(host: &Arc<Host>) -> Pipeline {
    Pipeline::new("Backup")
        .pre(once(host, "Create backups directory", create_backups_directory))
        .pre(once(host, "Create dated backup directory", create_dated_directory))
        .pre(once(host, "Deploy backup server", deploy_backup_server))
        .per_identifier(per(
            host,
            "Create instance backup directory",
            create_instance_directory,
        ))
        .per_identifier(per(host, "Dump instance database", dump_database))
        .per_identifier(per(host, "Copy instance sources", copy_sources))
        .per_identifier(per(host, "Copy compose manifest", copy_manifest))
        .per_identifier(per(host, "Compress backup", compress))
        .per_identifier(per(
            host,
            "Delete instance backup directory",
            delete_instance_directory,
        ))
}

/// `backups/<stamp>` of this run
fn dated_dir(host: &Host, record: &Record, ctx: &RunContext) -> PathBuf {
    host.path(record.backups_path()).join(ctx.stamp())
}

fn instance_dir(
    host: &Host,
    record: &Record,
    ctx: &RunContext,
    identifier: &Identifier,
) -> PathBuf {
    dated_dir(host, record, ctx).join(identifier.as_str())
}

async fn create_backups_directory(host: Arc<Host>, ctx: RunContext) -> StepResult {
    let record = ctx.config().await;
    ensure_dir(&host.path(record.backups_path()), record.uid, record.gid).await
}

async fn create_dated_directory(host: Arc<Host>, ctx: RunContext) -> StepResult {
    let record = ctx.config().await;
    ensure_dir(&dated_dir(&host, &record, &ctx), record.uid, record.gid).await
}

async fn deploy_backup_server(host: Arc<Host>, ctx: RunContext) -> StepResult {
    let record = ctx.config().await;
    let path = ComposeFile::backup(&record)
        .write(&host.workdir, &compose_filename("backup"))
        .await?;
    host.runtime.compose_up(&path).await?;
    Ok(StepStatus::Done)
}

async fn create_instance_directory(
    host: Arc<Host>,
    ctx: RunContext,
    identifier: Identifier,
) -> StepResult {
    let record = ctx.config().await;
    ensure_dir(
        &instance_dir(&host, &record, &ctx, &identifier),
        record.uid,
        record.gid,
    )
    .await
}

async fn dump_database(host: Arc<Host>, ctx: RunContext, identifier: Identifier) -> StepResult {
    let record = ctx.config().await;
    let credentials = record.credentials(&identifier)?;

    let dump = database::dump(host.runtime.as_ref(), &record, &credentials.dbname).await?;

    let path = instance_dir(&host, &record, &ctx, &identifier).join("dump.sql");
    tokio::fs::write(&path, dump)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(StepStatus::Done)
}

async fn copy_sources(host: Arc<Host>, ctx: RunContext, identifier: Identifier) -> StepResult {
    let record = ctx.config().await;
    copy_tree(
        &host.path(record.instance_volume_path(&identifier)),
        &instance_dir(&host, &record, &ctx, &identifier).join("sources"),
        record.uid,
        record.gid,
    )
    .await?;
    Ok(StepStatus::Done)
}

async fn copy_manifest(host: Arc<Host>, ctx: RunContext, identifier: Identifier) -> StepResult {
    let record = ctx.config().await;
    copy_file(
        &host.path(compose_filename(identifier.as_str())),
        &instance_dir(&host, &record, &ctx, &identifier).join("compose.yaml"),
    )
    .await?;
    Ok(StepStatus::Done)
}

async fn compress(host: Arc<Host>, ctx: RunContext, identifier: Identifier) -> StepResult {
    let record = ctx.config().await;
    let tarball = dated_dir(&host, &record, &ctx).join(format!("{}.tar.gz", identifier));
    archive(&instance_dir(&host, &record, &ctx, &identifier), &tarball).await?;
    Ok(StepStatus::Done)
}

async fn delete_instance_directory(
    host: Arc<Host>,
    ctx: RunContext,
    identifier: Identifier,
) -> StepResult {
    let record = ctx.config().await;
    remove_dir(&instance_dir(&host, &record, &ctx, &identifier)).await?;
    Ok(StepStatus::Done)
}
