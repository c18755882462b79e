//! Deploy command
//!
//! Brings up the shared services of a project in order: network, reverse
//! proxy, database and the model site every instance is cloned from. Each
//! service section of the configuration record is filled with defaults the
//! first time and left alone afterwards.

use anyhow::{Context, Result};
use colored::*;
use multipress_core::Config as Record;
use multipress_core::domain::config::{CaddyConfig, ModelConfig, MysqlConfig};
use multipress_engine::{Phase, Pipeline, RunContext, StepResult, StepStatus, Targets};
use std::sync::Arc;

use super::{Host, once, open_state, run_pipeline};
use crate::compose::{ComposeFile, compose_filename};
use crate::config::Config;
use crate::console::{separator, terminal_width};
use crate::database;
use crate::docker::ExecRequest;
use crate::fsutil::ensure_dir;

const SITE_TITLE: &str = "Mon site Multipress";

pub async fn handle_deploy(tls_issuer: &str, config: &Config) -> Result<()> {
    let host = Host::docker(config).await?;
    let state = open_state(config)?;

    run_pipeline(
        config,
        Arc::clone(&state),
        pipeline(&host, tls_issuer),
        Targets::Fixed(Vec::new()),
    )
    .await?;

    if !config.json {
        let record = state.snapshot().await;
        print_access(&record);
    }
    Ok(())
}

fn pipeline(host: &Arc<Host>, tls_issuer: &str) -> Pipeline {
    let tls_issuer = tls_issuer.to_string();

    Pipeline::new("Deployment")
        .pre(once(host, "Create docker network", create_network))
        .pre(Phase::once_fn("Configure Caddy", move |ctx| {
            configure_caddy(ctx, tls_issuer.clone())
        }))
        .pre(once(host, "Deploy Caddy", deploy_caddy))
        .pre(Phase::once_fn("Configure MySQL", configure_mysql))
        .pre(once(host, "Create volumes directory", create_volumes_directory))
        .pre(once(host, "Create MySQL volume", create_mysql_volume))
        .pre(once(host, "Deploy MySQL", deploy_mysql))
        .pre(Phase::once_fn("Configure model", configure_model))
        .pre(once(host, "Create model volume", create_model_volume))
        .pre(once(host, "Deploy model", deploy_model))
}

fn print_access(record: &Record) {
    let width = terminal_width();
    println!("{}", separator("Deployment finished", '═', width).bold());
    if let Some(model) = &record.model {
        println!("URL: {}/wp-admin/", record.model_url());
        println!("User: {}", model.credentials.username);
        println!("Password: {}", model.credentials.password);
    }
    println!("{}", separator("", '═', width).bold());
}

/// Fills a record section unless it is already present
async fn configure_section(
    ctx: &RunContext,
    present: fn(&Record) -> bool,
    fill: impl FnOnce(&mut Record),
) -> StepResult {
    if ctx.state().read(present).await {
        return Ok(StepStatus::skip("Configuration already defined"));
    }
    ctx.state().update(fill).await?;
    Ok(StepStatus::Done)
}

async fn create_network(host: Arc<Host>, ctx: RunContext) -> StepResult {
    let name = ctx.state().read(|record| record.network_name()).await;

    if host.runtime.network_exists(&name).await? {
        return Ok(StepStatus::skip("Network already exists"));
    }
    host.runtime.create_network(&name).await?;
    Ok(StepStatus::Done)
}

async fn configure_caddy(ctx: RunContext, tls_issuer: String) -> StepResult {
    configure_section(
        &ctx,
        |record| record.caddy.is_some(),
        |record| record.caddy = Some(CaddyConfig::new_default(&tls_issuer)),
    )
    .await
}

async fn configure_mysql(ctx: RunContext) -> StepResult {
    configure_section(
        &ctx,
        |record| record.mysql.is_some(),
        |record| record.mysql = Some(MysqlConfig::new_default()),
    )
    .await
}

async fn configure_model(ctx: RunContext) -> StepResult {
    configure_section(
        &ctx,
        |record| record.model.is_some(),
        |record| {
            let model = ModelConfig::new_default(record);
            record.model = Some(model);
        },
    )
    .await
}

/// Writes the manifest of `name` and brings it up
async fn up(host: &Host, name: &str, file: ComposeFile) -> StepResult {
    let path = file.write(&host.workdir, &compose_filename(name)).await?;
    host.runtime.compose_up(&path).await?;
    Ok(StepStatus::Done)
}

async fn deploy_caddy(host: Arc<Host>, ctx: RunContext) -> StepResult {
    let record = ctx.config().await;
    up(&host, "caddy", ComposeFile::caddy(&record)).await
}

async fn create_volumes_directory(host: Arc<Host>, ctx: RunContext) -> StepResult {
    let record = ctx.config().await;
    ensure_dir(&host.path(record.volumes_path()), record.uid, record.gid).await
}

async fn create_mysql_volume(host: Arc<Host>, ctx: RunContext) -> StepResult {
    let record = ctx.config().await;
    ensure_dir(&host.path(record.mysql_volume_path()), record.uid, record.gid).await
}

async fn deploy_mysql(host: Arc<Host>, ctx: RunContext) -> StepResult {
    let record = ctx.config().await;
    up(&host, "mysql", ComposeFile::mysql(&record)).await
}

async fn create_model_volume(host: Arc<Host>, ctx: RunContext) -> StepResult {
    let record = ctx.config().await;
    ensure_dir(&host.path(record.model_volume_path()), record.uid, record.gid).await
}

/// Deploys the model site, installing WordPress on the first run
async fn deploy_model(host: Arc<Host>, ctx: RunContext) -> StepResult {
    let record = ctx.config().await;
    let model = record.model.as_ref().context("model is not configured")?;
    let installed = host
        .path(record.model_volume_path())
        .join("wp-config.php")
        .exists();

    if !installed {
        database::execute(
            host.runtime.as_ref(),
            &record,
            None,
            &database::bootstrap_statements(&model.credentials),
        )
        .await
        .context("Failed to bootstrap model database")?;
    }

    up(&host, "model", ComposeFile::model(&record)?).await?;

    if !installed {
        install_wordpress(&host, &record).await?;
    }
    Ok(StepStatus::Done)
}

async fn install_wordpress(host: &Host, record: &Record) -> Result<()> {
    let model = record.model.as_ref().context("model is not configured")?;
    let credentials = &model.credentials;

    let commands = [
        format!(
            "wp core install --url='{}' --title='{}' --admin_user='{}' --admin_email='{}' --admin_password='{}' --skip-email",
            record.model_url(),
            SITE_TITLE,
            credentials.username,
            credentials.email,
            credentials.password
        ),
        "echo 'php_value upload_max_filesize 2048M' >> .htaccess".to_string(),
        "echo 'php_value post_max_size 2048M' >> .htaccess".to_string(),
    ];

    for command in commands {
        host.runtime
            .exec(
                &record.model_container_name(),
                ExecRequest::shell(command).user(record.owner()),
            )
            .await
            .context("Error installing WordPress")?;
    }
    Ok(())
}
