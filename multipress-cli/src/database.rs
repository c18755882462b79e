//! MySQL administration through the database container
//!
//! Statements are piped to the `mysql` client inside the MySQL container with
//! the root password passed as `MYSQL_PWD`, so the host needs no driver and
//! no network route to the database.

use anyhow::{Context, Result};
use multipress_core::{Config, CredentialsConfig};

use crate::docker::{ContainerRuntime, ExecRequest};

/// Escapes a value embedded in a single-quoted SQL string
fn quote(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Recreates the database and user described by `credentials`
pub fn bootstrap_statements(credentials: &CredentialsConfig) -> Vec<String> {
    let db = &credentials.dbname;
    let user = quote(&credentials.dbuser);
    vec![
        format!("DROP DATABASE IF EXISTS `{}`", db),
        format!("DROP USER IF EXISTS '{}'@'%'", user),
        format!("CREATE DATABASE IF NOT EXISTS `{}`", db),
        format!(
            "CREATE USER IF NOT EXISTS '{}'@'%' IDENTIFIED BY '{}'",
            user,
            quote(&credentials.dbpassword)
        ),
        format!("GRANT ALL PRIVILEGES ON `{}`.* TO '{}'@'%'", db, user),
        "FLUSH PRIVILEGES".to_string(),
    ]
}

/// Rewrites the admin account and site URLs of a cloned WordPress database
pub fn site_override_statements(url: &str, credentials: &CredentialsConfig) -> Vec<String> {
    let url = quote(url);
    let username = quote(&credentials.username);
    let email = quote(&credentials.email);
    vec![
        format!(
            "UPDATE wp_users SET user_pass = MD5('{}'), user_url = '{}', user_login = '{}', \
             user_nicename = '{}', display_name = '{}', user_email = '{}' WHERE wp_users.ID = 1",
            quote(&credentials.password),
            url,
            username,
            username,
            username,
            email
        ),
        format!(
            "UPDATE wp_options SET option_value = '{}' \
             WHERE option_name = 'siteurl' OR option_name = 'home'",
            url
        ),
        format!(
            "UPDATE wp_options SET option_value = '{}' WHERE option_name = 'admin_email'",
            email
        ),
    ]
}

/// Joins statements into a script fed to the mysql client
pub fn script(statements: &[String]) -> String {
    statements
        .iter()
        .map(|statement| format!("{};\n", statement))
        .collect()
}

fn root_password(config: &Config) -> Result<&str> {
    config
        .mysql
        .as_ref()
        .map(|mysql| mysql.root_password.as_str())
        .context("mysql is not configured")
}

fn root_request(config: &Config, cmd: Vec<String>) -> Result<ExecRequest> {
    Ok(ExecRequest::new(cmd).env("MYSQL_PWD", root_password(config)?))
}

/// Runs `statements` as root, optionally against `database`
pub async fn execute(
    runtime: &dyn ContainerRuntime,
    config: &Config,
    database: Option<&str>,
    statements: &[String],
) -> Result<()> {
    let mut cmd = vec!["mysql".to_string(), "-u".to_string(), "root".to_string()];
    cmd.extend(database.map(str::to_string));

    let request = root_request(config, cmd)?.stdin(script(statements).into_bytes());
    runtime
        .exec(&config.mysql_container_name(), request)
        .await
        .context("Failed to execute SQL statements")?;
    Ok(())
}

/// Returns a full SQL dump of `database`
pub async fn dump(runtime: &dyn ContainerRuntime, config: &Config, database: &str) -> Result<String> {
    let cmd = vec![
        "mysqldump".to_string(),
        "-u".to_string(),
        "root".to_string(),
        database.to_string(),
    ];
    runtime
        .exec(&config.mysql_container_name(), root_request(config, cmd)?)
        .await
        .with_context(|| format!("Failed to dump database {}", database))
}

/// Loads a SQL dump into `database`
pub async fn import(
    runtime: &dyn ContainerRuntime,
    config: &Config,
    database: &str,
    dump: Vec<u8>,
) -> Result<()> {
    let cmd = vec![
        "mysql".to_string(),
        "-u".to_string(),
        "root".to_string(),
        database.to_string(),
    ];
    runtime
        .exec(&config.mysql_container_name(), root_request(config, cmd)?.stdin(dump))
        .await
        .with_context(|| format!("Failed to import dump into {}", database))?;
    Ok(())
}
