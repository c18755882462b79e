//! Init command handler
//!
//! Creates the configuration record of a new project and the Dockerfile used
//! to build every WordPress site image.

use anyhow::{Context, Result};
use clap::Args;
use colored::*;
use multipress_core::Config as Record;
use multipress_engine::{ConfigStore, YamlConfigStore};
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

use crate::config::Config;

pub const DOCKERFILE_NAME: &str = "wordpress.Dockerfile";

const WORDPRESS_DOCKERFILE: &str = r#"FROM wordpress:php8.3-apache

RUN curl -fsSL -o /usr/local/bin/wp https://raw.githubusercontent.com/wp-cli/builds/gh-pages/phar/wp-cli.phar \
    && chmod +x /usr/local/bin/wp

# Sites run as the project owner, which cannot bind privileged ports
RUN sed -i 's/Listen 80$/Listen 8080/' /etc/apache2/ports.conf \
    && sed -i 's/<VirtualHost \*:80>/<VirtualHost *:8080>/' /etc/apache2/sites-available/000-default.conf

EXPOSE 8080
"#;

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Project name, used to prefix containers and the network
    #[arg(long, default_value = "multipress")]
    pub project: String,

    /// Base domain; sites are served from <name>.<domain>
    #[arg(long)]
    pub domain: String,

    /// Overwrite an existing configuration
    #[arg(short, long)]
    pub force: bool,
}

/// Handle the init command
pub async fn handle_init(args: InitArgs, config: &Config) -> Result<()> {
    let path = init_project(&args, config)?;

    println!("{}", "✓ Project configuration created!".green().bold());
    println!();
    println!("{}", "Next steps:".bold());
    println!("  1. Review {}", path.display());
    println!("  2. Run {} to start the shared services", "multipress deploy".cyan());
    println!(
        "  3. Run {} to create instances",
        "multipress replicate <count>".cyan()
    );

    Ok(())
}

/// Writes the configuration record and the site Dockerfile
fn init_project(args: &InitArgs, config: &Config) -> Result<std::path::PathBuf> {
    fs::create_dir_all(&config.workdir)
        .with_context(|| format!("Failed to create {}", config.workdir.display()))?;

    let store = YamlConfigStore::new(config.config_file());
    if store.exists() && !args.force {
        anyhow::bail!(
            "{} already exists, use --force to overwrite it",
            store.path().display()
        );
    }

    let (uid, gid) = owner(&config.workdir)?;
    let mut record = Record::new(args.domain.trim(), uid, gid);
    record.project = args.project.trim().to_string();
    record.validate()?;

    store.persist(&record)?;

    let dockerfile = config.workdir.join(DOCKERFILE_NAME);
    fs::write(&dockerfile, WORDPRESS_DOCKERFILE)
        .with_context(|| format!("Failed to write {}", dockerfile.display()))?;

    Ok(store.path().to_path_buf())
}

/// Owner of the project directory, applied to every volume
fn owner(dir: &Path) -> Result<(u32, u32)> {
    let meta =
        fs::metadata(dir).with_context(|| format!("Failed to read {}", dir.display()))?;
    Ok((meta.uid(), meta.gid()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use multipress_engine::EngineConfig;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn cli_config(workdir: &Path) -> Config {
        Config {
            config_path: PathBuf::from("multipress.yaml"),
            ledger_path: PathBuf::from("instance-credentials.csv"),
            workdir: workdir.to_path_buf(),
            engine: EngineConfig::default(),
            json: false,
        }
    }

    fn args(project: &str, force: bool) -> InitArgs {
        InitArgs {
            project: project.to_string(),
            domain: "example.org".to_string(),
            force,
        }
    }

    #[test]
    fn test_init_writes_record_and_dockerfile() {
        let dir = tempdir().unwrap();
        let config = cli_config(dir.path());

        init_project(&args("agency", false), &config).unwrap();

        let record = YamlConfigStore::new(config.config_file()).load().unwrap();
        assert_eq!(record.project, "agency");
        assert_eq!(record.base_domain, "example.org");
        assert_eq!((record.uid, record.gid), owner(dir.path()).unwrap());
        assert!(record.caddy.is_none());

        let dockerfile = fs::read_to_string(dir.path().join(DOCKERFILE_NAME)).unwrap();
        assert!(dockerfile.contains("Listen 8080"));
    }

    #[test]
    fn test_init_refuses_to_overwrite_without_force() {
        let dir = tempdir().unwrap();
        let config = cli_config(dir.path());

        init_project(&args("agency", false), &config).unwrap();
        let err = init_project(&args("other", false), &config).unwrap_err();
        assert!(err.to_string().contains("--force"));

        init_project(&args("other", true), &config).unwrap();
        let record = YamlConfigStore::new(config.config_file()).load().unwrap();
        assert_eq!(record.project, "other");
    }

    #[test]
    fn test_init_rejects_invalid_project() {
        let dir = tempdir().unwrap();
        let config = cli_config(dir.path());

        assert!(init_project(&args("My Project", false), &config).is_err());
        assert!(!config.config_file().exists());
    }
}
