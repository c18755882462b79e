//! Compose manifests
//!
//! Every service is deployed from its own `compose.<name>.yaml`. Manifests are
//! built from typed structures and serialized with `serde_yaml`; sites are
//! exposed through caddy-docker-proxy labels on the project network.

use anyhow::{Context, Result};
use multipress_core::{Config, CredentialsConfig, Identifier};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const CADDY_IMAGE: &str = "lucaslorentz/caddy-docker-proxy:2.9-alpine";
const MYSQL_IMAGE: &str = "mysql:8.0";
const BACKUP_IMAGE: &str = "caddy:2-alpine";

/// Port every proxied service listens on; sites run unprivileged
const SITE_PORT: u16 = 8080;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ComposeFile {
    pub name: String,
    pub services: BTreeMap<String, Service>,
    pub networks: BTreeMap<String, Network>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub volumes: BTreeMap<String, NamedVolume>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Service {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build: Option<Build>,
    pub container_name: String,
    pub restart: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    pub networks: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub healthcheck: Option<Healthcheck>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deploy: Option<Deploy>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Build {
    pub context: String,
    pub dockerfile: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Healthcheck {
    pub test: Vec<String>,
    pub interval: String,
    pub timeout: String,
    pub retries: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Deploy {
    pub resources: Resources,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resources {
    pub limits: Limits,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Limits {
    pub memory: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Network {
    pub external: bool,
}

/// Docker-managed volume with default options
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NamedVolume {}

/// Manifest file name for a service
pub fn compose_filename(name: &str) -> String {
    format!("compose.{}.yaml", name)
}

fn memory_limit(memory: &str) -> Option<Deploy> {
    if memory.is_empty() {
        return None;
    }
    Some(Deploy {
        resources: Resources {
            limits: Limits {
                memory: memory.to_string(),
            },
        },
    })
}

/// caddy-docker-proxy labels routing `url` to the service
fn site_labels(config: &Config, url: &str) -> BTreeMap<String, String> {
    let host = url
        .trim_start_matches("https://")
        .trim_start_matches("http://");

    let mut labels = BTreeMap::new();
    labels.insert("caddy".to_string(), host.to_string());
    labels.insert(
        "caddy.reverse_proxy".to_string(),
        format!("{{{{upstreams {}}}}}", SITE_PORT),
    );

    let tls_issuer = config
        .caddy
        .as_ref()
        .map(|caddy| caddy.tls_issuer.as_str())
        .unwrap_or_default();
    if tls_issuer == "internal" {
        labels.insert("caddy.tls".to_string(), "internal".to_string());
    }
    labels
}

fn wordpress_service(
    config: &Config,
    container_name: String,
    url: &str,
    credentials: &CredentialsConfig,
    volume: &Path,
    memory: &str,
) -> Service {
    let environment = BTreeMap::from([
        (
            "WORDPRESS_DB_HOST".to_string(),
            config.mysql_container_name(),
        ),
        ("WORDPRESS_DB_NAME".to_string(), credentials.dbname.clone()),
        ("WORDPRESS_DB_USER".to_string(), credentials.dbuser.clone()),
        (
            "WORDPRESS_DB_PASSWORD".to_string(),
            credentials.dbpassword.clone(),
        ),
    ]);

    Service {
        image: Some(format!("{}-wordpress", config.project)),
        build: Some(Build {
            context: ".".to_string(),
            dockerfile: crate::commands::init::DOCKERFILE_NAME.to_string(),
        }),
        container_name,
        restart: "unless-stopped".to_string(),
        user: Some(config.owner()),
        environment,
        volumes: vec![format!("./{}:/var/www/html", volume.display())],
        labels: site_labels(config, url),
        networks: vec![config.network_name()],
        deploy: memory_limit(memory),
        ..Default::default()
    }
}

impl ComposeFile {
    fn single(config: &Config, key: &str, service: Service) -> Self {
        Self {
            name: format!("{}-{}", config.project, key),
            services: BTreeMap::from([(key.to_string(), service)]),
            networks: BTreeMap::from([(config.network_name(), Network { external: true })]),
            volumes: BTreeMap::new(),
        }
    }

    pub fn caddy(config: &Config) -> Self {
        let memory = config
            .caddy
            .as_ref()
            .map(|caddy| caddy.resources.memory.as_str())
            .unwrap_or_default();

        let service = Service {
            image: Some(CADDY_IMAGE.to_string()),
            container_name: config.caddy_container_name(),
            restart: "unless-stopped".to_string(),
            ports: vec!["80:80".to_string(), "443:443".to_string()],
            environment: BTreeMap::from([(
                "CADDY_INGRESS_NETWORKS".to_string(),
                config.network_name(),
            )]),
            volumes: vec![
                "/var/run/docker.sock:/var/run/docker.sock".to_string(),
                "caddy_data:/data".to_string(),
            ],
            networks: vec![config.network_name()],
            deploy: memory_limit(memory),
            ..Default::default()
        };

        let mut file = Self::single(config, "caddy", service);
        file.volumes
            .insert("caddy_data".to_string(), NamedVolume::default());
        file
    }

    pub fn mysql(config: &Config) -> Self {
        let (memory, root_password) = config
            .mysql
            .as_ref()
            .map(|mysql| (mysql.resources.memory.as_str(), mysql.root_password.as_str()))
            .unwrap_or_default();

        let service = Service {
            image: Some(MYSQL_IMAGE.to_string()),
            container_name: config.mysql_container_name(),
            restart: "unless-stopped".to_string(),
            user: Some(config.owner()),
            environment: BTreeMap::from([(
                "MYSQL_ROOT_PASSWORD".to_string(),
                root_password.to_string(),
            )]),
            volumes: vec![format!(
                "./{}:/var/lib/mysql",
                config.mysql_volume_path().display()
            )],
            networks: vec![config.network_name()],
            healthcheck: Some(Healthcheck {
                test: vec![
                    "CMD-SHELL".to_string(),
                    "mysqladmin ping -h localhost -uroot -p$$MYSQL_ROOT_PASSWORD".to_string(),
                ],
                interval: "5s".to_string(),
                timeout: "5s".to_string(),
                retries: 20,
            }),
            deploy: memory_limit(memory),
            ..Default::default()
        };

        Self::single(config, "mysql", service)
    }

    pub fn model(config: &Config) -> Result<Self> {
        let model = config
            .model
            .as_ref()
            .context("model is not configured")?;

        let service = wordpress_service(
            config,
            config.model_container_name(),
            &config.model_url(),
            &model.credentials,
            &config.model_volume_path(),
            &model.resources.memory,
        );
        Ok(Self::single(config, "model", service))
    }

    pub fn instance(config: &Config, identifier: &Identifier) -> Result<Self> {
        let credentials = config.credentials(identifier)?;
        let memory = config
            .instances
            .as_ref()
            .map(|instances| instances.resources.memory.as_str())
            .unwrap_or_default();

        let service = wordpress_service(
            config,
            config.instance_container_name(identifier),
            &config.instance_url(identifier),
            credentials,
            &config.instance_volume_path(identifier),
            memory,
        );
        Ok(Self::single(config, identifier.as_str(), service))
    }

    /// Static file server browsing the backups directory
    pub fn backup(config: &Config) -> Self {
        let service = Service {
            image: Some(BACKUP_IMAGE.to_string()),
            container_name: config.backups_container_name(),
            restart: "unless-stopped".to_string(),
            command: Some(vec![
                "caddy".to_string(),
                "file-server".to_string(),
                "--browse".to_string(),
                "--listen".to_string(),
                ":8080".to_string(),
                "--root".to_string(),
                "/srv".to_string(),
            ]),
            volumes: vec![format!("./{}:/srv:ro", config.backups_path().display())],
            labels: site_labels(config, &config.backups_url()),
            networks: vec![config.network_name()],
            ..Default::default()
        };

        Self::single(config, "backup", service)
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Failed to serialize compose manifest")
    }

    /// Writes the manifest and returns its path
    pub async fn write(&self, workdir: &Path, filename: &str) -> Result<PathBuf> {
        let path = workdir.join(filename);
        tokio::fs::write(&path, self.to_yaml()?)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }
}
