//! Configuration record
//!
//! The record holds the project-wide settings plus the mapping from instance
//! identifier to per-instance credentials. It is persisted as YAML with the
//! kebab-case keys used by `multipress.yaml`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

use crate::domain::identifier::Identifier;
use crate::password::generate_password;

/// Length of every generated password
pub const PASSWORD_LENGTH: usize = 16;

/// Validation errors for a configuration record
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("project name cannot be empty")]
    EmptyProject,

    #[error("project name '{0}' only supports [a-z], [0-9], '-' or '_'")]
    InvalidProject(String),

    #[error("base domain cannot be empty")]
    EmptyBaseDomain,

    #[error("instance identifier '{0}' only supports [a-z], [0-9], '-' or '_'")]
    InvalidIdentifier(Identifier),

    #[error("credentials for '{0}' are missing")]
    MissingCredentials(Identifier),
}

fn is_slug(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}

/// Project configuration record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub project: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub base_domain: String,

    #[serde(default)]
    pub uid: u32,

    #[serde(default)]
    pub gid: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caddy: Option<CaddyConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mysql: Option<MysqlConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instances: Option<InstancesConfig>,
}

/// Memory limits applied to a deployed service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourcesConfig {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub memory: String,
}

impl ResourcesConfig {
    pub fn with_memory(memory: &str) -> Self {
        Self {
            memory: memory.to_string(),
        }
    }
}

/// Database and site credentials of one site
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CredentialsConfig {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub dbname: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub dbuser: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub dbpassword: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub username: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub password: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub email: String,
}

/// Reverse proxy settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CaddyConfig {
    #[serde(default)]
    pub resources: ResourcesConfig,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tls_issuer: String,
}

/// Database server settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct MysqlConfig {
    #[serde(default)]
    pub resources: ResourcesConfig,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub root_password: String,
}

/// Model site settings (the site every instance is replicated from)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default)]
    pub resources: ResourcesConfig,
    #[serde(default)]
    pub credentials: CredentialsConfig,
}

/// Replicated instances and their credentials
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstancesConfig {
    #[serde(default)]
    pub resources: ResourcesConfig,
    #[serde(default)]
    pub credentials: BTreeMap<Identifier, CredentialsConfig>,
}

impl Config {
    /// Creates a record with the default project name and no sections
    pub fn new(base_domain: &str, uid: u32, gid: u32) -> Self {
        Self {
            project: "multipress".to_string(),
            base_domain: base_domain.to_string(),
            uid,
            gid,
            ..Default::default()
        }
    }

    /// Validates the global settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.project.is_empty() {
            return Err(ConfigError::EmptyProject);
        }
        if !is_slug(&self.project) {
            return Err(ConfigError::InvalidProject(self.project.clone()));
        }
        if self.base_domain.trim().is_empty() {
            return Err(ConfigError::EmptyBaseDomain);
        }
        // Identifiers end up in paths, SQL identifiers and shell commands
        if let Some(identifier) = self
            .instance_identifiers()
            .into_iter()
            .find(|identifier| !is_slug(identifier.as_str()))
        {
            return Err(ConfigError::InvalidIdentifier(identifier));
        }
        Ok(())
    }

    /// Identifiers currently present in the credential mapping
    pub fn instance_identifiers(&self) -> Vec<Identifier> {
        self.instances
            .as_ref()
            .map(|instances| instances.credentials.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Credentials registered for `identifier`
    pub fn credentials(&self, identifier: &Identifier) -> Result<&CredentialsConfig, ConfigError> {
        self.instances
            .as_ref()
            .and_then(|instances| instances.credentials.get(identifier))
            .ok_or_else(|| ConfigError::MissingCredentials(identifier.clone()))
    }

    /// Owner applied to created volumes, as `uid:gid`
    pub fn owner(&self) -> String {
        format!("{}:{}", self.uid, self.gid)
    }

    pub fn volumes_path(&self) -> PathBuf {
        PathBuf::from("volumes")
    }

    pub fn backups_path(&self) -> PathBuf {
        PathBuf::from("backups")
    }

    pub fn mysql_volume_path(&self) -> PathBuf {
        self.volumes_path().join("mysql")
    }

    pub fn model_volume_path(&self) -> PathBuf {
        self.volumes_path().join("model")
    }

    pub fn instance_volume_path(&self, identifier: &Identifier) -> PathBuf {
        self.volumes_path().join(identifier.as_str())
    }

    pub fn network_name(&self) -> String {
        format!("{}-network", self.project)
    }

    pub fn caddy_container_name(&self) -> String {
        format!("{}-caddy", self.project)
    }

    pub fn backups_container_name(&self) -> String {
        format!("{}-backups", self.project)
    }

    pub fn mysql_container_name(&self) -> String {
        format!("{}-mysql", self.project)
    }

    pub fn model_container_name(&self) -> String {
        format!("{}-model", self.project)
    }

    pub fn instance_container_name(&self, identifier: &Identifier) -> String {
        format!("{}-{}", self.project, identifier)
    }

    pub fn backups_url(&self) -> String {
        format!("https://backups.{}", self.base_domain)
    }

    pub fn model_url(&self) -> String {
        format!("https://model.{}", self.base_domain)
    }

    pub fn instance_url(&self, identifier: &Identifier) -> String {
        format!("https://{}.{}", identifier, self.base_domain)
    }
}

impl CaddyConfig {
    pub fn new_default(tls_issuer: &str) -> Self {
        Self {
            resources: ResourcesConfig::with_memory("256M"),
            tls_issuer: tls_issuer.to_string(),
        }
    }
}

impl MysqlConfig {
    pub fn new_default() -> Self {
        Self {
            resources: ResourcesConfig::with_memory("2G"),
            root_password: generate_password(PASSWORD_LENGTH),
        }
    }
}

impl ModelConfig {
    pub fn new_default(config: &Config) -> Self {
        Self {
            resources: ResourcesConfig::with_memory("512M"),
            credentials: CredentialsConfig {
                dbname: "model".to_string(),
                dbuser: "model".to_string(),
                dbpassword: generate_password(PASSWORD_LENGTH),
                username: "admin".to_string(),
                password: generate_password(PASSWORD_LENGTH),
                email: format!("admin@model.{}", config.base_domain),
            },
        }
    }
}

impl InstancesConfig {
    pub fn new_default() -> Self {
        Self {
            resources: ResourcesConfig::with_memory("512M"),
            credentials: BTreeMap::new(),
        }
    }
}

impl CredentialsConfig {
    /// Fresh credentials for a new instance
    ///
    /// Database name, database user and site user are all the identifier;
    /// both passwords are generated.
    pub fn new_for_instance(config: &Config, identifier: &Identifier) -> Self {
        Self {
            dbname: identifier.to_string(),
            dbuser: identifier.to_string(),
            dbpassword: generate_password(PASSWORD_LENGTH),
            username: identifier.to_string(),
            password: generate_password(PASSWORD_LENGTH),
            email: format!("{}@{}.{}", identifier, identifier, config.base_domain),
        }
    }
}
