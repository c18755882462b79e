//! Docker container runtime
//!
//! Every interaction with containers goes through [`ContainerRuntime`]:
//! - Checking docker and docker compose availability
//! - Creating the project network
//! - Bringing compose manifests up and down
//! - Executing commands inside running containers
//!
//! [`DockerCli`] shells out to the `docker` binary.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

/// Command executed inside a running container
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecRequest {
    pub cmd: Vec<String>,
    pub env: Vec<(String, String)>,
    /// `uid:gid` to run as
    pub user: Option<String>,
    /// Bytes written to the command's standard input
    pub stdin: Option<Vec<u8>>,
}

impl ExecRequest {
    pub fn new<I, S>(cmd: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            cmd: cmd.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Runs `script` through `bash -c`
    pub fn shell(script: impl Into<String>) -> Self {
        Self::new(["bash".to_string(), "-c".to_string(), script.into()])
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.env.push((key.to_string(), value.to_string()));
        self
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn stdin(mut self, data: Vec<u8>) -> Self {
        self.stdin = Some(data);
        self
    }

    /// Arguments passed to `docker`
    pub fn to_args(&self, container: &str) -> Vec<String> {
        let mut args = vec!["exec".to_string()];
        if self.stdin.is_some() {
            args.push("-i".to_string());
        }
        for (key, value) in &self.env {
            args.push("-e".to_string());
            args.push(format!("{}={}", key, value));
        }
        if let Some(user) = &self.user {
            args.push("-u".to_string());
            args.push(user.clone());
        }
        args.push(container.to_string());
        args.extend(self.cmd.iter().cloned());
        args
    }
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// `docker --version`
    async fn version(&self) -> Result<String>;

    /// `docker compose version`
    async fn compose_version(&self) -> Result<String>;

    async fn network_exists(&self, name: &str) -> Result<bool>;

    async fn create_network(&self, name: &str) -> Result<()>;

    /// `docker compose -f <file> up -d --wait`
    async fn compose_up(&self, file: &Path) -> Result<String>;

    /// `docker compose -f <file> down`
    async fn compose_down(&self, file: &Path) -> Result<String>;

    /// Runs a command in a running container and returns its standard output
    async fn exec(&self, container: &str, request: ExecRequest) -> Result<String>;
}

/// Runtime backed by the `docker` command line
pub struct DockerCli {
    workdir: PathBuf,
}

impl DockerCli {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    /// Checks if docker is installed and available
    pub async fn check_available(&self) -> Result<()> {
        let version = self.version().await?;
        info!("Docker is available: {}", version);
        Ok(())
    }

    async fn run(&self, args: &[String], stdin: Option<&[u8]>) -> Result<Output> {
        debug!("docker {}", args.join(" "));

        let mut command = Command::new("docker");
        command
            .args(args)
            .current_dir(&self.workdir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            });

        let mut child = command
            .spawn()
            .with_context(|| format!("Failed to execute docker {}", args.join(" ")))?;

        if let (Some(data), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(data)
                .await
                .context("Failed to write to docker stdin")?;
            // Closing stdin lets the command see EOF
            drop(pipe);
        }

        child
            .wait_with_output()
            .await
            .context("Failed to wait for docker")
    }

    /// Runs docker and fails with the captured output on a non-zero exit
    async fn run_checked(&self, args: &[String], stdin: Option<&[u8]>) -> Result<String> {
        let output = self.run(args, stdin).await?;
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !stderr.trim().is_empty() {
            debug!("docker stderr: {}", stderr.trim());
        }

        if !output.status.success() {
            let exit_code = output.status.code().unwrap_or(-1);
            anyhow::bail!(
                "docker {} failed: exit_code={}, stdout='{}', stderr='{}'",
                args.first().map(String::as_str).unwrap_or_default(),
                exit_code,
                stdout.trim(),
                stderr.trim()
            );
        }

        Ok(stdout)
    }

    async fn is_running(&self, container: &str) -> Result<bool> {
        let args = vec![
            "inspect".to_string(),
            "-f".to_string(),
            "{{.State.Running}}".to_string(),
            container.to_string(),
        ];
        let state = self
            .run_checked(&args, None)
            .await
            .with_context(|| format!("Error inspecting container {}", container))?;
        Ok(state.trim() == "true")
    }
}

fn compose_args(file: &Path, action: &[&str]) -> Vec<String> {
    let mut args = vec![
        "compose".to_string(),
        "-f".to_string(),
        file.to_string_lossy().to_string(),
    ];
    args.extend(action.iter().map(|s| s.to_string()));
    args
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn version(&self) -> Result<String> {
        let output = self
            .run_checked(&["--version".to_string()], None)
            .await
            .context("Failed to execute 'docker --version'. Is docker installed?")?;
        Ok(output.trim().to_string())
    }

    async fn compose_version(&self) -> Result<String> {
        let args = vec!["compose".to_string(), "version".to_string()];
        let output = self
            .run_checked(&args, None)
            .await
            .context("Failed to execute 'docker compose version'")?;
        Ok(output.trim().to_string())
    }

    async fn network_exists(&self, name: &str) -> Result<bool> {
        let args = vec![
            "network".to_string(),
            "ls".to_string(),
            "--filter".to_string(),
            format!("name={}", name),
            "--format".to_string(),
            "{{.Name}}".to_string(),
        ];
        let output = self
            .run_checked(&args, None)
            .await
            .context("Failed to check existing networks")?;

        // The name filter matches substrings
        Ok(output.lines().any(|line| line.trim() == name))
    }

    async fn create_network(&self, name: &str) -> Result<()> {
        let args = vec!["network".to_string(), "create".to_string(), name.to_string()];
        self.run_checked(&args, None)
            .await
            .with_context(|| format!("Failed to create network {}", name))?;
        info!("Created network {}", name);
        Ok(())
    }

    async fn compose_up(&self, file: &Path) -> Result<String> {
        self.run_checked(&compose_args(file, &["up", "-d", "--wait"]), None)
            .await
            .with_context(|| format!("Failed to deploy {}", file.display()))
    }

    async fn compose_down(&self, file: &Path) -> Result<String> {
        self.run_checked(&compose_args(file, &["down"]), None)
            .await
            .with_context(|| format!("Failed to down {}", file.display()))
    }

    async fn exec(&self, container: &str, request: ExecRequest) -> Result<String> {
        if !self.is_running(container).await? {
            anyhow::bail!("container {} is not running", container);
        }

        self.run_checked(&request.to_args(container), request.stdin.as_deref())
            .await
            .with_context(|| format!("Command failed in container {}", container))
    }
}
