//! Configuration module
//!
//! Handles CLI configuration: file locations, working directory and the
//! engine settings applied to every pipeline run.

use multipress_engine::EngineConfig;
use std::path::{Path, PathBuf};

/// CLI configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Configuration record, relative to the working directory
    pub config_path: PathBuf,
    /// Credential ledger, relative to the working directory
    pub ledger_path: PathBuf,
    /// Project directory holding the record, compose files and volumes
    pub workdir: PathBuf,
    pub engine: EngineConfig,
    /// Print the run summary as JSON on stdout
    pub json: bool,
}

impl Config {
    pub fn config_file(&self) -> PathBuf {
        resolve(&self.workdir, &self.config_path)
    }

    pub fn ledger_file(&self) -> PathBuf {
        resolve(&self.workdir, &self.ledger_path)
    }
}

fn resolve(workdir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        workdir.join(path)
    }
}
