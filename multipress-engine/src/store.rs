//! Durable stores for the configuration record and the credential ledger
//!
//! Stores hold their own location; the shared-state guard decides when they
//! are called and serializes the calls.

use multipress_core::Config;
use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

use crate::error::StoreError;

/// Loads and persists the configuration record
pub trait ConfigStore: Send + Sync {
    fn load(&self) -> Result<Config, StoreError>;

    fn persist(&self, config: &Config) -> Result<(), StoreError>;
}

/// Append-only credential ledger
pub trait LedgerStore: Send + Sync {
    /// Creates the ledger with its header row
    ///
    /// Returns `false` without touching anything when the ledger already exists.
    fn initialize(&self, header: &[String]) -> Result<bool, StoreError>;

    /// Appends exactly one row
    fn append_row(&self, fields: &[String]) -> Result<(), StoreError>;
}

/// YAML file holding the configuration record
#[derive(Debug, Clone)]
pub struct YamlConfigStore {
    path: PathBuf,
}

impl YamlConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "config".to_string());
        self.path.with_file_name(format!(".{}.tmp", name))
    }
}

impl ConfigStore for YamlConfigStore {
    fn load(&self) -> Result<Config, StoreError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::NotFound(self.path.clone()));
            }
            Err(e) => return Err(StoreError::io(&self.path, e)),
        };

        serde_yaml::from_str(&content).map_err(|source| StoreError::Yaml {
            path: self.path.clone(),
            source,
        })
    }

    fn persist(&self, config: &Config) -> Result<(), StoreError> {
        let content = serde_yaml::to_string(config).map_err(|source| StoreError::Yaml {
            path: self.path.clone(),
            source,
        })?;

        // Replace the file in one rename so readers never see a partial record
        let temp = self.temp_path();
        fs::write(&temp, content).map_err(|e| StoreError::io(&temp, e))?;
        fs::rename(&temp, &self.path).map_err(|e| StoreError::io(&self.path, e))?;

        debug!("Persisted configuration to {}", self.path.display());
        Ok(())
    }
}

/// Configuration store kept in memory
///
/// Counts persists so callers can assert when the record was written.
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    saved: Mutex<Option<Config>>,
    persists: AtomicUsize,
}

impl MemoryConfigStore {
    pub fn new(config: Config) -> Self {
        Self {
            saved: Mutex::new(Some(config)),
            persists: AtomicUsize::new(0),
        }
    }

    pub fn saved(&self) -> Option<Config> {
        self.saved.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn persist_count(&self) -> usize {
        self.persists.load(Ordering::SeqCst)
    }
}

impl ConfigStore for MemoryConfigStore {
    fn load(&self) -> Result<Config, StoreError> {
        self.saved()
            .ok_or_else(|| StoreError::NotFound(PathBuf::from("<memory>")))
    }

    fn persist(&self, config: &Config) -> Result<(), StoreError> {
        *self.saved.lock().unwrap_or_else(|e| e.into_inner()) = Some(config.clone());
        self.persists.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// CSV file ledger
///
/// Every append reopens the file in append mode and flushes before returning,
/// so a row is durable once `append_row` succeeds.
#[derive(Debug, Clone)]
pub struct CsvLedger {
    path: PathBuf,
}

impl CsvLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_record(&self, file: fs::File, fields: &[String]) -> Result<(), StoreError> {
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
        writer
            .write_record(fields)
            .map_err(|source| StoreError::Csv {
                path: self.path.clone(),
                source,
            })?;
        writer.flush().map_err(|e| StoreError::io(&self.path, e))?;
        Ok(())
    }
}

impl LedgerStore for CsvLedger {
    fn initialize(&self, header: &[String]) -> Result<bool, StoreError> {
        let file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => return Err(StoreError::io(&self.path, e)),
        };

        self.write_record(file, header)?;
        debug!("Created ledger {}", self.path.display());
        Ok(true)
    }

    fn append_row(&self, fields: &[String]) -> Result<(), StoreError> {
        let file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.path)
            .map_err(|e| StoreError::io(&self.path, e))?;

        self.write_record(file, fields)
    }
}

/// Ledger kept in memory
#[derive(Debug, Default)]
pub struct MemoryLedger {
    rows: Mutex<Vec<Vec<String>>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// All rows including the header
    pub fn rows(&self) -> Vec<Vec<String>> {
        self.rows.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl LedgerStore for MemoryLedger {
    fn initialize(&self, header: &[String]) -> Result<bool, StoreError> {
        let mut rows = self.rows.lock().unwrap_or_else(|e| e.into_inner());
        if !rows.is_empty() {
            return Ok(false);
        }
        rows.push(header.to_vec());
        Ok(true)
    }

    fn append_row(&self, fields: &[String]) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().unwrap_or_else(|e| e.into_inner());
        rows.push(fields.to_vec());
        Ok(())
    }
}
