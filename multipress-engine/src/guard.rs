//! Shared-state guard
//!
//! Workers of a fan-out share two mutable resources: the configuration record
//! (with its durable copy) and the credential ledger. Each resource sits
//! behind its own async mutex and is only reachable through the methods
//! below. A scope is held for the whole read-modify-write including the
//! durable write, so one worker's mutation is never overwritten by another.
//!
//! Closures passed to [`SharedState::read`] and [`SharedState::update`]
//! receive the record itself, never the guard, so a worker cannot re-enter a
//! scope it already holds.

use multipress_core::Config;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{EngineError, Result, StoreError};
use crate::store::{ConfigStore, LedgerStore};

/// Runs a store operation on the blocking pool
async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> std::result::Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    let value = tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| EngineError::InvariantViolation(format!("store task failed: {}", e)))??;
    Ok(value)
}

pub struct SharedState {
    config: Mutex<Config>,
    config_store: Arc<dyn ConfigStore>,
    ledger: Mutex<Arc<dyn LedgerStore>>,
}

impl SharedState {
    pub fn new(
        config: Config,
        config_store: Arc<dyn ConfigStore>,
        ledger: Arc<dyn LedgerStore>,
    ) -> Self {
        Self {
            config: Mutex::new(config),
            config_store,
            ledger: Mutex::new(ledger),
        }
    }

    /// Runs `f` against the current record under the configuration scope
    pub async fn read<R>(&self, f: impl FnOnce(&Config) -> R) -> R {
        let config = self.config.lock().await;
        f(&config)
    }

    /// Returns a consistent copy of the current record
    pub async fn snapshot(&self) -> Config {
        self.config.lock().await.clone()
    }

    /// Applies `f` to the record and persists the result
    ///
    /// The closure works on a copy; the copy is written to the store and only
    /// then committed in memory, so a failed persist leaves both the record
    /// and its durable copy unchanged.
    pub async fn update<R>(&self, f: impl FnOnce(&mut Config) -> R) -> Result<R> {
        let mut config = self.config.lock().await;

        let mut draft = config.clone();
        let value = f(&mut draft);

        let store = Arc::clone(&self.config_store);
        *config = blocking(move || store.persist(&draft).map(|()| draft)).await?;

        debug!("Configuration updated and persisted");
        Ok(value)
    }

    /// Writes the current record to the store
    pub async fn persist(&self) -> Result<()> {
        let config = self.config.lock().await;
        let draft = config.clone();
        let store = Arc::clone(&self.config_store);
        blocking(move || store.persist(&draft)).await
    }

    /// Creates the ledger with `header` unless it already exists
    pub async fn initialize_ledger(&self, header: &[String]) -> Result<bool> {
        let ledger = self.ledger.lock().await;
        let store = Arc::clone(&*ledger);
        let header = header.to_vec();
        blocking(move || store.initialize(&header)).await
    }

    /// Appends one row to the ledger under the ledger scope
    pub async fn append_ledger(&self, fields: Vec<String>) -> Result<()> {
        let ledger = self.ledger.lock().await;
        let store = Arc::clone(&*ledger);
        blocking(move || store.append_row(&fields)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{EngineError, StoreError};
    use crate::store::{CsvLedger, MemoryConfigStore, MemoryLedger};
    use multipress_core::{CredentialRow, CredentialsConfig, Identifier, InstancesConfig};
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    struct BrokenStore;

    impl ConfigStore for BrokenStore {
        fn load(&self) -> std::result::Result<Config, StoreError> {
            Err(StoreError::NotFound(PathBuf::from("broken.yaml")))
        }

        fn persist(&self, _config: &Config) -> std::result::Result<(), StoreError> {
            Err(StoreError::io(
                "broken.yaml",
                std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
            ))
        }
    }

    /// Store whose writes block the calling thread for a while
    struct SlowStore {
        written: Arc<AtomicBool>,
    }

    impl ConfigStore for SlowStore {
        fn load(&self) -> std::result::Result<Config, StoreError> {
            Err(StoreError::NotFound(PathBuf::from("slow.yaml")))
        }

        fn persist(&self, _config: &Config) -> std::result::Result<(), StoreError> {
            std::thread::sleep(Duration::from_millis(300));
            self.written.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn base_config() -> Config {
        let mut config = Config::new("example.org", 1000, 1000);
        config.instances = Some(InstancesConfig::new_default());
        config
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_updates_are_not_lost() {
        let store = Arc::new(MemoryConfigStore::default());
        let state = Arc::new(SharedState::new(
            base_config(),
            store.clone(),
            Arc::new(MemoryLedger::new()),
        ));

        let mut handles = Vec::new();
        for n in 1..=50u64 {
            let state = Arc::clone(&state);
            handles.push(tokio::spawn(async move {
                let id = Identifier::with_suffix("user", n);
                state
                    .update(|config| {
                        let creds = CredentialsConfig::new_for_instance(config, &id);
                        if let Some(instances) = config.instances.as_mut() {
                            instances.credentials.insert(id.clone(), creds);
                        }
                    })
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(state.read(|c| c.instance_identifiers().len()).await, 50);
        assert_eq!(store.persist_count(), 50);
        assert_eq!(store.saved().unwrap().instance_identifiers().len(), 50);
    }

    #[tokio::test]
    async fn test_failed_persist_keeps_memory_unchanged() {
        let state = SharedState::new(
            base_config(),
            Arc::new(BrokenStore),
            Arc::new(MemoryLedger::new()),
        );

        let result = state.update(|config| config.project = "changed".to_string()).await;
        assert!(matches!(result, Err(EngineError::Store(_))));
        assert_eq!(state.snapshot().await.project, "multipress");
    }

    #[tokio::test]
    async fn test_persist_does_not_block_the_runtime() {
        let written = Arc::new(AtomicBool::new(false));
        let state = SharedState::new(
            base_config(),
            Arc::new(SlowStore {
                written: Arc::clone(&written),
            }),
            Arc::new(MemoryLedger::new()),
        );

        // Single-threaded runtime: the ticker only advances if the write is off-thread
        let ticker = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            written.load(Ordering::SeqCst)
        };
        let (updated, written_before_tick) =
            tokio::join!(state.update(|config| config.project = "slow".to_string()), ticker);

        updated.unwrap();
        assert!(!written_before_tick);
        assert_eq!(state.snapshot().await.project, "slow");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_ledger_appends_stay_intact() {
        const M: usize = 64;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("instance-credentials.csv");
        let state = Arc::new(SharedState::new(
            base_config(),
            Arc::new(MemoryConfigStore::default()),
            Arc::new(CsvLedger::new(&path)),
        ));

        assert!(state.initialize_ledger(&CredentialRow::header()).await.unwrap());

        let mut handles = Vec::new();
        for n in 0..M {
            let state = Arc::clone(&state);
            handles.push(tokio::spawn(async move {
                // Long fields make torn writes visible
                let fields: Vec<String> = (0..6)
                    .map(|col| format!("{}-{}-{}", n, col, "x".repeat(512)))
                    .collect();
                state.append_ledger(fields).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let mut reader = csv::Reader::from_path(&path).unwrap();
        assert_eq!(
            reader.headers().unwrap().iter().collect::<Vec<_>>(),
            CredentialRow::HEADER.to_vec()
        );

        let mut seen = std::collections::HashSet::new();
        for record in reader.records() {
            let record = record.unwrap();
            assert_eq!(record.len(), 6);
            let n: usize = record[0].split('-').next().unwrap().parse().unwrap();
            for (col, field) in record.iter().enumerate() {
                assert_eq!(field, format!("{}-{}-{}", n, col, "x".repeat(512)));
            }
            assert!(seen.insert(n));
        }
        assert_eq!(seen.len(), M);
    }
}
