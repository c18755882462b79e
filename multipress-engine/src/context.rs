//! Run context handed to every step

use chrono::{DateTime, Local};
use multipress_core::Config;
use std::sync::Arc;
use uuid::Uuid;

use crate::guard::SharedState;

/// Format of the run stamp used in dated paths
pub const STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Per-run context shared by all steps of a pipeline run
///
/// Cheap to clone: the shared state is reference counted and the start
/// timestamp is fixed when the run is created, so every step derives the same
/// dated paths and labels from it.
#[derive(Clone)]
pub struct RunContext {
    run_id: Uuid,
    started_at: DateTime<Local>,
    state: Arc<SharedState>,
}

impl RunContext {
    pub fn new(state: Arc<SharedState>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Local::now(),
            state,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn started_at(&self) -> DateTime<Local> {
        self.started_at
    }

    /// Start timestamp formatted as `YYYYMMDD_HHMMSS`
    pub fn stamp(&self) -> String {
        self.started_at.format(STAMP_FORMAT).to_string()
    }

    pub fn state(&self) -> &SharedState {
        &self.state
    }

    /// Shortcut for [`SharedState::snapshot`]
    pub async fn config(&self) -> Config {
        self.state.snapshot().await
    }

    #[cfg(test)]
    pub(crate) fn for_tests() -> Self {
        use crate::store::{MemoryConfigStore, MemoryLedger};

        let state = SharedState::new(
            Config::new("example.org", 1000, 1000),
            Arc::new(MemoryConfigStore::default()),
            Arc::new(MemoryLedger::new()),
        );
        Self::new(Arc::new(state))
    }
}
