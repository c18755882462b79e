//! Run summary returned by a successful pipeline run

use chrono::{DateTime, Local};
use multipress_core::Identifier;
use serde::Serialize;
use uuid::Uuid;

use crate::context::STAMP_FORMAT;
use crate::outcome::{Outcome, OutcomeKind};

/// One reported step outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepRecord {
    pub phase: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifier: Option<Identifier>,
    pub status: OutcomeKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl StepRecord {
    pub fn new(phase: &str, identifier: Option<&Identifier>, outcome: &Outcome) -> Self {
        Self {
            phase: phase.to_string(),
            identifier: identifier.cloned(),
            status: outcome.kind(),
            detail: outcome.detail(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub pipeline: String,
    pub started_at: DateTime<Local>,
    /// Identifiers that went through every per-identifier phase
    pub identifiers: Vec<Identifier>,
    /// Identifiers dropped after a failure (continue policy only)
    pub failed: Vec<Identifier>,
    pub steps: Vec<StepRecord>,
}

impl RunSummary {
    pub fn count(&self, status: OutcomeKind) -> usize {
        self.steps.iter().filter(|s| s.status == status).count()
    }

    /// Same stamp the steps of the run saw through their context
    pub fn stamp(&self) -> String {
        self.started_at.format(STAMP_FORMAT).to_string()
    }
}
