//! Progress reporting surface
//!
//! The sequencer and the fan-out runner call a [`Reporter`] around every step.
//! Reporting is a side effect only: implementations must not fail and nothing
//! in the engine depends on what they do.

use multipress_core::Identifier;
use tracing::{error, info, warn};

use crate::outcome::Outcome;

pub trait Reporter: Send + Sync {
    /// Called once when a pipeline starts
    fn section(&self, _title: &str) {}

    /// A step is about to run
    fn announce(&self, phase: &str, identifier: Option<&Identifier>);

    /// A step reached its terminal outcome
    fn complete(&self, phase: &str, identifier: Option<&Identifier>, outcome: &Outcome);

    /// Every worker of a fan-out phase has finished
    fn phase_finished(&self, _phase: &str, _failed: &[Identifier]) {}
}

/// Reporter writing every event to the tracing subscriber
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn section(&self, title: &str) {
        info!("== {} ==", title);
    }

    fn announce(&self, phase: &str, identifier: Option<&Identifier>) {
        match identifier {
            Some(id) => info!(phase, identifier = %id, "Starting step"),
            None => info!(phase, "Starting step"),
        }
    }

    fn complete(&self, phase: &str, identifier: Option<&Identifier>, outcome: &Outcome) {
        let identifier = identifier.map(|id| id.to_string()).unwrap_or_default();
        match outcome {
            Outcome::Success => info!(phase, identifier = %identifier, "Step succeeded"),
            Outcome::Skip { reason } => {
                info!(phase, identifier = %identifier, reason = %reason, "Step skipped")
            }
            Outcome::Fail { error } => {
                error!(phase, identifier = %identifier, "Step failed: {:#}", error)
            }
        }
    }

    fn phase_finished(&self, phase: &str, failed: &[Identifier]) {
        if !failed.is_empty() {
            let failed: Vec<&str> = failed.iter().map(Identifier::as_str).collect();
            warn!(phase, "Phase failed for {}", failed.join(", "));
        }
    }
}
