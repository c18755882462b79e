//! Error types for the orchestration engine

use multipress_core::Identifier;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that abort a pipeline run
#[derive(Debug, Error)]
pub enum EngineError {
    /// A once-phase returned a failure
    #[error("phase '{phase}' failed")]
    PhaseFailed {
        phase: String,
        #[source]
        source: anyhow::Error,
    },

    /// One or more workers of a fan-out phase failed
    #[error("phase '{phase}' failed for {}", describe_failures(.failures))]
    FanOutFailed {
        phase: String,
        failures: Vec<(Identifier, anyhow::Error)>,
    },

    /// Programming error detected by the engine (duplicate identifier,
    /// misplaced phase, panicking worker)
    #[error("engine invariant violated: {0}")]
    InvariantViolation(String),

    /// Durable store failure
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl EngineError {
    /// Identifiers whose workers failed, empty for non fan-out errors
    pub fn failed_identifiers(&self) -> Vec<&Identifier> {
        match self {
            Self::FanOutFailed { failures, .. } => failures.iter().map(|(id, _)| id).collect(),
            _ => Vec::new(),
        }
    }
}

fn describe_failures(failures: &[(Identifier, anyhow::Error)]) -> String {
    failures
        .iter()
        .map(|(id, error)| format!("{}: {:#}", id, error))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors raised by the configuration and ledger stores
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid YAML in {}: {source}", path.display())]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("CSV error on {}: {source}", path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("{} not found", .0.display())]
    NotFound(PathBuf),
}

impl StoreError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Check if this error is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_fan_out_display_lists_every_identifier() {
        let inner: anyhow::Result<()> = Err(anyhow::anyhow!("connection refused"));
        let error = EngineError::FanOutFailed {
            phase: "Deploy instance".to_string(),
            failures: vec![
                (
                    Identifier::from("user2"),
                    inner.context("docker compose up").unwrap_err(),
                ),
                (Identifier::from("user5"), anyhow::anyhow!("timeout")),
            ],
        };

        let message = error.to_string();
        assert!(message.contains("Deploy instance"));
        assert!(message.contains("user2: docker compose up: connection refused"));
        assert!(message.contains("user5: timeout"));
        assert_eq!(error.failed_identifiers().len(), 2);
    }

    #[test]
    fn test_phase_failed_keeps_source_chain() {
        let error = EngineError::PhaseFailed {
            phase: "Create network".to_string(),
            source: anyhow::anyhow!("root cause").context("outer"),
        };

        let source = std::error::Error::source(&error).expect("source");
        assert_eq!(source.to_string(), "outer");
        assert!(error.failed_identifiers().is_empty());
    }
}
