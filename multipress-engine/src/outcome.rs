//! Step outcome classification

use serde::Serialize;
use std::fmt;

use crate::step::{StepResult, StepStatus};

/// Terminal state of one step invocation
#[derive(Debug)]
pub enum Outcome {
    Success,
    /// The step's precondition was already satisfied
    Skip { reason: String },
    /// The step could not complete; the error keeps its full context chain
    Fail { error: anyhow::Error },
}

impl Outcome {
    /// Classifies the raw result of a step function
    pub fn classify(result: StepResult) -> Self {
        match result {
            Ok(StepStatus::Done) => Self::Success,
            Ok(StepStatus::Skipped(reason)) => Self::Skip { reason },
            Err(error) => Self::Fail { error },
        }
    }

    pub fn kind(&self) -> OutcomeKind {
        match self {
            Self::Success => OutcomeKind::Success,
            Self::Skip { .. } => OutcomeKind::Skip,
            Self::Fail { .. } => OutcomeKind::Fail,
        }
    }

    pub fn is_fail(&self) -> bool {
        matches!(self, Self::Fail { .. })
    }

    /// Human readable detail: the skip reason or the rendered error chain
    pub fn detail(&self) -> Option<String> {
        match self {
            Self::Success => None,
            Self::Skip { reason } => Some(reason.clone()),
            Self::Fail { error } => Some(format!("{:#}", error)),
        }
    }
}

/// Outcome discriminant, used in summaries and logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeKind {
    Success,
    Skip,
    Fail,
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Success => "success",
            Self::Skip => "skip",
            Self::Fail => "fail",
        };
        f.write_str(s)
    }
}
