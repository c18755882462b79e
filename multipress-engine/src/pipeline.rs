//! Phase sequencer
//!
//! A pipeline is three ordered phase lists: pre-phases run once before the
//! identifier set is known, per-identifier phases fan out across it, and
//! post-phases run once at the end. Phases run strictly in order and each one
//! is fully finished (every worker reported) before the next starts.

use multipress_core::Identifier;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::allocator::IdentifierAllocator;
use crate::config::{EngineConfig, FailurePolicy};
use crate::context::RunContext;
use crate::error::{EngineError, Result};
use crate::fanout::FanOutRunner;
use crate::guard::SharedState;
use crate::outcome::Outcome;
use crate::report::Reporter;
use crate::step::{Arity, InstanceStep, Phase, PhaseKind, Step};
use crate::summary::{RunSummary, StepRecord};

/// Declarative description of a command's phases
#[derive(Debug, Clone)]
pub struct Pipeline {
    name: String,
    pre: Vec<Phase>,
    per_identifier: Vec<Phase>,
    post: Vec<Phase>,
}

impl Pipeline {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pre: Vec::new(),
            per_identifier: Vec::new(),
            post: Vec::new(),
        }
    }

    pub fn pre(mut self, phase: Phase) -> Self {
        self.pre.push(phase);
        self
    }

    pub fn per_identifier(mut self, phase: Phase) -> Self {
        self.per_identifier.push(phase);
        self
    }

    pub fn post(mut self, phase: Phase) -> Self {
        self.post.push(phase);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of phases across all three lists
    pub fn len(&self) -> usize {
        self.pre.len() + self.per_identifier.len() + self.post.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pre- and post-phases must run once
    fn validate(&self) -> Result<()> {
        let misplaced = self
            .pre
            .iter()
            .chain(self.post.iter())
            .find(|phase| phase.arity() == Arity::PerIdentifier);

        if let Some(phase) = misplaced {
            return Err(EngineError::InvariantViolation(format!(
                "phase '{}' fans out but is declared outside the per-identifier list",
                phase.label()
            )));
        }
        Ok(())
    }
}

/// Where the identifier set of a run comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Targets {
    /// Exactly these identifiers
    Fixed(Vec<Identifier>),
    /// This many fresh identifiers, reserved after the pre-phases
    Allocate(usize),
    /// Every identifier present in the credential mapping after the pre-phases
    Existing,
}

/// One invocation of a pipeline
pub struct PipelineRun {
    pipeline: Pipeline,
    context: RunContext,
    reporter: Arc<dyn Reporter>,
    config: EngineConfig,
    fan_out: FanOutRunner,
}

impl PipelineRun {
    pub fn new(
        pipeline: Pipeline,
        state: Arc<SharedState>,
        reporter: Arc<dyn Reporter>,
        config: EngineConfig,
    ) -> Self {
        let fan_out = FanOutRunner::new(Arc::clone(&reporter), config.max_parallel);
        Self {
            pipeline,
            context: RunContext::new(state),
            reporter,
            config,
            fan_out,
        }
    }

    pub fn context(&self) -> &RunContext {
        &self.context
    }

    /// Runs every phase in order
    ///
    /// Stops at the first failing once-phase. A failing fan-out stops the
    /// pipeline under [`FailurePolicy::Abort`]; under
    /// [`FailurePolicy::Continue`] the failed identifiers are dropped from the
    /// remaining per-identifier phases.
    pub async fn execute(self, targets: Targets) -> Result<RunSummary> {
        let span = info_span!(
            "pipeline",
            run_id = %self.context.run_id(),
            pipeline = %self.pipeline.name
        );
        self.execute_inner(targets).instrument(span).await
    }

    async fn execute_inner(self, targets: Targets) -> Result<RunSummary> {
        self.pipeline.validate()?;

        info!(
            "Starting pipeline '{}' with {} phase(s)",
            self.pipeline.name,
            self.pipeline.len()
        );
        self.reporter.section(&self.pipeline.name);

        let mut steps = Vec::new();

        for phase in &self.pipeline.pre {
            self.run_once_phase(phase, &mut steps).await?;
        }

        let mut identifiers = self.resolve_targets(targets).await?;
        let mut failed = Vec::new();
        info!("Resolved {} identifier(s)", identifiers.len());

        for phase in &self.pipeline.per_identifier {
            match &phase.kind {
                PhaseKind::Once(step) => {
                    self.run_once(phase.label(), step.as_ref(), &mut steps).await?;
                }
                PhaseKind::PerIdentifier(step) => {
                    let dropped = self
                        .run_fan_out_phase(phase.label(), step, &identifiers, &mut steps)
                        .await?;

                    if !dropped.is_empty() {
                        identifiers.retain(|id| !dropped.contains(id));
                        failed.extend(dropped);
                    }
                }
            }
        }

        for phase in &self.pipeline.post {
            self.run_once_phase(phase, &mut steps).await?;
        }

        info!(
            "Pipeline '{}' finished: {} step(s), {} failed identifier(s)",
            self.pipeline.name,
            steps.len(),
            failed.len()
        );

        Ok(RunSummary {
            run_id: self.context.run_id(),
            pipeline: self.pipeline.name.clone(),
            started_at: self.context.started_at(),
            identifiers,
            failed,
            steps,
        })
    }

    async fn run_once_phase(&self, phase: &Phase, steps: &mut Vec<StepRecord>) -> Result<()> {
        match &phase.kind {
            PhaseKind::Once(step) => self.run_once(phase.label(), step.as_ref(), steps).await,
            PhaseKind::PerIdentifier(_) => Err(EngineError::InvariantViolation(format!(
                "phase '{}' cannot fan out here",
                phase.label()
            ))),
        }
    }

    /// Runs a single step and turns a failure into a pipeline error
    async fn run_once(
        &self,
        label: &str,
        step: &dyn Step,
        steps: &mut Vec<StepRecord>,
    ) -> Result<()> {
        debug!(phase = label, "Running once-phase");

        self.reporter.announce(label, None);
        let outcome = Outcome::classify(step.run(&self.context).await);
        self.reporter.complete(label, None, &outcome);
        steps.push(StepRecord::new(label, None, &outcome));

        match outcome {
            Outcome::Fail { error } => Err(EngineError::PhaseFailed {
                phase: label.to_string(),
                source: error,
            }),
            _ => Ok(()),
        }
    }

    /// Runs a fan-out phase and applies the failure policy
    ///
    /// Returns the identifiers to drop from later phases.
    async fn run_fan_out_phase(
        &self,
        label: &str,
        step: &Arc<dyn InstanceStep>,
        identifiers: &[Identifier],
        steps: &mut Vec<StepRecord>,
    ) -> Result<Vec<Identifier>> {
        if identifiers.is_empty() {
            debug!(phase = label, "No identifiers left, skipping fan-out");
            return Ok(Vec::new());
        }

        let report = self
            .fan_out
            .run(label, Arc::clone(step), identifiers, &self.context)
            .await?;

        steps.extend(
            report
                .outcomes
                .iter()
                .map(|(id, outcome)| StepRecord::new(label, Some(id), outcome)),
        );

        let failed_ids = report.failed_identifiers();
        self.reporter.phase_finished(label, &failed_ids);

        if failed_ids.is_empty() {
            return Ok(Vec::new());
        }

        match self.config.failure_policy {
            FailurePolicy::Abort => Err(EngineError::FanOutFailed {
                phase: label.to_string(),
                failures: report.into_failures(),
            }),
            FailurePolicy::Continue => {
                for (id, error) in report.into_failures() {
                    warn!(
                        phase = label,
                        identifier = %id,
                        "Dropping identifier after failure: {:#}",
                        error
                    );
                }
                Ok(failed_ids)
            }
        }
    }

    /// Produces the identifier set once the pre-phases have run
    async fn resolve_targets(&self, targets: Targets) -> Result<Vec<Identifier>> {
        let identifiers = match targets {
            Targets::Fixed(identifiers) => identifiers,
            Targets::Existing => {
                self.context
                    .state()
                    .read(|config| config.instance_identifiers())
                    .await
            }
            Targets::Allocate(count) => {
                let prefix = self.config.identifier_prefix.clone();
                let allocator = self
                    .context
                    .state()
                    .read(|config| {
                        let existing = config.instance_identifiers();
                        IdentifierAllocator::from_existing(prefix, &existing)
                    })
                    .await;
                allocator.allocate(count)
            }
        };

        let mut seen = HashSet::new();
        if let Some(duplicate) = identifiers.iter().find(|id| !seen.insert(*id)) {
            return Err(EngineError::InvariantViolation(format!(
                "identifier '{}' appears twice in the run",
                duplicate
            )));
        }

        Ok(identifiers)
    }
}
