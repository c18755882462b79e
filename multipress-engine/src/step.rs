//! Step capabilities and phase declarations
//!
//! A phase binds a label to a step function. Once-phases run a [`Step`], fan-out
//! phases run an [`InstanceStep`] once per identifier. Hosts either implement
//! the traits on their own types or declare phases inline from async closures.

use async_trait::async_trait;
use multipress_core::Identifier;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::context::RunContext;

/// Value returned by a step that did not fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepStatus {
    Done,
    Skipped(String),
}

impl StepStatus {
    pub fn skip(reason: impl Into<String>) -> Self {
        Self::Skipped(reason.into())
    }
}

/// Raw result of a step function
pub type StepResult = anyhow::Result<StepStatus>;

/// Step executed once per pipeline run
#[async_trait]
pub trait Step: Send + Sync {
    async fn run(&self, ctx: &RunContext) -> StepResult;
}

/// Step executed once per identifier of a fan-out phase
#[async_trait]
pub trait InstanceStep: Send + Sync {
    async fn run(&self, ctx: &RunContext, identifier: &Identifier) -> StepResult;
}

/// Adapter turning an async closure into a [`Step`]
pub struct FnStep<F>(F);

impl<F, Fut> FnStep<F>
where
    F: Fn(RunContext) -> Fut + Send + Sync,
    Fut: Future<Output = StepResult> + Send,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F, Fut> Step for FnStep<F>
where
    F: Fn(RunContext) -> Fut + Send + Sync,
    Fut: Future<Output = StepResult> + Send,
{
    async fn run(&self, ctx: &RunContext) -> StepResult {
        (self.0)(ctx.clone()).await
    }
}

/// Adapter turning an async closure into an [`InstanceStep`]
pub struct FnInstanceStep<F>(F);

impl<F, Fut> FnInstanceStep<F>
where
    F: Fn(RunContext, Identifier) -> Fut + Send + Sync,
    Fut: Future<Output = StepResult> + Send,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F, Fut> InstanceStep for FnInstanceStep<F>
where
    F: Fn(RunContext, Identifier) -> Fut + Send + Sync,
    Fut: Future<Output = StepResult> + Send,
{
    async fn run(&self, ctx: &RunContext, identifier: &Identifier) -> StepResult {
        (self.0)(ctx.clone(), identifier.clone()).await
    }
}

/// How many times a phase runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Once,
    PerIdentifier,
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Once => f.write_str("once"),
            Self::PerIdentifier => f.write_str("per-identifier"),
        }
    }
}

#[derive(Clone)]
pub(crate) enum PhaseKind {
    Once(Arc<dyn Step>),
    PerIdentifier(Arc<dyn InstanceStep>),
}

/// A named unit of pipeline work
#[derive(Clone)]
pub struct Phase {
    label: String,
    pub(crate) kind: PhaseKind,
}

impl Phase {
    pub fn once(label: impl Into<String>, step: impl Step + 'static) -> Self {
        Self {
            label: label.into(),
            kind: PhaseKind::Once(Arc::new(step)),
        }
    }

    pub fn once_fn<F, Fut>(label: impl Into<String>, f: F) -> Self
    where
        F: Fn(RunContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = StepResult> + Send + 'static,
    {
        Self::once(label, FnStep::new(f))
    }

    pub fn per_identifier(label: impl Into<String>, step: impl InstanceStep + 'static) -> Self {
        Self {
            label: label.into(),
            kind: PhaseKind::PerIdentifier(Arc::new(step)),
        }
    }

    pub fn per_identifier_fn<F, Fut>(label: impl Into<String>, f: F) -> Self
    where
        F: Fn(RunContext, Identifier) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = StepResult> + Send + 'static,
    {
        Self::per_identifier(label, FnInstanceStep::new(f))
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn arity(&self) -> Arity {
        match self.kind {
            PhaseKind::Once(_) => Arity::Once,
            PhaseKind::PerIdentifier(_) => Arity::PerIdentifier,
        }
    }
}

impl fmt::Debug for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Phase")
            .field("label", &self.label)
            .field("arity", &self.arity())
            .finish()
    }
}
