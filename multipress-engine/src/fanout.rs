//! Concurrent fan-out runner
//!
//! Runs one step once per identifier, each invocation in its own tokio task,
//! and waits for every task before returning. A failing worker never cancels
//! its siblings; failures are collected and handed back to the sequencer,
//! which alone decides whether the pipeline stops.

use multipress_core::Identifier;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info_span};

use crate::context::RunContext;
use crate::error::{EngineError, Result};
use crate::outcome::Outcome;
use crate::report::Reporter;
use crate::step::InstanceStep;

/// Outcomes of one fan-out, in the order identifiers were given
#[derive(Debug)]
pub struct FanOutReport {
    pub outcomes: Vec<(Identifier, Outcome)>,
}

impl FanOutReport {
    pub fn is_fail(&self) -> bool {
        self.outcomes.iter().any(|(_, outcome)| outcome.is_fail())
    }

    pub fn failed_identifiers(&self) -> Vec<Identifier> {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| outcome.is_fail())
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Splits the report into the failures, dropping the other outcomes
    pub fn into_failures(self) -> Vec<(Identifier, anyhow::Error)> {
        self.outcomes
            .into_iter()
            .filter_map(|(id, outcome)| match outcome {
                Outcome::Fail { error } => Some((id, error)),
                _ => None,
            })
            .collect()
    }
}

/// Spawns and joins the workers of fan-out phases
pub struct FanOutRunner {
    reporter: Arc<dyn Reporter>,
    limit: Option<Arc<Semaphore>>,
}

impl FanOutRunner {
    /// Creates a runner; `max_parallel` bounds concurrently running workers
    pub fn new(reporter: Arc<dyn Reporter>, max_parallel: Option<usize>) -> Self {
        Self {
            reporter,
            limit: max_parallel.map(|n| Arc::new(Semaphore::new(n))),
        }
    }

    /// Runs `step` once per identifier and waits for all of them
    ///
    /// Returns `Err` only for engine invariant violations (a panicking
    /// worker); step failures are part of the report.
    pub async fn run(
        &self,
        phase: &str,
        step: Arc<dyn InstanceStep>,
        identifiers: &[Identifier],
        ctx: &RunContext,
    ) -> Result<FanOutReport> {
        debug!(phase, workers = identifiers.len(), "Fanning out");

        let mut handles: Vec<(Identifier, JoinHandle<Outcome>)> =
            Vec::with_capacity(identifiers.len());

        for identifier in identifiers {
            let handle =
                self.spawn_worker(phase, Arc::clone(&step), identifier.clone(), ctx.clone());
            handles.push((identifier.clone(), handle));
        }

        // Barrier: every handle is awaited, even after a panic
        let mut outcomes = Vec::with_capacity(handles.len());
        let mut panicked = Vec::new();

        for (identifier, handle) in handles {
            match handle.await {
                Ok(outcome) => outcomes.push((identifier, outcome)),
                Err(e) => {
                    error!(phase, identifier = %identifier, "Worker task panicked: {}", e);
                    panicked.push(identifier);
                }
            }
        }

        if !panicked.is_empty() {
            let names: Vec<&str> = panicked.iter().map(Identifier::as_str).collect();
            return Err(EngineError::InvariantViolation(format!(
                "worker for {} in phase '{}' panicked",
                names.join(", "),
                phase
            )));
        }

        Ok(FanOutReport { outcomes })
    }

    /// Spawns a task running the step for a single identifier
    fn spawn_worker(
        &self,
        phase: &str,
        step: Arc<dyn InstanceStep>,
        identifier: Identifier,
        ctx: RunContext,
    ) -> JoinHandle<Outcome> {
        let reporter = Arc::clone(&self.reporter);
        let limit = self.limit.clone();
        let phase = phase.to_string();
        let span = info_span!(
            "worker",
            run_id = %ctx.run_id(),
            phase = %phase,
            identifier = %identifier
        );

        tokio::spawn(
            async move {
                // Permit is released when dropped at the end of the task
                let _permit = match limit {
                    Some(semaphore) => match semaphore.acquire_owned().await {
                        Ok(permit) => Some(permit),
                        Err(e) => {
                            return Outcome::Fail {
                                error: anyhow::anyhow!("concurrency limit unavailable: {}", e),
                            };
                        }
                    },
                    None => None,
                };

                reporter.announce(&phase, Some(&identifier));
                let outcome = Outcome::classify(step.run(&ctx, &identifier).await);
                debug!(status = %outcome.kind(), "Worker finished");
                reporter.complete(&phase, Some(&identifier), &outcome);

                outcome
            }
            .instrument(span),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::OutcomeKind;
    use crate::report::recording::RecordingReporter;
    use crate::step::{FnInstanceStep, StepResult, StepStatus};
    use async_trait::async_trait;
    use rand::Rng;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn ids(n: u64) -> Vec<Identifier> {
        (1..=n).map(|i| Identifier::with_suffix("user", i)).collect()
    }

    struct SleepyStep {
        finished: Mutex<HashSet<Identifier>>,
    }

    #[async_trait]
    impl InstanceStep for SleepyStep {
        async fn run(&self, _ctx: &RunContext, identifier: &Identifier) -> StepResult {
            let millis = rand::thread_rng().gen_range(1..40);
            tokio::time::sleep(Duration::from_millis(millis)).await;
            self.finished.lock().unwrap().insert(identifier.clone());
            Ok(StepStatus::Done)
        }
    }

    struct FailOn(Identifier);

    #[async_trait]
    impl InstanceStep for FailOn {
        async fn run(&self, _ctx: &RunContext, identifier: &Identifier) -> StepResult {
            if *identifier == self.0 {
                anyhow::bail!("injected failure for {}", identifier);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(StepStatus::Done)
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_barrier_waits_for_every_worker() {
        let step = Arc::new(SleepyStep {
            finished: Mutex::new(HashSet::new()),
        });
        let reporter = Arc::new(RecordingReporter::default());
        let runner = FanOutRunner::new(reporter.clone(), None);
        let identifiers = ids(25);

        let report = runner
            .run("Sleep", step.clone(), &identifiers, &RunContext::for_tests())
            .await
            .unwrap();

        let finished = step.finished.lock().unwrap().clone();
        assert_eq!(finished, identifiers.iter().cloned().collect::<HashSet<_>>());
        assert_eq!(report.outcomes.len(), 25);
        assert_eq!(reporter.completions().len(), 25);
        assert!(!report.is_fail());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_failure_does_not_stop_siblings() {
        let reporter = Arc::new(RecordingReporter::default());
        let runner = FanOutRunner::new(reporter.clone(), None);
        let identifiers = ids(6);

        let report = runner
            .run(
                "Deploy",
                Arc::new(FailOn(Identifier::from("user3"))),
                &identifiers,
                &RunContext::for_tests(),
            )
            .await
            .unwrap();

        assert!(report.is_fail());
        assert_eq!(report.failed_identifiers(), vec![Identifier::from("user3")]);

        let completions = reporter.completions();
        assert_eq!(completions.len(), 6);
        let successes = completions
            .iter()
            .filter(|(_, _, kind)| *kind == OutcomeKind::Success)
            .count();
        assert_eq!(successes, 5);

        let failures = report.into_failures();
        assert_eq!(failures.len(), 1);
        assert!(failures[0].1.to_string().contains("injected failure for user3"));
    }

    #[tokio::test]
    async fn test_all_skips_is_not_a_failure() {
        let runner = FanOutRunner::new(Arc::new(RecordingReporter::default()), None);
        let step = Arc::new(FnInstanceStep::new(|_ctx, id: Identifier| async move {
            Ok(StepStatus::skip(format!("{} exists", id)))
        }));

        let report = runner
            .run("Create volume", step, &ids(3), &RunContext::for_tests())
            .await
            .unwrap();

        assert!(!report.is_fail());
        assert!(
            report
                .outcomes
                .iter()
                .all(|(_, o)| o.kind() == OutcomeKind::Skip)
        );
    }

    struct Gauge {
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl InstanceStep for Gauge {
        async fn run(&self, _ctx: &RunContext, _identifier: &Identifier) -> StepResult {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(StepStatus::Done)
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_bound_limits_running_workers() {
        let gauge = Arc::new(Gauge {
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let runner = FanOutRunner::new(Arc::new(RecordingReporter::default()), Some(2));

        let report = runner
            .run("Bounded", gauge.clone(), &ids(10), &RunContext::for_tests())
            .await
            .unwrap();

        assert_eq!(report.outcomes.len(), 10);
        assert!(gauge.peak.load(Ordering::SeqCst) <= 2);
    }

    struct Panics;

    #[async_trait]
    impl InstanceStep for Panics {
        async fn run(&self, _ctx: &RunContext, identifier: &Identifier) -> StepResult {
            if identifier.as_str() == "user2" {
                panic!("boom");
            }
            Ok(StepStatus::Done)
        }
    }

    #[tokio::test]
    async fn test_panicking_worker_is_invariant_violation() {
        let reporter = Arc::new(RecordingReporter::default());
        let runner = FanOutRunner::new(reporter.clone(), None);

        let err = runner
            .run("Panic", Arc::new(Panics), &ids(3), &RunContext::for_tests())
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::InvariantViolation(ref msg) if msg.contains("user2")));
        // Siblings still ran to completion
        assert_eq!(reporter.completions().len(), 2);
    }
}
