//! Multipress Engine
//!
//! Step orchestration engine driving the provisioning pipelines.
//!
//! Architecture:
//! - Steps: async capabilities bound to labelled phases (run once or per identifier)
//! - Outcomes: every step invocation ends as success, skip or fail
//! - Fan-out: one tokio task per identifier, joined behind a barrier
//! - Sequencer: phases run strictly in order and a failure stops the run
//! - Shared state: the configuration record and the credential ledger, each
//!   behind its own async mutex together with its durable store
//! - Allocator: fresh identifiers derived from the existing credential keys
//! - Reporting: a surface the host implements to render progress

pub mod allocator;
pub mod config;
pub mod context;
pub mod error;
pub mod fanout;
pub mod guard;
pub mod outcome;
pub mod pipeline;
pub mod report;
pub mod step;
pub mod store;
pub mod summary;

pub use allocator::IdentifierAllocator;
pub use config::{EngineConfig, FailurePolicy};
pub use context::RunContext;
pub use error::{EngineError, StoreError};
pub use fanout::{FanOutReport, FanOutRunner};
pub use guard::SharedState;
pub use outcome::{Outcome, OutcomeKind};
pub use pipeline::{Pipeline, PipelineRun, Targets};
pub use report::{Reporter, TracingReporter};
pub use step::{Arity, InstanceStep, Phase, Step, StepResult, StepStatus};
pub use store::{ConfigStore, CsvLedger, LedgerStore, MemoryConfigStore, MemoryLedger, YamlConfigStore};
pub use summary::{RunSummary, StepRecord};
