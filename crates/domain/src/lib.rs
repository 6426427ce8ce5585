//! Domain entities and invariants.

#![forbid(unsafe_code)]

mod cron;
mod event;
mod partition;
mod run;
mod workflow;

pub use cron::{CronError, CronSpec};
pub use event::{StateEvent, connection_ack, pong};
pub use partition::time_window_partition_key;
pub use run::{RetryPolicy, RetryStrategy, RunTrigger, TimeWindow, WorkflowRunStatus};
pub use workflow::{
    AssetDeclaration, AssetPartitioning, StepDeclaration, StepKind, TimeWindowGranularity,
    WorkflowDefinition, WorkflowDefinitionInput,
};
