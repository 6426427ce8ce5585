//! Contracts between the control loops and the run/schedule persistence.

mod store;
mod types;

pub use store::{RunQueue, ScheduleStore, WorkflowRunStore};
pub use types::{
    CreateWorkflowRunInput, DueSchedule, RunTransitionPatch, Schedule, ScheduleRuntimePatch,
    WorkflowRun, WorkflowRunListQuery,
};
