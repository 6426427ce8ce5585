//! Application services and ports for the Capstan control plane.

#![forbid(unsafe_code)]

mod alerter;
mod env;
mod event_bus;
mod event_gate;
mod gate_ports;
mod materializer;
mod run_ports;
mod run_service;

pub use alerter::{AlertConfig, AlertWebhook, AlertWebhookRequest, RunAlerter};
pub use event_bus::{EventBus, EventFilter, Subscription};
pub use event_gate::{EventGateService, normalize_source};
pub use gate_ports::{
    EventGateStore, GateDecision, SourcePause, SourceRateLimit, TriggerFailure,
    TriggerFailureOutcome, TriggerHistory, TriggerHistoryQuery, TriggerPause,
};
pub use materializer::{MaterializerConfig, ScheduleMaterializer};
pub use run_ports::{
    CreateWorkflowRunInput, DueSchedule, RunQueue, RunTransitionPatch, Schedule,
    ScheduleRuntimePatch, ScheduleStore, WorkflowRun, WorkflowRunListQuery, WorkflowRunStore,
};
pub use run_service::WorkflowRunService;
