//! Contracts for event-gate pause and failure persistence.

mod store;
mod types;

pub use store::EventGateStore;
pub use types::{
    GateDecision, SourcePause, SourceRateLimit, TriggerFailure, TriggerFailureOutcome,
    TriggerHistory, TriggerHistoryQuery, TriggerPause,
};
