use capstan_domain::{RunTrigger, TimeWindow, WorkflowDefinition, WorkflowRunStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Persisted workflow run record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRun {
    /// Run identifier.
    pub id: Uuid,
    /// Owning workflow definition.
    pub workflow_definition_id: Uuid,
    /// Current lifecycle status.
    pub status: WorkflowRunStatus,
    /// Partition key when the workflow produces a time-window partitioned
    /// asset.
    pub partition_key: Option<String>,
    /// Effective run parameters (defaults merged with any trigger overlay).
    pub parameters: Value,
    /// Trigger descriptor captured at creation.
    pub trigger: RunTrigger,
    /// Number of execution attempts so far.
    pub attempts: i32,
    /// Failure detail for failed runs.
    pub error_message: Option<String>,
    /// Opaque worker output.
    pub output: Option<Value>,
    /// Opaque run metrics, including enqueue failure annotations.
    pub metrics: Option<Value>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Set when the run enters `running`.
    pub started_at: Option<DateTime<Utc>>,
    /// Set when the run reaches a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
    /// `completed_at - started_at` in milliseconds when both are set.
    pub duration_ms: Option<i64>,
}

/// Run creation payload.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateWorkflowRunInput {
    /// Owning workflow definition.
    pub workflow_definition_id: Uuid,
    /// Effective run parameters.
    pub parameters: Value,
    /// Trigger descriptor.
    pub trigger: RunTrigger,
    /// Optional partition key.
    pub partition_key: Option<String>,
    /// Initial status; the scheduler always creates `pending` runs, external
    /// callers may create runs that are already `running`.
    pub initial_status: WorkflowRunStatus,
}

/// Optional fields applied alongside a status transition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunTransitionPatch {
    /// Failure detail.
    pub error_message: Option<String>,
    /// Worker output payload.
    pub output: Option<Value>,
    /// Metrics object merged over any existing metrics.
    pub metrics: Option<Value>,
}

/// Persisted schedule row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    /// Schedule identifier.
    pub id: Uuid,
    /// Bound workflow definition.
    pub workflow_definition_id: Uuid,
    /// Cron expression (five or six fields).
    pub cron: String,
    /// IANA timezone the expression is evaluated in.
    pub timezone: String,
    /// Optional parameter overlay merged over workflow defaults.
    pub parameters: Option<Value>,
    /// Whether past-due occurrences are processed one by one.
    pub catch_up: bool,
    /// Inactive schedules are never materialized.
    pub is_active: bool,
    /// Next aligned occurrence this schedule is due at.
    pub next_run_at: Option<DateTime<Utc>>,
    /// Resume point for catch-up processing; never ahead of `next_run_at`.
    pub catchup_cursor: Option<DateTime<Utc>>,
    /// Window of the most recently materialized occurrence.
    pub last_materialized_window: Option<TimeWindow>,
}

/// A due schedule joined with its workflow definition.
#[derive(Debug, Clone, PartialEq)]
pub struct DueSchedule {
    /// The due schedule row.
    pub schedule: Schedule,
    /// The bound workflow definition.
    pub definition: WorkflowDefinition,
}

/// Partial update of the three scheduler-owned runtime fields.
///
/// Outer `None` leaves a field unchanged; `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScheduleRuntimePatch {
    /// New `next_run_at` value.
    pub next_run_at: Option<Option<DateTime<Utc>>>,
    /// New `catchup_cursor` value.
    pub catchup_cursor: Option<Option<DateTime<Utc>>>,
    /// New `last_materialized_window` value.
    pub last_materialized_window: Option<Option<TimeWindow>>,
}

/// Run listing query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkflowRunListQuery {
    /// Optional status filter.
    pub status: Option<WorkflowRunStatus>,
    /// Only runs created at or after this instant.
    pub since: Option<DateTime<Utc>>,
    /// Page size; zero means store default.
    pub limit: usize,
}
