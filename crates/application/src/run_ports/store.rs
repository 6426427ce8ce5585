use async_trait::async_trait;
use capstan_core::AppResult;
use capstan_domain::WorkflowRunStatus;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use super::types::{
    CreateWorkflowRunInput, DueSchedule, RunTransitionPatch, ScheduleRuntimePatch, WorkflowRun,
    WorkflowRunListQuery,
};

/// Store port owning the `workflow_runs` table.
#[async_trait]
pub trait WorkflowRunStore: Send + Sync {
    /// Creates one run row.
    async fn create_run(&self, input: CreateWorkflowRunInput) -> AppResult<WorkflowRun>;

    /// Moves one run to `next` under a row lock.
    ///
    /// Illegal transitions (including any touch of a terminal run) are
    /// rejected with a conflict and must not mutate the row.
    async fn transition_run(
        &self,
        run_id: Uuid,
        next: WorkflowRunStatus,
        patch: RunTransitionPatch,
    ) -> AppResult<WorkflowRun>;

    /// Returns one run by id.
    async fn get_run(&self, run_id: Uuid) -> AppResult<Option<WorkflowRun>>;

    /// Lists runs for one workflow definition.
    async fn list_runs_by_definition(
        &self,
        workflow_definition_id: Uuid,
        query: WorkflowRunListQuery,
    ) -> AppResult<Vec<WorkflowRun>>;

    /// Counts `failed` runs for one definition completed within the trailing
    /// window.
    async fn count_recent_failures(
        &self,
        workflow_definition_id: Uuid,
        window_minutes: i64,
    ) -> AppResult<i64>;

    /// Merges a metrics object into one run without touching its status.
    async fn annotate_run_metrics(&self, run_id: Uuid, metrics: Value) -> AppResult<()>;
}

/// Store port for schedule rows; the materializer only ever mutates the three
/// runtime fields covered by [`ScheduleRuntimePatch`].
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    /// Returns up to `limit` active schedules with `next_run_at <= now`,
    /// joined with their workflow definitions.
    async fn list_due_schedules(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> AppResult<Vec<DueSchedule>>;

    /// Applies a runtime metadata patch to one schedule.
    async fn update_schedule_runtime_metadata(
        &self,
        schedule_id: Uuid,
        patch: ScheduleRuntimePatch,
    ) -> AppResult<()>;
}

/// Hand-off into the external job queue consumed by run workers.
#[async_trait]
pub trait RunQueue: Send + Sync {
    /// Enqueues one pending run. Must be idempotent per run id.
    async fn enqueue(&self, run: &WorkflowRun) -> AppResult<()>;
}
