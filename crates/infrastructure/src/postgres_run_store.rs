use async_trait::async_trait;
use capstan_application::{
    CreateWorkflowRunInput, DueSchedule, RunTransitionPatch, Schedule, ScheduleRuntimePatch,
    ScheduleStore, WorkflowRun, WorkflowRunListQuery, WorkflowRunStore,
};
use capstan_core::{AppError, AppResult};
use capstan_domain::{
    StepDeclaration, TimeWindow, WorkflowDefinition, WorkflowDefinitionInput, WorkflowRunStatus,
};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

mod runs;
mod schedules;

/// PostgreSQL-backed store for workflow runs and schedules.
#[derive(Clone)]
pub struct PostgresRunStore {
    pool: PgPool,
}

impl PostgresRunStore {
    /// Creates a store with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct WorkflowRunRow {
    id: Uuid,
    workflow_definition_id: Uuid,
    status: String,
    partition_key: Option<String>,
    parameters: Value,
    trigger: Value,
    attempts: i32,
    error_message: Option<String>,
    output: Option<Value>,
    metrics: Option<Value>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    duration_ms: Option<i64>,
}

#[derive(Debug, FromRow)]
struct DueScheduleRow {
    id: Uuid,
    workflow_definition_id: Uuid,
    cron: String,
    timezone: String,
    parameters: Option<Value>,
    catch_up: bool,
    is_active: bool,
    next_run_at: Option<DateTime<Utc>>,
    catchup_cursor: Option<DateTime<Utc>>,
    last_materialized_window: Option<Value>,
    slug: String,
    version: i32,
    steps: Value,
    default_parameters: Value,
}

#[async_trait]
impl WorkflowRunStore for PostgresRunStore {
    async fn create_run(&self, input: CreateWorkflowRunInput) -> AppResult<WorkflowRun> {
        self.create_run_impl(input).await
    }

    async fn transition_run(
        &self,
        run_id: Uuid,
        next: WorkflowRunStatus,
        patch: RunTransitionPatch,
    ) -> AppResult<WorkflowRun> {
        self.transition_run_impl(run_id, next, patch).await
    }

    async fn get_run(&self, run_id: Uuid) -> AppResult<Option<WorkflowRun>> {
        self.get_run_impl(run_id).await
    }

    async fn list_runs_by_definition(
        &self,
        workflow_definition_id: Uuid,
        query: WorkflowRunListQuery,
    ) -> AppResult<Vec<WorkflowRun>> {
        self.list_runs_by_definition_impl(workflow_definition_id, query)
            .await
    }

    async fn count_recent_failures(
        &self,
        workflow_definition_id: Uuid,
        window_minutes: i64,
    ) -> AppResult<i64> {
        self.count_recent_failures_impl(workflow_definition_id, window_minutes)
            .await
    }

    async fn annotate_run_metrics(&self, run_id: Uuid, metrics: Value) -> AppResult<()> {
        self.annotate_run_metrics_impl(run_id, metrics).await
    }
}

#[async_trait]
impl ScheduleStore for PostgresRunStore {
    async fn list_due_schedules(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> AppResult<Vec<DueSchedule>> {
        self.list_due_schedules_impl(now, limit).await
    }

    async fn update_schedule_runtime_metadata(
        &self,
        schedule_id: Uuid,
        patch: ScheduleRuntimePatch,
    ) -> AppResult<()> {
        self.update_schedule_runtime_metadata_impl(schedule_id, patch)
            .await
    }
}

fn workflow_run_from_row(row: WorkflowRunRow) -> AppResult<WorkflowRun> {
    Ok(WorkflowRun {
        id: row.id,
        workflow_definition_id: row.workflow_definition_id,
        status: WorkflowRunStatus::parse(row.status.as_str())?,
        partition_key: row.partition_key,
        parameters: row.parameters,
        trigger: serde_json::from_value(row.trigger).map_err(|error| {
            AppError::Validation(format!(
                "failed to deserialize trigger for workflow run '{}': {error}",
                row.id
            ))
        })?,
        attempts: row.attempts,
        error_message: row.error_message,
        output: row.output,
        metrics: row.metrics,
        created_at: row.created_at,
        started_at: row.started_at,
        completed_at: row.completed_at,
        duration_ms: row.duration_ms,
    })
}

fn due_schedule_from_row(row: DueScheduleRow) -> AppResult<DueSchedule> {
    let steps: Vec<StepDeclaration> = serde_json::from_value(row.steps).map_err(|error| {
        AppError::Validation(format!(
            "failed to deserialize steps for workflow definition '{}': {error}",
            row.workflow_definition_id
        ))
    })?;

    let definition = WorkflowDefinition::new(WorkflowDefinitionInput {
        id: row.workflow_definition_id,
        slug: row.slug,
        version: row.version,
        steps,
        default_parameters: row.default_parameters,
    })?;

    let last_materialized_window: Option<TimeWindow> = row
        .last_materialized_window
        .map(serde_json::from_value)
        .transpose()
        .map_err(|error| {
            AppError::Validation(format!(
                "failed to deserialize last_materialized_window for schedule '{}': {error}",
                row.id
            ))
        })?;

    Ok(DueSchedule {
        schedule: Schedule {
            id: row.id,
            workflow_definition_id: row.workflow_definition_id,
            cron: row.cron,
            timezone: row.timezone,
            parameters: row.parameters,
            catch_up: row.catch_up,
            is_active: row.is_active,
            next_run_at: row.next_run_at,
            catchup_cursor: row.catchup_cursor,
            last_materialized_window,
        },
        definition,
    })
}

fn time_window_to_json(window: &TimeWindow) -> AppResult<Value> {
    serde_json::to_value(window).map_err(|error| {
        AppError::Validation(format!(
            "failed to serialize schedule materialized window: {error}"
        ))
    })
}
