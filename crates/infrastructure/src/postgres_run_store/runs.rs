use super::*;

const RUN_COLUMNS: &str = r#"
    id,
    workflow_definition_id,
    status,
    partition_key,
    parameters,
    trigger,
    attempts,
    error_message,
    output,
    metrics,
    created_at,
    started_at,
    completed_at,
    duration_ms
"#;

impl PostgresRunStore {
    pub(super) async fn create_run_impl(
        &self,
        input: CreateWorkflowRunInput,
    ) -> AppResult<WorkflowRun> {
        let trigger = serde_json::to_value(&input.trigger).map_err(|error| {
            AppError::Validation(format!("failed to serialize run trigger: {error}"))
        })?;

        let row = sqlx::query_as::<_, WorkflowRunRow>(&format!(
            r#"
            INSERT INTO workflow_runs (
                id,
                workflow_definition_id,
                status,
                partition_key,
                parameters,
                trigger,
                attempts,
                created_at,
                updated_at,
                started_at
            )
            VALUES (
                $1, $2, $3, $4, $5, $6, 0, now(), now(),
                CASE WHEN $3 = 'running' THEN now() END
            )
            RETURNING {RUN_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(input.workflow_definition_id)
        .bind(input.initial_status.as_str())
        .bind(input.partition_key)
        .bind(input.parameters)
        .bind(trigger)
        .fetch_one(&self.pool)
        .await
        .map_err(|error| {
            let workflow = input.workflow_definition_id;
            match error.as_database_error() {
                Some(db_error) if db_error.is_foreign_key_violation() => AppError::NotFound(
                    format!("workflow definition '{workflow}' does not exist"),
                ),
                Some(db_error) if db_error.is_unique_violation() => AppError::Conflict(format!(
                    "a run with the same key already exists for workflow '{workflow}'"
                )),
                _ => AppError::StoreUnavailable(format!(
                    "failed to create run for workflow '{workflow}': {error}"
                )),
            }
        })?;

        workflow_run_from_row(row)
    }

    /// Transitions under `SELECT ... FOR UPDATE` so concurrent transitions of
    /// the same run serialize and illegal ones are rejected without mutating.
    pub(super) async fn transition_run_impl(
        &self,
        run_id: Uuid,
        next: WorkflowRunStatus,
        patch: RunTransitionPatch,
    ) -> AppResult<WorkflowRun> {
        let mut transaction = self.pool.begin().await.map_err(|error| {
            AppError::StoreUnavailable(format!(
                "failed to start transition transaction for run '{run_id}': {error}"
            ))
        })?;

        let current_status = sqlx::query_scalar::<_, String>(
            r#"
            SELECT status
            FROM workflow_runs
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(run_id)
        .fetch_optional(&mut *transaction)
        .await
        .map_err(|error| {
            AppError::StoreUnavailable(format!(
                "failed to lock workflow run '{run_id}' for transition: {error}"
            ))
        })?;

        let Some(current_status) = current_status else {
            return Err(AppError::NotFound(format!(
                "workflow run '{run_id}' does not exist"
            )));
        };

        let current = WorkflowRunStatus::parse(current_status.as_str())?;
        if !current.can_transition_to(next) {
            return Err(AppError::Conflict(format!(
                "workflow run '{run_id}' cannot transition from '{current}' to '{next}'"
            )));
        }

        let row = sqlx::query_as::<_, WorkflowRunRow>(&format!(
            r#"
            UPDATE workflow_runs
            SET
                status = $2,
                error_message = COALESCE($3, error_message),
                output = COALESCE($4::jsonb, output),
                metrics = CASE
                    WHEN $5::jsonb IS NULL THEN metrics
                    ELSE COALESCE(metrics, '{{}}'::jsonb) || $5::jsonb
                END,
                started_at = CASE
                    WHEN $2 = 'running' AND started_at IS NULL THEN now()
                    ELSE started_at
                END,
                completed_at = CASE
                    WHEN $2 IN ('succeeded', 'failed', 'canceled') THEN now()
                    ELSE completed_at
                END,
                duration_ms = CASE
                    WHEN $2 IN ('succeeded', 'failed', 'canceled') AND started_at IS NOT NULL
                    THEN (EXTRACT(EPOCH FROM (now() - started_at)) * 1000)::BIGINT
                    ELSE duration_ms
                END,
                updated_at = now()
            WHERE id = $1
            RETURNING {RUN_COLUMNS}
            "#
        ))
        .bind(run_id)
        .bind(next.as_str())
        .bind(patch.error_message)
        .bind(patch.output)
        .bind(patch.metrics)
        .fetch_one(&mut *transaction)
        .await
        .map_err(|error| {
            AppError::StoreUnavailable(format!(
                "failed to transition workflow run '{run_id}' to '{next}': {error}"
            ))
        })?;

        transaction.commit().await.map_err(|error| {
            AppError::StoreUnavailable(format!(
                "failed to commit transition for workflow run '{run_id}': {error}"
            ))
        })?;

        workflow_run_from_row(row)
    }

    pub(super) async fn get_run_impl(&self, run_id: Uuid) -> AppResult<Option<WorkflowRun>> {
        let row = sqlx::query_as::<_, WorkflowRunRow>(&format!(
            r#"
            SELECT {RUN_COLUMNS}
            FROM workflow_runs
            WHERE id = $1
            "#
        ))
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| {
            AppError::StoreUnavailable(format!("failed to load workflow run '{run_id}': {error}"))
        })?;

        row.map(workflow_run_from_row).transpose()
    }

    pub(super) async fn list_runs_by_definition_impl(
        &self,
        workflow_definition_id: Uuid,
        query: WorkflowRunListQuery,
    ) -> AppResult<Vec<WorkflowRun>> {
        let limit = if query.limit == 0 { 50 } else { query.limit };

        let rows = sqlx::query_as::<_, WorkflowRunRow>(&format!(
            r#"
            SELECT {RUN_COLUMNS}
            FROM workflow_runs
            WHERE workflow_definition_id = $1
              AND ($2::TEXT IS NULL OR status = $2)
              AND ($3::TIMESTAMPTZ IS NULL OR created_at >= $3)
            ORDER BY created_at DESC
            LIMIT $4
            "#
        ))
        .bind(workflow_definition_id)
        .bind(query.status.map(|status| status.as_str()))
        .bind(query.since)
        .bind(i64::try_from(limit).map_err(|error| {
            AppError::Validation(format!("invalid run list limit: {error}"))
        })?)
        .fetch_all(&self.pool)
        .await
        .map_err(|error| {
            AppError::StoreUnavailable(format!(
                "failed to list runs for workflow '{workflow_definition_id}': {error}"
            ))
        })?;

        rows.into_iter().map(workflow_run_from_row).collect()
    }

    pub(super) async fn count_recent_failures_impl(
        &self,
        workflow_definition_id: Uuid,
        window_minutes: i64,
    ) -> AppResult<i64> {
        sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*)
            FROM workflow_runs
            WHERE workflow_definition_id = $1
              AND status = 'failed'
              AND completed_at >= now() - make_interval(mins => $2::INT)
            "#,
        )
        .bind(workflow_definition_id)
        .bind(i32::try_from(window_minutes).map_err(|error| {
            AppError::Validation(format!("invalid failure window minutes: {error}"))
        })?)
        .fetch_one(&self.pool)
        .await
        .map_err(|error| {
            AppError::StoreUnavailable(format!(
                "failed to count recent failures for workflow '{workflow_definition_id}': {error}"
            ))
        })
    }

    pub(super) async fn annotate_run_metrics_impl(
        &self,
        run_id: Uuid,
        metrics: Value,
    ) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE workflow_runs
            SET
                metrics = COALESCE(metrics, '{}'::jsonb) || $2::jsonb,
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(run_id)
        .bind(metrics)
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::StoreUnavailable(format!(
                "failed to annotate metrics for workflow run '{run_id}': {error}"
            ))
        })?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "workflow run '{run_id}' does not exist"
            )));
        }

        Ok(())
    }
}
