use super::*;

impl PostgresRunStore {
    pub(super) async fn list_due_schedules_impl(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> AppResult<Vec<DueSchedule>> {
        let rows = sqlx::query_as::<_, DueScheduleRow>(
            r#"
            SELECT
                s.id,
                s.workflow_definition_id,
                s.cron,
                s.timezone,
                s.parameters,
                s.catch_up,
                s.is_active,
                s.next_run_at,
                s.catchup_cursor,
                s.last_materialized_window,
                d.slug,
                d.version,
                d.steps,
                d.default_parameters
            FROM workflow_schedules s
            INNER JOIN workflow_definitions d
                ON d.id = s.workflow_definition_id
            WHERE s.is_active = TRUE
              AND s.next_run_at IS NOT NULL
              AND s.next_run_at <= $1
            ORDER BY s.next_run_at ASC
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(i64::try_from(limit).map_err(|error| {
            AppError::Validation(format!("invalid due schedule limit: {error}"))
        })?)
        .fetch_all(&self.pool)
        .await
        .map_err(|error| {
            AppError::StoreUnavailable(format!("failed to list due schedules: {error}"))
        })?;

        rows.into_iter().map(due_schedule_from_row).collect()
    }

    pub(super) async fn update_schedule_runtime_metadata_impl(
        &self,
        schedule_id: Uuid,
        patch: ScheduleRuntimePatch,
    ) -> AppResult<()> {
        let set_next_run_at = patch.next_run_at.is_some();
        let next_run_at = patch.next_run_at.flatten();
        let set_catchup_cursor = patch.catchup_cursor.is_some();
        let catchup_cursor = patch.catchup_cursor.flatten();
        let set_window = patch.last_materialized_window.is_some();
        let window = patch
            .last_materialized_window
            .flatten()
            .as_ref()
            .map(time_window_to_json)
            .transpose()?;

        let result = sqlx::query(
            r#"
            UPDATE workflow_schedules
            SET
                next_run_at = CASE WHEN $2 THEN $3::TIMESTAMPTZ ELSE next_run_at END,
                catchup_cursor = CASE WHEN $4 THEN $5::TIMESTAMPTZ ELSE catchup_cursor END,
                last_materialized_window = CASE
                    WHEN $6 THEN $7::JSONB
                    ELSE last_materialized_window
                END,
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(schedule_id)
        .bind(set_next_run_at)
        .bind(next_run_at)
        .bind(set_catchup_cursor)
        .bind(catchup_cursor)
        .bind(set_window)
        .bind(window)
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::StoreUnavailable(format!(
                "failed to update runtime metadata for schedule '{schedule_id}': {error}"
            ))
        })?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "workflow schedule '{schedule_id}' does not exist"
            )));
        }

        Ok(())
    }
}
