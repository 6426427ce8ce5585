//! PostgreSQL-backed hand-off into the run worker job queue.

use async_trait::async_trait;
use capstan_application::{RunQueue, WorkflowRun};
use capstan_core::{AppError, AppResult};
use sqlx::PgPool;

/// Enqueues pending runs into the `workflow_run_jobs` table consumed by run
/// workers.
#[derive(Clone)]
pub struct PostgresRunQueue {
    pool: PgPool,
}

impl PostgresRunQueue {
    /// Creates a queue with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RunQueue for PostgresRunQueue {
    async fn enqueue(&self, run: &WorkflowRun) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO workflow_run_jobs (
                run_id,
                workflow_definition_id,
                status,
                created_at,
                updated_at
            )
            VALUES ($1, $2, 'pending', now(), now())
            ON CONFLICT (run_id)
            DO NOTHING
            "#,
        )
        .bind(run.id)
        .bind(run.workflow_definition_id)
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::StoreUnavailable(format!(
                "failed to enqueue workflow run '{}': {error}",
                run.id
            ))
        })?;

        Ok(())
    }
}
