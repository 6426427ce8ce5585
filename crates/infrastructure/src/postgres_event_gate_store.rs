//! PostgreSQL persistence for event-gate pauses, failures, and rate-limit
//! windows.

use async_trait::async_trait;
use capstan_application::{
    EventGateStore, SourcePause, TriggerFailure, TriggerHistory, TriggerHistoryQuery, TriggerPause,
};
use capstan_core::{AppError, AppResult};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

/// PostgreSQL implementation of the event gate store port.
#[derive(Clone)]
pub struct PostgresEventGateStore {
    pool: PgPool,
}

impl PostgresEventGateStore {
    /// Creates a store with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct SourcePauseRow {
    source: String,
    paused_until: DateTime<Utc>,
    reason: String,
    details: Value,
}

#[derive(Debug, FromRow)]
struct TriggerFailureRow {
    trigger_id: String,
    failure_time: DateTime<Utc>,
    reason: Option<String>,
}

#[derive(Debug, FromRow)]
struct TriggerPauseRow {
    trigger_id: String,
    paused_until: DateTime<Utc>,
    reason: String,
    failures: i64,
}

impl From<SourcePauseRow> for SourcePause {
    fn from(row: SourcePauseRow) -> Self {
        Self {
            source: row.source,
            paused_until: row.paused_until,
            reason: row.reason,
            details: row.details,
        }
    }
}

impl From<TriggerFailureRow> for TriggerFailure {
    fn from(row: TriggerFailureRow) -> Self {
        Self {
            trigger_id: row.trigger_id,
            failure_time: row.failure_time,
            reason: row.reason,
        }
    }
}

impl From<TriggerPauseRow> for TriggerPause {
    fn from(row: TriggerPauseRow) -> Self {
        Self {
            trigger_id: row.trigger_id,
            paused_until: row.paused_until,
            reason: row.reason,
            failures: row.failures,
        }
    }
}

#[async_trait]
impl EventGateStore for PostgresEventGateStore {
    async fn delete_expired_source_pauses(
        &self,
        source: &str,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            DELETE FROM event_scheduler_source_pauses
            WHERE source = $1 AND paused_until <= $2
            "#,
        )
        .bind(source)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::StoreUnavailable(format!(
                "failed to delete expired pause for source '{source}': {error}"
            ))
        })?;

        Ok(())
    }

    async fn get_source_pause(&self, source: &str) -> AppResult<Option<SourcePause>> {
        let row = sqlx::query_as::<_, SourcePauseRow>(
            r#"
            SELECT source, paused_until, reason, details
            FROM event_scheduler_source_pauses
            WHERE source = $1
            "#,
        )
        .bind(source)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| {
            AppError::StoreUnavailable(format!(
                "failed to load pause for source '{source}': {error}"
            ))
        })?;

        Ok(row.map(SourcePause::from))
    }

    async fn upsert_source_pause(&self, pause: SourcePause) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO event_scheduler_source_pauses (source, paused_until, reason, details)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (source)
            DO UPDATE SET
                paused_until = EXCLUDED.paused_until,
                reason = EXCLUDED.reason,
                details = EXCLUDED.details
            "#,
        )
        .bind(pause.source.as_str())
        .bind(pause.paused_until)
        .bind(pause.reason.as_str())
        .bind(&pause.details)
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::StoreUnavailable(format!(
                "failed to upsert pause for source '{}': {error}",
                pause.source
            ))
        })?;

        Ok(())
    }

    async fn append_source_event(&self, source: &str, event_time: DateTime<Utc>) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO event_scheduler_source_events (source, event_time)
            VALUES ($1, $2)
            "#,
        )
        .bind(source)
        .bind(event_time)
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::StoreUnavailable(format!(
                "failed to record event for source '{source}': {error}"
            ))
        })?;

        Ok(())
    }

    async fn purge_source_events_before(
        &self,
        source: &str,
        cutoff: DateTime<Utc>,
    ) -> AppResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM event_scheduler_source_events
            WHERE source = $1 AND event_time < $2
            "#,
        )
        .bind(source)
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::StoreUnavailable(format!(
                "failed to purge events for source '{source}': {error}"
            ))
        })?;

        Ok(result.rows_affected())
    }

    async fn count_source_events(&self, source: &str) -> AppResult<i64> {
        sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*)
            FROM event_scheduler_source_events
            WHERE source = $1
            "#,
        )
        .bind(source)
        .fetch_one(&self.pool)
        .await
        .map_err(|error| {
            AppError::StoreUnavailable(format!(
                "failed to count events for source '{source}': {error}"
            ))
        })
    }

    async fn append_trigger_failure(&self, failure: TriggerFailure) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO event_scheduler_trigger_failures (id, trigger_id, failure_time, reason)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(failure.trigger_id.as_str())
        .bind(failure.failure_time)
        .bind(failure.reason.as_deref())
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::StoreUnavailable(format!(
                "failed to record failure for trigger '{}': {error}",
                failure.trigger_id
            ))
        })?;

        Ok(())
    }

    async fn purge_trigger_failures_before(
        &self,
        trigger_id: &str,
        cutoff: DateTime<Utc>,
    ) -> AppResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM event_scheduler_trigger_failures
            WHERE trigger_id = $1 AND failure_time < $2
            "#,
        )
        .bind(trigger_id)
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::StoreUnavailable(format!(
                "failed to purge failures for trigger '{trigger_id}': {error}"
            ))
        })?;

        Ok(result.rows_affected())
    }

    async fn count_trigger_failures(&self, trigger_id: &str) -> AppResult<i64> {
        sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*)
            FROM event_scheduler_trigger_failures
            WHERE trigger_id = $1
            "#,
        )
        .bind(trigger_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|error| {
            AppError::StoreUnavailable(format!(
                "failed to count failures for trigger '{trigger_id}': {error}"
            ))
        })
    }

    async fn upsert_trigger_pause(&self, pause: TriggerPause) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO event_scheduler_trigger_pauses (trigger_id, paused_until, reason, failures)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (trigger_id)
            DO UPDATE SET
                paused_until = EXCLUDED.paused_until,
                reason = EXCLUDED.reason,
                failures = EXCLUDED.failures
            "#,
        )
        .bind(pause.trigger_id.as_str())
        .bind(pause.paused_until)
        .bind(pause.reason.as_str())
        .bind(pause.failures)
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::StoreUnavailable(format!(
                "failed to upsert pause for trigger '{}': {error}",
                pause.trigger_id
            ))
        })?;

        Ok(())
    }

    async fn get_trigger_pause(&self, trigger_id: &str) -> AppResult<Option<TriggerPause>> {
        let row = sqlx::query_as::<_, TriggerPauseRow>(
            r#"
            SELECT trigger_id, paused_until, reason, failures
            FROM event_scheduler_trigger_pauses
            WHERE trigger_id = $1
            "#,
        )
        .bind(trigger_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| {
            AppError::StoreUnavailable(format!(
                "failed to load pause for trigger '{trigger_id}': {error}"
            ))
        })?;

        Ok(row.map(TriggerPause::from))
    }

    async fn delete_expired_trigger_pauses(
        &self,
        trigger_id: &str,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            DELETE FROM event_scheduler_trigger_pauses
            WHERE trigger_id = $1 AND paused_until <= $2
            "#,
        )
        .bind(trigger_id)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::StoreUnavailable(format!(
                "failed to delete expired pause for trigger '{trigger_id}': {error}"
            ))
        })?;

        Ok(())
    }

    async fn clear_trigger_state(&self, trigger_id: &str) -> AppResult<()> {
        let mut transaction = self.pool.begin().await.map_err(|error| {
            AppError::StoreUnavailable(format!(
                "failed to start clear transaction for trigger '{trigger_id}': {error}"
            ))
        })?;

        sqlx::query(
            r#"
            DELETE FROM event_scheduler_trigger_failures
            WHERE trigger_id = $1
            "#,
        )
        .bind(trigger_id)
        .execute(&mut *transaction)
        .await
        .map_err(|error| {
            AppError::StoreUnavailable(format!(
                "failed to clear failures for trigger '{trigger_id}': {error}"
            ))
        })?;

        sqlx::query(
            r#"
            DELETE FROM event_scheduler_trigger_pauses
            WHERE trigger_id = $1
            "#,
        )
        .bind(trigger_id)
        .execute(&mut *transaction)
        .await
        .map_err(|error| {
            AppError::StoreUnavailable(format!(
                "failed to clear pause for trigger '{trigger_id}': {error}"
            ))
        })?;

        transaction.commit().await.map_err(|error| {
            AppError::StoreUnavailable(format!(
                "failed to commit clear for trigger '{trigger_id}': {error}"
            ))
        })?;

        Ok(())
    }

    async fn list_active_source_pauses(&self, now: DateTime<Utc>) -> AppResult<Vec<SourcePause>> {
        let rows = sqlx::query_as::<_, SourcePauseRow>(
            r#"
            SELECT source, paused_until, reason, details
            FROM event_scheduler_source_pauses
            WHERE paused_until > $1
            ORDER BY paused_until ASC
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(|error| {
            AppError::StoreUnavailable(format!("failed to list active source pauses: {error}"))
        })?;

        Ok(rows.into_iter().map(SourcePause::from).collect())
    }

    async fn list_active_trigger_pauses(
        &self,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<TriggerPause>> {
        let rows = sqlx::query_as::<_, TriggerPauseRow>(
            r#"
            SELECT trigger_id, paused_until, reason, failures
            FROM event_scheduler_trigger_pauses
            WHERE paused_until > $1
            ORDER BY paused_until ASC
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(|error| {
            AppError::StoreUnavailable(format!("failed to list active trigger pauses: {error}"))
        })?;

        Ok(rows.into_iter().map(TriggerPause::from).collect())
    }

    async fn list_trigger_history(&self, query: TriggerHistoryQuery) -> AppResult<TriggerHistory> {
        let limit = i64::try_from(query.limit).map_err(|error| {
            AppError::Validation(format!("invalid trigger history limit: {error}"))
        })?;

        let failures = sqlx::query_as::<_, TriggerFailureRow>(
            r#"
            SELECT trigger_id, failure_time, reason
            FROM event_scheduler_trigger_failures
            WHERE trigger_id = ANY($1)
              AND failure_time >= $2
              AND failure_time <= $3
            ORDER BY failure_time DESC
            LIMIT $4
            "#,
        )
        .bind(&query.trigger_ids)
        .bind(query.from)
        .bind(query.to)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|error| {
            AppError::StoreUnavailable(format!("failed to list trigger failure history: {error}"))
        })?;

        let pauses = sqlx::query_as::<_, TriggerPauseRow>(
            r#"
            SELECT trigger_id, paused_until, reason, failures
            FROM event_scheduler_trigger_pauses
            WHERE trigger_id = ANY($1)
              AND paused_until >= $2
              AND paused_until <= $3
            ORDER BY paused_until DESC
            LIMIT $4
            "#,
        )
        .bind(&query.trigger_ids)
        .bind(query.from)
        .bind(query.to)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|error| {
            AppError::StoreUnavailable(format!("failed to list trigger pause history: {error}"))
        })?;

        Ok(TriggerHistory {
            failures: failures.into_iter().map(TriggerFailure::from).collect(),
            pauses: pauses.into_iter().map(TriggerPause::from).collect(),
        })
    }

    async fn truncate_all(&self) -> AppResult<()> {
        sqlx::query(
            r#"
            TRUNCATE
                event_scheduler_source_events,
                event_scheduler_source_pauses,
                event_scheduler_trigger_failures,
                event_scheduler_trigger_pauses
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::StoreUnavailable(format!("failed to truncate event gate tables: {error}"))
        })?;

        Ok(())
    }
}
