use async_trait::async_trait;
use capstan_core::AppResult;
use chrono::{DateTime, Utc};

use super::types::{SourcePause, TriggerFailure, TriggerHistory, TriggerHistoryQuery, TriggerPause};

/// Store port owning the four event-scheduler pause/failure tables.
///
/// All operations are idempotent under retry; pause rows past their
/// `paused_until` are removed lazily by the expiry deletes below.
#[async_trait]
pub trait EventGateStore: Send + Sync {
    /// Deletes a source pause once it has expired.
    async fn delete_expired_source_pauses(
        &self,
        source: &str,
        now: DateTime<Utc>,
    ) -> AppResult<()>;

    /// Returns the pause row for one source.
    async fn get_source_pause(&self, source: &str) -> AppResult<Option<SourcePause>>;

    /// Inserts or replaces the pause row for one source.
    async fn upsert_source_pause(&self, pause: SourcePause) -> AppResult<()>;

    /// Records one event for the source's sliding window.
    async fn append_source_event(&self, source: &str, event_time: DateTime<Utc>) -> AppResult<()>;

    /// Drops source events older than `cutoff`; returns the removed count.
    async fn purge_source_events_before(
        &self,
        source: &str,
        cutoff: DateTime<Utc>,
    ) -> AppResult<u64>;

    /// Counts events currently recorded for the source.
    async fn count_source_events(&self, source: &str) -> AppResult<i64>;

    /// Records one trigger failure.
    async fn append_trigger_failure(&self, failure: TriggerFailure) -> AppResult<()>;

    /// Drops trigger failures older than `cutoff`; returns the removed count.
    async fn purge_trigger_failures_before(
        &self,
        trigger_id: &str,
        cutoff: DateTime<Utc>,
    ) -> AppResult<u64>;

    /// Counts failures currently recorded for the trigger.
    async fn count_trigger_failures(&self, trigger_id: &str) -> AppResult<i64>;

    /// Inserts or replaces the pause row for one trigger.
    async fn upsert_trigger_pause(&self, pause: TriggerPause) -> AppResult<()>;

    /// Returns the pause row for one trigger.
    async fn get_trigger_pause(&self, trigger_id: &str) -> AppResult<Option<TriggerPause>>;

    /// Deletes a trigger pause once it has expired.
    async fn delete_expired_trigger_pauses(
        &self,
        trigger_id: &str,
        now: DateTime<Utc>,
    ) -> AppResult<()>;

    /// Removes all failure rows and any pause row for one trigger.
    async fn clear_trigger_state(&self, trigger_id: &str) -> AppResult<()>;

    /// Lists pauses for all sources that are still in effect at `now`.
    async fn list_active_source_pauses(&self, now: DateTime<Utc>) -> AppResult<Vec<SourcePause>>;

    /// Lists pauses for all triggers that are still in effect at `now`.
    async fn list_active_trigger_pauses(&self, now: DateTime<Utc>) -> AppResult<Vec<TriggerPause>>;

    /// Returns failure/pause history for a set of triggers.
    async fn list_trigger_history(&self, query: TriggerHistoryQuery) -> AppResult<TriggerHistory>;

    /// Removes all gate state. Test-only reset hook.
    async fn truncate_all(&self) -> AppResult<()>;
}
