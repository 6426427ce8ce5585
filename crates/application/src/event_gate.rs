use std::collections::HashMap;
use std::sync::Arc;

use capstan_core::AppResult;
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tracing::{debug, info};

use crate::gate_ports::{
    EventGateStore, GateDecision, SourcePause, SourceRateLimit, TriggerFailure,
    TriggerFailureOutcome, TriggerHistory, TriggerHistoryQuery, TriggerPause,
};


const RATE_LIMIT_REASON: &str = "rate_limit";
const HISTORY_LIMIT_CAP: usize = 500;

/// Normalizes an event source name: trimmed, empty becomes `"unknown"`.
#[must_use]
pub fn normalize_source(source: &str) -> String {
    let trimmed = source.trim();
    if trimmed.is_empty() {
        "unknown".to_owned()
    } else {
        trimmed.to_owned()
    }
}

/// Admission gate for inbound external events.
///
/// Evaluates per-source rate limits and per-trigger failure circuit breakers
/// against persisted pause state. Store faults surface as
/// [`capstan_core::AppError::StoreUnavailable`]; ingress callers should treat
/// that as a deny.
#[derive(Clone)]
pub struct EventGateService {
    store: Arc<dyn EventGateStore>,
    rate_limits: HashMap<String, SourceRateLimit>,
}

impl EventGateService {
    /// Creates a gate over the given store and per-source rate limit rules.
    #[must_use]
    pub fn new(store: Arc<dyn EventGateStore>, rate_limits: Vec<SourceRateLimit>) -> Self {
        let rate_limits = rate_limits
            .into_iter()
            .map(|rule| (normalize_source(rule.source.as_str()), rule))
            .collect();

        Self { store, rate_limits }
    }

    /// Evaluates one inbound event against source pauses and rate limits.
    ///
    /// A source with no configured rate limit is always admitted unless a
    /// pause row exists. Expired pauses are removed lazily on each call.
    pub async fn evaluate_source(
        &self,
        source: &str,
        now: DateTime<Utc>,
    ) -> AppResult<GateDecision> {
        let source = normalize_source(source);

        self.store
            .delete_expired_source_pauses(source.as_str(), now)
            .await?;

        if let Some(pause) = self.store.get_source_pause(source.as_str()).await? {
            debug!(source = %source, until = %pause.paused_until, "source is paused; rejecting event");
            return Ok(GateDecision::paused(pause.reason, pause.paused_until));
        }

        let Some(rule) = self.rate_limits.get(source.as_str()) else {
            return Ok(GateDecision::allow());
        };

        let cutoff = now - Duration::milliseconds(rule.interval_ms);
        self.store
            .purge_source_events_before(source.as_str(), cutoff)
            .await?;
        self.store
            .append_source_event(source.as_str(), now)
            .await?;
        let count = self.store.count_source_events(source.as_str()).await?;

        if count > rule.limit {
            let until = now + Duration::milliseconds(rule.pause_ms);
            self.store
                .upsert_source_pause(SourcePause {
                    source: source.clone(),
                    paused_until: until,
                    reason: RATE_LIMIT_REASON.to_owned(),
                    details: json!({
                        "limit": rule.limit,
                        "intervalMs": rule.interval_ms,
                    }),
                })
                .await?;

            info!(
                source = %source,
                count,
                limit = rule.limit,
                until = %until,
                "source exceeded rate limit; pausing"
            );
            return Ok(GateDecision::paused(RATE_LIMIT_REASON, until));
        }

        Ok(GateDecision::allow())
    }

    /// Records one trigger failure and opens the circuit breaker once the
    /// failure count inside `window_ms` reaches `threshold`.
    pub async fn register_trigger_failure(
        &self,
        trigger_id: &str,
        reason: Option<&str>,
        threshold: i64,
        window_ms: i64,
        pause_ms: i64,
        now: DateTime<Utc>,
    ) -> AppResult<TriggerFailureOutcome> {
        self.store
            .purge_trigger_failures_before(trigger_id, now - Duration::milliseconds(window_ms))
            .await?;
        self.store
            .append_trigger_failure(TriggerFailure {
                trigger_id: trigger_id.to_owned(),
                failure_time: now,
                reason: reason.map(str::to_owned),
            })
            .await?;
        let failure_count = self.store.count_trigger_failures(trigger_id).await?;

        if threshold > 0 && failure_count >= threshold {
            let until = now + Duration::milliseconds(pause_ms);
            self.store
                .upsert_trigger_pause(TriggerPause {
                    trigger_id: trigger_id.to_owned(),
                    paused_until: until,
                    reason: reason.unwrap_or("failure_threshold").to_owned(),
                    failures: failure_count,
                })
                .await?;

            info!(
                trigger_id = %trigger_id,
                failures = failure_count,
                until = %until,
                "trigger failure threshold reached; pausing trigger"
            );
            return Ok(TriggerFailureOutcome {
                paused: true,
                until: Some(until),
                failure_count,
            });
        }

        self.store
            .delete_expired_trigger_pauses(trigger_id, now)
            .await?;

        Ok(TriggerFailureOutcome {
            paused: false,
            until: None,
            failure_count,
        })
    }

    /// Clears all failure state and any pause for one trigger.
    pub async fn register_trigger_success(&self, trigger_id: &str) -> AppResult<()> {
        self.store.clear_trigger_state(trigger_id).await
    }

    /// Returns the active pause for one trigger, removing it first if
    /// expired.
    pub async fn is_trigger_paused(
        &self,
        trigger_id: &str,
        now: DateTime<Utc>,
    ) -> AppResult<Option<TriggerPause>> {
        self.store
            .delete_expired_trigger_pauses(trigger_id, now)
            .await?;
        self.store.get_trigger_pause(trigger_id).await
    }

    /// Lists source pauses still in effect at `now`.
    pub async fn list_active_source_pauses(
        &self,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<SourcePause>> {
        self.store.list_active_source_pauses(now).await
    }

    /// Lists trigger pauses still in effect at `now`.
    pub async fn list_active_trigger_pauses(
        &self,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<TriggerPause>> {
        self.store.list_active_trigger_pauses(now).await
    }

    /// Returns failure/pause history for a set of triggers, capped at 500
    /// rows.
    pub async fn trigger_history(&self, mut query: TriggerHistoryQuery) -> AppResult<TriggerHistory> {
        query.limit = query.limit.clamp(1, HISTORY_LIMIT_CAP);
        self.store.list_trigger_history(query).await
    }
}
