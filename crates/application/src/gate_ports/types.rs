use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Rate limit applied to one event source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRateLimit {
    /// Normalized source name.
    pub source: String,
    /// Maximum events inside one interval before the source is paused.
    pub limit: i64,
    /// Sliding window length in milliseconds.
    pub interval_ms: i64,
    /// Pause length installed when the limit is exceeded, in milliseconds.
    pub pause_ms: i64,
}

/// Active pause for one event source; at most one row per source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourcePause {
    /// Normalized source name.
    pub source: String,
    /// Instant the pause expires.
    pub paused_until: DateTime<Utc>,
    /// `rate_limit` or a manual reason.
    pub reason: String,
    /// Opaque detail payload (limit and interval for rate-limit pauses).
    pub details: Value,
}

/// One recorded trigger failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerFailure {
    /// Trigger the failure belongs to.
    pub trigger_id: String,
    /// Failure instant.
    pub failure_time: DateTime<Utc>,
    /// Optional failure reason.
    pub reason: Option<String>,
}

/// Circuit-breaker pause for one trigger; at most one row per trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerPause {
    /// Paused trigger.
    pub trigger_id: String,
    /// Instant the pause expires.
    pub paused_until: DateTime<Utc>,
    /// Reason recorded when the breaker opened.
    pub reason: String,
    /// Failure count observed when the breaker opened.
    pub failures: i64,
}

/// Admission decision for one inbound event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateDecision {
    /// Whether the event may be accepted.
    pub allowed: bool,
    /// Pause reason when rejected.
    pub reason: Option<String>,
    /// Pause expiry when rejected.
    pub until: Option<DateTime<Utc>>,
}

impl GateDecision {
    /// Returns an allow decision.
    #[must_use]
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
            until: None,
        }
    }

    /// Returns a pause decision.
    #[must_use]
    pub fn paused(reason: impl Into<String>, until: DateTime<Utc>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
            until: Some(until),
        }
    }
}

/// Result of registering one trigger failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerFailureOutcome {
    /// Whether the circuit breaker is now open.
    pub paused: bool,
    /// Pause expiry when open.
    pub until: Option<DateTime<Utc>>,
    /// Failures currently inside the window, including this one.
    pub failure_count: i64,
}

/// History query over trigger failures and pauses.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerHistoryQuery {
    /// Triggers of interest.
    pub trigger_ids: Vec<String>,
    /// Window start (inclusive).
    pub from: DateTime<Utc>,
    /// Window end (inclusive).
    pub to: DateTime<Utc>,
    /// Row cap; clamped to 500 by the service.
    pub limit: usize,
}

/// Trigger failure/pause history for observability surfaces.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TriggerHistory {
    /// Failures inside the queried window, newest first.
    pub failures: Vec<TriggerFailure>,
    /// Pauses that expire inside the queried window, newest first.
    pub pauses: Vec<TriggerPause>,
}
