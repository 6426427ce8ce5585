use capstan_core::{AppError, AppResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Lifecycle status of one workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowRunStatus {
    /// Run created and waiting for a worker.
    Pending,
    /// Run claimed and currently executing.
    Running,
    /// Run finished successfully.
    Succeeded,
    /// Run finished with an error.
    Failed,
    /// Run was canceled before completion.
    Canceled,
}

impl WorkflowRunStatus {
    /// Returns stable storage value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }

    /// Parses storage value.
    pub fn parse(value: &str) -> AppResult<Self> {
        match value {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "canceled" => Ok(Self::Canceled),
            _ => Err(AppError::Validation(format!(
                "unknown workflow run status '{value}'"
            ))),
        }
    }

    /// Returns whether this status accepts no further transitions.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }

    /// Returns whether the run may move from this status to `next`.
    ///
    /// The machine is `pending -> running -> (succeeded | failed | canceled)`;
    /// a pending run may also be canceled outright. Terminal statuses accept
    /// nothing.
    #[must_use]
    pub fn can_transition_to(&self, next: WorkflowRunStatus) -> bool {
        match self {
            Self::Pending => matches!(next, Self::Running | Self::Canceled),
            Self::Running => matches!(next, Self::Succeeded | Self::Failed | Self::Canceled),
            Self::Succeeded | Self::Failed | Self::Canceled => false,
        }
    }
}

impl std::fmt::Display for WorkflowRunStatus {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Inclusive time window attached to a materialized occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    /// Window start.
    pub start: DateTime<Utc>,
    /// Window end.
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// Returns the degenerate window covering one occurrence instant.
    #[must_use]
    pub fn at(occurrence: DateTime<Utc>) -> Self {
        Self {
            start: occurrence,
            end: occurrence,
        }
    }
}

/// Typed view over the trigger descriptor persisted with every run.
///
/// The payload is otherwise opaque to the control plane; only the fields
/// below are ever read back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunTrigger {
    /// Run requested directly by an operator or API caller.
    Manual {
        /// Optional requesting principal.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        triggered_by: Option<String>,
    },
    /// Run materialized from a cron schedule occurrence.
    Schedule {
        /// Originating schedule.
        schedule_id: Uuid,
        /// Cron occurrence in UTC.
        occurrence: DateTime<Utc>,
        /// Window associated with the occurrence.
        window: TimeWindow,
    },
    /// Run admitted from an external event source.
    Event {
        /// Normalized event source name.
        source: String,
        /// Optional upstream event identifier.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        event_id: Option<String>,
    },
}

impl RunTrigger {
    /// Returns the stable trigger kind tag.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Manual { .. } => "manual",
            Self::Schedule { .. } => "schedule",
            Self::Event { .. } => "event",
        }
    }
}

/// Backoff strategy for run retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategy {
    /// Same delay before every attempt.
    Fixed,
    /// Delay doubles with each attempt.
    Exponential,
}

/// Table-driven retry policy consumed by run workers.
///
/// The scheduler itself never retries inside a tick; it relies on the next
/// tick or on the worker applying this policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum attempts including the first.
    pub max_attempts: u32,
    /// Backoff strategy.
    pub strategy: RetryStrategy,
    /// Delay before the first retry.
    pub initial_delay_ms: u64,
}

impl RetryPolicy {
    /// Returns the delay before the given 1-based retry attempt, or `None`
    /// once attempts are exhausted.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt >= self.max_attempts {
            return None;
        }

        let millis = match self.strategy {
            RetryStrategy::Fixed => self.initial_delay_ms,
            RetryStrategy::Exponential => self
                .initial_delay_ms
                .saturating_mul(1_u64.checked_shl(attempt - 1).unwrap_or(u64::MAX)),
        };

        Some(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::{RetryPolicy, RetryStrategy, RunTrigger, TimeWindow, WorkflowRunStatus};
    use chrono::{TimeZone, Utc};
    use std::time::Duration;
    use uuid::Uuid;

    #[test]
    fn pending_runs_only_start_or_cancel() {
        let pending = WorkflowRunStatus::Pending;
        assert!(pending.can_transition_to(WorkflowRunStatus::Running));
        assert!(pending.can_transition_to(WorkflowRunStatus::Canceled));
        assert!(!pending.can_transition_to(WorkflowRunStatus::Succeeded));
        assert!(!pending.can_transition_to(WorkflowRunStatus::Failed));
        assert!(!pending.can_transition_to(WorkflowRunStatus::Pending));
    }

    #[test]
    fn terminal_statuses_never_transition() {
        for terminal in [
            WorkflowRunStatus::Succeeded,
            WorkflowRunStatus::Failed,
            WorkflowRunStatus::Canceled,
        ] {
            assert!(terminal.is_terminal());
            for next in [
                WorkflowRunStatus::Pending,
                WorkflowRunStatus::Running,
                WorkflowRunStatus::Succeeded,
                WorkflowRunStatus::Failed,
                WorkflowRunStatus::Canceled,
            ] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn schedule_trigger_serializes_with_kind_tag() {
        let occurrence = Utc.with_ymd_and_hms(2024, 1, 1, 0, 4, 30).single();
        assert!(occurrence.is_some());
        let occurrence = occurrence.unwrap_or_default();

        let trigger = RunTrigger::Schedule {
            schedule_id: Uuid::new_v4(),
            occurrence,
            window: TimeWindow::at(occurrence),
        };

        let encoded = serde_json::to_value(&trigger).unwrap_or_default();
        assert_eq!(encoded["kind"], "schedule");
        assert_eq!(encoded["occurrence"], "2024-01-01T00:04:30Z");
        assert_eq!(encoded["window"]["start"], encoded["window"]["end"]);
    }

    #[test]
    fn fixed_retry_delays_stay_constant() {
        let policy = RetryPolicy {
            max_attempts: 3,
            strategy: RetryStrategy::Fixed,
            initial_delay_ms: 250,
        };

        assert_eq!(policy.delay_for_attempt(1), Some(Duration::from_millis(250)));
        assert_eq!(policy.delay_for_attempt(2), Some(Duration::from_millis(250)));
        assert_eq!(policy.delay_for_attempt(3), None);
    }

    #[test]
    fn exponential_retry_delays_double() {
        let policy = RetryPolicy {
            max_attempts: 4,
            strategy: RetryStrategy::Exponential,
            initial_delay_ms: 100,
        };

        assert_eq!(policy.delay_for_attempt(1), Some(Duration::from_millis(100)));
        assert_eq!(policy.delay_for_attempt(2), Some(Duration::from_millis(200)));
        assert_eq!(policy.delay_for_attempt(3), Some(Duration::from_millis(400)));
        assert_eq!(policy.delay_for_attempt(4), None);
    }
}
