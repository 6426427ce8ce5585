//! State-change notifications fanned out by the event bus.

use crate::run::WorkflowRunStatus;
use chrono::{DateTime, Utc};
use serde_json::{Value, json};

/// One state-change notification.
///
/// Payloads are opaque JSON snapshots; the bus forwards them verbatim and the
/// outbound websocket adapter renders them as `{type, data, emittedAt}`
/// envelopes.
#[derive(Debug, Clone, PartialEq)]
pub enum StateEvent {
    /// A repository record changed.
    RepositoryUpdated(Value),
    /// A repository ingestion event was recorded.
    RepositoryIngestionEvent(Value),
    /// A build record changed.
    BuildUpdated(Value),
    /// A launch record changed.
    LaunchUpdated(Value),
    /// A service record changed.
    ServiceUpdated(Value),
    /// A workflow definition was created or updated.
    WorkflowDefinitionUpdated(Value),
    /// A workflow run entered `pending`.
    WorkflowRunPending(Value),
    /// A workflow run entered `running`.
    WorkflowRunRunning(Value),
    /// A workflow run entered `succeeded`.
    WorkflowRunSucceeded(Value),
    /// A workflow run entered `failed`.
    WorkflowRunFailed(Value),
    /// A workflow run entered `canceled`.
    WorkflowRunCanceled(Value),
    /// A workflow run changed in any way; always follows the status-specific
    /// event for the same transition.
    WorkflowRunUpdated(Value),
}

impl StateEvent {
    /// Returns the status-specific run event for one transition snapshot.
    #[must_use]
    pub fn for_run_status(status: WorkflowRunStatus, data: Value) -> Self {
        match status {
            WorkflowRunStatus::Pending => Self::WorkflowRunPending(data),
            WorkflowRunStatus::Running => Self::WorkflowRunRunning(data),
            WorkflowRunStatus::Succeeded => Self::WorkflowRunSucceeded(data),
            WorkflowRunStatus::Failed => Self::WorkflowRunFailed(data),
            WorkflowRunStatus::Canceled => Self::WorkflowRunCanceled(data),
        }
    }

    /// Returns the stable event type tag.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::RepositoryUpdated(_) => "repository.updated",
            Self::RepositoryIngestionEvent(_) => "repository.ingestion-event",
            Self::BuildUpdated(_) => "build.updated",
            Self::LaunchUpdated(_) => "launch.updated",
            Self::ServiceUpdated(_) => "service.updated",
            Self::WorkflowDefinitionUpdated(_) => "workflow.definition.updated",
            Self::WorkflowRunPending(_) => "workflow.run.pending",
            Self::WorkflowRunRunning(_) => "workflow.run.running",
            Self::WorkflowRunSucceeded(_) => "workflow.run.succeeded",
            Self::WorkflowRunFailed(_) => "workflow.run.failed",
            Self::WorkflowRunCanceled(_) => "workflow.run.canceled",
            Self::WorkflowRunUpdated(_) => "workflow.run.updated",
        }
    }

    /// Returns the opaque payload.
    #[must_use]
    pub fn data(&self) -> &Value {
        match self {
            Self::RepositoryUpdated(data)
            | Self::RepositoryIngestionEvent(data)
            | Self::BuildUpdated(data)
            | Self::LaunchUpdated(data)
            | Self::ServiceUpdated(data)
            | Self::WorkflowDefinitionUpdated(data)
            | Self::WorkflowRunPending(data)
            | Self::WorkflowRunRunning(data)
            | Self::WorkflowRunSucceeded(data)
            | Self::WorkflowRunFailed(data)
            | Self::WorkflowRunCanceled(data)
            | Self::WorkflowRunUpdated(data) => data,
        }
    }

    /// Returns whether this is one of the `workflow.run.*` events.
    #[must_use]
    pub fn is_run_event(&self) -> bool {
        self.event_type().starts_with("workflow.run.")
    }

    /// Renders the outbound wire envelope `{type, data, emittedAt}`.
    #[must_use]
    pub fn envelope(&self, emitted_at: DateTime<Utc>) -> Value {
        json!({
            "type": self.event_type(),
            "data": self.data(),
            "emittedAt": emitted_at.to_rfc3339(),
        })
    }
}

/// Greeting sent to every new websocket subscriber.
#[must_use]
pub fn connection_ack(now: DateTime<Utc>) -> Value {
    json!({
        "type": "connection.ack",
        "data": { "now": now.to_rfc3339() },
    })
}

/// Reply to a client `"ping"` payload.
#[must_use]
pub fn pong(now: DateTime<Utc>) -> Value {
    json!({
        "type": "pong",
        "data": { "now": now.to_rfc3339() },
    })
}

#[cfg(test)]
mod tests {
    use super::{StateEvent, connection_ack, pong};
    use crate::run::WorkflowRunStatus;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    #[test]
    fn run_events_carry_status_specific_types() {
        let event = StateEvent::for_run_status(WorkflowRunStatus::Failed, json!({"id": "run-1"}));
        assert_eq!(event.event_type(), "workflow.run.failed");
        assert!(event.is_run_event());
        assert_eq!(event.data()["id"], "run-1");
    }

    #[test]
    fn envelope_renders_type_data_and_rfc3339_timestamp() {
        let emitted_at = Utc
            .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
            .single()
            .unwrap_or_default();
        let event = StateEvent::RepositoryUpdated(json!({"repository": "observatory"}));

        let envelope = event.envelope(emitted_at);
        assert_eq!(envelope["type"], "repository.updated");
        assert_eq!(envelope["data"]["repository"], "observatory");
        assert_eq!(envelope["emittedAt"], "2024-01-01T00:00:00+00:00");
    }

    #[test]
    fn connection_ack_and_pong_carry_current_time() {
        let now = Utc
            .with_ymd_and_hms(2024, 1, 1, 12, 0, 0)
            .single()
            .unwrap_or_default();

        assert_eq!(connection_ack(now)["type"], "connection.ack");
        assert_eq!(pong(now)["data"]["now"], "2024-01-01T12:00:00+00:00");
    }
}
