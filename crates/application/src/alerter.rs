use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use capstan_core::AppResult;
use chrono::{DateTime, Duration, Utc};
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::env::{optional_env, parse_env_i64};
use crate::run_ports::{WorkflowRun, WorkflowRunStore};

#[cfg(test)]
mod tests;

/// Failure-streak alerting configuration, loadable from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertConfig {
    /// Minimum recent failures before an alert fires; `<= 0` disables.
    pub threshold: i64,
    /// Sliding failure window and alert cool-down, in minutes.
    pub window_minutes: i64,
    /// Outbound POST target; `None` disables.
    pub webhook_url: Option<String>,
    /// Bearer token sent as `Authorization`.
    pub webhook_token: Option<String>,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            threshold: 3,
            window_minutes: 15,
            webhook_url: None,
            webhook_token: None,
        }
    }
}

impl AlertConfig {
    /// Loads configuration from `WORKFLOW_FAILURE_ALERT_THRESHOLD`,
    /// `WORKFLOW_FAILURE_ALERT_WINDOW_MINUTES`, `WORKFLOW_ALERT_WEBHOOK_URL`,
    /// and `WORKFLOW_ALERT_WEBHOOK_TOKEN`.
    pub fn from_env() -> AppResult<Self> {
        let defaults = Self::default();

        Ok(Self {
            threshold: parse_env_i64("WORKFLOW_FAILURE_ALERT_THRESHOLD", defaults.threshold)?,
            window_minutes: parse_env_i64(
                "WORKFLOW_FAILURE_ALERT_WINDOW_MINUTES",
                defaults.window_minutes,
            )?
            .max(1),
            webhook_url: optional_env("WORKFLOW_ALERT_WEBHOOK_URL"),
            webhook_token: optional_env("WORKFLOW_ALERT_WEBHOOK_TOKEN"),
        })
    }

    /// Returns whether alerting is active.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.threshold > 0 && self.webhook_url.is_some()
    }
}

/// One outbound alert delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertWebhookRequest {
    /// POST target.
    pub url: String,
    /// Optional bearer token.
    pub bearer_token: Option<String>,
    /// JSON body.
    pub body: Value,
}

/// Transport port for alert delivery.
#[async_trait]
pub trait AlertWebhook: Send + Sync {
    /// Delivers one alert payload.
    async fn post(&self, request: AlertWebhookRequest) -> AppResult<()>;
}

/// Posts a webhook when a workflow accumulates a failure streak.
///
/// The cool-down map is per process and owned by this object; at most one
/// alert fires per workflow per window. Delivery failures are logged and
/// never propagated, and a failed POST still consumes the cool-down window
/// (the alerter does not retry).
pub struct RunAlerter {
    store: Arc<dyn WorkflowRunStore>,
    webhook: Arc<dyn AlertWebhook>,
    config: AlertConfig,
    last_alerts: Mutex<HashMap<Uuid, DateTime<Utc>>>,
}

impl RunAlerter {
    /// Creates an alerter.
    #[must_use]
    pub fn new(
        store: Arc<dyn WorkflowRunStore>,
        webhook: Arc<dyn AlertWebhook>,
        config: AlertConfig,
    ) -> Self {
        Self {
            store,
            webhook,
            config,
            last_alerts: Mutex::new(HashMap::new()),
        }
    }

    /// Evaluates one failed run against the streak threshold and cool-down,
    /// posting the alert webhook when both pass.
    pub async fn notify_failure(&self, run: &WorkflowRun, now: DateTime<Utc>) {
        let Some(webhook_url) = self.config.webhook_url.as_deref() else {
            return;
        };

        if self.config.threshold <= 0 {
            return;
        }

        let failure_count = match self
            .store
            .count_recent_failures(run.workflow_definition_id, self.config.window_minutes)
            .await
        {
            Ok(count) => count,
            Err(error) => {
                warn!(
                    workflow_definition_id = %run.workflow_definition_id,
                    error = %error,
                    "failed to count recent failures for alerting"
                );
                return;
            }
        };

        if failure_count < self.config.threshold {
            return;
        }

        {
            let mut last_alerts = self.last_alerts.lock().await;
            if let Some(last) = last_alerts.get(&run.workflow_definition_id)
                && now.signed_duration_since(*last) < Duration::minutes(self.config.window_minutes)
            {
                return;
            }
            last_alerts.insert(run.workflow_definition_id, now);
        }

        let request = AlertWebhookRequest {
            url: webhook_url.to_owned(),
            bearer_token: self.config.webhook_token.clone(),
            body: json!({
                "event": "workflow.failure.streak",
                "data": {
                    "workflowDefinitionId": run.workflow_definition_id,
                    "workflowRunId": run.id,
                    "failureCount": failure_count,
                    "windowMinutes": self.config.window_minutes,
                    "errorMessage": run.error_message,
                    "occurredAt": now.to_rfc3339(),
                },
            }),
        };

        match self.webhook.post(request).await {
            Ok(()) => info!(
                workflow_definition_id = %run.workflow_definition_id,
                failure_count,
                "workflow failure streak alert delivered"
            ),
            Err(error) => warn!(
                workflow_definition_id = %run.workflow_definition_id,
                error = %error,
                "workflow failure streak alert delivery failed"
            ),
        }
    }
}
