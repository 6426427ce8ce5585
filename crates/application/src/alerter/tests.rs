use std::sync::Arc;

use async_trait::async_trait;
use capstan_core::{AppError, AppResult};
use capstan_domain::{RunTrigger, WorkflowRunStatus};
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::{Value, json};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::run_ports::{
    CreateWorkflowRunInput, RunTransitionPatch, WorkflowRun, WorkflowRunListQuery,
    WorkflowRunStore,
};

use super::{AlertConfig, AlertWebhook, AlertWebhookRequest, RunAlerter};

struct FakeRunStore {
    failure_count: Mutex<i64>,
}

impl FakeRunStore {
    fn with_failures(count: i64) -> Arc<Self> {
        Arc::new(Self {
            failure_count: Mutex::new(count),
        })
    }
}

#[async_trait]
impl WorkflowRunStore for FakeRunStore {
    async fn create_run(&self, _input: CreateWorkflowRunInput) -> AppResult<WorkflowRun> {
        Err(AppError::Internal(
            "run creation is not exercised by alerter tests".to_owned(),
        ))
    }

    async fn transition_run(
        &self,
        _run_id: Uuid,
        _next: WorkflowRunStatus,
        _patch: RunTransitionPatch,
    ) -> AppResult<WorkflowRun> {
        Err(AppError::Internal(
            "run transition is not exercised by alerter tests".to_owned(),
        ))
    }

    async fn get_run(&self, _run_id: Uuid) -> AppResult<Option<WorkflowRun>> {
        Ok(None)
    }

    async fn list_runs_by_definition(
        &self,
        _workflow_definition_id: Uuid,
        _query: WorkflowRunListQuery,
    ) -> AppResult<Vec<WorkflowRun>> {
        Ok(Vec::new())
    }

    async fn count_recent_failures(
        &self,
        _workflow_definition_id: Uuid,
        _window_minutes: i64,
    ) -> AppResult<i64> {
        Ok(*self.failure_count.lock().await)
    }

    async fn annotate_run_metrics(&self, _run_id: Uuid, _metrics: Value) -> AppResult<()> {
        Ok(())
    }
}

#[derive(Default)]
struct FakeWebhook {
    posts: Mutex<Vec<AlertWebhookRequest>>,
}

#[async_trait]
impl AlertWebhook for FakeWebhook {
    async fn post(&self, request: AlertWebhookRequest) -> AppResult<()> {
        self.posts.lock().await.push(request);
        Ok(())
    }
}

fn failed_run(workflow_definition_id: Uuid) -> WorkflowRun {
    WorkflowRun {
        id: Uuid::new_v4(),
        workflow_definition_id,
        status: WorkflowRunStatus::Failed,
        partition_key: None,
        parameters: json!({}),
        trigger: RunTrigger::Manual {
            triggered_by: None,
        },
        attempts: 1,
        error_message: Some("step exited non-zero".to_owned()),
        output: None,
        metrics: None,
        created_at: Utc::now(),
        started_at: Some(Utc::now()),
        completed_at: Some(Utc::now()),
        duration_ms: Some(1_250),
    }
}

fn config(threshold: i64) -> AlertConfig {
    AlertConfig {
        threshold,
        window_minutes: 15,
        webhook_url: Some("https://alerts.internal/hook".to_owned()),
        webhook_token: Some("alert-token".to_owned()),
    }
}

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0)
        .single()
        .unwrap_or_default()
}

#[tokio::test]
async fn posts_one_alert_when_the_streak_reaches_the_threshold() {
    let webhook = Arc::new(FakeWebhook::default());
    let alerter = RunAlerter::new(FakeRunStore::with_failures(3), webhook.clone(), config(3));
    let run = failed_run(Uuid::new_v4());

    alerter.notify_failure(&run, now()).await;

    let posts = webhook.posts.lock().await.clone();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].url, "https://alerts.internal/hook");
    assert_eq!(posts[0].bearer_token.as_deref(), Some("alert-token"));
    assert_eq!(posts[0].body["event"], "workflow.failure.streak");
    assert_eq!(posts[0].body["data"]["failureCount"], 3);
    assert_eq!(posts[0].body["data"]["windowMinutes"], 15);
    assert_eq!(
        posts[0].body["data"]["errorMessage"],
        "step exited non-zero"
    );
}

#[tokio::test]
async fn repeated_failures_inside_the_window_alert_at_most_once() {
    let webhook = Arc::new(FakeWebhook::default());
    let alerter = RunAlerter::new(FakeRunStore::with_failures(5), webhook.clone(), config(3));
    let workflow_definition_id = Uuid::new_v4();
    let base = now();

    for offset in 0..4_i64 {
        alerter
            .notify_failure(
                &failed_run(workflow_definition_id),
                base + Duration::minutes(offset),
            )
            .await;
    }

    assert_eq!(webhook.posts.lock().await.len(), 1);

    alerter
        .notify_failure(
            &failed_run(workflow_definition_id),
            base + Duration::minutes(16),
        )
        .await;
    assert_eq!(webhook.posts.lock().await.len(), 2);
}

#[tokio::test]
async fn distinct_workflows_alert_independently() {
    let webhook = Arc::new(FakeWebhook::default());
    let alerter = RunAlerter::new(FakeRunStore::with_failures(3), webhook.clone(), config(3));
    let base = now();

    alerter.notify_failure(&failed_run(Uuid::new_v4()), base).await;
    alerter.notify_failure(&failed_run(Uuid::new_v4()), base).await;

    assert_eq!(webhook.posts.lock().await.len(), 2);
}

#[tokio::test]
async fn below_threshold_streaks_do_not_alert() {
    let webhook = Arc::new(FakeWebhook::default());
    let alerter = RunAlerter::new(FakeRunStore::with_failures(2), webhook.clone(), config(3));

    alerter.notify_failure(&failed_run(Uuid::new_v4()), now()).await;

    assert!(webhook.posts.lock().await.is_empty());
}

#[tokio::test]
async fn non_positive_threshold_disables_alerting() {
    let webhook = Arc::new(FakeWebhook::default());
    let alerter = RunAlerter::new(FakeRunStore::with_failures(10), webhook.clone(), config(0));

    alerter.notify_failure(&failed_run(Uuid::new_v4()), now()).await;

    assert!(webhook.posts.lock().await.is_empty());
    assert!(!config(0).is_enabled());
}

#[tokio::test]
async fn missing_webhook_url_disables_alerting() {
    let webhook = Arc::new(FakeWebhook::default());
    let alerter = RunAlerter::new(
        FakeRunStore::with_failures(10),
        webhook.clone(),
        AlertConfig {
            webhook_url: None,
            ..config(3)
        },
    );

    alerter.notify_failure(&failed_run(Uuid::new_v4()), now()).await;

    assert!(webhook.posts.lock().await.is_empty());
}
