use std::sync::Arc;

use capstan_domain::{StateEvent, WorkflowRunStatus};
use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use crate::alerter::RunAlerter;
use crate::event_bus::EventBus;
use crate::run_ports::{
    CreateWorkflowRunInput, RunTransitionPatch, WorkflowRun, WorkflowRunListQuery,
    WorkflowRunStore,
};
use capstan_core::AppResult;


/// Transactional facade over the run table.
///
/// Every successful mutation is mirrored onto the event bus so long-lived
/// subscribers observe run lifecycle changes without polling.
#[derive(Clone)]
pub struct WorkflowRunService {
    store: Arc<dyn WorkflowRunStore>,
    bus: EventBus,
    alerter: Option<Arc<RunAlerter>>,
}

impl WorkflowRunService {
    /// Creates a run service.
    #[must_use]
    pub fn new(store: Arc<dyn WorkflowRunStore>, bus: EventBus) -> Self {
        Self {
            store,
            bus,
            alerter: None,
        }
    }

    /// Adds the failure-streak alerter invoked on every `failed` transition.
    #[must_use]
    pub fn with_alerter(mut self, alerter: Arc<RunAlerter>) -> Self {
        self.alerter = Some(alerter);
        self
    }

    /// Creates one run and emits its status-specific event.
    pub async fn create_run(&self, input: CreateWorkflowRunInput) -> AppResult<WorkflowRun> {
        let run = self.store.create_run(input).await?;
        self.bus
            .publish(StateEvent::for_run_status(run.status, run_snapshot(&run)));
        Ok(run)
    }

    /// Transitions one run and emits exactly two bus events, in order: the
    /// status-specific `workflow.run.<next>` followed by the generic
    /// `workflow.run.updated`.
    ///
    /// Subscribers listening to both event families see the same transition
    /// twice; consumers that count transitions must pick one family.
    ///
    /// The store enforces the state machine under a row lock; illegal
    /// transitions return a conflict and emit nothing. A transition to
    /// `failed` additionally invokes the alerter on a detached task, so
    /// alert delivery can never fail the transition.
    pub async fn transition(
        &self,
        run_id: Uuid,
        next: WorkflowRunStatus,
        patch: RunTransitionPatch,
    ) -> AppResult<WorkflowRun> {
        let run = self.store.transition_run(run_id, next, patch).await?;

        let snapshot = run_snapshot(&run);
        self.bus
            .publish(StateEvent::for_run_status(run.status, snapshot.clone()));
        self.bus.publish(StateEvent::WorkflowRunUpdated(snapshot));

        if run.status == WorkflowRunStatus::Failed
            && let Some(alerter) = &self.alerter
        {
            let alerter = Arc::clone(alerter);
            let failed_run = run.clone();
            tokio::spawn(async move {
                alerter.notify_failure(&failed_run, Utc::now()).await;
            });
        }

        Ok(run)
    }

    /// Returns one run by id.
    pub async fn get_run(&self, run_id: Uuid) -> AppResult<Option<WorkflowRun>> {
        self.store.get_run(run_id).await
    }

    /// Lists runs for one workflow definition.
    pub async fn list_runs_by_definition(
        &self,
        workflow_definition_id: Uuid,
        query: WorkflowRunListQuery,
    ) -> AppResult<Vec<WorkflowRun>> {
        self.store
            .list_runs_by_definition(workflow_definition_id, query)
            .await
    }

    /// Counts recent `failed` runs for one workflow definition.
    pub async fn count_recent_failures(
        &self,
        workflow_definition_id: Uuid,
        window_minutes: i64,
    ) -> AppResult<i64> {
        self.store
            .count_recent_failures(workflow_definition_id, window_minutes)
            .await
    }

    /// Merges a metrics annotation into one run without a status change.
    pub async fn annotate_run_metrics(&self, run_id: Uuid, metrics: Value) -> AppResult<()> {
        self.store.annotate_run_metrics(run_id, metrics).await
    }
}

fn run_snapshot(run: &WorkflowRun) -> Value {
    serde_json::to_value(run).unwrap_or(Value::Null)
}
