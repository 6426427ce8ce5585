use std::sync::Arc;
use std::time::Duration;

use capstan_core::{AppError, AppResult};
use capstan_domain::{
    CronSpec, RunTrigger, TimeWindow, WorkflowRunStatus, time_window_partition_key,
};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value, json};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::env::{parse_env_u64, parse_env_usize};
use crate::run_ports::{
    CreateWorkflowRunInput, DueSchedule, RunQueue, ScheduleRuntimePatch, ScheduleStore,
};
use crate::run_service::WorkflowRunService;


/// Materializer loop tuning, loadable from the environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaterializerConfig {
    /// Delay between ticks.
    pub tick_interval: Duration,
    /// Maximum schedules claimed per tick.
    pub batch_size: usize,
    /// Maximum occurrences materialized per schedule per tick.
    pub max_windows: usize,
}

impl Default for MaterializerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(10_000),
            batch_size: 20,
            max_windows: 5,
        }
    }
}

impl MaterializerConfig {
    /// Loads configuration from `SCHEDULER_INTERVAL_MS`,
    /// `SCHEDULER_BATCH_SIZE`, and `SCHEDULER_MAX_WINDOWS`.
    pub fn from_env() -> AppResult<Self> {
        let defaults = Self::default();
        let interval_ms = parse_env_u64(
            "SCHEDULER_INTERVAL_MS",
            u64::try_from(defaults.tick_interval.as_millis()).unwrap_or(10_000),
        )?;
        let batch_size = parse_env_usize("SCHEDULER_BATCH_SIZE", defaults.batch_size)?;
        let max_windows = parse_env_usize("SCHEDULER_MAX_WINDOWS", defaults.max_windows)?;

        if interval_ms == 0 {
            return Err(AppError::Validation(
                "SCHEDULER_INTERVAL_MS must be greater than zero".to_owned(),
            ));
        }

        if batch_size == 0 {
            return Err(AppError::Validation(
                "SCHEDULER_BATCH_SIZE must be greater than zero".to_owned(),
            ));
        }

        if max_windows == 0 {
            return Err(AppError::Validation(
                "SCHEDULER_MAX_WINDOWS must be greater than zero".to_owned(),
            ));
        }

        Ok(Self {
            tick_interval: Duration::from_millis(interval_ms),
            batch_size,
            max_windows,
        })
    }
}

enum OccurrenceOutcome {
    /// A pending run exists and was handed to the queue.
    Materialized,
    /// No time-window partition applies; cursors advance without a run.
    Skipped,
    /// The run row exists but the queue rejected it; retried next tick.
    EnqueueFailed,
}

/// Converts due `(workflow, schedule)` pairs into pending run rows.
///
/// One instance runs per process; ticks never overlap and a stop signal is
/// honored as soon as the in-flight tick completes.
pub struct ScheduleMaterializer {
    runs: WorkflowRunService,
    schedules: Arc<dyn ScheduleStore>,
    queue: Arc<dyn RunQueue>,
    config: MaterializerConfig,
}

impl ScheduleMaterializer {
    /// Creates a materializer.
    #[must_use]
    pub fn new(
        runs: WorkflowRunService,
        schedules: Arc<dyn ScheduleStore>,
        queue: Arc<dyn RunQueue>,
        config: MaterializerConfig,
    ) -> Self {
        Self {
            runs,
            schedules,
            queue,
            config,
        }
    }

    /// Runs the tick loop until `stop` flips to `true` or its sender drops.
    pub async fn run(self, mut stop: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            tick_interval_ms = self.config.tick_interval.as_millis() as u64,
            batch_size = self.config.batch_size,
            max_windows = self.config.max_windows,
            "schedule materializer started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(error) = self.tick(Utc::now()).await {
                        warn!(error = %error, "materializer tick failed; retrying next tick");
                    }
                }
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        info!("schedule materializer stopping");
                        return;
                    }
                }
            }
        }
    }

    /// Claims due schedules and materializes their backlog once.
    pub async fn tick(&self, now: DateTime<Utc>) -> AppResult<()> {
        let due = self
            .schedules
            .list_due_schedules(now, self.config.batch_size)
            .await?;

        if due.is_empty() {
            return Ok(());
        }

        debug!(due = due.len(), "materializing due schedules");

        for entry in &due {
            if let Err(error) = self.materialize_schedule(entry, now).await {
                warn!(
                    schedule_id = %entry.schedule.id,
                    workflow = %entry.definition.slug(),
                    error = %error,
                    "failed to materialize schedule; cursor left in place for retry"
                );
            }
        }

        Ok(())
    }

    async fn materialize_schedule(&self, due: &DueSchedule, now: DateTime<Utc>) -> AppResult<()> {
        let schedule = &due.schedule;
        if !schedule.is_active {
            return Ok(());
        }

        let Some(next_run_at) = schedule.next_run_at else {
            return Ok(());
        };

        let cron = CronSpec::parse(schedule.cron.as_str(), schedule.timezone.as_str())?;
        let start = schedule.catchup_cursor.unwrap_or(next_run_at);

        if schedule.catch_up {
            self.materialize_catch_up(due, &cron, start, now).await
        } else {
            self.materialize_latest(due, &cron, start, now).await
        }
    }

    /// Without catch-up, one due occurrence is materialized and the backlog
    /// is discarded by jumping the cursor past `now`.
    async fn materialize_latest(
        &self,
        due: &DueSchedule,
        cron: &CronSpec,
        start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        let occurrence = cron
            .occurrences_from(start)
            .next()
            .filter(|occurrence| *occurrence <= now);
        let Some(occurrence) = occurrence else {
            return Ok(());
        };

        let patch = match self.materialize_occurrence(due, occurrence).await? {
            OccurrenceOutcome::EnqueueFailed => park_at(occurrence),
            outcome => ScheduleRuntimePatch {
                next_run_at: Some(cron.next_after(now)),
                catchup_cursor: Some(None),
                last_materialized_window: matches!(outcome, OccurrenceOutcome::Materialized)
                    .then(|| Some(TimeWindow::at(occurrence))),
            },
        };

        self.schedules
            .update_schedule_runtime_metadata(due.schedule.id, patch)
            .await
    }

    /// With catch-up, pending occurrences are processed oldest first, one
    /// cursor write per occurrence, bounded by `max_windows` per tick.
    async fn materialize_catch_up(
        &self,
        due: &DueSchedule,
        cron: &CronSpec,
        start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        let occurrences: Vec<DateTime<Utc>> = cron
            .occurrences_from(start)
            .take_while(|occurrence| *occurrence <= now)
            .take(self.config.max_windows)
            .collect();

        for occurrence in occurrences {
            if let OccurrenceOutcome::EnqueueFailed =
                self.materialize_occurrence(due, occurrence).await?
            {
                self.schedules
                    .update_schedule_runtime_metadata(due.schedule.id, park_at(occurrence))
                    .await?;
                return Ok(());
            }

            let next = cron.next_after(occurrence);
            self.schedules
                .update_schedule_runtime_metadata(
                    due.schedule.id,
                    ScheduleRuntimePatch {
                        next_run_at: Some(next),
                        catchup_cursor: Some(next),
                        last_materialized_window: Some(Some(TimeWindow::at(occurrence))),
                    },
                )
                .await?;
        }

        Ok(())
    }

    async fn materialize_occurrence(
        &self,
        due: &DueSchedule,
        occurrence: DateTime<Utc>,
    ) -> AppResult<OccurrenceOutcome> {
        let Some(partition_key) = time_window_partition_key(&due.definition, occurrence) else {
            debug!(
                schedule_id = %due.schedule.id,
                workflow = %due.definition.slug(),
                occurrence = %occurrence,
                "workflow has no time-window partitioned asset; skipping occurrence"
            );
            return Ok(OccurrenceOutcome::Skipped);
        };

        let run = self
            .runs
            .create_run(CreateWorkflowRunInput {
                workflow_definition_id: due.definition.id(),
                parameters: merged_parameters(
                    due.definition.default_parameters(),
                    due.schedule.parameters.as_ref(),
                ),
                trigger: RunTrigger::Schedule {
                    schedule_id: due.schedule.id,
                    occurrence,
                    window: TimeWindow::at(occurrence),
                },
                partition_key: Some(partition_key),
                initial_status: WorkflowRunStatus::Pending,
            })
            .await?;

        if let Err(error) = self.queue.enqueue(&run).await {
            warn!(
                run_id = %run.id,
                schedule_id = %due.schedule.id,
                error = %error,
                "run enqueue failed; run stays pending and the occurrence is retried next tick"
            );
            let annotation = json!({ "enqueueError": error.to_string() });
            if let Err(error) = self.runs.annotate_run_metrics(run.id, annotation).await {
                warn!(run_id = %run.id, error = %error, "failed to annotate run with enqueue error");
            }
            return Ok(OccurrenceOutcome::EnqueueFailed);
        }

        Ok(OccurrenceOutcome::Materialized)
    }
}

fn park_at(occurrence: DateTime<Utc>) -> ScheduleRuntimePatch {
    ScheduleRuntimePatch {
        next_run_at: Some(Some(occurrence)),
        catchup_cursor: Some(Some(occurrence)),
        last_materialized_window: None,
    }
}

/// Shallow merge of the schedule's parameter overlay over workflow defaults.
fn merged_parameters(defaults: &Value, overlay: Option<&Value>) -> Value {
    let mut merged: Map<String, Value> = defaults.as_object().cloned().unwrap_or_default();

    if let Some(Value::Object(overlay)) = overlay {
        for (key, value) in overlay {
            merged.insert(key.clone(), value.clone());
        }
    }

    Value::Object(merged)
}
