//! Capstan schedule materializer daemon.

#![forbid(unsafe_code)]

use std::env;
use std::sync::Arc;
use std::time::Duration;

use capstan_application::{
    AlertConfig, EventBus, MaterializerConfig, RunAlerter, RunQueue, ScheduleMaterializer,
    ScheduleStore, WorkflowRunService, WorkflowRunStore,
};
use capstan_core::{AppError, AppResult};
use capstan_infrastructure::{HttpAlertWebhook, PostgresRunQueue, PostgresRunStore};

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const ALERT_WEBHOOK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
struct SchedulerAppConfig {
    database_url: String,
    materializer: MaterializerConfig,
    alerts: AlertConfig,
}

impl SchedulerAppConfig {
    fn load() -> AppResult<Self> {
        Ok(Self {
            database_url: required_env("DATABASE_URL")?,
            materializer: MaterializerConfig::from_env()?,
            alerts: AlertConfig::from_env()?,
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = SchedulerAppConfig::load()?;
    let pool = connect_pool(config.database_url.as_str()).await?;

    let bus = EventBus::new();
    let store = Arc::new(PostgresRunStore::new(pool.clone()));
    let run_store: Arc<dyn WorkflowRunStore> = store.clone();
    let schedule_store: Arc<dyn ScheduleStore> = store;
    let queue: Arc<dyn RunQueue> = Arc::new(PostgresRunQueue::new(pool));

    let mut run_service = WorkflowRunService::new(run_store.clone(), bus.clone());
    if config.alerts.is_enabled() {
        let webhook = Arc::new(HttpAlertWebhook::with_timeout(ALERT_WEBHOOK_TIMEOUT)?);
        run_service = run_service.with_alerter(Arc::new(RunAlerter::new(
            run_store,
            webhook,
            config.alerts.clone(),
        )));
    }

    info!(
        tick_interval_ms = config.materializer.tick_interval.as_millis() as u64,
        batch_size = config.materializer.batch_size,
        max_windows = config.materializer.max_windows,
        alerting_enabled = config.alerts.is_enabled(),
        alert_threshold = config.alerts.threshold,
        alert_window_minutes = config.alerts.window_minutes,
        "capstan-scheduler started"
    );

    let materializer =
        ScheduleMaterializer::new(run_service, schedule_store, queue, config.materializer);
    let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);
    let materializer_task = tokio::spawn(materializer.run(stop_rx));

    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(error = %error, "failed to listen for shutdown signal");
    }

    info!("shutdown signal received; draining materializer");
    let _ = stop_tx.send(true);
    if let Err(error) = materializer_task.await {
        warn!(error = %error, "materializer task join failed");
    }

    bus.shutdown();
    info!("capstan-scheduler stopped");
    Ok(())
}

async fn connect_pool(database_url: &str) -> AppResult<PgPool> {
    PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await
        .map_err(|error| AppError::Internal(format!("failed to connect to database: {error}")))
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

fn required_env(name: &str) -> AppResult<String> {
    env::var(name).map_err(|_| AppError::Validation(format!("{name} is required")))
}
