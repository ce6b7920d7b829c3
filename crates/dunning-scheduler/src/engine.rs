//! Scheduler Engine: fires the reminder batch on a cron tick.
//! Sleeps until the next matching minute; no polling between ticks.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dunning_core::config::SchedulerConfig;
use dunning_core::{DunningError, Result};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::cron::CronSchedule;
use crate::runner::{BatchReport, ReminderRunner};

/// Observable scheduler state, exposed on the status endpoint.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerState {
    pub enabled: bool,
    pub expression: String,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub run_count: u64,
    pub last_report: Option<BatchReport>,
    pub last_error: Option<String>,
}

pub struct SchedulerEngine {
    runner: Arc<ReminderRunner>,
    schedule: CronSchedule,
    state: Mutex<SchedulerState>,
    /// Serializes batches started from the loop and from manual triggers.
    run_lock: Mutex<()>,
}

impl SchedulerEngine {
    pub fn new(runner: Arc<ReminderRunner>, config: &SchedulerConfig) -> Result<Self> {
        let expression = config.expression();
        let schedule = CronSchedule::parse(&expression).map_err(DunningError::Config)?;
        Ok(Self {
            runner,
            schedule,
            state: Mutex::new(SchedulerState {
                enabled: config.enabled,
                expression,
                ..Default::default()
            }),
            run_lock: Mutex::new(()),
        })
    }

    pub fn runner(&self) -> &Arc<ReminderRunner> {
        &self.runner
    }

    pub fn next_run_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.next_after(after)
    }

    pub async fn status(&self) -> SchedulerState {
        self.state.lock().await.clone()
    }

    /// Run one batch as of `now` and record the result.
    pub async fn run_now(&self, now: DateTime<Utc>) -> Result<BatchReport> {
        let _guard = self.run_lock.lock().await;
        let result = self.runner.run_batch(now).await;

        let mut state = self.state.lock().await;
        state.last_run = Some(now);
        state.run_count += 1;
        match &result {
            Ok(report) => {
                state.last_report = Some(report.clone());
                state.last_error = None;
            }
            Err(e) => state.last_error = Some(e.to_string()),
        }
        result
    }

    async fn set_next_run(&self, next: Option<DateTime<Utc>>) {
        self.state.lock().await.next_run = next;
    }
}

/// Scheduler loop. Runs until the task is dropped.
pub async fn spawn_scheduler(engine: Arc<SchedulerEngine>) {
    let expression = engine.status().await.expression;
    tracing::info!("⏰ Reminder scheduler started (cron: {expression}, UTC)");

    loop {
        let now = Utc::now();
        let Some(next) = engine.next_run_after(now) else {
            tracing::error!("❌ Cron expression '{expression}' never fires, scheduler stopped");
            engine.set_next_run(None).await;
            return;
        };
        engine.set_next_run(Some(next)).await;
        tracing::debug!("⏳ Next reminder batch at {next}");

        let wait = (next - now).to_std().unwrap_or_default();
        tokio::time::sleep(wait).await;

        match engine.run_now(Utc::now()).await {
            Ok(report) => tracing::info!(
                "📣 Scheduled batch: {} sent, {} failed of {} scanned",
                report.sent,
                report.failed,
                report.scanned
            ),
            Err(e) => tracing::error!("❌ Scheduled batch failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        OutageStore, ScriptedDispatcher, due_invoice, runner_over, runner_with, seed_client,
        test_store,
    };
    use chrono::TimeZone;

    fn config(cron: Option<&str>) -> SchedulerConfig {
        SchedulerConfig {
            cron: cron.map(str::to_string),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_run_now_updates_state() {
        let store = test_store();
        let client = seed_client(&store, "acme@example.com");
        due_invoice(&store, client.id, "F-1", (2025, 1, 31));
        let dispatcher = Arc::new(ScriptedDispatcher::default());
        let engine =
            SchedulerEngine::new(Arc::new(runner_with(&store, &dispatcher)), &config(None)).unwrap();

        let now = Utc.with_ymd_and_hms(2025, 2, 1, 9, 0, 0).unwrap();
        let report = engine.run_now(now).await.unwrap();
        assert_eq!(report.sent, 1);

        let state = engine.status().await;
        assert_eq!(state.expression, "0 9 * * *");
        assert_eq!(state.run_count, 1);
        assert_eq!(state.last_run, Some(now));
        assert_eq!(state.last_report.map(|r| r.sent), Some(1));
        assert!(state.last_error.is_none());
    }

    #[tokio::test]
    async fn test_store_outage_recorded_as_last_error() {
        let store = test_store();
        let client = seed_client(&store, "acme@example.com");
        due_invoice(&store, client.id, "F-1", (2025, 1, 31));
        let dispatcher = Arc::new(ScriptedDispatcher::default());
        let now = Utc.with_ymd_and_hms(2025, 2, 1, 9, 0, 0).unwrap();

        let good = SchedulerEngine::new(
            Arc::new(runner_with(&store, &dispatcher)),
            &config(None),
        )
        .unwrap();
        good.run_now(now).await.unwrap();

        let outage = Arc::new(OutageStore::new(&store).fail_listing());
        let engine =
            SchedulerEngine::new(Arc::new(runner_over(outage, dispatcher.clone())), &config(None))
                .unwrap();
        let err = engine.run_now(now).await.unwrap_err();
        assert!(matches!(err, DunningError::StoreUnavailable(_)));

        let state = engine.status().await;
        assert_eq!(state.run_count, 1);
        assert_eq!(state.last_run, Some(now));
        assert!(state.last_error.unwrap().contains("database is locked"));
        assert!(state.last_report.is_none());
        assert_eq!(dispatcher.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_next_run_follows_expression() {
        let store = test_store();
        let dispatcher = Arc::new(ScriptedDispatcher::default());
        let engine = SchedulerEngine::new(
            Arc::new(runner_with(&store, &dispatcher)),
            &config(Some("30 6 * * *")),
        )
        .unwrap();
        let after = Utc.with_ymd_and_hms(2025, 2, 1, 9, 0, 0).unwrap();
        assert_eq!(
            engine.next_run_after(after),
            Some(Utc.with_ymd_and_hms(2025, 2, 2, 6, 30, 0).unwrap())
        );
    }

    #[test]
    fn test_bad_cron_is_config_error() {
        let store = test_store();
        let dispatcher = Arc::new(ScriptedDispatcher::default());
        let result = SchedulerEngine::new(
            Arc::new(runner_with(&store, &dispatcher)),
            &config(Some("every day")),
        );
        assert!(matches!(result, Err(DunningError::Config(_))));
    }
}
