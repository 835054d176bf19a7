use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::service::{DueCheck, MonitoringService};
use crate::error::EngineError;

/// Concurrent checks per batch unless configured otherwise
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Result of one pass over the due monitors
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub checked: Vec<Uuid>,
    pub skipped: Vec<Uuid>,
    pub failed: Vec<(Uuid, String)>,
}

impl BatchReport {
    pub fn total(&self) -> usize {
        self.checked.len() + self.skipped.len() + self.failed.len()
    }
}

/// Feeds due monitors into the check pipeline in bounded batches
pub struct DueCheckScheduler {
    service: Arc<MonitoringService>,
    batch_size: usize,
}

impl DueCheckScheduler {
    pub fn new(service: Arc<MonitoringService>, batch_size: usize) -> Self {
        Self { service, batch_size: batch_size.max(1) }
    }

    pub fn service(&self) -> &Arc<MonitoringService> {
        &self.service
    }

    pub async fn list_due_monitors(&self) -> Result<Vec<Uuid>, EngineError> {
        self.list_due_monitors_at(Utc::now()).await
    }

    /// Monitors never checked, or whose interval has elapsed by `now`
    pub async fn list_due_monitors_at(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, EngineError> {
        let monitors = self.service.repository().list_monitors().await?;
        Ok(monitors.into_iter().filter(|m| m.is_due(now)).map(|m| m.id).collect())
    }

    pub async fn check_all_due(&self) -> Result<BatchReport, EngineError> {
        self.check_all_due_at(Utc::now()).await
    }

    /// Check every due monitor, `batch_size` at a time.
    ///
    /// One monitor failing does not stop the rest; only listing the due
    /// monitors can fail the whole pass.
    pub async fn check_all_due_at(&self, now: DateTime<Utc>) -> Result<BatchReport, EngineError> {
        let due = self.list_due_monitors_at(now).await?;
        let mut report = BatchReport::default();

        for batch in due.chunks(self.batch_size) {
            let checks = batch.iter().map(|&id| async move { (id, self.service.check_if_due(id, now).await) });

            for (id, outcome) in join_all(checks).await {
                match outcome {
                    Ok(DueCheck::Checked(_)) => report.checked.push(id),
                    Ok(DueCheck::Skipped(_)) => report.skipped.push(id),
                    Err(e) => {
                        error!(monitor_id = %id, "Check failed: {:#}", e);
                        report.failed.push((id, e.to_string()));
                    }
                }
            }
        }

        if report.total() > 0 {
            info!(
                "Due check pass: {} checked, {} skipped, {} failed",
                report.checked.len(),
                report.skipped.len(),
                report.failed.len()
            );
        }

        Ok(report)
    }

    /// Run a due-check pass on every tick until the task is aborted
    pub fn spawn_periodic(self: Arc<Self>, every: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut timer = interval(every);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                timer.tick().await;

                if let Err(e) = self.check_all_due().await {
                    warn!("Failed to list due monitors: {:#}", e);
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::InMemoryRepository;
    use crate::database::Repository;
    use crate::database::models::Monitor;
    use crate::monitoring::checker::testing::ScriptedProber;
    use crate::monitoring::interval::CheckInterval;
    use crate::monitoring::types::CheckResult;
    use crate::notifications::Notifier;
    use crate::notifications::testing::RecordingTransport;
    use chrono::TimeDelta;

    async fn scheduler_with(monitors: &[Monitor], batch_size: usize) -> (Arc<DueCheckScheduler>, Arc<ScriptedProber>) {
        let repo = Arc::new(InMemoryRepository::new());
        for monitor in monitors {
            repo.save_monitor(monitor).await.unwrap();
        }
        let notifier = Arc::new(Notifier::new(repo.clone(), Arc::new(RecordingTransport::default())));
        let prober = Arc::new(ScriptedProber::always(CheckResult::up(5, 200)));
        let service = Arc::new(MonitoringService::new(repo, prober.clone(), notifier));
        (Arc::new(DueCheckScheduler::new(service, batch_size)), prober)
    }

    fn checked_ago(minutes: i64, now: DateTime<Utc>) -> Monitor {
        let mut monitor = Monitor::new("m", "https://example.com", "u1")
            .with_interval(CheckInterval::parse_cron("*/5 * * * *").unwrap());
        monitor.last_checked = Some(now - TimeDelta::minutes(minutes));
        monitor
    }

    #[tokio::test]
    async fn test_due_filter_follows_interval() {
        let now = Utc::now();
        let recent = checked_ago(4, now);
        let stale = checked_ago(6, now);
        let never = Monitor::new("new", "https://example.com", "u1");

        let (scheduler, _) = scheduler_with(&[recent.clone(), stale.clone(), never.clone()], 10).await;
        let mut due = scheduler.list_due_monitors_at(now).await.unwrap();
        due.sort();

        let mut expected = vec![stale.id, never.id];
        expected.sort();
        assert_eq!(due, expected);
    }

    #[tokio::test]
    async fn test_check_all_due_runs_every_batch() {
        let now = Utc::now();
        let monitors: Vec<Monitor> = (0..25).map(|i| Monitor::new(format!("m{i}"), "https://example.com", "u1")).collect();
        let (scheduler, prober) = scheduler_with(&monitors, 10).await;

        let report = scheduler.check_all_due_at(now).await.unwrap();
        assert_eq!(report.checked.len(), 25);
        assert!(report.failed.is_empty());
        assert_eq!(prober.probe_count(), 25);

        // Everything was just checked, nothing is due any more
        let again = scheduler.check_all_due_at(Utc::now()).await.unwrap();
        assert_eq!(again.total(), 0);
        assert_eq!(prober.probe_count(), 25);
    }

    #[tokio::test]
    async fn test_in_flight_monitor_is_skipped() {
        let now = Utc::now();
        let monitor = Monitor::new("m", "https://example.com", "u1");
        let (scheduler, prober) = scheduler_with(std::slice::from_ref(&monitor), 10).await;

        let _lease = scheduler.service().leases().try_acquire(monitor.id).unwrap();
        let report = scheduler.check_all_due_at(now).await.unwrap();

        assert_eq!(report.skipped, vec![monitor.id]);
        assert_eq!(prober.probe_count(), 0);
    }

    #[tokio::test]
    async fn test_spawn_periodic_checks_on_first_tick() {
        let monitor = Monitor::new("m", "https://example.com", "u1");
        let (scheduler, prober) = scheduler_with(std::slice::from_ref(&monitor), 10).await;

        let handle = scheduler.clone().spawn_periodic(Duration::from_secs(3600));
        let repository = scheduler.service().repository().clone();
        let mut last_checked = None;
        for _ in 0..100 {
            last_checked = repository.get_monitor(monitor.id).await.unwrap().unwrap().last_checked;
            if last_checked.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.abort();

        assert!(last_checked.is_some());
        assert_eq!(prober.probe_count(), 1);
    }
}
