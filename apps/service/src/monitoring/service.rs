//! The check pipeline: probe, record, evaluate, react.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{Instrument, debug, info_span};
use uuid::Uuid;

use super::checker::Prober;
use super::evaluator::{Evaluation, StatusEvaluator};
use super::lease::{MonitorLease, MonitorLeases};
use super::types::CheckResult;
use crate::database::Repository;
use crate::database::models::{CheckRecord, Monitor};
use crate::error::EngineError;
use crate::incidents::{IncidentCoordinator, IncidentReport};
use crate::notifications::{Notifier, NotifyError};
use crate::validation;

pub const DEFAULT_HISTORY_LIMIT: usize = 50;
pub const MAX_HISTORY_LIMIT: usize = 100;

/// Everything one pass of the pipeline produced
#[derive(Debug, Clone, Serialize)]
pub struct CheckOutcome {
    pub monitor_id: Uuid,
    pub result: CheckResult,
    pub evaluation: Evaluation,
    /// Present only when the status transitioned
    pub incidents: Option<IncidentReport>,
}

/// Why a due check did not run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Another check for the monitor holds its lease
    InFlight,
    /// Checked since it was listed as due
    NotDue,
    /// Deleted since it was listed as due
    Gone,
}

#[derive(Debug, Clone)]
pub enum DueCheck {
    Checked(CheckOutcome),
    Skipped(SkipReason),
}

pub struct MonitoringService {
    repository: Arc<dyn Repository>,
    prober: Arc<dyn Prober>,
    notifier: Arc<Notifier>,
    evaluator: StatusEvaluator,
    incidents: IncidentCoordinator,
    leases: MonitorLeases,
}

impl MonitoringService {
    pub fn new(repository: Arc<dyn Repository>, prober: Arc<dyn Prober>, notifier: Arc<Notifier>) -> Self {
        Self {
            evaluator: StatusEvaluator::new(repository.clone()),
            incidents: IncidentCoordinator::new(repository.clone(), notifier.clone()),
            leases: MonitorLeases::new(),
            repository,
            prober,
            notifier,
        }
    }

    pub fn repository(&self) -> &Arc<dyn Repository> {
        &self.repository
    }

    pub fn incidents(&self) -> &IncidentCoordinator {
        &self.incidents
    }

    pub fn notifier(&self) -> &Arc<Notifier> {
        &self.notifier
    }

    pub fn leases(&self) -> &MonitorLeases {
        &self.leases
    }

    /// Check a monitor now, waiting for any in-flight check of it to finish
    pub async fn check_monitor(&self, monitor_id: Uuid) -> Result<CheckOutcome, EngineError> {
        let lease = self.leases.acquire(monitor_id).await;
        let monitor = self
            .repository
            .get_monitor(monitor_id)
            .await?
            .ok_or(EngineError::MonitorNotFound(monitor_id))?;
        self.run(&lease, monitor).await
    }

    /// Check a monitor listed as due, unless it no longer needs it
    pub async fn check_if_due(&self, monitor_id: Uuid, now: DateTime<Utc>) -> Result<DueCheck, EngineError> {
        let Some(lease) = self.leases.try_acquire(monitor_id) else {
            debug!(monitor_id = %monitor_id, "Check already in flight, skipping");
            return Ok(DueCheck::Skipped(SkipReason::InFlight));
        };

        let Some(monitor) = self.repository.get_monitor(monitor_id).await? else {
            return Ok(DueCheck::Skipped(SkipReason::Gone));
        };
        if !monitor.is_due(now) {
            debug!(monitor_id = %monitor_id, "Monitor {} was checked meanwhile, skipping", monitor.name);
            return Ok(DueCheck::Skipped(SkipReason::NotDue));
        }

        self.run(&lease, monitor).await.map(DueCheck::Checked)
    }

    async fn run(&self, lease: &MonitorLease, monitor: Monitor) -> Result<CheckOutcome, EngineError> {
        let span = info_span!("check", monitor_id = %lease.monitor_id());
        async move {
            let result = self.prober.probe(&monitor.url).await;
            debug!("Probe of {} returned {}", monitor.url, result.status);

            let record = CheckRecord::from_result(monitor.id, &result, Utc::now());
            self.repository.insert_check(&record).await?;

            // The status is committed only after the incident step succeeded, so
            // a failed reaction is retried as the same transition next time.
            let evaluation = self.evaluator.assess(&monitor, Utc::now()).await?;
            let incidents = self.incidents.react(&monitor, &evaluation).await?;
            self.evaluator.commit(&monitor, &evaluation).await?;

            Ok(CheckOutcome { monitor_id: monitor.id, result, evaluation, incidents })
        }
        .instrument(span)
        .await
    }

    /// Most recent checks of a monitor, newest first
    ///
    /// `limit` defaults to 50 and is capped at 100.
    pub async fn check_history(
        &self,
        monitor_id: Uuid,
        limit: Option<usize>,
    ) -> Result<Vec<CheckRecord>, EngineError> {
        self.repository
            .get_monitor(monitor_id)
            .await?
            .ok_or(EngineError::MonitorNotFound(monitor_id))?;

        let limit = limit.unwrap_or(DEFAULT_HISTORY_LIMIT).clamp(1, MAX_HISTORY_LIMIT);
        Ok(self.repository.list_recent_checks(monitor_id, limit).await?)
    }

    /// Validate and store a monitor
    pub async fn register_monitor(&self, monitor: &Monitor) -> Result<(), EngineError> {
        validation::validate_monitor(monitor)?;
        self.repository.save_monitor(monitor).await?;
        Ok(())
    }

    pub async fn send_test_notification(&self, user_id: &str, message: Option<&str>) -> Result<(), NotifyError> {
        self.notifier.send_test(user_id, message).await
    }
}
