//! Threshold-based aggregate status.
//!
//! A monitor is `down` once its `threshold` most recent checks all failed.
//! Before a full window exists the policy is asymmetric: a never-checked
//! (`unknown`) monitor adopts its first result immediately, while a monitor
//! with a real status only flips to `down` when every available check failed
//! and never flips back to `up` on a partial window.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use super::types::{CheckStatus, MonitorStatus};
use crate::database::Repository;
use crate::database::models::Monitor;
use crate::error::EngineError;

/// Compute the next aggregate status from the newest-first check window
///
/// `recent` may be longer than `threshold`; only the first `threshold`
/// entries are considered.
pub fn next_status(current: MonitorStatus, threshold: u32, recent: &[CheckStatus]) -> MonitorStatus {
    let threshold = threshold.max(1) as usize;
    let window = &recent[..recent.len().min(threshold)];

    let Some(&newest) = window.first() else {
        return current;
    };
    let consecutive_failures = window.iter().take_while(|s| **s == CheckStatus::Down).count();

    if window.len() < threshold {
        if current == MonitorStatus::Unknown {
            return newest.into();
        }
        if consecutive_failures == window.len() {
            return MonitorStatus::Down;
        }
        return current;
    }

    if consecutive_failures >= threshold { MonitorStatus::Down } else { MonitorStatus::Up }
}

/// Status change that needs incident handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    /// `up` or `unknown` became `down`
    WentDown,
    /// `down` became `up`
    CameUp,
}

/// Outcome of re-evaluating one monitor
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Evaluation {
    pub monitor_id: Uuid,
    pub previous: MonitorStatus,
    pub current: MonitorStatus,
    pub changed: bool,
    pub evaluated_at: DateTime<Utc>,
}

impl Evaluation {
    pub fn transition(&self) -> Option<Transition> {
        match (self.previous, self.current) {
            (MonitorStatus::Down, MonitorStatus::Down) => None,
            (_, MonitorStatus::Down) => Some(Transition::WentDown),
            (MonitorStatus::Down, MonitorStatus::Up) => Some(Transition::CameUp),
            _ => None,
        }
    }
}

/// Recomputes a monitor's aggregate status from its stored check history
pub struct StatusEvaluator {
    repository: Arc<dyn Repository>,
}

impl StatusEvaluator {
    pub fn new(repository: Arc<dyn Repository>) -> Self {
        Self { repository }
    }

    /// Evaluate a monitor now
    pub async fn evaluate(&self, monitor_id: Uuid) -> Result<Evaluation, EngineError> {
        let monitor = self
            .repository
            .get_monitor(monitor_id)
            .await?
            .ok_or(EngineError::MonitorNotFound(monitor_id))?;
        self.evaluate_at(&monitor, Utc::now()).await
    }

    /// Evaluate against a freshly loaded monitor row and persist the result
    pub async fn evaluate_at(
        &self,
        monitor: &Monitor,
        now: DateTime<Utc>,
    ) -> Result<Evaluation, EngineError> {
        let evaluation = self.assess(monitor, now).await?;
        self.commit(monitor, &evaluation).await?;
        Ok(evaluation)
    }

    /// Compute the next status from the stored check window without writing
    /// anything
    pub async fn assess(&self, monitor: &Monitor, now: DateTime<Utc>) -> Result<Evaluation, EngineError> {
        let threshold = monitor.threshold.max(1);
        let recent: Vec<CheckStatus> = self
            .repository
            .list_recent_checks(monitor.id, threshold as usize)
            .await?
            .into_iter()
            .map(|check| check.status)
            .collect();

        let previous = monitor.status;
        let current = next_status(previous, threshold, &recent);

        Ok(Evaluation { monitor_id: monitor.id, previous, current, changed: current != previous, evaluated_at: now })
    }

    /// Always touches `last_checked`; writes `status` only when it changed.
    pub async fn commit(&self, monitor: &Monitor, evaluation: &Evaluation) -> Result<(), EngineError> {
        self.repository
            .apply_evaluation(
                evaluation.monitor_id,
                evaluation.evaluated_at,
                evaluation.changed.then_some(evaluation.current),
            )
            .await?;

        if evaluation.changed {
            info!(
                monitor_id = %evaluation.monitor_id,
                "Monitor {} changed status: {} -> {}",
                monitor.name,
                evaluation.previous,
                evaluation.current
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::InMemoryRepository;
    use crate::database::models::CheckRecord;
    use CheckStatus::{Down, Up};

    #[test]
    fn test_full_window_all_down_flips_down() {
        assert_eq!(next_status(MonitorStatus::Up, 3, &[Down, Down, Down]), MonitorStatus::Down);
    }

    #[test]
    fn test_full_window_with_recent_success_is_up() {
        assert_eq!(next_status(MonitorStatus::Down, 3, &[Up, Down, Down]), MonitorStatus::Up);
        // An older success still breaks the run.
        assert_eq!(next_status(MonitorStatus::Up, 3, &[Down, Down, Up]), MonitorStatus::Up);
    }

    #[test]
    fn test_partial_window_all_down_flips_down() {
        assert_eq!(next_status(MonitorStatus::Up, 3, &[Down, Down]), MonitorStatus::Down);
    }

    #[test]
    fn test_partial_window_mixed_keeps_status() {
        assert_eq!(next_status(MonitorStatus::Up, 3, &[Down, Up]), MonitorStatus::Up);
        // A partial window never brings a monitor back up.
        assert_eq!(next_status(MonitorStatus::Down, 3, &[Up, Down]), MonitorStatus::Down);
        assert_eq!(next_status(MonitorStatus::Down, 3, &[Up]), MonitorStatus::Down);
    }

    #[test]
    fn test_unknown_adopts_first_result() {
        assert_eq!(next_status(MonitorStatus::Unknown, 3, &[Down]), MonitorStatus::Down);
        assert_eq!(next_status(MonitorStatus::Unknown, 3, &[Up]), MonitorStatus::Up);
        assert_eq!(next_status(MonitorStatus::Unknown, 10, &[Up, Down]), MonitorStatus::Up);
    }

    #[test]
    fn test_empty_history_keeps_status() {
        assert_eq!(next_status(MonitorStatus::Unknown, 3, &[]), MonitorStatus::Unknown);
        assert_eq!(next_status(MonitorStatus::Down, 3, &[]), MonitorStatus::Down);
    }

    #[test]
    fn test_longer_history_is_cut_to_threshold() {
        assert_eq!(next_status(MonitorStatus::Up, 2, &[Down, Down, Up]), MonitorStatus::Down);
    }

    #[test]
    fn test_threshold_one() {
        assert_eq!(next_status(MonitorStatus::Up, 1, &[Down]), MonitorStatus::Down);
        assert_eq!(next_status(MonitorStatus::Down, 1, &[Up]), MonitorStatus::Up);
        // Zero is treated as one.
        assert_eq!(next_status(MonitorStatus::Down, 0, &[Up]), MonitorStatus::Up);
    }

    #[test]
    fn test_transitions() {
        let eval = |previous, current| Evaluation {
            monitor_id: Uuid::nil(),
            previous,
            current,
            changed: previous != current,
            evaluated_at: Utc::now(),
        };
        assert_eq!(eval(MonitorStatus::Up, MonitorStatus::Down).transition(), Some(Transition::WentDown));
        assert_eq!(eval(MonitorStatus::Unknown, MonitorStatus::Down).transition(), Some(Transition::WentDown));
        assert_eq!(eval(MonitorStatus::Down, MonitorStatus::Up).transition(), Some(Transition::CameUp));
        assert_eq!(eval(MonitorStatus::Unknown, MonitorStatus::Up).transition(), None);
        assert_eq!(eval(MonitorStatus::Down, MonitorStatus::Down).transition(), None);
        assert_eq!(eval(MonitorStatus::Up, MonitorStatus::Up).transition(), None);
    }

    async fn seeded(status: MonitorStatus, history_oldest_first: &[CheckStatus]) -> (Arc<InMemoryRepository>, Monitor) {
        let repo = Arc::new(InMemoryRepository::new());
        let mut monitor = Monitor::new("api", "https://example.com", "u1").with_threshold(3);
        monitor.status = status;
        repo.save_monitor(&monitor).await.unwrap();
        let start = Utc::now() - chrono::TimeDelta::minutes(30);
        for (i, status) in history_oldest_first.iter().enumerate() {
            let record = CheckRecord {
                id: None,
                monitor_id: monitor.id,
                status: *status,
                response_time_ms: Some(10),
                status_code: None,
                error: None,
                checked_at: start + chrono::TimeDelta::minutes(i as i64),
            };
            repo.insert_check(&record).await.unwrap();
        }
        (repo, monitor)
    }

    #[tokio::test]
    async fn test_evaluate_persists_change_and_touches_last_checked() {
        let (repo, monitor) = seeded(MonitorStatus::Up, &[Down, Down, Down]).await;
        let evaluator = StatusEvaluator::new(repo.clone());

        let evaluation = evaluator.evaluate(monitor.id).await.unwrap();
        assert!(evaluation.changed);
        assert_eq!(evaluation.current, MonitorStatus::Down);

        let stored = repo.get_monitor(monitor.id).await.unwrap().unwrap();
        assert_eq!(stored.status, MonitorStatus::Down);
        assert_eq!(stored.last_checked, Some(evaluation.evaluated_at));
    }

    #[tokio::test]
    async fn test_unchanged_evaluation_still_touches_last_checked() {
        let (repo, monitor) = seeded(MonitorStatus::Up, &[Down, Up]).await;
        let evaluator = StatusEvaluator::new(repo.clone());

        let first = evaluator.evaluate(monitor.id).await.unwrap();
        let second = evaluator.evaluate(monitor.id).await.unwrap();
        assert!(!first.changed && !second.changed);

        let stored = repo.get_monitor(monitor.id).await.unwrap().unwrap();
        assert_eq!(stored.status, MonitorStatus::Up);
        assert!(stored.last_checked >= Some(first.evaluated_at));
    }

    #[tokio::test]
    async fn test_evaluate_missing_monitor() {
        let evaluator = StatusEvaluator::new(Arc::new(InMemoryRepository::new()));
        let id = Uuid::new_v4();
        assert!(matches!(evaluator.evaluate(id).await, Err(EngineError::MonitorNotFound(missing)) if missing == id));
    }
}
