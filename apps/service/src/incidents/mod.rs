//! Incident lifecycle driven by monitor status transitions.
//!
//! A monitor going down opens one `investigating` incident on every status
//! page that shows it; coming back up resolves all of its open incidents,
//! whatever page they live on. Manual incidents go through the same store
//! and notify the status page owner.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::database::Repository;
use crate::database::models::{Incident, Monitor};
use crate::error::EngineError;
use crate::monitoring::evaluator::{Evaluation, Transition};
use crate::notifications::{NotificationRule, Notifier, messages};

/// What one transition did to the incident store
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IncidentReport {
    /// Incidents opened by this transition
    pub created: Vec<Uuid>,
    /// Status pages that already had an open incident for the monitor
    pub skipped: Vec<Uuid>,
    /// Status pages whose incident could not be stored, with the cause
    pub failed: Vec<(Uuid, String)>,
    /// Incidents closed by this transition
    pub resolved: usize,
}

impl IncidentReport {
    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }
}

/// Error for an incident insert the store ignored. Only the one-open-incident
/// guard for a monitor can do that; anything else is a storage fault.
fn rejected_insert(incident: &Incident) -> EngineError {
    match incident.monitor_id {
        Some(monitor_id) => EngineError::IncidentAlreadyOpen { monitor_id, status_page_id: incident.status_page_id },
        None => EngineError::Storage(anyhow::anyhow!("incident {} was not stored", incident.id)),
    }
}

pub fn incident_title(monitor: &Monitor) -> String {
    format!("{} is down", monitor.name)
}

pub fn incident_description(monitor: &Monitor) -> String {
    format!("The monitor for {} is currently down.", monitor.url)
}

pub struct IncidentCoordinator {
    repository: Arc<dyn Repository>,
    notifier: Arc<Notifier>,
}

impl IncidentCoordinator {
    pub fn new(repository: Arc<dyn Repository>, notifier: Arc<Notifier>) -> Self {
        Self { repository, notifier }
    }

    /// React to an evaluation; `None` when the status did not transition
    pub async fn react(
        &self,
        monitor: &Monitor,
        evaluation: &Evaluation,
    ) -> Result<Option<IncidentReport>, EngineError> {
        if !evaluation.changed {
            return Ok(None);
        }

        let report = match evaluation.transition() {
            Some(Transition::WentDown) => self.on_monitor_down(monitor, evaluation.evaluated_at).await?,
            Some(Transition::CameUp) => self.on_monitor_up(monitor, evaluation.evaluated_at).await?,
            None => return Ok(None),
        };
        Ok(Some(report))
    }

    /// Open an incident on every status page showing the monitor.
    ///
    /// A page that fails does not stop the others; its error lands in the
    /// report. The owner is notified once per transition even when no
    /// incident was created.
    pub async fn on_monitor_down(
        &self,
        monitor: &Monitor,
        now: DateTime<Utc>,
    ) -> Result<IncidentReport, EngineError> {
        let pages = self.repository.status_pages_for_monitor(monitor.id).await?;
        let mut report = IncidentReport::default();

        for page in pages {
            match self.open_for_page(monitor, page.id, now).await {
                Ok(Some(incident_id)) => {
                    info!(monitor_id = %monitor.id, "Opened incident {} on status page {}", incident_id, page.slug);
                    report.created.push(incident_id);
                }
                Ok(None) => {
                    warn!(
                        monitor_id = %monitor.id,
                        "Status page {} already has an open incident for {}, skipping",
                        page.slug,
                        monitor.name
                    );
                    report.skipped.push(page.id);
                }
                Err(e) => {
                    error!(monitor_id = %monitor.id, "Failed to open incident on status page {}: {:#}", page.slug, e);
                    report.failed.push((page.id, format!("{e:#}")));
                }
            }
        }

        self.notifier
            .notify(&monitor.user_id, NotificationRule::MonitorDown, || {
                messages::monitor_down(&monitor.name, &monitor.url)
            })
            .await;

        Ok(report)
    }

    /// Lookup first, then rely on the store's own guard for the race the
    /// lookup cannot see.
    async fn open_for_page(
        &self,
        monitor: &Monitor,
        status_page_id: Uuid,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Option<Uuid>> {
        if self.repository.find_open_incident(monitor.id, status_page_id).await?.is_some() {
            return Ok(None);
        }

        let incident = Incident::investigating(
            incident_title(monitor),
            Some(incident_description(monitor)),
            status_page_id,
            Some(monitor.id),
            now,
        );
        let inserted = self.repository.create_incident(&incident).await?;
        Ok(inserted.then_some(incident.id))
    }

    /// Resolve every open incident of the monitor across all status pages
    pub async fn on_monitor_up(
        &self,
        monitor: &Monitor,
        now: DateTime<Utc>,
    ) -> Result<IncidentReport, EngineError> {
        let resolved = self.repository.resolve_incidents_for_monitor(monitor.id, now).await?;
        if resolved > 0 {
            info!(monitor_id = %monitor.id, "Resolved {} incident(s) for {}", resolved, monitor.name);
        }

        self.notifier
            .notify(&monitor.user_id, NotificationRule::MonitorUp, || {
                messages::monitor_up(&monitor.name, &monitor.url)
            })
            .await;

        Ok(IncidentReport { resolved, ..IncidentReport::default() })
    }

    /// Open an incident by hand on a status page
    pub async fn open_incident(
        &self,
        status_page_id: Uuid,
        title: &str,
        description: Option<String>,
        monitor_id: Option<Uuid>,
    ) -> Result<Incident, EngineError> {
        let page = self
            .repository
            .get_status_page(status_page_id)
            .await?
            .ok_or(EngineError::StatusPageNotFound(status_page_id))?;

        if let Some(monitor_id) = monitor_id {
            self.repository
                .get_monitor(monitor_id)
                .await?
                .ok_or(EngineError::MonitorNotFound(monitor_id))?;
        }

        let incident =
            Incident::investigating(title, description, status_page_id, monitor_id, Utc::now());
        if !self.repository.create_incident(&incident).await? {
            return Err(rejected_insert(&incident));
        }
        info!("Opened incident {} on status page {}", incident.id, page.slug);

        self.notifier
            .notify(&page.user_id, NotificationRule::IncidentCreated, || {
                messages::incident_created(&incident.title)
            })
            .await;

        Ok(incident)
    }

    /// Resolve one incident; already-resolved incidents are returned as is
    pub async fn resolve_incident(&self, incident_id: Uuid) -> Result<Incident, EngineError> {
        let incident = self
            .repository
            .get_incident(incident_id)
            .await?
            .ok_or(EngineError::IncidentNotFound(incident_id))?;

        if !incident.is_open() {
            return Ok(incident);
        }

        if !self.repository.resolve_incident(incident_id, Utc::now()).await? {
            // Resolved concurrently by someone else
            return self.fetch(incident_id).await;
        }
        let resolved = self.fetch(incident_id).await?;
        info!("Resolved incident {}", resolved.id);

        if let Some(page) = self.repository.get_status_page(resolved.status_page_id).await? {
            self.notifier
                .notify(&page.user_id, NotificationRule::IncidentResolved, || {
                    messages::incident_resolved(&resolved.title)
                })
                .await;
        }

        Ok(resolved)
    }

    async fn fetch(&self, incident_id: Uuid) -> Result<Incident, EngineError> {
        self.repository
            .get_incident(incident_id)
            .await?
            .ok_or(EngineError::IncidentNotFound(incident_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::InMemoryRepository;
    use crate::database::models::{IncidentStatus, StatusPage};
    use crate::monitoring::types::MonitorStatus;
    use crate::notifications::testing::{RecordingTransport, enabled_settings};

    struct Fixture {
        repo: Arc<InMemoryRepository>,
        transport: Arc<RecordingTransport>,
        coordinator: IncidentCoordinator,
        monitor: Monitor,
        pages: Vec<StatusPage>,
    }

    async fn fixture(page_count: usize) -> Fixture {
        let repo = Arc::new(InMemoryRepository::new());
        let transport = Arc::new(RecordingTransport::default());
        let notifier = Arc::new(Notifier::new(repo.clone(), transport.clone()));
        repo.save_notification_settings(&enabled_settings("owner")).await.unwrap();

        let monitor = Monitor::new("API", "https://api.example.com", "owner");
        repo.save_monitor(&monitor).await.unwrap();

        let mut pages = Vec::new();
        for i in 0..page_count {
            let page = StatusPage::new(format!("Page {i}"), "owner");
            repo.save_status_page(&page).await.unwrap();
            repo.attach_monitor(page.id, monitor.id).await.unwrap();
            pages.push(page);
        }

        let coordinator = IncidentCoordinator::new(repo.clone(), notifier);
        Fixture { repo, transport, coordinator, monitor, pages }
    }

    fn evaluation(monitor: &Monitor, previous: MonitorStatus, current: MonitorStatus) -> Evaluation {
        Evaluation {
            monitor_id: monitor.id,
            previous,
            current,
            changed: previous != current,
            evaluated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_down_transition_opens_one_incident_per_page() {
        let f = fixture(2).await;
        let report = f
            .coordinator
            .react(&f.monitor, &evaluation(&f.monitor, MonitorStatus::Up, MonitorStatus::Down))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(report.created.len(), 2);
        let incidents = f.repo.incidents().await;
        assert_eq!(incidents.len(), 2);
        for incident in &incidents {
            assert_eq!(incident.title, "API is down");
            assert_eq!(incident.description.as_deref(), Some("The monitor for https://api.example.com is currently down."));
            assert_eq!(incident.status, IncidentStatus::Investigating);
            assert_eq!(incident.monitor_id, Some(f.monitor.id));
        }

        assert_eq!(
            f.transport.texts().await,
            vec![":rotating_light: API is DOWN\nURL: https://api.example.com".to_string()]
        );
    }

    #[tokio::test]
    async fn test_repeated_down_transition_is_idempotent() {
        let f = fixture(1).await;
        let eval = evaluation(&f.monitor, MonitorStatus::Up, MonitorStatus::Down);

        f.coordinator.react(&f.monitor, &eval).await.unwrap();
        let second = f.coordinator.react(&f.monitor, &eval).await.unwrap().unwrap();

        assert!(second.created.is_empty());
        assert_eq!(second.skipped, vec![f.pages[0].id]);
        assert_eq!(f.repo.list_open_incidents().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_fan_out_continues_past_failing_page() {
        let f = fixture(3).await;
        f.repo.fail_incident_creation_for(f.pages[1].id).await;

        let report = f
            .coordinator
            .on_monitor_down(&f.monitor, Utc::now())
            .await
            .unwrap();

        assert_eq!(report.created.len(), 2);
        assert!(report.has_failures());
        assert_eq!(report.failed[0].0, f.pages[1].id);
        assert!(report.failed[0].1.contains("injected failure"));
        assert_eq!(f.transport.texts().await.len(), 1);
    }

    #[tokio::test]
    async fn test_up_transition_resolves_across_pages() {
        let f = fixture(2).await;
        f.coordinator.on_monitor_down(&f.monitor, Utc::now()).await.unwrap();

        let report = f
            .coordinator
            .react(&f.monitor, &evaluation(&f.monitor, MonitorStatus::Down, MonitorStatus::Up))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(report.resolved, 2);
        assert!(f.repo.list_open_incidents().await.unwrap().is_empty());
        assert!(f.repo.incidents().await.iter().all(|i| i.resolved_at.is_some()));
        assert_eq!(
            f.transport.texts().await.last().map(String::as_str),
            Some(":white_check_mark: API is back UP\nURL: https://api.example.com")
        );
    }

    #[tokio::test]
    async fn test_resolved_incident_is_not_reopened() {
        let f = fixture(1).await;
        f.coordinator.on_monitor_down(&f.monitor, Utc::now()).await.unwrap();
        f.coordinator.on_monitor_up(&f.monitor, Utc::now()).await.unwrap();
        f.coordinator.on_monitor_down(&f.monitor, Utc::now()).await.unwrap();

        let incidents = f.repo.incidents().await;
        assert_eq!(incidents.len(), 2);
        assert_eq!(incidents[0].status, IncidentStatus::Resolved);
        assert_eq!(incidents[1].status, IncidentStatus::Investigating);
    }

    #[tokio::test]
    async fn test_unchanged_evaluation_does_nothing() {
        let f = fixture(1).await;
        let eval = evaluation(&f.monitor, MonitorStatus::Down, MonitorStatus::Down);
        assert!(f.coordinator.react(&f.monitor, &eval).await.unwrap().is_none());

        let eval = evaluation(&f.monitor, MonitorStatus::Unknown, MonitorStatus::Up);
        assert!(f.coordinator.react(&f.monitor, &eval).await.unwrap().is_none());

        assert!(f.repo.incidents().await.is_empty());
        assert!(f.transport.texts().await.is_empty());
    }

    #[tokio::test]
    async fn test_manual_incident_lifecycle() {
        let f = fixture(1).await;
        let page = f.pages[0].id;

        let incident = f
            .coordinator
            .open_incident(page, "Database maintenance", None, None)
            .await
            .unwrap();
        assert!(incident.is_open());

        let resolved = f.coordinator.resolve_incident(incident.id).await.unwrap();
        assert_eq!(resolved.status, IncidentStatus::Resolved);
        assert!(resolved.resolved_at.is_some());

        // Second resolve is a silent no-op
        f.coordinator.resolve_incident(incident.id).await.unwrap();

        assert_eq!(
            f.transport.texts().await,
            vec![
                ":memo: Incident created: Database maintenance".to_string(),
                ":white_check_mark: Incident resolved: Database maintenance".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_manual_incident_errors() {
        let f = fixture(1).await;
        let missing = Uuid::new_v4();

        assert!(matches!(
            f.coordinator.open_incident(missing, "x", None, None).await,
            Err(EngineError::StatusPageNotFound(id)) if id == missing
        ));
        assert!(matches!(
            f.coordinator.open_incident(f.pages[0].id, "x", None, Some(missing)).await,
            Err(EngineError::MonitorNotFound(id)) if id == missing
        ));
        assert!(matches!(
            f.coordinator.resolve_incident(missing).await,
            Err(EngineError::IncidentNotFound(_))
        ));

        f.coordinator
            .open_incident(f.pages[0].id, "first", None, Some(f.monitor.id))
            .await
            .unwrap();
        assert!(matches!(
            f.coordinator.open_incident(f.pages[0].id, "second", None, Some(f.monitor.id)).await,
            Err(EngineError::IncidentAlreadyOpen { .. })
        ));
    }

    #[test]
    fn test_ignored_insert_without_monitor_is_a_storage_error() {
        let page = Uuid::new_v4();
        let monitor = Uuid::new_v4();

        let linked = Incident::investigating("x", None, page, Some(monitor), Utc::now());
        assert!(matches!(
            rejected_insert(&linked),
            EngineError::IncidentAlreadyOpen { monitor_id, status_page_id }
                if monitor_id == monitor && status_page_id == page
        ));

        let manual = Incident::investigating("x", None, page, None, Utc::now());
        assert!(matches!(rejected_insert(&manual), EngineError::Storage(_)));
    }
}
