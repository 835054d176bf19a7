use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::models::{CheckRecord, Incident, IncidentStatus, Monitor, NotificationSettings, StatusPage};
use super::repository::Repository;
use crate::monitoring::types::MonitorStatus;

#[derive(Default)]
struct State {
    monitors: HashMap<Uuid, Monitor>,
    /// Insertion order doubles as the check sequence
    checks: Vec<CheckRecord>,
    status_pages: HashMap<Uuid, StatusPage>,
    /// (status page, monitor) pairs in attachment order
    page_monitors: Vec<(Uuid, Uuid)>,
    incidents: Vec<Incident>,
    settings: HashMap<String, NotificationSettings>,
    #[cfg(test)]
    failing_pages: std::collections::HashSet<Uuid>,
}

impl State {
    #[cfg(test)]
    fn injected_failure(&self, status_page_id: Uuid) -> Result<()> {
        if self.failing_pages.contains(&status_page_id) {
            anyhow::bail!("injected failure for status page {status_page_id}");
        }
        Ok(())
    }

    #[cfg(not(test))]
    fn injected_failure(&self, _status_page_id: Uuid) -> Result<()> {
        Ok(())
    }
}

/// Non-durable [`Repository`] with the same semantics as the LibSQL backend
#[derive(Default)]
pub struct InMemoryRepository {
    state: RwLock<State>,
    /// Remaining forced failures per operation name
    #[cfg(test)]
    failing_calls: std::sync::Mutex<HashMap<&'static str, usize>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every incident insert for a status page fail
    #[cfg(test)]
    pub(crate) async fn fail_incident_creation_for(&self, status_page_id: Uuid) {
        self.state.write().await.failing_pages.insert(status_page_id);
    }

    /// Make the next `times` calls of a repository operation fail
    #[cfg(test)]
    pub(crate) fn fail_next(&self, operation: &'static str, times: usize) {
        self.failing_calls.lock().unwrap().insert(operation, times);
    }

    #[cfg(test)]
    fn injected_call_failure(&self, operation: &'static str) -> Result<()> {
        let mut calls = self.failing_calls.lock().unwrap();
        match calls.get_mut(operation) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                anyhow::bail!("injected failure in {operation}")
            }
            _ => Ok(()),
        }
    }

    #[cfg(not(test))]
    fn injected_call_failure(&self, _operation: &'static str) -> Result<()> {
        Ok(())
    }

    /// Every incident ever stored, in creation order
    pub async fn incidents(&self) -> Vec<Incident> {
        self.state.read().await.incidents.clone()
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn get_monitor(&self, id: Uuid) -> Result<Option<Monitor>> {
        Ok(self.state.read().await.monitors.get(&id).cloned())
    }

    async fn list_monitors(&self) -> Result<Vec<Monitor>> {
        let state = self.state.read().await;
        let mut monitors: Vec<Monitor> = state.monitors.values().cloned().collect();
        monitors.sort_by_key(|m| (m.created_at, m.id));
        Ok(monitors)
    }

    async fn save_monitor(&self, monitor: &Monitor) -> Result<()> {
        let mut state = self.state.write().await;
        match state.monitors.get_mut(&monitor.id) {
            Some(existing) => {
                existing.name = monitor.name.clone();
                existing.url = monitor.url.clone();
                existing.threshold = monitor.threshold;
                existing.interval = monitor.interval;
                existing.updated_at = monitor.updated_at;
            }
            None => {
                state.monitors.insert(monitor.id, monitor.clone());
            }
        }
        Ok(())
    }

    async fn insert_check(&self, check: &CheckRecord) -> Result<i64> {
        self.injected_call_failure("insert_check")?;
        let mut state = self.state.write().await;
        if !state.monitors.contains_key(&check.monitor_id) {
            anyhow::bail!("cannot record check: monitor {} does not exist", check.monitor_id);
        }
        let id = state.checks.len() as i64 + 1;
        let mut check = check.clone();
        check.id = Some(id);
        state.checks.push(check);
        Ok(id)
    }

    async fn list_recent_checks(&self, monitor_id: Uuid, limit: usize) -> Result<Vec<CheckRecord>> {
        let state = self.state.read().await;
        let mut checks: Vec<CheckRecord> =
            state.checks.iter().filter(|c| c.monitor_id == monitor_id).cloned().collect();
        checks.sort_by(|a, b| b.checked_at.cmp(&a.checked_at).then(b.id.cmp(&a.id)));
        checks.truncate(limit);
        Ok(checks)
    }

    async fn apply_evaluation(
        &self,
        monitor_id: Uuid,
        checked_at: DateTime<Utc>,
        status: Option<MonitorStatus>,
    ) -> Result<()> {
        self.injected_call_failure("apply_evaluation")?;
        let mut state = self.state.write().await;
        if let Some(monitor) = state.monitors.get_mut(&monitor_id) {
            monitor.last_checked = Some(monitor.last_checked.map_or(checked_at, |prev| prev.max(checked_at)));
            if let Some(status) = status {
                monitor.status = status;
            }
        }
        Ok(())
    }

    async fn save_status_page(&self, page: &StatusPage) -> Result<()> {
        let mut state = self.state.write().await;
        if state.status_pages.values().any(|p| p.slug == page.slug && p.id != page.id) {
            anyhow::bail!("status page slug '{}' already exists", page.slug);
        }
        state.status_pages.insert(page.id, page.clone());
        Ok(())
    }

    async fn get_status_page(&self, id: Uuid) -> Result<Option<StatusPage>> {
        Ok(self.state.read().await.status_pages.get(&id).cloned())
    }

    async fn attach_monitor(&self, status_page_id: Uuid, monitor_id: Uuid) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.status_pages.contains_key(&status_page_id) {
            anyhow::bail!("status page {status_page_id} does not exist");
        }
        if !state.monitors.contains_key(&monitor_id) {
            anyhow::bail!("monitor {monitor_id} does not exist");
        }
        if !state.page_monitors.contains(&(status_page_id, monitor_id)) {
            state.page_monitors.push((status_page_id, monitor_id));
        }
        Ok(())
    }

    async fn status_pages_for_monitor(&self, monitor_id: Uuid) -> Result<Vec<StatusPage>> {
        self.injected_call_failure("status_pages_for_monitor")?;
        let state = self.state.read().await;
        Ok(state
            .page_monitors
            .iter()
            .filter(|(_, m)| *m == monitor_id)
            .filter_map(|(page, _)| state.status_pages.get(page).cloned())
            .collect())
    }

    async fn find_open_incident(
        &self,
        monitor_id: Uuid,
        status_page_id: Uuid,
    ) -> Result<Option<Incident>> {
        let state = self.state.read().await;
        Ok(state
            .incidents
            .iter()
            .find(|i| {
                i.monitor_id == Some(monitor_id) && i.status_page_id == status_page_id && i.is_open()
            })
            .cloned())
    }

    async fn create_incident(&self, incident: &Incident) -> Result<bool> {
        let mut state = self.state.write().await;
        state.injected_failure(incident.status_page_id)?;
        if let Some(monitor_id) = incident.monitor_id {
            let duplicate = state.incidents.iter().any(|i| {
                i.monitor_id == Some(monitor_id)
                    && i.status_page_id == incident.status_page_id
                    && i.is_open()
            });
            if incident.is_open() && duplicate {
                return Ok(false);
            }
        }
        state.incidents.push(incident.clone());
        Ok(true)
    }

    async fn get_incident(&self, id: Uuid) -> Result<Option<Incident>> {
        Ok(self.state.read().await.incidents.iter().find(|i| i.id == id).cloned())
    }

    async fn resolve_incident(&self, id: Uuid, resolved_at: DateTime<Utc>) -> Result<bool> {
        let mut state = self.state.write().await;
        match state.incidents.iter_mut().find(|i| i.id == id && i.is_open()) {
            Some(incident) => {
                incident.status = IncidentStatus::Resolved;
                incident.resolved_at = Some(resolved_at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn resolve_incidents_for_monitor(
        &self,
        monitor_id: Uuid,
        resolved_at: DateTime<Utc>,
    ) -> Result<usize> {
        self.injected_call_failure("resolve_incidents_for_monitor")?;
        let mut state = self.state.write().await;
        let mut resolved = 0;
        for incident in state.incidents.iter_mut() {
            if incident.monitor_id == Some(monitor_id) && incident.is_open() {
                incident.status = IncidentStatus::Resolved;
                incident.resolved_at = Some(resolved_at);
                resolved += 1;
            }
        }
        Ok(resolved)
    }

    async fn list_open_incidents(&self) -> Result<Vec<Incident>> {
        let state = self.state.read().await;
        Ok(state.incidents.iter().filter(|i| i.is_open()).cloned().collect())
    }

    async fn notification_settings(&self, user_id: &str) -> Result<Option<NotificationSettings>> {
        Ok(self.state.read().await.settings.get(user_id).cloned())
    }

    async fn save_notification_settings(&self, settings: &NotificationSettings) -> Result<()> {
        self.state.write().await.settings.insert(settings.user_id.clone(), settings.clone());
        Ok(())
    }
}
