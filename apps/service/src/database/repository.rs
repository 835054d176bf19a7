use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Row, params};
use uuid::Uuid;

use super::models::{
    CheckRecord, Incident, Monitor, NotificationSettings, StatusPage, from_millis, to_millis,
};
use crate::monitoring::interval::CheckInterval;
use crate::monitoring::types::MonitorStatus;
use crate::pool::{LibsqlManager, LibsqlPool};

/// Storage operations the monitoring engine depends on
///
/// Implementations must give read-after-write visibility: a check inserted by
/// [`Repository::insert_check`] is returned by the next
/// [`Repository::list_recent_checks`] on the same repository.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Get a monitor by id
    async fn get_monitor(&self, id: Uuid) -> Result<Option<Monitor>>;

    /// All monitors, oldest first
    async fn list_monitors(&self) -> Result<Vec<Monitor>>;

    /// Insert a monitor, or update its user-editable fields (name, url,
    /// threshold, interval). Never touches `status` or `last_checked` of an
    /// existing row.
    async fn save_monitor(&self, monitor: &Monitor) -> Result<()>;

    /// Append a check record, returning its sequence number
    async fn insert_check(&self, check: &CheckRecord) -> Result<i64>;

    /// Most recent checks of a monitor, newest first
    async fn list_recent_checks(&self, monitor_id: Uuid, limit: usize) -> Result<Vec<CheckRecord>>;

    /// Touch `last_checked` (never moving it backwards) and, when `status` is
    /// given, write the new aggregate status, as one atomic update.
    async fn apply_evaluation(
        &self,
        monitor_id: Uuid,
        checked_at: DateTime<Utc>,
        status: Option<MonitorStatus>,
    ) -> Result<()>;

    async fn save_status_page(&self, page: &StatusPage) -> Result<()>;

    async fn get_status_page(&self, id: Uuid) -> Result<Option<StatusPage>>;

    /// Add a monitor to a status page (idempotent)
    async fn attach_monitor(&self, status_page_id: Uuid, monitor_id: Uuid) -> Result<()>;

    /// Status pages that include the monitor
    async fn status_pages_for_monitor(&self, monitor_id: Uuid) -> Result<Vec<StatusPage>>;

    /// The non-resolved incident for a (monitor, status page) pair, if any
    async fn find_open_incident(
        &self,
        monitor_id: Uuid,
        status_page_id: Uuid,
    ) -> Result<Option<Incident>>;

    /// Insert an incident. Returns `false` without inserting when the
    /// incident references a monitor that already has a non-resolved
    /// incident on the same status page.
    async fn create_incident(&self, incident: &Incident) -> Result<bool>;

    async fn get_incident(&self, id: Uuid) -> Result<Option<Incident>>;

    /// Resolve one incident. Returns `false` when it was not open.
    async fn resolve_incident(&self, id: Uuid, resolved_at: DateTime<Utc>) -> Result<bool>;

    /// Resolve every non-resolved incident of a monitor across all status
    /// pages, returning how many were resolved.
    async fn resolve_incidents_for_monitor(
        &self,
        monitor_id: Uuid,
        resolved_at: DateTime<Utc>,
    ) -> Result<usize>;

    /// Non-resolved incidents, oldest first
    async fn list_open_incidents(&self) -> Result<Vec<Incident>>;

    async fn notification_settings(&self, user_id: &str) -> Result<Option<NotificationSettings>>;

    async fn save_notification_settings(&self, settings: &NotificationSettings) -> Result<()>;
}

const MONITOR_COLUMNS: &str =
    "id, name, url, status, last_checked, threshold, interval_seconds, user_id, created_at, updated_at";
const CHECK_COLUMNS: &str =
    "id, monitor_id, status, response_time_ms, status_code, error, checked_at";
const STATUS_PAGE_COLUMNS: &str = "id, name, slug, description, user_id, created_at";
const INCIDENT_COLUMNS: &str =
    "id, title, description, status, status_page_id, monitor_id, started_at, resolved_at";

fn parse_uuid(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).with_context(|| format!("invalid id '{raw}' in database"))
}

fn monitor_from_row(row: &Row) -> Result<Monitor> {
    Ok(Monitor {
        id: parse_uuid(&row.get::<String>(0)?)?,
        name: row.get(1)?,
        url: row.get(2)?,
        status: row.get::<String>(3)?.parse()?,
        last_checked: row.get::<Option<i64>>(4)?.map(from_millis),
        threshold: u32::try_from(row.get::<i64>(5)?).context("threshold out of range")?,
        interval: CheckInterval::from_secs(row.get::<i64>(6)?.max(0) as u64),
        user_id: row.get(7)?,
        created_at: from_millis(row.get(8)?),
        updated_at: from_millis(row.get(9)?),
    })
}

fn check_from_row(row: &Row) -> Result<CheckRecord> {
    Ok(CheckRecord {
        id: Some(row.get(0)?),
        monitor_id: parse_uuid(&row.get::<String>(1)?)?,
        status: row.get::<String>(2)?.parse()?,
        response_time_ms: row.get::<Option<i64>>(3)?.map(|v| v.max(0) as u64),
        status_code: row.get::<Option<i64>>(4)?.and_then(|v| u16::try_from(v).ok()),
        error: row.get(5)?,
        checked_at: from_millis(row.get(6)?),
    })
}

fn status_page_from_row(row: &Row) -> Result<StatusPage> {
    Ok(StatusPage {
        id: parse_uuid(&row.get::<String>(0)?)?,
        name: row.get(1)?,
        slug: row.get(2)?,
        description: row.get(3)?,
        user_id: row.get(4)?,
        created_at: from_millis(row.get(5)?),
    })
}

fn incident_from_row(row: &Row) -> Result<Incident> {
    Ok(Incident {
        id: parse_uuid(&row.get::<String>(0)?)?,
        title: row.get(1)?,
        description: row.get(2)?,
        status: row.get::<String>(3)?.parse()?,
        status_page_id: parse_uuid(&row.get::<String>(4)?)?,
        monitor_id: row.get::<Option<String>>(5)?.as_deref().map(parse_uuid).transpose()?,
        started_at: from_millis(row.get(6)?),
        resolved_at: row.get::<Option<i64>>(7)?.map(from_millis),
    })
}

fn settings_from_row(row: &Row) -> Result<NotificationSettings> {
    Ok(NotificationSettings {
        user_id: row.get(0)?,
        slack_enabled: row.get::<i64>(1)? != 0,
        slack_webhook_url: row.get(2)?,
        slack_channel: row.get(3)?,
        on_monitor_down: row.get::<i64>(4)? != 0,
        on_monitor_up: row.get::<i64>(5)? != 0,
        on_incident_created: row.get::<i64>(6)? != 0,
        on_incident_resolved: row.get::<i64>(7)? != 0,
    })
}

fn flag(value: bool) -> i64 {
    if value { 1 } else { 0 }
}

/// LibSQL-backed repository
pub struct LibsqlRepository {
    pool: LibsqlPool,
}

impl LibsqlRepository {
    /// Create a repository from a pool whose database is already migrated
    pub fn new_from_pool(pool: LibsqlPool) -> Self {
        Self { pool }
    }

    /// Get a connection from the pool
    async fn get_conn(&self) -> Result<deadpool::managed::Object<LibsqlManager>> {
        self.pool.get().await.map_err(|e| anyhow::anyhow!("failed to get database connection: {e}"))
    }
}

#[async_trait]
impl Repository for LibsqlRepository {
    async fn get_monitor(&self, id: Uuid) -> Result<Option<Monitor>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                &format!("SELECT {MONITOR_COLUMNS} FROM monitors WHERE id = ?"),
                params![id.to_string()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(monitor_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_monitors(&self) -> Result<Vec<Monitor>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(&format!("SELECT {MONITOR_COLUMNS} FROM monitors ORDER BY created_at, id"), ())
            .await?;

        let mut monitors = Vec::new();
        while let Some(row) = rows.next().await? {
            monitors.push(monitor_from_row(&row)?);
        }
        Ok(monitors)
    }

    async fn save_monitor(&self, monitor: &Monitor) -> Result<()> {
        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT INTO monitors (id, name, url, status, last_checked, threshold, interval_seconds, user_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                url = excluded.url,
                threshold = excluded.threshold,
                interval_seconds = excluded.interval_seconds,
                updated_at = excluded.updated_at",
            params![
                monitor.id.to_string(),
                monitor.name.clone(),
                monitor.url.clone(),
                monitor.status.as_str(),
                monitor.last_checked.map(to_millis),
                i64::from(monitor.threshold),
                i64::try_from(monitor.interval.as_secs()).unwrap_or(i64::MAX),
                monitor.user_id.clone(),
                to_millis(monitor.created_at),
                to_millis(monitor.updated_at)
            ],
        )
        .await?;
        Ok(())
    }

    async fn insert_check(&self, check: &CheckRecord) -> Result<i64> {
        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT INTO monitor_checks (monitor_id, status, response_time_ms, status_code, error, checked_at) VALUES (?, ?, ?, ?, ?, ?)",
            params![
                check.monitor_id.to_string(),
                check.status.as_str(),
                check.response_time_ms.map(|v| v as i64),
                check.status_code.map(i64::from),
                check.error.clone(),
                to_millis(check.checked_at)
            ],
        )
        .await?;

        Ok(conn.last_insert_rowid())
    }

    async fn list_recent_checks(&self, monitor_id: Uuid, limit: usize) -> Result<Vec<CheckRecord>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {CHECK_COLUMNS} FROM monitor_checks WHERE monitor_id = ? ORDER BY checked_at DESC, id DESC LIMIT ?"
                ),
                params![monitor_id.to_string(), limit as i64],
            )
            .await?;

        let mut checks = Vec::new();
        while let Some(row) = rows.next().await? {
            checks.push(check_from_row(&row)?);
        }
        Ok(checks)
    }

    async fn apply_evaluation(
        &self,
        monitor_id: Uuid,
        checked_at: DateTime<Utc>,
        status: Option<MonitorStatus>,
    ) -> Result<()> {
        let conn = self.get_conn().await?;
        conn.execute(
            "UPDATE monitors
             SET last_checked = MAX(COALESCE(last_checked, 0), ?1),
                 status = COALESCE(?2, status)
             WHERE id = ?3",
            params![
                to_millis(checked_at),
                status.map(|s| s.as_str().to_string()),
                monitor_id.to_string()
            ],
        )
        .await?;
        Ok(())
    }

    async fn save_status_page(&self, page: &StatusPage) -> Result<()> {
        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT INTO status_pages (id, name, slug, description, user_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                slug = excluded.slug,
                description = excluded.description",
            params![
                page.id.to_string(),
                page.name.clone(),
                page.slug.clone(),
                page.description.clone(),
                page.user_id.clone(),
                to_millis(page.created_at)
            ],
        )
        .await?;
        Ok(())
    }

    async fn get_status_page(&self, id: Uuid) -> Result<Option<StatusPage>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                &format!("SELECT {STATUS_PAGE_COLUMNS} FROM status_pages WHERE id = ?"),
                params![id.to_string()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(status_page_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn attach_monitor(&self, status_page_id: Uuid, monitor_id: Uuid) -> Result<()> {
        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT OR IGNORE INTO status_page_monitors (status_page_id, monitor_id, created_at) VALUES (?, ?, ?)",
            params![status_page_id.to_string(), monitor_id.to_string(), to_millis(Utc::now())],
        )
        .await?;
        Ok(())
    }

    async fn status_pages_for_monitor(&self, monitor_id: Uuid) -> Result<Vec<StatusPage>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                "SELECT sp.id, sp.name, sp.slug, sp.description, sp.user_id, sp.created_at
                 FROM status_pages sp
                 INNER JOIN status_page_monitors spm ON spm.status_page_id = sp.id
                 WHERE spm.monitor_id = ?
                 ORDER BY spm.created_at, sp.id",
                params![monitor_id.to_string()],
            )
            .await?;

        let mut pages = Vec::new();
        while let Some(row) = rows.next().await? {
            pages.push(status_page_from_row(&row)?);
        }
        Ok(pages)
    }

    async fn find_open_incident(
        &self,
        monitor_id: Uuid,
        status_page_id: Uuid,
    ) -> Result<Option<Incident>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {INCIDENT_COLUMNS} FROM incidents
                     WHERE monitor_id = ? AND status_page_id = ? AND status != 'resolved'
                     LIMIT 1"
                ),
                params![monitor_id.to_string(), status_page_id.to_string()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(incident_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn create_incident(&self, incident: &Incident) -> Result<bool> {
        let conn = self.get_conn().await?;
        let now = to_millis(Utc::now());
        // idx_incidents_one_open turns a duplicate open incident into a no-op
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO incidents (id, title, description, status, status_page_id, monitor_id, started_at, resolved_at, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    incident.id.to_string(),
                    incident.title.clone(),
                    incident.description.clone(),
                    incident.status.as_str(),
                    incident.status_page_id.to_string(),
                    incident.monitor_id.map(|id| id.to_string()),
                    to_millis(incident.started_at),
                    incident.resolved_at.map(to_millis),
                    now,
                    now
                ],
            )
            .await?;
        Ok(inserted == 1)
    }

    async fn get_incident(&self, id: Uuid) -> Result<Option<Incident>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                &format!("SELECT {INCIDENT_COLUMNS} FROM incidents WHERE id = ?"),
                params![id.to_string()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(incident_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn resolve_incident(&self, id: Uuid, resolved_at: DateTime<Utc>) -> Result<bool> {
        let conn = self.get_conn().await?;
        let updated = conn
            .execute(
                "UPDATE incidents SET status = 'resolved', resolved_at = ?1, updated_at = ?1
                 WHERE id = ?2 AND status != 'resolved'",
                params![to_millis(resolved_at), id.to_string()],
            )
            .await?;
        Ok(updated == 1)
    }

    async fn resolve_incidents_for_monitor(
        &self,
        monitor_id: Uuid,
        resolved_at: DateTime<Utc>,
    ) -> Result<usize> {
        let conn = self.get_conn().await?;
        let updated = conn
            .execute(
                "UPDATE incidents SET status = 'resolved', resolved_at = ?1, updated_at = ?1
                 WHERE monitor_id = ?2 AND status != 'resolved'",
                params![to_millis(resolved_at), monitor_id.to_string()],
            )
            .await?;
        Ok(updated as usize)
    }

    async fn list_open_incidents(&self) -> Result<Vec<Incident>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {INCIDENT_COLUMNS} FROM incidents WHERE status != 'resolved' ORDER BY started_at, id"
                ),
                (),
            )
            .await?;

        let mut incidents = Vec::new();
        while let Some(row) = rows.next().await? {
            incidents.push(incident_from_row(&row)?);
        }
        Ok(incidents)
    }

    async fn notification_settings(&self, user_id: &str) -> Result<Option<NotificationSettings>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                "SELECT user_id, slack_enabled, slack_webhook_url, slack_channel, on_monitor_down, on_monitor_up, on_incident_created, on_incident_resolved
                 FROM notification_settings WHERE user_id = ?",
                params![user_id],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(settings_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn save_notification_settings(&self, settings: &NotificationSettings) -> Result<()> {
        let conn = self.get_conn().await?;
        let now = to_millis(Utc::now());
        conn.execute(
            "INSERT INTO notification_settings (user_id, slack_enabled, slack_webhook_url, slack_channel, on_monitor_down, on_monitor_up, on_incident_created, on_incident_resolved, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)
             ON CONFLICT(user_id) DO UPDATE SET
                slack_enabled = excluded.slack_enabled,
                slack_webhook_url = excluded.slack_webhook_url,
                slack_channel = excluded.slack_channel,
                on_monitor_down = excluded.on_monitor_down,
                on_monitor_up = excluded.on_monitor_up,
                on_incident_created = excluded.on_incident_created,
                on_incident_resolved = excluded.on_incident_resolved,
                updated_at = excluded.updated_at",
            params![
                settings.user_id.clone(),
                flag(settings.slack_enabled),
                settings.slack_webhook_url.clone(),
                settings.slack_channel.clone(),
                flag(settings.on_monitor_down),
                flag(settings.on_monitor_up),
                flag(settings.on_incident_created),
                flag(settings.on_incident_resolved),
                now
            ],
        )
        .await?;
        Ok(())
    }
}
