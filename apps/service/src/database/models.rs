use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use uuid::Uuid;

use crate::monitoring::interval::CheckInterval;
use crate::monitoring::types::{CheckResult, CheckStatus, MonitorStatus};

/// Monitor model - an HTTP endpoint under observation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Monitor {
    pub id: Uuid,
    pub name: String,
    pub url: String,
    pub status: MonitorStatus,
    pub last_checked: Option<DateTime<Utc>>,
    /// Consecutive failing checks required before the monitor is down
    pub threshold: u32,
    pub interval: CheckInterval,
    /// Owner; receives the monitor's notifications
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Monitor {
    /// Create a new, never-checked monitor
    pub fn new(name: impl Into<String>, url: impl Into<String>, user_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            url: url.into(),
            status: MonitorStatus::Unknown,
            last_checked: None,
            threshold: 3,
            interval: CheckInterval::DEFAULT,
            user_id: user_id.into(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_threshold(mut self, threshold: u32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_interval(mut self, interval: CheckInterval) -> Self {
        self.interval = interval;
        self
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.interval.is_due(self.last_checked, now)
    }
}

/// One immutable probe outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckRecord {
    /// Storage sequence number, assigned on insert
    pub id: Option<i64>,
    pub monitor_id: Uuid,
    pub status: CheckStatus,
    pub response_time_ms: Option<u64>,
    pub status_code: Option<u16>,
    pub error: Option<String>,
    pub checked_at: DateTime<Utc>,
}

impl CheckRecord {
    pub fn from_result(monitor_id: Uuid, result: &CheckResult, checked_at: DateTime<Utc>) -> Self {
        Self {
            id: None,
            monitor_id,
            status: result.status,
            response_time_ms: result.response_time_ms,
            status_code: result.status_code,
            error: result.error.clone(),
            checked_at,
        }
    }
}

/// Public page grouping monitors; incidents belong to exactly one page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusPage {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
}

impl StatusPage {
    pub fn new(name: impl Into<String>, user_id: impl Into<String>) -> Self {
        let name = name.into();
        let id = Uuid::new_v4();
        Self {
            id,
            slug: slug_or_id(&name, id),
            name,
            description: None,
            user_id: user_id.into(),
            created_at: Utc::now(),
        }
    }
}

/// Lowercase, ASCII alphanumerics separated by single dashes
pub fn slugify(name: &str) -> String {
    name.to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

/// Slug for a page name, or `page-` plus the id prefix when the name has no
/// ASCII alphanumerics
pub fn slug_or_id(name: &str, id: Uuid) -> String {
    let slug = slugify(name);
    if slug.is_empty() {
        let simple = id.simple().to_string();
        format!("page-{}", &simple[..8])
    } else {
        slug
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncidentStatus {
    #[default]
    Investigating,
    Identified,
    Monitoring,
    Resolved,
}

impl IncidentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            IncidentStatus::Investigating => "investigating",
            IncidentStatus::Identified => "identified",
            IncidentStatus::Monitoring => "monitoring",
            IncidentStatus::Resolved => "resolved",
        }
    }

    pub fn is_open(self) -> bool {
        self != IncidentStatus::Resolved
    }
}

impl fmt::Display for IncidentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IncidentStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "investigating" => Ok(IncidentStatus::Investigating),
            "identified" => Ok(IncidentStatus::Identified),
            "monitoring" => Ok(IncidentStatus::Monitoring),
            "resolved" => Ok(IncidentStatus::Resolved),
            other => Err(anyhow::anyhow!("unknown incident status '{other}'")),
        }
    }
}

/// Tracked disruption on one status page, optionally tied to a monitor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Incident {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub status: IncidentStatus,
    pub status_page_id: Uuid,
    pub monitor_id: Option<Uuid>,
    pub started_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Incident {
    /// A fresh incident in the investigating state
    pub fn investigating(
        title: impl Into<String>,
        description: Option<String>,
        status_page_id: Uuid,
        monitor_id: Option<Uuid>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            description,
            status: IncidentStatus::Investigating,
            status_page_id,
            monitor_id,
            started_at,
            resolved_at: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status.is_open()
    }
}

/// Per-user Slack delivery preferences
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationSettings {
    pub user_id: String,
    pub slack_enabled: bool,
    pub slack_webhook_url: Option<String>,
    pub slack_channel: Option<String>,
    pub on_monitor_down: bool,
    pub on_monitor_up: bool,
    pub on_incident_created: bool,
    pub on_incident_resolved: bool,
}

impl NotificationSettings {
    /// Settings a user has before saving any: Slack off, every rule but
    /// monitor-up enabled.
    pub fn defaults_for(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            slack_enabled: false,
            slack_webhook_url: None,
            slack_channel: None,
            on_monitor_down: true,
            on_monitor_up: false,
            on_incident_created: true,
            on_incident_resolved: true,
        }
    }
}

/// Epoch milliseconds, the storage representation of every timestamp
pub fn to_millis(time: DateTime<Utc>) -> i64 {
    time.timestamp_millis()
}

pub fn from_millis(millis: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(millis).unwrap_or_default()
}
