use thiserror::Error;
use uuid::Uuid;

/// Failures surfaced by the check pipeline and incident operations.
///
/// Probe failures are never represented here: a failed probe is a `down`
/// check result, not an error.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Monitor {0} not found")]
    MonitorNotFound(Uuid),

    #[error("Status page {0} not found")]
    StatusPageNotFound(Uuid),

    #[error("Incident {0} not found")]
    IncidentNotFound(Uuid),

    #[error("Monitor {monitor_id} already has an open incident on status page {status_page_id}")]
    IncidentAlreadyOpen { monitor_id: Uuid, status_page_id: Uuid },

    #[error("Invalid monitor: {0}")]
    InvalidMonitor(String),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}
