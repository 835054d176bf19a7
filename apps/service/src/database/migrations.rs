use anyhow::Result;
use libsql::Connection;

use super::models::to_millis;

/// Schema version - increment when making schema changes
const SCHEMA_VERSION: i32 = 2;

/// Run database migrations
pub async fn run_migrations(conn: &Connection) -> Result<()> {
    // Create schema_migrations table first (tracks applied migrations)
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL,
            description TEXT
        )",
        (),
    )
    .await?;

    let current_version = get_current_version(conn).await?;

    if current_version >= SCHEMA_VERSION {
        tracing::debug!("Database schema is up to date (version {})", current_version);
        return Ok(());
    }

    tracing::info!("Running migrations from version {} to {}", current_version, SCHEMA_VERSION);

    if current_version < 1 {
        run_migration_v1(conn).await?;
        record_migration(conn, 1, "Initial schema").await?;
    }

    if current_version < 2 {
        run_migration_v2(conn).await?;
        record_migration(conn, 2, "At most one open incident per monitor and status page").await?;
    }

    tracing::info!("Database migrations completed successfully (now at version {})", SCHEMA_VERSION);
    Ok(())
}

/// Get current schema version from database
async fn get_current_version(conn: &Connection) -> Result<i32> {
    let mut rows = conn.query("SELECT MAX(version) FROM schema_migrations", ()).await?;

    if let Some(row) = rows.next().await? {
        let version: Option<i32> = row.get(0)?;
        Ok(version.unwrap_or(0))
    } else {
        Ok(0)
    }
}

/// Record that a migration was applied
async fn record_migration(conn: &Connection, version: i32, description: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO schema_migrations (version, applied_at, description) VALUES (?, ?, ?)",
        libsql::params![version, to_millis(chrono::Utc::now()), description],
    )
    .await?;

    tracing::info!("Applied migration v{}: {}", version, description);
    Ok(())
}

/// Migration v1: monitors, checks, status pages, incidents, notification settings
async fn run_migration_v1(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS monitors (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            url TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'unknown',
            last_checked INTEGER,
            threshold INTEGER NOT NULL DEFAULT 3,
            interval_seconds INTEGER NOT NULL DEFAULT 600,
            user_id TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )",
        (),
    )
    .await?;

    // Append-only; rows only disappear with their monitor
    conn.execute(
        "CREATE TABLE IF NOT EXISTS monitor_checks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            monitor_id TEXT NOT NULL,
            status TEXT NOT NULL,
            response_time_ms INTEGER,
            status_code INTEGER,
            error TEXT,
            checked_at INTEGER NOT NULL,
            FOREIGN KEY (monitor_id) REFERENCES monitors(id) ON DELETE CASCADE
        )",
        (),
    )
    .await?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS status_pages (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            slug TEXT NOT NULL UNIQUE,
            description TEXT,
            user_id TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )",
        (),
    )
    .await?;

    // Status page to monitors mapping (many-to-many)
    conn.execute(
        "CREATE TABLE IF NOT EXISTS status_page_monitors (
            status_page_id TEXT NOT NULL,
            monitor_id TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            PRIMARY KEY (status_page_id, monitor_id),
            FOREIGN KEY (status_page_id) REFERENCES status_pages(id) ON DELETE CASCADE,
            FOREIGN KEY (monitor_id) REFERENCES monitors(id) ON DELETE CASCADE
        )",
        (),
    )
    .await?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS incidents (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            description TEXT,
            status TEXT NOT NULL DEFAULT 'investigating',
            status_page_id TEXT NOT NULL,
            monitor_id TEXT,
            started_at INTEGER NOT NULL,
            resolved_at INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            FOREIGN KEY (status_page_id) REFERENCES status_pages(id) ON DELETE CASCADE,
            FOREIGN KEY (monitor_id) REFERENCES monitors(id) ON DELETE CASCADE
        )",
        (),
    )
    .await?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS notification_settings (
            user_id TEXT PRIMARY KEY,
            slack_enabled INTEGER NOT NULL DEFAULT 0,
            slack_webhook_url TEXT,
            slack_channel TEXT,
            on_monitor_down INTEGER NOT NULL DEFAULT 1,
            on_monitor_up INTEGER NOT NULL DEFAULT 0,
            on_incident_created INTEGER NOT NULL DEFAULT 1,
            on_incident_resolved INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )",
        (),
    )
    .await?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_monitor_checks_monitor_checked ON monitor_checks(monitor_id, checked_at DESC, id DESC)",
        (),
    )
    .await?;
    conn.execute("CREATE INDEX IF NOT EXISTS idx_monitors_last_checked ON monitors(last_checked)", ()).await?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_status_page_monitors_monitor ON status_page_monitors(monitor_id)",
        (),
    )
    .await?;
    conn.execute("CREATE INDEX IF NOT EXISTS idx_incidents_monitor ON incidents(monitor_id)", ()).await?;
    conn.execute("CREATE INDEX IF NOT EXISTS idx_incidents_status ON incidents(status)", ()).await?;

    Ok(())
}

/// Migration v2: enforce at most one non-resolved incident per
/// (monitor, status page) at the storage layer
async fn run_migration_v2(conn: &Connection) -> Result<()> {
    // Earlier races may have left duplicates behind; keep the oldest open one.
    conn.execute(
        "UPDATE incidents SET status = 'resolved', resolved_at = updated_at
         WHERE status != 'resolved' AND monitor_id IS NOT NULL
           AND EXISTS (
             SELECT 1 FROM incidents older
             WHERE older.monitor_id = incidents.monitor_id
               AND older.status_page_id = incidents.status_page_id
               AND older.status != 'resolved'
               AND (older.started_at < incidents.started_at
                    OR (older.started_at = incidents.started_at AND older.id < incidents.id))
           )",
        (),
    )
    .await?;

    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_incidents_one_open
         ON incidents(monitor_id, status_page_id)
         WHERE status != 'resolved' AND monitor_id IS NOT NULL",
        (),
    )
    .await?;

    tracing::info!("Added unique open-incident index");
    Ok(())
}
