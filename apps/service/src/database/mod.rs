/// Database abstraction layer
///
/// The engine talks to storage through the [`Repository`] trait. LibSQL is
/// the production backend; [`InMemoryRepository`] backs tests and embedders
/// that do not need durability.
pub mod memory;
pub mod migrations;
pub mod models;
pub mod repository;

pub use memory::InMemoryRepository;
pub use repository::{LibsqlRepository, Repository};

use anyhow::Result;

use crate::config::DatabaseConfig;
use crate::pool::{LibsqlManager, LibsqlPool};

/// Initialize database with schema
pub async fn initialize_database(conn: &libsql::Connection) -> Result<()> {
    migrations::run_migrations(conn).await
}

/// Open the local database file, build the connection pool and migrate it
pub async fn open_database(config: &DatabaseConfig) -> Result<LibsqlRepository> {
    let pool = open_pool(&config.path, config.max_connections).await?;
    Ok(LibsqlRepository::new_from_pool(pool))
}

/// Build a migrated pool for a database file
pub async fn open_pool(path: &str, max_connections: usize) -> Result<LibsqlPool> {
    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let db = libsql::Builder::new_local(path).build().await?;
    let pool: LibsqlPool = deadpool::managed::Pool::builder(LibsqlManager::new(db))
        .max_size(max_connections.max(1))
        .build()?;

    let conn = pool.get().await.map_err(|e| anyhow::anyhow!("failed to get database connection: {e}"))?;
    initialize_database(&conn).await?;
    tracing::info!("Database ready at {}", path);

    Ok(pool)
}
