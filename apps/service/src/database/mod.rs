/// Database abstraction layer
///
/// Store traits for targets, checks and notification state, backed by a
/// local LibSQL (SQLite) database.

pub mod migrations;
pub mod models;
pub mod repository;

pub use repository::{CheckStore, DatabaseImpl, NotificationStateStore, TargetStore};

use anyhow::Result;

/// Initialize database with schema
pub async fn initialize_database(conn: &libsql::Connection) -> Result<()> {
    migrations::run_migrations(conn).await
}

/// Fresh migrated database in a temporary directory, for tests
#[cfg(test)]
pub(crate) async fn test_database() -> Result<(std::sync::Arc<DatabaseImpl>, tempfile::TempDir)> {
    let temp_dir = tempfile::tempdir()?;
    let pool = crate::pool::open_pool(temp_dir.path().join("test.db"), 4).await?;

    let conn = pool.get().await.map_err(|e| anyhow::anyhow!("{e}"))?;
    initialize_database(&conn).await?;
    drop(conn);

    Ok((std::sync::Arc::new(DatabaseImpl::new_from_pool(pool)), temp_dir))
}
