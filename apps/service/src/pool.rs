use anyhow::{Result, anyhow};
use deadpool::managed::{self, Pool, RecycleError, RecycleResult};
use libsql::{Connection, Database, Error as LibsqlError};
use std::path::Path;

/// deadpool manager handing out connections to one local libsql database
pub struct LibsqlManager {
    database: Database,
}

impl LibsqlManager {
    pub fn new(database: Database) -> Self {
        Self { database }
    }
}

impl managed::Manager for LibsqlManager {
    type Type = Connection;
    type Error = LibsqlError;

    async fn create(&self) -> Result<Self::Type, Self::Error> {
        self.database.connect()
    }

    async fn recycle(
        &self,
        conn: &mut Self::Type,
        _: &managed::Metrics,
    ) -> RecycleResult<Self::Error> {
        let mut rows = conn.query("SELECT 1", ()).await?;
        match rows.next().await? {
            Some(_) => Ok(()),
            None => Err(RecycleError::message("connection returned no row for liveness probe")),
        }
    }
}

pub type LibsqlPool = Pool<LibsqlManager>;

/// Open (or create) the database file and wrap it in a pool
pub async fn open_pool(path: impl AsRef<Path>, max_size: usize) -> Result<LibsqlPool> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let database = libsql::Builder::new_local(path).build().await?;
    Pool::builder(LibsqlManager::new(database))
        .max_size(max_size.max(1))
        .build()
        .map_err(|e| anyhow!("Failed to build database pool: {e}"))
}
