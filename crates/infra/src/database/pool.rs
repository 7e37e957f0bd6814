//! SQLite connection pool with schema bootstrap.

use std::sync::Arc;

use r2d2::PooledConnection;
use r2d2_sqlite::SqliteConnectionManager;
use relay_domain::{DatabaseConfig, Result};
use tracing::info;

use crate::errors::InfraError;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS workflows (
    id          TEXT PRIMARY KEY,
    name        TEXT NOT NULL,
    active      INTEGER NOT NULL,
    definition  TEXT NOT NULL,
    created_at  INTEGER NOT NULL,
    updated_at  INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS workflow_executions (
    id            TEXT PRIMARY KEY,
    workflow_id   TEXT NOT NULL,
    status        TEXT NOT NULL,
    trigger_data  TEXT NOT NULL,
    result        TEXT,
    error         TEXT,
    started_at    INTEGER NOT NULL,
    completed_at  INTEGER
);
CREATE INDEX IF NOT EXISTS idx_executions_workflow
    ON workflow_executions(workflow_id, started_at);

CREATE TABLE IF NOT EXISTS entity_records (
    id          TEXT PRIMARY KEY,
    kind        TEXT NOT NULL,
    fields      TEXT NOT NULL,
    tags        TEXT NOT NULL,
    created_at  INTEGER NOT NULL,
    updated_at  INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_entity_records_kind ON entity_records(kind);
";

/// Pooled SQLite database with the automation schema applied.
#[derive(Clone)]
pub struct SqlitePool {
    pool: Arc<r2d2::Pool<SqliteConnectionManager>>,
}

impl SqlitePool {
    /// Open (or create) the database and apply the schema.
    pub fn new(config: &DatabaseConfig) -> Result<Self> {
        let manager = SqliteConnectionManager::file(&config.path)
            .with_init(|conn| conn.execute_batch("PRAGMA foreign_keys = ON;"));
        let pool = r2d2::Pool::builder()
            .max_size(config.pool_size.max(1))
            .build(manager)
            .map_err(InfraError::from)?;

        let wrapped = Self { pool: Arc::new(pool) };
        wrapped.get()?.execute_batch(SCHEMA).map_err(InfraError::from)?;

        info!(path = %config.path, pool_size = config.pool_size, "database ready");
        Ok(wrapped)
    }

    /// Borrow a pooled connection.
    pub fn get(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get().map_err(InfraError::from)?)
    }
}
