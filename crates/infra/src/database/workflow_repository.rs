//! SQLite-backed implementation of the WorkflowRepository port.
//!
//! Definitions are stored as a serialized JSON document so trigger and
//! action payloads survive schema-free; the typed model re-validates
//! them on every load.

use async_trait::async_trait;
use chrono::Utc;
use relay_core::WorkflowRepository;
use relay_domain::{RelayError, Result, WorkflowDefinition};
use rusqlite::params;
use tracing::{debug, instrument};

use super::pool::SqlitePool;
use crate::errors::InfraError;

/// SQLite implementation of WorkflowRepository
pub struct SqliteWorkflowRepository {
    pool: SqlitePool,
}

impl SqliteWorkflowRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WorkflowRepository for SqliteWorkflowRepository {
    #[instrument(skip(self))]
    async fn get_workflow(&self, id: &str) -> Result<Option<WorkflowDefinition>> {
        let conn = self.pool.get()?;
        let row: Option<String> = conn
            .query_row("SELECT definition FROM workflows WHERE id = ?1", params![id], |row| {
                row.get(0)
            })
            .map(Some)
            .or_else(|err| match err {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(InfraError::from(other)),
            })?;

        row.map(|definition| {
            serde_json::from_str(&definition).map_err(|e| {
                RelayError::Database(format!("corrupt workflow definition {id}: {e}"))
            })
        })
        .transpose()
    }

    #[instrument(skip(self))]
    async fn list_active_workflows(&self) -> Result<Vec<WorkflowDefinition>> {
        let conn = self.pool.get()?;
        let mut statement = conn
            .prepare("SELECT definition FROM workflows WHERE active = 1 ORDER BY id")
            .map_err(InfraError::from)?;

        let definitions = statement
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(InfraError::from)?
            .collect::<std::result::Result<Vec<String>, _>>()
            .map_err(InfraError::from)?;

        definitions
            .into_iter()
            .map(|definition| {
                serde_json::from_str(&definition)
                    .map_err(|e| RelayError::Database(format!("corrupt workflow definition: {e}")))
            })
            .collect()
    }

    #[instrument(skip(self, workflow), fields(workflow_id = %workflow.id))]
    async fn save_workflow(&self, workflow: &WorkflowDefinition) -> Result<()> {
        let definition =
            serde_json::to_string(workflow).map_err(InfraError::from)?;
        let now = Utc::now().timestamp_millis();

        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO workflows (id, name, active, definition, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 active = excluded.active,
                 definition = excluded.definition,
                 updated_at = excluded.updated_at",
            params![workflow.id, workflow.name, workflow.active as i64, definition, now],
        )
        .map_err(InfraError::from)?;

        debug!(workflow_id = %workflow.id, active = workflow.active, "workflow saved");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_workflow(&self, id: &str) -> Result<()> {
        let conn = self.pool.get()?;
        let deleted = conn
            .execute("DELETE FROM workflows WHERE id = ?1", params![id])
            .map_err(InfraError::from)?;
        if deleted == 0 {
            return Err(RelayError::NotFound(format!("workflow {id} not found")));
        }
        Ok(())
    }
}
