//! SQLite-backed implementation of the ExecutionRepository port.
//!
//! Terminal-state transitions are guarded in SQL: the UPDATE only
//! matches rows still in RUNNING state, which gives the per-row
//! atomicity the engine's lifecycle invariant needs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use relay_core::ExecutionRepository;
use relay_domain::{ExecutionStatus, RelayError, Result, WorkflowExecution};
use rusqlite::{params, Row};
use serde_json::Value;
use tracing::instrument;

use super::pool::SqlitePool;
use crate::errors::InfraError;

/// SQLite implementation of ExecutionRepository
pub struct SqliteExecutionRepository {
    pool: SqlitePool,
}

impl SqliteExecutionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn map_row(row: &Row<'_>) -> rusqlite::Result<(WorkflowExecution, String)> {
        let status: String = row.get(2)?;
        let trigger_data: String = row.get(3)?;
        let result: Option<String> = row.get(4)?;
        let started_at: i64 = row.get(6)?;
        let completed_at: Option<i64> = row.get(7)?;

        let execution = WorkflowExecution {
            id: row.get(0)?,
            workflow_id: row.get(1)?,
            // Patched from the status column below.
            status: ExecutionStatus::Running,
            trigger_data: serde_json::from_str(&trigger_data).unwrap_or(Value::Null),
            result: result.and_then(|raw| serde_json::from_str(&raw).ok()),
            error: row.get(5)?,
            started_at: DateTime::from_timestamp_millis(started_at).unwrap_or_else(Utc::now),
            completed_at: completed_at.and_then(DateTime::from_timestamp_millis),
        };
        Ok((execution, status))
    }

    fn hydrate(pair: (WorkflowExecution, String)) -> Result<WorkflowExecution> {
        let (mut execution, status) = pair;
        execution.status = match status.as_str() {
            "RUNNING" => ExecutionStatus::Running,
            "COMPLETED" => ExecutionStatus::Completed,
            "FAILED" => ExecutionStatus::Failed,
            other => {
                return Err(RelayError::Database(format!("unknown execution status: {other}")))
            }
        };
        Ok(execution)
    }
}

const SELECT_COLUMNS: &str =
    "id, workflow_id, status, trigger_data, result, error, started_at, completed_at";

#[async_trait]
impl ExecutionRepository for SqliteExecutionRepository {
    #[instrument(skip(self, execution), fields(execution_id = %execution.id))]
    async fn insert_execution(&self, execution: &WorkflowExecution) -> Result<()> {
        let trigger_data =
            serde_json::to_string(&execution.trigger_data).map_err(InfraError::from)?;

        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO workflow_executions
                 (id, workflow_id, status, trigger_data, started_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                execution.id,
                execution.workflow_id,
                execution.status.to_string(),
                trigger_data,
                execution.started_at.timestamp_millis(),
            ],
        )
        .map_err(InfraError::from)?;
        Ok(())
    }

    #[instrument(skip(self, result))]
    async fn mark_completed(
        &self,
        id: &str,
        result: &Value,
        completed_at: DateTime<Utc>,
    ) -> Result<()> {
        let snapshot = serde_json::to_string(result).map_err(InfraError::from)?;

        let conn = self.pool.get()?;
        let updated = conn
            .execute(
                "UPDATE workflow_executions
                 SET status = 'COMPLETED', result = ?2, completed_at = ?3
                 WHERE id = ?1 AND status = 'RUNNING'",
                params![id, snapshot, completed_at.timestamp_millis()],
            )
            .map_err(InfraError::from)?;

        if updated == 0 {
            return Err(RelayError::Database(format!(
                "execution {id} is missing or already terminal"
            )));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn mark_failed(&self, id: &str, error: &str, completed_at: DateTime<Utc>) -> Result<()> {
        let conn = self.pool.get()?;
        let updated = conn
            .execute(
                "UPDATE workflow_executions
                 SET status = 'FAILED', error = ?2, completed_at = ?3
                 WHERE id = ?1 AND status = 'RUNNING'",
                params![id, error, completed_at.timestamp_millis()],
            )
            .map_err(InfraError::from)?;

        if updated == 0 {
            return Err(RelayError::Database(format!(
                "execution {id} is missing or already terminal"
            )));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_execution(&self, id: &str) -> Result<Option<WorkflowExecution>> {
        let conn = self.pool.get()?;
        let row = conn
            .query_row(
                &format!("SELECT {SELECT_COLUMNS} FROM workflow_executions WHERE id = ?1"),
                params![id],
                Self::map_row,
            )
            .map(Some)
            .or_else(|err| match err {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(InfraError::from(other)),
            })?;

        row.map(Self::hydrate).transpose()
    }

    #[instrument(skip(self))]
    async fn list_executions(&self, workflow_id: &str) -> Result<Vec<WorkflowExecution>> {
        let conn = self.pool.get()?;
        let mut statement = conn
            .prepare(&format!(
                "SELECT {SELECT_COLUMNS} FROM workflow_executions
                 WHERE workflow_id = ?1 ORDER BY started_at DESC"
            ))
            .map_err(InfraError::from)?;

        let rows = statement
            .query_map(params![workflow_id], Self::map_row)
            .map_err(InfraError::from)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(InfraError::from)?;

        rows.into_iter().map(Self::hydrate).collect()
    }
}
