//! SQLite-backed implementation of the EntityStore port.
//!
//! Free-form record fields and tags are stored as JSON documents;
//! updates are read-modify-write merges at field granularity.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use relay_core::EntityStore;
use relay_domain::{EntityKind, EntityRecord, RelayError, Result};
use rusqlite::{params, Row};
use serde_json::{Map, Value};
use tracing::instrument;
use uuid::Uuid;

use super::pool::SqlitePool;
use crate::errors::InfraError;

/// SQLite implementation of EntityStore
pub struct SqliteEntityStore {
    pool: SqlitePool,
}

impl SqliteEntityStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn map_row(row: &Row<'_>) -> rusqlite::Result<(String, String, String, String, i64, i64)> {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?))
    }

    fn hydrate(
        (id, kind, fields, tags, created_at, updated_at): (String, String, String, String, i64, i64),
    ) -> Result<EntityRecord> {
        let kind: EntityKind = serde_json::from_value(Value::String(kind.clone()))
            .map_err(|_| RelayError::Database(format!("unknown entity kind: {kind}")))?;
        Ok(EntityRecord {
            id,
            kind,
            fields: serde_json::from_str(&fields)
                .map_err(|e| RelayError::Database(format!("corrupt record fields: {e}")))?,
            tags: serde_json::from_str(&tags)
                .map_err(|e| RelayError::Database(format!("corrupt record tags: {e}")))?,
            created_at: DateTime::from_timestamp_millis(created_at).unwrap_or_else(Utc::now),
            updated_at: DateTime::from_timestamp_millis(updated_at).unwrap_or_else(Utc::now),
        })
    }

    fn load(&self, kind: EntityKind, id: &str) -> Result<EntityRecord> {
        let conn = self.pool.get()?;
        let row = conn
            .query_row(
                "SELECT id, kind, fields, tags, created_at, updated_at
                 FROM entity_records WHERE id = ?1 AND kind = ?2",
                params![id, kind.as_str()],
                Self::map_row,
            )
            .map_err(|err| match err {
                rusqlite::Error::QueryReturnedNoRows => {
                    RelayError::NotFound(format!("{kind} {id} not found"))
                }
                other => InfraError::from(other).into(),
            })?;
        Self::hydrate(row)
    }

    fn persist_fields_and_tags(&self, record: &EntityRecord) -> Result<()> {
        let fields = serde_json::to_string(&record.fields).map_err(InfraError::from)?;
        let tags = serde_json::to_string(&record.tags).map_err(InfraError::from)?;

        let conn = self.pool.get()?;
        conn.execute(
            "UPDATE entity_records SET fields = ?2, tags = ?3, updated_at = ?4 WHERE id = ?1",
            params![record.id, fields, tags, Utc::now().timestamp_millis()],
        )
        .map_err(InfraError::from)?;
        Ok(())
    }
}

#[async_trait]
impl EntityStore for SqliteEntityStore {
    #[instrument(skip(self, fields))]
    async fn create_record(
        &self,
        kind: EntityKind,
        fields: Map<String, Value>,
    ) -> Result<EntityRecord> {
        let now = Utc::now();
        let record = EntityRecord {
            id: Uuid::new_v4().to_string(),
            kind,
            fields,
            tags: Vec::new(),
            created_at: now,
            updated_at: now,
        };

        let serialized = serde_json::to_string(&record.fields).map_err(InfraError::from)?;
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO entity_records (id, kind, fields, tags, created_at, updated_at)
             VALUES (?1, ?2, ?3, '[]', ?4, ?4)",
            params![record.id, kind.as_str(), serialized, now.timestamp_millis()],
        )
        .map_err(InfraError::from)?;

        Ok(record)
    }

    #[instrument(skip(self, fields))]
    async fn update_record(
        &self,
        kind: EntityKind,
        id: &str,
        fields: Map<String, Value>,
    ) -> Result<()> {
        let mut record = self.load(kind, id)?;
        for (key, value) in fields {
            record.fields.insert(key, value);
        }
        self.persist_fields_and_tags(&record)
    }

    #[instrument(skip(self))]
    async fn delete_record(&self, kind: EntityKind, id: &str) -> Result<()> {
        let conn = self.pool.get()?;
        let deleted = conn
            .execute(
                "DELETE FROM entity_records WHERE id = ?1 AND kind = ?2",
                params![id, kind.as_str()],
            )
            .map_err(InfraError::from)?;
        if deleted == 0 {
            return Err(RelayError::NotFound(format!("{kind} {id} not found")));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn find_record(&self, kind: EntityKind, id: &str) -> Result<Option<EntityRecord>> {
        match self.load(kind, id) {
            Ok(record) => Ok(Some(record)),
            Err(RelayError::NotFound(_)) => Ok(None),
            Err(other) => Err(other),
        }
    }

    #[instrument(skip(self))]
    async fn add_tag(&self, kind: EntityKind, id: &str, tag: &str) -> Result<()> {
        let mut record = self.load(kind, id)?;
        if !record.tags.iter().any(|existing| existing == tag) {
            record.tags.push(tag.to_string());
            self.persist_fields_and_tags(&record)?;
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn remove_tag(&self, kind: EntityKind, id: &str, tag: &str) -> Result<()> {
        let mut record = self.load(kind, id)?;
        let before = record.tags.len();
        record.tags.retain(|existing| existing != tag);
        if record.tags.len() != before {
            self.persist_fields_and_tags(&record)?;
        }
        Ok(())
    }
}
