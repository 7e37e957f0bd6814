//! Generic domain record types flowing through the persistence boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Kinds of domain records the automation core reads and writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Company,
    Contact,
    Deal,
    Task,
    Note,
}

impl EntityKind {
    /// Stable string tag, matching the serde encoding
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Company => "company",
            Self::Contact => "contact",
            Self::Deal => "deal",
            Self::Task => "task",
            Self::Note => "note",
        }
    }

    /// Variable-bag key under which a created record's id is stored
    pub fn bag_key(&self) -> &'static str {
        match self {
            Self::Company => "company_id",
            Self::Contact => "contact_id",
            Self::Deal => "deal_id",
            Self::Task => "task_id",
            Self::Note => "note_id",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A domain record with free-form fields.
///
/// The automation core does not interpret field contents beyond dot-path
/// navigation; schemas are the host application's concern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityRecord {
    pub id: String,
    pub kind: EntityKind,
    pub fields: Map<String, Value>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
