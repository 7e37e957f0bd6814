//! Workflow definition and execution model.
//!
//! Action payloads are typed per kind so malformed configurations fail
//! when a workflow is loaded, not in the middle of a run.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::entity::EntityKind;

/// Kind of domain event a trigger reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerType {
    RecordCreated,
    RecordUpdated,
    RecordDeleted,
    Schedule,
    Webhook,
    Manual,
}

impl std::fmt::Display for TriggerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self {
            Self::RecordCreated => "RECORD_CREATED",
            Self::RecordUpdated => "RECORD_UPDATED",
            Self::RecordDeleted => "RECORD_DELETED",
            Self::Schedule => "SCHEDULE",
            Self::Webhook => "WEBHOOK",
            Self::Manual => "MANUAL",
        };
        f.write_str(tag)
    }
}

/// Trigger configuration. Exactly one variant is active per workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerConfig {
    RecordCreated {
        entity: EntityKind,
        /// Field-equality filters applied to the event payload
        #[serde(default)]
        filters: BTreeMap<String, Value>,
    },
    RecordUpdated {
        entity: EntityKind,
        #[serde(default)]
        filters: BTreeMap<String, Value>,
    },
    RecordDeleted {
        entity: EntityKind,
        #[serde(default)]
        filters: BTreeMap<String, Value>,
    },
    Schedule {
        /// Cron expression, evaluated by the schedule runner
        cron: String,
        timezone: String,
    },
    Webhook {
        path: String,
        method: String,
    },
    Manual,
}

impl TriggerConfig {
    /// The event kind this trigger reacts to
    pub fn trigger_type(&self) -> TriggerType {
        match self {
            Self::RecordCreated { .. } => TriggerType::RecordCreated,
            Self::RecordUpdated { .. } => TriggerType::RecordUpdated,
            Self::RecordDeleted { .. } => TriggerType::RecordDeleted,
            Self::Schedule { .. } => TriggerType::Schedule,
            Self::Webhook { .. } => TriggerType::Webhook,
            Self::Manual => TriggerType::Manual,
        }
    }

    /// Entity filter, for the record-event variants
    pub fn entity(&self) -> Option<EntityKind> {
        match self {
            Self::RecordCreated { entity, .. }
            | Self::RecordUpdated { entity, .. }
            | Self::RecordDeleted { entity, .. } => Some(*entity),
            _ => None,
        }
    }

    /// Field-equality filters, for the record-event variants
    pub fn filters(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Self::RecordCreated { filters, .. }
            | Self::RecordUpdated { filters, .. }
            | Self::RecordDeleted { filters, .. } => Some(filters),
            _ => None,
        }
    }
}

/// Comparison operator for action guard conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    Contains,
    GreaterThan,
    LessThan,
}

/// Guard condition gating a single action.
///
/// `field` is a dot path resolved against the execution context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub operator: ConditionOperator,
    pub value: Value,
}

/// Insert a domain record of the configured entity kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateRecordAction {
    pub entity: EntityKind,
    #[serde(default)]
    pub fields: Map<String, Value>,
}

/// Patch a record by id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateRecordAction {
    pub entity: EntityKind,
    pub record_id: String,
    #[serde(default)]
    pub fields: Map<String, Value>,
}

/// Remove a record by id (hard delete)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteRecordAction {
    pub entity: EntityKind,
    pub record_id: String,
}

/// Resolve recipients/subject/body and dispatch a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendEmailAction {
    /// Recipient address; multiple recipients are comma-separated
    pub to: String,
    pub subject: String,
    pub body: String,
    /// Treat `body` as HTML instead of plain text
    #[serde(default)]
    pub html: bool,
}

/// Perform an outbound HTTP call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpRequestAction {
    pub url: String,
    #[serde(default = "default_http_method")]
    pub method: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    pub body: Option<Value>,
}

fn default_http_method() -> String {
    "POST".to_string()
}

/// Suspend the pipeline for a number of seconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayAction {
    pub seconds: u64,
}

/// Mutate a tag association on a record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagAction {
    pub entity: EntityKind,
    pub record_id: String,
    pub tag: String,
}

/// Create a task record with optional linkage to another record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateTaskAction {
    pub title: String,
    pub description: Option<String>,
    pub due_date: Option<String>,
    pub related_entity: Option<EntityKind>,
    pub related_id: Option<String>,
}

/// Attach a note to a company, contact, or deal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddNoteAction {
    pub entity: EntityKind,
    pub record_id: String,
    pub content: String,
}

/// Action payload, discriminated by kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionKind {
    CreateRecord(CreateRecordAction),
    UpdateRecord(UpdateRecordAction),
    DeleteRecord(DeleteRecordAction),
    SendEmail(SendEmailAction),
    HttpRequest(HttpRequestAction),
    Delay(DelayAction),
    /// No direct effect; exists so a guard can gate the next action
    Condition,
    AddTag(TagAction),
    RemoveTag(TagAction),
    CreateTask(CreateTaskAction),
    AddNote(AddNoteAction),
}

/// One ordered, optionally guarded step in a workflow pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionConfig {
    /// Execution position; ties break by declaration order
    pub order: i32,
    /// Guard condition; a false guard skips the action without aborting
    pub condition: Option<Condition>,
    #[serde(flatten)]
    pub kind: ActionKind,
}

/// A user-defined trigger/action pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: String,
    pub name: String,
    pub active: bool,
    pub trigger: TriggerConfig,
    /// May be empty (a no-op workflow)
    #[serde(default)]
    pub actions: Vec<ActionConfig>,
}

/// Terminal and non-terminal states of a workflow run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self {
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        };
        f.write_str(tag)
    }
}

/// Durable record of a single workflow run.
///
/// Created in `Running` state when a run starts and updated exactly once
/// at run end. Terminal states are immutable; retention is the host
/// application's concern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub id: String,
    pub workflow_id: String,
    pub status: ExecutionStatus,
    pub trigger_data: Value,
    /// Final variable-bag snapshot, set on completion
    pub result: Option<Value>,
    /// Error message, set on failure
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowExecution {
    /// New execution in `Running` state
    pub fn started(workflow_id: &str, trigger_data: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            workflow_id: workflow_id.to_string(),
            status: ExecutionStatus::Running,
            trigger_data,
            result: None,
            error: None,
            started_at: Utc::now(),
            completed_at: None,
        }
    }
}
