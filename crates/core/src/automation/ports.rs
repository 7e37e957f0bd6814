//! Port interfaces for the automation engine
//!
//! The engine reads and writes workflow, execution, and domain records
//! through these traits; infrastructure provides the implementations.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use relay_domain::{
    EntityKind, EntityRecord, OutgoingEmail, Result, WorkflowDefinition, WorkflowExecution,
};
use serde_json::{Map, Value};

/// Trait for workflow definition storage
#[async_trait]
pub trait WorkflowRepository: Send + Sync {
    /// Get a workflow by id
    async fn get_workflow(&self, id: &str) -> Result<Option<WorkflowDefinition>>;

    /// List all workflows with the active flag set
    async fn list_active_workflows(&self) -> Result<Vec<WorkflowDefinition>>;

    /// Insert or replace a workflow definition
    async fn save_workflow(&self, workflow: &WorkflowDefinition) -> Result<()>;

    /// Remove a workflow definition
    async fn delete_workflow(&self, id: &str) -> Result<()>;
}

/// Trait for durable execution records
#[async_trait]
pub trait ExecutionRepository: Send + Sync {
    /// Insert a new execution row (always in `Running` state)
    async fn insert_execution(&self, execution: &WorkflowExecution) -> Result<()>;

    /// Transition a running execution to `Completed` with its result snapshot
    async fn mark_completed(
        &self,
        id: &str,
        result: &Value,
        completed_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Transition a running execution to `Failed` with an error message
    async fn mark_failed(&self, id: &str, error: &str, completed_at: DateTime<Utc>) -> Result<()>;

    /// Get an execution by id
    async fn get_execution(&self, id: &str) -> Result<Option<WorkflowExecution>>;

    /// List executions for a workflow, most recent first
    async fn list_executions(&self, workflow_id: &str) -> Result<Vec<WorkflowExecution>>;
}

/// Trait for generic domain-record persistence (host boundary)
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Insert a record and return it with its generated id
    async fn create_record(
        &self,
        kind: EntityKind,
        fields: Map<String, Value>,
    ) -> Result<EntityRecord>;

    /// Patch a record's fields; tolerant of no-op updates
    async fn update_record(
        &self,
        kind: EntityKind,
        id: &str,
        fields: Map<String, Value>,
    ) -> Result<()>;

    /// Hard-delete a record
    async fn delete_record(&self, kind: EntityKind, id: &str) -> Result<()>;

    /// Get a record by id
    async fn find_record(&self, kind: EntityKind, id: &str) -> Result<Option<EntityRecord>>;

    /// Add a tag to a record (idempotent)
    async fn add_tag(&self, kind: EntityKind, id: &str, tag: &str) -> Result<()>;

    /// Remove a tag from a record (idempotent)
    async fn remove_tag(&self, kind: EntityKind, id: &str, tag: &str) -> Result<()>;
}

/// Trait for outbound email dispatch.
///
/// Implementations delegate to the provider gateway or a logging stub.
#[async_trait]
pub trait EmailDispatcher: Send + Sync {
    /// Send a message and return its provider-assigned id
    async fn send(&self, email: &OutgoingEmail) -> Result<String>;
}

/// An outbound HTTP call requested by a workflow action
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: String,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Value>,
}

/// Result of an outbound HTTP call.
///
/// `body` holds parsed JSON when the response parses, else the raw text.
#[derive(Debug, Clone)]
pub struct HttpCallOutcome {
    pub status: u16,
    pub body: Value,
}

/// Trait for outbound HTTP requests issued by workflow actions.
///
/// Implementations return `Ok` for any HTTP response regardless of
/// status; only transport-level failures surface as errors. Status
/// policy is the engine's concern.
#[async_trait]
pub trait HttpDispatcher: Send + Sync {
    async fn dispatch(&self, request: &OutboundRequest) -> Result<HttpCallOutcome>;
}
