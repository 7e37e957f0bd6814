//! In-memory mock implementations for the automation ports
//!
//! Deterministic stand-ins for the persistence and outbound ports,
//! enabling engine and dispatcher tests without infrastructure.

// Not every test binary exercises every helper.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use relay_core::{
    EmailDispatcher, EntityStore, ExecutionRepository, HttpCallOutcome, HttpDispatcher,
    OutboundRequest, WorkflowRepository,
};
use relay_domain::{
    EntityKind, EntityRecord, ExecutionStatus, OutgoingEmail, RelayError,
    Result as DomainResult, WorkflowDefinition, WorkflowExecution,
};
use serde_json::{Map, Value};

/// In-memory mock for `WorkflowRepository`.
#[derive(Default)]
pub struct InMemoryWorkflowRepository {
    workflows: Mutex<HashMap<String, WorkflowDefinition>>,
}

impl InMemoryWorkflowRepository {
    pub fn with_workflows(workflows: Vec<WorkflowDefinition>) -> Self {
        let map = workflows.into_iter().map(|wf| (wf.id.clone(), wf)).collect();
        Self { workflows: Mutex::new(map) }
    }
}

#[async_trait]
impl WorkflowRepository for InMemoryWorkflowRepository {
    async fn get_workflow(&self, id: &str) -> DomainResult<Option<WorkflowDefinition>> {
        Ok(self.workflows.lock().expect("lock").get(id).cloned())
    }

    async fn list_active_workflows(&self) -> DomainResult<Vec<WorkflowDefinition>> {
        let mut active: Vec<WorkflowDefinition> = self
            .workflows
            .lock()
            .expect("lock")
            .values()
            .filter(|wf| wf.active)
            .cloned()
            .collect();
        active.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(active)
    }

    async fn save_workflow(&self, workflow: &WorkflowDefinition) -> DomainResult<()> {
        self.workflows.lock().expect("lock").insert(workflow.id.clone(), workflow.clone());
        Ok(())
    }

    async fn delete_workflow(&self, id: &str) -> DomainResult<()> {
        self.workflows.lock().expect("lock").remove(id);
        Ok(())
    }
}

/// In-memory mock for `ExecutionRepository`.
///
/// Enforces the terminal-state invariant the SQL implementation gets
/// from its status-guarded UPDATE.
#[derive(Default)]
pub struct InMemoryExecutionRepository {
    executions: Mutex<HashMap<String, WorkflowExecution>>,
}

impl InMemoryExecutionRepository {
    pub fn all(&self) -> Vec<WorkflowExecution> {
        self.executions.lock().expect("lock").values().cloned().collect()
    }

    /// Poll until the execution leaves `Running`, panicking after ~2s.
    pub async fn wait_for_terminal(&self, execution_id: &str) -> WorkflowExecution {
        for _ in 0..200 {
            if let Some(execution) = self.executions.lock().expect("lock").get(execution_id) {
                if execution.status != ExecutionStatus::Running {
                    return execution.clone();
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("execution {execution_id} never reached a terminal state");
    }

    /// Poll until exactly `count` terminal executions exist.
    pub async fn wait_for_terminal_count(&self, count: usize) -> Vec<WorkflowExecution> {
        for _ in 0..200 {
            let terminal: Vec<WorkflowExecution> = self
                .all()
                .into_iter()
                .filter(|execution| execution.status != ExecutionStatus::Running)
                .collect();
            if terminal.len() >= count {
                return terminal;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("never observed {count} terminal executions");
    }
}

#[async_trait]
impl ExecutionRepository for InMemoryExecutionRepository {
    async fn insert_execution(&self, execution: &WorkflowExecution) -> DomainResult<()> {
        self.executions.lock().expect("lock").insert(execution.id.clone(), execution.clone());
        Ok(())
    }

    async fn mark_completed(
        &self,
        id: &str,
        result: &Value,
        completed_at: DateTime<Utc>,
    ) -> DomainResult<()> {
        let mut executions = self.executions.lock().expect("lock");
        let execution = executions
            .get_mut(id)
            .ok_or_else(|| RelayError::NotFound(format!("execution {id} not found")))?;
        if execution.status != ExecutionStatus::Running {
            return Err(RelayError::Database(format!("execution {id} already terminal")));
        }
        execution.status = ExecutionStatus::Completed;
        execution.result = Some(result.clone());
        execution.completed_at = Some(completed_at);
        Ok(())
    }

    async fn mark_failed(
        &self,
        id: &str,
        error: &str,
        completed_at: DateTime<Utc>,
    ) -> DomainResult<()> {
        let mut executions = self.executions.lock().expect("lock");
        let execution = executions
            .get_mut(id)
            .ok_or_else(|| RelayError::NotFound(format!("execution {id} not found")))?;
        if execution.status != ExecutionStatus::Running {
            return Err(RelayError::Database(format!("execution {id} already terminal")));
        }
        execution.status = ExecutionStatus::Failed;
        execution.error = Some(error.to_string());
        execution.completed_at = Some(completed_at);
        Ok(())
    }

    async fn get_execution(&self, id: &str) -> DomainResult<Option<WorkflowExecution>> {
        Ok(self.executions.lock().expect("lock").get(id).cloned())
    }

    async fn list_executions(&self, workflow_id: &str) -> DomainResult<Vec<WorkflowExecution>> {
        let mut executions: Vec<WorkflowExecution> = self
            .executions
            .lock()
            .expect("lock")
            .values()
            .filter(|execution| execution.workflow_id == workflow_id)
            .cloned()
            .collect();
        executions.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(executions)
    }
}

/// In-memory mock for `EntityStore` with sequential ids and a creation log.
#[derive(Default)]
pub struct InMemoryEntityStore {
    records: Mutex<HashMap<String, EntityRecord>>,
    creation_log: Mutex<Vec<EntityRecord>>,
    next_id: AtomicUsize,
}

impl InMemoryEntityStore {
    /// Records created through the store, in creation order.
    pub fn created(&self) -> Vec<EntityRecord> {
        self.creation_log.lock().expect("lock").clone()
    }

    pub fn created_of_kind(&self, kind: EntityKind) -> Vec<EntityRecord> {
        self.created().into_iter().filter(|record| record.kind == kind).collect()
    }

    pub fn get(&self, id: &str) -> Option<EntityRecord> {
        self.records.lock().expect("lock").get(id).cloned()
    }

    /// Seed a record directly, bypassing the creation log.
    pub fn seed(&self, record: EntityRecord) {
        self.records.lock().expect("lock").insert(record.id.clone(), record);
    }
}

#[async_trait]
impl EntityStore for InMemoryEntityStore {
    async fn create_record(
        &self,
        kind: EntityKind,
        fields: Map<String, Value>,
    ) -> DomainResult<EntityRecord> {
        let sequence = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let now = Utc::now();
        let record = EntityRecord {
            id: format!("{}-{}", kind.as_str(), sequence),
            kind,
            fields,
            tags: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        self.records.lock().expect("lock").insert(record.id.clone(), record.clone());
        self.creation_log.lock().expect("lock").push(record.clone());
        Ok(record)
    }

    async fn update_record(
        &self,
        kind: EntityKind,
        id: &str,
        fields: Map<String, Value>,
    ) -> DomainResult<()> {
        let mut records = self.records.lock().expect("lock");
        let record = records
            .get_mut(id)
            .filter(|record| record.kind == kind)
            .ok_or_else(|| RelayError::NotFound(format!("{kind} {id} not found")))?;
        for (key, value) in fields {
            record.fields.insert(key, value);
        }
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn delete_record(&self, kind: EntityKind, id: &str) -> DomainResult<()> {
        let mut records = self.records.lock().expect("lock");
        match records.remove(id) {
            Some(record) if record.kind == kind => Ok(()),
            Some(record) => {
                records.insert(id.to_string(), record);
                Err(RelayError::NotFound(format!("{kind} {id} not found")))
            }
            None => Err(RelayError::NotFound(format!("{kind} {id} not found"))),
        }
    }

    async fn find_record(&self, kind: EntityKind, id: &str) -> DomainResult<Option<EntityRecord>> {
        Ok(self
            .records
            .lock()
            .expect("lock")
            .get(id)
            .filter(|record| record.kind == kind)
            .cloned())
    }

    async fn add_tag(&self, kind: EntityKind, id: &str, tag: &str) -> DomainResult<()> {
        let mut records = self.records.lock().expect("lock");
        let record = records
            .get_mut(id)
            .filter(|record| record.kind == kind)
            .ok_or_else(|| RelayError::NotFound(format!("{kind} {id} not found")))?;
        if !record.tags.iter().any(|existing| existing == tag) {
            record.tags.push(tag.to_string());
        }
        Ok(())
    }

    async fn remove_tag(&self, kind: EntityKind, id: &str, tag: &str) -> DomainResult<()> {
        let mut records = self.records.lock().expect("lock");
        let record = records
            .get_mut(id)
            .filter(|record| record.kind == kind)
            .ok_or_else(|| RelayError::NotFound(format!("{kind} {id} not found")))?;
        record.tags.retain(|existing| existing != tag);
        Ok(())
    }
}

/// Recording mock for `EmailDispatcher`.
#[derive(Default)]
pub struct RecordingEmailDispatcher {
    sent: Mutex<Vec<OutgoingEmail>>,
}

impl RecordingEmailDispatcher {
    pub fn sent(&self) -> Vec<OutgoingEmail> {
        self.sent.lock().expect("lock").clone()
    }
}

#[async_trait]
impl EmailDispatcher for RecordingEmailDispatcher {
    async fn send(&self, email: &OutgoingEmail) -> DomainResult<String> {
        let mut sent = self.sent.lock().expect("lock");
        sent.push(email.clone());
        Ok(format!("msg-{}", sent.len()))
    }
}

/// Scripted mock for `HttpDispatcher`.
///
/// Pops queued responses in order; defaults to `200 {}` once exhausted.
#[derive(Default)]
pub struct ScriptedHttpDispatcher {
    responses: Mutex<VecDeque<(u16, Value)>>,
    requests: Mutex<Vec<OutboundRequest>>,
}

impl ScriptedHttpDispatcher {
    pub fn with_responses(responses: Vec<(u16, Value)>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<OutboundRequest> {
        self.requests.lock().expect("lock").clone()
    }
}

#[async_trait]
impl HttpDispatcher for ScriptedHttpDispatcher {
    async fn dispatch(&self, request: &OutboundRequest) -> DomainResult<HttpCallOutcome> {
        self.requests.lock().expect("lock").push(request.clone());
        let (status, body) = self
            .responses
            .lock()
            .expect("lock")
            .pop_front()
            .unwrap_or((200, Value::Object(Map::new())));
        Ok(HttpCallOutcome { status, body })
    }
}

/// Assemble an engine plus handles to every mock.
pub struct TestHarness {
    pub engine: Arc<relay_core::WorkflowEngine>,
    pub workflows: Arc<InMemoryWorkflowRepository>,
    pub executions: Arc<InMemoryExecutionRepository>,
    pub entities: Arc<InMemoryEntityStore>,
    pub mailer: Arc<RecordingEmailDispatcher>,
    pub http: Arc<ScriptedHttpDispatcher>,
}

impl TestHarness {
    pub fn new(workflows: Vec<WorkflowDefinition>) -> Self {
        Self::with_http_responses(workflows, Vec::new())
    }

    pub fn with_http_responses(
        workflows: Vec<WorkflowDefinition>,
        responses: Vec<(u16, Value)>,
    ) -> Self {
        let workflows = Arc::new(InMemoryWorkflowRepository::with_workflows(workflows));
        let executions = Arc::new(InMemoryExecutionRepository::default());
        let entities = Arc::new(InMemoryEntityStore::default());
        let mailer = Arc::new(RecordingEmailDispatcher::default());
        let http = Arc::new(ScriptedHttpDispatcher::with_responses(responses));

        let engine = Arc::new(relay_core::WorkflowEngine::new(
            Arc::clone(&workflows) as Arc<dyn WorkflowRepository>,
            Arc::clone(&executions) as Arc<dyn ExecutionRepository>,
            Arc::clone(&entities) as Arc<dyn EntityStore>,
            Arc::clone(&mailer) as Arc<dyn EmailDispatcher>,
            Arc::clone(&http) as Arc<dyn HttpDispatcher>,
        ));

        Self { engine, workflows, executions, entities, mailer, http }
    }
}
