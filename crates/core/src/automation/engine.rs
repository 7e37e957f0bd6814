//! Workflow execution engine - core business logic
//!
//! Runs a workflow's action pipeline strictly sequentially, evaluating
//! per-action guards and growing a variable bag that later actions and
//! templates can reference. Every run leaves a durable execution record:
//! `Running` at start, then exactly one transition to `Completed` or
//! `Failed`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use relay_domain::{
    ActionConfig, ActionKind, EntityKind, OutgoingEmail, RelayError, Result, WorkflowExecution,
};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use super::condition::evaluate_condition;
use super::interpolate::{interpolate, interpolate_value};
use super::ports::{
    EmailDispatcher, EntityStore, ExecutionRepository, HttpDispatcher, OutboundRequest,
    WorkflowRepository,
};

/// Result surfaced by the manual "run now" API
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub execution_id: Option<String>,
    pub error: Option<String>,
}

/// Workflow execution engine
pub struct WorkflowEngine {
    workflows: Arc<dyn WorkflowRepository>,
    executions: Arc<dyn ExecutionRepository>,
    entities: Arc<dyn EntityStore>,
    mailer: Arc<dyn EmailDispatcher>,
    http: Arc<dyn HttpDispatcher>,
}

impl WorkflowEngine {
    /// Create a new engine over the host's ports
    pub fn new(
        workflows: Arc<dyn WorkflowRepository>,
        executions: Arc<dyn ExecutionRepository>,
        entities: Arc<dyn EntityStore>,
        mailer: Arc<dyn EmailDispatcher>,
        http: Arc<dyn HttpDispatcher>,
    ) -> Self {
        Self { workflows, executions, entities, mailer, http }
    }

    /// Execute a workflow against the given trigger payload.
    ///
    /// Missing or inactive workflows fail without creating an execution
    /// record. Otherwise a `Running` record is created up front and
    /// transitioned exactly once at run end; action errors are captured
    /// on the record and then propagated to the caller.
    pub async fn execute(&self, workflow_id: &str, trigger_data: Value) -> Result<String> {
        let workflow = self
            .workflows
            .get_workflow(workflow_id)
            .await?
            .ok_or_else(|| RelayError::NotFound(format!("workflow {workflow_id} not found")))?;

        if !workflow.active {
            return Err(RelayError::InvalidInput(format!(
                "workflow {workflow_id} is not active"
            )));
        }

        let execution = WorkflowExecution::started(&workflow.id, trigger_data.clone());
        self.executions.insert_execution(&execution).await?;

        info!(workflow_id, execution_id = %execution.id, "workflow execution started");

        // Seed the variable bag with a shallow copy of the trigger payload.
        let mut bag: Map<String, Value> = match trigger_data {
            Value::Object(map) => map,
            _ => Map::new(),
        };

        // `order` is the only sequencing signal; the stable sort keeps
        // declaration order for ties.
        let mut actions: Vec<&ActionConfig> = workflow.actions.iter().collect();
        actions.sort_by_key(|action| action.order);

        match self.run_actions(&actions, &mut bag).await {
            Ok(()) => {
                self.executions
                    .mark_completed(&execution.id, &Value::Object(bag), Utc::now())
                    .await?;
                info!(workflow_id, execution_id = %execution.id, "workflow execution completed");
                Ok(execution.id)
            }
            Err(err) => {
                self.executions.mark_failed(&execution.id, &err.to_string(), Utc::now()).await?;
                warn!(workflow_id, execution_id = %execution.id, error = %err, "workflow execution failed");
                Err(err)
            }
        }
    }

    async fn run_actions(
        &self,
        actions: &[&ActionConfig],
        bag: &mut Map<String, Value>,
    ) -> Result<()> {
        for action in actions {
            let context = Value::Object(bag.clone());

            if let Some(condition) = &action.condition {
                if !evaluate_condition(condition, &context) {
                    debug!(order = action.order, "guard condition false, skipping action");
                    continue;
                }
            }

            self.apply_action(&action.kind, &context, bag).await?;
        }
        Ok(())
    }

    async fn apply_action(
        &self,
        kind: &ActionKind,
        context: &Value,
        bag: &mut Map<String, Value>,
    ) -> Result<()> {
        match kind {
            ActionKind::CreateRecord(action) => {
                let fields = interpolate_fields(&action.fields, context);
                let record = self.entities.create_record(action.entity, fields).await?;
                bag.insert(action.entity.bag_key().to_string(), Value::String(record.id));
            }
            ActionKind::UpdateRecord(action) => {
                let id = interpolate(&action.record_id, context);
                let fields = interpolate_fields(&action.fields, context);
                self.entities.update_record(action.entity, &id, fields).await?;
            }
            ActionKind::DeleteRecord(action) => {
                let id = interpolate(&action.record_id, context);
                self.entities.delete_record(action.entity, &id).await?;
            }
            ActionKind::SendEmail(action) => {
                let to: Vec<String> = interpolate(&action.to, context)
                    .split(',')
                    .map(str::trim)
                    .filter(|addr| !addr.is_empty())
                    .map(str::to_string)
                    .collect();
                let subject = interpolate(&action.subject, context);
                let body = interpolate(&action.body, context);

                let email = OutgoingEmail {
                    to: to.clone(),
                    subject: subject.clone(),
                    body_text: (!action.html).then(|| body.clone()),
                    body_html: action.html.then(|| body.clone()),
                    ..OutgoingEmail::default()
                };
                self.mailer.send(&email).await?;

                bag.insert(
                    "last_email".to_string(),
                    serde_json::json!({"to": to, "subject": subject, "body": body}),
                );
            }
            ActionKind::HttpRequest(action) => {
                let request = OutboundRequest {
                    method: action.method.clone(),
                    url: interpolate(&action.url, context),
                    headers: action
                        .headers
                        .iter()
                        .map(|(name, value)| (name.clone(), interpolate(value, context)))
                        .collect(),
                    body: action.body.as_ref().map(|body| interpolate_value(body, context)),
                };

                let outcome = self.http.dispatch(&request).await?;

                // Non-2xx aborts the remaining pipeline for this run.
                if !(200..300).contains(&outcome.status) {
                    return Err(RelayError::Network(format!(
                        "HTTP request failed with status {}",
                        outcome.status
                    )));
                }

                bag.insert(
                    "http_response".to_string(),
                    serde_json::json!({"status": outcome.status, "body": outcome.body}),
                );
            }
            ActionKind::Delay(action) => {
                debug!(seconds = action.seconds, "delaying execution");
                // Suspends only this execution's action loop.
                tokio::time::sleep(Duration::from_secs(action.seconds)).await;
            }
            ActionKind::Condition => {
                // Guard-only step; the condition was evaluated above.
            }
            ActionKind::AddTag(action) => {
                let id = interpolate(&action.record_id, context);
                let tag = interpolate(&action.tag, context);
                self.entities.add_tag(action.entity, &id, &tag).await?;
            }
            ActionKind::RemoveTag(action) => {
                let id = interpolate(&action.record_id, context);
                let tag = interpolate(&action.tag, context);
                self.entities.remove_tag(action.entity, &id, &tag).await?;
            }
            ActionKind::CreateTask(action) => {
                let mut fields = Map::new();
                fields.insert("title".into(), Value::String(interpolate(&action.title, context)));
                if let Some(description) = &action.description {
                    fields.insert(
                        "description".into(),
                        Value::String(interpolate(description, context)),
                    );
                }
                if let Some(due_date) = &action.due_date {
                    fields.insert("due_date".into(), Value::String(interpolate(due_date, context)));
                }
                if let Some(related_entity) = action.related_entity {
                    fields.insert(
                        "related_entity".into(),
                        Value::String(related_entity.as_str().to_string()),
                    );
                }
                if let Some(related_id) = &action.related_id {
                    fields.insert(
                        "related_id".into(),
                        Value::String(interpolate(related_id, context)),
                    );
                }

                let record = self.entities.create_record(EntityKind::Task, fields).await?;
                bag.insert(EntityKind::Task.bag_key().to_string(), Value::String(record.id));
            }
            ActionKind::AddNote(action) => {
                // Notes attach to exactly one of company/contact/deal.
                if !matches!(
                    action.entity,
                    EntityKind::Company | EntityKind::Contact | EntityKind::Deal
                ) {
                    return Err(RelayError::InvalidInput(format!(
                        "notes cannot be attached to {} records",
                        action.entity
                    )));
                }

                let mut fields = Map::new();
                fields
                    .insert("content".into(), Value::String(interpolate(&action.content, context)));
                fields.insert(
                    "related_entity".into(),
                    Value::String(action.entity.as_str().to_string()),
                );
                fields.insert(
                    "related_id".into(),
                    Value::String(interpolate(&action.record_id, context)),
                );

                let record = self.entities.create_record(EntityKind::Note, fields).await?;
                bag.insert(EntityKind::Note.bag_key().to_string(), Value::String(record.id));
            }
        }
        Ok(())
    }
}

fn interpolate_fields(fields: &Map<String, Value>, context: &Value) -> Map<String, Value> {
    fields.iter().map(|(key, value)| (key.clone(), interpolate_value(value, context))).collect()
}
