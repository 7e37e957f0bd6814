//! Trigger dispatcher - entry point for domain events
//!
//! Filters active workflows against an incoming event and hands each
//! match to the engine on its own task. One workflow's failure never
//! blocks or fails another's dispatch for the same event.

use std::sync::Arc;

use relay_domain::{EntityKind, Result, TriggerConfig, TriggerType, WorkflowDefinition};
use serde_json::Value;
use tracing::{debug, error, info};

use super::condition::loose_equals;
use super::engine::{ExecutionOutcome, WorkflowEngine};
use super::interpolate::resolve_path;
use super::ports::WorkflowRepository;

/// Trigger dispatcher
pub struct TriggerDispatcher {
    engine: Arc<WorkflowEngine>,
    workflows: Arc<dyn WorkflowRepository>,
}

impl TriggerDispatcher {
    /// Create a new dispatcher over the engine and workflow storage
    pub fn new(engine: Arc<WorkflowEngine>, workflows: Arc<dyn WorkflowRepository>) -> Self {
        Self { engine, workflows }
    }

    /// Fire-and-forget entry point for domain events.
    ///
    /// Matching workflows are executed asynchronously and independently;
    /// failures are observable only via their execution records. Returns
    /// the number of workflows dispatched.
    pub async fn trigger_workflow(
        &self,
        trigger_type: TriggerType,
        entity: Option<EntityKind>,
        payload: Value,
    ) -> Result<usize> {
        let workflows = self.workflows.list_active_workflows().await?;

        let matched: Vec<WorkflowDefinition> = workflows
            .into_iter()
            .filter(|workflow| workflow_matches(workflow, trigger_type, entity, &payload))
            .collect();

        debug!(%trigger_type, matched = matched.len(), "dispatching domain event");

        let count = matched.len();
        for workflow in matched {
            let engine = Arc::clone(&self.engine);
            let data = payload.clone();
            let workflow_id = workflow.id.clone();

            // Each match runs inside its own error boundary: log and move on.
            tokio::spawn(async move {
                if let Err(err) = engine.execute(&workflow_id, data).await {
                    error!(workflow_id, error = %err, "dispatched workflow execution failed");
                }
            });
        }

        Ok(count)
    }

    /// Synchronous "run now" entry point for UI-driven invocations.
    pub async fn execute_workflow(&self, workflow_id: &str) -> ExecutionOutcome {
        match self.engine.execute(workflow_id, Value::Object(serde_json::Map::new())).await {
            Ok(execution_id) => {
                info!(workflow_id, execution_id, "manual workflow execution succeeded");
                ExecutionOutcome {
                    success: true,
                    execution_id: Some(execution_id),
                    error: None,
                }
            }
            Err(err) => ExecutionOutcome {
                success: false,
                execution_id: None,
                error: Some(err.to_string()),
            },
        }
    }
}

/// Does a workflow's trigger match the incoming event?
fn workflow_matches(
    workflow: &WorkflowDefinition,
    trigger_type: TriggerType,
    entity: Option<EntityKind>,
    payload: &Value,
) -> bool {
    if workflow.trigger.trigger_type() != trigger_type {
        return false;
    }

    match &workflow.trigger {
        TriggerConfig::RecordCreated { entity: wanted, filters }
        | TriggerConfig::RecordUpdated { entity: wanted, filters }
        | TriggerConfig::RecordDeleted { entity: wanted, filters } => {
            if entity != Some(*wanted) {
                return false;
            }
            filters.iter().all(|(field, expected)| {
                let resolved = resolve_path(payload, field).unwrap_or(Value::Null);
                loose_equals(&resolved, expected)
            })
        }
        TriggerConfig::Webhook { path, method } => {
            let event_path = payload.get("path").and_then(Value::as_str).unwrap_or_default();
            let event_method = payload.get("method").and_then(Value::as_str).unwrap_or_default();
            event_path == path && event_method.eq_ignore_ascii_case(method)
        }
        TriggerConfig::Schedule { .. } => {
            // Schedule ticks address a single workflow when the runner
            // includes its id; a bare tick matches every schedule trigger.
            match payload.get("workflow_id").and_then(Value::as_str) {
                Some(id) => id == workflow.id,
                None => true,
            }
        }
        TriggerConfig::Manual => true,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde_json::json;

    use super::*;

    fn workflow_with_trigger(trigger: TriggerConfig) -> WorkflowDefinition {
        WorkflowDefinition {
            id: "wf-1".to_string(),
            name: "test workflow".to_string(),
            active: true,
            trigger,
            actions: vec![],
        }
    }

    #[test]
    fn matches_on_trigger_type_and_entity() {
        let workflow = workflow_with_trigger(TriggerConfig::RecordCreated {
            entity: EntityKind::Contact,
            filters: BTreeMap::new(),
        });

        assert!(workflow_matches(
            &workflow,
            TriggerType::RecordCreated,
            Some(EntityKind::Contact),
            &json!({}),
        ));
        assert!(!workflow_matches(
            &workflow,
            TriggerType::RecordCreated,
            Some(EntityKind::Deal),
            &json!({}),
        ));
        assert!(!workflow_matches(
            &workflow,
            TriggerType::RecordUpdated,
            Some(EntityKind::Contact),
            &json!({}),
        ));
        assert!(!workflow_matches(&workflow, TriggerType::RecordCreated, None, &json!({})));
    }

    #[test]
    fn field_filters_must_equal_match() {
        let mut filters = BTreeMap::new();
        filters.insert("stage".to_string(), json!("won"));
        let workflow = workflow_with_trigger(TriggerConfig::RecordUpdated {
            entity: EntityKind::Deal,
            filters,
        });

        assert!(workflow_matches(
            &workflow,
            TriggerType::RecordUpdated,
            Some(EntityKind::Deal),
            &json!({"stage": "won"}),
        ));
        assert!(!workflow_matches(
            &workflow,
            TriggerType::RecordUpdated,
            Some(EntityKind::Deal),
            &json!({"stage": "lost"}),
        ));
        assert!(!workflow_matches(
            &workflow,
            TriggerType::RecordUpdated,
            Some(EntityKind::Deal),
            &json!({}),
        ));
    }

    #[test]
    fn webhook_matches_path_and_method() {
        let workflow = workflow_with_trigger(TriggerConfig::Webhook {
            path: "/hooks/deal".to_string(),
            method: "POST".to_string(),
        });

        assert!(workflow_matches(
            &workflow,
            TriggerType::Webhook,
            None,
            &json!({"path": "/hooks/deal", "method": "post"}),
        ));
        assert!(!workflow_matches(
            &workflow,
            TriggerType::Webhook,
            None,
            &json!({"path": "/hooks/other", "method": "POST"}),
        ));
    }

    #[test]
    fn schedule_tick_addresses_one_workflow_when_id_present() {
        let workflow = workflow_with_trigger(TriggerConfig::Schedule {
            cron: "0 0 * * * *".to_string(),
            timezone: "UTC".to_string(),
        });

        assert!(workflow_matches(
            &workflow,
            TriggerType::Schedule,
            None,
            &json!({"workflow_id": "wf-1"}),
        ));
        assert!(!workflow_matches(
            &workflow,
            TriggerType::Schedule,
            None,
            &json!({"workflow_id": "wf-2"}),
        ));
        assert!(workflow_matches(&workflow, TriggerType::Schedule, None, &json!({})));
    }
}
