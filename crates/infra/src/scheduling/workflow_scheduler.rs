//! Schedule-trigger runner for workflows.
//!
//! Registers one cron job per active schedule-trigger workflow and
//! fires the trigger dispatcher on every tick. Join handles are
//! tracked, cancellation is explicit, and start/stop are bounded by
//! timeouts. Cron expressions are evaluated in UTC; a configured
//! trigger timezone other than UTC is logged so operators notice.

use std::sync::Arc;
use std::time::Duration;

use relay_core::{TriggerDispatcher, WorkflowRepository};
use relay_domain::{TriggerConfig, TriggerType};
use serde_json::json;
use tokio::task::JoinHandle;
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::error::{SchedulerError, SchedulerResult};

/// Configuration for the workflow scheduler.
#[derive(Debug, Clone)]
pub struct WorkflowSchedulerConfig {
    /// Timeout for starting the underlying scheduler.
    pub start_timeout: Duration,
    /// Timeout for stopping the scheduler.
    pub stop_timeout: Duration,
    /// Timeout for awaiting the monitor task join handle.
    pub join_timeout: Duration,
}

impl Default for WorkflowSchedulerConfig {
    fn default() -> Self {
        Self {
            start_timeout: Duration::from_secs(5),
            stop_timeout: Duration::from_secs(5),
            join_timeout: Duration::from_secs(5),
        }
    }
}

/// Cron runner for schedule-trigger workflows.
pub struct WorkflowScheduler {
    dispatcher: Arc<TriggerDispatcher>,
    workflows: Arc<dyn WorkflowRepository>,
    config: WorkflowSchedulerConfig,
    scheduler: Option<JobScheduler>,
    monitor_handle: Option<JoinHandle<()>>,
    cancellation: CancellationToken,
}

impl WorkflowScheduler {
    /// Create a scheduler with default timeouts.
    pub fn new(dispatcher: Arc<TriggerDispatcher>, workflows: Arc<dyn WorkflowRepository>) -> Self {
        Self::with_config(WorkflowSchedulerConfig::default(), dispatcher, workflows)
    }

    /// Create a scheduler with explicit timeouts.
    pub fn with_config(
        config: WorkflowSchedulerConfig,
        dispatcher: Arc<TriggerDispatcher>,
        workflows: Arc<dyn WorkflowRepository>,
    ) -> Self {
        Self {
            dispatcher,
            workflows,
            config,
            scheduler: None,
            monitor_handle: None,
            cancellation: CancellationToken::new(),
        }
    }

    /// Returns true when a scheduler instance is active.
    pub fn is_running(&self) -> bool {
        self.scheduler.is_some()
    }

    /// Start the scheduler, registering one job per schedule workflow.
    #[instrument(skip(self))]
    pub async fn start(&mut self) -> SchedulerResult<()> {
        if self.is_running() {
            return Err(SchedulerError::AlreadyRunning);
        }

        self.cancellation = CancellationToken::new();

        let scheduler_instance = self.build_scheduler().await?;
        let start_timeout = self.config.start_timeout;

        tokio::time::timeout(start_timeout, scheduler_instance.start())
            .await
            .map_err(|_| SchedulerError::Timeout { seconds: start_timeout.as_secs() })?
            .map_err(|source| SchedulerError::StartFailed(source.to_string()))?;

        self.scheduler = Some(scheduler_instance);

        let cancel = self.cancellation.clone();
        self.monitor_handle = Some(tokio::spawn(async move {
            cancel.cancelled().await;
            debug!("workflow scheduler monitor cancelled");
        }));

        info!("workflow scheduler started");
        Ok(())
    }

    /// Stop the scheduler and wait for the monitor task to finish.
    #[instrument(skip(self))]
    pub async fn stop(&mut self) -> SchedulerResult<()> {
        if !self.is_running() {
            return Err(SchedulerError::NotRunning);
        }

        self.cancellation.cancel();

        let mut scheduler = match self.scheduler.take() {
            Some(scheduler) => scheduler,
            None => return Err(SchedulerError::NotRunning),
        };

        let stop_timeout = self.config.stop_timeout;
        tokio::time::timeout(stop_timeout, async move { scheduler.shutdown().await })
            .await
            .map_err(|_| SchedulerError::Timeout { seconds: stop_timeout.as_secs() })?
            .map_err(|source| SchedulerError::StopFailed(source.to_string()))?;

        if let Some(handle) = self.monitor_handle.take() {
            let join_timeout = self.config.join_timeout;
            tokio::time::timeout(join_timeout, handle)
                .await
                .map_err(|_| SchedulerError::Timeout { seconds: join_timeout.as_secs() })?
                .map_err(|source| SchedulerError::TaskJoinFailed(source.to_string()))?;
        }

        info!("workflow scheduler stopped");
        self.cancellation = CancellationToken::new();
        Ok(())
    }

    async fn build_scheduler(&self) -> SchedulerResult<JobScheduler> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|source| SchedulerError::CreationFailed(source.to_string()))?;

        let workflows = self
            .workflows
            .list_active_workflows()
            .await
            .map_err(|source| SchedulerError::WorkflowLoadFailed(source.to_string()))?;

        let mut registered = 0usize;
        for workflow in workflows {
            let TriggerConfig::Schedule { cron, timezone } = &workflow.trigger else {
                continue;
            };
            if !timezone.is_empty() && !timezone.eq_ignore_ascii_case("UTC") {
                warn!(
                    workflow_id = %workflow.id,
                    timezone,
                    "schedule triggers are evaluated in UTC; configured timezone is ignored"
                );
            }

            let dispatcher = Arc::clone(&self.dispatcher);
            let workflow_id = workflow.id.clone();

            let job = Job::new_async(cron.as_str(), move |_id, _lock| {
                let dispatcher = Arc::clone(&dispatcher);
                let workflow_id = workflow_id.clone();

                Box::pin(async move {
                    debug!(workflow_id = %workflow_id, "schedule tick");
                    let payload = json!({"workflow_id": workflow_id.as_str()});
                    if let Err(err) =
                        dispatcher.trigger_workflow(TriggerType::Schedule, None, payload).await
                    {
                        error!(workflow_id = %workflow_id, error = %err, "schedule tick dispatch failed");
                    }
                })
            })
            .map_err(|source| SchedulerError::JobRegistrationFailed(source.to_string()))?;

            scheduler
                .add(job)
                .await
                .map_err(|source| SchedulerError::JobRegistrationFailed(source.to_string()))?;
            registered += 1;
            debug!(workflow_id = %workflow.id, cron, "registered schedule job");
        }

        info!(registered, "schedule jobs registered");
        Ok(scheduler)
    }
}
