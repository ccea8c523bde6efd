// Workflow Engine - Ties the registry, dispatcher, executor and tracker together

use futures::FutureExt;
use guildflow_shared::{
    EngineStatistics, Execution, ExecutionError, ExecutionErrorKind, ExecutionOrigin,
    ExecutionReport, ExecutionStatus, ScopeId, TriggerType, Workflow, WorkflowDefinition,
    WorkflowFilter, WorkflowPatch, WorkflowStatus,
};
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::actions::ActionHandlerRegistry;
use super::executor::ActionPipelineExecutor;
use super::registry::WorkflowRegistry;
use super::tracker::ExecutionTracker;
use super::triggers::TriggerEvent;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::store::WorkflowStore;

pub struct WorkflowEngine {
    registry: WorkflowRegistry,
    tracker: Arc<ExecutionTracker>,
    executor: Arc<ActionPipelineExecutor>,
    config: EngineConfig,
}

impl WorkflowEngine {
    pub fn new(
        handlers: ActionHandlerRegistry,
        config: EngineConfig,
        store: Option<Arc<dyn WorkflowStore>>,
    ) -> Self {
        let handlers = Arc::new(handlers);

        Self {
            registry: WorkflowRegistry::new(handlers.clone(), store),
            tracker: Arc::new(ExecutionTracker::new(config.retention.clone())),
            executor: Arc::new(ActionPipelineExecutor::new(
                handlers,
                config.default_action_timeout,
            )),
            config,
        }
    }

    pub fn registry(&self) -> &WorkflowRegistry {
        &self.registry
    }

    pub fn tracker(&self) -> &ExecutionTracker {
        &self.tracker
    }

    /// Reload all workflows from the store
    pub async fn reload_workflows(&self) -> EngineResult<usize> {
        self.registry.reload().await
    }

    // ===== Workflow management =====

    pub async fn create_workflow(&self, definition: WorkflowDefinition) -> EngineResult<Uuid> {
        self.registry.create(definition).await
    }

    pub async fn update_workflow(&self, id: Uuid, patch: WorkflowPatch) -> EngineResult<bool> {
        self.registry.update(id, patch).await
    }

    /// Cancel the workflow's running executions, then remove it. `false` for an unknown id.
    ///
    /// The workflow is detached from dispatch first; executions that were already matched
    /// and register after the cancel sweep are cancelled by `spawn_execution`.
    pub async fn delete_workflow(&self, id: Uuid) -> EngineResult<bool> {
        if !self.registry.detach(id).await {
            return Ok(false);
        }

        self.tracker.cancel_workflow(id).await;
        match self.registry.remove(id).await {
            Ok(removed) => Ok(removed),
            Err(e) => {
                self.registry.reattach(id).await;
                Err(e)
            }
        }
    }

    pub async fn get_workflow(&self, id: Uuid) -> EngineResult<Workflow> {
        self.registry.get(id).await
    }

    pub async fn list_workflows(&self, filter: &WorkflowFilter) -> Vec<Workflow> {
        self.registry.list(filter).await
    }

    // ===== Execution =====

    /// Start one execution per active workflow whose trigger matches. Does not wait for them.
    pub async fn dispatch(&self, trigger_type: TriggerType, payload: Value) -> Vec<Uuid> {
        let matched = self.registry.matching(trigger_type, &payload).await;
        if matched.is_empty() {
            debug!("No workflows matched {}", trigger_type);
            return Vec::new();
        }

        let mut started = Vec::with_capacity(matched.len());
        for workflow in &matched {
            let id = self
                .spawn_execution(workflow, ExecutionOrigin::Dispatch, payload.clone())
                .await;
            started.push(id);
        }

        info!("Dispatched {} to {} workflows", trigger_type, started.len());
        started
    }

    /// Dispatch a trigger event
    pub async fn process_event(&self, event: TriggerEvent) -> Vec<Uuid> {
        info!(
            event_id = %event.event_id,
            correlation_id = ?event.correlation_id,
            source = ?event.source,
            "Processing event: {}",
            event.trigger_type
        );

        self.dispatch(event.trigger_type, event.payload).await
    }

    /// Run a manual-trigger workflow directly, skipping trigger conditions
    pub async fn execute_manually(&self, workflow_id: Uuid, context: Value) -> EngineResult<Uuid> {
        let workflow = self.registry.get(workflow_id).await?;

        if workflow.trigger.trigger_type != TriggerType::Manual {
            return Err(EngineError::ManualExecutionNotAllowed(workflow_id));
        }
        if !matches!(workflow.status, WorkflowStatus::Draft | WorkflowStatus::Active) {
            return Err(EngineError::WorkflowNotRunnable {
                id: workflow_id,
                status: workflow.status,
            });
        }

        info!("Manually executing workflow '{}' ({})", workflow.name, workflow_id);
        Ok(self
            .spawn_execution(&workflow, ExecutionOrigin::Manual, context)
            .await)
    }

    async fn spawn_execution(
        &self,
        workflow: &Workflow,
        origin: ExecutionOrigin,
        payload: Value,
    ) -> Uuid {
        let handle = self
            .tracker
            .register(Execution::start(workflow, origin, payload.clone()))
            .await;
        let execution_id = handle.id();
        self.registry.record_execution(workflow.id).await;

        if !self.registry.is_attached(workflow.id).await {
            debug!("Workflow {} is being deleted, cancelling execution {}", workflow.id, execution_id);
            self.tracker.cancel(execution_id).await.ok();
        }

        let executor = self.executor.clone();
        let actions = workflow.actions.clone();
        let workflow_name = workflow.name.clone();

        tokio::spawn(async move {
            let outcome = AssertUnwindSafe(executor.run(&actions, &payload, &handle))
                .catch_unwind()
                .await;

            match outcome {
                Ok(status) => info!(
                    "Workflow '{}' execution {} finished: {}",
                    workflow_name, execution_id, status
                ),
                Err(_) => {
                    error!("Workflow '{}' execution {} panicked", workflow_name, execution_id);
                    handle
                        .record_error(ExecutionError::new(
                            None,
                            ExecutionErrorKind::Internal,
                            "Execution task panicked",
                        ))
                        .await;
                    handle.finish(ExecutionStatus::Failed).await;
                }
            }
        });

        execution_id
    }

    // ===== Tracking =====

    pub async fn get_status(&self, execution_id: Uuid) -> EngineResult<ExecutionReport> {
        self.tracker.status(execution_id).await
    }

    pub async fn get_execution(&self, execution_id: Uuid) -> EngineResult<Execution> {
        self.tracker.get(execution_id).await
    }

    pub async fn cancel(&self, execution_id: Uuid) -> EngineResult<bool> {
        self.tracker.cancel(execution_id).await
    }

    /// Wait for an execution to reach a terminal status
    pub async fn wait(&self, execution_id: Uuid) -> EngineResult<ExecutionReport> {
        self.tracker.wait(execution_id).await
    }

    /// Get execution history, newest first
    pub async fn get_execution_history(
        &self,
        workflow_id: Option<Uuid>,
        status: Option<ExecutionStatus>,
        limit: Option<usize>,
    ) -> Vec<Execution> {
        self.tracker.list(workflow_id, status, limit).await
    }

    pub async fn statistics(&self, scope_id: Option<ScopeId>) -> EngineStatistics {
        let filter = WorkflowFilter {
            scope_id,
            ..WorkflowFilter::default()
        };

        let mut stats = EngineStatistics::default();

        for workflow in self.registry.list(&filter).await {
            stats.total_workflows += 1;
            *stats.workflows_by_status.entry(workflow.status).or_default() += 1;
            *stats
                .workflows_by_trigger
                .entry(workflow.trigger.trigger_type)
                .or_default() += 1;
        }

        let mut completed_ms = Vec::new();
        for execution in self.tracker.snapshot(scope_id).await {
            stats.total_executions += 1;
            *stats.executions_by_status.entry(execution.status).or_default() += 1;
            if execution.status == ExecutionStatus::Completed {
                if let Some(ms) = execution.duration_ms() {
                    completed_ms.push(ms as f64);
                }
            }
        }

        if !completed_ms.is_empty() {
            stats.average_duration_ms =
                Some(completed_ms.iter().sum::<f64>() / completed_ms.len() as f64);
        }

        stats
    }

    /// Periodically prune finished executions until `shutdown` fires
    pub fn spawn_retention_sweeper(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        let period = self.config.sweep_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await; // Skip first immediate tick

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let pruned = engine.tracker.prune().await;
                        if pruned > 0 {
                            debug!("Retention sweep pruned {} executions", pruned);
                        }
                    }
                }
            }

            debug!("Retention sweeper stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::EventBus;
    use guildflow_shared::{Action, Trigger};
    use serde_json::json;

    fn engine() -> WorkflowEngine {
        WorkflowEngine::new(
            ActionHandlerRegistry::with_collaborators(Arc::new(EventBus::new())),
            EngineConfig::default(),
            None,
        )
    }

    #[tokio::test]
    async fn test_statistics_by_scope() {
        let engine = engine();
        let id = engine
            .create_workflow(
                WorkflowDefinition::new("Tagger", 1, 7, Trigger::new(TriggerType::TicketCreated))
                    .with_action(Action::add_tag("tag", "{{ticket_id}}", "new"))
                    .with_status(WorkflowStatus::Active),
            )
            .await
            .unwrap();
        engine
            .create_workflow(WorkflowDefinition::new(
                "Elsewhere",
                2,
                7,
                Trigger::new(TriggerType::Manual),
            ))
            .await
            .unwrap();

        let started = engine
            .dispatch(TriggerType::TicketCreated, json!({ "ticket_id": "t-1" }))
            .await;
        assert_eq!(started.len(), 1);
        engine.wait(started[0]).await.unwrap();

        let stats = engine.statistics(Some(1)).await;
        assert_eq!(stats.total_workflows, 1);
        assert_eq!(stats.workflows_by_status[&WorkflowStatus::Active], 1);
        assert_eq!(stats.workflows_by_trigger[&TriggerType::TicketCreated], 1);
        assert_eq!(stats.total_executions, 1);
        assert_eq!(stats.executions_by_status[&ExecutionStatus::Completed], 1);
        assert!(stats.average_duration_ms.is_some());

        assert_eq!(engine.statistics(None).await.total_workflows, 2);
        assert_eq!(engine.get_workflow(id).await.unwrap().execution_count, 1);
    }

    #[tokio::test]
    async fn test_retention_sweeper_stops_on_shutdown() {
        let engine = Arc::new(engine());
        let shutdown = CancellationToken::new();
        let sweeper = engine.spawn_retention_sweeper(shutdown.clone());

        shutdown.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(5), sweeper)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_execution_started_while_deleting_is_cancelled() {
        let engine = engine();
        let id = engine
            .create_workflow(WorkflowDefinition::new(
                "Escalate",
                1,
                7,
                Trigger::new(TriggerType::Manual),
            )
            .with_action(Action::add_tag("tag", "{{ticket_id}}", "escalated").with_delay(60)))
            .await
            .unwrap();

        // a run that was matched before the delete detached the workflow
        assert!(engine.registry().detach(id).await);
        let late = engine
            .execute_manually(id, json!({ "ticket_id": "t-3" }))
            .await
            .unwrap();

        let report = engine.wait(late).await.unwrap();
        assert_eq!(report.status, ExecutionStatus::Cancelled);

        assert!(engine.delete_workflow(id).await.unwrap());
        assert!(!engine.registry().is_attached(id).await);
    }

    #[tokio::test]
    async fn test_reattach_restores_dispatch() {
        let engine = engine();
        let id = engine
            .create_workflow(
                WorkflowDefinition::new("Tagger", 1, 7, Trigger::new(TriggerType::TicketCreated))
                    .with_action(Action::add_tag("tag", "{{ticket_id}}", "new"))
                    .with_status(WorkflowStatus::Active),
            )
            .await
            .unwrap();

        engine.registry().detach(id).await;
        assert!(engine
            .dispatch(TriggerType::TicketCreated, json!({ "ticket_id": "t-1" }))
            .await
            .is_empty());

        engine.registry().reattach(id).await;
        assert_eq!(
            engine
                .dispatch(TriggerType::TicketCreated, json!({ "ticket_id": "t-2" }))
                .await
                .len(),
            1
        );
    }
}
