// Workflow Registry - Definition storage, validation and trigger indexing

use chrono::Utc;
use guildflow_shared::{
    Action, TriggerType, Workflow, WorkflowDefinition, WorkflowFilter, WorkflowPatch,
    WorkflowStatus,
};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use super::actions::ActionHandlerRegistry;
use super::triggers::TriggerDispatcher;
use crate::error::{EngineError, EngineResult, ValidationBuilder};
use crate::store::WorkflowStore;

const MAX_NAME_LENGTH: usize = 100;

pub struct WorkflowRegistry {
    workflows: RwLock<HashMap<Uuid, Workflow>>,
    dispatcher: TriggerDispatcher,
    handlers: Arc<ActionHandlerRegistry>,
    store: Option<Arc<dyn WorkflowStore>>,
}

impl WorkflowRegistry {
    pub fn new(handlers: Arc<ActionHandlerRegistry>, store: Option<Arc<dyn WorkflowStore>>) -> Self {
        Self {
            workflows: RwLock::new(HashMap::new()),
            dispatcher: TriggerDispatcher::new(),
            handlers,
            store,
        }
    }

    pub fn dispatcher(&self) -> &TriggerDispatcher {
        &self.dispatcher
    }

    fn check_definition(
        &self,
        name: &str,
        trigger_type: TriggerType,
        actions: &[Action],
        validation: &mut ValidationBuilder,
    ) {
        if name.trim().is_empty() {
            validation.error("name", "Name is required");
        } else if name.chars().count() > MAX_NAME_LENGTH {
            validation.error(
                "name",
                format!("Name must be {} characters or less", MAX_NAME_LENGTH),
            );
        }

        if !trigger_type.is_known() {
            validation.error("trigger.type", "Unknown trigger type");
        }

        let mut seen = HashSet::new();
        for (index, action) in actions.iter().enumerate() {
            if action.id.trim().is_empty() {
                validation.error(&format!("actions[{}].id", index), "Action id is required");
            } else if !seen.insert(action.id.as_str()) {
                validation.error(
                    &format!("actions[{}].id", index),
                    format!("Duplicate action id '{}'", action.id),
                );
            }

            if !action.action_type.is_known() {
                validation.error(&format!("actions[{}].type", index), "Unknown action type");
            } else if !self.handlers.contains(action.action_type) {
                validation.error(
                    &format!("actions[{}].type", index),
                    format!("No handler registered for action type '{}'", action.action_type),
                );
            }
        }
    }

    /// Validate a new definition without registering it
    pub fn validate(&self, definition: &WorkflowDefinition) -> EngineResult<()> {
        let mut validation = ValidationBuilder::new();
        self.check_definition(
            &definition.name,
            definition.trigger.trigger_type,
            &definition.actions,
            &mut validation,
        );

        if !matches!(definition.status, WorkflowStatus::Draft | WorkflowStatus::Active) {
            validation.error("status", "Workflows must start as draft or active");
        }

        validation.build()
    }

    async fn persist(&self, workflow: &Workflow) -> EngineResult<()> {
        if let Some(store) = &self.store {
            store.save(workflow).await?;
        }
        Ok(())
    }

    pub async fn create(&self, definition: WorkflowDefinition) -> EngineResult<Uuid> {
        self.validate(&definition)?;

        let workflow = Workflow::from_definition(definition);
        let id = workflow.id;
        self.persist(&workflow).await?;

        let mut workflows = self.workflows.write().await;
        self.dispatcher.bind(workflow.trigger.trigger_type, id).await;
        info!(
            "Created workflow '{}' ({}) on {}",
            workflow.name, id, workflow.trigger.trigger_type
        );
        workflows.insert(id, workflow);

        Ok(id)
    }

    /// Apply a patch. `false` when the patch carries no changes.
    pub async fn update(&self, id: Uuid, patch: WorkflowPatch) -> EngineResult<bool> {
        let mut workflows = self.workflows.write().await;
        let current = workflows
            .get(&id)
            .ok_or(EngineError::WorkflowNotFound(id))?;

        if patch.is_empty() {
            return Ok(false);
        }
        if current.status == WorkflowStatus::Archived {
            return Err(EngineError::WorkflowArchived(id));
        }

        let structural = patch.is_structural();
        let previous_trigger = current.trigger.trigger_type;
        let mut updated = current.clone();

        if let Some(status) = patch.status {
            if !updated.status.can_transition_to(status) {
                return Err(EngineError::InvalidStatusTransition {
                    id,
                    from: updated.status,
                    to: status,
                });
            }
            updated.status = status;
        }
        if let Some(name) = patch.name {
            updated.name = name;
        }
        if let Some(description) = patch.description {
            updated.description = Some(description).filter(|d| !d.is_empty());
        }
        if let Some(trigger) = patch.trigger {
            updated.trigger = trigger;
        }
        if let Some(actions) = patch.actions {
            updated.actions = actions;
        }
        if let Some(tags) = patch.tags {
            updated.tags = tags;
        }

        let mut validation = ValidationBuilder::new();
        self.check_definition(
            &updated.name,
            updated.trigger.trigger_type,
            &updated.actions,
            &mut validation,
        );
        validation.build()?;

        if structural {
            updated.version += 1;
        }
        updated.updated_at = Some(Utc::now());

        self.persist(&updated).await?;
        self.dispatcher
            .rebind(previous_trigger, updated.trigger.trigger_type, id)
            .await;

        info!(
            "Updated workflow '{}' ({}) to version {}, status {}",
            updated.name, id, updated.version, updated.status
        );
        workflows.insert(id, updated);

        Ok(true)
    }

    /// Remove a workflow. `false` for an unknown id.
    pub async fn remove(&self, id: Uuid) -> EngineResult<bool> {
        let mut workflows = self.workflows.write().await;
        let Some(workflow) = workflows.get(&id) else {
            return Ok(false);
        };

        if let Some(store) = &self.store {
            store.remove(id).await?;
        }
        self.dispatcher
            .unbind(workflow.trigger.trigger_type, id)
            .await;
        if let Some(removed) = workflows.remove(&id) {
            info!("Deleted workflow '{}' ({})", removed.name, id);
        }

        Ok(true)
    }

    /// Stop dispatching to a workflow without removing it. `false` for an unknown id.
    pub async fn detach(&self, id: Uuid) -> bool {
        let workflows = self.workflows.read().await;
        let Some(workflow) = workflows.get(&id) else {
            return false;
        };

        self.dispatcher
            .unbind(workflow.trigger.trigger_type, id)
            .await;
        true
    }

    /// Undo [`detach`](Self::detach) for a workflow that is still registered
    pub async fn reattach(&self, id: Uuid) {
        let workflows = self.workflows.read().await;
        if let Some(workflow) = workflows.get(&id) {
            self.dispatcher.bind(workflow.trigger.trigger_type, id).await;
        }
    }

    /// Registered and reachable by dispatch and manual runs
    pub async fn is_attached(&self, id: Uuid) -> bool {
        self.dispatcher.is_bound(id).await
    }

    pub async fn get(&self, id: Uuid) -> EngineResult<Workflow> {
        self.workflows
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(EngineError::WorkflowNotFound(id))
    }

    pub async fn contains(&self, id: Uuid) -> bool {
        self.workflows.read().await.contains_key(&id)
    }

    /// Workflows matching `filter`, oldest first
    pub async fn list(&self, filter: &WorkflowFilter) -> Vec<Workflow> {
        let mut matched: Vec<Workflow> = self
            .workflows
            .read()
            .await
            .values()
            .filter(|workflow| workflow.matches_filter(filter))
            .cloned()
            .collect();

        matched.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        matched
    }

    /// Active workflows whose trigger matches this event
    pub async fn matching(&self, trigger_type: TriggerType, payload: &Value) -> Vec<Workflow> {
        let workflows = self.workflows.read().await;
        self.dispatcher
            .matching(trigger_type, payload, &workflows)
            .await
    }

    pub async fn record_execution(&self, id: Uuid) {
        if let Some(workflow) = self.workflows.write().await.get_mut(&id) {
            workflow.execution_count += 1;
            workflow.last_executed = Some(Utc::now());
        }
    }

    /// Replace every registered workflow with the store's contents.
    /// Definitions that no longer validate are skipped.
    pub async fn reload(&self) -> EngineResult<usize> {
        let Some(store) = &self.store else {
            return Ok(0);
        };
        let persisted = store.load_all().await?;

        let mut workflows = self.workflows.write().await;
        workflows.clear();
        self.dispatcher.clear().await;

        for workflow in persisted {
            let mut validation = ValidationBuilder::new();
            self.check_definition(
                &workflow.name,
                workflow.trigger.trigger_type,
                &workflow.actions,
                &mut validation,
            );
            if let Err(e) = validation.build() {
                warn!("Skipping persisted workflow '{}' ({}): {}", workflow.name, workflow.id, e);
                continue;
            }

            self.dispatcher
                .bind(workflow.trigger.trigger_type, workflow.id)
                .await;
            workflows.insert(workflow.id, workflow);
        }

        info!("Loaded {} workflows", workflows.len());
        Ok(workflows.len())
    }
}
