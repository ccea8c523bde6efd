// Workflow Triggers - Community events and the trigger type index

use chrono::{DateTime, Utc};
use guildflow_shared::{ScopeId, TriggerType, UserId, Workflow};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::conditions;

/// Payload for trigger events
pub type EventPayload = serde_json::Value;

/// A community event that can start workflow executions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub event_id: Uuid,
    pub trigger_type: TriggerType,
    pub payload: EventPayload,
    pub source: EventSource,
    pub timestamp: DateTime<Utc>,
    pub correlation_id: Option<Uuid>,
}

/// Source of the trigger event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EventSource {
    System,
    User(UserId),
    Api,
    Gateway,
    Webhook,
    Scheduler,
    Integration(String),
}

impl TriggerEvent {
    pub fn new(trigger_type: TriggerType, payload: EventPayload, source: EventSource) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            trigger_type,
            payload,
            source,
            timestamp: Utc::now(),
            correlation_id: None,
        }
    }

    pub fn member_joined(scope_id: ScopeId, user_id: UserId, username: &str, is_bot: bool) -> Self {
        Self::new(
            TriggerType::MemberJoined,
            serde_json::json!({
                "scope_id": scope_id,
                "user_id": user_id,
                "username": username,
                "is_bot": is_bot
            }),
            EventSource::Gateway,
        )
    }

    pub fn member_left(scope_id: ScopeId, user_id: UserId) -> Self {
        Self::new(
            TriggerType::MemberLeft,
            serde_json::json!({
                "scope_id": scope_id,
                "user_id": user_id
            }),
            EventSource::Gateway,
        )
    }

    pub fn message_created(
        scope_id: ScopeId,
        channel_id: &str,
        author_id: UserId,
        content: &str,
    ) -> Self {
        Self::new(
            TriggerType::MessageCreated,
            serde_json::json!({
                "scope_id": scope_id,
                "channel_id": channel_id,
                "author_id": author_id,
                "content": content
            }),
            EventSource::Gateway,
        )
    }

    pub fn reaction_added(scope_id: ScopeId, message_id: &str, user_id: UserId, emoji: &str) -> Self {
        Self::new(
            TriggerType::ReactionAdded,
            serde_json::json!({
                "scope_id": scope_id,
                "message_id": message_id,
                "user_id": user_id,
                "emoji": emoji
            }),
            EventSource::Gateway,
        )
    }

    pub fn role_assigned(scope_id: ScopeId, user_id: UserId, role_id: &str) -> Self {
        Self::new(
            TriggerType::RoleAssigned,
            serde_json::json!({
                "scope_id": scope_id,
                "user_id": user_id,
                "role_id": role_id
            }),
            EventSource::Gateway,
        )
    }

    pub fn ticket_created(
        scope_id: ScopeId,
        ticket_id: &str,
        subject: &str,
        priority: &str,
        creator_id: UserId,
    ) -> Self {
        Self::new(
            TriggerType::TicketCreated,
            serde_json::json!({
                "scope_id": scope_id,
                "ticket_id": ticket_id,
                "subject": subject,
                "priority": priority,
                "creator_id": creator_id
            }),
            EventSource::System,
        )
    }

    pub fn ticket_closed(scope_id: ScopeId, ticket_id: &str, closed_by: UserId) -> Self {
        Self::new(
            TriggerType::TicketClosed,
            serde_json::json!({
                "scope_id": scope_id,
                "ticket_id": ticket_id,
                "closed_by": closed_by
            }),
            EventSource::System,
        )
    }

    pub fn scheduled(schedule_name: &str, schedule_config: serde_json::Value) -> Self {
        Self::new(
            TriggerType::Scheduled,
            serde_json::json!({
                "schedule_name": schedule_name,
                "config": schedule_config
            }),
            EventSource::Scheduler,
        )
    }

    pub fn webhook_received(webhook_name: &str, body: serde_json::Value) -> Self {
        Self::new(
            TriggerType::WebhookReceived,
            serde_json::json!({
                "webhook_name": webhook_name,
                "body": body
            }),
            EventSource::Webhook,
        )
    }

    pub fn with_source(mut self, source: EventSource) -> Self {
        self.source = source;
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }
}

/// Index from trigger type to the workflows listening for it
#[derive(Default)]
pub struct TriggerDispatcher {
    index: RwLock<HashMap<TriggerType, HashSet<Uuid>>>,
}

impl TriggerDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn bind(&self, trigger_type: TriggerType, workflow_id: Uuid) {
        self.index
            .write()
            .await
            .entry(trigger_type)
            .or_default()
            .insert(workflow_id);
    }

    pub async fn unbind(&self, trigger_type: TriggerType, workflow_id: Uuid) {
        let mut index = self.index.write().await;
        if let Some(ids) = index.get_mut(&trigger_type) {
            ids.remove(&workflow_id);
            if ids.is_empty() {
                index.remove(&trigger_type);
            }
        }
    }

    /// Move a workflow to a new trigger type
    pub async fn rebind(&self, from: TriggerType, to: TriggerType, workflow_id: Uuid) {
        if from != to {
            self.unbind(from, workflow_id).await;
            self.bind(to, workflow_id).await;
        }
    }

    /// Whether the workflow is bound under any trigger type
    pub async fn is_bound(&self, workflow_id: Uuid) -> bool {
        self.index
            .read()
            .await
            .values()
            .any(|ids| ids.contains(&workflow_id))
    }

    pub async fn bound(&self, trigger_type: TriggerType) -> Vec<Uuid> {
        self.index
            .read()
            .await
            .get(&trigger_type)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    pub async fn clear(&self) {
        self.index.write().await.clear();
    }

    /// Workflows bound to `trigger_type` that are active right now and whose trigger
    /// conditions match `payload`, oldest first
    pub async fn matching(
        &self,
        trigger_type: TriggerType,
        payload: &EventPayload,
        workflows: &HashMap<Uuid, Workflow>,
    ) -> Vec<Workflow> {
        let mut matched: Vec<Workflow> = self
            .bound(trigger_type)
            .await
            .into_iter()
            .filter_map(|id| workflows.get(&id))
            .filter(|workflow| workflow.status.accepts_dispatch())
            .filter(|workflow| conditions::evaluate(&workflow.trigger.conditions, payload))
            .cloned()
            .collect();

        matched.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        matched
    }
}
